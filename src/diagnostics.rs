use std::path::PathBuf;

use chrono::Utc;

/// Receives raw markup the core could not make sense of. Best effort: a sink
/// never fails the caller.
pub trait DiagnosticSink: Send + Sync {
    fn dump(&self, context: &str, markup: &str);
}

/// Discards everything.
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn dump(&self, context: &str, markup: &str) {
        tracing::debug!("discarding {context} snapshot ({} bytes)", markup.len());
    }
}

/// Writes each snapshot to `<dir>/<profile>-<context>-<timestamp>.html`.
pub struct FileSink {
    dir: PathBuf,
    profile: String,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>, profile: &str) -> Self {
        Self { dir: dir.into(), profile: profile.to_string() }
    }

    fn path_for(&self, context: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let context: String = context
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}-{context}-{stamp}.html", self.profile))
    }
}

impl DiagnosticSink for FileSink {
    fn dump(&self, context: &str, markup: &str) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!("failed to create diagnostics dir {}: {e}", self.dir.display());
            return;
        }
        let path = self.path_for(context);
        match std::fs::write(&path, markup) {
            Ok(()) => tracing::info!("dumped {context} markup to {} ({} bytes)", path.display(), markup.len()),
            Err(e) => tracing::warn!("failed to dump {context} markup to {}: {e}", path.display()),
        }
    }
}
