use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::arena::{Arena, ArenaEvent, FightRecord};
use crate::config::Config;
use crate::diagnostics::{DiagnosticSink, FileSink, NullSink};
use crate::session::{GameSession, HttpSession};
use crate::state::{AppState, RunnerPhase};
use crate::stats::{RunReport, SessionStats};

#[derive(Serialize)]
struct FightLogEntry<'a> {
    profile: &'a str,
    #[serde(flatten)]
    record: &'a FightRecord,
}

fn log_fight(config: &Config, record: &FightRecord) {
    use std::fs::OpenOptions;
    use std::io::Write;

    let entry = FightLogEntry { profile: &config.profile, record };
    let line = match serde_json::to_string(&entry) {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!("failed to serialize fight log entry: {e}");
            return;
        }
    };

    match OpenOptions::new().create(true).append(true).open(&config.fight_log) {
        Ok(mut f) => {
            if let Err(e) = writeln!(f, "{line}") {
                tracing::warn!("failed to write to {}: {e}", config.fight_log.display());
            }
        }
        Err(e) => {
            tracing::warn!("failed to open {}: {e}", config.fight_log.display());
        }
    }
}

/// Return the profile's session, creating it on first use.
pub async fn prepare_session(state: &AppState) -> Result<Arc<Mutex<GameSession>>> {
    let mut s = state.lock().await;
    if let Some(ref session) = s.session {
        return Ok(session.clone());
    }

    let session = GameSession::new(&s.config).context("failed to create http session")?;
    let session = Arc::new(Mutex::new(session));
    s.session = Some(session.clone());
    tracing::info!("http session created for profile {}", s.config.profile);
    Ok(session)
}

fn diagnostic_sink(config: &Config) -> Box<dyn DiagnosticSink> {
    match &config.diagnostics_dir {
        Some(dir) => Box::new(FileSink::new(dir, &config.profile)),
        None => Box::new(NullSink),
    }
}

/// Run one arena session over `session` and fold every outcome, panics
/// included, into a report.
pub async fn drive<S: HttpSession + ?Sized>(
    session: &S,
    config: &Config,
    sink: &dyn DiagnosticSink,
    events: UnboundedSender<ArenaEvent>,
) -> RunReport {
    let started_at = Utc::now();
    let mut stats = SessionStats::default();

    let outcome = {
        let mut arena = Arena::new(session, config.base_url.clone(), &config.arena, sink)
            .with_events(events);
        AssertUnwindSafe(arena.run(&mut stats)).catch_unwind().await
    };

    let report = match outcome {
        Ok(Ok(())) => RunReport::completed(&config.profile, stats, started_at),
        Ok(Err(abort)) => {
            tracing::warn!("arena run aborted: {abort}");
            RunReport::failed(&config.profile, abort.to_string(), stats, started_at)
        }
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            tracing::error!("arena run panicked: {detail}");
            RunReport::failed(&config.profile, format!("internal error: {detail}"), stats, started_at)
        }
    };

    tracing::info!(
        "run finished for {}: success={}, fights={}, wins={}, points={}, rating={:+}",
        report.profile,
        report.success,
        report.stats.fights,
        report.stats.wins,
        report.stats.points,
        report.stats.rating_change,
    );
    report
}

/// The background task behind `/start`: prepares the session, drives the
/// arena, and publishes progress and the final report into `state`.
pub async fn run_arena(state: AppState) -> RunReport {
    let config = {
        let s = state.lock().await;
        s.config.clone()
    };
    let started_at = Utc::now();

    let session = match prepare_session(&state).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("{e:#}");
            let report = RunReport::failed(&config.profile, format!("{e:#}"), SessionStats::default(), started_at);
            state.lock().await.finish_run(report.clone());
            return report;
        }
    };

    {
        let mut s = state.lock().await;
        s.runner = RunnerPhase::Running;
    }

    let (tx, mut rx) = unbounded_channel();
    let consumer = {
        let state = state.clone();
        let config = config.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let ArenaEvent::Fight(record) = &event {
                    log_fight(&config, record);
                }
                state.lock().await.apply(&event);
            }
        })
    };

    let sink = diagnostic_sink(&config);
    let report = {
        let session = session.lock().await;
        drive(&*session, &config, sink.as_ref(), tx).await
    };

    // The sender went away with the arena; wait for the last events to land.
    if let Err(e) = consumer.await {
        tracing::warn!("event consumer failed: {e}");
    }

    state.lock().await.finish_run(report.clone());
    report
}

/// Drop the profile's session so the next run starts from the configured
/// cookies. Refused while a run holds the session.
pub async fn reset_session(state: &AppState) -> Result<bool> {
    let session = {
        let s = state.lock().await;
        if s.runner != RunnerPhase::Idle {
            return Ok(false);
        }
        s.session.clone()
    };

    if let Some(session) = session {
        let mut session = session
            .try_lock()
            .context("session is still in use")?;
        session.reset()?;
    }
    Ok(true)
}
