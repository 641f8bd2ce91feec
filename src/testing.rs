//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::Config;
use crate::diagnostics::DiagnosticSink;
use crate::session::{HttpSession, Page, RequestKind, SessionError};

struct Route {
    pattern: String,
    pages: VecDeque<(u16, String)>,
}

/// Answers each GET from the first route whose pattern is a substring of the
/// URL. A route hands out its pages in order and repeats the last one. URLs
/// matching no route get a 404.
#[derive(Default)]
pub struct ScriptedSession {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<(String, RequestKind)>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, pattern: &str, bodies: &[&str]) -> Self {
        let pages = bodies.iter().map(|b| (200, b.to_string())).collect();
        self.push(pattern, pages)
    }

    pub fn route_status(self, pattern: &str, status: u16, body: &str) -> Self {
        self.push(pattern, VecDeque::from([(status, body.to_string())]))
    }

    fn push(self, pattern: &str, pages: VecDeque<(u16, String)>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push(Route { pattern: pattern.to_string(), pages });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u.contains(pattern))
            .count()
    }

    pub fn ajax_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, k)| *k == RequestKind::Ajax)
            .count()
    }
}

#[async_trait]
impl HttpSession for ScriptedSession {
    async fn get(&self, url: &str, kind: RequestKind) -> Result<Page, SessionError> {
        self.calls.lock().unwrap().push((url.to_string(), kind));
        let mut routes = self.routes.lock().unwrap();
        let Some(route) = routes.iter_mut().find(|r| url.contains(&r.pattern)) else {
            return Ok(Page { status: 404, body: String::new(), final_url: url.to_string() });
        };
        let (status, body) = if route.pages.len() > 1 {
            route.pages.pop_front().unwrap_or_default()
        } else {
            route.pages.front().cloned().unwrap_or_default()
        };
        Ok(Page { status, body, final_url: url.to_string() })
    }
}

#[derive(Default)]
pub struct MemorySink {
    dumps: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn contexts(&self) -> Vec<String> {
        self.dumps.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }
}

impl DiagnosticSink for MemorySink {
    fn dump(&self, context: &str, markup: &str) {
        self.dumps
            .lock()
            .unwrap()
            .push((context.to_string(), markup.to_string()));
    }
}

/// Minimal configuration against `base_url` with every delay zeroed.
pub fn config_for(base_url: &str, fight_log: &std::path::Path) -> Config {
    let mut config = Config::from_lookup(|name| match name {
        "GAUNTLET_BASE_URL" => Some(base_url.to_string()),
        "GAUNTLET_COOKIE" => Some("sid=1".into()),
        "GAUNTLET_AUTH_TOKEN" => Some("t".into()),
        "GAUNTLET_FIGHTS" => Some("1".into()),
        "GAUNTLET_REQUEST_TIMEOUT_SECS" => Some("2".into()),
        _ => None,
    })
    .unwrap();
    config.fight_log = fight_log.to_path_buf();
    config.arena.settle = std::time::Duration::ZERO;
    config.arena.queue_poll = std::time::Duration::ZERO;
    config.arena.combat.pacing = std::time::Duration::ZERO;
    config.arena.combat.result_poll_interval = std::time::Duration::ZERO;
    config
}
