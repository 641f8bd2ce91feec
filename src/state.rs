use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::arena::{ArenaEvent, FightRecord};
use crate::config::Config;
use crate::phase::Phase;
use crate::session::GameSession;
use crate::stats::{RunReport, SessionStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerPhase {
    Idle,
    Preparing,
    Running,
}

pub struct AppStateInner {
    pub runner: RunnerPhase,
    pub config: Config,
    /// The profile's HTTP session, created on first use and kept until reset.
    pub session: Option<Arc<Mutex<GameSession>>>,
    pub runner_handle: Option<JoinHandle<()>>,
    /// Arena phase last reported by the running driver.
    pub arena_phase: Option<Phase>,
    /// Statistics of the run in progress, refreshed after every fight.
    pub live_stats: SessionStats,
    pub fights: Vec<FightRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_report: Option<RunReport>,
}

pub type AppState = Arc<Mutex<AppStateInner>>;

impl AppStateInner {
    pub fn new(config: Config) -> Self {
        Self {
            runner: RunnerPhase::Idle,
            config,
            session: None,
            runner_handle: None,
            arena_phase: None,
            live_stats: SessionStats::default(),
            fights: Vec::new(),
            started_at: None,
            last_report: None,
        }
    }

    /// Clear per-run progress before a new run starts.
    pub fn begin_run(&mut self) {
        self.runner = RunnerPhase::Preparing;
        self.arena_phase = None;
        self.live_stats = SessionStats::default();
        self.fights.clear();
        self.started_at = Some(Utc::now());
    }

    pub fn apply(&mut self, event: &ArenaEvent) {
        match event {
            ArenaEvent::Phase(phase) => self.arena_phase = Some(*phase),
            ArenaEvent::Fight(record) => {
                self.live_stats.record(&record.result);
                self.fights.push(record.clone());
            }
        }
    }

    pub fn finish_run(&mut self, report: RunReport) {
        self.runner = RunnerPhase::Idle;
        self.runner_handle = None;
        self.arena_phase = None;
        self.last_report = Some(report);
    }
}
