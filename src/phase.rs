//! Phase detection for the queue → combat → result cycle.
//!
//! The phase is always recomputed from the latest page. Previous belief is
//! kept only for logging transitions, never to decide the next phase, so an
//! unexpected server redirect resynchronises on the next poll.

use serde::Serialize;

use crate::markup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Queued,
    /// Opponent found; the arena-entry link is on the page.
    Paired,
    /// Entered the arena, combat instance not yet materialised.
    PreFight,
    InCombat,
    Result,
}

const PREFIGHT_MARKERS: &[&str] = &["prefight-timer", "До начала боя"];

impl Phase {
    /// Evaluate the evidence predicates in priority order.
    pub fn detect(markup: &str) -> Phase {
        if markup::has_result_evidence(markup) {
            Phase::Result
        } else if markup::has_combat_evidence(markup) {
            Phase::InCombat
        } else if PREFIGHT_MARKERS.iter().any(|m| markup.contains(m)) {
            Phase::PreFight
        } else if markup::find_action_url(markup, markup::ENTER_ARENA_SIG).is_some() {
            Phase::Paired
        } else if markup::has_queue_evidence(markup) {
            Phase::Queued
        } else {
            Phase::Idle
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Queued => "queued",
            Phase::Paired => "paired",
            Phase::PreFight => "pre-fight",
            Phase::InCombat => "in-combat",
            Phase::Result => "result",
        };
        f.write_str(name)
    }
}

/// Tracks the last detected phase for one run.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    current: Phase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    /// Detect the phase of `markup` and record it. Returns the new phase.
    pub fn observe(&mut self, markup: &str) -> Phase {
        let next = Phase::detect(markup);
        if next != self.current {
            tracing::info!("phase {} -> {next}", self.current);
            self.current = next;
        }
        next
    }

    /// Forget the previous fight, e.g. before queueing for the next one.
    pub fn reset(&mut self) {
        self.current = Phase::Idle;
    }
}
