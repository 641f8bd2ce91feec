use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of one fight as read from the result page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FightResult {
    pub won: bool,
    pub points: u32,
    pub rating_change: i32,
}

/// Per-run accumulator. Updated once per completed fight, never mid-fight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub fights: u32,
    pub wins: u32,
    pub points: u32,
    pub rating_change: i32,
}

impl SessionStats {
    pub fn record(&mut self, result: &FightResult) {
        self.fights += 1;
        if result.won {
            self.wins += 1;
        }
        self.points = self.points.saturating_add(result.points);
        self.rating_change = self.rating_change.saturating_add(result.rating_change);
    }
}

/// What a run hands back to its caller: success flag, reason on failure, and
/// whatever statistics were accumulated before the run ended.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub profile: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub stats: SessionStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn completed(profile: &str, stats: SessionStats, started_at: DateTime<Utc>) -> Self {
        Self {
            profile: profile.to_string(),
            success: true,
            reason: None,
            stats,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        profile: &str,
        reason: impl Into<String>,
        stats: SessionStats,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            profile: profile.to_string(),
            success: false,
            reason: Some(reason.into()),
            stats,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
