use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::session::{Page, SessionError};

/// Why a run stopped early. `Display` is the reason string handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Abort {
    #[error("insufficient attempts: {remaining} remaining, floor is {floor}")]
    InsufficientAttempts { remaining: u32, floor: u32 },

    #[error("no arena attempts left")]
    AttemptsExhausted,

    #[error("arena still on cooldown after {retries} retries")]
    CooldownCeiling { retries: u32 },

    #[error("no {what} found on {context}")]
    NoAffordance {
        what: &'static str,
        context: &'static str,
    },

    #[error("http {status} from {url}")]
    Http { status: u16, url: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("no opponent found within {0:?}")]
    OpponentTimeout(Duration),

    #[error("dropped from the queue while waiting for an opponent")]
    EjectedFromQueue,

    #[error("attack budget of {0} ticks exhausted without a result")]
    BudgetExhausted(u32),

    #[error("no fight result after {polls} poll(s)")]
    ResultTimeout { polls: u32 },
}

impl From<SessionError> for Abort {
    fn from(e: SessionError) -> Self {
        Abort::Transport(e.to_string())
    }
}

/// Turn a non-200 response into an abort; pass a good page through.
pub fn ensure_ok(page: Page, url: &str) -> Result<Page, Abort> {
    if page.is_ok() {
        Ok(page)
    } else {
        Err(Abort::Http { status: page.status, url: url.to_string() })
    }
}

/// Conditions met at the queue-join boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinFailure {
    /// The join control is rendered disabled.
    OnCooldown,
    /// A resource limit, not a transient state.
    AttemptsExhausted,
    NoAffordance,
    Http { status: u16, url: String },
    /// The queue page fell back to Idle while waiting for an opponent.
    Ejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    RetryAfter(Duration),
    Abort(Abort),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Ceiling on cooldown retries before the run is aborted.
    pub cooldown_retries: u32,
    pub cooldown_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            cooldown_retries: 3,
            cooldown_wait: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// `retries` is how many times this failure has already been retried.
    pub fn decide(&self, failure: JoinFailure, retries: u32) -> Decision {
        match failure {
            JoinFailure::OnCooldown if retries < self.cooldown_retries => {
                Decision::RetryAfter(self.cooldown_wait)
            }
            JoinFailure::OnCooldown => Decision::Abort(Abort::CooldownCeiling { retries }),
            JoinFailure::AttemptsExhausted => Decision::Abort(Abort::AttemptsExhausted),
            JoinFailure::NoAffordance => Decision::Abort(Abort::NoAffordance {
                what: "queue join link",
                context: "arena page",
            }),
            JoinFailure::Http { status, url } => Decision::Abort(Abort::Http { status, url }),
            JoinFailure::Ejected if retries < self.cooldown_retries => {
                Decision::RetryAfter(Duration::ZERO)
            }
            JoinFailure::Ejected => Decision::Abort(Abort::EjectedFromQueue),
        }
    }
}

/// Wall-clock budget for a polled wait.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    end: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self { end: Instant::now() + budget, budget }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.end
    }

    pub fn remaining(&self) -> Duration {
        self.end.saturating_duration_since(Instant::now())
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}
