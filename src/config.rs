use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::affordance::ArenaMode;
use crate::arena::ArenaConfig;
use crate::combat::CombatConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct Config {
    /// Profile name; one automation process per profile.
    pub profile: String,
    pub base_url: Url,
    /// Cookie header of an already authenticated profile.
    pub cookie: String,
    pub auth_token: String,
    pub listen_addr: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub arena: ArenaConfig,
    /// Where unparseable pages are dumped. `None` discards them.
    pub diagnostics_dir: Option<PathBuf>,
    pub fight_log: PathBuf,
    pub lock_dir: Option<PathBuf>,
    /// Start a run as soon as the process is up.
    pub autostart: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let base_url_raw = env.required("GAUNTLET_BASE_URL")?;
        let base_url = Url::parse(&base_url_raw).map_err(|e| ConfigError::Invalid {
            name: "GAUNTLET_BASE_URL".into(),
            value: base_url_raw.clone(),
            reason: e.to_string(),
        })?;

        let cookie = env.required("GAUNTLET_COOKIE")?;
        let auth_token = env.required("GAUNTLET_AUTH_TOKEN")?;

        let profile = env.optional("GAUNTLET_PROFILE").unwrap_or_else(|| "default".into());
        let listen_addr = env
            .optional("GAUNTLET_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8091".into());
        let user_agent = env
            .optional("GAUNTLET_USER_AGENT")
            .unwrap_or_else(|| DEFAULT_USER_AGENT.into());
        let request_timeout = Duration::from_secs(env.parsed("GAUNTLET_REQUEST_TIMEOUT_SECS", 20)?);

        let combat_defaults = CombatConfig::default();
        let combat = CombatConfig {
            max_attacks: env.parsed("GAUNTLET_MAX_ATTACKS", combat_defaults.max_attacks)?,
            loot_every: env.parsed("GAUNTLET_LOOT_EVERY", combat_defaults.loot_every)?,
            pacing: Duration::from_millis(env.parsed("GAUNTLET_PACING_MS", 1500)?),
            result_polls: env.parsed("GAUNTLET_RESULT_POLLS", combat_defaults.result_polls)?,
            result_poll_interval: Duration::from_millis(env.parsed("GAUNTLET_RESULT_POLL_MS", 1000)?),
            refresher_path: env
                .optional("GAUNTLET_REFRESHER_PATH")
                .unwrap_or(combat_defaults.refresher_path),
        };

        let retry = RetryPolicy {
            cooldown_retries: env.parsed("GAUNTLET_COOLDOWN_RETRIES", 3)?,
            cooldown_wait: Duration::from_secs(env.parsed("GAUNTLET_COOLDOWN_WAIT_SECS", 300)?),
        };

        let arena = ArenaConfig {
            arena_path: env.optional("GAUNTLET_ARENA_PATH").unwrap_or_else(|| "/arena".into()),
            combat_path: env
                .optional("GAUNTLET_COMBAT_PATH")
                .unwrap_or_else(|| "/arena/combat".into()),
            mode: env.parsed("GAUNTLET_MODE", ArenaMode::Duel)?,
            fights: env.parsed("GAUNTLET_FIGHTS", 10)?,
            min_attempts: env.parsed("GAUNTLET_MIN_ATTEMPTS", 0)?,
            opponent_timeout: Duration::from_secs(env.parsed("GAUNTLET_OPPONENT_TIMEOUT_SECS", 300)?),
            queue_poll: Duration::from_secs(env.parsed("GAUNTLET_QUEUE_POLL_SECS", 5)?),
            settle: Duration::from_secs(env.parsed("GAUNTLET_SETTLE_SECS", 3)?),
            retry,
            combat,
        };

        if arena.fights == 0 {
            return Err(ConfigError::Invalid {
                name: "GAUNTLET_FIGHTS".into(),
                value: "0".into(),
                reason: "at least one fight required".into(),
            });
        }

        let diagnostics_dir = env.optional("GAUNTLET_DIAGNOSTICS_DIR").map(PathBuf::from);
        let fight_log = env
            .optional("GAUNTLET_FIGHT_LOG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("fights.jsonl"));
        let lock_dir = env.optional("GAUNTLET_LOCK_DIR").map(PathBuf::from);
        let autostart = env
            .optional("GAUNTLET_AUTOSTART")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Config {
            profile,
            base_url,
            cookie,
            auth_token,
            listen_addr,
            user_agent,
            request_timeout,
            arena,
            diagnostics_dir,
            fight_log,
            lock_dir,
            autostart,
        })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.optional(name).ok_or_else(|| ConfigError::MissingEnv(name.into()))
    }

    fn parsed<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name: name.into(),
                reason: e.to_string(),
                value,
            }),
        }
    }
}
