use crate::{error::ConfigError, sql::DEFAULT_CURSOR_NAME};
use serde::Deserialize;
use std::time::Duration;

pub const ENV_CURSOR_NAME: &str = "CURSOR_NAME";
pub const ENV_MAX_DB_EXECUTION_TIME_MS: &str = "CURSOR_MAX_DB_EXECUTION_TIME_MS";

const DEFAULT_MAX_DB_EXECUTION_TIME_MS: u64 = 60_000;

/// Tunables for a [`CursorIterator`](crate::iterator::CursorIterator).
///
/// Can be deserialized from any serde format or loaded from the environment.
/// Missing fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    /// Name of the server-side cursor. Must be a plain SQL identifier.
    pub cursor_name: String,

    /// Deadline for every single database round trip, in milliseconds.
    pub max_db_execution_time_ms: u64,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            cursor_name: DEFAULT_CURSOR_NAME.to_string(),
            max_db_execution_time_ms: DEFAULT_MAX_DB_EXECUTION_TIME_MS,
        }
    }
}

impl CursorConfig {
    pub fn max_db_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_db_execution_time_ms)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `CURSOR_*` variables resolved through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_CURSOR_NAME) {
            let name = name.trim();
            if !name.is_empty() {
                config.cursor_name = name.to_string();
            }
        }

        if let Some(raw) = lookup(ENV_MAX_DB_EXECUTION_TIME_MS) {
            config.max_db_execution_time_ms =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: ENV_MAX_DB_EXECUTION_TIME_MS,
                        value: raw.clone(),
                    })?;
        }

        Ok(config)
    }
}
