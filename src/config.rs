//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::worker::queue::DEFAULT_QUEUE_CAPACITY;

/// Agent (worker) configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent name for identification in logs.
    pub name: String,
    /// Attempts per task before it is finalized as `error`.
    pub max_attempts: u32,
    /// Pause after a failed operation-durations fetch.
    pub config_retry_delay: Duration,
    /// Maximum number of tasks evaluated concurrently.
    pub max_in_flight: usize,
    /// How long a timed-out attempt waits for its cancelled evaluation.
    pub abandon_grace: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "calcflow-agent".to_string(),
            max_attempts: 3,
            config_retry_delay: Duration::from_millis(100),
            max_in_flight: 32,
            abandon_grace: Duration::from_secs(1),
        }
    }
}

/// Process-level configuration, read from `CALCFLOW_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub queue_capacity: usize,
    /// Optional directory for a daily-rolling log file.
    pub log_dir: Option<PathBuf>,
    pub agent: AgentConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/calcflow.db"),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            log_dir: None,
            agent: AgentConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep their
    /// defaults; present but unparseable values are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let port = parse_or(&get, "CALCFLOW_PORT", defaults.port)?;
        let db_path = get("CALCFLOW_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let queue_capacity =
            parse_or(&get, "CALCFLOW_QUEUE_CAPACITY", defaults.queue_capacity)?;
        let log_dir = get("CALCFLOW_LOG_DIR").map(PathBuf::from);

        let max_attempts = parse_or(&get, "CALCFLOW_MAX_ATTEMPTS", defaults.agent.max_attempts)?;
        let max_in_flight =
            parse_or(&get, "CALCFLOW_MAX_IN_FLIGHT", defaults.agent.max_in_flight)?;
        let retry_ms: u64 = parse_or(
            &get,
            "CALCFLOW_CONFIG_RETRY_MS",
            defaults.agent.config_retry_delay.as_millis() as u64,
        )?;

        for (key, value) in [
            ("CALCFLOW_QUEUE_CAPACITY", queue_capacity),
            ("CALCFLOW_MAX_IN_FLIGHT", max_in_flight),
            ("CALCFLOW_MAX_ATTEMPTS", max_attempts as usize),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }

        Ok(Self {
            port,
            db_path,
            queue_capacity,
            log_dir,
            agent: AgentConfig {
                max_attempts,
                max_in_flight,
                config_retry_delay: Duration::from_millis(retry_ms),
                ..defaults.agent
            },
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_env_empty() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.agent.max_attempts, 3);
        assert_eq!(config.agent.config_retry_delay, Duration::from_millis(100));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn overrides_from_env() {
        let config = AppConfig::from_lookup(lookup(&[
            ("CALCFLOW_PORT", "9090"),
            ("CALCFLOW_DB_PATH", "/tmp/x.db"),
            ("CALCFLOW_QUEUE_CAPACITY", "7"),
            ("CALCFLOW_MAX_IN_FLIGHT", "2"),
            ("CALCFLOW_MAX_ATTEMPTS", "5"),
            ("CALCFLOW_CONFIG_RETRY_MS", "10"),
            ("CALCFLOW_LOG_DIR", "/var/log/calcflow"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.queue_capacity, 7);
        assert_eq!(config.agent.max_in_flight, 2);
        assert_eq!(config.agent.max_attempts, 5);
        assert_eq!(config.agent.config_retry_delay, Duration::from_millis(10));
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/calcflow")));
    }

    #[test]
    fn blank_values_keep_defaults() {
        let config = AppConfig::from_lookup(lookup(&[("CALCFLOW_PORT", "  ")])).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("CALCFLOW_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CALCFLOW_PORT"));

        let err =
            AppConfig::from_lookup(lookup(&[("CALCFLOW_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }
}
