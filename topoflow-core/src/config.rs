use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

const ENV_APPLICATION_ID: &str = "TOPOFLOW_APPLICATION_ID";
const ENV_STATE_DIR: &str = "TOPOFLOW_STATE_DIR";
const ENV_OFFSET_RESET_BACKOFF_MS: &str = "TOPOFLOW_OFFSET_RESET_BACKOFF_MS";
const ENV_OFFSET_RESET_TIMEOUT_MS: &str = "TOPOFLOW_OFFSET_RESET_TIMEOUT_MS";
/// Every variable with this prefix becomes an application config inherited by all topologies,
/// e.g. `TOPOFLOW_APP_CONFIG_COMMIT_INTERVAL_MS=100` becomes `commit.interval.ms=100`.
const ENV_APP_CONFIG_PREFIX: &str = "TOPOFLOW_APP_CONFIG_";

const DEFAULT_STATE_DIR: &str = "/tmp/topoflow";
const DEFAULT_OFFSET_RESET_BACKOFF_MS: u64 = 100;

/// Configuration of a node hosting named topologies.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Identity of the application. Doubles as the consumer group id whose offsets are reset.
    pub application_id: String,
    /// Root of the local state. Each application gets its own sub-directory.
    pub state_dir: PathBuf,
    /// Delay between offset deletion attempts while the group is still subscribed.
    pub offset_reset_backoff: Duration,
    /// Upper bound on the whole offset reset. `None` retries until success or shutdown.
    pub offset_reset_timeout: Option<Duration>,
    /// Configs every topology inherits unless its builder overrides them.
    pub application_configs: HashMap<String, String>,
}

impl NodeConfig {
    pub fn new(application_id: impl Into<String>) -> Self {
        NodeConfig {
            application_id: application_id.into(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            offset_reset_backoff: Duration::from_millis(DEFAULT_OFFSET_RESET_BACKOFF_MS),
            offset_reset_timeout: None,
            application_configs: HashMap::new(),
        }
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    pub fn load(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env_vars: HashMap<String, String> = env_vars
            .into_iter()
            .map(|(key, val)| (key.into(), val.into()))
            .filter(|(key, _)| key.starts_with("TOPOFLOW_"))
            .collect();
        env_vars.try_into()
    }
}

fn parse_millis(env_vars: &HashMap<String, String>, var: &str) -> Result<Option<Duration>> {
    env_vars
        .get(var)
        .map(|val| {
            val.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| Error::Config(format!("Invalid value {val:?} for {var}: {e}")))
        })
        .transpose()
}

impl TryFrom<HashMap<String, String>> for NodeConfig {
    type Error = Error;

    fn try_from(env_vars: HashMap<String, String>) -> Result<Self> {
        let application_id = env_vars
            .get(ENV_APPLICATION_ID)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!("Environment variable {ENV_APPLICATION_ID} is not set"))
            })?
            .to_string();

        let mut config = NodeConfig::new(application_id);

        if let Some(state_dir) = env_vars.get(ENV_STATE_DIR) {
            config.state_dir = PathBuf::from(state_dir);
        }

        if let Some(backoff) = parse_millis(&env_vars, ENV_OFFSET_RESET_BACKOFF_MS)? {
            if backoff.is_zero() {
                return Err(Error::Config(format!(
                    "{ENV_OFFSET_RESET_BACKOFF_MS} must be greater than zero"
                )));
            }
            config.offset_reset_backoff = backoff;
        }

        config.offset_reset_timeout = parse_millis(&env_vars, ENV_OFFSET_RESET_TIMEOUT_MS)?;

        config.application_configs = env_vars
            .iter()
            .filter_map(|(key, val)| {
                key.strip_prefix(ENV_APP_CONFIG_PREFIX)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_lowercase().replace('_', "."), val.clone()))
            })
            .collect();

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config: NodeConfig = env(&[(ENV_APPLICATION_ID, "word-count")])
            .try_into()
            .unwrap();
        assert_eq!(config.application_id, "word-count");
        assert_eq!(config.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
        assert_eq!(config.offset_reset_backoff, Duration::from_millis(100));
        assert_eq!(config.offset_reset_timeout, None);
        assert!(config.application_configs.is_empty());
    }

    #[test]
    fn test_missing_application_id() {
        let result = NodeConfig::try_from(env(&[(ENV_STATE_DIR, "/var/lib/topoflow")]));
        assert!(matches!(result, Err(Error::Config(_))));

        let result = NodeConfig::try_from(env(&[(ENV_APPLICATION_ID, "  ")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_overrides() {
        let config = NodeConfig::load([
            (ENV_APPLICATION_ID, "word-count"),
            (ENV_STATE_DIR, "/var/lib/topoflow"),
            (ENV_OFFSET_RESET_BACKOFF_MS, "250"),
            (ENV_OFFSET_RESET_TIMEOUT_MS, "60000"),
            ("TOPOFLOW_APP_CONFIG_COMMIT_INTERVAL_MS", "100"),
            ("HOME", "/root"),
        ])
        .unwrap();

        assert_eq!(config.state_dir, PathBuf::from("/var/lib/topoflow"));
        assert_eq!(config.offset_reset_backoff, Duration::from_millis(250));
        assert_eq!(config.offset_reset_timeout, Some(Duration::from_secs(60)));
        assert_eq!(
            config.application_configs.get("commit.interval.ms"),
            Some(&"100".to_string())
        );
        assert_eq!(config.application_configs.len(), 1);
    }

    #[test]
    fn test_invalid_durations() {
        let result = NodeConfig::load([
            (ENV_APPLICATION_ID, "word-count"),
            (ENV_OFFSET_RESET_BACKOFF_MS, "soon"),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));

        let result = NodeConfig::load([
            (ENV_APPLICATION_ID, "word-count"),
            (ENV_OFFSET_RESET_BACKOFF_MS, "0"),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
