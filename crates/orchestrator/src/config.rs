use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

pub const CONFIG_FILE: &str = "phasekit.toml";

pub const DEFAULT_MAX_READY_TO_END_ITERATIONS: u32 = 20;

const ENV_PHASE_TRACE: &str = "PHASEKIT_PHASE_TRACE";
const ENV_LEGACY_RUN: &str = "PHASEKIT_LEGACY_RUN";
const ENV_MAX_READY_TO_END: &str = "PHASEKIT_MAX_READY_TO_END";

/// Per-run settings for the phasing engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Upper bound on ready-to-end rounds for one task phase activation.
    pub max_ready_to_end_iterations: u32,
    /// Log every state transition at info level instead of trace.
    pub phase_trace: bool,
    /// Keep the task phase named `run` open until a raise/drop cycle completes,
    /// even when nothing objected.
    pub legacy_run_semantics: bool,
    /// Log every objection raise and drop.
    pub trace_objections: bool,
    /// Milliseconds the top objection total must stay at zero before "all dropped".
    pub drain_time_ms: u64,
    /// Watchdog limit in simulated milliseconds, enforced by the caller of `run_phases`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_ready_to_end_iterations: DEFAULT_MAX_READY_TO_END_ITERATIONS,
            phase_trace: false,
            legacy_run_semantics: false,
            trace_objections: false,
            drain_time_ms: 0,
            timeout_ms: None,
        }
    }
}

impl RunConfig {
    pub fn with_max_ready_to_end_iterations(mut self, max: u32) -> Self {
        self.max_ready_to_end_iterations = max;
        self
    }

    pub fn with_phase_trace(mut self, enabled: bool) -> Self {
        self.phase_trace = enabled;
        self
    }

    pub fn with_legacy_run_semantics(mut self, enabled: bool) -> Self {
        self.legacy_run_semantics = enabled;
        self
    }

    pub fn with_trace_objections(mut self, enabled: bool) -> Self {
        self.trace_objections = enabled;
        self
    }

    pub fn with_drain_time(mut self, drain: Duration) -> Self {
        self.drain_time_ms = u64::try_from(drain.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn drain_time(&self) -> Duration {
        Duration::from_millis(self.drain_time_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| OrchestratorError::Config(e.to_string()))
    }

    /// Read config from a TOML file; a missing or malformed file yields defaults.
    pub async fn read(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Self::default();
        }

        match fs::read_to_string(path).await {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => {
                    debug!(path = %path.display(), "Config loaded successfully");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                Self::default()
            }
        }
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).await?;
            }
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| OrchestratorError::Config(e.to_string()))?;
        fs::write(path, content).await?;
        debug!(path = %path.display(), "Config saved successfully");

        Ok(())
    }

    /// Overlay the `PHASEKIT_*` environment variables.
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(enabled) = lookup(ENV_PHASE_TRACE).as_deref().and_then(parse_flag) {
            self.phase_trace = enabled;
        }
        if let Some(enabled) = lookup(ENV_LEGACY_RUN).as_deref().and_then(parse_flag) {
            self.legacy_run_semantics = enabled;
        }
        if let Some(raw) = lookup(ENV_MAX_READY_TO_END) {
            match raw.trim().parse() {
                Ok(max) => self.max_ready_to_end_iterations = max,
                Err(_) => warn!(value = %raw, "Ignoring non-numeric {}", ENV_MAX_READY_TO_END),
            }
        }
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = RunConfig::default();
        assert_eq!(config.max_ready_to_end_iterations, 20);
        assert!(!config.phase_trace);
        assert!(!config.legacy_run_semantics);
        assert_eq!(config.drain_time(), Duration::ZERO);
        assert!(config.timeout().is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RunConfig::from_toml_str("phase_trace = true\ndrain_time_ms = 50\n").unwrap();
        assert!(config.phase_trace);
        assert_eq!(config.drain_time(), Duration::from_millis(50));
        assert_eq!(config.max_ready_to_end_iterations, 20);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = RunConfig::from_toml_str("max_ready_to_end_iterations = \"many\"").unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[tokio::test]
    async fn test_config_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let config = RunConfig::read(&temp_dir.path().join(CONFIG_FILE)).await;
        assert_eq!(config, RunConfig::default());
    }

    #[tokio::test]
    async fn test_config_read_malformed_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "phase_trace = [").unwrap();
        assert_eq!(RunConfig::read(&path).await, RunConfig::default());
    }

    #[tokio::test]
    async fn test_config_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(CONFIG_FILE);

        let config = RunConfig::default()
            .with_max_ready_to_end_iterations(5)
            .with_legacy_run_semantics(true)
            .with_timeout(Duration::from_secs(3));
        config.write(&path).await.unwrap();

        let loaded = RunConfig::read(&path).await;
        assert_eq!(loaded, config);
        assert_eq!(loaded.timeout(), Some(Duration::from_millis(3000)));
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("PHASEKIT_PHASE_TRACE", "yes"),
            ("PHASEKIT_LEGACY_RUN", "0"),
            ("PHASEKIT_MAX_READY_TO_END", "7"),
        ]
        .into_iter()
        .collect();

        let config = RunConfig::default()
            .with_legacy_run_semantics(true)
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()));
        assert!(config.phase_trace);
        assert!(!config.legacy_run_semantics);
        assert_eq!(config.max_ready_to_end_iterations, 7);
    }

    #[test]
    fn test_env_overlay_ignores_garbage() {
        let config = RunConfig::default().apply_env_from(|key| match key {
            "PHASEKIT_PHASE_TRACE" => Some("maybe".to_string()),
            "PHASEKIT_MAX_READY_TO_END" => Some("lots".to_string()),
            _ => None,
        });
        assert_eq!(config, RunConfig::default());
    }
}
