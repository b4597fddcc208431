//! Configuration system: TOML file + env var overrides + reference defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{BankerError, Result};
use crate::ledger::ResourceLedger;
use crate::protocol::ProtocolMode;
use crate::scenario::script::{Step, reference_scripts, running_holding};

/// Full simulator configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub resources: ResourcesConfig,
    pub tasks: Vec<TaskConfig>,
    pub protocol: ProtocolConfig,
    pub watchdog: WatchdogConfig,
    pub logging: LoggingConfig,
}

/// Resource kinds and how many units of each exist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResourcesConfig {
    pub labels: Vec<String>,
    pub total: Vec<u32>,
}

/// One worker: its declared maximum claim and the script it runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskConfig {
    pub max_demand: Vec<u32>,
    pub script: Vec<Step>,
}

/// Arbiter behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProtocolConfig {
    pub mode: ProtocolMode,
    /// Bound on the first wait of a blocked request, measured from entry.
    pub first_wait_timeout_ms: u64,
}

/// Deadlock watchdog polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchdogConfig {
    pub poll_interval_ms: u64,
}

/// Where status lines go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Print human status lines to stdout.
    pub console: bool,
    /// Optional JSONL activity log.
    pub jsonl_path: Option<PathBuf>,
    /// Dump the full ledger after every grant and release, not only at
    /// start and end.
    pub state_dumps: bool,
}

impl Default for Config {
    fn default() -> Self {
        let max_demand = [[1, 1, 1, 2], [3, 3, 0, 0], [3, 0, 0, 0], [0, 3, 3, 0]];
        let tasks = max_demand
            .iter()
            .zip(reference_scripts())
            .map(|(row, script)| TaskConfig {
                max_demand: row.to_vec(),
                script,
            })
            .collect();
        Self {
            resources: ResourcesConfig::default(),
            tasks,
            protocol: ProtocolConfig::default(),
            watchdog: WatchdogConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            labels: ["A", "B", "C", "D"].map(String::from).to_vec(),
            total: vec![3, 3, 3, 3],
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            mode: ProtocolMode::Both,
            first_wait_timeout_ms: 2_000,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console: true,
            jsonl_path: None,
            state_dumps: false,
        }
    }
}

impl Config {
    /// Default configuration path: `$HOME/.config/banker/config.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        let home = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        home.join(".config").join("banker").join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf)
                .map_err(|source| BankerError::io(&path_buf, source))?;
            Self::from_toml_str(&raw)?
        } else if is_explicit_path {
            return Err(BankerError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without env overrides or validation.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Pretty TOML rendering of the effective config.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BankerError::Serialization {
            context: "toml",
            details: e.to_string(),
        })
    }

    /// Deterministic hash of the effective config for the run-start log line.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Max-demand rows in task order.
    #[must_use]
    pub fn max_demand_matrix(&self) -> Vec<Vec<u32>> {
        self.tasks.iter().map(|t| t.max_demand.clone()).collect()
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(env_var)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("BANKER_PROTOCOL_MODE") {
            self.protocol.mode = raw.parse().map_err(|details: String| {
                BankerError::ConfigParse {
                    context: "env",
                    details: format!("BANKER_PROTOCOL_MODE={raw:?}: {details}"),
                }
            })?;
        }

        if let Some(raw) = lookup("BANKER_PROTOCOL_FIRST_WAIT_TIMEOUT_MS") {
            self.protocol.first_wait_timeout_ms =
                parse_env_u64("BANKER_PROTOCOL_FIRST_WAIT_TIMEOUT_MS", &raw)?;
        }

        if let Some(raw) = lookup("BANKER_WATCHDOG_POLL_INTERVAL_MS") {
            self.watchdog.poll_interval_ms =
                parse_env_u64("BANKER_WATCHDOG_POLL_INTERVAL_MS", &raw)?;
        }

        if let Some(raw) = lookup("BANKER_LOGGING_JSONL_PATH") {
            self.logging.jsonl_path = Some(PathBuf::from(raw));
        }

        if let Some(raw) = lookup("BANKER_LOGGING_CONSOLE") {
            self.logging.console = parse_env_bool("BANKER_LOGGING_CONSOLE", &raw)?;
        }

        if let Some(raw) = lookup("BANKER_LOGGING_STATE_DUMPS") {
            self.logging.state_dumps = parse_env_bool("BANKER_LOGGING_STATE_DUMPS", &raw)?;
        }

        Ok(())
    }

    /// Check the config describes a ledger that can be built and scripts
    /// that stay inside their declared claims.
    pub fn validate(&self) -> Result<()> {
        ResourceLedger::from_config(self)?;
        self.validate_scripts()?;

        if self.protocol.first_wait_timeout_ms == 0 {
            return Err(BankerError::InvalidConfig {
                details: "protocol.first_wait_timeout_ms must be > 0".to_string(),
            });
        }
        if self.watchdog.poll_interval_ms == 0 {
            return Err(BankerError::InvalidConfig {
                details: "watchdog.poll_interval_ms must be > 0".to_string(),
            });
        }
        if let Some(path) = &self.logging.jsonl_path
            && path.as_os_str().is_empty()
        {
            return Err(BankerError::InvalidConfig {
                details: "logging.jsonl_path must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn validate_scripts(&self) -> Result<()> {
        let labels = &self.resources.labels;
        for (t, task) in self.tasks.iter().enumerate() {
            let name = format!("T{}", t + 1);
            for (s, step) in task.script.iter().enumerate() {
                if let Some(label) = step.resource()
                    && !labels.iter().any(|known| known == label)
                {
                    return Err(BankerError::InvalidConfig {
                        details: format!("{name} step {}: unknown resource {label:?}", s + 1),
                    });
                }
            }

            for (label, &max) in labels.iter().zip(&task.max_demand) {
                for (s, held) in running_holding(&task.script, label) {
                    let step = &task.script[s];
                    if held > i64::from(max) {
                        return Err(BankerError::InvalidConfig {
                            details: format!(
                                "{name} step {}: {step} would hold {held} of {label}, max_demand is {max}",
                                s + 1
                            ),
                        });
                    }
                    if held < 0 {
                        return Err(BankerError::InvalidConfig {
                            details: format!(
                                "{name} step {}: {step} releases more {label} than held",
                                s + 1
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|error| BankerError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim()
        .parse::<bool>()
        .map_err(|error| BankerError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
