mod autonomy;
mod heartbeat;
mod memory;
mod runtime;
mod tools;

pub use autonomy::*;
pub use heartbeat::*;
pub use memory::*;
pub use runtime::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Full runtime configuration. Loading it from a file is the host's job;
/// the core only defines the shape, defaults, and validation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub autonomy: AutonomyConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.memory.max_records == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "memory.max_records".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.memory.embedding.dimensions == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "memory.embedding.dimensions".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.autonomy.hourly_cap == 0 || self.autonomy.daily_cap == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "autonomy".into(),
                message: "hourly_cap and daily_cap must be greater than 0".into(),
            });
        }
        if let Some(qh) = &self.autonomy.quiet_hours {
            if qh.timezone.parse::<chrono_tz::Tz>().is_err() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "autonomy.quiet_hours.timezone".into(),
                    message: format!("unknown timezone \"{}\"", qh.timezone),
                });
            }
            if parse_hhmm(&qh.start).is_none() || parse_hhmm(&qh.end).is_none() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "autonomy.quiet_hours".into(),
                    message: "start/end must be HH:MM".into(),
                });
            }
        }

        if self.heartbeat.min_ms > self.heartbeat.max_ms {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "heartbeat".into(),
                message: "min_ms must not exceed max_ms".into(),
            });
        }
        if self.heartbeat.every_ms < self.heartbeat.min_ms
            || self.heartbeat.every_ms > self.heartbeat.max_ms
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "heartbeat.every_ms".into(),
                message: "outside [min_ms, max_ms]; it will be clamped".into(),
            });
        }

        // Destructive patterns must be valid regexes.
        for (i, pattern) in self.tools.denied_patterns.iter().enumerate() {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("tools.denied_patterns[{i}]"),
                    message: format!("invalid regex \"{pattern}\": {e}"),
                });
            }
        }

        if self.tools.allowed_exec_bins.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "tools.allowed_exec_bins".into(),
                message: "empty allowlist disables exec-class tools".into(),
            });
        }

        if self.runtime.max_user_messages == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "runtime.max_user_messages".into(),
                message: "must be greater than 0".into(),
            });
        }

        errors
    }
}

/// Parse "HH:MM" into minutes since midnight.
pub fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}
