//! swarm.toml configuration parser.
//!
//! Every field is optional; accessors resolve the built-in defaults so a
//! missing file and an empty file behave the same. Command-line flags are
//! applied on top by the binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ParseError};
use crate::host::DEFAULT_PORT_BASE;
use crate::strategy::Strategy;

pub const DEFAULT_CONTROL_PORT: u16 = 38080;
pub const DEFAULT_WATCH_PERIOD: Duration = Duration::from_millis(500);
pub const DEFAULT_SWEEP_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_METRIC_LABEL: &str = "Img/sec per /gpu:0";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmConfig {
    pub launch: Option<LaunchConfig>,
    pub sweep: Option<SweepConfig>,
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub port: Option<u16>,
    pub port_base: Option<u16>,
    pub watch_period: Option<String>,
    pub verbose: Option<bool>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub timeout: Option<String>,
    pub poll_interval: Option<String>,
    pub metric_label: Option<String>,
    pub strategies: Option<Vec<String>>,
    pub partitions: Option<Vec<Vec<usize>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub user: Option<String>,
    pub ssh_options: Option<Vec<String>>,
}

impl SwarmConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SwarmConfig = toml::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load `path` if given, otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// A config with every default written out.
    pub fn scaffold() -> Self {
        SwarmConfig {
            launch: Some(LaunchConfig {
                port: Some(DEFAULT_CONTROL_PORT),
                port_base: Some(DEFAULT_PORT_BASE),
                watch_period: Some("500ms".to_string()),
                verbose: Some(true),
                timeout: None,
            }),
            sweep: Some(SweepConfig {
                timeout: Some("90s".to_string()),
                poll_interval: Some("1s".to_string()),
                metric_label: Some(DEFAULT_METRIC_LABEL.to_string()),
                strategies: Some(default_strategies().iter().map(|s| s.to_string()).collect()),
                partitions: Some(default_partitions()),
            }),
            remote: Some(RemoteConfig {
                user: None,
                ssh_options: None,
            }),
        }
    }

    /// Check every string-typed value up front so bad config fails at load.
    pub fn validate(&self) -> Result<(), ParseError> {
        self.watch_period()?;
        self.launch_timeout()?;
        self.sweep_timeout()?;
        self.poll_interval()?;
        self.strategies()?;
        Ok(())
    }

    // ── [launch] ───────────────────────────────────────────────

    pub fn port(&self) -> u16 {
        self.launch
            .as_ref()
            .and_then(|l| l.port)
            .unwrap_or(DEFAULT_CONTROL_PORT)
    }

    pub fn port_base(&self) -> u16 {
        self.launch
            .as_ref()
            .and_then(|l| l.port_base)
            .unwrap_or(DEFAULT_PORT_BASE)
    }

    pub fn verbose(&self) -> bool {
        self.launch.as_ref().and_then(|l| l.verbose).unwrap_or(true)
    }

    pub fn watch_period(&self) -> Result<Duration, ParseError> {
        duration_or(
            self.launch.as_ref().and_then(|l| l.watch_period.as_deref()),
            DEFAULT_WATCH_PERIOD,
        )
    }

    /// Job timeout; `None` means run until the processes exit.
    pub fn launch_timeout(&self) -> Result<Option<Duration>, ParseError> {
        self.launch
            .as_ref()
            .and_then(|l| l.timeout.as_deref())
            .map(parse_duration)
            .transpose()
    }

    // ── [sweep] ────────────────────────────────────────────────

    pub fn sweep_timeout(&self) -> Result<Duration, ParseError> {
        duration_or(
            self.sweep.as_ref().and_then(|s| s.timeout.as_deref()),
            DEFAULT_SWEEP_TIMEOUT,
        )
    }

    pub fn poll_interval(&self) -> Result<Duration, ParseError> {
        duration_or(
            self.sweep.as_ref().and_then(|s| s.poll_interval.as_deref()),
            DEFAULT_POLL_INTERVAL,
        )
    }

    pub fn metric_label(&self) -> &str {
        self.sweep
            .as_ref()
            .and_then(|s| s.metric_label.as_deref())
            .unwrap_or(DEFAULT_METRIC_LABEL)
    }

    pub fn strategies(&self) -> Result<Vec<Strategy>, ParseError> {
        match self.sweep.as_ref().and_then(|s| s.strategies.as_ref()) {
            Some(names) => names.iter().map(|n| n.parse()).collect(),
            None => Ok(default_strategies()),
        }
    }

    pub fn partitions(&self) -> Vec<Vec<usize>> {
        self.sweep
            .as_ref()
            .and_then(|s| s.partitions.clone())
            .unwrap_or_else(default_partitions)
    }

    // ── [remote] ───────────────────────────────────────────────

    pub fn ssh_user(&self) -> Option<&str> {
        self.remote.as_ref().and_then(|r| r.user.as_deref())
    }

    pub fn ssh_options(&self) -> Vec<String> {
        self.remote
            .as_ref()
            .and_then(|r| r.ssh_options.clone())
            .unwrap_or_default()
    }
}

pub fn default_strategies() -> Vec<Strategy> {
    vec![
        Strategy::Simple,
        Strategy::Ring,
        Strategy::Clique,
        Strategy::Tree,
    ]
}

pub fn default_partitions() -> Vec<Vec<usize>> {
    vec![
        vec![1],
        vec![2],
        vec![3],
        vec![4],
        vec![1, 3],
        vec![2, 2],
        vec![3, 3],
        vec![4, 4],
    ]
}

/// Parse `"500ms"`, `"5s"`, `"2m"`, `"1h"` or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ParseError> {
    let t = s.trim();
    let invalid = || ParseError::InvalidDuration(s.to_string());

    let parsed = if let Some(ms) = t.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = t.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = t.strip_suffix('m') {
        scaled_secs(mins, 60)
    } else if let Some(hours) = t.strip_suffix('h') {
        scaled_secs(hours, 3600)
    } else {
        t.parse::<u64>().ok().map(Duration::from_secs)
    };

    parsed.ok_or_else(invalid)
}

fn scaled_secs(value: &str, unit: u64) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|v| v.checked_mul(unit))
        .map(Duration::from_secs)
}

fn duration_or(value: Option<&str>, default: Duration) -> Result<Duration, ParseError> {
    value.map(parse_duration).unwrap_or(Ok(default))
}
