//! Configuration management for wanpulse.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::dialer::DialerConfig;
use crate::error::{Error, Result};
use crate::probe::{ProbeServer, SweepPolicy, TcpProberConfig};
use crate::scheduler::DEFAULT_SWEEP_CEILING;
use crate::types::{parse_dscp, PathSpec};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Egress paths to measure.
    #[serde(default, rename = "path")]
    pub paths: Vec<PathConfig>,

    /// Probe configuration (servers, sample counts, transfer windows).
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Dialer tuning.
    #[serde(default)]
    pub dialer: DialerConfig,

    /// Scheduled sweep configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Metrics exporter configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for path in &self.paths {
            let spec = path.to_spec()?;
            spec.validate()?;
            if !seen.insert(spec.name.clone()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate path name: {}",
                    spec.name
                )));
            }
        }

        if self.paths.iter().any(|p| p.enabled) && self.probe.servers.is_empty() {
            return Err(Error::InvalidConfig(
                "paths are enabled but no probe servers are configured".into(),
            ));
        }

        if self.scheduler.enabled {
            crate::scheduler::validate_expression(&self.scheduler.schedule)?;
        }

        Ok(())
    }

    /// Enabled paths as immutable specs, in configuration order.
    pub fn path_specs(&self) -> Result<Vec<PathSpec>> {
        self.paths.iter().map(PathConfig::to_spec).collect()
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("io", "wanpulse", "wanpulse").map_or_else(
            || PathBuf::from("wanpulse.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Create example configuration.
    pub fn example() -> Self {
        Self {
            paths: vec![
                PathConfig {
                    name: "wan1".into(),
                    source: Some("192.168.1.10".into()),
                    dscp: 0,
                    enabled: true,
                },
                PathConfig {
                    name: "wan2-voice".into(),
                    source: Some("192.168.2.10".into()),
                    dscp: crate::types::dscp::EF,
                    enabled: true,
                },
            ],
            probe: ProbeConfig {
                prober: TcpProberConfig {
                    servers: vec![ProbeServer {
                        host: "speedtest.example.net:8080".into(),
                        name: "example".into(),
                        id: String::new(),
                        country: String::new(),
                    }],
                    ..Default::default()
                },
                ..Default::default()
            },
            scheduler: SchedulerConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// One configured egress path. DSCP accepts a class name ("EF", "AF41") or a
/// numeric value 0-63.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub name: String,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default, deserialize_with = "de_dscp")]
    pub dscp: u8,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl PathConfig {
    /// Convert to the immutable spec handed to the core.
    pub fn to_spec(&self) -> Result<PathSpec> {
        let spec = PathSpec {
            name: self.name.clone(),
            source: self.source.clone().filter(|s| !s.is_empty()),
            dscp: self.dscp,
            enabled: self.enabled,
        };
        spec.validate()?;
        Ok(spec)
    }
}

fn default_true() -> bool {
    true
}

fn de_dscp<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DscpField {
        Num(u8),
        Name(String),
    }

    match DscpField::deserialize(deserializer)? {
        DscpField::Num(n) => Ok(n),
        DscpField::Name(s) => parse_dscp(&s).map_err(serde::de::Error::custom),
    }
}

/// Probe configuration: the built-in prober's knobs plus the sweep policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Run paths concurrently instead of one at a time. Concurrent probes on
    /// a shared link interfere with each other's throughput numbers.
    #[serde(default)]
    pub parallel: bool,

    #[serde(flatten)]
    pub prober: TcpProberConfig,
}

impl ProbeConfig {
    pub fn policy(&self) -> SweepPolicy {
        if self.parallel {
            SweepPolicy::Parallel
        } else {
            SweepPolicy::Serial
        }
    }
}

impl std::ops::Deref for ProbeConfig {
    type Target = TcpProberConfig;

    fn deref(&self) -> &Self::Target {
        &self.prober
    }
}

/// Scheduled sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether scheduled sweeps run automatically.
    #[serde(default)]
    pub enabled: bool,

    /// Cron expression (5- or 6-field; e.g. "*/30 * * * *").
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Upper bound on one sweep's duration before it is abandoned.
    #[serde(default = "default_sweep_ceiling", with = "humantime_serde")]
    pub sweep_ceiling: Duration,
}

fn default_schedule() -> String {
    // Every hour
    "0 * * * *".into()
}
fn default_sweep_ceiling() -> Duration {
    DEFAULT_SWEEP_CEILING
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: default_schedule(),
            sweep_ceiling: default_sweep_ceiling(),
        }
    }
}

/// Metrics exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP bind address for `/metrics`, `/health`, `/status`.
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

fn default_metrics_listen() -> SocketAddr {
    "127.0.0.1:9090".parse().expect("valid literal")
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: true,
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(config.color))
            .try_init()
            .map_err(|e| Error::Config(format!("failed to init logging: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [[path]]
            name = "wan1"
            source = "10.0.0.2"
            dscp = "EF"

            [[path]]
            name = "wan2"
            enabled = false

            [probe]
            servers = [{ host = "test.example:8080" }]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        let specs = config.path_specs().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].dscp, 46);
        assert!(!specs[1].enabled);
    }

    #[test]
    fn test_numeric_dscp() {
        let toml = r#"
            [[path]]
            name = "wan1"
            dscp = 34

            [probe]
            servers = [{ host = "test.example:8080" }]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.path_specs().unwrap()[0].dscp, 34);
    }

    #[test]
    fn test_duplicate_path_names_rejected() {
        let toml = r#"
            [[path]]
            name = "wan1"

            [[path]]
            name = "wan1"

            [probe]
            servers = [{ host = "test.example:8080" }]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_paths_require_servers() {
        let toml = r#"
            [[path]]
            name = "wan1"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_schedule_rejected() {
        let toml = r#"
            [scheduler]
            enabled = true
            schedule = "not a schedule"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_example_round_trips() {
        let example = Config::example();
        example.validate().unwrap();
        let serialized = toml::to_string_pretty(&example).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        parsed.validate().unwrap();
    }
}
