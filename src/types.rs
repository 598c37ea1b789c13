//! Shared data types: path specifications, probe outcomes, DSCP classes.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum DSCP value (6-bit Differentiated Services Code Point).
pub const MAX_DSCP: u8 = 63;

/// Well-known DSCP classes.
pub mod dscp {
    /// Best Effort (default).
    pub const BE: u8 = 0;
    /// Expedited Forwarding (voice).
    pub const EF: u8 = 46;
    /// Assured Forwarding class 1, low drop.
    pub const AF11: u8 = 10;
    pub const AF12: u8 = 12;
    pub const AF13: u8 = 14;
    pub const AF21: u8 = 18;
    pub const AF22: u8 = 20;
    pub const AF23: u8 = 22;
    pub const AF31: u8 = 26;
    pub const AF32: u8 = 28;
    pub const AF33: u8 = 30;
    pub const AF41: u8 = 34;
    pub const AF42: u8 = 36;
    pub const AF43: u8 = 38;
    /// Class Selector 1 (scavenger).
    pub const CS1: u8 = 8;
    pub const CS2: u8 = 16;
    pub const CS3: u8 = 24;
    pub const CS4: u8 = 32;
    /// Class Selector 5 (signaling).
    pub const CS5: u8 = 40;
    /// Class Selector 6 (network control).
    pub const CS6: u8 = 48;
    pub const CS7: u8 = 56;
}

/// Human-readable name for a well-known DSCP value.
pub fn dscp_name(value: u8) -> Option<&'static str> {
    Some(match value {
        dscp::BE => "BE (Best Effort)",
        dscp::EF => "EF (Expedited Forwarding)",
        dscp::AF11 => "AF11",
        dscp::AF12 => "AF12",
        dscp::AF13 => "AF13",
        dscp::AF21 => "AF21",
        dscp::AF22 => "AF22",
        dscp::AF23 => "AF23",
        dscp::AF31 => "AF31",
        dscp::AF32 => "AF32",
        dscp::AF33 => "AF33",
        dscp::AF41 => "AF41",
        dscp::AF42 => "AF42",
        dscp::AF43 => "AF43",
        dscp::CS1 => "CS1 (Scavenger)",
        dscp::CS2 => "CS2",
        dscp::CS3 => "CS3",
        dscp::CS4 => "CS4",
        dscp::CS5 => "CS5 (Signaling)",
        dscp::CS6 => "CS6 (Network Control)",
        dscp::CS7 => "CS7",
        _ => return None,
    })
}

/// Parse a DSCP class given by name ("EF", "AF41", "CS5") or number.
pub fn parse_dscp(s: &str) -> Result<u8> {
    let upper = s.trim().to_ascii_uppercase();
    let value = match upper.as_str() {
        "BE" | "DEFAULT" => dscp::BE,
        "EF" => dscp::EF,
        "AF11" => dscp::AF11,
        "AF12" => dscp::AF12,
        "AF13" => dscp::AF13,
        "AF21" => dscp::AF21,
        "AF22" => dscp::AF22,
        "AF23" => dscp::AF23,
        "AF31" => dscp::AF31,
        "AF32" => dscp::AF32,
        "AF33" => dscp::AF33,
        "AF41" => dscp::AF41,
        "AF42" => dscp::AF42,
        "AF43" => dscp::AF43,
        "CS1" => dscp::CS1,
        "CS2" => dscp::CS2,
        "CS3" => dscp::CS3,
        "CS4" => dscp::CS4,
        "CS5" => dscp::CS5,
        "CS6" => dscp::CS6,
        "CS7" => dscp::CS7,
        _ => upper
            .parse::<u8>()
            .map_err(|_| Error::InvalidConfig(format!("unknown DSCP class: {s}")))?,
    };

    if value > MAX_DSCP {
        return Err(Error::InvalidQosClass(value));
    }
    Ok(value)
}

/// Static description of one egress path (WAN).
///
/// Constructed from configuration, immutable thereafter. Validation of the
/// name and address format happens at config load; the dialer re-checks the
/// fields it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSpec {
    /// Unique display name for this path.
    pub name: String,

    /// Local IP literal to bind to. `None` lets the OS choose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// DSCP class (0-63) applied to outbound packets. 0 means no marking.
    #[serde(default)]
    pub dscp: u8,

    /// Whether this path participates in sweeps.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PathSpec {
    /// Create an enabled path with OS-chosen source and no marking.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            dscp: 0,
            enabled: true,
        }
    }

    /// Set the source address literal.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the DSCP class.
    pub fn with_dscp(mut self, dscp: u8) -> Self {
        self.dscp = dscp;
        self
    }

    /// Parse the configured source address, if any.
    pub fn source_ip(&self) -> Result<Option<IpAddr>> {
        match self.source.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => s
                .parse::<IpAddr>()
                .map(Some)
                .map_err(|_| Error::InvalidSourceAddress(s.to_string())),
        }
    }

    /// Validate the fields the dialer depends on.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("path name must not be empty".into()));
        }
        if self.dscp > MAX_DSCP {
            return Err(Error::InvalidQosClass(self.dscp));
        }
        self.source_ip()?;
        Ok(())
    }
}

/// One candidate measurement server, as reported by a prober's discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCandidate {
    /// Opaque server identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Endpoint in `host:port` form.
    pub host: String,
    /// Country or location hint, if known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country: String,
    /// Discovery ranking metric (connect RTT in milliseconds; lower is better).
    #[serde(default)]
    pub rank_ms: f64,
}

/// Per-path measurement result.
///
/// Exactly one of "all numeric fields populated" or "`error` non-empty"
/// holds; a failed probe zeroes the numbers and fills the description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Outcome {
    /// Path name this outcome belongs to.
    pub path: String,

    /// Source address actually requested for the probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// DSCP class requested for the probe.
    pub dscp: u8,

    /// Selected measurement server, when discovery succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerCandidate>,

    /// Round-trip latency in milliseconds.
    pub latency_ms: f64,
    /// Latency jitter in milliseconds.
    pub jitter_ms: f64,
    /// Download rate in Mbps.
    pub download_mbps: f64,
    /// Upload rate in Mbps.
    pub upload_mbps: f64,
    /// Packet loss percentage over the latency samples.
    pub packet_loss_pct: f64,

    /// Wall-clock start of the probe attempt.
    pub started_at: DateTime<Utc>,

    /// Elapsed duration of the attempt, success or failure.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,

    /// Failure description; empty on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    /// Create a failure outcome for a path, numeric fields zeroed.
    pub fn failure(spec: &PathSpec, started_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            path: spec.name.clone(),
            source: spec.source.clone(),
            dscp: spec.dscp,
            started_at,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Whether this outcome represents a failed probe.
    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// Render one table row for CLI output.
    pub fn format_table(&self) -> String {
        if let Some(ref err) = self.error {
            return format!("{:<20} | {:<10} | {}", self.path, "ERROR", err);
        }

        format!(
            "{:<20} | {:>8.2} ms | {:>10.2} Mbps | {:>10.2} Mbps | {}",
            self.path,
            self.latency_ms,
            self.download_mbps,
            self.upload_mbps,
            self.server.as_ref().map_or("-", |s| s.name.as_str()),
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref err) = self.error {
            return write!(f, "{}: ERROR - {err}", self.path);
        }
        write!(
            f,
            "{}: {:.2} ms / {:.2} Mbps down / {:.2} Mbps up",
            self.path, self.latency_ms, self.download_mbps, self.upload_mbps
        )
    }
}

/// Header line for table-formatted outcome output.
pub fn table_header() -> String {
    format!(
        "{:<20} | {:>11} | {:>15} | {:>15} | {}",
        "Path", "Latency", "Download", "Upload", "Server"
    )
}

/// Separator line for table-formatted outcome output.
pub fn table_separator() -> String {
    "-".repeat(88)
}

/// Aggregate helpers over one sweep's outcomes.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub avg_download_mbps: f64,
    pub avg_upload_mbps: f64,
    pub avg_latency_ms: f64,
}

impl SweepSummary {
    /// Summarize a sweep. Averages cover successful outcomes only.
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        let ok: Vec<&Outcome> = outcomes.iter().filter(|o| !o.is_error()).collect();
        let n = ok.len();
        let avg = |f: fn(&Outcome) -> f64| {
            if n == 0 {
                0.0
            } else {
                ok.iter().map(|o| f(o)).sum::<f64>() / n as f64
            }
        };

        Self {
            total: outcomes.len(),
            succeeded: n,
            failed: outcomes.len() - n,
            avg_download_mbps: avg(|o| o.download_mbps),
            avg_upload_mbps: avg(|o| o.upload_mbps),
            avg_latency_ms: avg(|o| o.latency_ms),
        }
    }
}

/// Schedule coordinator status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleState {
    /// Whether scheduling is enabled at all.
    pub enabled: bool,
    /// The cron expression driving fires.
    pub schedule: String,
    /// Whether the coordinator has been started.
    pub running: bool,
    /// Whether a sweep is currently in flight.
    pub sweep_in_flight: bool,
    /// Wall-clock time of the last fire, if any.
    pub last_run: Option<DateTime<Utc>>,
    /// Wall-clock time of the next fire, if scheduled.
    pub next_run: Option<DateTime<Utc>>,
}
