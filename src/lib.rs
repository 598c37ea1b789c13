//! # wanpulse
//!
//! Multi-WAN bandwidth and latency prober.
//!
//! wanpulse measures download/upload throughput, round-trip latency, jitter
//! and loss on every configured WAN egress path independently. Each probe's
//! sockets are bound to the path's source address and marked with its DSCP
//! class before connecting, so policy routing steers the traffic out the
//! right uplink and QoS treats it like the class of traffic it stands in for.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 CLI / Schedule Coordinator                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                     Sweep Orchestrator                          │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐         │
//! │  │  Path 1  │  │  Path 2  │  │  Path 3  │  │  Path N  │         │
//! │  │  (wan1)  │  │ (wan2-EF)│  │  (lte)   │  │   ...    │         │
//! │  └──────────┘  └──────────┘  └──────────┘  └──────────┘         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │              Probe Runner (one Outcome per path)                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │          Prober (discovery / latency / download / upload)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │          Bound Dialer (source bind + DSCP marking)              │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]      // Many functions can't be const due to trait bounds
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::cast_possible_truncation)]  // Intentional in rate math
#![allow(clippy::cast_sign_loss)]            // Rates and sample counts are positive
#![allow(clippy::cast_precision_loss)]       // Acceptable for stats
#![allow(clippy::suboptimal_flops)]          // Clarity over micro-optimization
#![allow(clippy::similar_names)]             // state/stats are intentionally named
#![allow(clippy::significant_drop_tightening)] // Lock ordering is intentional
#![allow(clippy::option_if_let_else)]        // More readable in context
#![allow(clippy::use_self)]                  // Explicit type names in matches
#![allow(clippy::redundant_pub_crate)]       // Explicit visibility
#![allow(clippy::too_many_lines)]            // Complete implementations
#![allow(clippy::future_not_send)]           // Async internals
#![allow(clippy::struct_excessive_bools)]    // Boolean config fields are appropriate
#![allow(clippy::return_self_not_must_use)]  // Builder methods don't need must_use
#![allow(clippy::ignored_unit_patterns)]     // Ok(_) vs Ok(()) is stylistic

pub mod cli;
pub mod config;
pub mod dialer;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod probe;
pub mod scheduler;
pub mod types;

pub use config::Config;
pub use dialer::{BoundDialer, DialerConfig};
pub use error::{Error, Result};
pub use probe::{ProbeRunner, Prober, SweepOrchestrator};
pub use scheduler::ScheduleCoordinator;
pub use types::{Outcome, PathSpec};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::dialer::{BoundDialer, DialerConfig};
    pub use crate::error::{Error, Result};
    pub use crate::probe::{
        ProbeRunner, Prober, SweepConfig, SweepOrchestrator, SweepPolicy, TcpProber,
    };
    pub use crate::scheduler::{ResultSink, ScheduleCoordinator};
    pub use crate::types::*;
}
