//! Probing: the measurement trait, the built-in TCP prober, the per-path
//! runner, and the multi-path sweep orchestrator.

mod builtin;
mod prober;
mod runner;
mod sweep;

pub use builtin::{ProbeServer, TcpProber, TcpProberConfig};
pub use prober::{LatencyStats, Prober};
pub use runner::ProbeRunner;
pub use sweep::{SweepConfig, SweepOrchestrator, SweepPolicy};
