//! Coherence daemon library
//!
//! Pieces the `coherenced` binary is assembled from:
//! - Layered configuration (defaults, file, environment)
//! - Simulated metric source
//! - Daemon error type

pub mod config;
pub mod error;
pub mod source;

pub use config::{DaemonConfig, LoggingConfig, SimulationConfig};
pub use error::{DaemonError, DaemonResult};
pub use source::SimulatedSource;
