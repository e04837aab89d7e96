//! Error types for coherence-monitor.
//!
//! Rule evaluation, correction dispatch and orchestration failures all share
//! one enum so callers can match on a single type.

use thiserror::Error;

/// Errors that can occur while monitoring and correcting component health.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HealthError {
    /// A reading was NaN or infinite.
    #[error("non-finite reading for component {component}: {value}")]
    NonFiniteReading { component: String, value: f64 },

    /// Component has never been measured.
    #[error("component not found: {0}")]
    ComponentNotFound(String),

    /// Threshold name did not match any known threshold.
    #[error("unknown threshold: {0}")]
    UnknownThreshold(String),

    /// Component weight must be finite and non-negative.
    #[error("invalid weight for component {component}: {weight}")]
    InvalidWeight { component: String, weight: f64 },

    /// A detection rule could not be evaluated this cycle.
    #[error("rule {rule} failed to evaluate: {reason}")]
    RuleEvaluation { rule: &'static str, reason: String },

    /// Issue id is not in the registry.
    #[error("issue not found: {0}")]
    IssueNotFound(String),

    /// Another correction is already running against the component.
    #[error("correction already in flight for component {0}")]
    CorrectionInFlight(String),

    /// Active correction limit reached.
    #[error("concurrent correction limit reached ({0})")]
    ConcurrencyLimit(usize),

    /// Not enough correction energy left.
    #[error("insufficient correction energy: required {required:.3}, available {available:.3}")]
    InsufficientEnergy { required: f64, available: f64 },

    /// The remediator reported a failure.
    #[error("remediation failed for correction {correction_id}: {reason}")]
    RemediationFailed {
        correction_id: String,
        reason: String,
    },

    /// The remediator did not finish in time.
    #[error("remediation timed out for correction {correction_id} after {timeout_ms}ms")]
    RemediationTimeout {
        correction_id: String,
        timeout_ms: u64,
    },

    /// Metric source could not be read this cycle.
    #[error("metric source unavailable: {0}")]
    SourceUnavailable(String),

    /// Metric source is gone for good.
    #[error("metric source lost: {0}")]
    SourceLost(String),

    /// A background loop exited with an error.
    #[error("{task} loop failed: {reason}")]
    LoopFailed { task: &'static str, reason: String },

    /// Status was requested before the first start.
    #[error("monitor has never been started")]
    NeverStarted,

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HealthError {
    /// Whether this error takes the whole orchestrator down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HealthError::SourceLost(_))
    }

    /// Admission refusals are retried on a later correction cycle.
    pub fn is_deferral(&self) -> bool {
        matches!(
            self,
            HealthError::CorrectionInFlight(_)
                | HealthError::ConcurrencyLimit(_)
                | HealthError::InsufficientEnergy { .. }
        )
    }
}

/// Result type for health operations.
pub type HealthResult<T> = Result<T, HealthError>;
