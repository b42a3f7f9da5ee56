use serde::Serialize;
use super::types::MalsiftError;

/// Failure category a caller can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCategory {
    /// Rejected synchronously at job or schedule creation.
    ConfigurationError,
    /// Confined to one target; recorded inside its raw result.
    TargetError,
    /// Fails the whole job.
    OrchestratorFault,
    /// Skips a device for one evaluation round.
    EvaluationError,
    /// Storage, container or network plumbing.
    InfrastructureError,
}

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub category: ErrorCategory,
    pub retryable: bool,
}

impl MalsiftError {
    /// Classify this error to determine its category and whether it can be retried.
    pub fn classify(&self) -> ErrorClassification {
        use ErrorCategory::*;
        let (error_type, category, retryable) = match self {
            MalsiftError::Config(_) => ("ConfigError", ConfigurationError, false),
            MalsiftError::InvalidTarget(_) => ("InvalidTargetError", ConfigurationError, false),
            MalsiftError::UnknownEngine(_) => ("UnknownEngineError", ConfigurationError, false),
            MalsiftError::UnsupportedScanKind(_) => ("UnsupportedScanKindError", ConfigurationError, false),
            MalsiftError::InvalidRateLimit(_) => ("InvalidRateLimitError", ConfigurationError, false),
            MalsiftError::NotFound(_) => ("NotFoundError", ConfigurationError, false),
            MalsiftError::InvalidState(_) => ("InvalidStateError", ConfigurationError, false),

            // Next scheduled run is the retry for target-level failures
            MalsiftError::Process(_) => ("ProcessError", TargetError, false),
            MalsiftError::Timeout(_) => ("TimeoutError", TargetError, false),

            MalsiftError::OrchestratorFault(_) => ("OrchestratorFault", OrchestratorFault, false),
            MalsiftError::Internal(_) => ("InternalError", OrchestratorFault, false),

            MalsiftError::Evaluation(_) => ("EvaluationError", EvaluationError, false),
            MalsiftError::Judge(_) => ("JudgeError", EvaluationError, true),

            MalsiftError::Container(_) => ("ContainerError", InfrastructureError, true),
            MalsiftError::Network(_) => ("NetworkError", InfrastructureError, true),
            MalsiftError::Database(_) => ("DatabaseError", InfrastructureError, true),
            MalsiftError::Io(_) => ("IoError", InfrastructureError, true),
            MalsiftError::Json(_) => ("JsonError", InfrastructureError, false),
            MalsiftError::Yaml(_) => ("YamlError", ConfigurationError, false),
            MalsiftError::Docker(_) => ("DockerError", InfrastructureError, true),
        };
        ErrorClassification { error_type, category, retryable }
    }
}
