use thiserror::Error;

#[derive(Debug, Error)]
pub enum MalsiftError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Unknown scan engine: {0}")]
    UnknownEngine(String),

    #[error("Unsupported scan kind: {0}")]
    UnsupportedScanKind(String),

    #[error("Invalid rate limit: {0}")]
    InvalidRateLimit(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Orchestrator fault: {0}")]
    OrchestratorFault(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Semantic judge error: {0}")]
    Judge(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
