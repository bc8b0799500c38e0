use thiserror::Error;

#[derive(Error, Debug)]
pub enum PsorError {
    #[error("Malformed playbook: {0}")]
    MalformedPlan(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No playbook routed for alert: {0}")]
    UnknownAlert(String),

    #[error("User cancelled")]
    UserCancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PsorError>;
