use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No database attached to device {0}")]
    NoDatabase(String),

    #[error("Invalid device name '{0}'")]
    InvalidName(String),

    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Unknown builtin command '{0}'")]
    UnknownBuiltin(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
