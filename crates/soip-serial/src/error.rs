use thiserror::Error;

/// Failure modes for a local serial device.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no port is open")]
    NotOpen,

    #[error("unsupported configuration: {0}")]
    UnsupportedConfig(String),
}

pub type Result<T> = std::result::Result<T, SerialError>;
