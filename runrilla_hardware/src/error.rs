use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("cannot open serial port {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("serial error: {0}")]
    Serial(String),
    #[error("malformed frame: {0}")]
    Frame(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
