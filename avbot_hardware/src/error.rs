use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("serial port not found: {0}")]
    PortNotFound(String),
    #[error("serial link disconnected")]
    Disconnected,
    #[error("serial error: {0}")]
    Serial(String),
    #[error("camera timeout")]
    Timeout,
    #[error("unknown camera source: {0}")]
    UnknownCamera(String),
    #[error("camera stream closed")]
    CameraClosed,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
