use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("could not resolve balance address {0}")]
    Resolve(String),
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),
    #[error("connection refused by {0}")]
    Refused(String),
    #[error("connection closed by balance")]
    Closed,
    #[error("response line exceeded {0} bytes without terminator")]
    LineTooLong(usize),
    #[error("response is not ASCII text")]
    Encoding,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
