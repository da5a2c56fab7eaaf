use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    CorruptedMetadata(String),
    NotFound,
    InvalidSnapshotFormat(String),
    InvalidHeight(u64),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::CorruptedMetadata(msg) => write!(f, "Corrupted metadata: {}", msg),
            Error::NotFound => write!(f, "Key not found"),
            Error::InvalidSnapshotFormat(msg) => write!(f, "Invalid snapshot format: {}", msg),
            Error::InvalidHeight(h) => write!(f, "Height {} is not a part boundary", h),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
