use thiserror::Error;

pub type BlksyncResult<T> = Result<T, BlksyncError>;

#[derive(Debug, Error)]
pub enum BlksyncError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
