use thiserror::Error;

pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Debug, Error, Clone)]
pub enum SinkError {
    /// The buffer refused the operation (e.g. appended while updating,
    /// quota exceeded).
    #[error("sink rejected operation: {0}")]
    Rejected(String),

    /// `play()` denied by host policy.
    #[error("playback denied: {0}")]
    PlaybackDenied(String),
}
