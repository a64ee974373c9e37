use thiserror::Error;

pub type MuxResult<T> = Result<T, MuxError>;

#[derive(Debug, Error)]
pub enum MuxError {
    /// A chunk stepped backwards in time. Unreachable through the audio
    /// emission grid by construction; recreate the muxer if observed.
    #[error("timestamp out of order: got {got_ms} ms after {last_ms} ms")]
    OutOfOrder { last_ms: i64, got_ms: i64 },

    /// Write after `finalize`.
    #[error("muxer already finalized")]
    Finalized,
}
