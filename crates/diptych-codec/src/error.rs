use thiserror::Error;

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CodecError {
    /// The engine rejected the configuration.
    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    /// Fed before a successful `configure`.
    #[error("codec not configured")]
    NotConfigured,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),
}
