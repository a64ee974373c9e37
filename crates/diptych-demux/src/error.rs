use thiserror::Error;

pub type DemuxResult<T> = Result<T, DemuxError>;

#[derive(Debug, Error)]
pub enum DemuxError {
    /// Container bytes that do not parse; tears down the affected track.
    #[error("malformed container data: {0}")]
    Malformed(String),

    /// Structurally valid container with a sample entry we cannot map to
    /// a decoder configuration.
    #[error("unsupported sample entry: {0}")]
    UnsupportedEntry(String),
}

impl DemuxError {
    pub(crate) fn truncated(context: &str) -> Self {
        Self::Malformed(format!("truncated {context}"))
    }
}
