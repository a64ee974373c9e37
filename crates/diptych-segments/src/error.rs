use thiserror::Error;

pub type SegmentsResult<T> = Result<T, SegmentsError>;

#[derive(Debug, Error)]
pub enum SegmentsError {
    #[error("network error: {0}")]
    Net(#[from] diptych_net::NetError),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("producer channel closed")]
    ChannelClosed,
}
