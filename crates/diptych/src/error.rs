use thiserror::Error;

pub type PlayerResult<T> = Result<T, PlayerError>;

#[derive(Debug, Error)]
pub enum PlayerError {
    /// `load` on an already-loaded player.
    #[error("player already loaded")]
    AlreadyLoaded,

    #[error("manifest resolution failed: {0}")]
    Manifest(#[from] diptych_segments::SegmentsError),

    #[error("codec setup failed: {0}")]
    Codec(#[from] diptych_codec::CodecError),
}
