#![forbid(unsafe_code)]

//! Codec box interfaces for the diptych pipeline.
//!
//! The codec engines themselves are external collaborators: configure,
//! feed, poll. This crate pins down those seams, the ownership model for
//! raw media frames, and ships a deterministic software engine for tests
//! plus a Symphonia-backed AAC decoder for real audio.

mod chunk;
mod config;
mod error;
mod frame;
mod traits;

pub mod mock;
#[cfg(feature = "opus-encode")]
pub mod opus;
#[cfg(feature = "aac-symphonia")]
pub mod symphonia_aac;

pub use chunk::EncodedChunk;
pub use config::{
    AudioDecoderConfig, AudioEncoderConfig, VideoDecoderConfig, VideoEncoderConfig,
};
pub use error::{CodecError, CodecResult};
pub use frame::{FrameLot, PlanarPcm, RawAudioFrame, RawVideoFrame};
pub use traits::{
    AudioDecoder, AudioEncoder, CodecEngine, Rect, Surface, VideoDecoder, VideoEncoder,
};
