#![forbid(unsafe_code)]

//! diptych: a dual-source picture-in-picture streaming pipeline.
//!
//! Two independent adaptive-bitrate sources are fetched, demuxed and
//! decoded concurrently, composited into one picture-in-picture frame
//! at 30 fps, re-encoded (VP8 + Opus) and re-muxed into streaming WebM
//! for an MSE-style playback sink. The audio track follows one source
//! at a time and can be switched seamlessly mid-play.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use diptych::{Player, PlayerConfig};
//!
//! let config = PlayerConfig::new(manifest_source, engine, sink);
//! let mut player = Player::new(config);
//! player.load(&url_a, &url_b).await?;
//!
//! let mut events = player.events();
//! player.set_swapped(true).await; // B fills the canvas, A insets
//! player.set_active(diptych::SourceId::B).await;
//! // …
//! player.destroy().await;
//! ```

mod config;
mod error;
mod player;

pub use config::PlayerConfig;
pub use diptych_core::{FaultKind, GeometryCell, PipGeometry, SourceId, TrackKind};
pub use diptych_events::{Event, EventBus, PipelineEvent, PlayerEvent, SourceEvent};
pub use error::{PlayerError, PlayerResult};
pub use player::Player;
