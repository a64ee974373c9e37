#![forbid(unsafe_code)]

//! The 30 fps compositor and audio switch-over core.
//!
//! A single task owns all compositing state: per-source raw frame
//! queues, the off-screen surface, both re-encoders, both muxers, the
//! per-source audio rings and the active-audio grid. Producers feed it
//! through bounded queues; it feeds the sink feeders the same way.

mod compositor;
mod ring;

pub use compositor::{
    Compositor, CompositorCommand, CompositorConfig, CompositorHandle, SourceFeed,
};
pub use ring::AudioRing;
