#![forbid(unsafe_code)]

//! Unified event surface for the diptych pipeline.

mod bus;
mod event;
mod pipeline;
mod player;
mod source;

pub use bus::EventBus;
pub use event::Event;
pub use pipeline::PipelineEvent;
pub use player::PlayerEvent;
pub use source::SourceEvent;
