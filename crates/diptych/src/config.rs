use std::sync::Arc;

use diptych_codec::CodecEngine;
use diptych_net::NetOptions;
use diptych_segments::ManifestSource;
use diptych_sink::MediaSink;

/// Host-provided collaborators and knobs. The pipeline holds no global
/// state; everything external arrives here.
#[derive(Clone)]
pub struct PlayerConfig {
    pub manifest: Arc<dyn ManifestSource>,
    pub engine: Arc<dyn CodecEngine>,
    pub sink: Arc<dyn MediaSink>,
    pub net: NetOptions,
    /// Capacity of the events broadcast channel.
    pub event_capacity: usize,
}

impl PlayerConfig {
    #[must_use]
    pub fn new(
        manifest: Arc<dyn ManifestSource>,
        engine: Arc<dyn CodecEngine>,
        sink: Arc<dyn MediaSink>,
    ) -> Self {
        Self {
            manifest,
            engine,
            sink,
            net: NetOptions::default(),
            event_capacity: 128,
        }
    }

    /// Override network options.
    #[must_use]
    pub fn with_net(mut self, net: NetOptions) -> Self {
        self.net = net;
        self
    }

    /// Override the event channel capacity.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
