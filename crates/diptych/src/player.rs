//! The public control surface and the pipeline wiring behind it.

use std::sync::Arc;

use diptych_compose::{Compositor, CompositorConfig, CompositorHandle, SourceFeed};
use diptych_core::{consts, GeometryCell, SourceId, TrackKind};
use diptych_events::{EventBus, PlayerEvent};
use diptych_net::HttpClient;
use diptych_segments::SegmentProducer;
use diptych_sink::SinkFeeder;
use diptych_stream::{StreamConfig, StreamPipeline};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::PlayerConfig,
    error::{PlayerError, PlayerResult},
};

/// Everything a live load owns.
struct Loaded {
    cancel: CancellationToken,
    compositor: CompositorHandle,
    geometry: Arc<GeometryCell>,
    joins: Vec<JoinHandle<()>>,
}

/// The dual-source player.
///
/// `load` wires and starts the whole pipeline tree; `destroy` tears it
/// down. Both are idempotent in the direction that matters: a second
/// `load` is rejected, a second `destroy` is a no-op.
pub struct Player {
    config: PlayerConfig,
    bus: EventBus,
    loaded: Option<Loaded>,
}

impl Player {
    #[must_use]
    pub fn new(config: PlayerConfig) -> Self {
        let bus = EventBus::new(config.event_capacity);
        Self {
            config,
            bus,
            loaded: None,
        }
    }

    /// Subscribe to the host event stream.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<diptych_events::Event> {
        self.bus.subscribe()
    }

    /// The PiP geometry cell shared with the host's input handler.
    #[must_use]
    pub fn geometry(&self) -> Option<Arc<GeometryCell>> {
        self.loaded.as_ref().map(|l| Arc::clone(&l.geometry))
    }

    /// Resolve both manifests and start the pipeline tree.
    pub async fn load(&mut self, url_a: &Url, url_b: &Url) -> PlayerResult<()> {
        if self.loaded.is_some() {
            return Err(PlayerError::AlreadyLoaded);
        }
        info!(%url_a, %url_b, "loading");

        let manifest_a = self.config.manifest.resolve(url_a).await?;
        let manifest_b = self.config.manifest.resolve(url_b).await?;

        let cancel = CancellationToken::new();
        let client = HttpClient::new(self.config.net.clone());
        let geometry = Arc::new(GeometryCell::default());
        let mut joins = Vec::new();

        // Sink feeders, one per output track.
        let (video_feeder, join) = SinkFeeder::spawn(
            TrackKind::Video,
            Arc::clone(&self.config.sink),
            self.bus.clone(),
            cancel.clone(),
        );
        joins.push(join);
        let (audio_feeder, join) = SinkFeeder::spawn(
            TrackKind::Audio,
            Arc::clone(&self.config.sink),
            self.bus.clone(),
            cancel.clone(),
        );
        joins.push(join);

        // Per-source producer → stream pipeline chains. Degradation
        // cancels one source's child token; the sibling source and the
        // compositor keep running.
        let mut feeds = Vec::new();
        for (source, manifest) in [(SourceId::A, manifest_a), (SourceId::B, manifest_b)] {
            let source_cancel = cancel.child_token();

            let producer = SegmentProducer::new(
                source,
                manifest,
                client.clone(),
                self.bus.clone(),
                source_cancel.clone(),
            );
            let handles = producer.spawn();
            joins.push(handles.join);

            let stream = StreamPipeline::spawn(
                StreamConfig {
                    source,
                    engine: Arc::clone(&self.config.engine),
                    bus: self.bus.clone(),
                    cancel: source_cancel,
                    fatal: cancel.clone(),
                },
                handles.video_rx,
                handles.audio_rx,
            );
            joins.push(stream.join);
            feeds.push(SourceFeed {
                video: stream.video_frames,
                audio: stream.audio_frames,
                eof: stream.eof,
            });
        }
        let feed_b = feeds.pop().expect("two sources wired");
        let feed_a = feeds.pop().expect("two sources wired");

        let compositor = Compositor::new(
            CompositorConfig {
                surface: self
                    .config
                    .engine
                    .surface(consts::CANVAS_WIDTH, consts::CANVAS_HEIGHT),
                video_encoder: self.config.engine.video_encoder(),
                audio_encoder: self.config.engine.audio_encoder(),
                sink: Arc::clone(&self.config.sink),
                video_feeder,
                audio_feeder,
                geometry: Arc::clone(&geometry),
                bus: self.bus.clone(),
                cancel: cancel.clone(),
            },
            feed_a,
            feed_b,
        )?;
        let (compositor_handle, join) = compositor.spawn();
        joins.push(join);

        joins.push(self.spawn_timeupdate_forwarder(cancel.clone()));

        self.loaded = Some(Loaded {
            cancel,
            compositor: compositor_handle,
            geometry,
            joins,
        });
        Ok(())
    }

    /// Switch the active audio source. No-op when `source` is already
    /// active, and between loads.
    pub async fn set_active(&self, source: SourceId) {
        if let Some(loaded) = &self.loaded {
            loaded.compositor.set_active(source).await;
        }
    }

    /// Exchange background and PiP sources.
    pub async fn set_swapped(&self, swapped: bool) {
        if let Some(loaded) = &self.loaded {
            loaded.compositor.set_swapped(swapped).await;
        }
    }

    /// Idempotent teardown: abort fetches, close codecs, finalize
    /// muxers, release every buffered frame.
    pub async fn destroy(&mut self) {
        let Some(loaded) = self.loaded.take() else {
            debug!("destroy on an idle player");
            return;
        };
        info!("destroying");
        loaded.cancel.cancel();
        for join in loaded.joins {
            if let Err(e) = join.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "pipeline task panicked during teardown");
                }
            }
        }
        debug!("destroyed");
    }

    /// Forward sink playhead changes into the host event stream.
    fn spawn_timeupdate_forwarder(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut timeupdate = self.config.sink.timeupdate();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    update = timeupdate.recv() => match update {
                        Ok(current_time_s) => {
                            bus.publish(PlayerEvent::TimeUpdate { current_time_s });
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "timeupdate receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        })
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Some(loaded) = &self.loaded {
            // Best-effort: tasks observe the token and unwind on their
            // own; `destroy` is the graceful path.
            loaded.cancel.cancel();
        }
    }
}
