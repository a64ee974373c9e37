//! Segment producer task: fetch → ordered emission → bounded ready queue.

use std::time::{Duration, Instant};

use diptych_core::{consts, FaultKind, SourceId, TrackKind};
use diptych_events::{EventBus, PlayerEvent, SourceEvent};
use diptych_net::HttpClient;
use kanal::{AsyncReceiver, AsyncSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    manifest::{SegmentEntry, SourceManifest},
    record::SegmentRecord,
};

/// Receivers for one source's segment stream plus the producer task handle.
///
/// Channel closure is the EOF signal: the producer drops its senders when
/// the manifest is exhausted, the source degrades, or it is cancelled.
pub struct ProducerHandles {
    pub video_rx: AsyncReceiver<SegmentRecord>,
    pub audio_rx: AsyncReceiver<SegmentRecord>,
    pub join: JoinHandle<()>,
}

/// Per-source segment producer.
pub struct SegmentProducer {
    source: SourceId,
    manifest: SourceManifest,
    client: HttpClient,
    bus: EventBus,
    cancel: CancellationToken,
}

impl SegmentProducer {
    #[must_use]
    pub fn new(
        source: SourceId,
        manifest: SourceManifest,
        client: HttpClient,
        bus: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            manifest,
            client,
            bus,
            cancel,
        }
    }

    /// Start producing. Records arrive per track on bounded queues of
    /// capacity [`consts::SEGMENT_PREFETCH`]; while a queue is full the
    /// next fetch for that track is not scheduled.
    #[must_use]
    pub fn spawn(self) -> ProducerHandles {
        let (video_tx, video_rx) = kanal::bounded_async(consts::SEGMENT_PREFETCH);
        let (audio_tx, audio_rx) = kanal::bounded_async(consts::SEGMENT_PREFETCH);

        let join = tokio::spawn(async move {
            self.run(video_tx, audio_tx).await;
        });

        ProducerHandles {
            video_rx,
            audio_rx,
            join,
        }
    }

    async fn run(
        self,
        video_tx: AsyncSender<SegmentRecord>,
        audio_tx: AsyncSender<SegmentRecord>,
    ) {
        trace!(source = %self.source, "segment producer started");

        // Init segments first, video before audio, ahead of any media.
        for (track, url, tx) in [
            (TrackKind::Video, &self.manifest.video_init_url, &video_tx),
            (TrackKind::Audio, &self.manifest.audio_init_url, &audio_tx),
        ] {
            let bytes = match self
                .client
                .get_bytes_once_retried(url.clone(), &self.cancel)
                .await
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.degrade(track, 0, e);
                    return;
                }
            };
            if tx.send(SegmentRecord::init(track, bytes)).await.is_err() {
                return;
            }
        }

        // Media segments, each track at its own pace behind its own queue.
        let video = self.track_loop(TrackKind::Video, &self.manifest.video_segments, &video_tx);
        let audio = self.track_loop(TrackKind::Audio, &self.manifest.audio_segments, &audio_tx);
        let (video_done, audio_done) = tokio::join!(video, audio);

        if video_done && audio_done {
            debug!(source = %self.source, "segment producer finished");
            self.bus.publish(SourceEvent::EndOfStream {
                source: self.source,
            });
        }
        // Senders drop here; closed channels are the downstream EOF.
    }

    /// Emit one track's media segments in ascending pts. Returns `false`
    /// when the track stopped early (degraded or cancelled).
    async fn track_loop(
        &self,
        track: TrackKind,
        entries: &[SegmentEntry],
        tx: &AsyncSender<SegmentRecord>,
    ) -> bool {
        for (index, entry) in entries.iter().enumerate() {
            // Prefetch window: while the ready queue is full, the next
            // fetch is not scheduled; a 100 ms tick re-checks for room.
            while tx.len() >= consts::SEGMENT_PREFETCH {
                tokio::select! {
                    () = self.cancel.cancelled() => return false,
                    () = tokio::time::sleep(Duration::from_millis(consts::PRODUCER_TICK_MS)) => {}
                }
            }
            if self.cancel.is_cancelled() {
                return false;
            }

            self.bus.publish(SourceEvent::SegmentStart {
                source: self.source,
                track,
                segment_index: index,
            });

            let started = Instant::now();
            let bytes = match self
                .client
                .get_bytes_once_retried(entry.url.clone(), &self.cancel)
                .await
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.degrade(track, index, e);
                    return false;
                }
            };

            self.bus.publish(SourceEvent::SegmentComplete {
                source: self.source,
                track,
                segment_index: index,
                bytes_transferred: bytes.len() as u64,
                duration: started.elapsed(),
            });

            let record = SegmentRecord::media(track, bytes, entry.pts_us, entry.duration_us);
            if tx.send(record).await.is_err() {
                trace!(source = %self.source, %track, "ready queue closed, stopping");
                return false;
            }
        }
        true
    }

    /// Transport gave up after the retry. After cancellation this is a
    /// silent drop; otherwise the whole source degrades and the sibling
    /// track is stopped too.
    fn degrade(&self, track: TrackKind, index: usize, error: diptych_net::NetError) {
        if self.cancel.is_cancelled() {
            trace!(source = %self.source, %track, "fetch aborted during teardown");
            return;
        }
        warn!(
            source = %self.source,
            %track,
            segment_index = index,
            error = %error,
            "segment fetch failed after retry, degrading source"
        );
        self.bus.publish(SourceEvent::Degraded {
            source: self.source,
            error: error.to_string(),
        });
        self.bus.publish(PlayerEvent::Error {
            kind: FaultKind::NetworkFailure,
            message: format!("source {} segment {index}: {error}", self.source),
        });
        self.cancel.cancel();
    }
}
