//! The per-source pipeline task.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use diptych_codec::{
    AudioDecoder, AudioDecoderConfig, CodecEngine, RawAudioFrame, RawVideoFrame,
    VideoDecoder, VideoDecoderConfig,
};
use diptych_core::{consts, FaultKind, SourceId, TrackKind};
use diptych_demux::{AudioParams, DemuxEvent, Demuxer, EncodedUnit, TrackParams, VideoParams};
use diptych_events::{EventBus, PipelineEvent, PlayerEvent};
use diptych_segments::SegmentRecord;
use kanal::{AsyncReceiver, AsyncSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Bounded raw-frame queue depths handed to the compositor.
const VIDEO_QUEUE_DEPTH: usize = 16;
const AUDIO_QUEUE_DEPTH: usize = 64;

/// Construction inputs for one source's pipeline.
pub struct StreamConfig {
    pub source: SourceId,
    pub engine: Arc<dyn CodecEngine>,
    pub bus: EventBus,
    /// Source-scoped cancellation (degradation stops one source).
    pub cancel: CancellationToken,
    /// Load-scoped cancellation; pulled on fatal faults.
    pub fatal: CancellationToken,
}

/// Consumer side of one source's pipeline.
pub struct StreamHandles {
    pub video_frames: AsyncReceiver<RawVideoFrame>,
    pub audio_frames: AsyncReceiver<RawAudioFrame>,
    /// Set once the task has delivered everything it ever will.
    pub eof: Arc<AtomicBool>,
    pub join: JoinHandle<()>,
}

/// Spawns and runs the per-source pipeline.
pub struct StreamPipeline {
    source: SourceId,
    engine: Arc<dyn CodecEngine>,
    bus: EventBus,
    cancel: CancellationToken,
    fatal: CancellationToken,

    video: TrackLane<Box<dyn VideoDecoder>, RawVideoFrame>,
    audio: TrackLane<Box<dyn AudioDecoder>, RawAudioFrame>,
}

/// Everything one track owns inside the pipeline.
struct TrackLane<D, F> {
    demuxer: Demuxer,
    decoder: Option<D>,
    pending: VecDeque<EncodedUnit>,
    out: Option<AsyncSender<F>>,
    /// Closed after a teardown; segments for this track are discarded.
    alive: bool,
}

impl<D, F> TrackLane<D, F> {
    fn new(track: TrackKind, out: AsyncSender<F>) -> Self {
        Self {
            demuxer: Demuxer::new(track),
            decoder: None,
            pending: VecDeque::new(),
            out: Some(out),
            alive: true,
        }
    }

    fn teardown(&mut self) {
        self.alive = false;
        self.decoder = None;
        self.pending.clear();
        self.out = None;
    }
}

impl StreamPipeline {
    #[must_use]
    pub fn spawn(
        config: StreamConfig,
        video_segments: AsyncReceiver<SegmentRecord>,
        audio_segments: AsyncReceiver<SegmentRecord>,
    ) -> StreamHandles {
        let (video_tx, video_rx) = kanal::bounded_async(VIDEO_QUEUE_DEPTH);
        let (audio_tx, audio_rx) = kanal::bounded_async(AUDIO_QUEUE_DEPTH);
        let eof = Arc::new(AtomicBool::new(false));

        let pipeline = Self {
            source: config.source,
            engine: config.engine,
            bus: config.bus,
            cancel: config.cancel,
            fatal: config.fatal,
            video: TrackLane::new(TrackKind::Video, video_tx),
            audio: TrackLane::new(TrackKind::Audio, audio_tx),
        };

        let eof_flag = Arc::clone(&eof);
        let join = tokio::spawn(async move {
            pipeline.run(video_segments, audio_segments, eof_flag).await;
        });

        StreamHandles {
            video_frames: video_rx,
            audio_frames: audio_rx,
            eof,
            join,
        }
    }

    async fn run(
        mut self,
        video_segments: AsyncReceiver<SegmentRecord>,
        audio_segments: AsyncReceiver<SegmentRecord>,
        eof: Arc<AtomicBool>,
    ) {
        trace!(source = %self.source, "stream pipeline started");

        let mut video_open = true;
        let mut audio_open = true;
        while video_open || audio_open {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!(source = %self.source, "stream pipeline cancelled");
                    // A degraded source delivers nothing more; the
                    // compositor treats it like EOF once its queues
                    // drain. Dropping lanes releases everything queued.
                    eof.store(true, Ordering::Release);
                    return;
                }
                record = video_segments.recv(), if video_open => match record {
                    Ok(record) => self.on_segment(TrackKind::Video, record).await,
                    Err(_) => video_open = false,
                },
                record = audio_segments.recv(), if audio_open => match record {
                    Ok(record) => self.on_segment(TrackKind::Audio, record).await,
                    Err(_) => audio_open = false,
                },
            }
            if self.fatal.is_cancelled() {
                return;
            }
        }

        self.finish().await;
        eof.store(true, Ordering::Release);
        debug!(source = %self.source, "stream pipeline finished");
    }

    async fn on_segment(&mut self, track: TrackKind, record: SegmentRecord) {
        let lane_alive = match track {
            TrackKind::Video => self.video.alive,
            TrackKind::Audio => self.audio.alive,
        };
        if !lane_alive {
            trace!(source = %self.source, %track, "segment for torn-down track dropped");
            return;
        }

        let events = {
            let demuxer = match track {
                TrackKind::Video => &mut self.video.demuxer,
                TrackKind::Audio => &mut self.audio.demuxer,
            };
            match demuxer.append(record.bytes) {
                Ok(events) => events,
                Err(e) => {
                    self.teardown_track(track, FaultKind::DemuxMalformed, &e.to_string());
                    return;
                }
            }
        };

        for event in events {
            match event {
                DemuxEvent::Ready(TrackParams::Video(params)) => {
                    self.configure_video(&params).await;
                }
                DemuxEvent::Ready(TrackParams::Audio(params)) => {
                    self.configure_audio(&params).await;
                }
                DemuxEvent::Samples(units) => match track {
                    TrackKind::Video => self.video.pending.extend(units),
                    TrackKind::Audio => self.audio.pending.extend(units),
                },
            }
        }

        self.pump(track).await;
    }

    async fn configure_video(&mut self, params: &VideoParams) {
        let config = VideoDecoderConfig {
            codec: params.codec.clone(),
            config: params.config.clone(),
            coded_width: params.width,
            coded_height: params.height,
        };
        if !self.engine.supports_video(&config).await {
            // Unsupported video is fatal for the whole load.
            warn!(source = %self.source, codec = %config.codec, "video codec unsupported");
            self.bus.publish(PlayerEvent::Error {
                kind: FaultKind::CodecUnsupported,
                message: format!("source {} video codec {}", self.source, config.codec),
            });
            self.fatal.cancel();
            return;
        }

        let mut decoder = self.engine.video_decoder();
        match decoder.configure(&config) {
            Ok(()) => {
                self.video.decoder = Some(decoder);
                self.bus.publish(PipelineEvent::TrackReady {
                    source: self.source,
                    track: TrackKind::Video,
                });
            }
            Err(e) => {
                self.bus.publish(PlayerEvent::Error {
                    kind: FaultKind::CodecUnsupported,
                    message: format!("source {} video: {e}", self.source),
                });
                self.fatal.cancel();
            }
        }
    }

    async fn configure_audio(&mut self, params: &AudioParams) {
        let config = AudioDecoderConfig {
            codec: params.codec.clone(),
            config: params.config.clone(),
            sample_rate: params.sample_rate,
            channels: params.channels,
        };
        if !self.engine.supports_audio(&config).await {
            // Audio-only teardown; video and the other source continue.
            self.teardown_track(
                TrackKind::Audio,
                FaultKind::CodecUnsupported,
                &format!("codec {} rejected by host decoder", config.codec),
            );
            return;
        }

        let mut decoder = self.engine.audio_decoder();
        match decoder.configure(&config) {
            Ok(()) => {
                self.audio.decoder = Some(decoder);
                self.bus.publish(PipelineEvent::TrackReady {
                    source: self.source,
                    track: TrackKind::Audio,
                });
            }
            Err(e) => {
                self.teardown_track(TrackKind::Audio, FaultKind::CodecUnsupported, &e.to_string());
            }
        }
    }

    /// Feed pending units and move decoded frames out.
    ///
    /// Video feeding honors the in-flight ceiling; the await on the
    /// bounded output queue is where decoder output back-pressure
    /// propagates to the producer.
    async fn pump(&mut self, track: TrackKind) {
        let cancel = self.cancel.clone();
        match track {
            TrackKind::Video => {
                let lane = &mut self.video;
                let Some(decoder) = lane.decoder.as_mut() else {
                    return;
                };
                let Some(out) = lane.out.as_ref() else {
                    return;
                };

                loop {
                    while let Some(frame) = decoder.poll_frame() {
                        // The await on the bounded queue is the stall
                        // point; cancellation must win over it (the
                        // in-flight frame drops with the send future).
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            sent = out.send(frame) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    if decoder.in_flight() >= consts::DECODER_IN_FLIGHT_LIMIT {
                        break;
                    }
                    let Some(unit) = lane.pending.pop_front() else {
                        break;
                    };
                    if let Err(e) = decoder.decode(unit) {
                        warn!(source = %self.source, error = %e, "video unit skipped");
                    }
                }
            }
            TrackKind::Audio => {
                let lane = &mut self.audio;
                let Some(decoder) = lane.decoder.as_mut() else {
                    return;
                };
                let Some(out) = lane.out.as_ref() else {
                    return;
                };

                loop {
                    while let Some(frame) = decoder.poll_frame() {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            sent = out.send(frame) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    let Some(unit) = lane.pending.pop_front() else {
                        break;
                    };
                    if let Err(e) = decoder.decode(unit) {
                        warn!(source = %self.source, error = %e, "audio unit skipped");
                    }
                }
            }
        }
    }

    fn teardown_track(&mut self, track: TrackKind, kind: FaultKind, reason: &str) {
        warn!(source = %self.source, %track, %kind, reason, "tearing down track");
        match track {
            TrackKind::Video => self.video.teardown(),
            TrackKind::Audio => self.audio.teardown(),
        }
        self.bus.publish(PipelineEvent::TrackClosed {
            source: self.source,
            track,
            reason: reason.to_string(),
        });
    }

    /// Both segment channels closed: flush decoders and drain the tails.
    async fn finish(&mut self) {
        for track in [TrackKind::Video, TrackKind::Audio] {
            self.pump(track).await;
        }

        let cancel = self.cancel.clone();
        if let Some(decoder) = self.video.decoder.as_mut() {
            if let Err(e) = decoder.flush() {
                warn!(source = %self.source, error = %e, "video flush failed");
            }
            if let Some(out) = self.video.out.as_ref() {
                while let Some(frame) = decoder.poll_frame() {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        sent = out.send(frame) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        if let Some(decoder) = self.audio.decoder.as_mut() {
            if let Err(e) = decoder.flush() {
                warn!(source = %self.source, error = %e, "audio flush failed");
            }
            if let Some(out) = self.audio.out.as_ref() {
                while let Some(frame) = decoder.poll_frame() {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        sent = out.send(frame) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        // Dropping self closes the frame queues, which is the EOF signal
        // the compositor sees alongside the flag.
    }
}
