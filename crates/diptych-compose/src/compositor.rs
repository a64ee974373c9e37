//! The compositor loop and the audio switch protocol.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use diptych_codec::{
    AudioEncoder, AudioEncoderConfig, EncodedChunk, RawAudioFrame, RawVideoFrame, Rect, Surface,
    VideoEncoder, VideoEncoderConfig,
};
use diptych_core::{consts, micros_to_secs, secs_to_micros, GeometryCell, SourceId};
use diptych_events::{EventBus, PipelineEvent, PlayerEvent};
use diptych_mux::{MuxerConfig, WebmMuxer};
use diptych_sink::{FeederCommand, FeederHandle, MediaSink};
use kanal::{AsyncReceiver, AsyncSender};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::ring::AudioRing;

/// Sleep when the next frame deadline has not arrived yet.
const EARLY_SLEEP: Duration = Duration::from_millis(5);
/// Sleep when both video queues are empty but streams are still live.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

const WHITE: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const SEMI_WHITE: [u8; 4] = [0xFF, 0xFF, 0xFF, 0x80];
const BLACK: [u8; 4] = [0x00, 0x00, 0x00, 0xFF];

/// Control inputs accepted between ticks.
#[derive(Clone, Copy, Debug)]
pub enum CompositorCommand {
    /// Switch the active audio source (no-op when already active).
    SetActive(SourceId),
    /// Exchange background and PiP sources.
    SetSwapped(bool),
}

/// Raw-frame inputs of one source, as handed over by its stream manager.
pub struct SourceFeed {
    pub video: AsyncReceiver<RawVideoFrame>,
    pub audio: AsyncReceiver<RawAudioFrame>,
    pub eof: Arc<AtomicBool>,
}

impl SourceFeed {
    /// EOF means: the pipeline is done *and* nothing is left queued.
    fn exhausted(&self) -> bool {
        self.eof.load(Ordering::Acquire) && self.video.is_empty() && self.audio.is_empty()
    }
}

/// Everything the compositor needs at construction.
pub struct CompositorConfig {
    pub surface: Box<dyn Surface>,
    pub video_encoder: Box<dyn VideoEncoder>,
    pub audio_encoder: Box<dyn AudioEncoder>,
    pub sink: Arc<dyn MediaSink>,
    pub video_feeder: FeederHandle,
    pub audio_feeder: FeederHandle,
    pub geometry: Arc<GeometryCell>,
    pub bus: EventBus,
    pub cancel: CancellationToken,
}

/// Write side of the compositor task.
#[derive(Clone)]
pub struct CompositorHandle {
    commands: AsyncSender<CompositorCommand>,
}

impl CompositorHandle {
    pub async fn set_active(&self, source: SourceId) {
        let _ = self.commands.send(CompositorCommand::SetActive(source)).await;
    }

    pub async fn set_swapped(&self, swapped: bool) {
        let _ = self.commands.send(CompositorCommand::SetSwapped(swapped)).await;
    }
}

/// Active-audio bookkeeping: which source feeds the re-encoder and where
/// the emission grid currently stands.
struct ActiveAudio {
    current: SourceId,
    last_emitted_pts_us: i64,
}

struct PerSource<T> {
    a: T,
    b: T,
}

impl<T> PerSource<T> {
    fn get_mut(&mut self, source: SourceId) -> &mut T {
        match source {
            SourceId::A => &mut self.a,
            SourceId::B => &mut self.b,
        }
    }
}

/// The single-task compositor core.
pub struct Compositor {
    surface: Box<dyn Surface>,
    video_encoder: Box<dyn VideoEncoder>,
    audio_encoder: Box<dyn AudioEncoder>,
    video_muxer: WebmMuxer,
    audio_muxer: WebmMuxer,
    sink: Arc<dyn MediaSink>,
    video_feeder: FeederHandle,
    audio_feeder: FeederHandle,
    geometry: Arc<GeometryCell>,
    bus: EventBus,
    cancel: CancellationToken,

    feeds: PerSource<SourceFeed>,
    rings: PerSource<AudioRing>,
    active: ActiveAudio,
    swapped: bool,

    /// Index of the next encoded frame; advances only on submission so
    /// the encoded timeline stays contiguous across drops.
    frame_index: u64,
    /// Scheduling tick counter; advances on every composited attempt.
    tick_index: u64,
}

impl Compositor {
    /// Build the core. Encoders are configured here; a configuration
    /// failure is a construction failure.
    pub fn new(
        config: CompositorConfig,
        feed_a: SourceFeed,
        feed_b: SourceFeed,
    ) -> Result<Self, diptych_codec::CodecError> {
        let CompositorConfig {
            surface,
            mut video_encoder,
            mut audio_encoder,
            sink,
            video_feeder,
            audio_feeder,
            geometry,
            bus,
            cancel,
        } = config;

        video_encoder.configure(&VideoEncoderConfig::default())?;
        audio_encoder.configure(&AudioEncoderConfig::default())?;

        Ok(Self {
            surface,
            video_encoder,
            audio_encoder,
            video_muxer: WebmMuxer::new(MuxerConfig::video()),
            audio_muxer: WebmMuxer::new(MuxerConfig::audio()),
            sink,
            video_feeder,
            audio_feeder,
            geometry,
            bus,
            cancel,
            feeds: PerSource {
                a: feed_a,
                b: feed_b,
            },
            rings: PerSource {
                a: AudioRing::new(),
                b: AudioRing::new(),
            },
            active: ActiveAudio {
                current: SourceId::A,
                last_emitted_pts_us: 0,
            },
            swapped: false,
            frame_index: 0,
            tick_index: 0,
        })
    }

    /// Spawn the loop; returns the control handle.
    pub fn spawn(self) -> (CompositorHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = kanal::bounded_async(8);
        let join = tokio::spawn(self.run(command_rx));
        (
            CompositorHandle {
                commands: command_tx,
            },
            join,
        )
    }

    async fn run(mut self, commands: AsyncReceiver<CompositorCommand>) {
        info!("compositor started");
        let started = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                debug!("compositor cancelled");
                self.teardown().await;
                return;
            }

            while let Ok(Some(command)) = commands.try_recv() {
                self.on_command(command).await;
            }

            // Fixed 30 fps cadence: each composited attempt has its slot.
            let deadline =
                started + Duration::from_micros(consts::FRAME_PERIOD_US as u64 * self.tick_index);
            if Instant::now() < deadline {
                tokio::time::sleep(EARLY_SLEEP).await;
                continue;
            }

            self.tick().await;

            let a_done = self.feeds.a.exhausted();
            let b_done = self.feeds.b.exhausted();
            if a_done && b_done {
                info!(frames = self.frame_index, "both sources exhausted");
                self.finish().await;
                return;
            }
        }
    }

    /// One frame slot of the tick procedure.
    async fn tick(&mut self) {
        // 1. Audio first: drain everything newly decoded on both sides.
        for source in SourceId::BOTH {
            self.ingest_audio(source).await;
        }

        // 2. At most one raw video frame per source.
        let frame_a = self.feeds.a.video.try_recv().ok().flatten();
        let frame_b = self.feeds.b.video.try_recv().ok().flatten();

        if frame_a.is_none() && frame_b.is_none() {
            // Nothing to draw; idle until decoders catch up. EOF exit is
            // decided by the caller.
            if !(self.feeds.a.exhausted() && self.feeds.b.exhausted()) {
                tokio::time::sleep(IDLE_SLEEP).await;
            }
            return;
        }

        // 3. Background/PiP mapping per the swap flag.
        let (background, pip) = if self.swapped {
            (frame_b, frame_a)
        } else {
            (frame_a, frame_b)
        };
        self.draw(background.as_ref(), pip.as_ref());

        // Both in-hand frames are done after drawing, present or not.
        if let Some(frame) = background {
            frame.release();
        }
        if let Some(frame) = pip {
            frame.release();
        }

        // 4. Wrap the composite and hand it to the encoder.
        self.submit_composite().await;
        self.tick_index += 1;
    }

    /// Drain newly decoded audio from one source: duplicate into the
    /// ring, feed the re-encoder when active, release the original.
    async fn ingest_audio(&mut self, source: SourceId) {
        loop {
            let frame = match source {
                SourceId::A => self.feeds.a.audio.try_recv(),
                SourceId::B => self.feeds.b.audio.try_recv(),
            };
            let Ok(Some(frame)) = frame else {
                break;
            };

            self.rings.get_mut(source).push(frame.duplicate());

            if source == self.active.current {
                let pts = self.active.last_emitted_pts_us;
                if let Err(e) = self.audio_encoder.encode(frame, pts) {
                    warn!(error = %e, "audio re-encode failed, grain skipped");
                } else {
                    self.active.last_emitted_pts_us += consts::AUDIO_GRAIN_US;
                }
            } else {
                frame.release();
            }
        }
        self.pump_audio_chunks().await;
    }

    /// Composite the two in-hand frames onto the surface.
    ///
    /// With the background source missing, the present source draws
    /// full-canvas and the inset is skipped for this tick.
    fn draw(&mut self, background: Option<&RawVideoFrame>, pip: Option<&RawVideoFrame>) {
        let full = Rect::new(0, 0, self.surface.width(), self.surface.height());
        self.surface.clear(BLACK);

        match (background, pip) {
            (Some(bg), Some(pip)) => {
                self.surface.draw_frame(bg, full);
                let g = self.geometry.load();
                self.surface.stroke_rect(
                    Rect::new(g.x - 1, g.y - 1, g.w + 2, g.h + 2),
                    2,
                    WHITE,
                );
                self.surface.draw_frame(pip, Rect::new(g.x, g.y, g.w, g.h));
                let handle = consts::RESIZE_HANDLE_SIZE;
                self.surface.fill_rect(
                    Rect::new(
                        g.x + g.w as i32 - handle as i32,
                        g.y + g.h as i32 - handle as i32,
                        handle,
                        handle,
                    ),
                    SEMI_WHITE,
                );
            }
            (Some(bg), None) => self.surface.draw_frame(bg, full),
            (None, Some(pip)) => self.surface.draw_frame(pip, full),
            (None, None) => {}
        }
    }

    /// Capture the surface and submit it, honoring encoder saturation.
    async fn submit_composite(&mut self) {
        let pts_us = (self.frame_index as i64) * 1_000_000 / i64::from(consts::FRAMES_PER_SECOND);

        if self.video_encoder.queue_depth() > consts::ENCODER_QUEUE_LIMIT {
            warn!(
                frame_index = self.frame_index,
                depth = self.video_encoder.queue_depth(),
                "video encoder saturated, dropping composited frame"
            );
            self.bus.publish(PipelineEvent::FrameDropped {
                frame_index: self.frame_index,
            });
            return;
        }

        let composite = self.surface.capture(pts_us);
        let force_keyframe = self.frame_index % consts::KEYFRAME_INTERVAL_FRAMES == 0;
        match self.video_encoder.encode(composite, force_keyframe) {
            Ok(()) => self.frame_index += 1,
            Err(e) => warn!(error = %e, "video encode failed"),
        }

        self.pump_video_chunks().await;
    }

    async fn pump_video_chunks(&mut self) {
        while let Some(chunk) = self.video_encoder.poll_chunk() {
            let containers = match self.video_muxer.write(&chunk) {
                Ok(containers) => containers,
                Err(e) => {
                    warn!(error = %e, "video muxer error, recreating");
                    self.video_muxer = WebmMuxer::new(MuxerConfig::video());
                    self.video_muxer.write(&chunk).unwrap_or_default()
                }
            };
            for container in containers {
                tokio::select! {
                    () = self.cancel.cancelled() => return,
                    sent = self.video_feeder.chunks.send(container) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn pump_audio_chunks(&mut self) {
        while let Some(chunk) = self.audio_encoder.poll_chunk() {
            if let Err(e) = self.write_audio_chunk(&chunk).await {
                warn!(error = ?e, "audio chunk lost during teardown");
                return;
            }
        }
    }

    async fn write_audio_chunk(&mut self, chunk: &EncodedChunk) -> Result<(), ()> {
        let containers = match self.audio_muxer.write(chunk) {
            Ok(containers) => containers,
            Err(e) => {
                // Unreachable through the grid by construction; recover
                // by starting a fresh timeline anyway.
                warn!(error = %e, "audio muxer out of order, recreating");
                self.audio_muxer = WebmMuxer::new(MuxerConfig::audio());
                self.audio_muxer.write(chunk).unwrap_or_default()
            }
        };
        for container in containers {
            tokio::select! {
                () = self.cancel.cancelled() => return Err(()),
                sent = self.audio_feeder.chunks.send(container) => {
                    if sent.is_err() {
                        return Err(());
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_command(&mut self, command: CompositorCommand) {
        match command {
            CompositorCommand::SetSwapped(swapped) => {
                trace!(swapped, "swap flag updated");
                self.swapped = swapped;
            }
            CompositorCommand::SetActive(source) => self.switch_active(source).await,
        }
    }

    /// The audio switch protocol. See the ordering contract in the
    /// module docs: event, buffer clear, muxer recreation, grid re-base,
    /// ring replay, ring drain.
    async fn switch_active(&mut self, new: SourceId) {
        if new == self.active.current {
            trace!(source = %new, "switch to already-active source ignored");
            return;
        }
        let old = self.active.current;
        self.active.current = new;
        info!(from = %old, to = %new, "switching active audio source");

        self.bus.publish(PlayerEvent::ActiveSourceChanged { source: new });

        let t_now_us = secs_to_micros(self.sink.current_time_s());
        let splice_us = t_now_us + consts::SWITCH_SPLICE_LEAD_US;

        // Clear the stale tail. The feeder defers this while the sink is
        // mid-append and issues it from the next updateend.
        let _ = self
            .audio_feeder
            .commands
            .send(FeederCommand::Clear {
                from_s: micros_to_secs(splice_us),
            })
            .await;

        // The old muxer's timeline only moves forward; a fresh one
        // re-bases the spliced stream at zero and the sink places it at
        // the splice point.
        self.audio_muxer = WebmMuxer::new(MuxerConfig::audio());
        self.active.last_emitted_pts_us = splice_us;

        // Replay the new source's ring from the playhead grain.
        let entries = self.rings.get_mut(new).drain();
        let start = if entries.is_empty() {
            0
        } else {
            ((t_now_us / consts::AUDIO_GRAIN_US).max(0) as usize).min(entries.len() - 1)
        };
        let mut fed = 0usize;
        for (index, frame) in entries.into_iter().enumerate() {
            if index < start {
                frame.release();
                continue;
            }
            let pts = self.active.last_emitted_pts_us;
            if let Err(e) = self.audio_encoder.encode(frame, pts) {
                warn!(error = %e, "ring replay grain skipped");
            } else {
                self.active.last_emitted_pts_us += consts::AUDIO_GRAIN_US;
                fed += 1;
            }
        }
        debug!(start, fed, "ring replay complete");

        // Both rings start over after a switch.
        self.rings.get_mut(old).clear();
        self.pump_audio_chunks().await;
    }

    /// Natural end of both sources: flush, finalize, report.
    async fn finish(&mut self) {
        if let Err(e) = self.audio_encoder.flush() {
            warn!(error = %e, "audio encoder flush failed");
        }
        self.pump_audio_chunks().await;
        if let Err(e) = self.video_encoder.flush() {
            warn!(error = %e, "video encoder flush failed");
        }
        self.pump_video_chunks().await;

        for (muxer, feeder) in [
            (&mut self.video_muxer, &self.video_feeder),
            (&mut self.audio_muxer, &self.audio_feeder),
        ] {
            if let Ok(containers) = muxer.finalize() {
                for container in containers {
                    if feeder.chunks.send(container).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.rings.a.clear();
        self.rings.b.clear();
        self.bus.publish(PipelineEvent::Finished {
            frames_encoded: self.frame_index,
        });
        info!(frames = self.frame_index, "compositor finished");
    }

    /// Abort path: finalize muxers ignoring errors, release everything.
    async fn teardown(&mut self) {
        let _ = self.video_encoder.flush();
        let _ = self.audio_encoder.flush();
        while self.video_encoder.poll_chunk().is_some() {}
        while self.audio_encoder.poll_chunk().is_some() {}
        let _ = self.video_muxer.finalize();
        let _ = self.audio_muxer.finalize();
        self.rings.a.clear();
        self.rings.b.clear();
        // Queued raw frames drop with the feeds.
    }
}
