//! Back-pressured delivery of container chunks into one track buffer.

use std::{collections::VecDeque, sync::Arc};

use diptych_core::{consts, FaultKind, TrackKind};
use diptych_events::{EventBus, PlayerEvent};
use diptych_mux::ContainerChunk;
use kanal::{AsyncReceiver, AsyncSender};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::traits::{buffered_end, buffered_start, MediaSink, TrackBuffer};

/// Consecutive rejected appends before the load is declared dead.
const MAX_CONSECUTIVE_REJECTS: u32 = 3;
/// Playback is requested once this much video is buffered.
const AUTOPLAY_THRESHOLD_S: f64 = 0.5;

/// Out-of-band instructions for a feeder, used by the audio switch.
#[derive(Debug)]
pub enum FeederCommand {
    /// Remove `[from_s, buffered end]`. Deferred while the sink is
    /// mid-append and issued from the next `updateend`.
    Clear { from_s: f64 },
}

/// Write side of one feeder.
#[derive(Clone)]
pub struct FeederHandle {
    pub chunks: AsyncSender<ContainerChunk>,
    pub commands: AsyncSender<FeederCommand>,
}

/// Per-track feeder: pending chunk queue, `updating` discipline,
/// look-ahead cap, sliding-window trim, one-shot auto-play.
pub struct SinkFeeder {
    track: TrackKind,
    buffer: Arc<dyn TrackBuffer>,
    sink: Arc<dyn MediaSink>,
    bus: EventBus,
    cancel: CancellationToken,

    pending: VecDeque<ContainerChunk>,
    pending_clear: Option<f64>,
    consecutive_rejects: u32,
    autoplay_attempted: bool,
    /// Whether the update in flight is an append; only those produce a
    /// `BufferUpdate` on completion.
    append_in_flight: bool,
}

impl SinkFeeder {
    /// Spawn the feeder task for one track. Returns the write handle.
    pub fn spawn(
        track: TrackKind,
        sink: Arc<dyn MediaSink>,
        bus: EventBus,
        cancel: CancellationToken,
    ) -> (FeederHandle, JoinHandle<()>) {
        let (chunk_tx, chunk_rx) = kanal::bounded_async(64);
        let (cmd_tx, cmd_rx) = kanal::bounded_async(8);

        let buffer = match track {
            TrackKind::Video => sink.video(),
            TrackKind::Audio => sink.audio(),
        };

        let feeder = Self {
            track,
            buffer,
            sink,
            bus,
            cancel,
            pending: VecDeque::new(),
            pending_clear: None,
            consecutive_rejects: 0,
            autoplay_attempted: false,
            append_in_flight: false,
        };

        let join = tokio::spawn(feeder.run(chunk_rx, cmd_rx));
        (
            FeederHandle {
                chunks: chunk_tx,
                commands: cmd_tx,
            },
            join,
        )
    }

    async fn run(
        mut self,
        chunk_rx: AsyncReceiver<ContainerChunk>,
        cmd_rx: AsyncReceiver<FeederCommand>,
    ) {
        let mut updateend = self.buffer.updateend();
        let mut chunks_open = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    trace!(track = %self.track, "feeder cancelled");
                    return;
                }
                end = updateend.recv() => match end {
                    Ok(()) => self.on_updateend().await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed updateends still mean the sink went
                        // idle; treat it as one.
                        warn!(track = %self.track, skipped, "updateend receiver lagged");
                        self.on_updateend().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(track = %self.track, "updateend channel closed");
                        return;
                    }
                },
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Ok(FeederCommand::Clear { from_s }) => {
                            self.pending_clear = Some(from_s);
                            self.pump();
                        }
                        Err(_) => return,
                    }
                }
                chunk = chunk_rx.recv(), if chunks_open => {
                    match chunk {
                        Ok(chunk) => {
                            self.pending.push_back(chunk);
                            self.pump();
                        }
                        Err(_) => {
                            // Producer side finished; keep serving
                            // updateends until cancelled.
                            chunks_open = false;
                        }
                    }
                }
            }

            if self.consecutive_rejects >= MAX_CONSECUTIVE_REJECTS {
                self.bus.publish(PlayerEvent::Error {
                    kind: FaultKind::SinkRejected,
                    message: format!(
                        "{} append rejected {MAX_CONSECUTIVE_REJECTS} times",
                        self.track
                    ),
                });
                return;
            }
        }
    }

    /// `updateend`: trim the sliding window, try auto-play, then pump.
    async fn on_updateend(&mut self) {
        if std::mem::take(&mut self.append_in_flight) {
            self.emit_buffer_update();
        }

        if self.track == TrackKind::Video {
            self.try_autoplay().await;
        }

        if self.trim_behind() {
            // The remove occupies this update cycle; appends resume on
            // the next updateend.
            return;
        }
        self.pump();
    }

    /// Pop-and-append whenever the sink is idle and the caps allow it.
    fn pump(&mut self) {
        if self.buffer.updating() {
            return;
        }

        if let Some(from_s) = self.pending_clear.take() {
            let ranges = self.buffer.buffered();
            if let Some(end) = buffered_end(&ranges) {
                if end > from_s {
                    debug!(track = %self.track, from_s, end, "clearing buffered tail");
                    if let Err(e) = self.buffer.remove(from_s, end) {
                        warn!(track = %self.track, error = %e, "clear failed");
                    } else {
                        return;
                    }
                }
            }
        }

        // Look-ahead cap: hold chunks while far ahead of the playhead.
        let ahead = buffered_end(&self.buffer.buffered())
            .map_or(0.0, |end| end - self.sink.current_time_s());
        if ahead > consts::MAX_LOOKAHEAD_S {
            trace!(track = %self.track, ahead, "look-ahead cap reached, deferring");
            return;
        }

        let Some(chunk) = self.pending.pop_front() else {
            return;
        };
        match self.buffer.append(chunk.bytes.clone()) {
            Ok(()) => {
                self.consecutive_rejects = 0;
                self.append_in_flight = true;
            }
            Err(e) => {
                // Retry the same chunk after the next updateend.
                warn!(track = %self.track, error = %e, "append rejected");
                self.pending.push_front(chunk);
                self.consecutive_rejects += 1;
            }
        }
    }

    /// Sliding window: drop everything further than `MAX_BEHIND_S`
    /// behind the playhead. Returns whether a remove was issued.
    fn trim_behind(&mut self) -> bool {
        if self.buffer.updating() {
            return false;
        }
        let threshold = self.sink.current_time_s() - consts::MAX_BEHIND_S;
        if threshold <= 0.0 {
            return false;
        }
        match buffered_start(&self.buffer.buffered()) {
            Some(start) if start < threshold => {
                debug!(track = %self.track, threshold, "trimming behind playhead");
                if let Err(e) = self.buffer.remove(0.0, threshold) {
                    warn!(track = %self.track, error = %e, "trim failed");
                    return false;
                }
                true
            }
            _ => false,
        }
    }

    async fn try_autoplay(&mut self) {
        if self.autoplay_attempted || !self.sink.paused() {
            return;
        }
        let Some(end) = buffered_end(&self.buffer.buffered()) else {
            return;
        };
        if end <= AUTOPLAY_THRESHOLD_S {
            return;
        }
        self.autoplay_attempted = true;
        if let Err(e) = self.sink.play().await {
            // Host policy; later ticks do not retry.
            warn!(error = %e, "autoplay denied");
        }
    }

    fn emit_buffer_update(&self) {
        self.bus.publish(PlayerEvent::BufferUpdate {
            video_ranges: self.sink.video().buffered(),
            audio_ranges: self.sink.audio().buffered(),
        });
    }
}
