//! In-memory sink with Media-Source-shaped async update semantics.
//!
//! Appends and removes flip `updating` and complete on a spawned timer
//! tick, firing `updateend` exactly like the browser buffer the feeder
//! is written against. Appended WebM chunks are scanned for cluster
//! timestamps so `buffered` reflects real media time.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{
    error::{SinkError, SinkResult},
    traits::{MediaSink, TimeRanges, TrackBuffer},
};

/// How long a mock update stays in the `updating` state.
const UPDATE_LATENCY: Duration = Duration::from_millis(1);
/// Assumed duration of a cluster's final block when extending ranges.
const TRAILING_BLOCK_S: f64 = 0.04;
/// Ranges closer than this merge into one.
const MERGE_EPSILON_S: f64 = 0.1;

#[derive(Debug, Default)]
struct BufferState {
    buffered: TimeRanges,
    updating: bool,
    reject_next: u32,
}

/// One mock source buffer.
pub struct MockTrackBuffer {
    state: Mutex<BufferState>,
    updateend_tx: broadcast::Sender<()>,
}

impl MockTrackBuffer {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (updateend_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(BufferState::default()),
            updateend_tx,
        })
    }

    /// Make the next `n` appends fail, for reject-path tests.
    pub fn reject_next(&self, n: u32) {
        self.state.lock().reject_next = n;
    }

    /// Test hook: replace the buffered ranges wholesale.
    pub fn force_buffered(&self, ranges: TimeRanges) {
        self.state.lock().buffered = ranges;
    }

    fn finish_update(this: &Arc<Self>, apply: impl FnOnce(&mut BufferState) + Send + 'static) {
        let this = Arc::clone(this);
        tokio::spawn(async move {
            tokio::time::sleep(UPDATE_LATENCY).await;
            {
                let mut state = this.state.lock();
                apply(&mut state);
                state.updating = false;
            }
            let _ = this.updateend_tx.send(());
        });
    }
}

impl TrackBuffer for Arc<MockTrackBuffer> {
    fn append(&self, bytes: Bytes) -> SinkResult<()> {
        let mut state = self.state.lock();
        if state.updating {
            return Err(SinkError::Rejected("append while updating".to_string()));
        }
        if state.reject_next > 0 {
            state.reject_next -= 1;
            return Err(SinkError::Rejected("simulated quota error".to_string()));
        }
        state.updating = true;
        drop(state);

        let span = webm_chunk_span(&bytes);
        MockTrackBuffer::finish_update(self, move |state| {
            if let Some((start, end)) = span {
                merge_range(&mut state.buffered, start, end);
            }
        });
        Ok(())
    }

    fn remove(&self, start_s: f64, end_s: f64) -> SinkResult<()> {
        let mut state = self.state.lock();
        if state.updating {
            return Err(SinkError::Rejected("remove while updating".to_string()));
        }
        state.updating = true;
        drop(state);

        MockTrackBuffer::finish_update(self, move |state| {
            subtract_range(&mut state.buffered, start_s, end_s);
        });
        Ok(())
    }

    fn buffered(&self) -> TimeRanges {
        self.state.lock().buffered.clone()
    }

    fn updating(&self) -> bool {
        self.state.lock().updating
    }

    fn updateend(&self) -> broadcast::Receiver<()> {
        self.updateend_tx.subscribe()
    }
}

/// The full mock sink: two buffers plus a controllable playhead.
pub struct MockSink {
    video: Arc<MockTrackBuffer>,
    audio: Arc<MockTrackBuffer>,
    current_time_s: Mutex<f64>,
    paused: Mutex<bool>,
    deny_play: Mutex<bool>,
    play_requests: Mutex<u32>,
    timeupdate_tx: broadcast::Sender<f64>,
}

impl MockSink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (timeupdate_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            video: MockTrackBuffer::new(),
            audio: MockTrackBuffer::new(),
            current_time_s: Mutex::new(0.0),
            paused: Mutex::new(true),
            deny_play: Mutex::new(false),
            play_requests: Mutex::new(0),
            timeupdate_tx,
        })
    }

    pub fn video_buffer(&self) -> Arc<MockTrackBuffer> {
        Arc::clone(&self.video)
    }

    pub fn audio_buffer(&self) -> Arc<MockTrackBuffer> {
        Arc::clone(&self.audio)
    }

    /// Advance the playhead and fire `timeupdate`.
    pub fn set_current_time(&self, t: f64) {
        *self.current_time_s.lock() = t;
        let _ = self.timeupdate_tx.send(t);
    }

    /// Make `play()` fail, modeling host autoplay policy.
    pub fn deny_play(&self) {
        *self.deny_play.lock() = true;
    }

    pub fn play_requests(&self) -> u32 {
        *self.play_requests.lock()
    }
}

#[async_trait]
impl MediaSink for Arc<MockSink> {
    fn video(&self) -> Arc<dyn TrackBuffer> {
        Arc::new(Arc::clone(&self.video))
    }

    fn audio(&self) -> Arc<dyn TrackBuffer> {
        Arc::new(Arc::clone(&self.audio))
    }

    fn current_time_s(&self) -> f64 {
        *self.current_time_s.lock()
    }

    fn timeupdate(&self) -> broadcast::Receiver<f64> {
        self.timeupdate_tx.subscribe()
    }

    fn paused(&self) -> bool {
        *self.paused.lock()
    }

    async fn play(&self) -> SinkResult<()> {
        *self.play_requests.lock() += 1;
        if *self.deny_play.lock() {
            return Err(SinkError::PlaybackDenied("autoplay policy".to_string()));
        }
        *self.paused.lock() = false;
        Ok(())
    }
}

/// Scan a WebM chunk for its media span in seconds. Header chunks (and
/// anything without a cluster) yield `None`.
fn webm_chunk_span(bytes: &[u8]) -> Option<(f64, f64)> {
    const CLUSTER_ID: [u8; 4] = [0x1F, 0x43, 0xB6, 0x75];
    if bytes.len() < 4 || bytes[..4] != CLUSTER_ID {
        return None;
    }
    let mut pos = 4;
    // Cluster size vint.
    let width = bytes[pos].leading_zeros() as usize + 1;
    pos += width;

    // Timestamp element.
    if bytes.get(pos) != Some(&0xE7) {
        return None;
    }
    let ts_len = (bytes[pos + 1] & 0x7F) as usize;
    let mut cluster_ms = 0u64;
    for b in bytes.get(pos + 2..pos + 2 + ts_len)? {
        cluster_ms = cluster_ms << 8 | u64::from(*b);
    }
    pos += 2 + ts_len;

    // Walk SimpleBlocks for the max relative timestamp.
    let mut max_rel = 0i64;
    let mut min_rel = i64::MAX;
    while bytes.get(pos) == Some(&0xA3) {
        pos += 1;
        let width = bytes[pos].leading_zeros() as usize + 1;
        let mut size = u64::from(bytes[pos]) & (0xFF >> width);
        for b in bytes.get(pos + 1..pos + width)? {
            size = size << 8 | u64::from(*b);
        }
        pos += width;
        let rel = i64::from(i16::from_be_bytes([bytes[pos + 1], bytes[pos + 2]]));
        max_rel = max_rel.max(rel);
        min_rel = min_rel.min(rel);
        pos += size as usize;
    }
    if min_rel == i64::MAX {
        return None;
    }

    let start = (cluster_ms as i64 + min_rel) as f64 / 1_000.0;
    let end = (cluster_ms as i64 + max_rel) as f64 / 1_000.0 + TRAILING_BLOCK_S;
    Some((start, end))
}

fn merge_range(ranges: &mut TimeRanges, start: f64, end: f64) {
    ranges.push((start, end));
    ranges.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut merged: TimeRanges = Vec::with_capacity(ranges.len());
    for &(s, e) in ranges.iter() {
        match merged.last_mut() {
            Some((_, last_end)) if s <= *last_end + MERGE_EPSILON_S => {
                *last_end = last_end.max(e);
            }
            _ => merged.push((s, e)),
        }
    }
    *ranges = merged;
    trace!(?ranges, "mock buffer ranges updated");
}

fn subtract_range(ranges: &mut TimeRanges, start: f64, end: f64) {
    let mut out: TimeRanges = Vec::with_capacity(ranges.len());
    for &(s, e) in ranges.iter() {
        if e <= start || s >= end {
            out.push((s, e));
            continue;
        }
        if s < start {
            out.push((s, start));
        }
        if e > end {
            out.push((end, e));
        }
    }
    *ranges = out;
}
