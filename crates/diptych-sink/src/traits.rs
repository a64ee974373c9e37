use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::error::SinkResult;

/// Buffered intervals in seconds, ascending and disjoint.
pub type TimeRanges = Vec<(f64, f64)>;

/// One append target of the playback sink (a source buffer).
///
/// `append` and `remove` start asynchronous updates: `updating()` turns
/// true until the sink fires `updateend`. Callers must not submit while
/// an update is running; the feeder serializes for the whole pipeline.
pub trait TrackBuffer: Send + Sync {
    fn append(&self, bytes: Bytes) -> SinkResult<()>;
    fn remove(&self, start_s: f64, end_s: f64) -> SinkResult<()>;
    fn buffered(&self) -> TimeRanges;
    fn updating(&self) -> bool;
    /// Fired after every completed append or remove.
    fn updateend(&self) -> broadcast::Receiver<()>;
}

/// The playback sink: two track buffers plus the playhead.
#[async_trait]
pub trait MediaSink: Send + Sync {
    fn video(&self) -> Arc<dyn TrackBuffer>;
    fn audio(&self) -> Arc<dyn TrackBuffer>;

    fn current_time_s(&self) -> f64;
    /// Fired whenever the playhead time changes.
    fn timeupdate(&self) -> broadcast::Receiver<f64>;

    fn paused(&self) -> bool;
    /// Request playback; the host may deny.
    async fn play(&self) -> SinkResult<()>;
}

/// End of the earliest buffered range, if any.
#[must_use]
pub fn buffered_end(ranges: &TimeRanges) -> Option<f64> {
    ranges.last().map(|(_, end)| *end)
}

/// Start of the earliest buffered range, if any.
#[must_use]
pub fn buffered_start(ranges: &TimeRanges) -> Option<f64> {
    ranges.first().map(|(start, _)| *start)
}
