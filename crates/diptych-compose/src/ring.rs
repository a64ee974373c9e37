//! Per-source ring of recent audio, kept for seamless switch-over.

use std::collections::VecDeque;

use diptych_codec::RawAudioFrame;
use diptych_core::consts;

/// Bounded FIFO of duplicated audio frames (≤ 60 s at 20 ms grains).
///
/// Entries are owned; eviction, switch consumption and drop all release
/// them.
pub struct AudioRing {
    entries: VecDeque<RawAudioFrame>,
    cap: usize,
}

impl AudioRing {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(consts::AUDIO_RING_CAP)
    }

    #[must_use]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap.min(4096)),
            cap,
        }
    }

    /// Append one entry, releasing the oldest beyond the cap.
    pub fn push(&mut self, frame: RawAudioFrame) {
        if self.entries.len() == self.cap {
            if let Some(oldest) = self.entries.pop_front() {
                oldest.release();
            }
        }
        self.entries.push_back(frame);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every entry, oldest first. The caller owns (and releases)
    /// them.
    pub fn drain(&mut self) -> Vec<RawAudioFrame> {
        self.entries.drain(..).collect()
    }

    /// Release every entry in place.
    pub fn clear(&mut self) {
        for frame in self.entries.drain(..) {
            frame.release();
        }
    }

    /// Replay start index for a switch at `t_us`: one 20 ms entry per
    /// grain since the start of the stream, clamped into the ring.
    #[must_use]
    pub fn replay_index(&self, t_us: i64) -> usize {
        let index = (t_us / consts::AUDIO_GRAIN_US).max(0) as usize;
        index.min(self.entries.len().saturating_sub(1))
    }
}

impl Default for AudioRing {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioRing {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use diptych_codec::{FrameLot, PlanarPcm};

    use super::*;

    fn frame(lot: &std::sync::Arc<FrameLot>, pts_us: i64) -> RawAudioFrame {
        RawAudioFrame::new(lot, pts_us, 20_000, PlanarPcm::silence(48_000, 2, 960))
    }

    #[test]
    fn overflow_releases_oldest() {
        let lot = FrameLot::new();
        let mut ring = AudioRing::with_capacity(3);
        for i in 0..5 {
            ring.push(frame(&lot, i * 20_000));
        }
        assert_eq!(ring.len(), 3);
        // Two evicted and released, three alive.
        assert_eq!(lot.outstanding(), 3);

        let entries = ring.drain();
        assert_eq!(entries[0].pts_us, 40_000);
        for entry in entries {
            entry.release();
        }
        assert_eq!(lot.outstanding(), 0);
    }

    #[test]
    fn ring_never_exceeds_cap() {
        let lot = FrameLot::new();
        let mut ring = AudioRing::new();
        for i in 0..4_000 {
            ring.push(frame(&lot, i * 20_000));
            assert!(ring.len() <= consts::AUDIO_RING_CAP);
        }
        assert_eq!(ring.len(), consts::AUDIO_RING_CAP);
    }

    #[test]
    fn replay_index_is_time_divided_by_grain_clamped() {
        let lot = FrameLot::new();
        let mut ring = AudioRing::new();
        for i in 0..200 {
            ring.push(frame(&lot, i * 20_000));
        }
        assert_eq!(ring.replay_index(3_000_000), 150);
        assert_eq!(ring.replay_index(0), 0);
        assert_eq!(ring.replay_index(100_000_000), 199);
    }

    #[test]
    fn drop_releases_everything() {
        let lot = FrameLot::new();
        {
            let mut ring = AudioRing::new();
            for i in 0..10 {
                ring.push(frame(&lot, i * 20_000));
            }
        }
        assert_eq!(lot.outstanding(), 0);
    }
}
