use std::fmt;

use thiserror::Error;

/// User-visible fault categories, surfaced through the host event channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum FaultKind {
    /// Segment transport failed after the retry.
    #[error("network failure")]
    NetworkFailure,
    /// Container bytes the demuxer could not make sense of.
    #[error("malformed container data")]
    DemuxMalformed,
    /// The host decoder rejected a codec configuration.
    #[error("unsupported codec")]
    CodecUnsupported,
    /// Video encoder input queue overran; the frame was dropped.
    #[error("encoder saturated")]
    EncoderSaturation,
    /// The playback sink rejected an append.
    #[error("sink rejected append")]
    SinkRejected,
    /// The muxer observed a backward timestamp.
    #[error("muxer timestamp out of order")]
    MuxerOutOfOrder,
    /// Teardown in progress; unwound silently.
    #[error("aborted")]
    Aborted,
}

/// Fault plus human-readable context, as delivered to the host.
#[derive(Clone, Debug)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
