use async_trait::async_trait;
use url::Url;

use crate::error::SegmentsResult;

/// One media segment as declared by the manifest, µs-normalized.
#[derive(Clone, Debug)]
pub struct SegmentEntry {
    pub url: Url,
    pub pts_us: i64,
    pub duration_us: i64,
}

/// Resolved description of one source: init URLs plus ordered media
/// segments per track.
#[derive(Clone, Debug)]
pub struct SourceManifest {
    pub video_init_url: Url,
    pub audio_init_url: Url,
    pub video_segments: Vec<SegmentEntry>,
    pub audio_segments: Vec<SegmentEntry>,
    /// Declared audio codec, RFC 6381 style (e.g. `mp4a.40.2`).
    pub audio_codec: String,
}

impl SourceManifest {
    /// Total declared video duration.
    #[must_use]
    pub fn video_duration_us(&self) -> i64 {
        self.video_segments.iter().map(|s| s.duration_us).sum()
    }
}

/// External manifest collaborator: the grammar parser lives with the host,
/// the pipeline only consumes its resolved output.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn resolve(&self, url: &Url) -> SegmentsResult<SourceManifest>;
}
