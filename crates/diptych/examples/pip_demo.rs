//! Run the full pipeline against in-process fixtures.
//!
//! ```
//! cargo run -p diptych --example pip_demo
//! ```
//!
//! Serves two synthetic fMP4 sources from a local fixture server, wires
//! the software codec engine and the in-memory sink, plays both to the
//! end with one audio switch in between, and prints the host events.

use std::{collections::HashMap, error::Error, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use bytes::Bytes;
use diptych::{Event, PipelineEvent, Player, PlayerConfig, SourceId, TrackKind};
use diptych_codec::{mock::MockEngine, CodecEngine};
use diptych_demux::test_support::{init_segment, media_segment};
use diptych_segments::{ManifestSource, SegmentEntry, SegmentsError, SegmentsResult, SourceManifest};
use diptych_sink::{mock::MockSink, MediaSink};
use tokio::net::TcpListener;
use tracing::{info, metadata::LevelFilter};
use tracing_subscriber::EnvFilter;
use url::Url;

const SEGMENTS: usize = 3;

fn fixture_files(prefix: &str) -> HashMap<String, Bytes> {
    let mut files = HashMap::new();
    files.insert(
        format!("/{prefix}/v_init.mp4"),
        init_segment(TrackKind::Video, 1_000),
    );
    files.insert(
        format!("/{prefix}/a_init.mp4"),
        init_segment(TrackKind::Audio, 48_000),
    );
    for i in 0..SEGMENTS {
        files.insert(
            format!("/{prefix}/v_{i}.m4s"),
            media_segment(i as u64 * 1_980, 60, 33, 24, true).bytes,
        );
        files.insert(
            format!("/{prefix}/a_{i}.m4s"),
            media_segment(i as u64 * 96_000, 100, 960, 12, false).bytes,
        );
    }
    files
}

struct FixtureManifests {
    base: Url,
}

#[async_trait]
impl ManifestSource for FixtureManifests {
    async fn resolve(&self, url: &Url) -> SegmentsResult<SourceManifest> {
        let prefix = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .ok_or_else(|| SegmentsError::Manifest(format!("no source prefix in {url}")))?
            .to_string();
        let join = |rel: String| {
            self.base
                .join(&rel)
                .map_err(|e| SegmentsError::Manifest(e.to_string()))
        };
        Ok(SourceManifest {
            video_init_url: join(format!("{prefix}/v_init.mp4"))?,
            audio_init_url: join(format!("{prefix}/a_init.mp4"))?,
            video_segments: (0..SEGMENTS)
                .map(|i| {
                    Ok(SegmentEntry {
                        url: join(format!("{prefix}/v_{i}.m4s"))?,
                        pts_us: i as i64 * 1_980_000,
                        duration_us: 1_980_000,
                    })
                })
                .collect::<SegmentsResult<_>>()?,
            audio_segments: (0..SEGMENTS)
                .map(|i| {
                    Ok(SegmentEntry {
                        url: join(format!("{prefix}/a_{i}.m4s"))?,
                        pts_us: i as i64 * 2_000_000,
                        duration_us: 2_000_000,
                    })
                })
                .collect::<SegmentsResult<_>>()?,
            audio_codec: "mp4a.40.2".to_string(),
        })
    }
}

async fn serve_fixtures() -> Result<Url, Box<dyn Error + Send + Sync>> {
    async fn handler(
        State(files): State<Arc<HashMap<String, Bytes>>>,
        uri: axum::http::Uri,
    ) -> impl IntoResponse {
        files.get(uri.path()).map_or_else(
            || (StatusCode::NOT_FOUND, Bytes::new()),
            |bytes| (StatusCode::OK, bytes.clone()),
        )
    }

    let mut files = fixture_files("a");
    files.extend(fixture_files("b"));
    let app = Router::new()
        .fallback(get(handler))
        .with_state(Arc::new(files));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok(Url::parse(&format!("http://{addr}/"))?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("diptych=debug".parse()?)
                .add_directive(LevelFilter::INFO.into()),
        )
        .with_line_number(false)
        .with_file(false)
        .init();

    let base = serve_fixtures().await?;
    info!(%base, "fixture server up");

    let engine = MockEngine::new();
    let sink = MockSink::new();
    let config = PlayerConfig::new(
        Arc::new(FixtureManifests { base: base.clone() }),
        Arc::clone(&engine) as Arc<dyn CodecEngine>,
        Arc::new(Arc::clone(&sink)) as Arc<dyn MediaSink>,
    );

    let mut player = Player::new(config);
    let mut events = player.events();
    player.load(&base.join("a")?, &base.join("b")?).await?;

    // Swap picture and audio to source B partway through.
    let swap_sink = Arc::clone(&sink);
    let swap = async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        swap_sink.set_current_time(2.0);
        player.set_swapped(true).await;
        player.set_active(SourceId::B).await;
        info!("swapped to source B");
    };

    let watch = async {
        loop {
            match events.recv().await {
                Ok(Event::Pipeline(PipelineEvent::Finished { frames_encoded })) => {
                    info!(frames_encoded, "pipeline finished");
                    break;
                }
                Ok(event) => info!(?event, "event"),
                Err(e) => {
                    info!(error = %e, "event stream ended");
                    break;
                }
            }
        }
    };
    tokio::join!(swap, watch);

    player.destroy().await;
    info!(
        created = engine.frame_lot().created(),
        released = engine.frame_lot().released(),
        "frame ledger balanced"
    );
    Ok(())
}
