//! End-to-end player scenarios: real HTTP fixtures, mock codec engine,
//! mock sink.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use bytes::Bytes;
use diptych::{Event, PipelineEvent, Player, PlayerConfig, PlayerEvent, SourceId};
use diptych_codec::{mock::MockEngine, CodecEngine};
use diptych_demux::test_support::{audio_init_segment, init_segment, media_segment};
use diptych_segments::{ManifestSource, SegmentEntry, SegmentsError, SegmentsResult, SourceManifest};
use diptych_sink::{mock::MockSink, MediaSink, TrackBuffer};
use diptych_core::TrackKind;
use tokio::{net::TcpListener, sync::broadcast, time::timeout};
use url::Url;

/// Per-source fixture content: 1.98 s video / 2 s audio segments.
fn fixture_files(prefix: &str, segments: usize, audio_asc: &[u8]) -> HashMap<String, Bytes> {
    let mut files = HashMap::new();
    files.insert(
        format!("/{prefix}/v_init.mp4"),
        init_segment(TrackKind::Video, 1_000),
    );
    files.insert(
        format!("/{prefix}/a_init.mp4"),
        audio_init_segment(48_000, audio_asc),
    );
    for i in 0..segments {
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

async fn serve(files: HashMap<String, Bytes>) -> Url {
    async fn handler(
        State(files): State<Arc<HashMap<String, Bytes>>>,
        uri: axum::http::Uri,
    ) -> impl IntoResponse {
        files.get(uri.path()).map_or_else(
            || (StatusCode::NOT_FOUND, Bytes::new()),
            |bytes| (StatusCode::OK, bytes.clone()),
        )
    }

    let app = Router::new()
        .fallback(get(handler))
        .with_state(Arc::new(files));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

/// Manifest source mapping `…/{prefix}` onto the fixture layout.
struct FixtureManifests {
    base: Url,
    segments: usize,
}

#[async_trait]
impl ManifestSource for FixtureManifests {
    async fn resolve(&self, url: &Url) -> SegmentsResult<SourceManifest> {
        let prefix = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|s| !s.is_empty())
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
            video_segments: (0..self.segments)
                .map(|i| {
                    Ok(SegmentEntry {
                        url: join(format!("{prefix}/v_{i}.m4s"))?,
                        pts_us: i as i64 * 1_980_000,
                        duration_us: 1_980_000,
                    })
                })
                .collect::<SegmentsResult<_>>()?,
            audio_segments: (0..self.segments)
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

struct World {
    player: Player,
    engine: Arc<MockEngine>,
    sink: Arc<MockSink>,
    events: broadcast::Receiver<Event>,
    url_a: Url,
    url_b: Url,
}

async fn world(segments: usize, audio_asc_b: &[u8]) -> World {
    let mut files = fixture_files("a", segments, &[0x11, 0x90]);
    files.extend(fixture_files("b", segments, audio_asc_b));
    let base = serve(files).await;

    let engine = MockEngine::new();
    let sink = MockSink::new();
    let config = PlayerConfig::new(
        Arc::new(FixtureManifests {
            base: base.clone(),
            segments,
        }),
        Arc::clone(&engine) as Arc<dyn CodecEngine>,
        Arc::new(Arc::clone(&sink)) as Arc<dyn MediaSink>,
    );
    let player = Player::new(config);
    let events = player.events();

    World {
        player,
        engine,
        sink,
        events,
        url_a: base.join("a").unwrap(),
        url_b: base.join("b").unwrap(),
    }
}

/// Wait for the compositor to report completion, collecting every event
/// seen on the way.
async fn wait_for_finish(events: &mut broadcast::Receiver<Event>) -> (u64, Vec<Event>) {
    let deadline = Duration::from_secs(30);
    timeout(deadline, async {
        let mut seen = Vec::new();
        loop {
            match events.recv().await {
                Ok(Event::Pipeline(PipelineEvent::Finished { frames_encoded })) => {
                    return (frames_encoded, seen);
                }
                Ok(event) => seen.push(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("pipeline finished within the deadline")
}

#[tokio::test(flavor = "multi_thread")]
async fn cold_start_plays_both_sources_to_the_end() {
    let mut w = world(2, &[0x11, 0x90]).await;
    w.player.load(&w.url_a, &w.url_b).await.unwrap();

    let (frames, seen) = wait_for_finish(&mut w.events).await;
    // Two 1.98 s segments at 30 fps: about 119 composited frames. A few
    // extra single-source ticks are possible when one pipeline briefly
    // outruns the other.
    assert!((118..=150).contains(&frames), "frames = {frames}");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let video = w.sink.video_buffer().buffered();
    assert!(!video.is_empty());
    assert!(video.last().unwrap().1 >= 3.0, "video buffered {video:?}");
    let audio = w.sink.audio_buffer().buffered();
    assert!(!audio.is_empty());

    // Auto-play fired once the buffer crossed half a second.
    assert!(!w.sink.paused());
    assert_eq!(w.sink.play_requests(), 1);

    // Successful appends surfaced as BufferUpdate along the way.
    let mut buffer_updates = seen
        .iter()
        .filter(|e| matches!(e, Event::Player(PlayerEvent::BufferUpdate { .. })))
        .count();
    while let Ok(event) = w.events.try_recv() {
        if matches!(event, Event::Player(PlayerEvent::BufferUpdate { .. })) {
            buffer_updates += 1;
        }
    }
    assert!(buffer_updates > 0);

    w.player.destroy().await;
    assert_eq!(w.engine.frame_lot().outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn load_is_rejected_while_loaded() {
    let mut w = world(1, &[0x11, 0x90]).await;
    w.player.load(&w.url_a, &w.url_b).await.unwrap();
    assert!(matches!(
        w.player.load(&w.url_a, &w.url_b).await,
        Err(diptych::PlayerError::AlreadyLoaded)
    ));
    w.player.destroy().await;

    // After destroy, loading again is allowed.
    w.player.load(&w.url_a, &w.url_b).await.unwrap();
    w.player.destroy().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn switching_active_source_fires_one_event() {
    let mut w = world(2, &[0x11, 0x90]).await;
    w.player.load(&w.url_a, &w.url_b).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    w.player.set_active(SourceId::B).await;
    w.player.set_active(SourceId::B).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut switches = 0;
    while let Ok(event) = w.events.try_recv() {
        if let Event::Player(PlayerEvent::ActiveSourceChanged { source }) = event {
            assert_eq!(source, SourceId::B);
            switches += 1;
        }
    }
    assert_eq!(switches, 1);

    w.player.destroy().await;
    assert_eq!(w.engine.frame_lot().outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn destroy_mid_stream_unwinds_silently() {
    let mut w = world(30, &[0x11, 0x90]).await;
    w.player.load(&w.url_a, &w.url_b).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    w.player.destroy().await;
    while w.events.try_recv().is_ok() {}

    // No further buffer activity once destroy returns.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(w.events.try_recv().is_err());
    assert_eq!(w.engine.frame_lot().outstanding(), 0);

    // Destroy is idempotent.
    w.player.destroy().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unsupported_audio_on_one_source_keeps_the_rest_alive() {
    // Source B declares ER AAC ELD (mp4a.40.34); the mock host rejects
    // it, so B plays video-only.
    let mut w = world(2, &[0xF8, 0x46, 0x40]).await;
    w.player.load(&w.url_a, &w.url_b).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Switching to the audio-less source still fires the event; its
    // ring is empty, so the spliced buffer simply stays cleared.
    w.player.set_active(SourceId::B).await;

    let (frames, mut seen) = wait_for_finish(&mut w.events).await;
    assert!(frames > 100, "video kept running, frames = {frames}");
    while let Ok(event) = w.events.try_recv() {
        seen.push(event);
    }

    let mut switch_seen = false;
    let mut audio_closed = false;
    for event in seen {
        match event {
            Event::Player(PlayerEvent::ActiveSourceChanged { source }) => {
                assert_eq!(source, SourceId::B);
                switch_seen = true;
            }
            Event::Pipeline(PipelineEvent::TrackClosed { source, track, .. }) => {
                assert_eq!(source, SourceId::B);
                assert_eq!(track, TrackKind::Audio);
                audio_closed = true;
            }
            _ => {}
        }
    }
    assert!(audio_closed);
    assert!(switch_seen);

    w.player.destroy().await;
    assert_eq!(w.engine.frame_lot().outstanding(), 0);
}
