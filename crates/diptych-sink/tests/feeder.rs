//! Feeder discipline against the mock sink.

use std::{sync::Arc, time::Duration};

use bytes::{BufMut, BytesMut};
use diptych_core::TrackKind;
use diptych_events::{Event, EventBus, PlayerEvent};
use diptych_mux::ContainerChunk;
use diptych_sink::{mock::MockSink, FeederCommand, MediaSink, SinkFeeder, TrackBuffer};
use tokio_util::sync::CancellationToken;

/// A one-block cluster chunk spanning `[start_ms, start_ms + 40 ms]`.
fn cluster_chunk(start_ms: u64) -> ContainerChunk {
    let mut block = BytesMut::new();
    block.put_u8(0x81);
    block.put_i16(0);
    block.put_u8(0x80);
    block.put_slice(b"payload");

    let mut cluster_body = BytesMut::new();
    // Timestamp element.
    cluster_body.put_u8(0xE7);
    cluster_body.put_u8(0x88);
    cluster_body.put_u64(start_ms);
    // SimpleBlock element.
    cluster_body.put_u8(0xA3);
    cluster_body.put_u8(0x80 | block.len() as u8);
    cluster_body.put_slice(&block);

    let mut bytes = BytesMut::new();
    bytes.put_slice(&[0x1F, 0x43, 0xB6, 0x75]);
    bytes.put_u8(0x80 | cluster_body.len() as u8);
    bytes.put_slice(&cluster_body);
    ContainerChunk {
        bytes: bytes.freeze(),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test(start_paused = true)]
async fn appends_flow_and_emit_buffer_updates() {
    let sink = MockSink::new();
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let (handle, _join) = SinkFeeder::spawn(
        TrackKind::Audio,
        Arc::new(Arc::clone(&sink)),
        bus,
        CancellationToken::new(),
    );

    handle.chunks.send(cluster_chunk(0)).await.unwrap();
    handle.chunks.send(cluster_chunk(40)).await.unwrap();
    settle().await;

    let buffered = sink.audio_buffer().buffered();
    assert_eq!(buffered.len(), 1);
    assert!(buffered[0].1 > 0.07);

    let mut buffer_updates = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::Player(PlayerEvent::BufferUpdate { .. })) {
            buffer_updates += 1;
        }
    }
    assert_eq!(buffer_updates, 2);
}

#[tokio::test(start_paused = true)]
async fn lookahead_cap_defers_appends() {
    let sink = MockSink::new();
    sink.video_buffer().force_buffered(vec![(0.0, 31.0)]);
    let (handle, _join) = SinkFeeder::spawn(
        TrackKind::Video,
        Arc::new(Arc::clone(&sink)),
        EventBus::new(16),
        CancellationToken::new(),
    );

    handle.chunks.send(cluster_chunk(31_000)).await.unwrap();
    settle().await;

    // Playhead at zero, 31 s buffered: past the 30 s cap, nothing appends.
    assert_eq!(sink.video_buffer().buffered(), vec![(0.0, 31.0)]);

    // Playhead advances; the deferred chunk goes in on the next pump
    // (driven by the following append arrival).
    sink.set_current_time(5.0);
    handle.chunks.send(cluster_chunk(31_040)).await.unwrap();
    settle().await;
    assert!(sink.video_buffer().buffered()[0].1 > 31.0);
}

#[tokio::test(start_paused = true)]
async fn trim_behind_keeps_sliding_window() {
    let sink = MockSink::new();
    sink.video_buffer().force_buffered(vec![(0.0, 12.0)]);
    sink.set_current_time(11.0);
    let (handle, _join) = SinkFeeder::spawn(
        TrackKind::Video,
        Arc::new(Arc::clone(&sink)),
        EventBus::new(16),
        CancellationToken::new(),
    );

    // The append's updateend triggers the trim pass.
    handle.chunks.send(cluster_chunk(12_000)).await.unwrap();
    settle().await;

    let buffered = sink.video_buffer().buffered();
    assert!(
        buffered[0].0 >= 1.0 - f64::EPSILON,
        "expected trim to 11 − 10 = 1 s, got {buffered:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn trim_at_exactly_ten_seconds_is_a_noop() {
    let sink = MockSink::new();
    sink.video_buffer().force_buffered(vec![(0.0, 12.0)]);
    sink.set_current_time(10.0);
    let (handle, _join) = SinkFeeder::spawn(
        TrackKind::Video,
        Arc::new(Arc::clone(&sink)),
        EventBus::new(16),
        CancellationToken::new(),
    );

    handle.chunks.send(cluster_chunk(12_000)).await.unwrap();
    settle().await;
    // threshold = 10.0 − 10.0 = 0: nothing to trim yet.
    assert_eq!(sink.video_buffer().buffered()[0].0, 0.0);

    // One millisecond later the minimal range goes.
    sink.set_current_time(10.001);
    handle.chunks.send(cluster_chunk(12_040)).await.unwrap();
    settle().await;
    let start = sink.video_buffer().buffered()[0].0;
    assert!((start - 0.001).abs() < 1e-9, "start = {start}");
}

#[tokio::test(start_paused = true)]
async fn clear_command_removes_buffered_tail() {
    let sink = MockSink::new();
    sink.audio_buffer().force_buffered(vec![(0.0, 8.0)]);
    let (handle, _join) = SinkFeeder::spawn(
        TrackKind::Audio,
        Arc::new(Arc::clone(&sink)),
        EventBus::new(16),
        CancellationToken::new(),
    );

    handle
        .commands
        .send(FeederCommand::Clear { from_s: 3.1 })
        .await
        .unwrap();
    settle().await;

    assert_eq!(sink.audio_buffer().buffered(), vec![(0.0, 3.1)]);
}

#[tokio::test(start_paused = true)]
async fn clear_while_updating_is_deferred_to_updateend() {
    let sink = MockSink::new();
    sink.audio_buffer().force_buffered(vec![(0.0, 8.0)]);
    let (handle, _join) = SinkFeeder::spawn(
        TrackKind::Audio,
        Arc::new(Arc::clone(&sink)),
        EventBus::new(16),
        CancellationToken::new(),
    );

    // Occupy the buffer with an append, then ask for the clear while the
    // update is still running.
    let buffer = sink.audio_buffer();
    TrackBuffer::append(&buffer, cluster_chunk(8_000).bytes).unwrap();
    assert!(TrackBuffer::updating(&buffer));
    handle
        .commands
        .send(FeederCommand::Clear { from_s: 3.1 })
        .await
        .unwrap();
    settle().await;

    let buffered = sink.audio_buffer().buffered();
    assert_eq!(buffered, vec![(0.0, 3.1)]);
}

#[tokio::test(start_paused = true)]
async fn rejected_append_retries_then_goes_fatal() {
    let sink = MockSink::new();
    sink.audio_buffer().reject_next(10);
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let (handle, join) = SinkFeeder::spawn(
        TrackKind::Audio,
        Arc::new(Arc::clone(&sink)),
        bus,
        CancellationToken::new(),
    );

    for i in 0..3 {
        handle.chunks.send(cluster_chunk(i * 40)).await.unwrap();
    }
    settle().await;
    join.await.unwrap();

    let mut fatal = false;
    while let Ok(event) = events.try_recv() {
        if let Event::Player(PlayerEvent::Error { kind, .. }) = event {
            assert_eq!(kind, diptych_core::FaultKind::SinkRejected);
            fatal = true;
        }
    }
    assert!(fatal, "three consecutive rejects must surface as fatal");
}

#[tokio::test(start_paused = true)]
async fn autoplay_fires_once_past_half_second() {
    let sink = MockSink::new();
    let (handle, _join) = SinkFeeder::spawn(
        TrackKind::Video,
        Arc::new(Arc::clone(&sink)),
        EventBus::new(16),
        CancellationToken::new(),
    );

    assert!(sink.paused());
    handle.chunks.send(cluster_chunk(0)).await.unwrap();
    handle.chunks.send(cluster_chunk(600)).await.unwrap();
    settle().await;

    assert!(!sink.paused());
    assert_eq!(sink.play_requests(), 1);

    // Further appends never re-request playback.
    handle.chunks.send(cluster_chunk(1_200)).await.unwrap();
    settle().await;
    assert_eq!(sink.play_requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn denied_autoplay_is_not_retried() {
    let sink = MockSink::new();
    sink.deny_play();
    let (handle, _join) = SinkFeeder::spawn(
        TrackKind::Video,
        Arc::new(Arc::clone(&sink)),
        EventBus::new(16),
        CancellationToken::new(),
    );

    for i in 0..5 {
        handle.chunks.send(cluster_chunk(i * 600)).await.unwrap();
    }
    settle().await;

    assert!(sink.paused());
    assert_eq!(sink.play_requests(), 1);
}
