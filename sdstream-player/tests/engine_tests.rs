//! Engine integration tests
//!
//! Run the real producer and output threads against in-memory or on-disk
//! storage. Serialized because every test drives wall-clock playback.

mod helpers;

use helpers::*;
use sdstream_common::events::{EventBus, PlayerEvent};
use sdstream_common::PlayerStateKind;
use sdstream_player::audio::{NullSink, OutputSink, WavFileSink};
use sdstream_player::storage::{FsStorage, MemoryStorage, StorageReader};
use sdstream_player::{Engine, PlayerConfig, StopOutcome};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tokio::time::{sleep, timeout, Instant};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn start(storage: Arc<dyn StorageReader>, sinks: Vec<Box<dyn OutputSink>>) -> (Engine, Receiver<PlayerEvent>) {
    let config = PlayerConfig {
        players: sinks.len(),
        anti_pop_silence: false,
        ..Default::default()
    };
    let events = EventBus::default();
    let rx = events.subscribe();
    let engine = Engine::start(config, storage, sinks, events).expect("engine should start");
    (engine, rx)
}

fn null_sinks(count: usize) -> Vec<Box<dyn OutputSink>> {
    (0..count)
        .map(|_| Box::new(NullSink::new(false)) as Box<dyn OutputSink>)
        .collect()
}

/// Wait for the first event matching `pred`
async fn wait_for<F>(rx: &mut Receiver<PlayerEvent>, mut pred: F) -> PlayerEvent
where
    F: FnMut(&PlayerEvent) -> bool,
{
    timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event channel error: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll until `slot` reports `state`
async fn wait_for_state(engine: &Engine, slot: usize, state: PlayerStateKind) {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while engine.status(slot).unwrap().state != state {
        assert!(Instant::now() < deadline, "player {} never reached {}", slot, state);
        sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
#[serial]
async fn test_short_wav_plays_to_completion() {
    let storage = MemoryStorage::new();
    let (_, bytes) = sine_wav(300);
    storage.insert("beep.wav", bytes);
    let (engine, mut rx) = start(Arc::new(storage.clone()), null_sinks(1));

    engine.play(0, "beep.wav").unwrap();
    let event = wait_for(&mut rx, |e| matches!(e, PlayerEvent::StreamFinished { .. })).await;

    match event {
        PlayerEvent::StreamFinished { slot, name, .. } => {
            assert_eq!(slot, 0);
            assert_eq!(name, "beep.wav");
        }
        other => panic!("unexpected event {:?}", other),
    }

    let status = engine.status(0).unwrap();
    assert_eq!(status.state, PlayerStateKind::Finished);
    assert_eq!(status.samples_played, 13230);
    assert_eq!(storage.open_handles(), 0);
    engine.shutdown().unwrap();
}

#[tokio::test]
#[serial]
async fn test_stop_mid_stream() {
    let storage = MemoryStorage::new();
    let (_, bytes) = sine_wav(10_000);
    storage.insert("long.wav", bytes);
    let (engine, _rx) = start(Arc::new(storage.clone()), null_sinks(1));

    engine.play(0, "long.wav").unwrap();
    wait_for_state(&engine, 0, PlayerStateKind::Streaming).await;

    assert_eq!(engine.stop(0).unwrap(), StopOutcome::Stopped);
    let status = engine.status(0).unwrap();
    assert_eq!(status.state, PlayerStateKind::Finished);
    assert!(status.samples_played < 441_000);
    assert_eq!(storage.open_handles(), 0);

    // a second stop is a no-op
    assert_eq!(engine.stop(0).unwrap(), StopOutcome::NotActive);
    engine.shutdown().unwrap();
}

#[tokio::test]
#[serial]
async fn test_play_replaces_running_stream() {
    let storage = MemoryStorage::new();
    let (_, first) = sine_wav(10_000);
    let (_, second) = sine_wav(10_000);
    storage.insert("first.wav", first);
    storage.insert("second.wav", second);
    let (engine, _rx) = start(Arc::new(storage.clone()), null_sinks(1));

    engine.play(0, "first.wav").unwrap();
    wait_for_state(&engine, 0, PlayerStateKind::Streaming).await;

    engine.play(0, "second.wav").unwrap();
    let deadline = Instant::now() + EVENT_TIMEOUT;
    loop {
        let status = engine.status(0).unwrap();
        if status.state == PlayerStateKind::Streaming && status.name.as_deref() == Some("second.wav") {
            break;
        }
        assert!(Instant::now() < deadline, "second stream never started: {}", status);
        sleep(Duration::from_millis(5)).await;
    }

    // only the new stream holds a handle
    assert_eq!(storage.open_handles(), 1);
    engine.stop(0).unwrap();
    assert_eq!(storage.open_handles(), 0);
    engine.shutdown().unwrap();
}

#[tokio::test]
#[serial]
async fn test_missing_resource_reports_failure() {
    let (engine, mut rx) = start(Arc::new(MemoryStorage::new()), null_sinks(1));

    engine.play(0, "ghost.mp3").unwrap();
    let event = wait_for(&mut rx, |e| matches!(e, PlayerEvent::StreamFailed { .. })).await;

    match event {
        PlayerEvent::StreamFailed { name, reason, .. } => {
            assert_eq!(name, "ghost.mp3");
            assert!(reason.contains("ghost.mp3"), "reason: {}", reason);
        }
        other => panic!("unexpected event {:?}", other),
    }
    wait_for_state(&engine, 0, PlayerStateKind::Error).await;

    // a failed player accepts the next request
    assert_eq!(engine.stop(0).unwrap(), StopOutcome::NotActive);
    engine.shutdown().unwrap();
}

#[tokio::test]
#[serial]
async fn test_players_stream_independently() {
    let storage = MemoryStorage::new();
    let (_, long) = sine_wav(10_000);
    let (_, short) = sine_wav(200);
    storage.insert("long.wav", long);
    storage.insert("short.wav", short);
    let (engine, mut rx) = start(Arc::new(storage.clone()), null_sinks(2));

    engine.play(0, "long.wav").unwrap();
    engine.play(1, "short.wav").unwrap();
    wait_for(&mut rx, |e| matches!(e, PlayerEvent::StreamFinished { slot: 1, .. })).await;

    assert_eq!(engine.status(0).unwrap().state, PlayerStateKind::Streaming);
    assert_eq!(engine.status(1).unwrap().state, PlayerStateKind::Finished);

    let outcomes = engine.stop_all().unwrap();
    assert_eq!(outcomes, vec![StopOutcome::Stopped, StopOutcome::NotActive]);
    assert_eq!(storage.open_handles(), 0);
    engine.shutdown().unwrap();
}

#[tokio::test]
#[serial]
async fn test_render_from_folder_to_wav() {
    let media = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let (source, bytes) = sine_wav(300);
    std::fs::write(media.path().join("tone.wav"), bytes).unwrap();

    let out_path = out.path().join("slot0.wav");
    let sink = WavFileSink::create(&out_path, TEST_SAMPLE_RATE).unwrap();
    let storage = Arc::new(FsStorage::new(media.path()));
    let (engine, mut rx) = start(storage, vec![Box::new(sink)]);

    let names: Vec<String> = engine.list().unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["tone.wav".to_string()]);

    engine.play(0, "tone.wav").unwrap();
    wait_for(&mut rx, |e| matches!(e, PlayerEvent::StreamFinished { .. })).await;
    engine.shutdown().unwrap();

    let mut reader = hound::WavReader::open(&out_path).unwrap();
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().sample_rate, TEST_SAMPLE_RATE);
    let rendered: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();

    assert!(rendered.len() >= source.len());
    assert!(
        rendered.windows(source.len()).any(|w| w == &source[..]),
        "rendered output does not contain the source audio"
    );
}
