//! Background music fallback scenarios

mod helpers;

use guildplay_common::{GuildEvent, PlayerState};
use guildplay_player::db::StaticSettings;
use guildplay_player::playback::BackgroundRotation;
use guildplay_player::transport::{StreamId, TransportCall};
use helpers::*;
use std::time::Duration;

fn with_background(files: Vec<std::path::PathBuf>) -> Harness {
    Harness::build(
        |c| {
            c.background.enabled = true;
            c.background.gain = 0.2;
        },
        StaticSettings::new(100),
        BackgroundRotation::new(files),
    )
}

fn filler_stream(calls: &[TransportCall]) -> StreamId {
    calls
        .iter()
        .find_map(|c| match c {
            TransportCall::Play { stream, label, .. } if label.ends_with(".mp3") => Some(*stream),
            _ => None,
        })
        .expect("no filler played")
}

#[tokio::test]
async fn test_filler_starts_after_idle_delay() {
    let (_bg, files) = background_files(&["one.mp3", "two.mp3"]);
    let h = with_background(files);
    let mut events = h.events();
    let session = h.session().await;

    let started = next_matching(&mut events, |e| {
        matches!(e, GuildEvent::BackgroundStarted { .. })
    })
    .await;
    assert!(matches!(started, GuildEvent::BackgroundStarted { ref file, .. } if file.ends_with(".mp3")));
    assert_eq!(session.state(), PlayerState::BackgroundMusic);
    assert!(session.invariant_holds());

    let snap = session.snapshot();
    assert!(snap.current.is_none());
    assert!(snap.background_file.is_some());

    // Faded in to volume * gain
    let stream = filler_stream(&h.transport.calls());
    wait_for("fade-in done", || {
        h.transport
            .gain_of(stream)
            .is_some_and(|g| (g - 0.1).abs() < 1e-6)
    })
    .await;
}

#[tokio::test]
async fn test_enqueue_fades_filler_out_before_track() {
    let (_bg, files) = background_files(&["one.mp3"]);
    let h = with_background(files);
    let session = h.session().await;

    wait_for("background", || session.state() == PlayerState::BackgroundMusic).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    h.enqueue(&session, vec![meta("a", 10_000)]).await;
    wait_for("a playing", || session.state() == PlayerState::Playing).await;

    let calls = h.transport.calls();
    let filler = filler_stream(&calls);
    let stop_filler = calls
        .iter()
        .position(|c| *c == TransportCall::Stop { stream: filler })
        .expect("filler never stopped");
    let play_a = calls
        .iter()
        .position(|c| matches!(c, TransportCall::Play { label, .. } if label == "A"))
        .unwrap();
    assert!(stop_filler < play_a);

    let last_gain = calls[..stop_filler]
        .iter()
        .rev()
        .find_map(|c| match c {
            TransportCall::Gain { stream, gain } if *stream == filler => Some(*gain),
            _ => None,
        })
        .unwrap();
    assert!(last_gain.abs() < 1e-6, "filler stopped at gain {last_gain}");
    assert_eq!(h.transport.active_streams().len(), 1);
}

#[tokio::test]
async fn test_activity_resets_idle_timer() {
    let (_bg, files) = background_files(&["one.mp3"]);
    let h = Harness::build(
        |c| {
            c.background.enabled = true;
            c.background.idle_delay_ms = 200;
        },
        StaticSettings::new(100),
        BackgroundRotation::new(files),
    );
    let session = h.session().await;

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.set_volume(0.4).unwrap();
    }
    assert_eq!(session.state(), PlayerState::Idle);
    assert!(h.transport.played_labels().is_empty());

    wait_for("background", || session.state() == PlayerState::BackgroundMusic).await;
}

#[tokio::test]
async fn test_skip_advances_filler() {
    let (_bg, files) = background_files(&["one.mp3", "two.mp3"]);
    let h = with_background(files);
    let session = h.session().await;

    wait_for("background", || session.state() == PlayerState::BackgroundMusic).await;
    let first = session.snapshot().background_file.unwrap();

    session.skip(None).await.unwrap();
    wait_for("second filler", || h.transport.played_labels().len() == 2).await;

    let labels = h.transport.played_labels();
    assert_eq!(labels[0], first);
    assert_ne!(labels[1], first);
    assert_eq!(session.state(), PlayerState::BackgroundMusic);
    assert_eq!(h.transport.active_streams().len(), 1);
}

#[tokio::test]
async fn test_no_filler_when_disabled() {
    let (_bg, files) = background_files(&["one.mp3"]);
    let h = Harness::build(
        |c| c.background.enabled = false,
        StaticSettings::new(100),
        BackgroundRotation::new(files),
    );
    let session = h.session().await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(session.state(), PlayerState::Idle);
    assert!(h.transport.played_labels().is_empty());
}
