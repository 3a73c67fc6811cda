//! Player loop scenarios against the simulated transport
//!
//! Covers state transitions, loop-mode selection, hard cuts and per-track
//! failure absorption.

mod helpers;

use guildplay_common::{GuildEvent, LoopMode, PlayerState};
use guildplay_player::playback::TrackSummary;
use guildplay_player::transport::TransportCall;
use guildplay_player::{Error, Provenance, Track};
use helpers::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_single_track_goes_idle_loading_playing_idle() {
    let h = Harness::new();
    let mut events = h.events();
    let session = h.session().await;

    h.enqueue(&session, vec![meta("a", 80)]).await;

    let mut transitions = Vec::new();
    while transitions.last().map(|(_, new)| *new) != Some(PlayerState::Idle) {
        if let GuildEvent::StateChanged {
            old_state,
            new_state,
            ..
        } = next_matching(&mut events, |e| matches!(e, GuildEvent::StateChanged { .. })).await
        {
            assert!(session.invariant_holds());
            transitions.push((old_state, new_state));
        }
    }

    assert_eq!(
        transitions,
        vec![
            (PlayerState::Idle, PlayerState::Loading),
            (PlayerState::Loading, PlayerState::Playing),
            (PlayerState::Playing, PlayerState::Idle),
        ]
    );
    assert_eq!(session.queue_len(), 0);
    assert_eq!(session.current_id(), None);
    assert!(session.invariant_holds());
}

#[tokio::test]
async fn test_tracks_play_in_order_and_history_records_them() {
    let h = Harness::new();
    let session = h.session().await;

    h.enqueue(&session, vec![meta("a", 40), meta("b", 40), meta("c", 40)])
        .await;

    wait_for("three plays", || h.transport.played_labels().len() == 3).await;
    wait_for("idle", || session.state() == PlayerState::Idle).await;

    assert_eq!(h.transport.played_labels(), vec!["A", "B", "C"]);
    let recent: Vec<String> = session
        .snapshot()
        .recent
        .iter()
        .map(|t: &TrackSummary| t.id.clone())
        .collect();
    assert_eq!(recent, vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_queue_capacity_never_exceeded() {
    let h = Harness::build(
        |_| {},
        guildplay_player::db::StaticSettings::new(100).with_override(GUILD, 3),
        Default::default(),
    );
    let session = h.session().await;

    let mut rejected = 0;
    for i in 0..10 {
        let id = format!("t{i}");
        h.resolver.add(&id, vec![meta(&id, 10_000)]);
        match session.enqueue_query(&id).await {
            Ok(outcome) => assert_eq!(outcome.added, 1),
            Err(Error::QueueFull(3)) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
        assert!(session.queue_len() <= 3);
    }
    assert!(rejected >= 6, "only {rejected} enqueues rejected");
    assert_eq!(session.snapshot().queue_capacity, 3);
}

#[tokio::test]
async fn test_playlist_overflow_is_partially_accepted() {
    let h = Harness::build(
        |_| {},
        guildplay_player::db::StaticSettings::new(4),
        Default::default(),
    );
    let session = h.session().await;
    let playlist = "https://www.youtube.com/playlist?list=PL1";
    h.resolver
        .add(playlist, (0..6).map(|i| meta(&format!("p{i}"), 10_000)).collect());

    let outcome = session.enqueue_query(playlist).await.unwrap();
    assert_eq!(outcome.added, 4);
    assert_eq!(outcome.rejected, 2);
}

#[tokio::test]
async fn test_concurrent_downloads_share_one_fetch() {
    let h = Harness::new();
    h.fetcher.set_delay(Duration::from_millis(50));
    let pipeline = Arc::clone(h.manager.pipeline());

    let tracks: Vec<Track> = (0..8)
        .map(|_| Track::new(meta("shared", 100), Provenance::Search))
        .collect();
    let results =
        futures::future::join_all(tracks.iter().map(|t| pipeline.download(t))).await;

    let first = results[0].as_ref().unwrap().clone();
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), &first);
    }
    assert_eq!(h.fetcher.calls_for("shared"), 1);
}

#[tokio::test]
async fn test_queue_loop_rotates_back_to_original_order() {
    let h = Harness::new();
    let session = h.session().await;
    session.set_loop_mode(LoopMode::Queue).unwrap();

    h.enqueue(&session, vec![meta("a", 60), meta("b", 60)]).await;

    wait_for("five plays", || h.transport.played_labels().len() >= 5).await;
    assert_eq!(
        &h.transport.played_labels()[..5],
        &["A", "B", "A", "B", "A"]
    );
    // Rotated tracks stay in the session and are not fetched again
    assert_eq!(h.fetcher.calls_for("a"), 1);
    assert_eq!(h.fetcher.calls_for("b"), 1);

    session.set_loop_mode(LoopMode::None).unwrap();
    wait_for("idle", || session.state() == PlayerState::Idle).await;
}

#[tokio::test]
async fn test_song_loop_replays_without_queueing() {
    let h = Harness::new();
    let session = h.session().await;
    session.set_loop_mode(LoopMode::Song).unwrap();

    h.enqueue(&session, vec![meta("a", 40)]).await;
    wait_for("a playing", || session.state() == PlayerState::Playing).await;

    wait_for("three plays", || {
        assert!(!session.queue_ids().contains(&"a".to_string()));
        h.transport.played_labels().len() >= 3
    })
    .await;
    assert!(h.transport.played_labels().iter().all(|l| l == "A"));

    session.set_loop_mode(LoopMode::None).unwrap();
    wait_for("idle", || session.state() == PlayerState::Idle).await;
    assert_eq!(h.fetcher.calls_for("a"), 1);
}

#[tokio::test]
async fn test_random_loop_never_plays_from_queue() {
    let h = Harness::new();
    let session = h.session().await;
    session.set_loop_mode(LoopMode::Random).unwrap();

    h.enqueue(&session, vec![meta("a", 40), meta("b", 40), meta("c", 40)])
        .await;

    wait_for("six plays", || {
        let snap = session.snapshot();
        if let Some(current) = &snap.current {
            assert!(
                snap.queue.iter().all(|item| item.track.id != current.id),
                "{} playing while still queued",
                current.id
            );
        }
        h.transport.played_labels().len() >= 6
    })
    .await;
    assert!(session.queue_len() <= 3);
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_skip_without_crossfade_stops_before_next_play() {
    let h = Harness::new();
    let session = h.session().await;

    h.enqueue(&session, vec![meta("a", 10_000), meta("b", 10_000)])
        .await;
    wait_for("a playing", || session.state() == PlayerState::Playing).await;

    session.skip(None).await.unwrap();
    wait_for("b playing", || {
        session.current_id().as_deref() == Some("b") && session.state() == PlayerState::Playing
    })
    .await;

    let calls = h.transport.calls();
    let first_play = position_of(&calls, |c| matches!(c, TransportCall::Play { label, .. } if label == "A"))
        .unwrap();
    let a_stream = match &calls[first_play] {
        TransportCall::Play { stream, .. } => *stream,
        _ => unreachable!(),
    };
    let stop_a = position_of(&calls, |c| *c == TransportCall::Stop { stream: a_stream }).unwrap();
    let play_b =
        position_of(&calls, |c| matches!(c, TransportCall::Play { label, .. } if label == "B"))
            .unwrap();
    assert!(stop_a < play_b);
    assert_eq!(h.transport.active_streams().len(), 1);
}

#[tokio::test]
async fn test_natural_end_precedes_next_play() {
    let h = Harness::new();
    let session = h.session().await;

    h.enqueue(&session, vec![meta("a", 50), meta("b", 50)]).await;
    wait_for("both played", || h.transport.played_labels().len() == 2).await;

    let calls = h.transport.calls();
    let ended = position_of(&calls, |c| matches!(c, TransportCall::Ended { .. })).unwrap();
    let play_b =
        position_of(&calls, |c| matches!(c, TransportCall::Play { label, .. } if label == "B"))
            .unwrap();
    assert!(ended < play_b);
}

#[tokio::test]
async fn test_skip_to_position_drops_preceding_tracks() {
    let h = Harness::new();
    let session = h.session().await;

    h.enqueue(
        &session,
        vec![
            meta("a", 10_000),
            meta("b", 10_000),
            meta("c", 10_000),
            meta("d", 10_000),
        ],
    )
    .await;
    wait_for("a playing", || session.state() == PlayerState::Playing).await;

    session.skip(Some(2)).await.unwrap();
    wait_for("c playing", || session.current_id().as_deref() == Some("c")).await;
    assert_eq!(session.queue_ids(), vec!["d"]);

    assert!(matches!(
        session.skip(Some(9)).await,
        Err(Error::InvalidPosition(9))
    ));
}

#[tokio::test]
async fn test_failed_download_is_dropped_and_next_plays() {
    let h = Harness::new();
    h.fetcher.fail("a");
    let mut events = h.events();
    let session = h.session().await;

    h.enqueue(&session, vec![meta("a", 50), meta("b", 50)]).await;

    let failed = next_matching(&mut events, |e| matches!(e, GuildEvent::TrackFailed { .. })).await;
    assert!(matches!(failed, GuildEvent::TrackFailed { ref track_id, .. } if track_id == "a"));
    let started = next_matching(&mut events, |e| matches!(e, GuildEvent::TrackStarted { .. })).await;
    assert!(matches!(started, GuildEvent::TrackStarted { ref track_id, .. } if track_id == "b"));

    wait_for("idle", || session.state() == PlayerState::Idle).await;
    assert_eq!(h.transport.played_labels(), vec!["B"]);
    assert_eq!(h.fetcher.calls_for("a"), 1);
}

#[tokio::test]
async fn test_hanging_download_times_out_and_next_plays() {
    let h = Harness::with_config(|c| c.downloads.timeout_ms = 150);
    h.fetcher.hang("a");
    let mut events = h.events();
    let session = h.session().await;

    h.enqueue(&session, vec![meta("a", 50), meta("b", 50)]).await;

    let failed = next_matching(&mut events, |e| matches!(e, GuildEvent::TrackFailed { .. })).await;
    assert!(matches!(failed, GuildEvent::TrackFailed { ref track_id, .. } if track_id == "a"));
    wait_for("b played", || h.transport.played_labels() == vec!["B"]).await;
    assert!(session.invariant_holds());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_tracks_release_cache_references() {
    let h = Harness::new();
    let session = h.session().await;
    let cache = h.manager.pipeline().cache().clone();

    for i in 0..20 {
        let id = format!("gone{i}");
        h.fetcher.fail(&id);
        h.enqueue(&session, vec![meta(&id, 50)]).await;
        wait_for("reference released", || cache.references(&id) == 0).await;
    }
    wait_for("idle", || session.state() == PlayerState::Idle).await;
    assert!(h.transport.played_labels().is_empty());
}

#[tokio::test]
async fn test_slow_stream_start_counts_as_failure() {
    let h = Harness::with_config(|c| c.playback.startup_timeout_ms = 100);
    h.transport.set_startup_delay(Duration::from_millis(400));
    let mut events = h.events();
    let session = h.session().await;

    h.enqueue(&session, vec![meta("a", 50)]).await;
    let failed = next_matching(&mut events, |e| matches!(e, GuildEvent::TrackFailed { .. })).await;
    assert!(matches!(failed, GuildEvent::TrackFailed { ref track_id, .. } if track_id == "a"));
    wait_for("idle", || session.state() == PlayerState::Idle).await;
    assert!(h.transport.played_labels().is_empty());

    h.transport.set_startup_delay(Duration::ZERO);
    h.enqueue(&session, vec![meta("b", 50)]).await;
    wait_for("b played", || h.transport.played_labels() == vec!["B"]).await;
}

#[tokio::test]
async fn test_transport_refusal_leaves_session_idle_until_next_intent() {
    let h = Harness::new();
    let session = h.session().await;
    h.transport.fail_next_plays(1);

    h.enqueue(&session, vec![meta("a", 50)]).await;
    wait_for("idle after refusal", || {
        session.state() == PlayerState::Idle && h.fetcher.calls_for("a") == 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.transport.played_labels().is_empty());

    h.enqueue(&session, vec![meta("b", 50)]).await;
    wait_for("b played", || h.transport.played_labels() == vec!["B"]).await;
}

#[tokio::test]
async fn test_pause_and_resume() {
    let h = Harness::new();
    let session = h.session().await;

    assert!(matches!(session.pause().await, Err(Error::InvalidState(_))));

    h.enqueue(&session, vec![meta("a", 10_000)]).await;
    wait_for("playing", || session.state() == PlayerState::Playing).await;

    let snap = session.pause().await.unwrap();
    assert_eq!(snap.state, PlayerState::Paused);
    assert!(snap.is_paused);
    assert!(session.invariant_holds());
    assert!(matches!(session.pause().await, Err(Error::InvalidState(_))));

    let snap = session.resume().await.unwrap();
    assert_eq!(snap.state, PlayerState::Playing);
    assert!(h.transport.calls().contains(&TransportCall::Resume));
    assert!(matches!(session.resume().await, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_stop_clears_queue_and_goes_idle() {
    let h = Harness::new();
    let session = h.session().await;

    h.enqueue(&session, vec![meta("a", 10_000), meta("b", 10_000)])
        .await;
    wait_for("playing", || session.state() == PlayerState::Playing).await;

    let snap = session.stop().await.unwrap();
    assert!(snap.is_idle());
    assert_eq!(snap.queue_size, 0);
    assert!(h.transport.active_streams().is_empty());
}

#[tokio::test]
async fn test_queue_intents() {
    let h = Harness::new();
    let session = h.session().await;

    h.enqueue(
        &session,
        vec![
            meta("a", 10_000),
            meta("b", 10_000),
            meta("c", 10_000),
            meta("d", 10_000),
        ],
    )
    .await;
    wait_for("a playing", || session.state() == PlayerState::Playing).await;

    session.remove(2).await.unwrap();
    assert_eq!(session.queue_ids(), vec!["b", "d"]);
    assert!(matches!(session.remove(5).await, Err(Error::InvalidPosition(5))));

    session.shuffle().unwrap();
    let mut ids = session.queue_ids();
    ids.sort();
    assert_eq!(ids, vec!["b", "d"]);

    assert!(matches!(
        session.set_volume(1.5),
        Err(Error::InvalidVolume(_))
    ));
    let snap = session.set_volume(0.3).unwrap();
    assert_eq!(snap.volume, 30);

    let snap = session.clear().await.unwrap();
    assert_eq!(snap.queue_size, 0);
    assert_eq!(session.current_id().as_deref(), Some("a"));

    let snap = session.toggle_crossfade().unwrap();
    assert!(snap.crossfade);
    let snap = session
        .set_crossfade(false, Some(Duration::from_millis(250)))
        .unwrap();
    assert!(!snap.crossfade);
    assert_eq!(snap.crossfade_ms, 250);

    assert!(matches!(session.ensure_can_speak(), Err(Error::Busy(_))));
    session.stop().await.unwrap();
    session.ensure_can_speak().unwrap();
}

#[tokio::test]
async fn test_volume_reaches_live_stream() {
    let h = Harness::new();
    let session = h.session().await;

    h.enqueue(&session, vec![meta("a", 10_000)]).await;
    wait_for("playing", || session.state() == PlayerState::Playing).await;
    let stream = h.transport.active_streams()[0];

    session.set_volume(0.8).unwrap();
    wait_for("gain applied", || h.transport.gain_of(stream) == Some(0.8)).await;
}
