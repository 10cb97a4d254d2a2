#[allow(dead_code)]
mod common;

use std::time::Duration;

use common::{Follower, Observer, fast_config};
use mimicry_core::net::messages::ServerMessage;
use mimicry_core::net::protocol::decode_server_message;
use mimicry_core::round::SessionPhase;
use mimicry_hunt::authority::Request;
use mimicry_hunt::config::HuntConfig;
use mimicry_hunt::replication::{FieldChange, StateDelta};
use mimicry_server::session::SessionManager;

#[tokio::test]
async fn observers_receive_identical_delta_streams() {
    let mut mgr = SessionManager::new(fast_config(), HuntConfig::default());
    let mut a = Observer::join(&mut mgr, "Alice");
    let mut b = Observer::join(&mut mgr, "Bob");
    mgr.add_bot().unwrap();
    mgr.add_bot().unwrap();
    mgr.start().unwrap();

    let mut streams = Vec::new();
    for observer in [&mut a, &mut b] {
        let mut deltas = Vec::new();
        while deltas.len() < 10 {
            let data = observer.read_raw().await;
            if let Ok(ServerMessage::StateDelta(_)) = decode_server_message(&data) {
                deltas.push(data);
            }
        }
        streams.push(deltas);
    }
    assert_eq!(streams[0], streams[1]);
    mgr.stop().await;
}

#[tokio::test]
async fn late_joiner_mirror_matches_incremental_mirror() {
    let mut mgr = SessionManager::new(fast_config(), HuntConfig::default());
    let mut a = Observer::join(&mut mgr, "Alice");
    for _ in 0..3 {
        mgr.add_bot().unwrap();
    }
    mgr.start().unwrap();

    let mut early = Follower::default();
    a.read_until(|msg| {
        early.feed(msg);
        early.tick().filter(|&t| t >= 10)
    })
    .await;

    let mut b = Observer::join(&mut mgr, "Late");
    let mut late = Follower::default();
    let base = b
        .read_until(|msg| {
            // The late joiner never sees RoundStart; the config is the default.
            late.feed(msg);
            late.tick()
        })
        .await;
    let target = base + 5;

    let late_tick = b
        .read_until(|msg| {
            late.feed(msg);
            late.tick().filter(|&t| t >= target)
        })
        .await;
    let early_tick = a
        .read_until(|msg| {
            early.feed(msg);
            early.tick().filter(|&t| t >= target)
        })
        .await;
    assert_eq!(early_tick, late_tick);

    let early = early.mirror.unwrap();
    let late = late.mirror.unwrap();
    assert_eq!(early.entities(), late.entities());
    assert_eq!(early.visuals(), late.visuals());
    assert!(
        early
            .entities()
            .values()
            .any(|e| e.connection == b.connection),
        "late joiner should be spawned"
    );
    mgr.stop().await;
}

#[tokio::test]
async fn request_through_session_reaches_authority() {
    let mut mgr = SessionManager::new(fast_config(), HuntConfig::default());
    let mut a = Observer::join(&mut mgr, "Alice");
    mgr.add_bot().unwrap();
    mgr.start().unwrap();

    // Wait out the first full delta so the rename shows up as a change.
    a.read_until(|msg| matches!(msg, ServerMessage::StateDelta(_)).then_some(()))
        .await;

    let frame = a.frame_request(&Request::UpdateName {
        name: "Fern".into(),
    });
    mgr.handle_message(a.connection, &frame).await.unwrap();

    let renamed = a
        .read_until(|msg| {
            let ServerMessage::StateDelta(msg) = msg else {
                return None;
            };
            let delta: StateDelta = rmp_serde::from_slice(&msg.delta_data).ok()?;
            let changed = delta
                .entities
                .iter()
                .flat_map(|d| d.changes.iter())
                .find_map(|c| match c {
                    FieldChange::Name(name) => Some(name.clone()),
                    _ => None,
                });
            changed.or_else(|| {
                delta
                    .added
                    .iter()
                    .find(|e| e.name == "Fern")
                    .map(|e| e.name.clone())
            })
        })
        .await;
    assert_eq!(renamed, "Fern");
    mgr.stop().await;
}

#[tokio::test]
async fn slow_observer_is_resynced_and_converges() {
    let mut mgr = SessionManager::new(fast_config(), HuntConfig::default());
    let mut fast = Observer::join(&mut mgr, "Alice");
    let mut slow = Observer::join_with_buffer(&mut mgr, "Snail", 8);
    for _ in 0..3 {
        mgr.add_bot().unwrap();
    }
    mgr.start().unwrap();

    // Let the small buffer overflow while nobody reads it.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut lagging = Follower::default();
    let base = slow
        .read_until(|msg| {
            lagging.feed(msg);
            lagging.tick().filter(|_| lagging.last_snapshot_tick > 0)
        })
        .await;
    let target = base + 5;
    let slow_tick = slow
        .read_until(|msg| {
            lagging.feed(msg);
            lagging.tick().filter(|&t| t >= target)
        })
        .await;

    let mut steady = Follower::default();
    let fast_tick = fast
        .read_until(|msg| {
            steady.feed(msg);
            steady.tick().filter(|&t| t >= target)
        })
        .await;
    assert_eq!(slow_tick, fast_tick);
    assert_eq!(steady.gaps, 0);

    let lagging = lagging.mirror.unwrap();
    let steady = steady.mirror.unwrap();
    assert_eq!(lagging.entities(), steady.entities());
    assert_eq!(lagging.visuals(), steady.visuals());
    mgr.stop().await;
}

#[tokio::test]
async fn snapshot_request_is_answered_directly() {
    let mut mgr = SessionManager::new(fast_config(), HuntConfig::default());
    let mut a = Observer::join(&mut mgr, "Alice");
    mgr.add_bot().unwrap();
    mgr.start().unwrap();

    a.read_until(|msg| matches!(msg, ServerMessage::StateDelta(_)).then_some(()))
        .await;
    let frame = a.frame_snapshot_request();
    mgr.handle_message(a.connection, &frame).await.unwrap();

    let mut follower = Follower::default();
    a.read_until(|msg| {
        follower.feed(msg);
        (follower.snapshots > 0).then_some(())
    })
    .await;
    let mirror = follower.mirror.unwrap();
    assert!(mirror.entities().values().any(|e| e.connection == a.connection));
    mgr.stop().await;
}

#[tokio::test]
async fn leaving_observer_stops_receiving() {
    let mut mgr = SessionManager::new(fast_config(), HuntConfig::default());
    let mut a = Observer::join(&mut mgr, "Alice");
    let mut b = Observer::join(&mut mgr, "Bob");
    mgr.add_bot().unwrap();
    mgr.start().unwrap();

    b.read_until(|msg| matches!(msg, ServerMessage::Snapshot(_)).then_some(()))
        .await;
    mgr.leave(b.connection).await;
    assert_eq!(mgr.participants().len(), 2);

    // Drain whatever was queued before the sender was dropped.
    while b.rx.try_recv().is_ok() {}
    a.read_until(|msg| matches!(msg, ServerMessage::StateDelta(_)).then_some(()))
        .await;
    assert!(b.rx.recv().await.is_none());
    mgr.stop().await;
}

#[tokio::test]
async fn short_session_reaches_game_end() {
    let mut config = fast_config();
    config.rounds.round_duration_secs = 1;
    let mut mgr = SessionManager::new(config, HuntConfig::default());
    let mut a = Observer::join(&mut mgr, "Alice");
    mgr.add_bot().unwrap();
    mgr.add_bot().unwrap();
    mgr.start().unwrap();
    assert_eq!(mgr.phase(), SessionPhase::InRound);

    let scores = a
        .read_until(|msg| match msg {
            ServerMessage::GameEnd(end) => Some(end.final_scores.clone()),
            _ => None,
        })
        .await;
    assert_eq!(scores.len(), 3);
    mgr.wait().await;
    assert_eq!(mgr.phase(), SessionPhase::Lobby);
}
