//! Shared helpers for integration tests: throwaway stores, a wired
//! room (store + hub + orchestrator), and event-stream utilities.
#![allow(dead_code)] // each test binary uses a subset

use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use g38d::game::command::Origin;
use g38d::game::event::{Event, EventEnvelope};
use g38d::game::orchestrator::{start_orchestrator, OrchestratorHandle};
use g38d::game::phase::Phase;
use g38d::game::Command;
use g38d::hub::{EventHub, HubConfig, HubDelivery, Role, TopicFilter};
use g38d::storage::{RoundStore, RoundStoreBuilder};

pub struct TestRoom {
    // Held so the store directory outlives the test.
    pub dir: TempDir,
    pub store: RoundStore,
    pub hub: EventHub,
    pub orch: OrchestratorHandle,
}

pub fn temp_store(dir: &TempDir) -> RoundStore {
    RoundStoreBuilder::new(dir.path().join("db"))
        .open()
        .expect("open store")
}

/// A wired room with hub defaults (15 s heartbeat, 10 min age cap) —
/// roomy enough that paused-clock walks stay inside them.
pub fn test_room(room: &str) -> TestRoom {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = temp_store(&dir);
    let hub = EventHub::start(HubConfig::default());
    let orch = start_orchestrator(room, store.clone(), hub.clone()).expect("start orchestrator");
    TestRoom {
        dir,
        store,
        hub,
        orch,
    }
}

/// Subscribe to the room's event stream with a `*` filter.
pub async fn subscribe_room(room: &TestRoom) -> mpsc::Receiver<HubDelivery> {
    let (_id, rx) = room
        .hub
        .subscribe(room.orch.room(), Role::Player, TopicFilter::All)
        .await;
    rx
}

/// Next orchestrator event, skipping heartbeats. The timeout sits well
/// past the longest phase timer (12 s) so paused-clock walks never trip
/// it while auto-advancing.
pub async fn next_event(rx: &mut mpsc::Receiver<HubDelivery>) -> EventEnvelope {
    loop {
        let delivery = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("hub closed the stream");
        match delivery {
            HubDelivery::Event(env) => {
                if !matches!(env.event, Event::Heartbeat {}) {
                    return env;
                }
            }
            HubDelivery::Note { .. } => continue,
            HubDelivery::Bye { reason } => panic!("unexpected close: {reason}"),
        }
    }
}

/// Read events until a phase change into `target` arrives; returns every
/// envelope seen on the way (the phase-change included).
pub async fn events_until_phase(
    rx: &mut mpsc::Receiver<HubDelivery>,
    target: Phase,
) -> Vec<EventEnvelope> {
    let mut seen = Vec::new();
    loop {
        let env = next_event(rx).await;
        let reached = matches!(env.event, Event::PhaseChanged { new, .. } if new == target);
        seen.push(env);
        if reached {
            return seen;
        }
    }
}

/// Every envelope's ordinal is strictly one past the previous.
pub fn assert_gap_free(envelopes: &[EventEnvelope]) {
    for pair in envelopes.windows(2) {
        assert_eq!(
            pair[1].seq,
            pair[0].seq + 1,
            "sequence gap between {:?} and {:?}",
            pair[0].event,
            pair[1].event
        );
    }
}

pub async fn start_round(room: &TestRoom, has_jackpot: bool) {
    room.orch
        .submit(Command::StartNewRound { has_jackpot }, Origin::Dealer)
        .await
        .expect("start round");
}
