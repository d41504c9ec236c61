//! # Event hub — per-room fan-out to dealer and player sessions
//!
//! The hub owns the subscription registry. Orchestrators publish
//! [`EventEnvelope`]s; the hub delivers each one, in sequence order, to
//! every subscription whose room and topic filter match. Delivery to one
//! subscriber never blocks the rest indefinitely: each subscription has a
//! bounded buffer, and a send that cannot complete within the drop
//! deadline closes that subscription instead of stalling the writer.
//!
//! A housekeeping task emits a synthetic `HEARTBEAT` to every subscriber
//! on a fixed interval, tears down subscribers with no successful delivery
//! inside the watchdog window, and closes any subscription older than the
//! stream age cap with a normal-close signal (clients reconnect on a
//! schedule; the cap bounds in-flight state growth).
//!
//! Dealer sessions additionally get an ad-hoc pub/sub side channel
//! (`note_*` / [`EventHub::publish_note`]) that fans notes out to other
//! dealer sessions without touching any round.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::game::event::{Event, EventEnvelope};
use crate::logutil::escape_log;
use crate::metrics;

/// Role of a connected peer. Only dealers may mutate round state or use
/// the note side channel; the player dimension of topic filtering is
/// reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Dealer,
    Player,
}

/// Event-kind filter for a subscription: everything, or a named set.
#[derive(Debug, Clone)]
pub enum TopicFilter {
    All,
    Kinds(HashSet<String>),
}

impl TopicFilter {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            TopicFilter::All => true,
            TopicFilter::Kinds(kinds) => kinds.contains(event.kind()),
        }
    }
}

/// What a subscriber receives from the hub.
#[derive(Debug, Clone)]
pub enum HubDelivery {
    Event(EventEnvelope),
    /// Dealer side-channel note.
    Note {
        topic: String,
        data: serde_json::Value,
    },
    /// Normal-close signal; the session forwards a BYE frame and ends.
    Bye { reason: &'static str },
}

/// Tunables; reference values per the hub contract.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub heartbeat_interval: Duration,
    pub watchdog_window: Duration,
    pub max_stream_age: Duration,
    pub subscriber_buffer: usize,
    pub dispatch_deadline: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            heartbeat_interval: Duration::from_secs(15),
            watchdog_window: Duration::from_secs(30),
            max_stream_age: Duration::from_secs(600),
            subscriber_buffer: 256,
            dispatch_deadline: Duration::from_secs(10),
        }
    }
}

struct Subscription {
    room: String,
    #[allow(dead_code)] // player-only filtering is a reserved dimension
    role: Role,
    filter: TopicFilter,
    tx: mpsc::Sender<HubDelivery>,
    opened_at: Instant,
    last_delivery: Instant,
}

struct HubInner {
    cfg: HubConfig,
    subs: RwLock<HashMap<Uuid, Subscription>>,
    /// (room, topic) → dealer subscription ids, for the note side channel.
    notes: RwLock<HashMap<(String, String), HashSet<Uuid>>>,
    /// Last published orchestrator seq per room; heartbeats repeat it.
    last_seq: RwLock<HashMap<String, u64>>,
}

/// Handle to the fan-out hub. Clones share one registry.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    /// Create the hub and spawn its housekeeping task. The task exits on
    /// its own once every handle is dropped.
    pub fn start(cfg: HubConfig) -> Self {
        let inner = Arc::new(HubInner {
            cfg,
            subs: RwLock::new(HashMap::new()),
            notes: RwLock::new(HashMap::new()),
            last_seq: RwLock::new(HashMap::new()),
        });
        let weak = Arc::downgrade(&inner);
        tokio::spawn(housekeeping_loop(weak));
        EventHub { inner }
    }

    /// Register a subscription. Returns its id and the delivery stream.
    pub async fn subscribe(
        &self,
        room: &str,
        role: Role,
        filter: TopicFilter,
    ) -> (Uuid, mpsc::Receiver<HubDelivery>) {
        let (tx, rx) = mpsc::channel(self.inner.cfg.subscriber_buffer);
        let id = Uuid::new_v4();
        let now = Instant::now();
        let sub = Subscription {
            room: room.to_string(),
            role,
            filter,
            tx,
            opened_at: now,
            last_delivery: now,
        };
        self.inner.subs.write().await.insert(id, sub);
        debug!("subscription {id} joined room {}", escape_log(room));
        (id, rx)
    }

    /// Drop a subscription and its note-topic memberships.
    pub async fn unsubscribe(&self, id: Uuid) {
        self.inner.subs.write().await.remove(&id);
        let mut notes = self.inner.notes.write().await;
        notes.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
    }

    /// Number of live subscriptions for a room.
    pub async fn subscriber_count(&self, room: &str) -> usize {
        self.inner
            .subs
            .read()
            .await
            .values()
            .filter(|s| s.room == room)
            .count()
    }

    /// Fan an orchestrator event out to every matching subscription.
    ///
    /// Slow subscribers are given until the dispatch deadline, then
    /// dropped; the publisher never stalls past that bound on any single
    /// peer.
    pub async fn publish(&self, env: EventEnvelope) {
        self.inner
            .last_seq
            .write()
            .await
            .insert(env.room.clone(), env.seq);

        // Snapshot the matching senders so the registry lock stays brief;
        // mpsc preserves per-subscriber order regardless.
        let targets: Vec<(Uuid, mpsc::Sender<HubDelivery>)> = {
            let subs = self.inner.subs.read().await;
            subs.iter()
                .filter(|(_, s)| s.room == env.room && s.filter.matches(&env.event))
                .map(|(id, s)| (*id, s.tx.clone()))
                .collect()
        };

        let mut delivered: Vec<Uuid> = Vec::new();
        let mut doomed: Vec<Uuid> = Vec::new();
        for (id, tx) in targets {
            let delivery = HubDelivery::Event(env.clone());
            match tx.try_send(delivery) {
                Ok(()) => {
                    delivered.push(id);
                    metrics::inc_events_dispatched();
                }
                Err(mpsc::error::TrySendError::Closed(_)) => doomed.push(id),
                Err(mpsc::error::TrySendError::Full(delivery)) => {
                    // One bounded wait; a peer that cannot drain within the
                    // deadline forfeits the stream.
                    let deadline = self.inner.cfg.dispatch_deadline;
                    match tokio::time::timeout(deadline, tx.send(delivery)).await {
                        Ok(Ok(())) => {
                            delivered.push(id);
                            metrics::inc_events_dispatched();
                        }
                        _ => {
                            warn!("subscriber {id} exceeded dispatch deadline; dropping");
                            metrics::inc_subscribers_dropped_slow();
                            doomed.push(id);
                        }
                    }
                }
            }
        }

        if !delivered.is_empty() {
            let now = Instant::now();
            let mut subs = self.inner.subs.write().await;
            for id in delivered {
                if let Some(sub) = subs.get_mut(&id) {
                    sub.last_delivery = now;
                }
            }
        }
        for id in doomed {
            self.unsubscribe(id).await;
        }
    }

    /// Subscribe a dealer session to an ad-hoc note topic.
    pub async fn note_subscribe(&self, id: Uuid, room: &str, topic: &str) {
        self.inner
            .notes
            .write()
            .await
            .entry((room.to_string(), topic.to_string()))
            .or_default()
            .insert(id);
    }

    pub async fn note_unsubscribe(&self, id: Uuid, room: &str, topic: &str) {
        let mut notes = self.inner.notes.write().await;
        if let Some(members) = notes.get_mut(&(room.to_string(), topic.to_string())) {
            members.remove(&id);
            if members.is_empty() {
                notes.remove(&(room.to_string(), topic.to_string()));
            }
        }
    }

    /// Fan an ad-hoc dealer note out to the topic's members. Independent of
    /// any round; lossy by design (full buffers skip the note).
    pub async fn publish_note(&self, room: &str, topic: &str, data: serde_json::Value) {
        let members = {
            let notes = self.inner.notes.read().await;
            match notes.get(&(room.to_string(), topic.to_string())) {
                Some(members) => members.clone(),
                None => return,
            }
        };
        let subs = self.inner.subs.read().await;
        for id in members {
            if let Some(sub) = subs.get(&id) {
                let _ = sub.tx.try_send(HubDelivery::Note {
                    topic: topic.to_string(),
                    data: data.clone(),
                });
            }
        }
    }
}

async fn housekeeping_loop(weak: Weak<HubInner>) {
    let tick = {
        let Some(inner) = weak.upgrade() else { return };
        inner.cfg.heartbeat_interval
    };
    // First fire one full period out; subscribers joining at t=0 get their
    // first heartbeat after the interval, not immediately.
    let mut heartbeat = tokio::time::interval_at(Instant::now() + tick, tick);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let sweep_tick = Duration::from_secs(1);
    let mut sweep = tokio::time::interval_at(Instant::now() + sweep_tick, sweep_tick);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let Some(inner) = weak.upgrade() else { break };
                send_heartbeats(&inner).await;
            }
            _ = sweep.tick() => {
                let Some(inner) = weak.upgrade() else { break };
                sweep_subscriptions(&inner).await;
            }
        }
    }
    debug!("hub housekeeping loop terminated");
}

async fn send_heartbeats(inner: &Arc<HubInner>) {
    let last_seq = inner.last_seq.read().await.clone();
    let mut subs = inner.subs.write().await;
    for (id, sub) in subs.iter_mut() {
        let seq = last_seq.get(&sub.room).copied().unwrap_or(0);
        let env = EventEnvelope::for_room(&sub.room, seq, Event::Heartbeat {});
        if sub.tx.try_send(HubDelivery::Event(env)).is_ok() {
            sub.last_delivery = Instant::now();
            metrics::inc_heartbeats_sent();
        } else {
            debug!("heartbeat skipped for congested subscriber {id}");
        }
    }
}

async fn sweep_subscriptions(inner: &Arc<HubInner>) {
    let now = Instant::now();
    let mut closed: Vec<(Uuid, &'static str)> = Vec::new();
    {
        let subs = inner.subs.read().await;
        for (id, sub) in subs.iter() {
            if now.duration_since(sub.opened_at) >= inner.cfg.max_stream_age {
                closed.push((*id, "stream-age"));
            } else if now.duration_since(sub.last_delivery) >= inner.cfg.watchdog_window {
                closed.push((*id, "watchdog"));
            }
        }
    }
    if closed.is_empty() {
        return;
    }
    let mut subs = inner.subs.write().await;
    let mut notes = inner.notes.write().await;
    for (id, reason) in closed {
        if let Some(sub) = subs.remove(&id) {
            info!("closing subscription {id} in {}: {reason}", sub.room);
            let _ = sub.tx.try_send(HubDelivery::Bye { reason });
        }
        notes.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
    }
}
