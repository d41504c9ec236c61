//! Process-wide counters for game flow, dispatch and persistence health.
//! Read by the `status` command and periodic log lines; no exporter.

use std::sync::atomic::{AtomicU64, Ordering};

static COMMANDS_PROCESSED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_REJECTED: AtomicU64 = AtomicU64::new(0);
static EVENTS_DISPATCHED: AtomicU64 = AtomicU64::new(0);
static HEARTBEATS_SENT: AtomicU64 = AtomicU64::new(0);
static SUBSCRIBERS_DROPPED_SLOW: AtomicU64 = AtomicU64::new(0);
static PERSISTENCE_FAULTS: AtomicU64 = AtomicU64::new(0);
static SESSIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_CLOSED: AtomicU64 = AtomicU64::new(0);
static ROUNDS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static ROUNDS_CANCELLED: AtomicU64 = AtomicU64::new(0);

pub fn inc_commands_processed() {
    COMMANDS_PROCESSED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_rejected() {
    COMMANDS_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_events_dispatched() {
    EVENTS_DISPATCHED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_heartbeats_sent() {
    HEARTBEATS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_subscribers_dropped_slow() {
    SUBSCRIBERS_DROPPED_SLOW.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_persistence_faults() {
    PERSISTENCE_FAULTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sessions_opened() {
    SESSIONS_OPENED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sessions_closed() {
    SESSIONS_CLOSED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_rounds_completed() {
    ROUNDS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_rounds_cancelled() {
    ROUNDS_CANCELLED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub commands_processed: u64,
    pub commands_rejected: u64,
    pub events_dispatched: u64,
    pub heartbeats_sent: u64,
    pub subscribers_dropped_slow: u64,
    pub persistence_faults: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub rounds_completed: u64,
    pub rounds_cancelled: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        commands_processed: COMMANDS_PROCESSED.load(Ordering::Relaxed),
        commands_rejected: COMMANDS_REJECTED.load(Ordering::Relaxed),
        events_dispatched: EVENTS_DISPATCHED.load(Ordering::Relaxed),
        heartbeats_sent: HEARTBEATS_SENT.load(Ordering::Relaxed),
        subscribers_dropped_slow: SUBSCRIBERS_DROPPED_SLOW.load(Ordering::Relaxed),
        persistence_faults: PERSISTENCE_FAULTS.load(Ordering::Relaxed),
        sessions_opened: SESSIONS_OPENED.load(Ordering::Relaxed),
        sessions_closed: SESSIONS_CLOSED.load(Ordering::Relaxed),
        rounds_completed: ROUNDS_COMPLETED.load(Ordering::Relaxed),
        rounds_cancelled: ROUNDS_CANCELLED.load(Ordering::Relaxed),
    }
}
