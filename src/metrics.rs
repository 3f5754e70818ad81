//! Process-wide link counters.
//! Cheap relaxed atomics; the binary logs a [`snapshot`] alongside the fleet summary.
use std::sync::atomic::{AtomicU64, Ordering};

static DISCOVERY_ACCEPTED: AtomicU64 = AtomicU64::new(0);
static DISCOVERY_REJECTED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_CLOSED: AtomicU64 = AtomicU64::new(0);
static CONNECT_FAILURES: AtomicU64 = AtomicU64::new(0);
static LINK_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static FRAMES_DECODED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_SENT: AtomicU64 = AtomicU64::new(0);
static COMMANDS_FAILED: AtomicU64 = AtomicU64::new(0);

pub fn inc_discovery_accepted() {
    DISCOVERY_ACCEPTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_discovery_rejected() {
    DISCOVERY_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sessions_opened() {
    SESSIONS_OPENED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sessions_closed() {
    SESSIONS_CLOSED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_connect_failures() {
    CONNECT_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_link_timeouts() {
    LINK_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}
pub fn add_frames_decoded(n: u64) {
    FRAMES_DECODED.fetch_add(n, Ordering::Relaxed);
}
pub fn inc_commands_sent() {
    COMMANDS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_failed() {
    COMMANDS_FAILED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Snapshot {
    pub discovery_accepted: u64,
    pub discovery_rejected: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub connect_failures: u64,
    pub link_timeouts: u64,
    pub frames_decoded: u64,
    pub commands_sent: u64,
    pub commands_failed: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        discovery_accepted: DISCOVERY_ACCEPTED.load(Ordering::Relaxed),
        discovery_rejected: DISCOVERY_REJECTED.load(Ordering::Relaxed),
        sessions_opened: SESSIONS_OPENED.load(Ordering::Relaxed),
        sessions_closed: SESSIONS_CLOSED.load(Ordering::Relaxed),
        connect_failures: CONNECT_FAILURES.load(Ordering::Relaxed),
        link_timeouts: LINK_TIMEOUTS.load(Ordering::Relaxed),
        frames_decoded: FRAMES_DECODED.load(Ordering::Relaxed),
        commands_sent: COMMANDS_SENT.load(Ordering::Relaxed),
        commands_failed: COMMANDS_FAILED.load(Ordering::Relaxed),
    }
}
