//! Supervised per-peer link workers and the command send path.
//!
//! ## Worker lifecycle
//!
//! ```text
//!   ┌─────────────┐  ok   ┌──────────────┐      ┌────────────────┐
//!   │ connect (2s)│ ────► │ publish link │ ───► │ resync mask    │
//!   └─────────────┘       └──────────────┘      └────────────────┘
//!        ▲   │ fail                                      │
//!        │   ▼                                           ▼
//!   ┌─────────────┐   timeout / close / error   ┌────────────────┐
//!   │ backoff (2s)│ ◄────────────────────────── │ telemetry loop │
//!   └─────────────┘                             └────────────────┘
//! ```
//!
//! One worker exists per peer address. Workers share nothing with each other except
//! the state store, the command register and the live-link map, so a stalled or
//! failing pad cannot delay any other pad. Every worker watches the shared stop
//! signal and exits at its next poll without a final backoff.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use super::codec::{CommandBit, TelemetryFramer};
use super::command::CommandRegister;
use super::errors::CommandError;
use super::state::PadStore;
use super::stop_requested;
use crate::metrics;

/// Timing knobs for the link workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTiming {
    pub connect_timeout: Duration,
    /// Granularity at which a blocked read re-checks the timeout and stop conditions.
    pub read_poll: Duration,
    /// Silence on an open stream after which the link is considered dead.
    pub telemetry_timeout: Duration,
    pub reconnect_delay: Duration,
    pub send_timeout: Duration,
    /// How long `stop` waits for each worker before aborting it.
    pub shutdown_grace: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_poll: Duration::from_secs(1),
            telemetry_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
            send_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

type LiveLink = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

struct WorkerEntry {
    id: u64,
    /// Slot the worker attributes telemetry to; refreshed by later discoveries.
    slot: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

/// Why a telemetry session ended.
#[derive(Debug)]
pub enum SessionEnd {
    Shutdown,
    PeerClosed,
    Timeout(Duration),
    ReadError(std::io::Error),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Shutdown => write!(f, "shutdown requested"),
            SessionEnd::PeerClosed => write!(f, "closed by peer"),
            SessionEnd::Timeout(d) => write!(f, "no telemetry for {:?}", d),
            SessionEnd::ReadError(e) => write!(f, "receive error ({})", e),
        }
    }
}

/// Registry of link workers keyed by peer address.
pub struct ConnectionManager {
    store: Arc<PadStore>,
    commands: Arc<CommandRegister>,
    port: u16,
    timing: LinkTiming,
    shutdown: watch::Receiver<bool>,
    next_worker_id: AtomicU64,
    workers: Mutex<HashMap<IpAddr, WorkerEntry>>,
    live: Mutex<HashMap<IpAddr, LiveLink>>,
}

impl ConnectionManager {
    /// `shutdown` carries `true` once the subsystem is stopping; a dropped sender is
    /// treated the same way.
    pub fn new(
        store: Arc<PadStore>,
        commands: Arc<CommandRegister>,
        port: u16,
        timing: LinkTiming,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            commands,
            port,
            timing,
            shutdown,
            next_worker_id: AtomicU64::new(1),
            workers: Mutex::new(HashMap::new()),
            live: Mutex::new(HashMap::new()),
        }
    }

    fn workers_lock(&self) -> MutexGuard<'_, HashMap<IpAddr, WorkerEntry>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live_lock(&self) -> MutexGuard<'_, HashMap<IpAddr, LiveLink>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Make sure a worker is supervising `ip`. Returns `true` if one was spawned.
    ///
    /// A running worker for the same address is kept; it only learns the (possibly
    /// new) slot the address is announced for.
    pub fn ensure_connection(self: &Arc<Self>, slot: usize, ip: IpAddr) -> bool {
        if self.stopping() {
            return false;
        }
        let mut workers = self.workers_lock();
        if let Some(entry) = workers.get(&ip) {
            if !entry.handle.is_finished() {
                entry.slot.store(slot, Ordering::Release);
                return false;
            }
        }
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let slot_cell = Arc::new(AtomicUsize::new(slot));
        let handle = tokio::spawn(self.clone().run_worker(ip, id, slot_cell.clone()));
        workers.insert(
            ip,
            WorkerEntry {
                id,
                slot: slot_cell,
                handle,
            },
        );
        info!("Spawned link worker #{} for pad {} at {}", id, slot, ip);
        true
    }

    pub fn worker_count(&self) -> usize {
        self.workers_lock()
            .values()
            .filter(|w| !w.handle.is_finished())
            .count()
    }

    pub fn is_connected(&self, ip: IpAddr) -> bool {
        self.live_lock().contains_key(&ip)
    }

    pub fn connected_peers(&self) -> Vec<IpAddr> {
        let mut peers: Vec<IpAddr> = self.live_lock().keys().copied().collect();
        peers.sort();
        peers
    }

    async fn run_worker(self: Arc<Self>, ip: IpAddr, id: u64, slot: Arc<AtomicUsize>) {
        let mut shutdown = self.shutdown.clone();
        let addr = SocketAddr::new(ip, self.port);
        while !self.stopping() {
            match timeout(self.timing.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    metrics::inc_sessions_opened();
                    let end = self.run_session(ip, &slot, stream, &mut shutdown).await;
                    metrics::inc_sessions_closed();
                    match end {
                        SessionEnd::Shutdown => debug!("Session with {} ended: {}", ip, end),
                        _ => info!("Session with {} ended: {}", ip, end),
                    }
                }
                Ok(Err(e)) => {
                    metrics::inc_connect_failures();
                    debug!("TCP connect to {} failed ({})", addr, e);
                }
                Err(_) => {
                    metrics::inc_connect_failures();
                    debug!("TCP connect to {} timed out", addr);
                }
            }
            if self.stopping() {
                break;
            }
            tokio::select! {
                _ = sleep(self.timing.reconnect_delay) => {}
                _ = stop_requested(&mut shutdown) => break,
            }
        }

        let mut workers = self.workers_lock();
        if workers.get(&ip).is_some_and(|w| w.id == id) {
            workers.remove(&ip);
        }
        debug!("Link worker #{} for {} exited", id, ip);
    }

    async fn run_session(
        &self,
        ip: IpAddr,
        slot: &AtomicUsize,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let _ = stream.set_nodelay(true);
        let (mut reader, writer) = stream.into_split();
        let link: LiveLink = Arc::new(tokio::sync::Mutex::new(writer));
        self.live_lock().insert(ip, link.clone());
        info!("Connected to pad at {}", ip);

        // Re-teach the pad the operator's persistent intent before anything else.
        let (mask, synced) = {
            let mut writer = link.lock().await;
            let resync_slot = slot.load(Ordering::Acquire);
            let mask = self.commands.stored_mask(resync_slot);
            let synced = self.write_byte(ip, &mut writer, mask).await;
            self.commands.record_outcome(resync_slot, mask, synced.is_ok());
            (mask, synced)
        };
        match synced {
            Ok(()) => debug!("Synced command mask 0b{:08b} to {}", mask, ip),
            Err(e) => warn!("Failed to sync command mask to {} ({})", ip, e),
        }

        let end = self.telemetry_loop(ip, slot, &mut reader, shutdown).await;

        {
            let mut live = self.live_lock();
            if live.get(&ip).is_some_and(|l| Arc::ptr_eq(l, &link)) {
                live.remove(&ip);
            }
        }
        let _ = link.lock().await.shutdown().await;
        end
    }

    async fn telemetry_loop(
        &self,
        ip: IpAddr,
        slot: &AtomicUsize,
        reader: &mut OwnedReadHalf,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let mut framer = TelemetryFramer::new();
        let mut last_rx = Instant::now();
        loop {
            if self.stopping() {
                return SessionEnd::Shutdown;
            }
            tokio::select! {
                _ = stop_requested(shutdown) => return SessionEnd::Shutdown,
                read = timeout(self.timing.read_poll, reader.read_buf(framer.buffer_mut())) => {
                    match read {
                        Ok(Ok(0)) => return SessionEnd::PeerClosed,
                        Ok(Ok(_)) => {
                            last_rx = Instant::now();
                            self.apply_frames(ip, slot.load(Ordering::Acquire), &mut framer);
                        }
                        Ok(Err(e)) => return SessionEnd::ReadError(e),
                        Err(_) => {}
                    }
                }
            }
            if last_rx.elapsed() >= self.timing.telemetry_timeout {
                metrics::inc_link_timeouts();
                return SessionEnd::Timeout(self.timing.telemetry_timeout);
            }
        }
    }

    /// Apply every complete frame buffered in `framer`, oldest first.
    fn apply_frames(&self, ip: IpAddr, slot: usize, framer: &mut TelemetryFramer) -> usize {
        let mut applied = 0;
        while let Some(frame) = framer.next_frame() {
            trace!("Telemetry from {} (pad {}): {:?}", ip, slot, frame);
            if let Err(e) = self.store.apply_telemetry(slot, ip, &frame) {
                warn!("Dropping telemetry from {}: {}", ip, e);
                continue;
            }
            applied += 1;
        }
        metrics::add_frames_decoded(applied as u64);
        applied
    }

    async fn write_byte(
        &self,
        peer: IpAddr,
        writer: &mut OwnedWriteHalf,
        byte: u8,
    ) -> Result<(), CommandError> {
        let write = async {
            writer.write_all(&[byte]).await?;
            writer.flush().await
        };
        match timeout(self.timing.send_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(CommandError::Transport { peer, source }),
            Err(_) => Err(CommandError::Timeout(peer)),
        }
    }

    /// Transmit one command byte to the pad in `slot` over its current session.
    ///
    /// Fails fast when the slot has no known peer or the peer has no live session;
    /// nothing is ever queued. Returns the byte that was handed to the transport.
    ///
    /// The session's writer stays locked from mask update to recorded outcome, so
    /// concurrent sends reach the wire in the order their masks were computed.
    pub async fn send_command(
        &self,
        slot: usize,
        bit: CommandBit,
        enable: Option<bool>,
    ) -> Result<u8, CommandError> {
        let fleet_size = self.store.fleet_size();
        if slot >= fleet_size {
            return Err(CommandError::SlotOutOfRange { slot, fleet_size });
        }
        let Some(ip) = self.store.ip_address(slot) else {
            info!("Command skipped for pad {}: no IP address", slot);
            return Err(CommandError::NoKnownPeer(slot));
        };
        let link = self.live_lock().get(&ip).cloned();
        let Some(link) = link else {
            info!("Command skipped for pad {}: no active TCP connection", slot);
            return Err(CommandError::NotConnected(ip));
        };
        let Ok(mut writer) = timeout(self.timing.send_timeout, link.lock()).await else {
            metrics::inc_commands_failed();
            return Err(CommandError::Timeout(ip));
        };
        let mask = self
            .commands
            .prepare(slot, bit, enable)
            .ok_or(CommandError::SlotOutOfRange { slot, fleet_size })?;
        info!(
            "send_command -> pad={}, ip={}, command=0b{:08b}, enable={:?}, mask=0b{:08b}",
            slot,
            ip,
            bit.mask(),
            enable,
            mask
        );

        let result = self.write_byte(ip, &mut writer, mask).await;
        self.commands.record_outcome(slot, mask, result.is_ok());
        match &result {
            Ok(()) => {
                metrics::inc_commands_sent();
                if let Some(on) = enable {
                    let _ = self.store.set_command_intent(slot, bit, on);
                }
            }
            Err(e) => {
                metrics::inc_commands_failed();
                debug!("Failed to send command to pad {} ({})", slot, e);
            }
        }
        result.map(|()| mask)
    }

    /// Wait (bounded per worker) for every worker to observe the stop signal, then
    /// abort any that did not and forget all live links.
    pub async fn join_workers(&self) {
        let entries: Vec<(IpAddr, WorkerEntry)> = self.workers_lock().drain().collect();
        for (ip, mut entry) in entries {
            if timeout(self.timing.shutdown_grace, &mut entry.handle)
                .await
                .is_err()
            {
                warn!("Link worker for {} did not stop in time; aborting", ip);
                entry.handle.abort();
            }
        }
        self.live_lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pads::codec::Telemetry;
    use std::net::Ipv4Addr;

    fn manager(fleet: usize) -> (Arc<ConnectionManager>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let mgr = ConnectionManager::new(
            Arc::new(PadStore::new(fleet)),
            Arc::new(CommandRegister::new(fleet)),
            5555,
            LinkTiming::default(),
            rx,
        );
        (Arc::new(mgr), tx)
    }

    #[test]
    fn apply_frames_applies_each_buffered_frame_in_order() {
        let (mgr, _tx) = manager(3);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let first = Telemetry {
            voltage: 12.0,
            rssi: -40.0,
            interlock_removed: false,
            continuity: true,
            igniter_id: 1,
        };
        let second = Telemetry {
            voltage: 8.5,
            rssi: -75.0,
            interlock_removed: true,
            continuity: false,
            igniter_id: 1,
        };
        let mut framer = TelemetryFramer::new();
        framer.push(&first.encode());
        framer.push(&second.encode());

        assert_eq!(mgr.apply_frames(ip, 1, &mut framer), 2);
        let pad = mgr.store.get(1).expect("slot");
        assert_eq!(pad.frames_received, 2);
        assert_eq!(pad.voltage, 8.5);
        assert!(pad.arm_status);
        assert_eq!(pad.ip_address, Some(ip));
    }

    #[tokio::test]
    async fn send_without_known_peer_leaves_mask_untouched() {
        let (mgr, _tx) = manager(2);
        mgr.commands.prepare(0, CommandBit::Led, Some(true));
        let err = mgr
            .send_command(0, CommandBit::Buzzer, Some(true))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NoKnownPeer(0)));
        assert_eq!(mgr.commands.stored_mask(0), 0b0100);
    }

    #[tokio::test]
    async fn send_without_live_session_fails_fast() {
        let (mgr, _tx) = manager(2);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        mgr.store.record_discovery(1, ip).expect("bind");
        let err = mgr
            .send_command(1, CommandBit::Led, Some(true))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotConnected(peer) if peer == ip));
        assert_eq!(mgr.commands.stored_mask(1), 0);
    }

    #[tokio::test]
    async fn no_workers_spawn_once_stopping() {
        let (mgr, tx) = manager(1);
        tx.send(true).expect("send stop");
        assert!(!mgr.ensure_connection(0, IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert_eq!(mgr.worker_count(), 0);
    }
}
