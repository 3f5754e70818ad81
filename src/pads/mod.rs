//! # Pad Communication Module
//!
//! Everything the station needs to talk to its launch pads over the local network.
//!
//! ## Components
//!
//! - [`state`] - fleet state store read by the control surface
//! - [`codec`] - discovery datagram, telemetry frame and command bits
//! - [`command`] - persistent per-pad command masks
//! - [`discovery`] - UDP announce/authenticate listener
//! - [`connection`] - per-peer link workers, reconnects and the send path
//! - [`ticker`] - contact-age ticker
//! - [`sim`] - a simulated pad for bench testing
//!
//! ## Data flow
//!
//! ```text
//!   pad ──UDP announce──► DiscoveryListener ──bind ip──► PadStore ◄──── control surface
//!                               │                          ▲   ▲         (get/snapshot)
//!                       ensure_connection                  │   │
//!                               ▼                          │   │
//!   pad ◄──TCP session──► ConnectionManager ──telemetry────┘   └── staleness ticker
//!                               ▲
//!                         CommandRegister ◄── send_command (control surface)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use padlink::pads::{PadLink, StationSettings};
//! use padlink::pads::codec::CommandBit;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let link = PadLink::new(6, StationSettings::default());
//!     link.start().await?;
//!
//!     if link.has_active_connection(0) {
//!         link.send_command(0, CommandBit::Led, Some(true)).await;
//!     }
//!     let pad = link.get(0).expect("slot 0");
//!     println!("pad A: {:.2} V, stale={}", pad.voltage, pad.is_stale());
//!
//!     link.stop().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod command;
pub mod connection;
pub mod discovery;
pub mod errors;
pub mod sim;
pub mod state;
pub mod ticker;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{info, warn};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::validation::{self, ConfigError};
use codec::CommandBit;
use command::{CommandRecord, CommandRegister};
use connection::{ConnectionManager, LinkTiming};
use discovery::DiscoveryListener;
use errors::{CommandError, PadError};
use state::{PadRecord, PadStore};

pub const DEFAULT_PORT: u16 = 5555;
pub const DEFAULT_SECRET: &str = "RLCU!2025";

/// Resolves once `rx` carries `true` or its sender has gone away.
pub(crate) async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Runtime-adjustable station settings. Changes apply on the next [`PadLink::start`].
#[derive(Debug, Clone, PartialEq)]
pub struct StationSettings {
    /// UDP discovery port; pads also accept the stream session on this port.
    pub port: u16,
    pub bind_address: IpAddr,
    pub shared_secret: String,
    pub timing: LinkTiming,
    pub tick: Duration,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            shared_secret: DEFAULT_SECRET.to_string(),
            timing: LinkTiming::default(),
            tick: ticker::DEFAULT_TICK,
        }
    }
}

impl StationSettings {
    /// Reject timings that cannot drive the workers or the ticker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        for (field, value) in [
            ("timing.connect_timeout", t.connect_timeout),
            ("timing.read_poll", t.read_poll),
            ("timing.telemetry_timeout", t.telemetry_timeout),
            ("timing.reconnect_delay", t.reconnect_delay),
            ("timing.send_timeout", t.send_timeout),
            ("timing.shutdown_grace", t.shutdown_grace),
            ("tick", self.tick),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        Ok(())
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    connections: Arc<ConnectionManager>,
    listener: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// The pad subsystem: state store, command register, discovery and link workers.
///
/// All methods take `&self`; share it as `Arc<PadLink>` between the control surface and
/// any other callers.
pub struct PadLink {
    store: Arc<PadStore>,
    commands: Arc<CommandRegister>,
    settings: Mutex<StationSettings>,
    running: Mutex<Option<Running>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl PadLink {
    pub fn new(fleet_size: usize, settings: StationSettings) -> Self {
        Self::with_store(Arc::new(PadStore::new(fleet_size)), settings)
    }

    /// Build around an existing store (e.g. one created with a custom stale threshold).
    ///
    /// Inside a tokio runtime the staleness ticker starts here, so pads age from
    /// construction on. Otherwise it starts with the first [`PadLink::start`].
    pub fn with_store(store: Arc<PadStore>, settings: StationSettings) -> Self {
        let commands = Arc::new(CommandRegister::new(store.fleet_size()));
        let link = Self {
            store,
            commands,
            settings: Mutex::new(settings),
            running: Mutex::new(None),
            ticker: Mutex::new(None),
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            link.ensure_ticker();
        }
        link
    }

    fn settings_lock(&self) -> MutexGuard<'_, StationSettings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn running_lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn store(&self) -> Arc<PadStore> {
        self.store.clone()
    }

    pub fn settings(&self) -> StationSettings {
        self.settings_lock().clone()
    }

    pub fn fleet_size(&self) -> usize {
        self.store.fleet_size()
    }

    pub fn get(&self, slot: usize) -> Option<PadRecord> {
        self.store.get(slot)
    }

    pub fn snapshot(&self) -> Vec<PadRecord> {
        self.store.snapshot()
    }

    pub fn set_team_id(&self, slot: usize, team_id: u32) -> Result<(), PadError> {
        self.store.set_team_id(slot, team_id)
    }

    pub fn last_command_status(&self, slot: usize) -> Option<CommandRecord> {
        self.commands.status(slot)
    }

    pub fn set_port(&self, port: i64) -> Result<(), ConfigError> {
        let port = validation::validate_port(port)?;
        self.settings_lock().port = port;
        Ok(())
    }

    pub fn set_bind_address(&self, addr: &str) -> Result<(), ConfigError> {
        let ip = validation::validate_ip(addr)?;
        self.settings_lock().bind_address = ip;
        Ok(())
    }

    pub fn set_shared_secret(&self, secret: &str) -> Result<(), ConfigError> {
        validation::validate_secret(secret)?;
        self.settings_lock().shared_secret = secret.to_string();
        Ok(())
    }

    /// Address the discovery socket is bound to, while listening.
    pub fn listening_on(&self) -> Option<SocketAddr> {
        self.running_lock().as_ref().map(|r| r.local_addr)
    }

    pub fn is_listening(&self) -> bool {
        self.running_lock().is_some()
    }

    fn connections(&self) -> Option<Arc<ConnectionManager>> {
        self.running_lock().as_ref().map(|r| r.connections.clone())
    }

    /// Spawn the staleness ticker unless it is already running or the tick is zero.
    fn ensure_ticker(&self) {
        let mut ticker = self.ticker_lock();
        if ticker.is_none() {
            let period = self.settings_lock().tick;
            if period.is_zero() {
                warn!("Staleness tick is zero; ticker not started");
                return;
            }
            *ticker = Some(ticker::spawn_staleness_ticker(self.store.clone(), period));
        }
    }

    /// Number of link workers currently supervising a peer. Zero while stopped.
    pub fn worker_count(&self) -> usize {
        self.connections().map_or(0, |c| c.worker_count())
    }

    fn ticker_lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ticker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start discovery. Idempotent: returns the existing address if already listening.
    ///
    /// Fails with [`PadError::Config`] for an unaddressable fleet size or a zero
    /// duration in the settings. Starts the staleness ticker if construction could
    /// not; it keeps running across stop/start cycles until the `PadLink` is dropped.
    pub async fn start(&self) -> Result<SocketAddr, PadError> {
        if let Some(addr) = self.listening_on() {
            return Ok(addr);
        }
        let settings = self.settings();
        validation::validate_fleet_size(self.store.fleet_size())?;
        settings.validate()?;
        self.ensure_ticker();
        let socket = UdpSocket::bind(SocketAddr::new(settings.bind_address, settings.port)).await?;
        let local_addr = socket.local_addr()?;

        let (shutdown, rx) = watch::channel(false);
        let connections = Arc::new(ConnectionManager::new(
            self.store.clone(),
            self.commands.clone(),
            settings.port,
            settings.timing.clone(),
            rx.clone(),
        ));
        let listener = DiscoveryListener::new(
            self.store.clone(),
            connections.clone(),
            settings.shared_secret.clone(),
        );

        let mut running = self.running_lock();
        if let Some(existing) = running.as_ref() {
            // Lost a race with a concurrent start(); the socket is dropped here.
            return Ok(existing.local_addr);
        }
        let listener = tokio::spawn(listener.run(socket, rx));
        *running = Some(Running {
            shutdown,
            connections,
            listener,
            local_addr,
        });
        info!(
            "Pad link started on {} (fleet of {})",
            local_addr,
            self.store.fleet_size()
        );
        Ok(local_addr)
    }

    /// Stop discovery and every link worker, then zero all command state.
    ///
    /// Waits for the listener and (bounded) for each worker before returning.
    pub async fn stop(&self) {
        let Some(running) = self.running_lock().take() else {
            return;
        };
        let grace = self.settings_lock().timing.shutdown_grace;
        let _ = running.shutdown.send(true);

        let mut listener = running.listener;
        if tokio::time::timeout(grace, &mut listener).await.is_err() {
            warn!("Discovery listener did not stop in time; aborting");
            listener.abort();
        }
        running.connections.join_workers().await;

        self.commands.reset();
        self.store.clear_command_intents();
        info!("Pad link stopped");
    }

    /// True if the slot's current peer has a live stream session.
    pub fn has_active_connection(&self, slot: usize) -> bool {
        let Some(ip) = self.store.ip_address(slot) else {
            return false;
        };
        self.connections().is_some_and(|c| c.is_connected(ip))
    }

    /// Send a command and report exactly why it could not be delivered.
    pub async fn try_send_command(
        &self,
        slot: usize,
        bit: CommandBit,
        enable: Option<bool>,
    ) -> Result<u8, CommandError> {
        match self.connections() {
            Some(connections) => connections.send_command(slot, bit, enable).await,
            None => {
                let fleet_size = self.store.fleet_size();
                if slot >= fleet_size {
                    return Err(CommandError::SlotOutOfRange { slot, fleet_size });
                }
                match self.store.ip_address(slot) {
                    Some(ip) => Err(CommandError::NotConnected(ip)),
                    None => Err(CommandError::NoKnownPeer(slot)),
                }
            }
        }
    }

    /// Send a command. `true` means the byte was handed to the transport; the pad
    /// does not acknowledge commands.
    pub async fn send_command(&self, slot: usize, bit: CommandBit, enable: Option<bool>) -> bool {
        self.try_send_command(slot, bit, enable).await.is_ok()
    }

    pub fn connected_peers(&self) -> Vec<IpAddr> {
        self.connections()
            .map(|c| c.connected_peers())
            .unwrap_or_default()
    }
}

impl Drop for PadLink {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker_lock().take() {
            ticker.abort();
        }
        if let Some(running) = self.running_lock().take() {
            let _ = running.shutdown.send(true);
            running.listener.abort();
        }
    }
}
