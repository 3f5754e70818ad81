//! A software pad for bench testing the station without hardware.
//!
//! The simulator speaks the pad side of both protocols: it announces itself over UDP,
//! accepts the station's stream connection, emits telemetry frames and records every
//! command byte it receives. Arming follows the ready-to-fire bit so an operator can
//! watch the arm indicator respond to commands.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::codec::{Announcement, CommandBit, Telemetry};
use super::stop_requested;
use super::{DEFAULT_PORT, DEFAULT_SECRET};

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub slot: u8,
    /// Where announcements are sent; a broadcast address works too.
    pub station: SocketAddr,
    /// Where the simulator accepts the station's stream connection.
    pub listen: SocketAddr,
    pub secret: String,
    pub announce_interval: Duration,
    pub telemetry_interval: Duration,
    pub igniter_id: u8,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            slot: 0,
            station: SocketAddr::new(Ipv4Addr::BROADCAST.into(), DEFAULT_PORT),
            listen: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), DEFAULT_PORT),
            secret: DEFAULT_SECRET.to_string(),
            announce_interval: Duration::from_secs(1),
            telemetry_interval: Duration::from_millis(500),
            igniter_id: 1,
        }
    }
}

#[derive(Default)]
struct SimState {
    received: Vec<u8>,
    sessions: usize,
}

pub struct SimulatedPad {
    config: SimConfig,
    listener: TcpListener,
    state: Mutex<SimState>,
}

impl SimulatedPad {
    /// Bind the stream listener. Use port 0 in `config.listen` to get an ephemeral port.
    pub async fn bind(config: SimConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        Ok(Self {
            config,
            listener,
            state: Mutex::new(SimState::default()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Every command byte received so far, oldest first.
    pub fn received(&self) -> Vec<u8> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .received
            .clone()
    }

    pub fn last_command(&self) -> Option<u8> {
        self.received().last().copied()
    }

    /// Number of stream sessions the station has opened.
    pub fn sessions(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).sessions
    }

    fn record(&self, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .received
            .extend_from_slice(bytes);
    }

    fn armed(&self) -> bool {
        self.last_command()
            .is_some_and(|m| m & CommandBit::ReadyToFire.mask() != 0)
    }

    /// Announce and serve until `shutdown` flips. A new station connection replaces the
    /// previous one.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        let announcer = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        announcer.set_broadcast(true)?;
        let hello = Announcement {
            slot: self.config.slot,
            token: self.config.secret.clone(),
        }
        .encode();

        info!(
            "Simulated pad {} announcing to {} and listening on {}",
            self.config.slot,
            self.config.station,
            self.local_addr()?
        );
        let mut ticker = interval(self.config.announce_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut session: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = stop_requested(&mut shutdown) => break,
                _ = ticker.tick() => {
                    if let Err(e) = announcer.send_to(&hello, self.config.station).await {
                        warn!("Announce to {} failed: {}", self.config.station, e);
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Station connected from {}", peer);
                        if let Some(old) = session.take() {
                            old.abort();
                        }
                        self.state.lock().unwrap_or_else(|e| e.into_inner()).sessions += 1;
                        session = Some(tokio::spawn(self.clone().serve(stream, shutdown.clone())));
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
            }
        }
        if let Some(s) = session {
            s.abort();
        }
        info!("Simulated pad {} stopped", self.config.slot);
        Ok(())
    }

    async fn serve(self: Arc<Self>, stream: TcpStream, mut shutdown: watch::Receiver<bool>) {
        let (mut reader, mut writer) = stream.into_split();
        let mut frames = interval(self.config.telemetry_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; 64];
        loop {
            tokio::select! {
                _ = stop_requested(&mut shutdown) => break,
                _ = frames.tick() => {
                    let frame = self.sample().encode();
                    if let Err(e) = writer.write_all(&frame).await {
                        debug!("Telemetry write failed: {}", e);
                        break;
                    }
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!("Station closed the connection");
                        break;
                    }
                    Ok(n) => {
                        for b in &buf[..n] {
                            info!("Command byte 0b{:08b}", b);
                        }
                        self.record(&buf[..n]);
                    }
                    Err(e) => {
                        debug!("Command read failed: {}", e);
                        break;
                    }
                },
            }
        }
    }

    fn sample(&self) -> Telemetry {
        let mut rng = rand::thread_rng();
        Telemetry {
            voltage: rng.gen_range(11.0..12.6),
            rssi: rng.gen_range(-80.0..-40.0),
            interlock_removed: self.armed(),
            continuity: rng.gen_bool(0.95),
            igniter_id: self.config.igniter_id,
        }
    }
}
