//! UDP discovery: pads announce `[slot][token]` and the station answers by opening a
//! stream session to the sender.
//!
//! The exchange is stateless per datagram and replay tolerant; there are no
//! sequence numbers. A packet is accepted only if it is long enough, carries the
//! shared token and names a slot inside the configured fleet. Accepted packets bind
//! the sender's address to the slot, reset its contact age and make sure a link
//! worker exists for the address.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use super::codec::Announcement;
use super::connection::ConnectionManager;
use super::errors::DiscoveryReject;
use super::state::PadStore;
use super::stop_requested;
use crate::logutil::hex_snippet;
use crate::metrics;

const MAX_DATAGRAM: usize = 1024;

pub struct DiscoveryListener {
    store: Arc<PadStore>,
    connections: Arc<ConnectionManager>,
    secret: String,
}

impl DiscoveryListener {
    pub fn new(store: Arc<PadStore>, connections: Arc<ConnectionManager>, secret: String) -> Self {
        Self {
            store,
            connections,
            secret,
        }
    }

    /// Validate one datagram and, if accepted, record the contact and ensure a link.
    /// Returns the accepted slot.
    pub fn handle_datagram(&self, data: &[u8], from: SocketAddr) -> Result<usize, DiscoveryReject> {
        let slot = match self.authenticate(data) {
            Ok(slot) => slot,
            Err(reject) => {
                metrics::inc_discovery_rejected();
                if reject == DiscoveryReject::BadToken {
                    warn!(target: "security", "Ignoring discovery from {}: {}", from.ip(), reject);
                } else {
                    debug!(
                        "Ignoring discovery from {}: {} [{}]",
                        from.ip(),
                        reject,
                        hex_snippet(data, 24)
                    );
                }
                return Err(reject);
            }
        };

        let ip = from.ip();
        if let Err(e) = self.store.record_discovery(slot, ip) {
            warn!("Discovery from {} not recorded: {}", ip, e);
            metrics::inc_discovery_rejected();
            return Err(DiscoveryReject::SlotOutOfRange {
                slot,
                fleet_size: self.store.fleet_size(),
            });
        }
        metrics::inc_discovery_accepted();
        debug!("Discovery from {} for pad {}", ip, slot);
        self.connections.ensure_connection(slot, ip);
        Ok(slot)
    }

    fn authenticate(&self, data: &[u8]) -> Result<usize, DiscoveryReject> {
        let ann = Announcement::parse(data).ok_or(DiscoveryReject::TooShort { len: data.len() })?;
        if ann.token != self.secret {
            return Err(DiscoveryReject::BadToken);
        }
        let slot = ann.slot as usize;
        let fleet_size = self.store.fleet_size();
        if slot >= fleet_size {
            return Err(DiscoveryReject::SlotOutOfRange { slot, fleet_size });
        }
        Ok(slot)
    }

    /// Receive loop. Returns once `shutdown` flips to `true`; the socket is dropped on
    /// return, which releases the port.
    pub async fn run(self, socket: UdpSocket, mut shutdown: watch::Receiver<bool>) {
        match socket.local_addr() {
            Ok(addr) => info!("Listening for pad discovery on {}", addr),
            Err(_) => info!("Listening for pad discovery"),
        }
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = stop_requested(&mut shutdown) => break,
                recv = socket.recv_from(&mut buf) => match recv {
                    Ok((n, from)) => {
                        let _ = self.handle_datagram(&buf[..n], from);
                    }
                    Err(e) => {
                        // ICMP port-unreachable echoes surface here on some platforms
                        warn!("Discovery receive error: {} - continuing", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        drop(socket);
        info!("Discovery listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pads::command::CommandRegister;
    use crate::pads::connection::LinkTiming;
    use std::net::{IpAddr, Ipv4Addr};

    fn listener(fleet: usize) -> (DiscoveryListener, Arc<PadStore>, watch::Sender<bool>) {
        let store = Arc::new(PadStore::new(fleet));
        let (tx, rx) = watch::channel(false);
        let mgr = Arc::new(ConnectionManager::new(
            store.clone(),
            Arc::new(CommandRegister::new(fleet)),
            1,
            LinkTiming::default(),
            rx,
        ));
        (
            DiscoveryListener::new(store.clone(), mgr, "RLCU!2025".to_string()),
            store,
            tx,
        )
    }

    fn from() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 4, 7)), 40000)
    }

    #[test]
    fn rejects_without_touching_store() {
        let (listener, store, _tx) = listener(6);
        let before = store.snapshot();

        let wrong = Announcement {
            slot: 1,
            token: "nope".into(),
        }
        .encode();
        assert_eq!(
            listener.handle_datagram(&wrong, from()),
            Err(DiscoveryReject::BadToken)
        );

        let out_of_range = Announcement {
            slot: 6,
            token: "RLCU!2025".into(),
        }
        .encode();
        assert_eq!(
            listener.handle_datagram(&out_of_range, from()),
            Err(DiscoveryReject::SlotOutOfRange {
                slot: 6,
                fleet_size: 6
            })
        );

        assert_eq!(
            listener.handle_datagram(&out_of_range[..10], from()),
            Err(DiscoveryReject::TooShort { len: 10 })
        );
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn prefix_of_secret_is_not_accepted() {
        let (listener, store, _tx) = listener(6);
        let partial = Announcement {
            slot: 0,
            token: "RLCU!".into(),
        }
        .encode();
        assert!(listener.handle_datagram(&partial, from()).is_err());
        assert_eq!(store.ip_address(0), None);
    }
}
