//! Test utilities & fixtures shared by the loopback integration tests.
#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use padlink::pads::codec::Announcement;
use padlink::pads::connection::LinkTiming;
use padlink::pads::{StationSettings, DEFAULT_SECRET};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Link timings short enough for tests while keeping the production ordering.
pub fn fast_timing() -> LinkTiming {
    LinkTiming {
        connect_timeout: Duration::from_millis(500),
        read_poll: Duration::from_millis(20),
        telemetry_timeout: Duration::from_secs(3),
        reconnect_delay: Duration::from_millis(50),
        send_timeout: Duration::from_millis(500),
        shutdown_grace: Duration::from_millis(500),
    }
}

/// A loopback TCP listener standing in for the pad side. Its ephemeral port is also
/// used as the station's discovery port, since pads accept the stream on that port.
pub async fn pad_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.expect("bind pad listener");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

pub fn settings(port: u16) -> StationSettings {
    StationSettings {
        port,
        bind_address: LOCALHOST,
        shared_secret: DEFAULT_SECRET.to_string(),
        timing: fast_timing(),
        tick: Duration::from_secs(1),
    }
}

pub async fn announce_with(port: u16, slot: u8, token: &str) {
    send_announcement(LOCALHOST, port, slot, token).await
}

/// Announce from another loopback address (e.g. 127.0.0.2) so the station sees a
/// second pad.
pub async fn announce_from(src: IpAddr, port: u16, slot: u8) {
    send_announcement(src, port, slot, DEFAULT_SECRET).await
}

async fn send_announcement(src: IpAddr, port: u16, slot: u8, token: &str) {
    let sock = UdpSocket::bind((src, 0)).await.expect("bind udp");
    let datagram = Announcement {
        slot,
        token: token.to_string(),
    }
    .encode();
    sock.send_to(&datagram, SocketAddr::new(LOCALHOST, port))
        .await
        .expect("send announcement");
}

pub async fn announce(port: u16, slot: u8) {
    announce_with(port, slot, DEFAULT_SECRET).await
}

pub async fn send_raw(port: u16, data: &[u8]) {
    let sock = UdpSocket::bind((LOCALHOST, 0)).await.expect("bind udp");
    sock.send_to(data, SocketAddr::new(LOCALHOST, port))
        .await
        .expect("send datagram");
}

pub async fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = tokio::time::timeout(Duration::from_secs(3), listener.accept())
        .await
        .expect("station did not connect in time")
        .expect("accept");
    stream
}

pub async fn read_command(stream: &mut TcpStream) -> u8 {
    tokio::time::timeout(Duration::from_secs(2), stream.read_u8())
        .await
        .expect("no command byte in time")
        .expect("read command byte")
}

/// Poll `cond` every 10ms until it holds or `limit` elapses.
pub async fn wait_until<F>(limit: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
