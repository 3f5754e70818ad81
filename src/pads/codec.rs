//! Wire formats spoken between the station and its pads.
//!
//! ```text
//! Discovery datagram (pad -> station, UDP)
//! ┌─────────┬──────────────────────────────┐
//! │ slot u8 │ token, 16 bytes, NUL padded  │  trailing bytes ignored
//! └─────────┴──────────────────────────────┘
//!
//! Telemetry frame (pad -> station, TCP, back-to-back, no delimiter)
//! ┌────────────┬────────────┬──────────┬────────────┬─────────┬──────────┐
//! │ f32 LE     │ f32 LE     │ u8       │ u8         │ u8      │ u8       │
//! │ voltage    │ rssi       │ rbf out  │ continuity │ igniter │ reserved │
//! └────────────┴────────────┴──────────┴────────────┴─────────┴──────────┘
//!
//! Command byte (station -> pad, TCP): bit0 ready, bit1 launch, bit2 LED, bit3 buzzer
//! ```
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

/// Size of the shared-secret field in the discovery datagram.
pub const TOKEN_LEN: usize = 16;
/// Minimum discovery datagram length (slot byte + token).
pub const DISCOVERY_LEN: usize = 1 + TOKEN_LEN;
/// Size of one telemetry frame.
pub const FRAME_LEN: usize = 12;

/// One decoded telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub voltage: f32,
    pub rssi: f32,
    /// Remove-before-flight pin pulled: the safety interlock is out.
    pub interlock_removed: bool,
    pub continuity: bool,
    pub igniter_id: u8,
}

impl Telemetry {
    pub fn decode(frame: &[u8; FRAME_LEN]) -> Self {
        let voltage = f32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let rssi = f32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        Self {
            voltage,
            rssi,
            interlock_removed: frame[8] != 0,
            continuity: frame[9] != 0,
            igniter_id: frame[10],
        }
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[0..4].copy_from_slice(&self.voltage.to_le_bytes());
        out[4..8].copy_from_slice(&self.rssi.to_le_bytes());
        out[8] = self.interlock_removed as u8;
        out[9] = self.continuity as u8;
        out[10] = self.igniter_id;
        out
    }
}

/// A parsed (not yet authenticated) discovery announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub slot: u8,
    pub token: String,
}

impl Announcement {
    /// Parse the fixed prefix of a datagram. Returns `None` when it is too short.
    ///
    /// The token is trimmed at the first NUL and any non-ASCII bytes are dropped.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < DISCOVERY_LEN {
            return None;
        }
        let raw = &data[1..DISCOVERY_LEN];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let token = raw[..end]
            .iter()
            .filter(|b| b.is_ascii())
            .map(|&b| b as char)
            .collect();
        Some(Self {
            slot: data[0],
            token,
        })
    }

    /// Encode for transmission; tokens longer than the field are truncated.
    pub fn encode(&self) -> [u8; DISCOVERY_LEN] {
        let mut out = [0u8; DISCOVERY_LEN];
        out[0] = self.slot;
        let bytes = self.token.as_bytes();
        let n = bytes.len().min(TOKEN_LEN);
        out[1..1 + n].copy_from_slice(&bytes[..n]);
        out
    }
}

/// Command bits understood by the pad firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandBit {
    ReadyToFire,
    /// Momentary; normally sent with `enable = None`.
    Launch,
    Led,
    Buzzer,
}

impl CommandBit {
    pub const ALL: [CommandBit; 4] = [
        CommandBit::ReadyToFire,
        CommandBit::Launch,
        CommandBit::Led,
        CommandBit::Buzzer,
    ];

    pub fn mask(self) -> u8 {
        match self {
            CommandBit::ReadyToFire => 0b0000_0001,
            CommandBit::Launch => 0b0000_0010,
            CommandBit::Led => 0b0000_0100,
            CommandBit::Buzzer => 0b0000_1000,
        }
    }
}

/// Incremental length-driven framer for the telemetry stream.
///
/// Fed with arbitrary read chunks; yields whole frames in arrival order.
#[derive(Debug, Default)]
pub struct TelemetryFramer {
    buf: BytesMut,
}

impl TelemetryFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(FRAME_LEN * 8),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Mutable access for `AsyncReadExt::read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn next_frame(&mut self) -> Option<Telemetry> {
        if self.buf.len() < FRAME_LEN {
            return None;
        }
        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(&self.buf[..FRAME_LEN]);
        self.buf.advance(FRAME_LEN);
        Some(Telemetry::decode(&frame))
    }
}
