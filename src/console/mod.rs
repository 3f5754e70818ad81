//! Serial link to the physical control console (key switch, launch toggle, status LEDs).
//!
//! Both directions carry a single bitmask byte:
//!
//! | direction        | bit 0   | bit 1   | bit 2      |
//! |------------------|---------|---------|------------|
//! | station → console| arm-hmi | arm-pad | continuity |
//! | console → station| arm-hmi | launch  |            |
//!
//! The console repeats its state byte; [`ConsoleDecoder`] drops repeats and turns
//! changes into [`ConsoleEvent`]s. With the `serial` feature, [`ConsoleLink`] owns the
//! port, runs a blocking reader thread and hands events to async code over `mpsc`.

use serde::Serialize;
use thiserror::Error;

pub const TX_ARM_HMI: u8 = 0b0000_0001;
pub const TX_ARM_PAD: u8 = 0b0000_0010;
pub const TX_CONTINUITY: u8 = 0b0000_0100;

pub const RX_ARM_HMI: u8 = 0b0000_0001;
pub const RX_LAUNCH: u8 = 0b0000_0010;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[cfg(feature = "serial")]
    #[error("failed to open serial port {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("console link is closed")]
    Closed,
}

/// LED state pushed to the console.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsoleStatus {
    pub arm_hmi: bool,
    pub arm_pad: bool,
    pub continuity: bool,
}

impl ConsoleStatus {
    pub fn mask(self) -> u8 {
        let mut mask = 0;
        if self.arm_hmi {
            mask |= TX_ARM_HMI;
        }
        if self.arm_pad {
            mask |= TX_ARM_PAD;
        }
        if self.continuity {
            mask |= TX_CONTINUITY;
        }
        mask
    }
}

/// A change in the console's switch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsoleEvent {
    pub arm_hmi: bool,
    pub launch: bool,
    /// The launch bit went from clear to set with this byte.
    pub launch_edge: bool,
}

#[derive(Debug, Default)]
pub struct ConsoleDecoder {
    last: u8,
}

impl ConsoleDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received byte. Returns `None` when the byte repeats the previous one.
    pub fn push(&mut self, byte: u8) -> Option<ConsoleEvent> {
        let prev = self.last;
        if byte == prev {
            return None;
        }
        self.last = byte;
        Some(ConsoleEvent {
            arm_hmi: byte & RX_ARM_HMI != 0,
            launch: byte & RX_LAUNCH != 0,
            launch_edge: byte & RX_LAUNCH != 0 && prev & RX_LAUNCH == 0,
        })
    }

    pub fn reset(&mut self) {
        self.last = 0;
    }
}

#[cfg(feature = "serial")]
mod link;
#[cfg(feature = "serial")]
pub use link::{list_ports, ConsoleLink};
