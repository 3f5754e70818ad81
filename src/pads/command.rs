//! Persistent per-pad command masks and last delivery outcome.
//!
//! The register only does bookkeeping; transmitting the byte is the connection
//! manager's job. The flow for one send is [`CommandRegister::prepare`] (compute and,
//! for persistent commands, store the new mask), write the byte, then
//! [`CommandRegister::record_outcome`].

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::codec::CommandBit;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandRecord {
    /// Persistent operator intent; re-sent on every (re)connect.
    pub mask: u8,
    /// Byte most recently handed to the transport (may include momentary bits).
    pub last_mask: u8,
    pub last_send_success: bool,
    pub last_send_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CommandRegister {
    records: Mutex<Vec<CommandRecord>>,
}

impl CommandRegister {
    pub fn new(fleet_size: usize) -> Self {
        Self {
            records: Mutex::new(vec![CommandRecord::default(); fleet_size]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CommandRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stored_mask(&self, slot: usize) -> u8 {
        self.lock().get(slot).map(|r| r.mask).unwrap_or(0)
    }

    pub fn status(&self, slot: usize) -> Option<CommandRecord> {
        self.lock().get(slot).cloned()
    }

    /// Compute the byte to transmit for `bit` on `slot`.
    ///
    /// `Some(true)` sets and `Some(false)` clears the bit in the stored mask.
    /// `None` is a momentary command: the bit is OR'd into the returned byte only and
    /// the stored mask is left as it was. Returns `None` for an unknown slot.
    pub fn prepare(&self, slot: usize, bit: CommandBit, enable: Option<bool>) -> Option<u8> {
        let mut records = self.lock();
        let record = records.get_mut(slot)?;
        let mask = match enable {
            Some(true) => {
                record.mask |= bit.mask();
                record.mask
            }
            Some(false) => {
                record.mask &= !bit.mask();
                record.mask
            }
            None => record.mask | bit.mask(),
        };
        Some(mask)
    }

    pub fn record_outcome(&self, slot: usize, sent: u8, success: bool) {
        if let Some(record) = self.lock().get_mut(slot) {
            record.last_mask = sent;
            record.last_send_success = success;
            record.last_send_time = Some(Utc::now());
        }
    }

    /// Zero every mask; used when the subsystem is fully stopped.
    pub fn reset(&self) {
        let now = Utc::now();
        for record in self.lock().iter_mut() {
            *record = CommandRecord {
                last_send_time: Some(now),
                ..CommandRecord::default()
            };
        }
    }
}
