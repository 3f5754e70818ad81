//! Fleet state store: one [`PadRecord`] per configured slot.
//!
//! The store owns its mutex and is shared as `Arc<PadStore>` by the discovery
//! listener, the connection workers, the staleness ticker and any number of readers.
//! Every mutation is a single method running in one critical section, and no
//! critical section spans an `.await`, so readers always observe a record whose raw
//! values and derived indicators agree.

use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use super::codec::{CommandBit, Telemetry};
use super::errors::PadError;

/// Seconds without contact after which a pad is flagged stale.
pub const DEFAULT_STALE_AFTER_SECS: u32 = 30;
/// Minimum healthy battery voltage.
pub const VOLTAGE_OK_THRESHOLD: f32 = 10.0;
const RSSI_STRONG_ABOVE: f32 = -50.0;
const RSSI_MEDIUM_ABOVE: f32 = -70.0;

/// Signal strength category derived from `rssi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RssiBand {
    Strong,
    Medium,
    Weak,
}

impl RssiBand {
    pub fn from_rssi(rssi: f32) -> Self {
        if rssi > RSSI_STRONG_ABOVE {
            RssiBand::Strong
        } else if rssi > RSSI_MEDIUM_ABOVE {
            RssiBand::Medium
        } else {
            RssiBand::Weak
        }
    }

    pub fn indicator(self) -> Indicator {
        match self {
            RssiBand::Strong => Indicator::Green,
            RssiBand::Medium => Indicator::Yellow,
            RssiBand::Weak => Indicator::Red,
        }
    }
}

/// Presentation color for a field, for consumption by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    Green,
    Yellow,
    Red,
    /// Neutral text color (fresh contact).
    Black,
}

/// Snapshot of one pad slot.
///
/// Derived values (`rssi_band`, `voltage_ok`, `is_stale` and the indicator colors)
/// are methods, never stored, so they cannot drift from the raw fields.
///
/// Arm semantics are inverted on purpose: `arm_status == true` means the
/// remove-before-flight interlock is out, which is the *unsafe* state, so
/// [`PadRecord::arm_indicator`] is red when armed and green when safe. This mirrors the
/// interlock's active-low wiring and must not be "fixed".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PadRecord {
    pub slot: usize,
    pub team_id: u32,
    /// Address of the peer currently owning this slot; `None` until first contact.
    pub ip_address: Option<IpAddr>,
    pub rssi: f32,
    pub continuity: bool,
    /// Safety interlock removed (see the type-level note on inverted semantics).
    pub arm_status: bool,
    pub voltage: f32,
    pub igniter_id: u8,
    pub last_contact_age: u32,
    pub frames_received: u64,
    pub buzzer_on: bool,
    pub led_on: bool,
    pub ready_to_fire: bool,
    #[serde(skip)]
    stale_after: u32,
}

impl PadRecord {
    fn new(slot: usize, stale_after: u32) -> Self {
        Self {
            slot,
            team_id: 0,
            ip_address: None,
            rssi: -100.0,
            continuity: false,
            arm_status: false,
            voltage: 0.0,
            igniter_id: 0,
            last_contact_age: 0,
            frames_received: 0,
            buzzer_on: false,
            led_on: false,
            ready_to_fire: false,
            stale_after,
        }
    }

    pub fn rssi_band(&self) -> RssiBand {
        RssiBand::from_rssi(self.rssi)
    }

    pub fn voltage_ok(&self) -> bool {
        self.voltage >= VOLTAGE_OK_THRESHOLD
    }

    pub fn is_stale(&self) -> bool {
        self.last_contact_age > self.stale_after
    }

    pub fn rssi_indicator(&self) -> Indicator {
        self.rssi_band().indicator()
    }

    pub fn voltage_indicator(&self) -> Indicator {
        if self.voltage_ok() {
            Indicator::Green
        } else {
            Indicator::Red
        }
    }

    pub fn continuity_indicator(&self) -> Indicator {
        if self.continuity {
            Indicator::Green
        } else {
            Indicator::Red
        }
    }

    pub fn arm_indicator(&self) -> Indicator {
        if self.arm_status {
            Indicator::Red
        } else {
            Indicator::Green
        }
    }

    pub fn contact_indicator(&self) -> Indicator {
        if self.is_stale() {
            Indicator::Red
        } else {
            Indicator::Black
        }
    }

    /// Display letter used on the pad cards (slot 0 is "A").
    pub fn letter(&self) -> char {
        (b'A' + (self.slot % 26) as u8) as char
    }

    fn mark_contact(&mut self) {
        self.last_contact_age = 0;
    }
}

/// Process-wide, fixed-size store of pad records.
#[derive(Debug)]
pub struct PadStore {
    pads: Mutex<Vec<PadRecord>>,
}

impl PadStore {
    pub fn new(fleet_size: usize) -> Self {
        Self::with_stale_after(fleet_size, DEFAULT_STALE_AFTER_SECS)
    }

    pub fn with_stale_after(fleet_size: usize, stale_after_secs: u32) -> Self {
        let pads = (0..fleet_size)
            .map(|slot| PadRecord::new(slot, stale_after_secs))
            .collect();
        Self {
            pads: Mutex::new(pads),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PadRecord>> {
        // All writes are plain field stores; a poisoned lock still holds whole records.
        self.pads.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fleet_size(&self) -> usize {
        self.lock().len()
    }

    /// Consistent point-in-time copy of one slot.
    pub fn get(&self, slot: usize) -> Option<PadRecord> {
        self.lock().get(slot).cloned()
    }

    pub fn snapshot(&self) -> Vec<PadRecord> {
        self.lock().clone()
    }

    pub fn ip_address(&self, slot: usize) -> Option<IpAddr> {
        self.lock().get(slot).and_then(|p| p.ip_address)
    }

    /// Slot currently bound to `ip`, if any.
    pub fn slot_for(&self, ip: IpAddr) -> Option<usize> {
        self.lock().iter().position(|p| p.ip_address == Some(ip))
    }

    /// Record a discovery contact: bind `ip` to `slot` and reset its age.
    ///
    /// Any other slot holding the same address loses it; the latest announcement wins.
    pub fn record_discovery(&self, slot: usize, ip: IpAddr) -> Result<(), PadError> {
        let mut pads = self.lock();
        check_slot(&pads, slot)?;
        bind(&mut pads, slot, ip);
        pads[slot].mark_contact();
        Ok(())
    }

    /// Apply one decoded telemetry frame received from `ip`.
    pub fn apply_telemetry(
        &self,
        slot: usize,
        ip: IpAddr,
        telemetry: &Telemetry,
    ) -> Result<(), PadError> {
        let mut pads = self.lock();
        check_slot(&pads, slot)?;
        bind(&mut pads, slot, ip);
        let pad = &mut pads[slot];
        pad.mark_contact();
        pad.voltage = telemetry.voltage;
        pad.rssi = telemetry.rssi;
        pad.arm_status = telemetry.interlock_removed;
        pad.continuity = telemetry.continuity;
        pad.igniter_id = telemetry.igniter_id;
        pad.frames_received = pad.frames_received.saturating_add(1);
        Ok(())
    }

    /// Age every slot by one second.
    pub fn tick(&self) {
        for pad in self.lock().iter_mut() {
            pad.last_contact_age = pad.last_contact_age.saturating_add(1);
        }
    }

    pub fn set_team_id(&self, slot: usize, team_id: u32) -> Result<(), PadError> {
        let mut pads = self.lock();
        check_slot(&pads, slot)?;
        pads[slot].team_id = team_id;
        Ok(())
    }

    /// Mirror the operator's last delivered intent for a persistent command bit.
    /// Momentary bits (launch) have no mirror and are ignored.
    pub fn set_command_intent(
        &self,
        slot: usize,
        bit: CommandBit,
        on: bool,
    ) -> Result<(), PadError> {
        let mut pads = self.lock();
        check_slot(&pads, slot)?;
        let pad = &mut pads[slot];
        match bit {
            CommandBit::ReadyToFire => pad.ready_to_fire = on,
            CommandBit::Led => pad.led_on = on,
            CommandBit::Buzzer => pad.buzzer_on = on,
            CommandBit::Launch => {}
        }
        Ok(())
    }

    /// Clear the intent mirrors of every slot (the command register was reset).
    pub fn clear_command_intents(&self) {
        for pad in self.lock().iter_mut() {
            pad.ready_to_fire = false;
            pad.led_on = false;
            pad.buzzer_on = false;
        }
    }
}

fn check_slot(pads: &[PadRecord], slot: usize) -> Result<(), PadError> {
    if slot < pads.len() {
        Ok(())
    } else {
        Err(PadError::SlotOutOfRange {
            slot,
            fleet_size: pads.len(),
        })
    }
}

fn bind(pads: &mut [PadRecord], slot: usize, ip: IpAddr) {
    for (i, pad) in pads.iter_mut().enumerate() {
        if i != slot && pad.ip_address == Some(ip) {
            pad.ip_address = None;
        }
    }
    pads[slot].ip_address = Some(ip);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 4, last))
    }

    #[test]
    fn defaults_match_fresh_slot() {
        let store = PadStore::new(6);
        assert_eq!(store.fleet_size(), 6);
        let pad = store.get(5).expect("slot 5");
        assert_eq!(pad.team_id, 0);
        assert_eq!(pad.ip_address, None);
        assert_eq!(pad.rssi_band(), RssiBand::Weak);
        assert!(!pad.voltage_ok());
        assert_eq!(pad.arm_indicator(), Indicator::Green);
        assert_eq!(pad.letter(), 'F');
        assert!(store.get(6).is_none());
    }

    #[test]
    fn example_frame_derives_expected_indicators() {
        let store = PadStore::new(6);
        let t = Telemetry {
            voltage: 11.4,
            rssi: -48.0,
            interlock_removed: false,
            continuity: true,
            igniter_id: 2,
        };
        store.apply_telemetry(2, ip(12), &t).expect("apply");
        let pad = store.get(2).expect("slot 2");
        assert!(pad.voltage_ok());
        assert_eq!(pad.rssi_band(), RssiBand::Strong);
        assert!(pad.continuity);
        assert!(!pad.arm_status);
        assert_eq!(pad.arm_indicator(), Indicator::Green);
        assert_eq!(pad.igniter_id, 2);
        assert_eq!(pad.frames_received, 1);
    }

    #[test]
    fn rssi_band_thresholds_are_exclusive() {
        assert_eq!(RssiBand::from_rssi(-49.9), RssiBand::Strong);
        assert_eq!(RssiBand::from_rssi(-50.0), RssiBand::Medium);
        assert_eq!(RssiBand::from_rssi(-69.9), RssiBand::Medium);
        assert_eq!(RssiBand::from_rssi(-70.0), RssiBand::Weak);
    }

    #[test]
    fn armed_interlock_is_shown_unsafe() {
        let store = PadStore::new(1);
        let t = Telemetry {
            voltage: 9.99,
            rssi: -60.0,
            interlock_removed: true,
            continuity: false,
            igniter_id: 0,
        };
        store.apply_telemetry(0, ip(2), &t).expect("apply");
        let pad = store.get(0).expect("slot");
        assert_eq!(pad.arm_indicator(), Indicator::Red);
        assert_eq!(pad.voltage_indicator(), Indicator::Red);
        assert_eq!(pad.rssi_indicator(), Indicator::Yellow);
        assert_eq!(pad.continuity_indicator(), Indicator::Red);
    }

    #[test]
    fn latest_discovery_wins_address_binding() {
        let store = PadStore::new(4);
        store.record_discovery(1, ip(20)).expect("bind");
        store.record_discovery(3, ip(20)).expect("rebind");
        assert_eq!(store.ip_address(1), None);
        assert_eq!(store.ip_address(3), Some(ip(20)));
        assert_eq!(store.slot_for(ip(20)), Some(3));

        store.record_discovery(3, ip(21)).expect("replace");
        assert_eq!(store.ip_address(3), Some(ip(21)));
        assert_eq!(store.slot_for(ip(20)), None);
    }

    #[test]
    fn staleness_flips_after_threshold_and_resets_on_contact() {
        let store = PadStore::new(2);
        store.record_discovery(0, ip(5)).expect("bind");
        for _ in 0..30 {
            store.tick();
        }
        let pad = store.get(0).expect("slot");
        assert_eq!(pad.last_contact_age, 30);
        assert!(!pad.is_stale());
        store.tick();
        let pad = store.get(0).expect("slot");
        assert!(pad.is_stale());
        assert_eq!(pad.contact_indicator(), Indicator::Red);

        store.record_discovery(0, ip(5)).expect("contact");
        let pad = store.get(0).expect("slot");
        assert_eq!(pad.last_contact_age, 0);
        assert!(!pad.is_stale());
        assert_eq!(pad.contact_indicator(), Indicator::Black);
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let store = PadStore::new(2);
        let err = store.record_discovery(2, ip(1)).unwrap_err();
        assert!(matches!(
            err,
            PadError::SlotOutOfRange {
                slot: 2,
                fleet_size: 2
            }
        ));
        assert!(store.set_team_id(9, 1).is_err());
    }

    #[test]
    fn command_intent_mirrors_persistent_bits_only() {
        let store = PadStore::new(1);
        store
            .set_command_intent(0, CommandBit::Led, true)
            .expect("led");
        store
            .set_command_intent(0, CommandBit::Launch, true)
            .expect("launch");
        let pad = store.get(0).expect("slot");
        assert!(pad.led_on);
        assert!(!pad.buzzer_on && !pad.ready_to_fire);
        store.clear_command_intents();
        assert!(!store.get(0).expect("slot").led_on);
    }
}
