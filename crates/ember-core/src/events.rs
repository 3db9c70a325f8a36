//! # Hardware Fault Events
//!
//! A snapshot of the device's recent fault events, taken by the engine when
//! a completion report carries error bits. The classifier consults it to
//! tell memory faults from link faults.

use arrayvec::ArrayVec;

/// Maximum number of fault events held by a snapshot
pub const MAX_FAULT_EVENTS: usize = 128;

/// One hardware fault event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultEvent {
    /// Event identifier
    pub event_id: u32,
    /// Sub-module that raised the event
    pub sub_module_id: u8,
    /// Index of the error register the RAS code was read from
    pub error_register_index: u8,
    /// RAS code bytes, big-endian
    pub ras_code: [u8; 4],
}

impl FaultEvent {
    /// Create an event with no RAS payload
    pub const fn new(event_id: u32) -> Self {
        Self {
            event_id,
            sub_module_id: 0,
            error_register_index: 0,
            ras_code: [0; 4],
        }
    }

    /// RAS code as an integer
    #[inline]
    pub const fn ras_code_value(&self) -> u32 {
        u32::from_be_bytes(self.ras_code)
    }
}

/// Hardware fault state at the time a failure was observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareEventSnapshot {
    /// A RAS memory alarm is pending
    pub ras_alarm: bool,
    /// An SMMU fault is pending
    pub smmu_fault: bool,
    /// Recent fault events, oldest first
    pub events: ArrayVec<FaultEvent, MAX_FAULT_EVENTS>,
}

impl HardwareEventSnapshot {
    /// Empty snapshot: no alarms, no events
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append an event; extra events past the capacity are dropped
    pub fn push_event(&mut self, event: FaultEvent) -> bool {
        self.events.try_push(event).is_ok()
    }

    /// Check if any event id appears in `ids`
    pub fn hits_any(&self, ids: &[u32]) -> bool {
        self.events.iter().any(|e| ids.contains(&e.event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_capacity() {
        let mut snapshot = HardwareEventSnapshot::empty();
        for i in 0..MAX_FAULT_EVENTS as u32 {
            assert!(snapshot.push_event(FaultEvent::new(i)));
        }
        assert!(!snapshot.push_event(FaultEvent::new(0xFFFF)));
        assert!(snapshot.hits_any(&[5]));
        assert!(!snapshot.hits_any(&[0xFFFF]));
    }

    #[test]
    fn test_ras_code_big_endian() {
        let event = FaultEvent {
            ras_code: [0x10, 0x00, 0x00, 0x01],
            ..FaultEvent::new(1)
        };
        assert_eq!(event.ras_code_value(), 0x1000_0001);
    }
}
