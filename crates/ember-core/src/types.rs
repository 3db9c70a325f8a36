//! # Ember Core Types
//!
//! Identifiers and addresses used across the dispatch core.
//!
//! These types provide:
//! - Strong typing for device addresses, with the hardware's 32 + 17 bit split
//! - Plain aliases for the small hardware identifiers
//! - Flip-encoded task ids for reporting

use core::fmt;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Device ordinal
pub type DeviceId = u32;

/// Stream identifier (16 bits on the wire)
pub type StreamId = u16;

/// Task identifier, unique within its stream while in flight
pub type TaskId = u16;

/// Submit queue identifier
pub type SqId = u32;

/// Completion queue identifier
pub type CqId = u32;

/// Host thread that created a task
pub type ThreadId = u32;

// =============================================================================
// DEVICE ADDRESS
// =============================================================================

/// Mask of the high address field carried in descriptors
pub const DEV_ADDR_HIGH_MASK: u32 = 0x1_FFFF;

/// Number of significant address bits the hardware accepts
pub const DEV_ADDR_BITS: u32 = 32 + 17;

/// Device virtual address
///
/// Descriptors carry addresses as a 32-bit low word plus a 17-bit high
/// field. [`DevAddr::lo32`] and [`DevAddr::hi17`] produce exactly that split.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct DevAddr(u64);

impl DevAddr {
    /// Create a new device address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Create a null device address
    #[inline]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Rebuild an address from its descriptor halves
    #[inline]
    pub const fn from_split(lo: u32, hi: u32) -> Self {
        Self(((hi & DEV_ADDR_HIGH_MASK) as u64) << 32 | lo as u64)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Check if null
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Low 32 bits
    #[inline]
    pub const fn lo32(self) -> u32 {
        self.0 as u32
    }

    /// High field, masked to 17 bits
    #[inline]
    pub const fn hi17(self) -> u32 {
        ((self.0 >> 32) as u32) & DEV_ADDR_HIGH_MASK
    }

    /// Check that the address survives the descriptor split unchanged
    #[inline]
    pub const fn fits_descriptor(self) -> bool {
        self.0 >> DEV_ADDR_BITS == 0
    }

    /// Offset by bytes
    #[inline]
    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl fmt::Debug for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevAddr(0x{:012x})", self.0)
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012x}", self.0)
    }
}

// =============================================================================
// FLIP TASK ID
// =============================================================================

/// Task id widened with its flip counter: `task_id | flip << 16`
///
/// The 16-bit task id wraps with the queue; the flip counter tells two
/// generations of the same id apart in fault reports.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct FlipTaskId(u32);

impl FlipTaskId {
    /// Combine a task id with its flip counter
    #[inline]
    pub const fn new(task_id: TaskId, flip: u16) -> Self {
        Self(task_id as u32 | (flip as u32) << 16)
    }

    /// Raw 32-bit value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Task id part
    #[inline]
    pub const fn task_id(self) -> TaskId {
        self.0 as u16
    }

    /// Flip counter part
    #[inline]
    pub const fn flip(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl fmt::Debug for FlipTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlipTaskId({}#{})", self.task_id(), self.flip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_addr_split() {
        let addr = DevAddr::new(0x1_2345_6789_ABCD);
        assert_eq!(addr.lo32(), 0x6789_ABCD);
        assert_eq!(addr.hi17(), 0x1_2345);
        assert!(addr.fits_descriptor());
        assert_eq!(DevAddr::from_split(addr.lo32(), addr.hi17()), addr);
    }

    #[test]
    fn test_dev_addr_high_bits_dropped() {
        let addr = DevAddr::new(0xFFFF_0000_0000_0010);
        assert!(!addr.fits_descriptor());
        assert_eq!(addr.hi17(), 0x1_0000);
        assert_eq!(DevAddr::from_split(addr.lo32(), addr.hi17()).raw(), 0x1_0000_0000_0010);
    }

    #[test]
    fn test_flip_task_id() {
        let id = FlipTaskId::new(0x0102, 3);
        assert_eq!(id.raw(), 0x0003_0102);
        assert_eq!(id.task_id(), 0x0102);
        assert_eq!(id.flip(), 3);
    }
}
