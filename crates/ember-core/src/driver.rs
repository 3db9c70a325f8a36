//! # Driver Facade
//!
//! The boundary between the dispatch core and the kernel driver.
//!
//! The core never touches queues or device memory itself; every such access
//! goes through [`DriverFacade`]. Descriptors and completion reports cross
//! the boundary as raw fixed-size byte records.
//!
//! ```text
//!   TaskEngine ──occupy──► SlotRun ──write──► SQ ──send──► hardware
//!        ▲                                                   │
//!        └──────── poll_completions ◄──── CQ ◄───────────────┘
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::DeviceFeatures;
use crate::error::Result;
use crate::events::HardwareEventSnapshot;
use crate::types::{CqId, DevAddr, DeviceId, SqId, StreamId};

/// Size of one submit queue entry in bytes
pub const SQE_SIZE: usize = 64;

/// Size of one completion report in bytes
pub const REPORT_SIZE: usize = 16;

/// One raw submit queue entry
pub type RawSqe = [u8; SQE_SIZE];

/// One raw completion report
pub type RawReport = [u8; REPORT_SIZE];

// =============================================================================
// QUEUE TYPES
// =============================================================================

/// Submit/completion queue pair bound to a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePair {
    /// Submit queue id
    pub sq_id: SqId,
    /// Completion queue id
    pub cq_id: CqId,
    /// Submit queue depth in entries
    pub depth: u32,
}

/// A contiguous run of reserved submit queue slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRun {
    /// First slot position
    pub pos: u32,
    /// Number of slots
    pub count: u32,
}

/// Driver-side handle for kernel argument memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ArgHandle(pub u64);

// =============================================================================
// DRIVER FACADE TRAIT
// =============================================================================

/// Driver operations used by the dispatch core
///
/// All methods take `&self`; implementations serialise internally. The
/// engine guarantees single-threaded use per queue pair.
pub trait DriverFacade: Send + Sync {
    // -------------------------------------------------------------------------
    // Queue management
    // -------------------------------------------------------------------------

    /// Allocate a queue pair for a stream
    fn allocate_queue_pair(&self, device_id: DeviceId, stream_id: StreamId) -> Result<QueuePair>;

    /// Reserve `count` contiguous submit slots
    ///
    /// Returns [`Error::TryAgain`](crate::Error::TryAgain) when the queue is
    /// momentarily full.
    fn occupy_descriptor_slots(&self, qp: &QueuePair, count: u32) -> Result<SlotRun>;

    /// Copy descriptors into reserved slots
    fn write_descriptors(&self, qp: &QueuePair, run: SlotRun, sqes: &[RawSqe]) -> Result<()>;

    /// Ring the doorbell for reserved and written slots
    fn send_descriptors(&self, qp: &QueuePair, run: SlotRun) -> Result<()>;

    /// Collect pending completion reports, waiting up to `timeout_ms`
    ///
    /// Reports are appended to `out`; the number appended is returned.
    fn poll_completions(&self, qp: &QueuePair, timeout_ms: u32, out: &mut Vec<RawReport>)
        -> Result<usize>;

    /// Return a queue pair to the driver
    fn release_queue_pair(&self, qp: &QueuePair) -> Result<()>;

    // -------------------------------------------------------------------------
    // Device queries
    // -------------------------------------------------------------------------

    /// Firmware feature set of the device
    fn features(&self, device_id: DeviceId) -> DeviceFeatures;

    /// Current hardware fault state
    fn hardware_events(&self, device_id: DeviceId) -> Result<HardwareEventSnapshot>;

    /// Address of a notify register on a remote device, seen from `local`
    fn resolve_notify_address(
        &self,
        local: DeviceId,
        remote: DeviceId,
        notify_id: u32,
    ) -> Result<DevAddr>;

    // -------------------------------------------------------------------------
    // Device memory
    // -------------------------------------------------------------------------

    /// Copy device memory into `buf`
    fn read_device_memory(&self, device_id: DeviceId, addr: DevAddr, buf: &mut [u8]) -> Result<()>;

    /// Free device memory owned by a task
    fn free_device_memory(&self, device_id: DeviceId, addr: DevAddr) -> Result<()>;

    /// Release kernel argument memory
    fn release_arg_handle(&self, handle: ArgHandle);

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Name of the kernel whose code starts at `pc_start`
    fn lookup_kernel_name(&self, device_id: DeviceId, pc_start: u64) -> Option<String>;

    /// Translate a physical address reported by hardware back to a device
    /// virtual address
    fn translate_physical(&self, device_id: DeviceId, phys: u64) -> Option<DevAddr>;
}
