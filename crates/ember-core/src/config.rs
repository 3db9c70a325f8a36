//! # Dispatch Configuration
//!
//! Tunables for the dispatch core and the per-device firmware feature set.

use bitflags::bitflags;

// =============================================================================
// DEVICE FEATURES
// =============================================================================

bitflags! {
    /// Firmware features advertised by a device
    ///
    /// Queried once per device through the driver facade and passed by value
    /// to everything that branches on hardware capability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceFeatures: u64 {
        /// Device consumes SQEs directly (otherwise legacy TS commands)
        const STARS = 1 << 0;
        /// Stream and task ids are swapped for software submit queues
        const SOFTWARE_SQ = 1 << 1;
        /// FFTS+ tasks share one task id space across streams
        const TASK_SAME_FOR_ALL = 1 << 2;
        /// HCCL FFTS+ tasks carry a per-stream index in the task id
        const FFTSPLUS_TASKID_SAME_FIX = 1 << 3;
        /// FFTS+ descriptors carry a firmware timeout field
        const FFTSPLUS_TIMEOUT = 1 << 4;
        /// Driver can report hardware fault events
        const FAULT_EVENT_QUERY = 1 << 5;
        /// Tasks are allocated from a stream pool; SMMU faults are not UCEs
        const STREAM_POOL_ALLOC = 1 << 6;
    }
}

impl DeviceFeatures {
    /// Check if the device consumes SQEs directly
    #[inline]
    pub fn uses_sqe(self) -> bool {
        self.contains(Self::STARS)
    }
}

// =============================================================================
// DISPATCH CONFIG
// =============================================================================

/// Dispatch core configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Last task id before the id wraps and the flip counter advances
    pub task_id_max: u16,
    /// Cap on descriptors produced by a batch task
    pub max_batch_entries: usize,
    /// Default hardware credit
    pub kernel_credit: u8,
    /// Credit that disables the hardware timeout
    pub never_timeout_credit: u8,
    /// Timeout in seconds applied to HCCL FFTS+ tasks that leave it at 0
    pub hccl_ffts_timeout: u16,
    /// Request one completion entry per descriptor
    pub wr_cqe: bool,
    /// Set the header overflow-enable bit
    pub overflow_detect: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            task_id_max: 0xFFFF,
            max_batch_entries: 255,
            kernel_credit: 254,
            never_timeout_credit: 255,
            hccl_ffts_timeout: 1800,
            wr_cqe: true,
            overflow_detect: false,
        }
    }
}

impl DispatchConfig {
    /// Check the configuration for values the hardware cannot take
    pub fn validate(&self) -> crate::Result<()> {
        if self.task_id_max == 0 || self.max_batch_entries == 0 || self.max_batch_entries > 255 {
            log::error!(
                "invalid dispatch config, task_id_max={}, max_batch_entries={}",
                self.task_id_max,
                self.max_batch_entries
            );
            return Err(crate::Error::InvalidParameter);
        }
        Ok(())
    }
}
