//! # Fault Notification
//!
//! The callback boundary through which failed tasks are reported to the
//! layer above the dispatch core.

use alloc::string::String;

use crate::code::RuntimeErrorCode;
use crate::types::{DeviceId, FlipTaskId, StreamId, ThreadId};

/// Context id reported when an FFTS+ task failed without a context fault
pub const CONTEXT_ID_NONE: u16 = 0xFFFF;

/// Kind-specific detail attached to an exception
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExpandInfo {
    /// No extra detail
    #[default]
    None,
    /// Faulting FFTS+ context
    FftsPlus {
        /// Context id, [`CONTEXT_ID_NONE`] if unknown
        context_id: u16,
        /// Hardware thread id, `0xFFFF` if unknown
        thread_id: u16,
        /// Kernel running in the context, when it could be resolved
        kernel_name: Option<String>,
    },
    /// Merged result of a multi-subtask batch
    Batch {
        /// SQE type of the first failing sub-descriptor
        sqe_type: u8,
        /// Merged error type bits
        error_type: u8,
        /// Sub-completions received before finalization
        completed: u16,
    },
    /// Collective communication unit mission
    Ccu {
        /// Die the mission ran on
        die_id: u8,
        /// Mission id
        mission_id: u8,
        /// Raw CCU status
        status: u8,
        /// Raw CCU sub-status
        sub_status: u8,
    },
    /// Notify record or wait
    Notify {
        /// Notify id
        notify_id: u32,
        /// Remote device, `None` for a local notify
        remote_device: Option<DeviceId>,
    },
}

/// Exception delivered to the fault callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// Runtime error code of the failure
    pub retcode: RuntimeErrorCode,
    /// Task id with its flip counter
    pub task_id: FlipTaskId,
    /// Stream the task belonged to
    pub stream_id: StreamId,
    /// Host thread that created the task
    pub thread_id: ThreadId,
    /// Device the task ran on
    pub device_id: DeviceId,
    /// Kind-specific detail
    pub expand: ExpandInfo,
}

/// Receiver of task exceptions
///
/// Called synchronously from finalization. Implementations must not call
/// back into the engine.
pub trait FaultNotifier {
    /// Deliver one exception
    fn notify(&self, info: &ExceptionInfo);
}
