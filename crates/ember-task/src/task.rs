//! # Task Model
//!
//! A task is one logical unit of work on a stream. It owns its kind-specific
//! payload and the completion accounting the engine drives it through.
//!
//! ## Lifecycle
//!
//! ```text
//!  Init ──encode──► Encoded ──submit──► Submitted ──report──► AwaitingCompletion
//!                                            │                      │
//!                                            └──── received == expected ────► Completed
//!                                                                                 │
//!                                    Released ◄──────────── release ◄─────────────┘
//! ```
//!
//! Release is accepted from any state.

use ember_core::{
    DeviceId, Error, ExceptionInfo, ExpandInfo, FlipTaskId, Result, RuntimeErrorCode, SlotRun,
    StreamId, TaskId, ThreadId,
};

use crate::batch::BatchPayload;
use crate::ccu::CcuPayload;
use crate::ffts::FftsPlusPayload;
use crate::generic::{KernelPayload, MemcpyPayload};
use crate::kind::TaskKind;
use crate::notify::{NotifyRecordPayload, NotifyWaitPayload, WriteValuePayload};

// =============================================================================
// STATE
// =============================================================================

/// Final outcome of a completed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Accumulated error code is zero
    Success,
    /// Accumulated error code is non-zero
    Failed,
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Fields populated, no descriptor written
    Init,
    /// Descriptors written, queue tail not advanced
    Encoded,
    /// Queue tail advanced
    Submitted,
    /// Some completions received
    AwaitingCompletion,
    /// All completions received and finalized
    Completed(Outcome),
    /// Resources returned
    Released,
}

impl TaskState {
    /// Check if hardware may still report completions for the task
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Submitted | Self::AwaitingCompletion)
    }

    /// Check if the task has been finalized
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// Kind-specific task payload
#[derive(Debug)]
pub enum TaskPayload {
    /// Kernel launch
    Kernel(KernelPayload),
    /// Memory copy
    Memcpy(MemcpyPayload),
    /// Write value
    WriteValue(WriteValuePayload),
    /// Notify record
    NotifyRecord(NotifyRecordPayload),
    /// Notify wait
    NotifyWait(NotifyWaitPayload),
    /// Multi-subtask batch
    Batch(BatchPayload),
    /// FFTS+ context set
    FftsPlus(FftsPlusPayload),
    /// CCU mission
    Ccu(CcuPayload),
    /// Placeholder
    PlaceHolder,
}

impl TaskPayload {
    /// Kind tag of this payload
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Kernel(_) => TaskKind::Kernel,
            Self::Memcpy(_) => TaskKind::Memcpy,
            Self::WriteValue(_) => TaskKind::WriteValue,
            Self::NotifyRecord(_) => TaskKind::NotifyRecord,
            Self::NotifyWait(_) => TaskKind::NotifyWait,
            Self::Batch(_) => TaskKind::Batch,
            Self::FftsPlus(_) => TaskKind::FftsPlus,
            Self::Ccu(_) => TaskKind::Ccu,
            Self::PlaceHolder => TaskKind::PlaceHolder,
        }
    }
}

// =============================================================================
// TASK
// =============================================================================

/// One task
#[derive(Debug)]
pub struct Task {
    kind: TaskKind,
    payload: TaskPayload,
    stream_id: StreamId,
    task_id: TaskId,
    flip: u16,
    device_id: DeviceId,
    thread_id: ThreadId,
    pub(crate) state: TaskState,
    pub(crate) expected: u16,
    pub(crate) received: u16,
    error_code: RuntimeErrorCode,
    mte_error: RuntimeErrorCode,
    pub(crate) run: Option<SlotRun>,
    pub(crate) wire_ids: Option<(StreamId, TaskId)>,
    pub(crate) release_done: bool,
}

impl Task {
    /// Create a task in `Init`
    pub fn new(
        payload: TaskPayload,
        stream_id: StreamId,
        task_id: TaskId,
        flip: u16,
        device_id: DeviceId,
        thread_id: ThreadId,
    ) -> Self {
        Self {
            kind: payload.kind(),
            payload,
            stream_id,
            task_id,
            flip,
            device_id,
            thread_id,
            state: TaskState::Init,
            expected: 0,
            received: 0,
            error_code: RuntimeErrorCode::SUCCESS,
            mte_error: RuntimeErrorCode::SUCCESS,
            run: None,
            wire_ids: None,
            release_done: false,
        }
    }

    /// Kind tag
    #[inline]
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Payload
    #[inline]
    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    /// Mutable payload
    #[inline]
    pub fn payload_mut(&mut self) -> &mut TaskPayload {
        &mut self.payload
    }

    /// Owning stream
    #[inline]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Task id within the stream
    #[inline]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Flip counter at allocation
    #[inline]
    pub fn flip(&self) -> u16 {
        self.flip
    }

    /// Task id with its flip counter, as reported to the fault callback
    #[inline]
    pub fn flip_task_id(&self) -> FlipTaskId {
        FlipTaskId::new(self.task_id, self.flip)
    }

    /// Owning device
    #[inline]
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Creating thread
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Lifecycle state
    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Descriptors placed for the task
    #[inline]
    pub fn expected_completions(&self) -> u16 {
        self.expected
    }

    /// Completions accounted so far
    #[inline]
    pub fn received_completions(&self) -> u16 {
        self.received
    }

    /// Ids written on the wire when they differ from the task's own
    #[inline]
    pub fn wire_ids(&self) -> Option<(StreamId, TaskId)> {
        self.wire_ids
    }

    /// Set the ids written on the wire
    pub fn set_wire_ids(&mut self, stream_id: StreamId, task_id: TaskId) {
        self.wire_ids = Some((stream_id, task_id));
    }

    /// Accumulated error code
    #[inline]
    pub fn error_code(&self) -> RuntimeErrorCode {
        self.error_code
    }

    /// Record an error; the first failure is kept
    pub fn record_error(&mut self, code: RuntimeErrorCode) {
        if self.error_code.is_success() {
            self.error_code = code;
        }
    }

    /// Overwrite the accumulated error code
    pub fn set_error_code(&mut self, code: RuntimeErrorCode) {
        self.error_code = code;
    }

    /// Pending memory-fault code
    #[inline]
    pub fn mte_error(&self) -> RuntimeErrorCode {
        self.mte_error
    }

    /// Record a memory-fault code raised outside the completion path
    pub fn set_mte_error(&mut self, code: RuntimeErrorCode) {
        self.mte_error = code;
    }

    /// Build the exception delivered to the fault callback
    pub fn exception_info(&self, expand: ExpandInfo) -> ExceptionInfo {
        ExceptionInfo {
            retcode: self.error_code,
            task_id: self.flip_task_id(),
            stream_id: self.stream_id,
            thread_id: self.thread_id,
            device_id: self.device_id,
            expand,
        }
    }
}

// =============================================================================
// TASK ID ALLOCATION
// =============================================================================

/// Per-stream task id allocator with a flip counter
///
/// Ids are handed out in order. When the id after `max` would be issued the
/// id wraps to 0 and the flip counter advances.
#[derive(Debug, Clone)]
pub struct TaskIdAllocator {
    next: TaskId,
    flip: u16,
    max: TaskId,
}

impl TaskIdAllocator {
    /// Create an allocator issuing ids `0..=max`
    pub fn new(max: TaskId) -> Self {
        Self {
            next: 0,
            flip: 0,
            max,
        }
    }

    /// Issue the next id with its flip counter
    ///
    /// Fails with [`Error::Busy`] if the next id still belongs to a task that
    /// has not been released; nothing advances in that case.
    pub fn allocate(&mut self, in_use: impl Fn(TaskId) -> bool) -> Result<(TaskId, u16)> {
        let id = self.next;
        if in_use(id) {
            return Err(Error::Busy);
        }
        let flip = self.flip;
        if id >= self.max {
            self.next = 0;
            self.flip = self.flip.wrapping_add(1);
        } else {
            self.next = id + 1;
        }
        Ok((id, flip))
    }

    /// Current flip counter
    pub fn flip(&self) -> u16 {
        self.flip
    }
}
