//! # Task-Type Descriptor Table
//!
//! Six operation slots per task kind. [`build_registry`] fills the table
//! once at runtime start; it is immutable afterwards and passed by
//! reference to every engine.
//!
//! | slot             | default                                           |
//! |------------------|---------------------------------------------------|
//! | `encode_legacy`  | unsupported (kind has no legacy command)          |
//! | `encode_sqe`     | generic single-descriptor encoder                 |
//! | `decode`         | classify with the kind's error family             |
//! | `finalize`       | log and propagate, notify on failure              |
//! | `release`        | nothing to release                                |
//! | `describe_error` | print device/stream/task/flip                     |

use alloc::vec::Vec;
use core::fmt;

use ember_core::{
    DeviceFeatures, DispatchConfig, DriverFacade, Error, ExpandInfo, FaultNotifier,
    HardwareEventSnapshot, Result, RuntimeErrorCode,
};
use ember_sqe::{CompletionReport, Sqe, TsCommand};

use crate::classify::classify;
use crate::ffts::HcclIndexPool;
use crate::kind::TaskKind;
use crate::task::Task;
use crate::{batch, ccu, ffts, generic, notify};

// =============================================================================
// SLOT CONTEXTS
// =============================================================================

/// Inputs available to the encode slots
pub struct EncodeCtx<'a> {
    /// Dispatch configuration
    pub config: &'a DispatchConfig,
    /// Device feature set
    pub features: DeviceFeatures,
    /// Driver, for address look-ups
    pub driver: &'a dyn DriverFacade,
    /// HCCL index pool of the task's stream
    pub hccl_pool: &'a HcclIndexPool,
}

/// Inputs available to the decode slot
pub struct DecodeCtx<'a> {
    /// Dispatch configuration
    pub config: &'a DispatchConfig,
    /// Device feature set
    pub features: DeviceFeatures,
    /// Hardware fault state, empty unless the report carries error bits
    pub events: &'a HardwareEventSnapshot,
}

/// Outcome of a legacy encode slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyEncode {
    /// The kind has no legacy command
    Unsupported,
    /// The payload could not be encoded; a reserved command takes its slot
    Invalid,
    /// Command ready to write
    Command(TsCommand),
}

/// What the engine does after a decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeAction {
    /// Count this completion and keep waiting
    Continue,
    /// Write off the remaining completions and finalize now
    CompleteNow,
}

/// Inputs available to the finalize slot
pub struct FinalizeCtx<'a> {
    /// Dispatch configuration
    pub config: &'a DispatchConfig,
    /// Device feature set
    pub features: DeviceFeatures,
    /// Driver, for fault summaries
    pub driver: &'a dyn DriverFacade,
    /// Fault callback
    pub notifier: &'a dyn FaultNotifier,
    /// Sticky error of the owning stream
    pub sticky_error: &'a mut RuntimeErrorCode,
    /// The kind's error printer
    pub describe_error: DescribeErrorFn,
}

impl fmt::Debug for EncodeCtx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeCtx")
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for DecodeCtx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeCtx")
            .field("features", &self.features)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for FinalizeCtx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizeCtx")
            .field("features", &self.features)
            .field("sticky_error", &self.sticky_error)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// SLOT SIGNATURES
// =============================================================================

/// Build a legacy TS command
pub type EncodeLegacyFn = fn(&Task, &EncodeCtx<'_>) -> LegacyEncode;

/// Append the task's descriptors; appending none marks the task invalid
pub type EncodeSqeFn = fn(&mut Task, &EncodeCtx<'_>, &mut Vec<Sqe>);

/// Fold one completion report into the task
pub type DecodeFn = fn(&mut Task, &CompletionReport, &DecodeCtx<'_>) -> DecodeAction;

/// Caller-visible side effects once all completions are in
pub type FinalizeFn = fn(&mut Task, &mut FinalizeCtx<'_>);

/// Return owned resources
pub type ReleaseFn = fn(&mut Task, &dyn DriverFacade);

/// Print identifying detail of a failed task
pub type DescribeErrorFn = fn(&Task);

// =============================================================================
// DEFAULT SLOTS
// =============================================================================

fn default_encode_legacy(_task: &Task, _ctx: &EncodeCtx<'_>) -> LegacyEncode {
    LegacyEncode::Unsupported
}

fn default_encode_sqe(task: &mut Task, ctx: &EncodeCtx<'_>, out: &mut Vec<Sqe>) {
    if let Some(sqe) = generic::generic_descriptor(task, ctx) {
        out.push(sqe);
    }
}

/// Classify an error report with the kind's family; the first failure is kept
pub fn default_decode(
    task: &mut Task,
    report: &CompletionReport,
    ctx: &DecodeCtx<'_>,
) -> DecodeAction {
    if report.is_error() {
        let code = classify(
            task.kind().family(),
            report.error_type,
            report.error_code,
            ctx.features,
            ctx.events,
        );
        log::debug!(
            "error report, stream_id={}, task_id={}, sqe_type={}, error_type={:#x}, error_code={:#x}, mapped={}",
            task.stream_id(),
            task.task_id(),
            report.sqe_type,
            report.error_type.bits(),
            report.error_code,
            code
        );
        task.record_error(code);
    }
    DecodeAction::Continue
}

fn default_finalize(task: &mut Task, ctx: &mut FinalizeCtx<'_>) {
    if propagate_failure(task, ctx) {
        ctx.notifier.notify(&task.exception_info(ExpandInfo::None));
    }
}

fn default_release(_task: &mut Task, _driver: &dyn DriverFacade) {}

fn default_describe_error(task: &Task) {
    log::error!(
        "device_id={}, stream_id={}, task_id={}, flip_num={}, task_type={}",
        task.device_id(),
        task.stream_id(),
        task.task_id(),
        task.flip(),
        task.kind().name()
    );
}

/// Shared part of every finalizer
///
/// Logs the outcome, makes a failure sticky on the stream and prints it.
/// Returns `true` when the failure must reach the fault callback; success
/// and benign end-of-stream codes return `false`.
pub fn propagate_failure(task: &Task, ctx: &mut FinalizeCtx<'_>) -> bool {
    let code = task.error_code();
    if code.is_success() {
        log::debug!(
            "task completed, stream_id={}, task_id={}",
            task.stream_id(),
            task.task_id()
        );
        return false;
    }

    if code.is_benign() {
        log::warn!(
            "task ended, stream_id={}, task_id={}, flip_num={}, retCode={:#x}, [{}]",
            task.stream_id(),
            task.task_id(),
            task.flip(),
            code.raw(),
            code.description()
        );
        return false;
    }

    log::error!(
        "task failed, stream_id={}, task_id={}, flip_num={}, retCode={:#x}, [{}]",
        task.stream_id(),
        task.task_id(),
        task.flip(),
        code.raw(),
        code.description()
    );
    if ctx.sticky_error.is_success() {
        *ctx.sticky_error = code;
    }
    (ctx.describe_error)(task);
    true
}

// =============================================================================
// TASK OPS
// =============================================================================

/// The six operation slots of one kind
#[derive(Clone, Copy)]
pub struct TaskOps {
    /// Legacy command encoder
    pub encode_legacy: EncodeLegacyFn,
    /// SQE encoder
    pub encode_sqe: EncodeSqeFn,
    /// Completion decoder
    pub decode: DecodeFn,
    /// Finalizer
    pub finalize: FinalizeFn,
    /// Resource release
    pub release: ReleaseFn,
    /// Error printer
    pub describe_error: DescribeErrorFn,
}

impl fmt::Debug for TaskOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOps").finish_non_exhaustive()
    }
}

/// Partially filled slots for one kind
#[derive(Clone, Copy, Default)]
pub struct TaskOpsBuilder {
    encode_legacy: Option<EncodeLegacyFn>,
    encode_sqe: Option<EncodeSqeFn>,
    decode: Option<DecodeFn>,
    finalize: Option<FinalizeFn>,
    release: Option<ReleaseFn>,
    describe_error: Option<DescribeErrorFn>,
}

impl fmt::Debug for TaskOpsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOpsBuilder")
            .field("encode_legacy", &self.encode_legacy.is_some())
            .field("encode_sqe", &self.encode_sqe.is_some())
            .field("decode", &self.decode.is_some())
            .field("finalize", &self.finalize.is_some())
            .field("release", &self.release.is_some())
            .field("describe_error", &self.describe_error.is_some())
            .finish()
    }
}

impl TaskOpsBuilder {
    /// All slots unset
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the legacy encoder
    pub fn encode_legacy(mut self, f: EncodeLegacyFn) -> Self {
        self.encode_legacy = Some(f);
        self
    }

    /// Set the SQE encoder
    pub fn encode_sqe(mut self, f: EncodeSqeFn) -> Self {
        self.encode_sqe = Some(f);
        self
    }

    /// Set the decoder
    pub fn decode(mut self, f: DecodeFn) -> Self {
        self.decode = Some(f);
        self
    }

    /// Set the finalizer
    pub fn finalize(mut self, f: FinalizeFn) -> Self {
        self.finalize = Some(f);
        self
    }

    /// Set the release slot
    pub fn release(mut self, f: ReleaseFn) -> Self {
        self.release = Some(f);
        self
    }

    /// Set the error printer
    pub fn describe_error(mut self, f: DescribeErrorFn) -> Self {
        self.describe_error = Some(f);
        self
    }

    /// Fill unset slots with the defaults
    pub fn build(self) -> TaskOps {
        TaskOps {
            encode_legacy: self.encode_legacy.unwrap_or(default_encode_legacy),
            encode_sqe: self.encode_sqe.unwrap_or(default_encode_sqe),
            decode: self.decode.unwrap_or(default_decode),
            finalize: self.finalize.unwrap_or(default_finalize),
            release: self.release.unwrap_or(default_release),
            describe_error: self.describe_error.unwrap_or(default_describe_error),
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Immutable operation table indexed by kind
#[derive(Debug, Clone)]
pub struct Registry {
    ops: [TaskOps; TaskKind::COUNT],
}

impl Registry {
    /// Slots of a kind
    #[inline]
    pub fn ops(&self, kind: TaskKind) -> &TaskOps {
        &self.ops[kind.index()]
    }
}

/// One-shot registry construction
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    slots: [Option<TaskOps>; TaskKind::COUNT],
}

impl RegistryBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the slots of one kind
    ///
    /// A kind can be registered once; a second registration is rejected with
    /// [`Error::InvalidState`] and leaves the first in place.
    pub fn register(&mut self, kind: TaskKind, ops: TaskOpsBuilder) -> Result<()> {
        let slot = &mut self.slots[kind.index()];
        if slot.is_some() {
            log::error!("task type {} registered twice", kind.name());
            return Err(Error::InvalidState);
        }
        *slot = Some(ops.build());
        Ok(())
    }

    /// Freeze the table; unregistered kinds get every default
    pub fn build(self) -> Registry {
        let default_ops = TaskOpsBuilder::new().build();
        Registry {
            ops: self.slots.map(|slot| slot.unwrap_or(default_ops)),
        }
    }
}

fn builtin_plugins() -> [(TaskKind, TaskOpsBuilder); TaskKind::COUNT] {
    [
        (TaskKind::Kernel, generic::kernel_ops()),
        (TaskKind::Memcpy, generic::memcpy_ops()),
        (TaskKind::WriteValue, notify::write_value_ops()),
        (TaskKind::NotifyRecord, notify::notify_record_ops()),
        (TaskKind::NotifyWait, notify::notify_wait_ops()),
        (TaskKind::Batch, batch::ops()),
        (TaskKind::FftsPlus, ffts::ops()),
        (TaskKind::Ccu, ccu::ops()),
        (TaskKind::PlaceHolder, generic::place_holder_ops()),
    ]
}

/// Build the registry of all built-in kinds
pub fn build_registry() -> Registry {
    let mut builder = RegistryBuilder::new();
    for (kind, ops) in builtin_plugins() {
        if let Err(e) = builder.register(kind, ops) {
            log::error!("failed to register {}: {}", kind.name(), e);
        }
    }
    log::info!("task registry built, {} kinds", TaskKind::COUNT);
    builder.build()
}
