//! # Multi-Subtask Batch
//!
//! One logical task made of up to 255 independently completing
//! sub-descriptors. Each sub-entry is either an AICPU kernel or a DVPP
//! command list.
//!
//! ## Sub-state merge
//!
//! Every sub-completion is folded into a running
//! `(sqe_type, error_type, error_code)` tuple:
//!
//! ```text
//!   first report ───────────────► stored as is
//!   failure after anything ─────► OR  (escalate)
//!   success after success ──────► AND
//!   success after a failure ────► unchanged
//! ```
//!
//! The merge is asymmetric: once a failure has been seen a
//! later success cannot clear it.

use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;

use ember_core::{ArgHandle, DevAddr, DriverFacade, ExpandInfo, RuntimeErrorCode};
use ember_sqe::{
    AicpuSqe, CompletionReport, DvppSqe, ErrorTypeBits, Sqe, SqeHeader, SqePayload, SqeType,
};

use crate::classify::{classify, ErrorFamily};
use crate::registry::{
    propagate_failure, DecodeAction, DecodeCtx, EncodeCtx, FinalizeCtx, TaskOpsBuilder,
};
use crate::task::{Task, TaskPayload};

// =============================================================================
// ENTRIES
// =============================================================================

/// AICPU kernel sub-entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AicpuEntry {
    /// Run on the device-side AICPU scheduler rather than the host one
    pub on_device: bool,
    /// Kernel type byte
    pub kernel_type: u8,
    /// Argument block
    pub args: DevAddr,
    /// Argument block size in bytes
    pub args_size: u32,
    /// Shared object name string
    pub so_name: DevAddr,
    /// Kernel name string
    pub kernel_name: DevAddr,
    /// Argument buffer handle to return at release
    pub arg_handle: Option<ArgHandle>,
}

impl AicpuEntry {
    fn is_valid(&self) -> bool {
        !self.args.is_null()
            && self.args.fits_descriptor()
            && self.so_name.fits_descriptor()
            && self.kernel_name.fits_descriptor()
    }
}

/// DVPP engine a command list targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DvppEngine {
    /// Vision pre-processing core
    Vpc,
    /// JPEG encoder
    Jpege,
    /// JPEG decoder
    Jpegd,
}

impl DvppEngine {
    fn sqe_type(self) -> SqeType {
        match self {
            Self::Vpc => SqeType::Vpc,
            Self::Jpege => SqeType::Jpege,
            Self::Jpegd => SqeType::Jpegd,
        }
    }
}

bitflags! {
    /// DVPP sub-entry flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DvppFlags: u32 {
        /// The caller owns the command list; release leaves it alone
        const CMDLIST_NOT_FREE = 1 << 0;
    }
}

/// DVPP sub-entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DvppEntry {
    /// Target engine
    pub engine: DvppEngine,
    /// Command list in device memory
    pub cmdlist: DevAddr,
    /// Command list length in bytes
    pub cmdlist_len: u32,
    /// Entry flags
    pub flags: DvppFlags,
}

impl DvppEntry {
    fn is_valid(&self) -> bool {
        !self.cmdlist.is_null() && self.cmdlist.fits_descriptor() && self.cmdlist_len != 0
    }
}

/// One batch sub-entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEntry {
    /// AICPU kernel
    Aicpu(AicpuEntry),
    /// DVPP command list
    Dvpp(DvppEntry),
}

// =============================================================================
// SUB-STATE
// =============================================================================

/// Running merge of the sub-completions seen so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSubState {
    /// Descriptor type of the first failure, or of the first report
    pub sqe_type: u8,
    /// Merged error bits
    pub error_type: ErrorTypeBits,
    /// Merged raw error code
    pub error_code: u32,
    /// Sub-completions merged
    pub count: u8,
}

impl BatchSubState {
    /// Fold one sub-completion into the running state
    pub fn merge(&mut self, report: &CompletionReport) {
        if self.count == 0 {
            self.sqe_type = report.sqe_type;
            self.error_type = report.error_type;
            self.error_code = report.error_code;
        } else if report.is_error() {
            if self.error_type.is_empty() {
                self.sqe_type = report.sqe_type;
            }
            self.error_type |= report.error_type;
            self.error_code |= report.error_code;
        } else if self.error_type.is_empty() {
            self.error_type &= report.error_type;
            self.error_code &= report.error_code;
        }
        self.count = self.count.wrapping_add(1);
    }

    /// Check if no sub-completion has failed
    pub fn is_clear(&self) -> bool {
        self.error_type.is_empty() && self.error_code == 0
    }

    fn family(&self) -> ErrorFamily {
        match SqeType::from_raw(self.sqe_type) {
            Some(t) if t.is_aicpu() => ErrorFamily::Aicpu,
            _ => ErrorFamily::Common,
        }
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// Batch of heterogeneous sub-entries
#[derive(Debug, Clone, Default)]
pub struct BatchPayload {
    /// Sub-entries in submission order
    pub entries: Vec<BatchEntry>,
    state: BatchSubState,
    released: bool,
}

impl BatchPayload {
    /// Batch over `entries`
    pub fn new(entries: Vec<BatchEntry>) -> Self {
        Self {
            entries,
            state: BatchSubState::default(),
            released: false,
        }
    }

    /// Merged sub-completion state
    pub fn sub_state(&self) -> &BatchSubState {
        &self.state
    }
}

fn entry_sqe(entry: &BatchEntry) -> Option<(SqeType, SqePayload)> {
    match entry {
        BatchEntry::Aicpu(a) if a.is_valid() => {
            let sqe_type = if a.on_device {
                SqeType::AicpuD
            } else {
                SqeType::AicpuH
            };
            let payload = SqePayload::Aicpu(AicpuSqe {
                kernel_type: a.kernel_type,
                args_size: a.args_size,
                args: a.args,
                so_name: a.so_name,
                kernel_name: a.kernel_name,
            });
            Some((sqe_type, payload))
        }
        BatchEntry::Dvpp(d) if d.is_valid() => Some((
            d.engine.sqe_type(),
            SqePayload::Dvpp(DvppSqe {
                cmdlist: d.cmdlist,
                cmdlist_len: d.cmdlist_len,
            }),
        )),
        _ => None,
    }
}

fn encode(task: &mut Task, ctx: &EncodeCtx<'_>, out: &mut Vec<Sqe>) {
    let TaskPayload::Batch(p) = task.payload() else {
        return;
    };

    let mut skipped = 0usize;
    for (i, entry) in p.entries.iter().enumerate() {
        if out.len() >= ctx.config.max_batch_entries {
            log::warn!(
                "batch capped, stream_id={}, task_id={}, entries={}, cap={}",
                task.stream_id(),
                task.task_id(),
                p.entries.len(),
                ctx.config.max_batch_entries
            );
            break;
        }
        match entry_sqe(entry) {
            Some((sqe_type, payload)) => out.push(Sqe::new(
                SqeHeader::new(sqe_type, task.stream_id(), task.task_id()),
                ctx.config.kernel_credit,
                payload,
            )),
            None => {
                skipped += 1;
                log::warn!(
                    "batch entry {} skipped, stream_id={}, task_id={}",
                    i,
                    task.stream_id(),
                    task.task_id()
                );
            }
        }
    }

    log::debug!(
        "batch encoded, stream_id={}, task_id={}, sqe_num={}, skipped={}",
        task.stream_id(),
        task.task_id(),
        out.len(),
        skipped
    );
}

fn decode(task: &mut Task, report: &CompletionReport, ctx: &DecodeCtx<'_>) -> DecodeAction {
    let stream_id = task.stream_id();
    let task_id = task.task_id();
    let TaskPayload::Batch(p) = task.payload_mut() else {
        return DecodeAction::Continue;
    };
    p.state.merge(report);
    let state = p.state;

    task.set_error_code(merged_code(&state, ctx));

    if report.is_error() && report.sqe_type == SqeType::AicpuD as u8 {
        log::error!(
            "aicpu sub-task failed, batch terminated, stream_id={}, task_id={}, error_type={:#x}, error_code={:#x}",
            stream_id,
            task_id,
            report.error_type.bits(),
            report.error_code
        );
        return DecodeAction::CompleteNow;
    }
    DecodeAction::Continue
}

fn finalize(task: &mut Task, ctx: &mut FinalizeCtx<'_>) {
    if !propagate_failure(task, ctx) {
        return;
    }
    let state = match task.payload() {
        TaskPayload::Batch(p) => p.state,
        _ => BatchSubState::default(),
    };
    let expand = ExpandInfo::Batch {
        sqe_type: state.sqe_type,
        error_type: state.error_type.bits(),
        completed: task.received_completions(),
    };
    ctx.notifier.notify(&task.exception_info(expand));
}

fn release(task: &mut Task, driver: &dyn DriverFacade) {
    let device_id = task.device_id();
    let TaskPayload::Batch(p) = task.payload_mut() else {
        return;
    };
    if p.released {
        return;
    }
    p.released = true;

    for entry in p.entries.iter_mut() {
        match entry {
            BatchEntry::Dvpp(d) => {
                if d.flags.contains(DvppFlags::CMDLIST_NOT_FREE) || d.cmdlist.is_null() {
                    continue;
                }
                if let Err(e) = driver.free_device_memory(device_id, d.cmdlist) {
                    log::warn!("free dvpp cmdlist {} failed: {}", d.cmdlist, e);
                }
                d.cmdlist = DevAddr::null();
            }
            BatchEntry::Aicpu(a) => {
                if let Some(handle) = a.arg_handle.take() {
                    driver.release_arg_handle(handle);
                }
            }
        }
    }
}

fn describe_error(task: &Task) {
    let TaskPayload::Batch(p) = task.payload() else {
        return;
    };
    let sqe_name = SqeType::from_raw(p.state.sqe_type).map_or("UNKNOWN", SqeType::name);
    let mut failed_bits = String::new();
    for index in 0..8u8 {
        if p.state.error_type.bits() & (1 << index) != 0 {
            if !failed_bits.is_empty() {
                failed_bits.push('|');
            }
            failed_bits.push_str(ErrorTypeBits::index_name(index));
        }
    }
    log::error!(
        "batch failed, device_id={}, stream_id={}, task_id={}, flip_num={}, sqe_type={}, error_type=[{}], error_code={:#x}, completed={}/{}",
        task.device_id(),
        task.stream_id(),
        task.task_id(),
        task.flip(),
        sqe_name,
        failed_bits,
        p.state.error_code,
        task.received_completions(),
        task.expected_completions()
    );
}

/// Runtime code of a merged state, as the decode slot computes it
pub fn merged_code(state: &BatchSubState, ctx: &DecodeCtx<'_>) -> RuntimeErrorCode {
    classify(
        state.family(),
        state.error_type,
        state.error_code,
        ctx.features,
        ctx.events,
    )
}

pub(crate) fn ops() -> TaskOpsBuilder {
    TaskOpsBuilder::new()
        .encode_sqe(encode)
        .decode(decode)
        .finalize(finalize)
        .release(release)
        .describe_error(describe_error)
}
