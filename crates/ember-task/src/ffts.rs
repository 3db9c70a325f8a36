//! # FFTS+ Context-Set Tasks
//!
//! An FFTS+ task hands the hardware a table of execution contexts resident
//! in device memory. Each context can fault on its own; faults are collected
//! into the context list while completions arrive and are only summarised
//! when the task finalizes with an error.
//!
//! ## Descriptors
//!
//! ```text
//!   NoDump     [ FFTS+ ]
//!   WithDump   [ load dump info ][ FFTS+ ][ unload dump info, end 0x20 ]
//! ```
//!
//! The mode is chosen when the payload is built and never changes, so the
//! descriptor count is fixed for the life of the task.
//!
//! ## Wire ids
//!
//! Some hardware generations need concurrently issued FFTS+ tasks on
//! different streams to carry distinguishable ids. The stream and task id
//! written into every descriptor of the task are then repacked by one of
//! three schemes, picked from the device features:
//!
//! | priority | feature                    | stream'                                   | task'                                |
//! |----------|----------------------------|-------------------------------------------|--------------------------------------|
//! | 1        | `SOFTWARE_SQ`              | `task & 0x7FFF \| 0x8000`                 | `stream & 0x7FFF \| task & 0x8000`   |
//! | 2        | `TASK_SAME_FOR_ALL`        | `task & 0x0FFF \| 2 << 12 \| stream & 0xC000` | `stream & 0x0FFF \| task & 0xF000` |
//! | 3        | `FFTSPLUS_TASKID_SAME_FIX` | `stream & 0x0FFF \| 1 << 12 \| task & 0xE000` | `task & 0x1FFF \| index << 13`     |
//!
//! The third scheme only applies to HCCL sub types and consumes a 3-bit
//! index from the stream's [`HcclIndexPool`].

use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use ember_core::{
    DevAddr, DeviceFeatures, DeviceId, DriverFacade, ExpandInfo, StreamId, TaskId,
    CONTEXT_ID_NONE,
};
use ember_sqe::sqe::DUMP_END_BITMAP;
use ember_sqe::{DumpInfoSqe, FftsPlusSqe, Sqe, SqeHeader, SqePayload, SqeType};

use crate::registry::{propagate_failure, EncodeCtx, FinalizeCtx, TaskOpsBuilder};
use crate::task::{Task, TaskPayload};

/// Size of one context record in device memory
pub const CONTEXT_LEN: u64 = 128;

/// Offset of the start PCs inside a context record
pub const CONTEXT_PC_OFFSET: usize = 64;

/// Number of HCCL indices a stream cycles through
pub const HCCL_INDEX_COUNT: u8 = 8;

/// FFTS+ descriptor mode byte
pub const FFTS_TYPE_PLUS: u8 = 4;

// =============================================================================
// HCCL INDEX POOL
// =============================================================================

/// Per-stream cycling 3-bit index for HCCL id packing
#[derive(Debug, Default)]
pub struct HcclIndexPool {
    next: Mutex<u8>,
}

impl HcclIndexPool {
    /// Pool starting at index 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next index
    pub fn allocate(&self) -> u8 {
        let mut next = self.next.lock();
        let index = *next;
        *next = (index + 1) % HCCL_INDEX_COUNT;
        index
    }
}

// =============================================================================
// MODES AND SUB TYPES
// =============================================================================

/// Dump bracketing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    /// One FFTS+ descriptor
    NoDump,
    /// FFTS+ descriptor between dump-info load and unload
    WithDump {
        /// Dump info block
        info_addr: DevAddr,
        /// Dump info length in bytes
        length: u32,
    },
}

impl DumpMode {
    /// Descriptors a task in this mode places
    pub fn descriptor_count(&self) -> usize {
        match self {
            Self::NoDump => 1,
            Self::WithDump { .. } => 3,
        }
    }
}

/// FFTS+ sub type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FftsSubType {
    /// Plain context set
    Normal = 0,
    /// Mixed cube contexts
    AicMix = 1,
    /// Mixed vector contexts
    AivMix = 2,
    /// HCCL without compute contexts
    Hccl = 3,
    /// HCCL with compute contexts
    HcclWithCompute = 4,
}

impl FftsSubType {
    /// Check if the task belongs to a collective
    pub fn is_hccl(self) -> bool {
        matches!(self, Self::Hccl | Self::HcclWithCompute)
    }

    /// Check if the task mixes cube and vector contexts
    pub fn is_mix(self) -> bool {
        matches!(self, Self::AicMix | Self::AivMix)
    }
}

// =============================================================================
// ID PACKING
// =============================================================================

/// Wire id transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPacking {
    /// Ids written as is
    Plain,
    /// Software submit queue layout
    SoftwareSq,
    /// Task id shared across streams
    TaskSameForAll,
    /// HCCL task id fix with the given index
    HcclIndexed(u8),
}

impl IdPacking {
    /// Pick the transform for a task
    ///
    /// Only the HCCL scheme draws from `pool`.
    pub fn select(features: DeviceFeatures, sub_type: FftsSubType, pool: &HcclIndexPool) -> Self {
        if features.contains(DeviceFeatures::SOFTWARE_SQ) {
            Self::SoftwareSq
        } else if features.contains(DeviceFeatures::TASK_SAME_FOR_ALL) {
            Self::TaskSameForAll
        } else if features.contains(DeviceFeatures::FFTSPLUS_TASKID_SAME_FIX) && sub_type.is_hccl()
        {
            Self::HcclIndexed(pool.allocate())
        } else {
            Self::Plain
        }
    }

    /// Apply the transform to (stream id, task id)
    pub fn apply(self, stream_id: StreamId, task_id: TaskId) -> (StreamId, TaskId) {
        match self {
            Self::Plain => (stream_id, task_id),
            Self::SoftwareSq => (
                (task_id & 0x7FFF) | 0x8000,
                (stream_id & 0x7FFF) | (task_id & 0x8000),
            ),
            Self::TaskSameForAll => (
                (task_id & 0x0FFF) | (2 << 12) | (stream_id & 0xC000),
                (stream_id & 0x0FFF) | (task_id & 0xF000),
            ),
            Self::HcclIndexed(index) => (
                (stream_id & 0x0FFF) | (1 << 12) | (task_id & 0xE000),
                (task_id & 0x1FFF) | (u16::from(index & 0x7) << 13),
            ),
        }
    }
}

// =============================================================================
// CONTEXT FAULTS
// =============================================================================

/// Unit a context fault came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextErrorType {
    /// Cube core
    AiCore,
    /// Vector core
    AiVector,
    /// SDMA
    Sdma,
    /// AICPU
    Aicpu,
    /// DSA
    Dsa,
    /// HCCL context timed out
    HcclTimeout,
}

impl ContextErrorType {
    /// Log name
    pub fn name(self) -> &'static str {
        match self {
            Self::AiCore => "fftsplus aicore error",
            Self::AiVector => "fftsplus aivector error",
            Self::Sdma => "fftsplus sdma error",
            Self::Aicpu => "fftsplus aicpu error",
            Self::Dsa => "fftsplus dsa error",
            Self::HcclTimeout => "hccl fftsplus timeout",
        }
    }

    fn runs_kernel(self) -> bool {
        matches!(self, Self::AiCore | Self::AiVector)
    }
}

/// One context fault as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextFault {
    /// Context index in the context table
    pub context_id: u16,
    /// Thread within the context
    pub thread_id: u16,
    /// Faulting unit
    pub error_type: ContextErrorType,
    /// PC at the fault, as a physical address when the device reports one
    pub fault_pc: u64,
}

/// A context fault after finalize resolved it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFaultSummary {
    /// The raw fault
    pub fault: ContextFault,
    /// Start PC of the kernel the fault falls in
    pub pc_start: Option<u64>,
    /// Kernel name resolved from `pc_start`
    pub kernel_name: Option<String>,
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// FFTS+ task payload
#[derive(Debug, Clone)]
pub struct FftsPlusPayload {
    /// Sub type
    pub sub_type: FftsSubType,
    /// Timeout in seconds; 0 and 0xFFFF are special for HCCL
    pub timeout: u16,
    /// Context table in device memory
    pub context_addr: DevAddr,
    /// Contexts in the table
    pub context_count: u16,
    /// Contexts ready at launch
    pub ready_context_count: u16,
    /// Free the context table at release
    pub owns_context_memory: bool,
    dump: DumpMode,
    context_list: Vec<ContextFault>,
    fault_report: Vec<ContextFaultSummary>,
    freed: bool,
}

impl FftsPlusPayload {
    /// Context set at `context_addr` with `context_count` contexts
    pub fn new(
        sub_type: FftsSubType,
        context_addr: DevAddr,
        context_count: u16,
        dump: DumpMode,
    ) -> Self {
        Self {
            sub_type,
            timeout: 0,
            context_addr,
            context_count,
            ready_context_count: context_count,
            owns_context_memory: false,
            dump,
            context_list: Vec::new(),
            fault_report: Vec::new(),
            freed: false,
        }
    }

    /// Dump mode
    pub fn dump(&self) -> DumpMode {
        self.dump
    }

    /// Descriptors this task places
    pub fn descriptor_count(&self) -> usize {
        self.dump.descriptor_count()
    }

    /// Faults collected and not yet summarised
    ///
    /// Finalize drains this list: on failure every entry moves into
    /// [`fault_report`](Self::fault_report), on success it is cleared.
    pub fn context_list(&self) -> &[ContextFault] {
        &self.context_list
    }

    /// Faults summarised by the last failing finalize
    pub fn fault_report(&self) -> &[ContextFaultSummary] {
        &self.fault_report
    }

    /// Append a context fault
    pub fn push_context_fault(&mut self, fault: ContextFault) {
        self.context_list.push(fault);
    }

    fn is_valid(&self) -> bool {
        if self.context_addr.is_null() || !self.context_addr.fits_descriptor() {
            return false;
        }
        if self.context_count == 0 || self.ready_context_count > self.context_count {
            return false;
        }
        match self.dump {
            DumpMode::NoDump => true,
            DumpMode::WithDump { info_addr, .. } => {
                !info_addr.is_null() && info_addr.fits_descriptor()
            }
        }
    }
}

// =============================================================================
// ENCODE
// =============================================================================

fn encode(task: &mut Task, ctx: &EncodeCtx<'_>, out: &mut Vec<Sqe>) {
    let stream_id = task.stream_id();
    let task_id = task.task_id();
    let TaskPayload::FftsPlus(p) = task.payload() else {
        return;
    };

    if !p.is_valid() {
        log::warn!(
            "invalid fftsplus task, stream_id={}, task_id={}, context_addr={}, context_num={}",
            stream_id,
            task_id,
            p.context_addr,
            p.context_count
        );
        // keep the count fixed; hardware reports each invalid descriptor
        for _ in 0..p.descriptor_count() {
            out.push(Sqe::invalid(stream_id, task_id));
        }
        return;
    }

    let packing = IdPacking::select(ctx.features, p.sub_type, ctx.hccl_pool);
    let (wire_stream, wire_task) = packing.apply(stream_id, task_id);

    let mut timeout = p.timeout;
    let mut credit = ctx.config.kernel_credit;
    if p.sub_type.is_hccl() && ctx.features.contains(DeviceFeatures::FFTSPLUS_TIMEOUT) {
        timeout = match timeout {
            0 => ctx.config.hccl_ffts_timeout,
            0xFFFF => 0,
            t => t,
        };
        credit = ctx.config.never_timeout_credit;
    }

    let mut sub_type = p.sub_type as u8;
    if matches!(p.dump, DumpMode::WithDump { .. }) && p.sub_type.is_mix() {
        sub_type = 0;
    }

    let ffts = Sqe::new(
        SqeHeader::new(SqeType::FftsPlus, wire_stream, wire_task),
        credit,
        SqePayload::FftsPlus(FftsPlusSqe {
            ffts_type: FFTS_TYPE_PLUS,
            sub_type,
            timeout,
            context_count: p.context_count,
            ready_context_count: p.ready_context_count,
            context_addr: p.context_addr,
        }),
    );

    match p.dump {
        DumpMode::NoDump => out.push(ffts),
        DumpMode::WithDump { info_addr, length } => {
            let dump_info = |unload: bool| {
                Sqe::new(
                    SqeHeader::new(SqeType::AicpuD, wire_stream, wire_task),
                    ctx.config.kernel_credit,
                    SqePayload::DumpInfo(DumpInfoSqe {
                        info_addr,
                        length,
                        unload,
                        end_bitmap: if unload { DUMP_END_BITMAP } else { 0 },
                    }),
                )
            };
            out.push(dump_info(false));
            out.push(ffts);
            out.push(dump_info(true));
        }
    }

    log::debug!(
        "fftsplus encoded, stream_id={}, task_id={}, wire=({}, {}), packing={:?}, timeout={}, sqe_num={}",
        stream_id,
        task_id,
        wire_stream,
        wire_task,
        packing,
        timeout,
        out.len()
    );

    if packing != IdPacking::Plain {
        task.set_wire_ids(wire_stream, wire_task);
    }
}

// =============================================================================
// FINALIZE
// =============================================================================

fn read_start_pcs(
    driver: &dyn DriverFacade,
    device_id: DeviceId,
    context_addr: DevAddr,
    context_id: u16,
) -> Option<[u64; 2]> {
    let addr = context_addr.offset(u64::from(context_id) * CONTEXT_LEN);
    let mut record = [0u8; CONTEXT_LEN as usize];
    if let Err(e) = driver.read_device_memory(device_id, addr, &mut record) {
        log::warn!("read context {} at {} failed: {}", context_id, addr, e);
        return None;
    }
    let pc = |at: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&record[at..at + 8]);
        u64::from_le_bytes(bytes)
    };
    Some([pc(CONTEXT_PC_OFFSET), pc(CONTEXT_PC_OFFSET + 8)])
}

fn summarise(
    fault: ContextFault,
    p: &FftsPlusPayload,
    device_id: DeviceId,
    driver: &dyn DriverFacade,
) -> ContextFaultSummary {
    let mut summary = ContextFaultSummary {
        fault,
        pc_start: None,
        kernel_name: None,
    };
    if !fault.error_type.runs_kernel() || p.sub_type.is_hccl() {
        return summary;
    }
    if fault.context_id >= p.context_count {
        log::warn!(
            "context id {} out of range, context_num={}",
            fault.context_id,
            p.context_count
        );
        return summary;
    }
    let Some(starts) = read_start_pcs(driver, device_id, p.context_addr, fault.context_id) else {
        return summary;
    };

    let fault_va = driver
        .translate_physical(device_id, fault.fault_pc)
        .map_or(fault.fault_pc, DevAddr::raw);

    // closest start at or below the fault, else the first start on record
    let pc_start = starts
        .iter()
        .copied()
        .filter(|&pc| pc != 0 && pc <= fault_va)
        .max()
        .or_else(|| starts.iter().copied().find(|&pc| pc != 0));

    summary.pc_start = pc_start;
    summary.kernel_name = pc_start.and_then(|pc| driver.lookup_kernel_name(device_id, pc));
    summary
}

/// Consumes the context list: cleared on success, summarised into the fault
/// report on failure with one callback per fault.
fn finalize(task: &mut Task, ctx: &mut FinalizeCtx<'_>) {
    let mte = task.mte_error();
    if !task.error_code().is_success() && mte.is_mte_class() {
        log::info!(
            "memory fault overrides report, stream_id={}, task_id={}, retCode={:#x}",
            task.stream_id(),
            task.task_id(),
            mte.raw()
        );
        task.set_error_code(mte);
    }

    if !propagate_failure(task, ctx) {
        if let TaskPayload::FftsPlus(p) = task.payload_mut() {
            p.context_list.clear();
        }
        return;
    }

    let device_id = task.device_id();
    let faults = match task.payload_mut() {
        TaskPayload::FftsPlus(p) => core::mem::take(&mut p.context_list),
        _ => Vec::new(),
    };
    let summaries: Vec<ContextFaultSummary> = match task.payload() {
        TaskPayload::FftsPlus(p) => faults
            .into_iter()
            .map(|f| summarise(f, p, device_id, ctx.driver))
            .collect(),
        _ => Vec::new(),
    };

    if summaries.is_empty() {
        ctx.notifier.notify(&task.exception_info(ExpandInfo::FftsPlus {
            context_id: CONTEXT_ID_NONE,
            thread_id: CONTEXT_ID_NONE,
            kernel_name: None,
        }));
    }
    for s in &summaries {
        log::error!(
            "fftsplus task execute failed, dev_id={}, stream_id={}, task_id={}, context_id={}, thread_id={}, err_type={}, pc_start={:#x}, kernel_name={}",
            device_id,
            task.stream_id(),
            task.task_id(),
            s.fault.context_id,
            s.fault.thread_id,
            s.fault.error_type.name(),
            s.pc_start.unwrap_or(0),
            s.kernel_name.as_deref().unwrap_or("unknown")
        );
        ctx.notifier.notify(&task.exception_info(ExpandInfo::FftsPlus {
            context_id: s.fault.context_id,
            thread_id: s.fault.thread_id,
            kernel_name: s.kernel_name.clone(),
        }));
    }

    if let TaskPayload::FftsPlus(p) = task.payload_mut() {
        p.fault_report = summaries;
    }
}

fn release(task: &mut Task, driver: &dyn DriverFacade) {
    let device_id = task.device_id();
    let TaskPayload::FftsPlus(p) = task.payload_mut() else {
        return;
    };
    if p.freed || !p.owns_context_memory || p.context_addr.is_null() {
        return;
    }
    p.freed = true;
    if let Err(e) = driver.free_device_memory(device_id, p.context_addr) {
        log::warn!("free fftsplus context table {} failed: {}", p.context_addr, e);
    }
}

fn describe_error(task: &Task) {
    let TaskPayload::FftsPlus(p) = task.payload() else {
        return;
    };
    let wire = task.wire_ids().unwrap_or((task.stream_id(), task.task_id()));
    log::error!(
        "fftsplus failed, device_id={}, stream_id={}, task_id={}, flip_num={}, sub_type={:?}, wire=({}, {}), context_num={}, faults={}",
        task.device_id(),
        task.stream_id(),
        task.task_id(),
        task.flip(),
        p.sub_type,
        wire.0,
        wire.1,
        p.context_count,
        p.context_list.len()
    );
}

pub(crate) fn ops() -> TaskOpsBuilder {
    TaskOpsBuilder::new()
        .encode_sqe(encode)
        .finalize(finalize)
        .release(release)
        .describe_error(describe_error)
}
