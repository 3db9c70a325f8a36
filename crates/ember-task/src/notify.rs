//! # Write-Value and Notify Tasks
//!
//! Single-descriptor synchronization kinds. A notify record on another
//! device is a write-value to that device's notify register; the register
//! address comes from a topology look-up that is cached on the [`Notify`]
//! object per (local device, remote device) pair.

use alloc::sync::Arc;

use arrayvec::ArrayVec;
use hashbrown::HashMap;
use spin::Mutex;

use ember_core::{DevAddr, DeviceId, DriverFacade, Error, ExpandInfo, Result};
use ember_sqe::sqe::WRITE_VALUE_MAX;
use ember_sqe::{
    LegacyTaskType, NotifySqe, Sqe, SqeHeader, SqePayload, SqeType, TsCommand, WriteValueSqe,
};

use crate::registry::{propagate_failure, EncodeCtx, FinalizeCtx, LegacyEncode, TaskOpsBuilder};
use crate::task::{Task, TaskPayload};

/// Write-value sub type: plain write
pub const WRITE_VALUE_SUB_TYPE_PLAIN: u32 = 0;

/// Write-value sub type: notify record on a peer device
pub const WRITE_VALUE_SUB_TYPE_NOTIFY_RECORD: u32 = 1;

// =============================================================================
// WRITE VALUE
// =============================================================================

/// Write an immediate value to device memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteValuePayload {
    /// Target address
    pub addr: DevAddr,
    /// Value bytes; the length must be a power of two up to 32
    pub value: ArrayVec<u8, WRITE_VALUE_MAX>,
    /// Write-value sub type
    pub sub_type: u32,
}

impl WriteValuePayload {
    /// Create a plain write
    pub fn new(addr: DevAddr, value: &[u8]) -> Result<Self> {
        let value = ArrayVec::try_from(value).map_err(|_| Error::InvalidParameter)?;
        Ok(Self {
            addr,
            value,
            sub_type: WRITE_VALUE_SUB_TYPE_PLAIN,
        })
    }

    fn to_sqe(&self) -> Option<WriteValueSqe> {
        if self.addr.is_null() || !self.addr.fits_descriptor() {
            return None;
        }
        let awsize = WriteValueSqe::awsize_for(self.value.len())?;
        let mut value = [0u8; WRITE_VALUE_MAX];
        value[..self.value.len()].copy_from_slice(&self.value);
        Some(WriteValueSqe {
            addr: self.addr,
            awsize,
            snoop: false,
            awprot: 0,
            sub_type: self.sub_type,
            value,
        })
    }
}

fn write_value_sqe(task: &Task, ctx: &EncodeCtx<'_>, p: WriteValueSqe) -> Sqe {
    Sqe::new(
        SqeHeader::new(SqeType::WriteValue, task.stream_id(), task.task_id()),
        ctx.config.kernel_credit,
        SqePayload::WriteValue(p),
    )
}

fn encode_write_value(task: &mut Task, ctx: &EncodeCtx<'_>, out: &mut alloc::vec::Vec<Sqe>) {
    let TaskPayload::WriteValue(p) = task.payload() else {
        return;
    };
    match p.to_sqe() {
        Some(sqe) => out.push(write_value_sqe(task, ctx, sqe)),
        None => log::warn!(
            "invalid write value, stream_id={}, task_id={}, addr={}, len={}",
            task.stream_id(),
            task.task_id(),
            p.addr,
            p.value.len()
        ),
    }
}

fn encode_write_value_legacy(task: &Task, _ctx: &EncodeCtx<'_>) -> LegacyEncode {
    let TaskPayload::WriteValue(p) = task.payload() else {
        return LegacyEncode::Invalid;
    };
    let Some(sqe) = p.to_sqe() else {
        return LegacyEncode::Invalid;
    };
    let mut cmd = TsCommand::new(LegacyTaskType::WriteValue, task.stream_id(), task.task_id());
    cmd.args[0] = sqe.addr.lo32();
    cmd.args[1] = sqe.addr.hi17();
    cmd.args[2] = u32::from(sqe.awsize);
    for (i, chunk) in sqe.value.chunks_exact(4).enumerate() {
        cmd.args[3 + i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    LegacyEncode::Command(cmd)
}

pub(crate) fn write_value_ops() -> TaskOpsBuilder {
    TaskOpsBuilder::new()
        .encode_sqe(encode_write_value)
        .encode_legacy(encode_write_value_legacy)
}

// =============================================================================
// NOTIFY
// =============================================================================

/// A notify register, shared by every task that records or waits on it
#[derive(Debug)]
pub struct Notify {
    id: u32,
    device_id: DeviceId,
    remote_addrs: Mutex<HashMap<(DeviceId, DeviceId), DevAddr>>,
}

impl Notify {
    /// Notify `id` owned by `device_id`
    pub fn new(id: u32, device_id: DeviceId) -> Self {
        Self {
            id,
            device_id,
            remote_addrs: Mutex::new(HashMap::new()),
        }
    }

    /// Register id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Owning device
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Address of this register as seen from `local`
    ///
    /// The first call for a device pair goes to the driver; later calls hit
    /// the cache.
    pub fn address_from(&self, driver: &dyn DriverFacade, local: DeviceId) -> Result<DevAddr> {
        let key = (local, self.device_id);
        if let Some(addr) = self.remote_addrs.lock().get(&key) {
            return Ok(*addr);
        }

        let addr = driver.resolve_notify_address(local, self.device_id, self.id)?;
        if addr.is_null() || !addr.fits_descriptor() {
            return Err(Error::InvalidDeviceAddress);
        }
        log::debug!(
            "notify address resolved, notify_id={}, local={}, remote={}, addr={}",
            self.id,
            local,
            self.device_id,
            addr
        );
        self.remote_addrs.lock().insert(key, addr);
        Ok(addr)
    }
}

/// Record a notify
#[derive(Debug, Clone)]
pub struct NotifyRecordPayload {
    /// Target notify
    pub notify: Arc<Notify>,
}

impl NotifyRecordPayload {
    fn is_remote(&self, task: &Task) -> bool {
        self.notify.device_id() != task.device_id()
    }
}

fn encode_notify_record(task: &mut Task, ctx: &EncodeCtx<'_>, out: &mut alloc::vec::Vec<Sqe>) {
    let TaskPayload::NotifyRecord(p) = task.payload() else {
        return;
    };

    if !p.is_remote(task) {
        out.push(Sqe::new(
            SqeHeader::new(SqeType::NotifyRecord, task.stream_id(), task.task_id()),
            ctx.config.kernel_credit,
            SqePayload::Notify(NotifySqe {
                notify_id: p.notify.id(),
                timeout: 0,
            }),
        ));
        return;
    }

    let addr = match p.notify.address_from(ctx.driver, task.device_id()) {
        Ok(addr) => addr,
        Err(e) => {
            log::warn!(
                "notify address look-up failed, stream_id={}, task_id={}, notify_id={}, remote={}: {}",
                task.stream_id(),
                task.task_id(),
                p.notify.id(),
                p.notify.device_id(),
                e
            );
            return;
        }
    };

    let mut value = [0u8; WRITE_VALUE_MAX];
    value[..4].copy_from_slice(&1u32.to_le_bytes());
    let sqe = WriteValueSqe {
        addr,
        awsize: 2,
        snoop: false,
        awprot: 0,
        sub_type: WRITE_VALUE_SUB_TYPE_NOTIFY_RECORD,
        value,
    };
    out.push(write_value_sqe(task, ctx, sqe));
}

fn encode_notify_record_legacy(task: &Task, _ctx: &EncodeCtx<'_>) -> LegacyEncode {
    let TaskPayload::NotifyRecord(p) = task.payload() else {
        return LegacyEncode::Invalid;
    };
    // legacy schedulers cannot write to another device
    if p.is_remote(task) {
        return LegacyEncode::Unsupported;
    }
    let mut cmd = TsCommand::new(LegacyTaskType::NotifyRecord, task.stream_id(), task.task_id());
    cmd.args[0] = p.notify.id();
    LegacyEncode::Command(cmd)
}

/// Wait on a local notify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyWaitPayload {
    /// Notify id
    pub notify_id: u32,
    /// Timeout in milliseconds, 0 to wait forever
    pub timeout_ms: u32,
}

fn encode_notify_wait(task: &mut Task, ctx: &EncodeCtx<'_>, out: &mut alloc::vec::Vec<Sqe>) {
    let TaskPayload::NotifyWait(p) = task.payload() else {
        return;
    };
    let credit = if p.timeout_ms == 0 {
        ctx.config.never_timeout_credit
    } else {
        ctx.config.kernel_credit
    };
    out.push(Sqe::new(
        SqeHeader::new(SqeType::NotifyWait, task.stream_id(), task.task_id()),
        credit,
        SqePayload::Notify(NotifySqe {
            notify_id: p.notify_id,
            timeout: p.timeout_ms,
        }),
    ));
}

fn encode_notify_wait_legacy(task: &Task, _ctx: &EncodeCtx<'_>) -> LegacyEncode {
    let TaskPayload::NotifyWait(p) = task.payload() else {
        return LegacyEncode::Invalid;
    };
    let mut cmd = TsCommand::new(LegacyTaskType::NotifyWait, task.stream_id(), task.task_id());
    cmd.args[0] = p.notify_id;
    cmd.args[1] = p.timeout_ms;
    LegacyEncode::Command(cmd)
}

fn finalize_notify(task: &mut Task, ctx: &mut FinalizeCtx<'_>) {
    if !propagate_failure(task, ctx) {
        return;
    }
    let expand = match task.payload() {
        TaskPayload::NotifyRecord(p) => ExpandInfo::Notify {
            notify_id: p.notify.id(),
            remote_device: p.is_remote(task).then_some(p.notify.device_id()),
        },
        TaskPayload::NotifyWait(p) => ExpandInfo::Notify {
            notify_id: p.notify_id,
            remote_device: None,
        },
        _ => ExpandInfo::None,
    };
    ctx.notifier.notify(&task.exception_info(expand));
}

pub(crate) fn notify_record_ops() -> TaskOpsBuilder {
    TaskOpsBuilder::new()
        .encode_sqe(encode_notify_record)
        .encode_legacy(encode_notify_record_legacy)
        .finalize(finalize_notify)
}

pub(crate) fn notify_wait_ops() -> TaskOpsBuilder {
    TaskOpsBuilder::new()
        .encode_sqe(encode_notify_wait)
        .encode_legacy(encode_notify_wait_legacy)
        .finalize(finalize_notify)
}
