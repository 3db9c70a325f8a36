//! # CCU Missions
//!
//! One descriptor launching a collective-communication-unit mission. The
//! hardware packs a status and sub status into the low half of the error
//! code; they are kept for the fault callback.

use alloc::vec::Vec;

use ember_core::{DevAddr, ExpandInfo};
use ember_sqe::{CcuSqe, CompletionReport, Sqe, SqeHeader, SqePayload, SqeType};

use crate::classify::ccu_status;
use crate::registry::{
    default_decode, propagate_failure, DecodeAction, DecodeCtx, EncodeCtx, FinalizeCtx,
    TaskOpsBuilder,
};
use crate::task::{Task, TaskPayload};

/// CCU mission launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CcuPayload {
    /// Die the mission runs on
    pub die_id: u8,
    /// Mission slot
    pub mission_id: u8,
    /// Timeout in seconds, 0 for the device default
    pub timeout: u16,
    /// First instruction
    pub instr_start: u16,
    /// Instruction count
    pub instr_count: u16,
    /// Argument block
    pub args: DevAddr,
    /// Status and sub status of the last failure
    pub last_status: (u8, u8),
}

fn encode(task: &mut Task, ctx: &EncodeCtx<'_>, out: &mut Vec<Sqe>) {
    let TaskPayload::Ccu(p) = task.payload() else {
        return;
    };
    if p.instr_count == 0 || !p.args.fits_descriptor() {
        log::warn!(
            "invalid ccu mission, stream_id={}, task_id={}, die_id={}, mission_id={}",
            task.stream_id(),
            task.task_id(),
            p.die_id,
            p.mission_id
        );
        return;
    }
    out.push(Sqe::new(
        SqeHeader::new(SqeType::Ccu, task.stream_id(), task.task_id()),
        ctx.config.kernel_credit,
        SqePayload::Ccu(CcuSqe {
            die_id: p.die_id,
            mission_id: p.mission_id,
            timeout: p.timeout,
            instr_start: p.instr_start,
            instr_count: p.instr_count,
            args: p.args,
        }),
    ));
}

fn decode(task: &mut Task, report: &CompletionReport, ctx: &DecodeCtx<'_>) -> DecodeAction {
    if report.is_error() {
        if let TaskPayload::Ccu(p) = task.payload_mut() {
            p.last_status = ccu_status(report.error_code);
        }
    }
    default_decode(task, report, ctx)
}

fn finalize(task: &mut Task, ctx: &mut FinalizeCtx<'_>) {
    if !propagate_failure(task, ctx) {
        return;
    }
    let expand = match task.payload() {
        TaskPayload::Ccu(p) => ExpandInfo::Ccu {
            die_id: p.die_id,
            mission_id: p.mission_id,
            status: p.last_status.0,
            sub_status: p.last_status.1,
        },
        _ => ExpandInfo::None,
    };
    ctx.notifier.notify(&task.exception_info(expand));
}

fn describe_error(task: &Task) {
    if let TaskPayload::Ccu(p) = task.payload() {
        log::error!(
            "ccu mission failed, device_id={}, stream_id={}, task_id={}, die_id={}, mission_id={}, status={:#x}, sub_status={:#x}",
            task.device_id(),
            task.stream_id(),
            task.task_id(),
            p.die_id,
            p.mission_id,
            p.last_status.0,
            p.last_status.1
        );
    }
}

pub(crate) fn ops() -> TaskOpsBuilder {
    TaskOpsBuilder::new()
        .encode_sqe(encode)
        .decode(decode)
        .finalize(finalize)
        .describe_error(describe_error)
}
