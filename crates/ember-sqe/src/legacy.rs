//! # Legacy TS Commands
//!
//! Devices without direct SQE consumption take a 64-byte task-scheduler
//! command instead. The core only builds these for kinds that have a legacy
//! encoder; the command body is opaque argument words.

use ember_core::{DescriptorError, RawSqe, Result, StreamId, TaskId};

use crate::codec::{FieldReader, FieldWriter};
use crate::SQE_SIZE;

/// Number of argument words in a TS command
pub const TS_ARG_WORDS: usize = 14;

/// Task scheduler command type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum LegacyTaskType {
    /// Kernel launch
    Kernel = 0x0000,
    /// AICPU kernel launch
    KernelAicpu = 0x0001,
    /// Notify record
    NotifyRecord = 0x0002,
    /// Notify wait
    NotifyWait = 0x0003,
    /// Write value
    WriteValue = 0x0004,
    /// FFTS+ launch
    FftsPlus = 0x0005,
    /// Placeholder
    PlaceHolder = 0x0006,
    /// Unused slot
    Reserved = 0xFFFF,
}

impl LegacyTaskType {
    /// Parse a raw command type
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0x0000 => Self::Kernel,
            0x0001 => Self::KernelAicpu,
            0x0002 => Self::NotifyRecord,
            0x0003 => Self::NotifyWait,
            0x0004 => Self::WriteValue,
            0x0005 => Self::FftsPlus,
            0x0006 => Self::PlaceHolder,
            0xFFFF => Self::Reserved,
            _ => return None,
        })
    }
}

/// Legacy task scheduler command
///
/// ```text
/// 0..2 stream_id | 2..4 task_id | 4..6 task_type | 6..8 flags | 8..64 args[14]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsCommand {
    /// Owning stream
    pub stream_id: StreamId,
    /// Task id
    pub task_id: TaskId,
    /// Command type
    pub task_type: LegacyTaskType,
    /// Command flags
    pub flags: u16,
    /// Argument words
    pub args: [u32; TS_ARG_WORDS],
}

impl TsCommand {
    /// Completion requested
    pub const FLAG_WR_CQE: u16 = 1 << 0;

    /// Create an empty command
    pub fn new(task_type: LegacyTaskType, stream_id: StreamId, task_id: TaskId) -> Self {
        Self {
            stream_id,
            task_id,
            task_type,
            flags: 0,
            args: [0; TS_ARG_WORDS],
        }
    }

    /// Reserved command holding the slot of a task whose payload could not
    /// be encoded
    pub fn invalid(stream_id: StreamId, task_id: TaskId) -> Self {
        Self::new(LegacyTaskType::Reserved, stream_id, task_id)
    }

    /// Serialize to the 64-byte wire form
    pub fn encode(&self) -> RawSqe {
        let mut buf = [0u8; SQE_SIZE];
        let mut w = FieldWriter::new(&mut buf);
        w.put_u16(0, self.stream_id);
        w.put_u16(2, self.task_id);
        w.put_u16(4, self.task_type as u16);
        w.put_u16(6, self.flags);
        for (i, arg) in self.args.iter().enumerate() {
            w.put_word(2 + i, *arg);
        }
        buf
    }

    /// Parse the 64-byte wire form
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let r = FieldReader::new(buf, SQE_SIZE)?;
        let raw_type = r.u16(4);
        let task_type = LegacyTaskType::from_raw(raw_type)
            .ok_or(DescriptorError::InvalidField("task_type"))?;
        let mut args = [0u32; TS_ARG_WORDS];
        for (i, arg) in args.iter_mut().enumerate() {
            *arg = r.word(2 + i);
        }
        Ok(Self {
            stream_id: r.u16(0),
            task_id: r.u16(2),
            task_type,
            flags: r.u16(6),
            args,
        })
    }
}
