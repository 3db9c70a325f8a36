//! # Completion Reports
//!
//! Fixed 16-byte records the hardware writes to the completion queue, one
//! per descriptor that requested a completion.

use bitflags::bitflags;

use ember_core::{RawReport, Result, StreamId, TaskId};

use crate::codec::{FieldReader, FieldWriter};
use crate::REPORT_SIZE;

bitflags! {
    /// Error type bits of a completion report
    ///
    /// Only the lowest set bit is authoritative. Bits 6 and 7 are reserved
    /// and kept so the lowest-bit rule sees them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ErrorTypeBits: u8 {
        /// Execution exception
        const EXCEPTION = 1 << 0;
        /// Trap or bus error
        const TRAP = 1 << 1;
        /// Timeout
        const TIMEOUT = 1 << 2;
        /// Descriptor rejected
        const SQE_ERROR = 1 << 3;
        /// Resource conflict
        const RES_CONFLICT = 1 << 4;
        /// Software status error
        const SW_STATUS = 1 << 5;
    }
}

impl ErrorTypeBits {
    /// Index of the authoritative (lowest set) bit, `None` when clear
    pub fn lowest_index(self) -> Option<u8> {
        if self.bits() == 0 {
            None
        } else {
            Some(self.bits().trailing_zeros() as u8)
        }
    }

    /// Name of a bit index for logs
    pub fn index_name(index: u8) -> &'static str {
        match index {
            0 => "exception",
            1 => "trap",
            2 => "timeout",
            3 => "sqe error",
            4 => "res conflict",
            5 => "sw status",
            _ => "reserved",
        }
    }
}

/// Decoded completion report
///
/// ```text
/// 0..2 stream | 2..4 task | 4..8 error_code | 8 error_type | 9 sqe_type
/// 10..12 sq_id | 12..14 sq_head | 14 flags | 15 reserved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionReport {
    /// Stream id as seen by hardware
    pub stream_id: StreamId,
    /// Task id as seen by hardware
    pub task_id: TaskId,
    /// Raw firmware error code
    pub error_code: u32,
    /// Error type bits
    pub error_type: ErrorTypeBits,
    /// Type of the descriptor that completed
    pub sqe_type: u8,
    /// Submit queue the descriptor came from
    pub sq_id: u16,
    /// Submit queue head after the completion
    pub sq_head: u16,
    /// Report flags
    pub flags: u8,
}

impl CompletionReport {
    /// Successful completion for a task
    pub fn success(stream_id: StreamId, task_id: TaskId, sqe_type: u8) -> Self {
        Self {
            stream_id,
            task_id,
            sqe_type,
            ..Self::default()
        }
    }

    /// Failed completion for a task
    pub fn failure(
        stream_id: StreamId,
        task_id: TaskId,
        sqe_type: u8,
        error_type: ErrorTypeBits,
        error_code: u32,
    ) -> Self {
        Self {
            stream_id,
            task_id,
            sqe_type,
            error_type,
            error_code,
            ..Self::default()
        }
    }

    /// Check for any error bit
    #[inline]
    pub fn is_error(&self) -> bool {
        !self.error_type.is_empty()
    }

    /// Serialize to the 16-byte wire form
    pub fn encode(&self) -> RawReport {
        let mut buf = [0u8; REPORT_SIZE];
        let mut w = FieldWriter::new(&mut buf);
        w.put_u16(0, self.stream_id);
        w.put_u16(2, self.task_id);
        w.put_u32(4, self.error_code);
        w.put_u8(8, self.error_type.bits());
        w.put_u8(9, self.sqe_type);
        w.put_u16(10, self.sq_id);
        w.put_u16(12, self.sq_head);
        w.put_u8(14, self.flags);
        buf
    }

    /// Parse the 16-byte wire form
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let r = FieldReader::new(buf, REPORT_SIZE)?;
        Ok(Self {
            stream_id: r.u16(0),
            task_id: r.u16(2),
            error_code: r.u32(4),
            error_type: ErrorTypeBits::from_bits_retain(r.u8(8)),
            sqe_type: r.u8(9),
            sq_id: r.u16(10),
            sq_head: r.u16(12),
            flags: r.u8(14),
        })
    }
}
