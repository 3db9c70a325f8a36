//! # SQE Header
//!
//! The first eight bytes of every submit queue entry.

use bitflags::bitflags;

use ember_core::{DescriptorError, Result, StreamId, TaskId};

use crate::codec::{FieldReader, FieldWriter};

// =============================================================================
// SQE TYPE
// =============================================================================

/// Hardware descriptor type (six bits on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SqeType {
    /// Cube core kernel
    Aic = 0,
    /// Vector core kernel
    Aiv = 1,
    /// Fused cube and vector kernel
    Fusion = 2,
    /// Placeholder that only produces a completion
    PlaceHolder = 3,
    /// AICPU kernel on host-side CPU
    AicpuH = 4,
    /// AICPU kernel on device-side CPU
    AicpuD = 5,
    /// Notify record
    NotifyRecord = 6,
    /// Notify wait
    NotifyWait = 7,
    /// Write an immediate value to device memory
    WriteValue = 8,
    /// UB DMA
    Ubdma = 9,
    /// Asynchronous DMA
    AsyncDma = 10,
    /// System DMA copy
    Sdma = 11,
    /// Vision preprocessing core
    Vpc = 12,
    /// JPEG encoder
    Jpege = 13,
    /// JPEG decoder
    Jpegd = 14,
    /// Cache maintenance
    Cmo = 15,
    /// Collective communication unit
    Ccu = 16,
    /// FFTS+ context set
    FftsPlus = 17,
    /// NSC
    Nsc = 18,
    /// DSS
    Dss = 19,
    /// Conditional
    Cond = 20,
    /// Invalid descriptor; hardware completes it with an SQE error
    Invalid = 63,
}

impl SqeType {
    /// Mask of the type field in byte 0
    pub const MASK: u8 = 0x3F;

    /// Parse a raw type field
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw & Self::MASK {
            0 => Self::Aic,
            1 => Self::Aiv,
            2 => Self::Fusion,
            3 => Self::PlaceHolder,
            4 => Self::AicpuH,
            5 => Self::AicpuD,
            6 => Self::NotifyRecord,
            7 => Self::NotifyWait,
            8 => Self::WriteValue,
            9 => Self::Ubdma,
            10 => Self::AsyncDma,
            11 => Self::Sdma,
            12 => Self::Vpc,
            13 => Self::Jpege,
            14 => Self::Jpegd,
            15 => Self::Cmo,
            16 => Self::Ccu,
            17 => Self::FftsPlus,
            18 => Self::Nsc,
            19 => Self::Dss,
            20 => Self::Cond,
            63 => Self::Invalid,
            _ => return None,
        })
    }

    /// Check for an AICPU descriptor type
    pub fn is_aicpu(self) -> bool {
        matches!(self, Self::AicpuH | Self::AicpuD)
    }

    /// Check for a DVPP descriptor type
    pub fn is_dvpp(self) -> bool {
        matches!(self, Self::Vpc | Self::Jpege | Self::Jpegd)
    }

    /// Short name for logs
    pub fn name(self) -> &'static str {
        match self {
            Self::Aic => "AIC",
            Self::Aiv => "AIV",
            Self::Fusion => "FUSION",
            Self::PlaceHolder => "PLACE_HOLDER",
            Self::AicpuH => "AICPU_H",
            Self::AicpuD => "AICPU_D",
            Self::NotifyRecord => "NOTIFY_RECORD",
            Self::NotifyWait => "NOTIFY_WAIT",
            Self::WriteValue => "WRITE_VALUE",
            Self::Ubdma => "UBDMA",
            Self::AsyncDma => "ASYNCDMA",
            Self::Sdma => "SDMA",
            Self::Vpc => "VPC",
            Self::Jpege => "JPEGE",
            Self::Jpegd => "JPEGD",
            Self::Cmo => "CMO",
            Self::Ccu => "CCU",
            Self::FftsPlus => "FFTS_PLUS",
            Self::Nsc => "NSC",
            Self::Dss => "DSS",
            Self::Cond => "COND",
            Self::Invalid => "INVALID",
        }
    }
}

// =============================================================================
// HEADER FLAGS
// =============================================================================

bitflags! {
    /// Header control bits, as the u16 formed by bytes 0 and 1
    ///
    /// The low six bits of byte 0 are the type field and are never set here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SqeFlags: u16 {
        /// Lock the queue head after this entry
        const LOCK = 1 << 6;
        /// Unlock the queue head
        const UNLOCK = 1 << 7;
        /// Raise an interrupt on completion
        const IE = 1 << 8;
        /// Pre-processing fence
        const PRE_P = 1 << 9;
        /// Post-processing fence
        const POST_P = 1 << 10;
        /// Write a completion entry
        const WR_CQE = 1 << 11;
        /// Payload is a pointer to the real descriptor
        const PTR_MODE = 1 << 12;
        /// Round-trip-time measurement mode
        const RTT_MODE = 1 << 13;
        /// Update the queue head on completion
        const HEAD_UPDATE = 1 << 14;
        /// Enable floating-point overflow detection
        const OVERFLOW_EN = 1 << 15;
    }
}

// =============================================================================
// HEADER
// =============================================================================

/// Common SQE header (bytes 0..8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqeHeader {
    /// Descriptor type
    pub sqe_type: SqeType,
    /// Control bits
    pub flags: SqeFlags,
    /// Number of cores the task runs on
    pub block_dim: u16,
    /// Stream id as seen by hardware
    pub rt_stream_id: StreamId,
    /// Task id as seen by hardware
    pub task_id: TaskId,
}

impl SqeHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 8;

    /// Create a header with no flags set
    pub fn new(sqe_type: SqeType, rt_stream_id: StreamId, task_id: TaskId) -> Self {
        Self {
            sqe_type,
            flags: SqeFlags::empty(),
            block_dim: 0,
            rt_stream_id,
            task_id,
        }
    }

    /// Write the header into bytes 0..8
    pub fn encode_into(&self, w: &mut FieldWriter<'_>) {
        let word = (self.sqe_type as u16 & SqeType::MASK as u16) | self.flags.bits();
        w.put_u16(0, word);
        w.put_u16(2, self.block_dim);
        w.put_u16(4, self.rt_stream_id);
        w.put_u16(6, self.task_id);
    }

    /// Parse a header
    pub fn decode_from(r: &FieldReader<'_>) -> Result<Self> {
        let word = r.u16(0);
        let raw_type = (word as u8) & SqeType::MASK;
        let sqe_type = SqeType::from_raw(raw_type).ok_or(DescriptorError::UnknownType(raw_type))?;
        Ok(Self {
            sqe_type,
            flags: SqeFlags::from_bits_truncate(word),
            block_dim: r.u16(2),
            rt_stream_id: r.u16(4),
            task_id: r.u16(6),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bit_positions() {
        let mut header = SqeHeader::new(SqeType::WriteValue, 0x0102, 0x0304);
        header.flags = SqeFlags::LOCK | SqeFlags::WR_CQE | SqeFlags::OVERFLOW_EN;
        header.block_dim = 0x0020;

        let mut buf = [0u8; 8];
        header.encode_into(&mut FieldWriter::new(&mut buf));
        // type 8 plus lock at bit 6
        assert_eq!(buf[0], 0x48);
        // wr_cqe bit 3, overflow_en bit 7
        assert_eq!(buf[1], 0x88);
        assert_eq!(&buf[2..8], &[0x20, 0x00, 0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let buf = [0x3Eu8, 0, 0, 0, 0, 0, 0, 0];
        let r = FieldReader::new(&buf, 8).unwrap();
        assert_eq!(
            SqeHeader::decode_from(&r),
            Err(ember_core::Error::Descriptor(DescriptorError::UnknownType(0x3E)))
        );
    }

    #[test]
    fn test_type_ignores_flag_bits() {
        assert_eq!(SqeType::from_raw(0xC0 | 17), Some(SqeType::FftsPlus));
        assert_eq!(SqeType::from_raw(63), Some(SqeType::Invalid));
        assert!(SqeType::Jpegd.is_dvpp());
        assert!(SqeType::AicpuD.is_aicpu());
    }
}
