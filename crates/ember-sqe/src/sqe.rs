//! # Submit Queue Entries
//!
//! A hardware descriptor is a header plus a payload whose layout depends on
//! the descriptor type. [`SqePayload`] is the closed set of layouts the
//! dispatch core produces; anything else travels as [`SqePayload::Generic`].
//!
//! Byte map after the header:
//!
//! ```text
//!  8..12  word2          type specific
//! 12..14  aux            type specific
//! 14      kernel_credit
//! 15      ext            type specific
//! 16..64  words 4-15     payload
//! ```

use ember_core::{DescriptorError, DevAddr, RawSqe, Result, StreamId, TaskId, DEV_ADDR_HIGH_MASK};

use crate::codec::{FieldReader, FieldWriter};
use crate::header::{SqeHeader, SqeType};
use crate::SQE_SIZE;

/// AICPU kernel type carried in `ext` for a dump-info load
pub const KERNEL_TYPE_DUMP_LOAD: u8 = 0x80;

/// AICPU kernel type carried in `ext` for a dump-info unload
pub const KERNEL_TYPE_DUMP_UNLOAD: u8 = 0x81;

/// End bitmap set on the unload descriptor that closes a dump bracket
pub const DUMP_END_BITMAP: u8 = 0x20;

/// Maximum value bytes in a write-value descriptor
pub const WRITE_VALUE_MAX: usize = 32;

const AWCACHE_DEFAULT: u32 = 2;

// =============================================================================
// PAYLOADS
// =============================================================================

/// Write an immediate value to device memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteValueSqe {
    /// Target address
    pub addr: DevAddr,
    /// log2 of the write size in bytes (3 bits)
    pub awsize: u8,
    /// Snoop the write through the cache
    pub snoop: bool,
    /// AXI protection bits (3 bits)
    pub awprot: u8,
    /// Sub type (plain write, notify record, event record...)
    pub sub_type: u32,
    /// Value bytes; only the first `1 << awsize` are written
    pub value: [u8; WRITE_VALUE_MAX],
}

impl WriteValueSqe {
    /// Encode a byte length as an awsize field
    pub fn awsize_for(len: usize) -> Option<u8> {
        match len {
            1 | 2 | 4 | 8 | 16 | 32 => Some(len.trailing_zeros() as u8),
            _ => None,
        }
    }

    /// Number of value bytes written
    pub fn value_len(&self) -> usize {
        1usize << self.awsize
    }

    /// Pack word 5: address high bits and AXI attributes
    fn attr_word(&self) -> u32 {
        (self.addr.hi17() & DEV_ADDR_HIGH_MASK)
            | (u32::from(self.awsize) & 0x7) << 20
            | u32::from(self.snoop) << 23
            | AWCACHE_DEFAULT << 24
            | (u32::from(self.awprot) & 0x7) << 28
            | 1 << 31
    }
}

/// Notify record or wait on a local notify register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifySqe {
    /// Notify register id
    pub notify_id: u32,
    /// Wait timeout in milliseconds, 0 for none (wait only)
    pub timeout: u32,
}

/// AICPU kernel launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AicpuSqe {
    /// Kernel type (ext byte)
    pub kernel_type: u8,
    /// Argument block size in bytes
    pub args_size: u32,
    /// Argument block
    pub args: DevAddr,
    /// Shared object name string
    pub so_name: DevAddr,
    /// Kernel name string
    pub kernel_name: DevAddr,
}

/// Dump-info load or unload bracketing an FFTS+ descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpInfoSqe {
    /// Dump info block
    pub info_addr: DevAddr,
    /// Dump info length in bytes
    pub length: u32,
    /// Unload (true) or load (false)
    pub unload: bool,
    /// End bitmap, [`DUMP_END_BITMAP`] on the closing unload
    pub end_bitmap: u8,
}

/// DVPP command list launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DvppSqe {
    /// Command list
    pub cmdlist: DevAddr,
    /// Command list length in bytes
    pub cmdlist_len: u32,
}

/// FFTS+ context set launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FftsPlusSqe {
    /// FFTS type
    pub ffts_type: u8,
    /// Sub type (AIC/AIV mix, HCCL...)
    pub sub_type: u8,
    /// Firmware timeout in seconds, 0 for none
    pub timeout: u16,
    /// Number of contexts
    pub context_count: u16,
    /// Contexts ready at launch
    pub ready_context_count: u16,
    /// Context array; the high part is masked to 17 bits on the wire
    pub context_addr: DevAddr,
}

/// Collective communication unit mission launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcuSqe {
    /// Die id
    pub die_id: u8,
    /// Mission id
    pub mission_id: u8,
    /// Timeout in seconds
    pub timeout: u16,
    /// First instruction
    pub instr_start: u16,
    /// Instruction count
    pub instr_count: u16,
    /// Mission argument block
    pub args: DevAddr,
}

/// Descriptor payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqePayload {
    /// Write value
    WriteValue(WriteValueSqe),
    /// Local notify record or wait
    Notify(NotifySqe),
    /// AICPU kernel
    Aicpu(AicpuSqe),
    /// Dump-info load/unload (AICPU_D)
    DumpInfo(DumpInfoSqe),
    /// DVPP command list
    Dvpp(DvppSqe),
    /// FFTS+ context set
    FftsPlus(FftsPlusSqe),
    /// CCU mission
    Ccu(CcuSqe),
    /// Placeholder
    PlaceHolder,
    /// Invalid descriptor
    Invalid,
    /// Any other type, kept as raw fields
    Generic {
        /// Word 2
        word2: u32,
        /// Bytes 12..14
        aux: u16,
        /// Byte 15
        ext: u8,
        /// Words 4..15
        words: [u32; 12],
    },
}

impl SqePayload {
    /// Check whether this payload layout belongs to `sqe_type`
    pub fn accepts(&self, sqe_type: SqeType) -> bool {
        match self {
            Self::WriteValue(_) => sqe_type == SqeType::WriteValue,
            Self::Notify(_) => matches!(sqe_type, SqeType::NotifyRecord | SqeType::NotifyWait),
            Self::Aicpu(a) => {
                sqe_type.is_aicpu()
                    && a.kernel_type != KERNEL_TYPE_DUMP_LOAD
                    && a.kernel_type != KERNEL_TYPE_DUMP_UNLOAD
            }
            Self::DumpInfo(_) => sqe_type == SqeType::AicpuD,
            Self::Dvpp(_) => sqe_type.is_dvpp(),
            Self::FftsPlus(_) => sqe_type == SqeType::FftsPlus,
            Self::Ccu(_) => sqe_type == SqeType::Ccu,
            Self::PlaceHolder => sqe_type == SqeType::PlaceHolder,
            Self::Invalid => sqe_type == SqeType::Invalid,
            Self::Generic { .. } => !has_structured_layout(sqe_type),
        }
    }
}

fn has_structured_layout(sqe_type: SqeType) -> bool {
    matches!(
        sqe_type,
        SqeType::WriteValue
            | SqeType::NotifyRecord
            | SqeType::NotifyWait
            | SqeType::AicpuH
            | SqeType::AicpuD
            | SqeType::Vpc
            | SqeType::Jpege
            | SqeType::Jpegd
            | SqeType::FftsPlus
            | SqeType::Ccu
            | SqeType::PlaceHolder
            | SqeType::Invalid
    )
}

// =============================================================================
// SQE
// =============================================================================

/// One submit queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sqe {
    /// Header
    pub header: SqeHeader,
    /// Hardware credit (timeout budget)
    pub kernel_credit: u8,
    /// Type specific payload
    pub payload: SqePayload,
}

impl Sqe {
    /// Create an entry
    pub fn new(header: SqeHeader, kernel_credit: u8, payload: SqePayload) -> Self {
        Self {
            header,
            kernel_credit,
            payload,
        }
    }

    /// Invalid descriptor standing in for a task that failed to encode
    pub fn invalid(rt_stream_id: StreamId, task_id: TaskId) -> Self {
        Self::new(
            SqeHeader::new(SqeType::Invalid, rt_stream_id, task_id),
            0,
            SqePayload::Invalid,
        )
    }

    /// Serialize to the 64-byte wire form
    ///
    /// Fails when the payload layout does not belong to the header type.
    pub fn encode(&self) -> Result<RawSqe> {
        if !self.payload.accepts(self.header.sqe_type) {
            log::warn!(
                "sqe payload does not belong to type {}, stream_id={}, task_id={}",
                self.header.sqe_type.name(),
                self.header.rt_stream_id,
                self.header.task_id
            );
            return Err(DescriptorError::InvalidField("payload").into());
        }

        let mut buf = [0u8; SQE_SIZE];
        let mut w = FieldWriter::new(&mut buf);
        self.header.encode_into(&mut w);
        w.put_u8(14, self.kernel_credit);

        match &self.payload {
            SqePayload::WriteValue(p) => {
                w.put_word(4, p.addr.lo32());
                w.put_word(5, p.attr_word());
                w.put_word(7, p.sub_type);
                w.put_bytes(32, &p.value);
            }
            SqePayload::Notify(p) => {
                w.put_word(4, p.notify_id);
                w.put_word(5, p.timeout);
            }
            SqePayload::Aicpu(p) => {
                w.put_word(2, p.args_size);
                w.put_u8(15, p.kernel_type);
                put_addr(&mut w, 4, p.args);
                put_addr(&mut w, 6, p.so_name);
                put_addr(&mut w, 8, p.kernel_name);
            }
            SqePayload::DumpInfo(p) => {
                w.put_word(2, p.length);
                w.put_u8(12, p.end_bitmap);
                w.put_u8(
                    15,
                    if p.unload {
                        KERNEL_TYPE_DUMP_UNLOAD
                    } else {
                        KERNEL_TYPE_DUMP_LOAD
                    },
                );
                put_addr(&mut w, 4, p.info_addr);
            }
            SqePayload::Dvpp(p) => {
                w.put_word(2, p.cmdlist_len);
                put_addr(&mut w, 4, p.cmdlist);
            }
            SqePayload::FftsPlus(p) => {
                w.put_u8(8, p.ffts_type);
                w.put_u8(9, p.sub_type);
                w.put_u16(10, p.timeout);
                w.put_u16(12, p.context_count);
                put_addr(&mut w, 4, p.context_addr);
                w.put_word(6, u32::from(p.ready_context_count));
            }
            SqePayload::Ccu(p) => {
                w.put_u8(8, p.die_id);
                w.put_u8(9, p.mission_id);
                w.put_u16(10, p.timeout);
                w.put_word(4, u32::from(p.instr_start) | u32::from(p.instr_count) << 16);
                put_addr(&mut w, 5, p.args);
            }
            SqePayload::PlaceHolder | SqePayload::Invalid => {}
            SqePayload::Generic {
                word2,
                aux,
                ext,
                words,
            } => {
                w.put_word(2, *word2);
                w.put_u16(12, *aux);
                w.put_u8(15, *ext);
                for (i, word) in words.iter().enumerate() {
                    w.put_word(4 + i, *word);
                }
            }
        }

        Ok(buf)
    }

    /// Serialize, replacing a malformed entry with an invalid descriptor
    /// that keeps the same ids
    pub fn encode_or_invalid(&self) -> RawSqe {
        match self.encode() {
            Ok(raw) => raw,
            Err(_) => {
                let mut buf = [0u8; SQE_SIZE];
                let header = SqeHeader {
                    sqe_type: SqeType::Invalid,
                    ..self.header
                };
                header.encode_into(&mut FieldWriter::new(&mut buf));
                buf
            }
        }
    }

    /// Parse the 64-byte wire form
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let r = FieldReader::new(buf, SQE_SIZE)?;
        let header = SqeHeader::decode_from(&r)?;
        let kernel_credit = r.u8(14);

        let payload = match header.sqe_type {
            SqeType::WriteValue => {
                let attr = r.word(5);
                let mut value = [0u8; WRITE_VALUE_MAX];
                value.copy_from_slice(r.bytes(32, WRITE_VALUE_MAX));
                SqePayload::WriteValue(WriteValueSqe {
                    addr: DevAddr::from_split(r.word(4), attr),
                    awsize: ((attr >> 20) & 0x7) as u8,
                    snoop: attr & (1 << 23) != 0,
                    awprot: ((attr >> 28) & 0x7) as u8,
                    sub_type: r.word(7),
                    value,
                })
            }
            SqeType::NotifyRecord | SqeType::NotifyWait => SqePayload::Notify(NotifySqe {
                notify_id: r.word(4),
                timeout: r.word(5),
            }),
            SqeType::AicpuH | SqeType::AicpuD => {
                let kernel_type = r.u8(15);
                let is_dump = header.sqe_type == SqeType::AicpuD
                    && (kernel_type == KERNEL_TYPE_DUMP_LOAD || kernel_type == KERNEL_TYPE_DUMP_UNLOAD);
                if is_dump {
                    SqePayload::DumpInfo(DumpInfoSqe {
                        info_addr: get_addr(&r, 4),
                        length: r.word(2),
                        unload: kernel_type == KERNEL_TYPE_DUMP_UNLOAD,
                        end_bitmap: r.u8(12),
                    })
                } else {
                    SqePayload::Aicpu(AicpuSqe {
                        kernel_type,
                        args_size: r.word(2),
                        args: get_addr(&r, 4),
                        so_name: get_addr(&r, 6),
                        kernel_name: get_addr(&r, 8),
                    })
                }
            }
            SqeType::Vpc | SqeType::Jpege | SqeType::Jpegd => SqePayload::Dvpp(DvppSqe {
                cmdlist: get_addr(&r, 4),
                cmdlist_len: r.word(2),
            }),
            SqeType::FftsPlus => SqePayload::FftsPlus(FftsPlusSqe {
                ffts_type: r.u8(8),
                sub_type: r.u8(9),
                timeout: r.u16(10),
                context_count: r.u16(12),
                ready_context_count: r.word(6) as u16,
                context_addr: get_addr(&r, 4),
            }),
            SqeType::Ccu => {
                let range = r.word(4);
                SqePayload::Ccu(CcuSqe {
                    die_id: r.u8(8),
                    mission_id: r.u8(9),
                    timeout: r.u16(10),
                    instr_start: range as u16,
                    instr_count: (range >> 16) as u16,
                    args: get_addr(&r, 5),
                })
            }
            SqeType::PlaceHolder => SqePayload::PlaceHolder,
            SqeType::Invalid => SqePayload::Invalid,
            _ => {
                let mut words = [0u32; 12];
                for (i, word) in words.iter_mut().enumerate() {
                    *word = r.word(4 + i);
                }
                SqePayload::Generic {
                    word2: r.word(2),
                    aux: r.u16(12),
                    ext: r.u8(15),
                    words,
                }
            }
        };

        Ok(Self {
            header,
            kernel_credit,
            payload,
        })
    }
}

/// Write an address as (low word, 17-bit high word) at words `index`, `index + 1`
fn put_addr(w: &mut FieldWriter<'_>, index: usize, addr: DevAddr) {
    w.put_word(index, addr.lo32());
    w.put_word(index + 1, addr.hi17());
}

fn get_addr(r: &FieldReader<'_>, index: usize) -> DevAddr {
    DevAddr::from_split(r.word(index), r.word(index + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::SqeFlags;

    #[test]
    fn test_write_value_layout() {
        let mut value = [0u8; WRITE_VALUE_MAX];
        value[..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        let sqe = Sqe::new(
            SqeHeader::new(SqeType::WriteValue, 7, 9),
            254,
            SqePayload::WriteValue(WriteValueSqe {
                addr: DevAddr::new(0x1_2345_6789_ABCD),
                awsize: WriteValueSqe::awsize_for(4).unwrap(),
                snoop: false,
                awprot: 0,
                sub_type: 3,
                value,
            }),
        );

        let raw = sqe.encode().unwrap();
        let r = FieldReader::new(&raw, SQE_SIZE).unwrap();
        assert_eq!(r.u8(0), SqeType::WriteValue as u8);
        assert_eq!(r.u8(14), 254);
        assert_eq!(r.word(4), 0x6789_ABCD);
        // hi17 | awsize 2 @20 | awcache 2 @24 | va @31
        assert_eq!(r.word(5), 0x1_2345 | 2 << 20 | 2 << 24 | 1 << 31);
        assert_eq!(r.word(7), 3);
        assert_eq!(r.word(8), 0xDEAD_BEEF);
        assert_eq!(Sqe::decode(&raw).unwrap(), sqe);
    }

    #[test]
    fn test_awsize_encoding() {
        assert_eq!(WriteValueSqe::awsize_for(1), Some(0));
        assert_eq!(WriteValueSqe::awsize_for(8), Some(3));
        assert_eq!(WriteValueSqe::awsize_for(32), Some(5));
        assert_eq!(WriteValueSqe::awsize_for(3), None);
        assert_eq!(WriteValueSqe::awsize_for(64), None);
    }

    #[test]
    fn test_ffts_context_address_masked() {
        let sqe = Sqe::new(
            SqeHeader::new(SqeType::FftsPlus, 1, 2),
            255,
            SqePayload::FftsPlus(FftsPlusSqe {
                ffts_type: 4,
                sub_type: 0,
                timeout: 1800,
                context_count: 3,
                ready_context_count: 1,
                context_addr: DevAddr::new(0xFFFE_0001_0000_1000),
            }),
        );
        let raw = sqe.encode().unwrap();
        let decoded = Sqe::decode(&raw).unwrap();
        match decoded.payload {
            SqePayload::FftsPlus(p) => {
                assert_eq!(p.context_addr.raw(), 0x0_0001_0000_1000);
                assert_eq!(p.context_count, 3);
                assert_eq!(p.timeout, 1800);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_dump_info_decodes_as_dump() {
        let sqe = Sqe::new(
            SqeHeader::new(SqeType::AicpuD, 1, 2),
            254,
            SqePayload::DumpInfo(DumpInfoSqe {
                info_addr: DevAddr::new(0x4000),
                length: 128,
                unload: true,
                end_bitmap: DUMP_END_BITMAP,
            }),
        );
        let raw = sqe.encode().unwrap();
        assert_eq!(raw[15], KERNEL_TYPE_DUMP_UNLOAD);
        assert_eq!(raw[12], 0x20);
        assert_eq!(Sqe::decode(&raw).unwrap(), sqe);
    }

    #[test]
    fn test_payload_type_mismatch_rejected() {
        let sqe = Sqe::new(
            SqeHeader::new(SqeType::Sdma, 1, 2),
            0,
            SqePayload::Notify(NotifySqe {
                notify_id: 1,
                timeout: 0,
            }),
        );
        assert_eq!(
            sqe.encode(),
            Err(DescriptorError::InvalidField("payload").into())
        );

        let raw = sqe.encode_or_invalid();
        let decoded = Sqe::decode(&raw).unwrap();
        assert_eq!(decoded.header.sqe_type, SqeType::Invalid);
        assert_eq!(decoded.header.task_id, 2);
    }

    #[test]
    fn test_generic_payload_preserves_fields() {
        let mut words = [0u32; 12];
        words[0] = 0x1000;
        words[11] = 0xFFFF_FFFF;
        let mut header = SqeHeader::new(SqeType::Aic, 3, 4);
        header.flags = SqeFlags::WR_CQE | SqeFlags::HEAD_UPDATE;
        header.block_dim = 8;
        let sqe = Sqe::new(
            header,
            254,
            SqePayload::Generic {
                word2: 0xAA,
                aux: 0xBB,
                ext: 0xCC,
                words,
            },
        );
        assert_eq!(Sqe::decode(&sqe.encode().unwrap()).unwrap(), sqe);
    }

    #[test]
    fn test_invalid_descriptor() {
        let raw = Sqe::invalid(5, 6).encode().unwrap();
        assert_eq!(raw[0], 63);
        assert!(raw[8..].iter().all(|b| *b == 0));
    }
}
