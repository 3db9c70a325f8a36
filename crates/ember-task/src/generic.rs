//! # Generic Single-Descriptor Kinds
//!
//! Kernel launches, memory copies and placeholders. These kinds use the
//! generic encoder: one descriptor whose payload is a flat list of words.

use ember_core::DevAddr;
use ember_sqe::{LegacyTaskType, Sqe, SqeHeader, SqePayload, SqeType, TsCommand};

use crate::registry::{EncodeCtx, LegacyEncode, TaskOpsBuilder};
use crate::task::{Task, TaskPayload};

// =============================================================================
// PAYLOADS
// =============================================================================

/// Core a kernel runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelCore {
    /// Cube core
    Aic,
    /// Vector core
    Aiv,
    /// Cube and vector together
    Fusion,
}

impl KernelCore {
    fn sqe_type(self) -> SqeType {
        match self {
            Self::Aic => SqeType::Aic,
            Self::Aiv => SqeType::Aiv,
            Self::Fusion => SqeType::Fusion,
        }
    }
}

/// Kernel launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelPayload {
    /// Core type
    pub core: KernelCore,
    /// Number of cores
    pub block_dim: u16,
    /// Kernel entry PC
    pub pc: DevAddr,
    /// Argument block
    pub args: DevAddr,
    /// Argument block size in bytes
    pub args_size: u32,
}

impl KernelPayload {
    fn is_valid(&self) -> bool {
        !self.pc.is_null() && self.pc.fits_descriptor() && self.args.fits_descriptor() && self.block_dim != 0
    }

    fn words(&self) -> [u32; 12] {
        let mut words = [0u32; 12];
        words[0] = self.pc.lo32();
        words[1] = self.pc.hi17();
        words[2] = self.args.lo32();
        words[3] = self.args.hi17();
        words[4] = self.args_size;
        words
    }
}

/// Device memory copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemcpyPayload {
    /// Source
    pub src: DevAddr,
    /// Destination
    pub dst: DevAddr,
    /// Length in bytes
    pub len: u32,
}

impl MemcpyPayload {
    fn is_valid(&self) -> bool {
        !self.src.is_null()
            && !self.dst.is_null()
            && self.src.fits_descriptor()
            && self.dst.fits_descriptor()
            && self.len != 0
    }

    fn words(&self) -> [u32; 12] {
        let mut words = [0u32; 12];
        words[0] = self.src.lo32();
        words[1] = self.src.hi17();
        words[2] = self.dst.lo32();
        words[3] = self.dst.hi17();
        words[4] = self.len;
        words
    }
}

// =============================================================================
// GENERIC ENCODER
// =============================================================================

/// Build the single generic descriptor of a task, `None` if it cannot be built
pub fn generic_descriptor(task: &Task, ctx: &EncodeCtx<'_>) -> Option<Sqe> {
    let (sqe_type, block_dim, words) = match task.payload() {
        TaskPayload::Kernel(k) if k.is_valid() => (k.core.sqe_type(), k.block_dim, k.words()),
        TaskPayload::Memcpy(m) if m.is_valid() => (SqeType::Sdma, 0, m.words()),
        TaskPayload::PlaceHolder => {
            let header = SqeHeader::new(SqeType::PlaceHolder, task.stream_id(), task.task_id());
            return Some(Sqe::new(header, ctx.config.kernel_credit, SqePayload::PlaceHolder));
        }
        other => {
            log::warn!(
                "cannot build generic descriptor, stream_id={}, task_id={}, task_type={}",
                task.stream_id(),
                task.task_id(),
                other.kind().name()
            );
            return None;
        }
    };

    let mut header = SqeHeader::new(sqe_type, task.stream_id(), task.task_id());
    header.block_dim = block_dim;
    Some(Sqe::new(
        header,
        ctx.config.kernel_credit,
        SqePayload::Generic {
            word2: 0,
            aux: 0,
            ext: 0,
            words,
        },
    ))
}

fn encode_kernel_legacy(task: &Task, _ctx: &EncodeCtx<'_>) -> LegacyEncode {
    let TaskPayload::Kernel(k) = task.payload() else {
        return LegacyEncode::Invalid;
    };
    let mut cmd = TsCommand::new(LegacyTaskType::Kernel, task.stream_id(), task.task_id());
    cmd.args[..5].copy_from_slice(&k.words()[..5]);
    cmd.args[5] = u32::from(k.block_dim);
    LegacyEncode::Command(cmd)
}

fn encode_place_holder_legacy(task: &Task, _ctx: &EncodeCtx<'_>) -> LegacyEncode {
    LegacyEncode::Command(TsCommand::new(
        LegacyTaskType::PlaceHolder,
        task.stream_id(),
        task.task_id(),
    ))
}

pub(crate) fn kernel_ops() -> TaskOpsBuilder {
    TaskOpsBuilder::new().encode_legacy(encode_kernel_legacy)
}

pub(crate) fn memcpy_ops() -> TaskOpsBuilder {
    TaskOpsBuilder::new()
}

pub(crate) fn place_holder_ops() -> TaskOpsBuilder {
    TaskOpsBuilder::new().encode_legacy(encode_place_holder_legacy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffts::HcclIndexPool;
    use crate::mock::MockDriver;
    use ember_core::{DeviceFeatures, DispatchConfig};

    #[test]
    fn test_kernel_descriptor() {
        let driver = MockDriver::new();
        let config = DispatchConfig::default();
        let pool = HcclIndexPool::new();
        let ctx = EncodeCtx {
            config: &config,
            features: DeviceFeatures::STARS,
            driver: &driver,
            hccl_pool: &pool,
        };
        let task = Task::new(
            TaskPayload::Kernel(KernelPayload {
                core: KernelCore::Aiv,
                block_dim: 8,
                pc: DevAddr::new(0x1_0000_2000),
                args: DevAddr::new(0x3000),
                args_size: 64,
            }),
            1,
            2,
            0,
            0,
            0,
        );
        let sqe = generic_descriptor(&task, &ctx).unwrap();
        assert_eq!(sqe.header.sqe_type, SqeType::Aiv);
        assert_eq!(sqe.header.block_dim, 8);
        match sqe.payload {
            SqePayload::Generic { words, .. } => {
                assert_eq!(&words[..5], &[0x2000, 0x1, 0x3000, 0, 64]);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_invalid_memcpy_has_no_descriptor() {
        let driver = MockDriver::new();
        let config = DispatchConfig::default();
        let pool = HcclIndexPool::new();
        let ctx = EncodeCtx {
            config: &config,
            features: DeviceFeatures::STARS,
            driver: &driver,
            hccl_pool: &pool,
        };
        let task = Task::new(
            TaskPayload::Memcpy(MemcpyPayload {
                src: DevAddr::null(),
                dst: DevAddr::new(0x1000),
                len: 16,
            }),
            1,
            2,
            0,
            0,
            0,
        );
        assert!(generic_descriptor(&task, &ctx).is_none());
    }
}
