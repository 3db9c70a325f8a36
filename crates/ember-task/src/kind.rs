//! # Task Kinds
//!
//! The closed set of task kinds the dispatch core knows how to encode.

use ember_sqe::SqeType;

use crate::classify::ErrorFamily;

/// Task kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskKind {
    /// Cube or vector core kernel launch
    Kernel = 0,
    /// Device memory copy on the SDMA engine
    Memcpy = 1,
    /// Write an immediate value to device memory
    WriteValue = 2,
    /// Record a notify, locally or on a peer device
    NotifyRecord = 3,
    /// Wait on a local notify
    NotifyWait = 4,
    /// Several AICPU/DVPP sub-tasks under one task id
    Batch = 5,
    /// FFTS+ context set
    FftsPlus = 6,
    /// Collective communication unit mission
    Ccu = 7,
    /// Placeholder that only produces a completion
    PlaceHolder = 8,
}

impl TaskKind {
    /// Number of kinds
    pub const COUNT: usize = 9;

    /// All kinds in tag order
    pub const ALL: [TaskKind; Self::COUNT] = [
        Self::Kernel,
        Self::Memcpy,
        Self::WriteValue,
        Self::NotifyRecord,
        Self::NotifyWait,
        Self::Batch,
        Self::FftsPlus,
        Self::Ccu,
        Self::PlaceHolder,
    ];

    /// Table index
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Name for logs
    pub fn name(self) -> &'static str {
        match self {
            Self::Kernel => "KERNEL",
            Self::Memcpy => "MEMCPY_ASYNC",
            Self::WriteValue => "WRITE_VALUE",
            Self::NotifyRecord => "NOTIFY_RECORD",
            Self::NotifyWait => "NOTIFY_WAIT",
            Self::Batch => "MULTIPLE_TASK",
            Self::FftsPlus => "FFTS_PLUS",
            Self::Ccu => "CCU_LAUNCH",
            Self::PlaceHolder => "PLACE_HOLDER",
        }
    }

    /// Error family used to classify this kind's completions
    pub fn family(self) -> ErrorFamily {
        match self {
            Self::Kernel => ErrorFamily::AiCore,
            Self::Memcpy => ErrorFamily::Sdma,
            Self::WriteValue | Self::NotifyRecord => ErrorFamily::Common,
            Self::NotifyWait => ErrorFamily::NotifyWait,
            Self::Batch => ErrorFamily::Aicpu,
            Self::FftsPlus => ErrorFamily::FftsPlus,
            Self::Ccu => ErrorFamily::Ccu,
            Self::PlaceHolder => ErrorFamily::Control,
        }
    }

    /// Descriptor type produced by the generic single-descriptor encoder
    pub fn default_sqe_type(self) -> SqeType {
        match self {
            Self::Kernel => SqeType::Aic,
            Self::Memcpy => SqeType::Sdma,
            Self::WriteValue => SqeType::WriteValue,
            Self::NotifyRecord => SqeType::NotifyRecord,
            Self::NotifyWait => SqeType::NotifyWait,
            Self::Batch => SqeType::AicpuD,
            Self::FftsPlus => SqeType::FftsPlus,
            Self::Ccu => SqeType::Ccu,
            Self::PlaceHolder => SqeType::PlaceHolder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_table_order() {
        for (i, kind) in TaskKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
