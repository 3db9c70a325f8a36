//! # Runtime Error Codes
//!
//! The scalar result a caller observes for a task. Zero means success. Codes
//! produced by the classifier come from the constants below; codes copied
//! verbatim from a completion report may be any value.

use core::fmt;

/// Runtime-level task result code
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct RuntimeErrorCode(u32);

impl RuntimeErrorCode {
    /// Success
    pub const SUCCESS: Self = Self(0);

    // =========================================================================
    // Generic task faults
    // =========================================================================
    /// Task raised an exception
    pub const TASK_EXCEPTION: Self = Self(0x0107);
    /// Task hit a trap
    pub const TASK_TRAP: Self = Self(0x0108);
    /// Task timed out
    pub const TASK_TIMEOUT: Self = Self(0x0109);
    /// Hardware rejected the descriptor
    pub const TASK_SQE_ERROR: Self = Self(0x010A);
    /// Bus error while executing the task
    pub const TASK_BUS_ERROR: Self = Self(0x010B);
    /// Resource conflict between concurrent tasks
    pub const TASK_RES_CONFLICT: Self = Self(0x010C);
    /// Software status error reported by firmware
    pub const TASK_SW_STATUS: Self = Self(0x010D);

    // =========================================================================
    // Family specific faults
    // =========================================================================
    /// Vector core exception
    pub const AICORE_EXCEPTION: Self = Self(0x0201);
    /// Vector core trap
    pub const AICORE_TRAP: Self = Self(0x0202);
    /// Vector core timeout
    pub const AICORE_TIMEOUT: Self = Self(0x0203);
    /// Vector core memory transfer engine error
    pub const AICORE_MTE_ERROR: Self = Self(0x0204);
    /// AICPU kernel exception
    pub const AICPU_EXCEPTION: Self = Self(0x0301);
    /// AICPU kernel timeout
    pub const AICPU_TIMEOUT: Self = Self(0x0302);
    /// HCCL operation retry failed on AICPU
    pub const AICPU_HCCL_OP_RETRY_FAILED: Self = Self(0x0303);
    /// SDMA copy failed
    pub const SDMA_ERROR: Self = Self(0x0401);
    /// SDMA copy timed out
    pub const SDMA_TIMEOUT: Self = Self(0x0402);
    /// SDMA link error
    pub const SDMA_LINK_ERROR: Self = Self(0x0403);
    /// SDMA read poisoned data
    pub const SDMA_POISON_ERROR: Self = Self(0x0404);
    /// FFTS+ context exception
    pub const FFTSPLUS_EXCEPTION: Self = Self(0x0501);
    /// FFTS+ context trap
    pub const FFTSPLUS_TRAP: Self = Self(0x0502);
    /// FFTS+ context timeout
    pub const FFTSPLUS_TIMEOUT: Self = Self(0x0503);

    // =========================================================================
    // Memory faults
    // =========================================================================
    /// Uncorrectable error in local device memory
    pub const LOCAL_MEM_ERROR: Self = Self(0x0601);
    /// Uncorrectable error in remote device memory
    pub const REMOTE_MEM_ERROR: Self = Self(0x0602);

    // =========================================================================
    // Benign completions
    // =========================================================================
    /// Data stream reached its end
    pub const END_OF_SEQUENCE: Self = Self(0x0701);
    /// Model aborted on request
    pub const MODEL_ABORT_NORMAL: Self = Self(0x0702);

    // =========================================================================
    // Raw firmware codes seen in verbatim error code fields
    // =========================================================================
    /// HCCL retry exhausted (raw AICPU code)
    pub const RAW_HCCL_OP_RETRY_FAILED: Self = Self(0x2_1001);
    /// HCCL operation hit a UB DDRC fault (raw AICPU code)
    pub const RAW_HCCL_OP_UB_DDRC_FAILED: Self = Self(0x2_1002);
    /// HCCL operation read UB poison (raw AICPU code)
    pub const RAW_HCCL_OP_UB_POISON_FAILED: Self = Self(0x2_1003);
    /// HCCL SDMA link fault (raw AICPU code)
    pub const RAW_HCCL_SDMA_LINK_FAILED: Self = Self(0x2_1004);

    /// Wrap a raw code
    #[inline]
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    /// Raw value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Check for success
    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Normal termination codes that are reported as warnings, not faults
    pub fn is_benign(self) -> bool {
        self == Self::END_OF_SEQUENCE || self == Self::MODEL_ABORT_NORMAL
    }

    /// Memory-fault codes that override the hardware-reported code of a task
    pub fn is_mte_class(self) -> bool {
        matches!(
            self,
            Self::AICORE_MTE_ERROR | Self::SDMA_LINK_ERROR | Self::SDMA_POISON_ERROR
        )
    }

    /// Human readable description
    pub fn description(self) -> &'static str {
        match self {
            Self::SUCCESS => "success",
            Self::TASK_EXCEPTION => "task exception",
            Self::TASK_TRAP => "task trap",
            Self::TASK_TIMEOUT => "task timeout",
            Self::TASK_SQE_ERROR => "sqe error",
            Self::TASK_BUS_ERROR => "bus error",
            Self::TASK_RES_CONFLICT => "resource conflict error",
            Self::TASK_SW_STATUS => "sq sw status error",
            Self::AICORE_EXCEPTION => "aicore exception",
            Self::AICORE_TRAP => "aicore trap exception",
            Self::AICORE_TIMEOUT => "aicore timeout",
            Self::AICORE_MTE_ERROR => "aicore mte error",
            Self::AICPU_EXCEPTION => "aicpu exception",
            Self::AICPU_TIMEOUT => "aicpu timeout",
            Self::AICPU_HCCL_OP_RETRY_FAILED => "hccl op retry failed",
            Self::SDMA_ERROR => "sdma error",
            Self::SDMA_TIMEOUT => "sdma timeout",
            Self::SDMA_LINK_ERROR => "sdma link error",
            Self::SDMA_POISON_ERROR => "sdma poison error",
            Self::FFTSPLUS_EXCEPTION => "fftsplus task exception",
            Self::FFTSPLUS_TRAP => "fftsplus task trap",
            Self::FFTSPLUS_TIMEOUT => "fftsplus task timeout",
            Self::LOCAL_MEM_ERROR => "local memory uce",
            Self::REMOTE_MEM_ERROR => "remote memory uce",
            Self::END_OF_SEQUENCE => "end of sequence",
            Self::MODEL_ABORT_NORMAL => "model abort normal",
            _ => "undefined error code",
        }
    }
}

impl From<u32> for RuntimeErrorCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl fmt::Debug for RuntimeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeErrorCode({:#x})", self.0)
    }
}

impl fmt::Display for RuntimeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} [{}]", self.0, self.description())
    }
}
