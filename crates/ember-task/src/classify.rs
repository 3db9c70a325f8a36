//! # Error Recovery Classifier
//!
//! Maps the raw error bits and code of a completion report to a runtime
//! error code.
//!
//! ```text
//!   error_type == 0 ─────────────────────────────► SUCCESS
//!   lowest set bit ──► family map slot
//!        │ trap / timeout / sqe error ───────────► mapped code
//!        │ exception / verbatim
//!        └─► memory-class raw code? ──yes──► RAS + UCE look-up
//!                                   └─no───► mapped code
//! ```
//!
//! The classifier is a pure function of its inputs. Block lists and RAS
//! filters are static tables.

use ember_core::{DeviceFeatures, HardwareEventSnapshot, RuntimeErrorCode};
use ember_sqe::ErrorTypeBits;

// =============================================================================
// FAMILIES
// =============================================================================

/// Number of slots in a family map (error type bits 0..5)
pub const SLOT_COUNT: usize = 6;

/// Task family with its own error map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorFamily {
    /// Default map
    Common,
    /// Vector and cube cores
    AiCore,
    /// AICPU kernels
    Aicpu,
    /// SDMA copies
    Sdma,
    /// FFTS+ context sets
    FftsPlus,
    /// Control tasks; a non-zero raw code is always reported verbatim
    Control,
    /// Notify wait
    NotifyWait,
    /// CCU missions
    Ccu,
}

/// One slot of a family map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Fixed runtime code
    Code(RuntimeErrorCode),
    /// The raw error code from the report
    Verbatim,
}

/// Ordered map from error type bit to runtime code
pub type FamilyMap = [Slot; SLOT_COUNT];

const fn code(c: RuntimeErrorCode) -> Slot {
    Slot::Code(c)
}

static COMMON_MAP: FamilyMap = [
    code(RuntimeErrorCode::TASK_EXCEPTION),
    code(RuntimeErrorCode::TASK_TRAP),
    code(RuntimeErrorCode::TASK_TIMEOUT),
    code(RuntimeErrorCode::TASK_SQE_ERROR),
    code(RuntimeErrorCode::TASK_EXCEPTION),
    Slot::Verbatim,
];

static AICORE_MAP: FamilyMap = [
    code(RuntimeErrorCode::AICORE_EXCEPTION),
    code(RuntimeErrorCode::AICORE_TRAP),
    code(RuntimeErrorCode::AICORE_TIMEOUT),
    code(RuntimeErrorCode::TASK_SQE_ERROR),
    code(RuntimeErrorCode::AICORE_EXCEPTION),
    Slot::Verbatim,
];

static AICPU_MAP: FamilyMap = [
    code(RuntimeErrorCode::AICPU_EXCEPTION),
    code(RuntimeErrorCode::TASK_TRAP),
    code(RuntimeErrorCode::AICPU_TIMEOUT),
    code(RuntimeErrorCode::TASK_SQE_ERROR),
    code(RuntimeErrorCode::AICPU_EXCEPTION),
    Slot::Verbatim,
];

static SDMA_MAP: FamilyMap = [
    code(RuntimeErrorCode::SDMA_ERROR),
    code(RuntimeErrorCode::TASK_TRAP),
    code(RuntimeErrorCode::SDMA_TIMEOUT),
    code(RuntimeErrorCode::TASK_SQE_ERROR),
    code(RuntimeErrorCode::SDMA_ERROR),
    Slot::Verbatim,
];

static FFTSPLUS_MAP: FamilyMap = [
    code(RuntimeErrorCode::FFTSPLUS_EXCEPTION),
    code(RuntimeErrorCode::FFTSPLUS_TRAP),
    code(RuntimeErrorCode::FFTSPLUS_TIMEOUT),
    code(RuntimeErrorCode::TASK_SQE_ERROR),
    code(RuntimeErrorCode::FFTSPLUS_EXCEPTION),
    Slot::Verbatim,
];

static CONTROL_MAP: FamilyMap = [
    code(RuntimeErrorCode::TASK_EXCEPTION),
    code(RuntimeErrorCode::TASK_BUS_ERROR),
    code(RuntimeErrorCode::TASK_TIMEOUT),
    code(RuntimeErrorCode::TASK_SQE_ERROR),
    code(RuntimeErrorCode::TASK_RES_CONFLICT),
    code(RuntimeErrorCode::TASK_SW_STATUS),
];

impl ErrorFamily {
    /// Error map of this family
    pub fn map(self) -> &'static FamilyMap {
        match self {
            Self::Common | Self::NotifyWait | Self::Ccu => &COMMON_MAP,
            Self::AiCore => &AICORE_MAP,
            Self::Aicpu => &AICPU_MAP,
            Self::Sdma => &SDMA_MAP,
            Self::FftsPlus => &FFTSPLUS_MAP,
            Self::Control => &CONTROL_MAP,
        }
    }
}

// =============================================================================
// STATIC TABLES
// =============================================================================

/// SDMA completion status: DDRC error
pub const SDMA_STATUS_DDRC_ERROR: u32 = 0x8;
/// SDMA completion status: link error
pub const SDMA_STATUS_LINK_ERROR: u32 = 0x9;
/// SDMA completion status: poisoned read
pub const SDMA_STATUS_POISON_ERROR: u32 = 0xA;

/// CCU status that selects the local memory rule (with sub-status 0)
pub const CCU_STATUS_LOCAL_MEM: u8 = 0x02;
/// CCU status that selects the remote memory rule
pub const CCU_STATUS_REMOTE_MEM: u8 = 0x03;

/// Multi-bit ECC events counted as UCEs for SDMA faults
pub static DEFAULT_UCE_EVENTS: [u32; 15] = [
    0x80CD_8008, 0x80F2_180D, 0x80F3_8008, 0x8133_8002, 0x8133_8004, 0x813B_8002, 0x813B_8004,
    0x815F_8002, 0x815F_8004, 0x8197_8002, 0x8197_8004, 0x81B5_8002, 0x81B5_8004, 0x81AF_8008,
    0x81B1_8008,
];

/// Events counted as UCEs in local device memory
pub static LOCAL_UCE_EVENTS: [u32; 18] = [
    0x80CD_8008, 0x80F2_180D, 0x80F3_8008, 0x8133_8002, 0x8133_8004, 0x813B_8002, 0x813B_8004,
    0x8147_8002, 0x8147_8004, 0x815F_8002, 0x815F_8004, 0x8197_8002, 0x8197_8004, 0x81B5_8002,
    0x81B5_8004, 0x813D_8009, 0x81AF_8008, 0x81B1_8008,
];

/// Events counted as UCEs in remote device memory
pub static REMOTE_UCE_EVENTS: [u32; 22] = [
    0x80CD_8008, 0x80F2_180D, 0x80F3_8008, 0x8133_8002, 0x8133_8004, 0x813B_8002, 0x813B_8004,
    0x8147_8002, 0x8147_8004, 0x815F_8002, 0x815F_8004, 0x8197_8002, 0x8197_8004, 0x81B5_8002,
    0x81B5_8004, 0x813D_8009, 0x81B7_8009, 0x81AF_8000, 0x81AF_8004, 0x81AF_8008, 0x81B1_8008,
    0x81B1_800D,
];

/// RAS filter over a fault event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasFilter {
    /// Event id
    pub event_id: u32,
    /// Sub-module id
    pub sub_module_id: u8,
    /// Error register index
    pub error_register_index: u8,
    /// Bits of the RAS code that identify the fault
    pub mask: u32,
}

impl RasFilter {
    const fn new(sub_module_id: u8, error_register_index: u8, mask: u32) -> Self {
        Self {
            event_id: 0x81AF_8009,
            sub_module_id,
            error_register_index,
            mask,
        }
    }
}

/// UB faults that are not memory poison
pub static UB_NON_MEM_POISON_RAS: [RasFilter; 11] = [
    RasFilter::new(3, 2, 0x1000_0000),
    RasFilter::new(3, 3, 0x4000_0000),
    RasFilter::new(3, 3, 0x2000_0000),
    RasFilter::new(3, 3, 0x0400_0000),
    RasFilter::new(3, 3, 0x0200_0000),
    RasFilter::new(3, 3, 0x0100_0000),
    RasFilter::new(3, 3, 0x0002_0000),
    RasFilter::new(3, 3, 0x0000_8000),
    RasFilter::new(3, 3, 0x0000_2000),
    RasFilter::new(3, 3, 0x0000_0800),
    RasFilter::new(3, 3, 0x0000_0200),
];

// =============================================================================
// EVENT QUERIES
// =============================================================================

/// Check the snapshot for an uncorrectable memory error
///
/// Counts only when the device reports fault events. SMMU faults count
/// unless tasks are allocated from a stream pool.
pub fn has_mem_uce(
    features: DeviceFeatures,
    events: &HardwareEventSnapshot,
    block_list: &[u32],
) -> bool {
    if !features.contains(DeviceFeatures::FAULT_EVENT_QUERY) {
        return false;
    }
    if events.hits_any(block_list) {
        return true;
    }
    events.smmu_fault && !features.contains(DeviceFeatures::STREAM_POOL_ALLOC)
}

/// Check the snapshot for a UB fault that is not memory poison
pub fn matches_ub_non_mem_poison(events: &HardwareEventSnapshot) -> bool {
    events.events.iter().any(|event| {
        UB_NON_MEM_POISON_RAS.iter().any(|f| {
            f.event_id == event.event_id
                && f.sub_module_id == event.sub_module_id
                && f.error_register_index == event.error_register_index
                && f.mask & event.ras_code_value() != 0
        })
    })
}

/// Split a CCU error code into (status, sub-status)
#[inline]
pub fn ccu_status(error_code: u32) -> (u8, u8) {
    ((error_code >> 8) as u8, error_code as u8)
}

fn is_sdma_mte(error_code: u32) -> bool {
    matches!(
        error_code,
        SDMA_STATUS_DDRC_ERROR | SDMA_STATUS_LINK_ERROR | SDMA_STATUS_POISON_ERROR
    ) || error_code == RuntimeErrorCode::RAW_HCCL_SDMA_LINK_FAILED.raw()
}

fn sdma_rule(features: DeviceFeatures, events: &HardwareEventSnapshot) -> RuntimeErrorCode {
    if events.ras_alarm {
        RuntimeErrorCode::SDMA_POISON_ERROR
    } else if !has_mem_uce(features, events, &DEFAULT_UCE_EVENTS) {
        RuntimeErrorCode::SDMA_LINK_ERROR
    } else {
        RuntimeErrorCode::SDMA_ERROR
    }
}

fn local_mem_rule(
    features: DeviceFeatures,
    events: &HardwareEventSnapshot,
) -> Option<RuntimeErrorCode> {
    let hit = events.ras_alarm
        && matches_ub_non_mem_poison(events)
        && !has_mem_uce(features, events, &LOCAL_UCE_EVENTS);
    hit.then_some(RuntimeErrorCode::LOCAL_MEM_ERROR)
}

fn remote_mem_rule(
    features: DeviceFeatures,
    events: &HardwareEventSnapshot,
) -> Option<RuntimeErrorCode> {
    let hit = !events.ras_alarm && !has_mem_uce(features, events, &REMOTE_UCE_EVENTS);
    hit.then_some(RuntimeErrorCode::REMOTE_MEM_ERROR)
}

// =============================================================================
// CLASSIFY
// =============================================================================

/// Classify one completion
pub fn classify(
    family: ErrorFamily,
    error_type: ErrorTypeBits,
    error_code: u32,
    features: DeviceFeatures,
    events: &HardwareEventSnapshot,
) -> RuntimeErrorCode {
    let Some(index) = error_type.lowest_index() else {
        return RuntimeErrorCode::SUCCESS;
    };
    // Reserved bits 6 and 7 take the exception slot
    let index = if (index as usize) < SLOT_COUNT {
        index as usize
    } else {
        0
    };

    let raw = RuntimeErrorCode::new(error_code);
    if family == ErrorFamily::Control && !raw.is_success() {
        return raw;
    }

    let mapped = match family.map()[index] {
        Slot::Code(c) => c,
        Slot::Verbatim if raw.is_success() => RuntimeErrorCode::TASK_EXCEPTION,
        Slot::Verbatim => raw,
    };

    // trap, timeout and sqe error never reach the memory look-up
    if matches!(index, 1..=3) {
        return mapped;
    }

    let fallback = match family {
        ErrorFamily::Sdma if is_sdma_mte(error_code) => Some(sdma_rule(features, events)),
        ErrorFamily::NotifyWait if is_sdma_mte(error_code) => Some(sdma_rule(features, events)),
        ErrorFamily::NotifyWait => match raw {
            RuntimeErrorCode::RAW_HCCL_OP_RETRY_FAILED => {
                Some(RuntimeErrorCode::AICPU_HCCL_OP_RETRY_FAILED)
            }
            RuntimeErrorCode::RAW_HCCL_OP_UB_DDRC_FAILED => local_mem_rule(features, events),
            RuntimeErrorCode::RAW_HCCL_OP_UB_POISON_FAILED => remote_mem_rule(features, events),
            _ => None,
        },
        ErrorFamily::Ccu => match ccu_status(error_code) {
            (CCU_STATUS_LOCAL_MEM, 0x00) => local_mem_rule(features, events),
            (CCU_STATUS_REMOTE_MEM, _) => remote_mem_rule(features, events),
            _ => None,
        },
        _ => None,
    };

    fallback.unwrap_or(mapped)
}
