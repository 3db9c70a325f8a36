//! # Ember SQE
//!
//! Wire formats exchanged with the accelerator's task scheduler.
//!
//! ## Layout
//!
//! ```text
//! ┌────────────────────────── SQE (64 bytes) ───────────────────────────┐
//! │ 0      1      2..3       4..5          6..7     8..11   12..13  14 15 │
//! │ type   flags  block_dim  rt_stream_id  task_id  word2   aux  credit ext│
//! │ 16..63  words 4-15: type specific payload                            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ┌──────────────────── Completion report (16 bytes) ────────────────────┐
//! │ stream u16 │ task u16 │ error_code u32 │ err_type u8 │ sqe_type u8    │
//! │ sq_id u16 │ sq_head u16 │ flags u8 │ reserved u8                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every record is encoded and decoded field by field in little-endian
//! order. Nothing here depends on the host's struct layout.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(test)]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod codec;
pub mod header;
pub mod legacy;
pub mod report;
pub mod sqe;

pub use header::{SqeFlags, SqeHeader, SqeType};
pub use legacy::{LegacyTaskType, TsCommand};
pub use report::{CompletionReport, ErrorTypeBits};
pub use sqe::{
    AicpuSqe, CcuSqe, DumpInfoSqe, DvppSqe, FftsPlusSqe, NotifySqe, Sqe, SqePayload,
    WriteValueSqe,
};

pub use ember_core::driver::{REPORT_SIZE, SQE_SIZE};

static_assertions::const_assert_eq!(SQE_SIZE, 64);
static_assertions::const_assert_eq!(REPORT_SIZE, 16);
