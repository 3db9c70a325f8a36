//! # Ember Task
//!
//! The task-type dispatch framework: a registry of per-kind operation slots
//! and the engine that drives tasks from encode to release.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             TaskEngine                              │
//! │   create ─► encode ─► submit ─► on_completion_report ─► release     │
//! └──────┬──────────────────────────────────────┬───────────────────────┘
//!        │ registry.ops(kind)                   │ DriverFacade
//!        ▼                                      ▼
//! ┌──────────────────────────────┐   ┌─────────────────────────────────┐
//! │           Registry           │   │   queues, device memory,        │
//! │  encode_legacy  encode_sqe   │   │   fault events, symbol lookup   │
//! │  decode         finalize     │   └─────────────────────────────────┘
//! │  release        describe     │
//! └──────┬───────────────────────┘
//!        │
//!   ┌────┴────┬──────────┬───────────┬──────────┬──────────┐
//!   ▼         ▼          ▼           ▼          ▼          ▼
//! generic   notify     batch       ffts        ccu      classify
//! ```
//!
//! Kinds plug in by filling slots; anything a kind leaves unset takes the
//! default when [`build_registry`] runs. The registry is immutable
//! afterwards and shared by reference.

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

pub mod batch;
pub mod ccu;
pub mod classify;
pub mod engine;
pub mod ffts;
pub mod generic;
pub mod kind;
pub mod notify;
pub mod registry;
pub mod task;

#[cfg(test)]
mod mock;

pub use batch::{AicpuEntry, BatchEntry, BatchPayload, BatchSubState, DvppEngine, DvppEntry, DvppFlags};
pub use ccu::CcuPayload;
pub use classify::{classify, ErrorFamily};
pub use engine::TaskEngine;
pub use ffts::{
    ContextErrorType, ContextFault, ContextFaultSummary, DumpMode, FftsPlusPayload, FftsSubType,
    HcclIndexPool, IdPacking,
};
pub use generic::{KernelCore, KernelPayload, MemcpyPayload};
pub use kind::TaskKind;
pub use notify::{Notify, NotifyRecordPayload, NotifyWaitPayload, WriteValuePayload};
pub use registry::{
    build_registry, LegacyEncode, Registry, RegistryBuilder, TaskOps, TaskOpsBuilder,
};
pub use task::{Outcome, Task, TaskIdAllocator, TaskPayload, TaskState};
