//! # Ember Core
//!
//! Foundational types shared by every layer of the Ember task dispatch core.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          ember-core                              │
//! │  ┌────────────┐  ┌────────────┐  ┌──────────────┐  ┌──────────┐  │
//! │  │   Error    │  │   Types    │  │ RuntimeError │  │  Config  │  │
//! │  │  Handling  │  │ (DevAddr,  │  │    Codes     │  │ Features │  │
//! │  │            │  │  TaskIds)  │  │              │  │  Events  │  │
//! │  └────────────┘  └────────────┘  └──────────────┘  └──────────┘  │
//! │  ┌──────────────────────────┐  ┌──────────────────────────────┐  │
//! │  │      DriverFacade        │  │        FaultNotifier         │  │
//! │  │ (queues, memory, lookup) │  │   (exception callback ABI)   │  │
//! │  └──────────────────────────┘  └──────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in this crate touches hardware directly. The driver surface is
//! the [`DriverFacade`] trait, implemented by the platform layer.

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

pub mod code;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod fault;
pub mod types;

// Re-exports for convenience
pub use code::RuntimeErrorCode;
pub use config::{DeviceFeatures, DispatchConfig};
pub use driver::{ArgHandle, DriverFacade, QueuePair, RawReport, RawSqe, SlotRun};
pub use error::{DescriptorError, DriverError, Error, Result};
pub use events::{FaultEvent, HardwareEventSnapshot};
pub use fault::{ExceptionInfo, ExpandInfo, FaultNotifier, CONTEXT_ID_NONE};
pub use types::*;
