//! # Ember Error Handling
//!
//! Framework-level error types for the dispatch core.
//!
//! These errors describe failures of the framework itself: bad parameters,
//! queue exhaustion, routing misses, driver result codes. Faults reported by
//! the hardware are not errors in this sense; they travel on the task as a
//! [`RuntimeErrorCode`](crate::RuntimeErrorCode).

use core::fmt;

use crate::types::{StreamId, TaskId};

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Ember Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Ember unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Invalid parameter provided
    InvalidParameter,
    /// Operation is not valid in the current state
    InvalidState,
    /// Resource is busy (for example a task id still in flight)
    Busy,
    /// Operation not supported by this device
    NotSupported,

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// Transient exhaustion; the caller may retry
    TryAgain,
    /// Submit queue has no room for the requested run of slots
    QueueFull,

    // =========================================================================
    // Memory Errors
    // =========================================================================
    /// Device address is null or out of range
    InvalidDeviceAddress,

    // =========================================================================
    // Routing Errors
    // =========================================================================
    /// No in-flight task matches the (stream id, task id) pair
    UnknownTask {
        /// Stream id from the report
        stream_id: StreamId,
        /// Task id from the report
        task_id: TaskId,
    },
    /// No stream context for the id
    UnknownStream(StreamId),
    /// More completions arrived than descriptors were placed
    CompletionOverflow,

    // =========================================================================
    // Sub-errors
    // =========================================================================
    /// Wire format decode failure
    Descriptor(DescriptorError),
    /// Driver returned a non-success result
    Driver(DriverError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Generic
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::Busy => write!(f, "resource busy"),
            Self::NotSupported => write!(f, "operation not supported"),

            // Queue
            Self::TryAgain => write!(f, "resource temporarily unavailable, try again"),
            Self::QueueFull => write!(f, "submit queue full"),

            // Memory
            Self::InvalidDeviceAddress => write!(f, "invalid device address"),

            // Routing
            Self::UnknownTask { stream_id, task_id } => {
                write!(f, "unknown task, stream_id={}, task_id={}", stream_id, task_id)
            }
            Self::UnknownStream(id) => write!(f, "unknown stream, stream_id={}", id),
            Self::CompletionOverflow => write!(f, "completion count exceeds descriptors placed"),

            // Sub-errors
            Self::Descriptor(e) => write!(f, "descriptor error: {:?}", e),
            Self::Driver(e) => write!(f, "driver error: {:?}", e),
        }
    }
}

// =============================================================================
// SUB-ERROR TYPES
// =============================================================================

/// Wire format decode errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorError {
    /// Type byte does not name a known descriptor type
    UnknownType(u8),
    /// Input shorter than the fixed record size
    Truncated,
    /// A field holds a value outside its encoding range
    InvalidField(&'static str),
}

/// Driver result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// Driver resources exhausted (queues, ids)
    ResourceExhausted,
    /// Device memory access failed
    MemoryAccess,
    /// Queried feature is not supported by this driver
    FeatureNotSupported,
    /// Any other non-success code
    Code(u32),
}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

impl From<DescriptorError> for Error {
    fn from(e: DescriptorError) -> Self {
        Error::Descriptor(e)
    }
}

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        Error::Driver(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display_routing_error() {
        let err = Error::UnknownTask {
            stream_id: 3,
            task_id: 17,
        };
        assert_eq!(err.to_string(), "unknown task, stream_id=3, task_id=17");
    }

    #[test]
    fn test_sub_error_conversion() {
        let err: Error = DriverError::Code(0x7).into();
        assert_eq!(err, Error::Driver(DriverError::Code(0x7)));

        let err: Error = DescriptorError::UnknownType(42).into();
        assert!(matches!(err, Error::Descriptor(DescriptorError::UnknownType(42))));
    }
}
