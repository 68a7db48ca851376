// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
//! Error types for initiation-time failures.

use thiserror::Error;

/// Result type alias that all compose public API functions can use.
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Composite error type for failures this crate can report to the initiator.
///
/// Contract violations (resuming a completed operation, releasing a work
/// guard twice, performing a direct upcall outside of a continuation) are
/// *not* represented here: they are programming errors and surface as
/// panics, since recovering from them would risk acting on dangling state.
#[derive(Error, Debug)]
pub enum ComposeError {
    /// The allocator associated with the completion handler could not
    /// provide storage for an address-stable operation body. Reported
    /// synchronously at initiation time, before any asynchronous work
    /// has started.
    #[error("failed to allocate {size} bytes of stable storage for an operation body")]
    AllocationFailed {
        /// Size of the requested block, in bytes.
        size: usize,
    },
}
