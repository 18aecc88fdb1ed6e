//! # Kernel Errors
//!
//! Every fallible kernel operation returns [`Result`]. Nothing is retried
//! automatically; the caller decides.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    /// Zero or too-small size, out-of-range id, invalidated object.
    #[error("invalid parameter")]
    Parameter,

    /// Task table, timer table or stack arena is full.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// Unlock attempted by a task that does not own the mutex.
    #[error("mutex is not owned by the calling task")]
    OwnershipViolation,

    /// Non-blocking lock attempt on a mutex held elsewhere.
    #[error("mutex is held")]
    Busy,

    /// The periodic hardware tick source could not be programmed.
    #[error("tick source could not be programmed")]
    HardwareInit,

    #[error("operation not supported")]
    Unsupported,
}

pub type Result<T> = core::result::Result<T, KernelError>;
