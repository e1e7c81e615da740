// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Status codes returned by channel operations
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: Status, Result
//! INVARIANTS: Every failure is reported synchronously; no variant is silently dropped

/// Result type returned by channel operations.
pub type Result<T> = core::result::Result<T, Status>;

/// Failure codes produced by the channel core and its syscall surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Status {
    /// The caller does not own the endpoint (handle raced with a transfer).
    #[error("handle is not owned by the calling process")]
    BadHandle,
    /// The opposite endpoint has no open handles left.
    #[error("peer endpoint closed")]
    PeerClosed,
    /// A non-blocking operation could not make progress.
    #[error("operation should wait")]
    ShouldWait,
    /// The front message does not fit the caller's capacity.
    #[error("buffer too small: message needs {bytes} bytes and {handles} handles")]
    BufferTooSmall {
        /// Payload size of the message that did not fit.
        bytes: usize,
        /// Handle count of the message that did not fit.
        handles: usize,
    },
    /// Kernel object arena exhausted while creating a channel pair.
    #[error("out of kernel object memory")]
    NoMemory,
    /// The calling thread already has a call in flight.
    #[error("waiter already armed")]
    BadState,
    /// A call deadline elapsed before a reply arrived.
    #[error("call timed out")]
    TimedOut,
    /// The local endpoint closed while a call was waiting.
    #[error("call canceled")]
    Canceled,
    /// The wait was interrupted; re-enter the wait without resending.
    #[error("wait interrupted, retry")]
    InternalRetry,
    /// The handle lacks a right required by the operation.
    #[error("access denied")]
    AccessDenied,
    /// The handle does not refer to a channel endpoint.
    #[error("wrong object type")]
    WrongType,
    /// The operation is not supported for these arguments.
    #[error("not supported")]
    NotSupported,
    /// A payload or handle list exceeds the message limits.
    #[error("argument out of range")]
    OutOfRange,
}

impl Status {
    /// Returns `true` when the same logical operation may be attempted again.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::ShouldWait | Self::TimedOut | Self::InternalRetry)
    }
}
