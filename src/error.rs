//! Error handling utils.
//!
//! The runtime distinguishes between *status* outcomes and *errors*. Timed
//! and `try_*` operations report timeouts, full/empty buffers and closed
//! channels as status values (see the per-module result enums, e.g.
//! [`SendError`]); those never show up here. This module covers the rest:
//! programming errors (lock misuse, future protocol violations), resource
//! exhaustion at fiber creation, and cooperative cancellation.
//!
//! [`SendError`]: crate::fiber::channel::SendError

use std::io;

/// A specialized [`Result`] type for the crate
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////
// Error
////////////////////////////////////////////////////////////////////////////////

/// Represents all error cases for all routines of crate
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Misuse of a lock: relocking a mutex already held by the calling
    /// fiber, or unlocking a mutex the caller doesn't own.
    #[error("lock error: {0}")]
    Lock(&'static str),

    /// A resource needed to create a fiber is temporarily exhausted, e.g.
    /// the stack for a new fiber could not be allocated.
    #[error("resource temporarily unavailable: {0}")]
    ResourceUnavailable(io::Error),

    /// An argument violated a documented constraint, e.g. a bounded channel
    /// constructed with a low watermark not below the high watermark.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A pending interruption was consumed at an interruption point.
    ///
    /// This is the *requested cancellation* outcome, not a failure: another
    /// fiber called [`interrupt`] and the current fiber reached one of its
    /// interruption points. Propagate it up to the fiber function to finish
    /// cooperatively.
    ///
    /// [`interrupt`]: crate::fiber::JoinHandle::interrupt
    #[error("fiber interrupted")]
    Interrupted,

    /// Violation of the future/promise protocol.
    #[error("future error: {0}")]
    Future(#[from] FutureError),
}

const _: () = {
    /// Assert Error implements Send + Sync
    const fn if_this_compiles_the_type_implements_send_and_sync<T: Send + Sync>() {}
    if_this_compiles_the_type_implements_send_and_sync::<Error>();
};

impl Error {
    /// Returns the name of the variant as it is spelled in the source code.
    pub const fn variant_name(&self) -> &'static str {
        match self {
            Self::Lock(_) => "Lock",
            Self::ResourceUnavailable(_) => "ResourceUnavailable",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::Interrupted => "Interrupted",
            Self::Future(_) => "Future",
        }
    }

    /// `true` if this is the cancellation outcome ([`Error::Interrupted`]).
    #[inline(always)]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

////////////////////////////////////////////////////////////////////////////////
// FutureError
////////////////////////////////////////////////////////////////////////////////

/// Violations of the promise/future/packaged-task protocol.
///
/// These mirror the misuse cases of the one-shot contract between a
/// [`Promise`] and its [`Future`]: each half is usable exactly once.
///
/// [`Promise`]: crate::fiber::future::Promise
/// [`Future`]: crate::fiber::future::Future
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FutureError {
    /// Operation on a future or promise that no longer references a shared
    /// state (already consumed or moved out).
    #[error("no associated state")]
    NoState,

    /// `future()` was called a second time on the same promise.
    #[error("future already retrieved")]
    FutureAlreadyRetrieved,

    /// A value or error was already stored in the shared state.
    #[error("promise already satisfied")]
    PromiseAlreadySatisfied,

    /// The promise was dropped without storing a value or an error.
    #[error("broken promise")]
    BrokenPromise,

    /// A packaged task was invoked a second time.
    #[error("task already executed")]
    TaskAlreadyExecuted,
}

impl From<io::Error> for Error {
    #[inline(always)]
    fn from(error: io::Error) -> Self {
        Self::ResourceUnavailable(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_names() {
        assert_eq!(Error::Interrupted.variant_name(), "Interrupted");
        assert_eq!(Error::Lock("relock").variant_name(), "Lock");
        assert_eq!(
            Error::from(FutureError::BrokenPromise).variant_name(),
            "Future"
        );
    }

    #[test]
    fn display() {
        assert_eq!(Error::Interrupted.to_string(), "fiber interrupted");
        assert_eq!(
            Error::from(FutureError::NoState).to_string(),
            "future error: no associated state"
        );
        assert_eq!(
            Error::InvalidArgument("watermarks").to_string(),
            "invalid argument: watermarks"
        );
    }
}
