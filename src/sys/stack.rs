//! Fiber stack sizing policy.
//!
//! Stacks themselves are owned by the execution-context backend; this
//! module only validates and carries the requested size. The minimum is
//! deliberately conservative: a fiber that formats a log line through the
//! `log` facade already needs a few pages.

use crate::error::{Error, Result};

/// Smallest stack the runtime will create a fiber with.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Stack size used when the fiber builder doesn't request one.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// A validated fiber stack size request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSize(usize);

impl StackSize {
    /// Validates `bytes` as a fiber stack size.
    ///
    /// Fails with [`Error::InvalidArgument`] if `bytes` is below
    /// [`MIN_STACK_SIZE`].
    pub fn new(bytes: usize) -> Result<Self> {
        if bytes < MIN_STACK_SIZE {
            return Err(Error::InvalidArgument("stack size below minimum"));
        }
        Ok(Self(bytes))
    }

    #[inline(always)]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for StackSize {
    fn default() -> Self {
        Self(DEFAULT_STACK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation() {
        assert!(StackSize::new(0).is_err());
        assert!(StackSize::new(MIN_STACK_SIZE - 1).is_err());
        assert_eq!(StackSize::new(MIN_STACK_SIZE).unwrap().get(), MIN_STACK_SIZE);
        assert_eq!(StackSize::default().get(), DEFAULT_STACK_SIZE);
    }
}
