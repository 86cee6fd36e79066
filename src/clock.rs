//! The `clock` module returns time values derived from the monotonic
//! system clock.
//!
//! All waiting in the runtime is expressed against [`Instant`] deadlines,
//! so wall-clock adjustments never affect timed waits.
//!
//! - [now()](fn.now.html) - Get the monotonic time
//! - [deadline()](fn.deadline.html) - Convert a relative timeout into a deadline

use std::time::{Duration, Instant};

/// A timeout long enough to never fire in practice.
///
/// Used by blocking operations that are implemented on top of their timed
/// counterparts.
pub const INFINITY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// The monotonic time.
///
/// This is the clock every timed wait of the runtime is measured against.
#[inline(always)]
pub fn now() -> Instant {
    Instant::now()
}

/// The deadline corresponding to `timeout` from now.
///
/// Saturates instead of overflowing for absurdly large timeouts (e.g.
/// [`INFINITY`]), so the result is always a valid instant in the future.
#[inline]
pub fn deadline(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + INFINITY.min(Duration::from_secs(30 * 365 * 24 * 60 * 60)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_monotonic() {
        let a = deadline(Duration::from_millis(10));
        let b = deadline(Duration::from_millis(20));
        assert!(a <= b);
    }

    #[test]
    fn deadline_saturates() {
        // must not panic
        let _ = deadline(INFINITY);
        let _ = deadline(Duration::MAX);
    }
}
