//! Millisecond busy-wait counters.
//!
//! Drivers never read a clock. They count how many fixed delays they have spent waiting and
//! give up once the count passes a limit, the way the firmware they run in counts loop
//! iterations.

use embedded_hal::delay::DelayNs;

/// A busy-wait budget measured in milliseconds.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Timeout {
    limit_ms: u32,
    elapsed_ms: u32,
}

impl Timeout {
    /// Creates a budget of `limit_ms` milliseconds.
    #[must_use]
    pub const fn from_millis(limit_ms: u32) -> Self {
        Self {
            limit_ms,
            elapsed_ms: 0,
        }
    }

    /// Returns `true` once the budget is spent.
    #[must_use]
    pub const fn expired(&self) -> bool {
        self.elapsed_ms >= self.limit_ms
    }

    /// Returns the milliseconds spent so far.
    #[must_use]
    pub const fn elapsed_ms(&self) -> u32 {
        self.elapsed_ms
    }

    /// Returns the configured budget.
    #[must_use]
    pub const fn limit_ms(&self) -> u32 {
        self.limit_ms
    }

    /// Spends `step_ms` milliseconds of the budget, blocking on `delay`.
    pub fn tick<D: DelayNs>(&mut self, delay: &mut D, step_ms: u32) {
        delay.delay_ms(step_ms);
        self.elapsed_ms = self.elapsed_ms.saturating_add(step_ms);
    }

    /// Restarts the budget.
    pub const fn reset(&mut self) {
        self.elapsed_ms = 0;
    }
}

/// Repeats `poll` every `step_ms` milliseconds until it yields a value or `timeout_ms` passes.
///
/// `poll` is always run at least once. Returns `Ok(None)` on timeout.
///
/// # Errors
///
/// Returns the first error produced by `poll`.
pub fn poll_until<T, E, D, F>(
    delay: &mut D,
    timeout_ms: u32,
    step_ms: u32,
    mut poll: F,
) -> Result<Option<T>, E>
where
    D: DelayNs,
    F: FnMut() -> Result<Option<T>, E>,
{
    let mut timeout = Timeout::from_millis(timeout_ms);
    loop {
        if let Some(value) = poll()? {
            return Ok(Some(value));
        }
        if timeout.expired() {
            return Ok(None);
        }
        timeout.tick(delay, step_ms);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::MockDelay;

    #[test]
    fn timeout_expires_after_limit() {
        let mut delay = MockDelay::new();
        let mut timeout = Timeout::from_millis(3);

        assert!(!timeout.expired());
        timeout.tick(&mut delay, 1);
        timeout.tick(&mut delay, 1);
        assert!(!timeout.expired());
        timeout.tick(&mut delay, 1);
        assert!(timeout.expired());
        assert_eq!(delay.elapsed_ms(), 3);

        timeout.reset();
        assert_eq!(timeout.elapsed_ms(), 0);
    }

    #[test]
    fn poll_until_gives_up() {
        let mut delay = MockDelay::new();
        let mut polls = 0;
        let result: Result<Option<()>, ()> = poll_until(&mut delay, 10, 1, || {
            polls += 1;
            Ok(None)
        });

        assert_eq!(result, Ok(None));
        assert_eq!(polls, 11);
        assert_eq!(delay.elapsed_ms(), 10);
    }

    #[test]
    fn poll_until_returns_value() {
        let mut delay = MockDelay::new();
        let mut polls = 0;
        let result: Result<Option<u8>, ()> = poll_until(&mut delay, 10, 1, || {
            polls += 1;
            Ok((polls == 4).then_some(7))
        });

        assert_eq!(result, Ok(Some(7)));
        assert_eq!(delay.elapsed_ms(), 3);
    }
}
