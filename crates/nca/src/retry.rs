//! Retry helpers for operations that must ride out transient failures
//! (a locked database, a flaky network mount) without failing the job.

use std::time::{Duration, Instant};

use thiserror::Error;

/// Attempts made by [`run_critical`] before giving up.
pub const CRITICAL_ATTEMPTS: u32 = 20;
const CRITICAL_BASE_MS: f64 = 1000.0;
const CRITICAL_MAX_DELAY: Duration = Duration::from_secs(120);

const DO_INITIAL_DELAY: Duration = Duration::from_millis(250);
const DO_MAX_DELAY: Duration = Duration::from_secs(10);
const BACKOFF_FACTOR: f64 = 1.25;

/// Time source, so tests can drive the backoff without sleeping.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Error, Debug)]
#[error("failed after multiple retries: {source}")]
pub struct RetryError<E>
where
    E: std::error::Error + 'static,
{
    pub attempts: u32,
    #[source]
    pub source: E,
}

/// Delay before critical retry `n` (zero-based): `1000 * 1.25^n` ms, capped
/// at two minutes.
pub fn critical_delay(n: u32) -> Duration {
    let ms = CRITICAL_BASE_MS * BACKOFF_FACTOR.powi(n as i32);
    Duration::from_millis(ms as u64).min(CRITICAL_MAX_DELAY)
}

/// Runs `f` until it succeeds or [`CRITICAL_ATTEMPTS`] have failed.
pub fn run_critical<T, E, F>(f: F) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Result<T, E>,
{
    run_critical_with(&SystemClock, f)
}

pub fn run_critical_with<C, T, E, F>(clock: &C, mut f: F) -> Result<T, RetryError<E>>
where
    C: Clock,
    E: std::error::Error + 'static,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt + 1 >= CRITICAL_ATTEMPTS {
                    return Err(RetryError {
                        attempts: attempt + 1,
                        source: e,
                    });
                }
                let delay = critical_delay(attempt);
                tracing::warn!(attempt = attempt + 1, ?delay, error = %e, "critical operation failed, retrying");
                clock.sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// Calls `f` until it succeeds or `max_wait` has elapsed, backing off from
/// 250ms by a factor of 1.25 up to 10s between calls. `f` always runs at
/// least once, and the final sleep is trimmed so one last call lands at the
/// deadline.
pub fn do_with<T, E, F>(max_wait: Duration, f: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
{
    do_with_clock(&SystemClock, max_wait, f)
}

pub fn do_with_clock<C, T, E, F>(clock: &C, max_wait: Duration, mut f: F) -> Result<T, E>
where
    C: Clock,
    F: FnMut() -> Result<T, E>,
{
    let start = clock.now();
    let mut delay = DO_INITIAL_DELAY;

    loop {
        let err = match f() {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let elapsed = clock.now().saturating_duration_since(start);
        if elapsed >= max_wait {
            return Err(err);
        }

        clock.sleep(delay.min(max_wait - elapsed));
        delay = delay.mul_f64(BACKOFF_FACTOR).min(DO_MAX_DELAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    struct FakeClock {
        base: Instant,
        offset: Cell<Duration>,
        sleeps: RefCell<Vec<Duration>>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Cell::new(Duration::ZERO),
                sleeps: RefCell::new(Vec::new()),
            }
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.base + self.offset.get()
        }

        fn sleep(&self, duration: Duration) {
            self.offset.set(self.offset.get() + duration);
            self.sleeps.borrow_mut().push(duration);
        }
    }

    #[derive(Debug, Error)]
    #[error("boom {0}")]
    struct Boom(u32);

    #[test]
    fn test_critical_delays() {
        let expected_ms = [1000, 1250, 1562, 1953, 2441, 3051];
        for (n, ms) in expected_ms.iter().enumerate() {
            assert_eq!(critical_delay(n as u32), Duration::from_millis(*ms));
        }
        assert_eq!(critical_delay(40), Duration::from_secs(120));
    }

    #[test]
    fn test_run_critical_recovers() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let result = run_critical_with(&clock, || {
            calls += 1;
            if calls <= 6 {
                Err(Boom(calls))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 7);
        let sleeps = clock.sleeps.borrow();
        assert_eq!(sleeps.len(), 6);
        assert_eq!(sleeps[0], Duration::from_millis(1000));
        assert_eq!(sleeps[5], Duration::from_millis(3051));
    }

    #[test]
    fn test_run_critical_gives_up() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let err = run_critical_with(&clock, || -> Result<(), Boom> {
            calls += 1;
            Err(Boom(calls))
        })
        .unwrap_err();
        assert_eq!(calls, CRITICAL_ATTEMPTS);
        assert_eq!(err.attempts, CRITICAL_ATTEMPTS);
        assert_eq!(err.to_string(), "failed after multiple retries: boom 20");
        assert_eq!(clock.sleeps.borrow().len(), (CRITICAL_ATTEMPTS - 1) as usize);
    }

    #[test]
    fn test_do_with_zero_wait_calls_once() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let result: Result<(), Boom> = do_with_clock(&clock, Duration::ZERO, || {
            calls += 1;
            Err(Boom(calls))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert!(clock.sleeps.borrow().is_empty());
    }

    #[test]
    fn test_do_with_backoff_and_final_call() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let result: Result<(), Boom> = do_with_clock(&clock, Duration::from_secs(1), || {
            calls += 1;
            Err(Boom(calls))
        });
        assert!(result.is_err());

        // 250 + 312.5 + 390.625 = 953.125ms, then a trimmed 46.875ms sleep
        // lands exactly on the deadline for one final call.
        let sleeps = clock.sleeps.borrow();
        assert_eq!(sleeps.len(), 4);
        assert_eq!(sleeps[0], Duration::from_millis(250));
        assert_eq!(sleeps.iter().sum::<Duration>(), Duration::from_secs(1));
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_do_with_succeeds_after_failures() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let result = do_with_clock(&clock, Duration::from_secs(30), || {
            calls += 1;
            if calls < 3 {
                Err(Boom(calls))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(clock.sleeps.borrow().len(), 2);
    }

    #[test]
    fn test_do_with_delay_is_capped() {
        let clock = FakeClock::new();
        let _: Result<(), Boom> = do_with_clock(&clock, Duration::from_secs(120), || Err(Boom(0)));
        let max = clock.sleeps.borrow().iter().copied().max().unwrap();
        assert_eq!(max, DO_MAX_DELAY);
    }
}
