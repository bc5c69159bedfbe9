//! Rate limiting for event handlers.
//!
//! A debounced function runs at most once per interval; calls inside the
//! interval are dropped, not deferred.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Drops calls made within `interval` of the last call that ran.
#[derive(Debug)]
pub struct Debounce {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Debounce {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Run `f` unless the previous run was less than `interval` ago.
    pub fn call<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        {
            let mut last = self.last.lock();
            let now = Instant::now();
            if matches!(*last, Some(at) if now.duration_since(at) < self.interval) {
                return None;
            }
            *last = Some(now);
        }
        Some(f())
    }

    /// Like [`call`](Self::call), but always runs `f` when `bypass` is set.
    /// A bypassing call does not restart the interval.
    pub fn call_or_bypass<R>(&self, bypass: bool, f: impl FnOnce() -> R) -> Option<R> {
        if bypass {
            return Some(f());
        }
        self.call(f)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Wrap `f` so it runs at most once per `interval`.
pub fn debounce<A, R>(interval: Duration, f: impl Fn(A) -> R) -> impl Fn(A) -> Option<R> {
    let gate = Debounce::new(interval);
    move |arg| gate.call(|| f(arg))
}

/// Like [`debounce`], but arguments matching `exception` always go through.
pub fn debounce_with<A, R>(
    interval: Duration,
    f: impl Fn(A) -> R,
    exception: impl Fn(&A) -> bool,
) -> impl Fn(A) -> Option<R> {
    let gate = Debounce::new(interval);
    move |arg| {
        let bypass = exception(&arg);
        gate.call_or_bypass(bypass, || f(arg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::thread;

    #[test]
    fn test_calls_within_interval_dropped() {
        let gate = Debounce::new(Duration::from_secs(60));
        assert_eq!(gate.call(|| 1), Some(1));
        assert_eq!(gate.call(|| 2), None);
    }

    #[test]
    fn test_runs_again_after_interval() {
        let gate = Debounce::new(Duration::from_millis(20));
        assert!(gate.call(|| ()).is_some());
        thread::sleep(Duration::from_millis(40));
        assert!(gate.call(|| ()).is_some());
    }

    #[test]
    fn test_debounce_wraps_function() {
        let runs = Cell::new(0);
        let f = debounce(Duration::from_secs(60), |n: i32| {
            runs.set(runs.get() + 1);
            n * 2
        });

        assert_eq!(f(2), Some(4));
        assert_eq!(f(3), None);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_exception_bypasses_interval() {
        let f = debounce_with(
            Duration::from_secs(60),
            |s: String| s.len(),
            |s: &String| s == "urgent",
        );

        assert_eq!(f("first".to_string()), Some(5));
        assert_eq!(f("dropped".to_string()), None);
        assert_eq!(f("urgent".to_string()), Some(6));
        assert_eq!(f("urgent".to_string()), Some(6));
        assert_eq!(f("dropped".to_string()), None);
    }

    #[test]
    fn test_bypass_does_not_restart_interval() {
        let gate = Debounce::new(Duration::from_millis(30));
        assert!(gate.call_or_bypass(true, || ()).is_some());
        // The bypass left no timestamp behind.
        assert!(gate.call(|| ()).is_some());
    }
}
