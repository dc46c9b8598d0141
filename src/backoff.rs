//! Backoff policies for the contended writer path
//!
//! The default policy is a single CPU pause hint per failed CAS, which never
//! leaves the spinning thread. `ExponentialBackoff` doubles the pause count
//! on every failure and can fall back to `yield_now` once the spin budget is
//! spent.

/// A step taken between two failed lock attempts.
pub trait Backoff {
    /// Wait politely before the next attempt.
    fn snooze(&mut self);

    /// Forget accumulated contention, called after a successful acquisition.
    #[inline]
    fn reset(&mut self) {}
}

impl<B: Backoff + ?Sized> Backoff for &mut B {
    #[inline]
    fn snooze(&mut self) {
        (**self).snooze()
    }

    #[inline]
    fn reset(&mut self) {
        (**self).reset()
    }
}

/// CPU pause hint (`pause` on x86, `yield`/`isb` on ARM, no-op elsewhere).
#[inline(always)]
pub fn pause() {
    core::hint::spin_loop();
}

/// One pause hint per failed attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinHint;

impl Backoff for SpinHint {
    #[inline(always)]
    fn snooze(&mut self) {
        pause();
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Steps spent spinning; step `n` issues `2^n` pause hints
    pub spin_limit: u32,
    /// Last step; steps between `spin_limit` and this one yield to the scheduler.
    /// Equal to `spin_limit` to never yield.
    pub yield_limit: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            spin_limit: 6,
            yield_limit: 10,
        }
    }
}

/// Exponential backoff, spinning `2^step` pauses up to `spin_limit`, then
/// yielding the time slice.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    step: u32,
    config: BackoffConfig,
}

impl ExponentialBackoff {
    /// Create a backoff with the default configuration
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    /// Create a backoff with a custom configuration
    ///
    /// `spin_limit` is clamped to 16 so one step never exceeds 65536 pauses,
    /// and `yield_limit` is raised to at least `spin_limit`.
    pub fn with_config(config: BackoffConfig) -> Self {
        let spin_limit = config.spin_limit.min(16);
        Self {
            step: 0,
            config: BackoffConfig {
                spin_limit,
                yield_limit: config.yield_limit.max(spin_limit),
            },
        }
    }

    /// Current step
    #[inline]
    pub fn step(&self) -> u32 {
        self.step
    }

    /// `true` once the backoff has reached its last step
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.step >= self.config.yield_limit
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff for ExponentialBackoff {
    #[inline]
    fn snooze(&mut self) {
        if self.step <= self.config.spin_limit {
            for _ in 0..1u32 << self.step {
                pause();
            }
        } else {
            std::thread::yield_now();
        }
        if self.step < self.config.yield_limit {
            self.step += 1;
        }
    }

    #[inline]
    fn reset(&mut self) {
        self.step = 0;
    }
}
