//! Spin-only wait strategies
//!
//! Participants may run in different processes, so a waiting cursor cannot be
//! parked and woken by the thread it waits on. Every strategy here keeps the
//! thread on the CPU and only varies how hard it hammers the followed sequences.

use crate::disruptor::{DisruptorError, Result, SequenceBarrier};
use crossbeam_utils::Backoff;
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How a cursor pauses between two polls of a followed sequence
pub trait WaitStrategy: Send + Sync + std::fmt::Debug {
    /// Called once per unsatisfied poll. `backoff` is fresh for every wait.
    fn pause(&self, backoff: &Backoff);
}

/// Busy spin wait strategy - lowest possible latency
///
/// Re-polls immediately without issuing any hint to the processor.
#[derive(Copy, Clone, Debug, Default)]
pub struct BusySpin;

impl WaitStrategy for BusySpin {
    #[inline]
    fn pause(&self, _backoff: &Backoff) {}
}

/// Busy spin with spin loop hint
///
/// Emits the processor's pause instruction between polls, which saves power
/// and frees pipeline resources for a sibling hyper-thread.
#[derive(Copy, Clone, Debug, Default)]
pub struct BusySpinWithHint;

impl WaitStrategy for BusySpinWithHint {
    #[inline]
    fn pause(&self, _backoff: &Backoff) {
        hint::spin_loop();
    }
}

/// Exponential backoff spin
///
/// Doubles the number of pause instructions per poll up to crossbeam's spin
/// limit. Never yields to the scheduler.
#[derive(Copy, Clone, Debug, Default)]
pub struct BackoffSpin;

impl WaitStrategy for BackoffSpin {
    #[inline]
    fn pause(&self, backoff: &Backoff) {
        backoff.spin();
    }
}

/// Bounds placed on a single wait, checked on every polling iteration
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitLimit<'a> {
    deadline: Option<Instant>,
    shutdown: Option<&'a AtomicBool>,
}

impl<'a> WaitLimit<'a> {
    /// No bound other than the barrier's own alert flag
    pub fn none() -> Self {
        Self::default()
    }

    /// Give up with [`DisruptorError::Timeout`] after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Give up with [`DisruptorError::Timeout`] once `deadline` has passed
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Give up with [`DisruptorError::Shutdown`] once `flag` is raised
    pub fn with_shutdown(mut self, flag: &'a AtomicBool) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Fail if the barrier was alerted or any bound has been reached
    #[inline]
    pub(crate) fn check(&self, barrier: &SequenceBarrier) -> Result<()> {
        barrier.check_alert()?;
        if self
            .shutdown
            .is_some_and(|flag| flag.load(Ordering::Acquire))
        {
            return Err(DisruptorError::Shutdown);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(DisruptorError::Timeout);
        }
        Ok(())
    }
}

/// Resolve a strategy by its configuration name
pub fn from_name(name: &str) -> Option<Box<dyn WaitStrategy>> {
    match name.to_lowercase().as_str() {
        "busy-spin" | "busyspin" => Some(Box::new(BusySpin)),
        "spin-hint" | "busy-spin-hint" => Some(Box::new(BusySpinWithHint)),
        "backoff" => Some(Box::new(BackoffSpin)),
        _ => None,
    }
}

impl<W: WaitStrategy + ?Sized> WaitStrategy for Box<W> {
    #[inline]
    fn pause(&self, backoff: &Backoff) {
        (**self).pause(backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategies_return() {
        let backoff = Backoff::new();
        BusySpin.pause(&backoff);
        BusySpinWithHint.pause(&backoff);
        for _ in 0..16 {
            BackoffSpin.pause(&backoff);
        }
        // spin() never advances the backoff past the spin phase
        assert!(!backoff.is_completed());
    }

    #[test]
    fn test_from_name() {
        assert!(from_name("busy-spin").is_some());
        assert!(from_name("BusySpin").is_some());
        assert!(from_name("spin-hint").is_some());
        assert!(from_name("backoff").is_some());
        assert!(from_name("sleeping").is_none());
    }

    #[test]
    fn test_limit_none_passes() {
        let barrier = SequenceBarrier::new();
        assert!(WaitLimit::none().check(&barrier).is_ok());
    }

    #[test]
    fn test_limit_shutdown_flag() {
        let barrier = SequenceBarrier::new();
        let flag = AtomicBool::new(false);
        let limit = WaitLimit::none().with_shutdown(&flag);
        assert!(limit.check(&barrier).is_ok());

        flag.store(true, Ordering::Release);
        assert_eq!(limit.check(&barrier), Err(DisruptorError::Shutdown));
    }

    #[test]
    fn test_limit_deadline() {
        let barrier = SequenceBarrier::new();
        let expired = WaitLimit::none().with_deadline(Instant::now());
        assert_eq!(expired.check(&barrier), Err(DisruptorError::Timeout));

        let generous = WaitLimit::none().with_timeout(Duration::from_secs(60));
        assert!(generous.check(&barrier).is_ok());
    }

    #[test]
    fn test_limit_alert_wins() {
        let barrier = SequenceBarrier::new();
        barrier.alert();
        let limit = WaitLimit::none().with_deadline(Instant::now());
        assert_eq!(limit.check(&barrier), Err(DisruptorError::Alert));
    }
}
