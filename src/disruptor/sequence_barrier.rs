//! Sequence Barrier Implementation
//!
//! A barrier gates its owning cursor on the published positions of a bounded
//! set of other cursors. Followers are held as [`RelativePtr`]s so the barrier
//! keeps working when the region hosting it is mapped at a different address.

use crate::disruptor::{
    DisruptorError, RelativePtr, Result, Sequence, WaitLimit, WaitStrategy,
    INITIAL_CURSOR_VALUE, UNBOUNDED,
};
use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of sequences a single barrier can follow
pub const MAX_FOLLOWERS: usize = 8;

/// Coordination barrier for managing dependencies between cursors
///
/// Registration (`follows` / `unfollow`) is a setup-time operation; the steady
/// state only reads the follower table. A minimum is only cached if no
/// registration happened while it was being computed, and [`UNBOUNDED`] is
/// never cached.
#[repr(C)]
pub struct SequenceBarrier {
    /// Sequences that this barrier depends on
    followers: [RelativePtr<Sequence>; MAX_FOLLOWERS],
    /// Last minimum observed across the followers
    cached_minimum: AtomicI64,
    /// Bumped by every registration change
    epoch: AtomicU64,
    /// Alert flag for interrupting waiting participants
    alerted: AtomicBool,
}

impl SequenceBarrier {
    /// Create a barrier with no followers
    pub fn new() -> Self {
        Self {
            followers: std::array::from_fn(|_| RelativePtr::null()),
            cached_minimum: AtomicI64::new(INITIAL_CURSOR_VALUE),
            epoch: AtomicU64::new(0),
            alerted: AtomicBool::new(false),
        }
    }

    /// Start gating on `sequence`
    ///
    /// # Errors
    /// `BarrierFull` once [`MAX_FOLLOWERS`] sequences are registered,
    /// `AlreadyFollowing` if `sequence` is already registered.
    ///
    /// # Safety
    /// `sequence` must stay alive, and keep its position relative to this
    /// barrier, until it is removed with [`SequenceBarrier::unfollow`].
    pub unsafe fn follows(&self, sequence: &Sequence) -> Result<()> {
        if self.followers.iter().any(|slot| slot.points_to(sequence)) {
            return Err(DisruptorError::AlreadyFollowing);
        }

        for (index, slot) in self.followers.iter().enumerate() {
            if slot.try_set(sequence) {
                // A newcomer may be slower than anything cached so far
                self.invalidate_cache();
                debug!(slot = index, position = sequence.get(), "barrier follows sequence");
                return Ok(());
            }
        }

        warn!(capacity = MAX_FOLLOWERS, "sequence barrier is full");
        Err(DisruptorError::BarrierFull {
            capacity: MAX_FOLLOWERS,
        })
    }

    /// Stop gating on `sequence`
    ///
    /// # Errors
    /// `NotFollowing` if `sequence` was never registered here.
    pub fn unfollow(&self, sequence: &Sequence) -> Result<()> {
        let slot = self
            .followers
            .iter()
            .position(|slot| slot.points_to(sequence))
            .ok_or(DisruptorError::NotFollowing)?;

        self.followers[slot].clear();
        self.invalidate_cache();
        debug!(slot, "barrier unfollowed sequence");
        Ok(())
    }

    /// Whether `sequence` is currently registered
    pub fn is_following(&self, sequence: &Sequence) -> bool {
        self.followers.iter().any(|slot| slot.points_to(sequence))
    }

    /// Number of registered followers
    pub fn follower_count(&self) -> usize {
        self.followers.iter().filter(|slot| !slot.is_null()).count()
    }

    fn followed(&self) -> impl Iterator<Item = &Sequence> + '_ {
        // SAFETY: every non-null slot was registered through `follows`, whose
        // contract keeps the target alive and co-located until `unfollow`.
        self.followers.iter().filter_map(|slot| unsafe { slot.get() })
    }

    fn invalidate_cache(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cached_minimum
            .store(INITIAL_CURSOR_VALUE, Ordering::SeqCst);
    }

    /// Cache `minimum`, scanned from the follower table as of `epoch`
    ///
    /// A registration racing the scan may have been missed by it, so the
    /// store is rolled back when the epoch moved. Either the racing
    /// registration's own reset or the rollback lands last.
    fn store_minimum(&self, epoch: u64, minimum: i64) {
        if minimum == UNBOUNDED {
            return;
        }
        self.cached_minimum.store(minimum, Ordering::SeqCst);
        if self.epoch.load(Ordering::SeqCst) != epoch {
            self.cached_minimum
                .store(INITIAL_CURSOR_VALUE, Ordering::SeqCst);
        }
    }

    /// Smallest published position across all followers
    ///
    /// Returns [`UNBOUNDED`] when nothing is followed. Refreshes the cache
    /// unless the result is unbounded.
    pub fn minimum(&self) -> i64 {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let minimum = Sequence::get_minimum_sequence(self.followed(), UNBOUNDED);
        self.store_minimum(epoch, minimum);
        minimum
    }

    /// The minimum computed by the last `minimum` or successful wait
    pub fn cached_minimum(&self) -> i64 {
        self.cached_minimum.load(Ordering::Relaxed)
    }

    /// Spin until every follower has published at least `sequence`
    ///
    /// Returns the smallest position observed once all followers satisfy the
    /// bound, or [`UNBOUNDED`] if nothing is followed.
    ///
    /// # Errors
    /// `Alert` if the barrier is alerted while waiting.
    pub fn wait_for<W>(&self, sequence: i64, strategy: &W) -> Result<i64>
    where
        W: WaitStrategy + ?Sized,
    {
        self.wait_for_within(sequence, strategy, WaitLimit::none())
    }

    /// Like [`SequenceBarrier::wait_for`], giving up after `timeout`
    ///
    /// # Errors
    /// `Timeout` once `timeout` has elapsed, `Alert` if alerted.
    pub fn wait_for_with_timeout<W>(
        &self,
        sequence: i64,
        strategy: &W,
        timeout: Duration,
    ) -> Result<i64>
    where
        W: WaitStrategy + ?Sized,
    {
        self.wait_for_within(sequence, strategy, WaitLimit::none().with_timeout(timeout))
    }

    /// Like [`SequenceBarrier::wait_for`], giving up once `shutdown_flag` is set
    ///
    /// # Errors
    /// `Shutdown` once the flag is raised, `Alert` if alerted.
    pub fn wait_for_with_shutdown<W>(
        &self,
        sequence: i64,
        strategy: &W,
        shutdown_flag: &AtomicBool,
    ) -> Result<i64>
    where
        W: WaitStrategy + ?Sized,
    {
        self.wait_for_within(sequence, strategy, WaitLimit::none().with_shutdown(shutdown_flag))
    }

    /// General form of the wait: spin under `limit`
    ///
    /// # Errors
    /// Whatever bound in `limit` (or the alert flag) trips first.
    pub fn wait_for_within<W>(&self, sequence: i64, strategy: &W, limit: WaitLimit<'_>) -> Result<i64>
    where
        W: WaitStrategy + ?Sized,
    {
        self.check_alert()?;

        let cached = self.cached_minimum();
        if cached >= sequence {
            return Ok(cached);
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let backoff = Backoff::new();
        let mut minimum = UNBOUNDED;

        for slot in &self.followers {
            // SAFETY: as in `followed`.
            let Some(follower) = (unsafe { slot.get() }) else {
                continue;
            };
            let observed = loop {
                let position = follower.get();
                if position >= sequence {
                    break position;
                }
                // Retired while we were waiting on it
                if !slot.points_to(follower) {
                    break UNBOUNDED;
                }
                if let Err(error) = limit.check(self) {
                    if error == DisruptorError::Timeout {
                        warn!(sequence, position, "gave up waiting on follower");
                    }
                    return Err(error);
                }
                strategy.pause(&backoff);
            };
            minimum = minimum.min(observed);
        }

        self.store_minimum(epoch, minimum);
        Ok(minimum)
    }

    /// Check if this barrier has been alerted
    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    /// Alert this barrier so any spinning wait returns `Alert`
    pub fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        debug!("sequence barrier alerted");
    }

    /// Clear the alert status
    pub fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    /// Fail with `Alert` if the barrier has been alerted
    ///
    /// # Errors
    /// Returns `DisruptorError::Alert` if the barrier has been alerted
    pub fn check_alert(&self) -> Result<()> {
        if self.is_alerted() {
            Err(DisruptorError::Alert)
        } else {
            Ok(())
        }
    }
}

impl Default for SequenceBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SequenceBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceBarrier")
            .field("followers", &self.follower_count())
            .field("cached_minimum", &self.cached_minimum())
            .field("alerted", &self.is_alerted())
            .finish()
    }
}
