/* src/gifter.rs */

//! Refill daemons.
//!
//! One gifter runs per distinct rate in the configuration, waking once per
//! refill period. Grouping buckets by rate means each daemon ticks exactly as
//! often as its buckets need and no more; a single global scanner would have
//! to wake at the common divisor of every configured period.

use crate::bucket::Bucket;
use crate::list::LinkedList;
use crate::rate::Rate;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub(crate) struct Gifter {
    rate: Rate,
    stale_after: Duration,
    /// Buckets sharing this gifter's rate. The list is the gifter's own; the
    /// `Weak` handles keep the owning boxes authoritative. Request tasks only
    /// touch it through [`add_bucket`](Self::add_bucket), serialised against
    /// traversal by this mutex.
    buckets: Mutex<LinkedList<Weak<Bucket>>>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Gifter {
    pub(crate) fn new(rate: Rate, stale_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            rate,
            stale_after,
            buckets: Mutex::new(LinkedList::new()),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    pub(crate) fn rate(&self) -> Rate {
        self.rate
    }

    /// Spawns the tick loop. Idempotent; a second start is ignored.
    pub(crate) fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(rate = %self.rate, "starting gifter");
        let gifter = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gifter.rate.period());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // An interval yields immediately once; the first real gift is due
            // a full period from now.
            ticker.tick().await;
            while gifter.running.load(Ordering::Acquire) {
                ticker.tick().await;
                gifter.gift(Instant::now());
            }
        });
        *self.task.lock() = Some(handle);
    }

    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    /// Registers a freshly created bucket for refills. Called from request
    /// tasks; the caller must not be holding the owning box's lock.
    pub(crate) fn add_bucket(&self, bucket: &Arc<Bucket>) {
        self.buckets.lock().push_front(Arc::downgrade(bucket));
        debug!(rate = %self.rate, bucket = bucket.id().as_str(), "bucket registered with gifter");
    }

    /// One tick: walk the list once, topping up every bucket below capacity
    /// and unlinking the full ones nobody has charged for `stale_after`.
    ///
    /// Eviction re-locks in box-then-bucket order and re-checks staleness
    /// under the box's write lock, so it can never pull a bucket out from
    /// under a request that has already resolved it.
    pub(crate) fn gift(&self, now: Instant) {
        let stale_after = self.stale_after;
        let mut buckets = self.buckets.lock();
        buckets.retain_mut(|handle| {
            let Some(bucket) = handle.upgrade() else {
                // Boxes never drop buckets behind the gifter's back; seeing a
                // dead handle means that invariant broke somewhere.
                error!("bucket vanished without eviction; unlinking it");
                return false;
            };
            if bucket.refill(now) {
                return true;
            }
            // Full. Worth keeping unless nobody has needed it for a while.
            if !bucket.is_stale(now, stale_after) {
                return true;
            }
            match bucket.owner() {
                Some(owner) => !owner.evict_if_stale(&bucket, now, stale_after),
                None => {
                    error!(bucket = bucket.id().as_str(), "bucket outlived its box; unlinking it");
                    false
                }
            }
        });
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }
}

impl Drop for Gifter {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::ClientBox;
    use crate::bucket::{BucketId, Charge};
    use crate::rate::MINUTE;
    use crate::rate_by::RateBy;
    use crate::signature;

    fn setup(rate: Rate, now: Instant) -> (Arc<ClientBox>, Arc<Bucket>, Arc<Gifter>) {
        let bx = ClientBox::new(signature::tests_id("IP-1.2.3.4"), RateBy::client_ip());
        let (bucket, created) =
            bx.bucket_or_create(BucketId::for_route_pattern("/about"), rate, now);
        assert!(created);
        let gifter = Gifter::new(rate, rate.period() * 10);
        gifter.add_bucket(&bucket);
        (bx, bucket, gifter)
    }

    #[test]
    fn tick_replenishes_a_drained_bucket_in_one_period() {
        let t0 = Instant::now();
        let rate = Rate::new(5, MINUTE);
        let (_bx, bucket, gifter) = setup(rate, t0);
        for _ in 0..5 {
            assert!(matches!(bucket.charge(t0), Charge::Admitted));
        }
        assert_eq!(bucket.tokens(), 0);
        gifter.gift(t0 + MINUTE);
        assert_eq!(bucket.tokens(), 5);
        assert_eq!(gifter.bucket_count(), 1);
    }

    #[test]
    fn full_but_recent_buckets_are_left_alone() {
        let t0 = Instant::now();
        let rate = Rate::new(2, MINUTE);
        let (bx, bucket, gifter) = setup(rate, t0);
        gifter.gift(t0 + MINUTE);
        assert_eq!(bucket.tokens(), 2);
        assert_eq!(gifter.bucket_count(), 1);
        assert_eq!(bx.bucket_count(), 1);
    }

    #[test]
    fn stale_buckets_leave_both_the_list_and_the_box() {
        let t0 = Instant::now();
        let rate = Rate::new(2, MINUTE);
        let (bx, _bucket, gifter) = setup(rate, t0);
        // Stale horizon is 10 periods; one tick past it, the bucket goes.
        gifter.gift(t0 + MINUTE * 11);
        assert_eq!(gifter.bucket_count(), 0);
        assert_eq!(bx.bucket_count(), 0);
    }

    #[test]
    fn charged_buckets_do_not_go_stale() {
        let t0 = Instant::now();
        let rate = Rate::new(2, MINUTE);
        let (bx, bucket, gifter) = setup(rate, t0);
        // A charge at t0+10m resets the idle clock; at t0+11m the bucket is
        // below capacity anyway, so the tick refills instead of evicting.
        assert!(matches!(bucket.charge(t0 + MINUTE * 10), Charge::Admitted));
        gifter.gift(t0 + MINUTE * 11);
        assert_eq!(gifter.bucket_count(), 1);
        assert_eq!(bx.bucket_count(), 1);
        assert_eq!(bucket.tokens(), 2);
    }

    #[test]
    fn dead_handles_are_unlinked() {
        let t0 = Instant::now();
        let rate = Rate::new(2, MINUTE);
        let (bx, bucket, gifter) = setup(rate, t0);
        drop(bucket);
        drop(bx); // Box owned the bucket; both gone now.
        gifter.gift(t0 + MINUTE);
        assert_eq!(gifter.bucket_count(), 0);
    }

    #[test]
    fn debt_is_paid_off_tick_by_tick() {
        let t0 = Instant::now();
        let rate = Rate::new(2, MINUTE);
        let (_bx, bucket, gifter) = setup(rate, t0);
        for _ in 0..6 {
            bucket.charge(t0);
        }
        assert_eq!(bucket.tokens(), -4);
        gifter.gift(t0 + MINUTE);
        assert_eq!(bucket.tokens(), -2);
        gifter.gift(t0 + MINUTE * 2);
        assert_eq!(bucket.tokens(), 0);
        gifter.gift(t0 + MINUTE * 3);
        assert_eq!(bucket.tokens(), 2);
    }
}
