/* src/boxes.rs */

//! Per-caller bucket containers.
//!
//! A box holds every bucket belonging to one caller identity, one per matched
//! route. Boxes are created lazily on the first request carrying a novel
//! signature and live for the rest of the server's life; their buckets come
//! and go as the gifters evict stale ones.

use crate::bucket::{Bucket, BucketId, Charge};
use crate::rate::Rate;
use crate::rate_by::RateBy;
use crate::signature::ReqSignature;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub(crate) struct ClientBox {
    id: ReqSignature,
    rate_by: Arc<RateBy>,
    buckets: RwLock<HashMap<BucketId, Arc<Bucket>>>,
}

impl ClientBox {
    pub(crate) fn new(id: ReqSignature, rate_by: Arc<RateBy>) -> Arc<Self> {
        Arc::new(Self {
            id,
            rate_by,
            buckets: RwLock::new(HashMap::new()),
        })
    }

    /// Fast-path read probe.
    pub(crate) fn bucket(&self, id: &BucketId) -> Option<Arc<Bucket>> {
        self.buckets.read().get(id).cloned()
    }

    /// Charges the bucket `id` while holding this box's read lock. Eviction
    /// needs the write lock, so a bucket visible here cannot vanish before
    /// the charge lands. `None` when no such bucket exists (yet).
    pub(crate) fn charge_bucket(&self, id: &BucketId, now: Instant) -> Option<Charge> {
        self.buckets.read().get(id).map(|bucket| bucket.charge(now))
    }

    /// Returns the bucket for `id`, creating it full if absent. The second
    /// element is `true` when this call created the bucket, in which case the
    /// caller must register it with the matching gifter — after this method
    /// returns, so no box lock is held while the gifter's list is touched.
    pub(crate) fn bucket_or_create(
        self: &Arc<Self>,
        id: BucketId,
        rate: Rate,
        now: Instant,
    ) -> (Arc<Bucket>, bool) {
        if let Some(existing) = self.bucket(&id) {
            return (existing, false);
        }
        let mut buckets = self.buckets.write();
        if let Some(existing) = buckets.get(&id) {
            // Lost the create race; someone else's bucket is authoritative.
            return (existing.clone(), false);
        }
        debug!(
            signature = self.id.as_str(),
            scheme = self.rate_by.key_name(),
            bucket = id.as_str(),
            "creating bucket"
        );
        let bucket = Bucket::new(id.clone(), rate, Arc::downgrade(self), now);
        buckets.insert(id, bucket.clone());
        (bucket, true)
    }

    /// Removes `bucket` from this box if it is still stale once the box's
    /// write lock is held. The write lock is what makes this safe against the
    /// request path: a request holding the read lock has either already
    /// resolved the bucket (and will charge it, making it non-stale here) or
    /// will re-create it afterwards.
    pub(crate) fn evict_if_stale(
        &self,
        bucket: &Bucket,
        now: Instant,
        stale_after: Duration,
    ) -> bool {
        let mut buckets = self.buckets.write();
        if bucket.is_stale(now, stale_after) {
            buckets.remove(bucket.id());
            debug!(
                signature = self.id.as_str(),
                bucket = bucket.id().as_str(),
                "evicted stale bucket"
            );
            return true;
        }
        false
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }
}
