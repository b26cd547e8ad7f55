/* src/bucket.rs */

//! The token bucket: the unit every admitted request is charged against.

use crate::boxes::ClientBox;
use crate::rate::Rate;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Bucket key within a box: the pattern string of the matched route. All
/// paths matching one route drain the same bucket for a given caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct BucketId(String);

impl BucketId {
    pub(crate) fn for_route_pattern(pattern: &str) -> Self {
        Self(pattern.to_string())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

/// Outcome of charging a bucket for one request.
pub(crate) enum Charge {
    Admitted,
    Limited { retry_after_secs: u64 },
}

struct BucketState {
    /// Remaining tokens. Deliberately allowed to go negative: requests made
    /// while already limited dig the caller deeper into debt and push the
    /// next success further out.
    tokens: i64,
    last_accessed: Instant,
    last_gifted: Instant,
}

/// Token counter for one (caller identity, route) pair.
///
/// All mutable state sits behind one mutex; the request path only ever
/// decrements `tokens`, the gifter only ever increments. The owning box holds
/// the authoritative `Arc`; the gifter's list keeps a `Weak` it uses for
/// refill and eviction.
pub(crate) struct Bucket {
    id: BucketId,
    rate: Rate,
    owner: Weak<ClientBox>,
    state: Mutex<BucketState>,
}

impl Bucket {
    /// A fresh bucket starts full.
    pub(crate) fn new(id: BucketId, rate: Rate, owner: Weak<ClientBox>, now: Instant) -> Arc<Self> {
        Arc::new(Self {
            id,
            rate,
            owner,
            state: Mutex::new(BucketState {
                tokens: i64::from(rate.capacity()),
                last_accessed: now,
                last_gifted: now,
            }),
        })
    }

    pub(crate) fn id(&self) -> &BucketId {
        &self.id
    }

    pub(crate) fn owner(&self) -> Option<Arc<ClientBox>> {
        self.owner.upgrade()
    }

    /// Takes one token. A charge that leaves the counter negative is a
    /// rejection carrying the estimated wait until a retry can succeed.
    pub(crate) fn charge(&self, now: Instant) -> Charge {
        let mut state = self.state.lock();
        state.tokens -= 1;
        if state.tokens < 0 {
            return Charge::Limited {
                retry_after_secs: seconds_until_success(
                    now,
                    state.last_gifted,
                    self.rate,
                    state.tokens,
                ),
            };
        }
        state.last_accessed = now;
        Charge::Admitted
    }

    /// One gift tick: tops the bucket up by at most `capacity`, so a fully
    /// drained bucket is whole again after a single period. Returns `false`
    /// when the bucket was already full and nothing changed.
    pub(crate) fn refill(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        let capacity = i64::from(self.rate.capacity());
        if state.tokens >= capacity {
            return false;
        }
        state.tokens = (state.tokens + capacity).min(capacity);
        state.last_gifted = now;
        true
    }

    /// Full and untouched for longer than `stale_after`: eligible for
    /// eviction.
    pub(crate) fn is_stale(&self, now: Instant, stale_after: std::time::Duration) -> bool {
        let state = self.state.lock();
        state.tokens >= i64::from(self.rate.capacity())
            && now.duration_since(state.last_accessed) > stale_after
    }

    #[cfg(test)]
    pub(crate) fn tokens(&self) -> i64 {
        self.state.lock().tokens
    }
}

/// How long until a charge on this bucket can succeed again.
///
/// A caller `tokens` deep in the hole needs `-tokens + 1` tokens before the
/// next charge comes out non-negative; each gift tick supplies at most
/// `capacity` of them. Rounded up to whole seconds.
pub(crate) fn seconds_until_success(
    now: Instant,
    last_gifted: Instant,
    rate: Rate,
    tokens: i64,
) -> u64 {
    if tokens > 0 {
        return 0;
    }
    let needed = 1 + tokens.unsigned_abs();
    let refills = needed.div_ceil(u64::from(rate.capacity().max(1)));
    let refills = u32::try_from(refills).unwrap_or(u32::MAX);
    let success_at = last_gifted + rate.period() * refills;
    let remaining = success_at.saturating_duration_since(now);
    remaining.as_secs() + u64::from(remaining.subsec_nanos() != 0)
}
