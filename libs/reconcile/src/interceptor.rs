//! Composable interceptors around change actions.
//!
//! Two interceptors exist: a retry/backoff interceptor for store writes and
//! a token-bucket rate limiter for new-task creation. Both carry their
//! state as tags on the relevant model's job holder, replaced atomically
//! with the holder on each update.
//!
//! Composition order matters and is fixed: the rate limiter wraps the retry
//! wrapper, and resolvers check rate-limit availability before the retry
//! budget. The two are not commutative — a retry-eligible action that is
//! rate-limited must not touch its backoff state.

use armada_id::JobId;
use async_trait::async_trait;
use tracing::warn;

use crate::action::{ActionError, ActionKind, ChangeAction, ModelUpdate, Mutation};
use crate::clock::Clock;
use crate::holder::{EntityHolder, TagValue};

/// Backoff state recorded after failed attempts of a retry-wrapped action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTag {
    /// Consecutive failures so far.
    pub failures: u32,
    /// Epoch ms before which no further attempt may be made.
    pub next_attempt_ms: i64,
}

/// Token bucket state carried as a holder tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketTag {
    pub tokens: u64,
    /// Epoch ms of the last refill the bucket has been credited for.
    pub last_refill_ms: i64,
}

/// Token bucket shape: fixed capacity, fixed refill cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucket {
    pub capacity: u64,
    pub refill_interval_ms: i64,
    pub refill_amount: u64,
}

impl TokenBucket {
    /// Applies lazy refill to `tag` as of `now_ms`. A missing tag is a full
    /// bucket. Refill happens on a fixed cadence independent of
    /// consumption.
    pub fn refill(&self, tag: Option<&TokenBucketTag>, now_ms: i64) -> TokenBucketTag {
        match tag {
            None => TokenBucketTag {
                tokens: self.capacity,
                last_refill_ms: now_ms,
            },
            Some(tag) => {
                let elapsed = now_ms.saturating_sub(tag.last_refill_ms);
                if self.refill_interval_ms <= 0 {
                    return *tag;
                }
                let intervals = elapsed / self.refill_interval_ms;
                if intervals <= 0 {
                    return *tag;
                }
                let refilled = (intervals as u64).saturating_mul(self.refill_amount);
                TokenBucketTag {
                    tokens: tag.tokens.saturating_add(refilled).min(self.capacity),
                    last_refill_ms: tag.last_refill_ms + intervals * self.refill_interval_ms,
                }
            }
        }
    }
}

/// Delay before attempt `failures + 1`: `initial * 2^failures`, capped.
pub(crate) fn backoff_delay_ms(initial_delay_ms: i64, max_delay_ms: i64, failures: u32) -> i64 {
    let shift = failures.min(32);
    initial_delay_ms
        .saturating_mul(1i64 << shift)
        .min(max_delay_ms)
}

/// Computes the tag to record after one more failure at `now_ms`.
pub(crate) fn next_retry_tag(
    previous: Option<&RetryTag>,
    initial_delay_ms: i64,
    max_delay_ms: i64,
    now_ms: i64,
) -> RetryTag {
    let failures = previous.map(|t| t.failures).unwrap_or(0) + 1;
    RetryTag {
        failures,
        next_attempt_ms: now_ms + backoff_delay_ms(initial_delay_ms, max_delay_ms, failures - 1),
    }
}

/// Retry/backoff interceptor for store writes.
///
/// Wrapped actions absorb their failures: a failed attempt records a new
/// backoff deadline on the store model's job holder instead of surfacing
/// the error, and the action is retried on a later cycle once eligible.
#[derive(Debug, Clone)]
pub struct RetryActionInterceptor {
    name: String,
    initial_delay_ms: i64,
    max_delay_ms: i64,
}

impl RetryActionInterceptor {
    pub fn new(name: impl Into<String>, initial_delay_ms: i64, max_delay_ms: i64) -> Self {
        Self {
            name: name.into(),
            initial_delay_ms,
            max_delay_ms,
        }
    }

    fn tag_name(&self) -> String {
        format!("retry.{}", self.name)
    }

    /// True when the backoff window for this holder has elapsed and an
    /// attempt may be made.
    pub fn execution_limits(&self, holder: &EntityHolder, clock: &dyn Clock) -> bool {
        match holder.tag(&self.tag_name()) {
            Some(TagValue::Retry(tag)) => clock.now_ms() >= tag.next_attempt_ms,
            _ => true,
        }
    }

    pub fn wrap(&self, inner: Box<dyn ChangeAction>) -> Box<dyn ChangeAction> {
        Box::new(RetryWrapper {
            tag: self.tag_name(),
            initial_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            inner,
        })
    }
}

struct RetryWrapper {
    tag: String,
    initial_delay_ms: i64,
    max_delay_ms: i64,
    inner: Box<dyn ChangeAction>,
}

#[async_trait]
impl ChangeAction for RetryWrapper {
    fn kind(&self) -> ActionKind {
        self.inner.kind()
    }

    fn job_id(&self) -> JobId {
        self.inner.job_id()
    }

    fn summary(&self) -> String {
        self.inner.summary()
    }

    async fn execute(&self, clock: &dyn Clock) -> Result<Vec<ModelUpdate>, ActionError> {
        match self.inner.execute(clock).await {
            Ok(mut updates) => {
                updates.push(ModelUpdate::store(Mutation::ClearActionFailures {
                    tag: self.tag.clone(),
                }));
                Ok(updates)
            }
            Err(err) => {
                warn!(
                    job_id = %self.inner.job_id(),
                    action = %self.inner.kind(),
                    error = %err,
                    "Action failed; backing off"
                );
                Ok(vec![ModelUpdate::store(Mutation::RecordActionFailure {
                    tag: self.tag.clone(),
                    initial_delay_ms: self.initial_delay_ms,
                    max_delay_ms: self.max_delay_ms,
                })])
            }
        }
    }
}

/// Token-bucket rate limiter for new-task creation.
#[derive(Debug, Clone)]
pub struct RateLimiterInterceptor {
    name: String,
    bucket: TokenBucket,
}

impl RateLimiterInterceptor {
    pub fn new(name: impl Into<String>, bucket: TokenBucket) -> Self {
        Self {
            name: name.into(),
            bucket,
        }
    }

    fn tag_name(&self) -> String {
        format!("rate_limiter.{}", self.name)
    }

    /// Read-only peek at the tokens currently available on this holder.
    pub fn execution_limits(&self, holder: &EntityHolder, clock: &dyn Clock) -> u64 {
        let tag = match holder.tag(&self.tag_name()) {
            Some(TagValue::RateLimiter(tag)) => Some(tag),
            _ => None,
        };
        self.bucket.refill(tag, clock.now_ms()).tokens
    }

    /// Wraps an action so every attempt consumes exactly one token at the
    /// moment it is issued. A failed attempt keeps its token spent, so a
    /// persistently failing collaborator is retried at the refill rate
    /// rather than at full bucket width each cycle.
    pub fn wrap(&self, inner: Box<dyn ChangeAction>) -> Box<dyn ChangeAction> {
        Box::new(RateLimitWrapper {
            tag: self.tag_name(),
            bucket: self.bucket,
            inner,
        })
    }
}

struct RateLimitWrapper {
    tag: String,
    bucket: TokenBucket,
    inner: Box<dyn ChangeAction>,
}

#[async_trait]
impl ChangeAction for RateLimitWrapper {
    fn kind(&self) -> ActionKind {
        self.inner.kind()
    }

    fn job_id(&self) -> JobId {
        self.inner.job_id()
    }

    fn summary(&self) -> String {
        self.inner.summary()
    }

    async fn execute(&self, clock: &dyn Clock) -> Result<Vec<ModelUpdate>, ActionError> {
        let consume = ModelUpdate::running(Mutation::ConsumeRateLimitToken {
            tag: self.tag.clone(),
            bucket: self.bucket,
        });
        match self.inner.execute(clock).await {
            Ok(inner_updates) => {
                let mut updates = vec![consume];
                updates.extend(inner_updates);
                Ok(updates)
            }
            Err(err) => {
                warn!(
                    job_id = %self.inner.job_id(),
                    action = %self.inner.kind(),
                    error = %err,
                    "Rate-limited action failed; token stays spent"
                );
                Ok(vec![consume])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_full_bucket_when_untagged() {
        let bucket = TokenBucket {
            capacity: 10,
            refill_interval_ms: 100,
            refill_amount: 1,
        };
        let tag = bucket.refill(None, 5_000);
        assert_eq!(tag.tokens, 10);
        assert_eq!(tag.last_refill_ms, 5_000);
    }

    #[test]
    fn test_refill_on_fixed_cadence() {
        let bucket = TokenBucket {
            capacity: 10,
            refill_interval_ms: 100,
            refill_amount: 1,
        };
        let empty = TokenBucketTag {
            tokens: 0,
            last_refill_ms: 1_000,
        };

        // Sub-interval elapsed: nothing credited.
        assert_eq!(bucket.refill(Some(&empty), 1_099).tokens, 0);

        // One interval: one token, refill point advances by one interval.
        let one = bucket.refill(Some(&empty), 1_150);
        assert_eq!(one.tokens, 1);
        assert_eq!(one.last_refill_ms, 1_100);

        // Long idle: caps at capacity.
        assert_eq!(bucket.refill(Some(&empty), 60_000).tokens, 10);
    }

    #[rstest]
    #[case(0, 1_000)]
    #[case(1, 2_000)]
    #[case(2, 4_000)]
    #[case(3, 8_000)]
    #[case(10, 8_000)]
    #[case(63, 8_000)]
    fn test_backoff_doubles_to_cap(#[case] failures: u32, #[case] expected_ms: i64) {
        assert_eq!(backoff_delay_ms(1_000, 8_000, failures), expected_ms);
    }

    #[test]
    fn test_next_retry_tag_counts_failures() {
        let first = next_retry_tag(None, 5_000, 5_000, 100);
        assert_eq!(first.failures, 1);
        assert_eq!(first.next_attempt_ms, 5_100);

        let second = next_retry_tag(Some(&first), 5_000, 5_000, 6_000);
        assert_eq!(second.failures, 2);
        assert_eq!(second.next_attempt_ms, 11_000);
    }
}
