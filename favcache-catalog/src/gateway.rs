//! Upstream gateway: every catalog call the engine makes goes through here.
//!
//! Each attempt holds one [`ConcurrencyLimiter`] slot for exactly the
//! duration of the network call. Failures are classified:
//!
//! - rate limit / timeout: back off and retry, up to the policy's budget,
//!   then `UpstreamError::RetryExhausted` wrapping the last signal
//! - malformed payload: logged, counted, mapped to "no result"
//! - anything else: `UpstreamError::Unexpected`, no retry
//!
//! A 404 is a valid outcome (`Ok(None)`), not a fault.
//!
//! A `retry-after` hint on a rate-limit signal is logged but does not
//! change the backoff; the [`RetryPolicy`] schedule alone decides the sleep.
//!
//! Events are reported as they happen to an optional [`GatewayObserver`],
//! so exporters never have to diff [`GatewayStats`] snapshots.

use favcache_core::{
    CachedProduct, CatalogError, FavcacheError, FavcacheResult, ProductId, UpstreamError,
};
use futures_util::future::try_join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::limiter::ConcurrencyLimiter;
use crate::retry::RetryPolicy;
use crate::CatalogClient;

/// Counters describing gateway traffic since startup.
#[derive(Debug, Default)]
pub struct GatewayStats {
    /// Network calls issued (each retry counts).
    pub calls: AtomicU64,
    pub hits: AtomicU64,
    pub not_found: AtomicU64,
    pub rate_limited: AtomicU64,
    /// Payloads that failed to decode and were mapped to "no result".
    pub malformed: AtomicU64,
    pub retry_exhausted: AtomicU64,
    pub unexpected: AtomicU64,
}

/// Point-in-time copy of [`GatewayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStatsSnapshot {
    pub calls: u64,
    pub hits: u64,
    pub not_found: u64,
    pub rate_limited: u64,
    pub malformed: u64,
    pub retry_exhausted: u64,
    pub unexpected: u64,
}

impl GatewayStats {
    pub fn snapshot(&self) -> GatewayStatsSnapshot {
        GatewayStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            retry_exhausted: self.retry_exhausted.load(Ordering::Relaxed),
            unexpected: self.unexpected.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Classified result of one catalog attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOutcome {
    Hit,
    NotFound,
    RateLimited,
    Malformed,
    RetryExhausted,
    Unexpected,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Malformed => "malformed",
            Self::RetryExhausted => "retry_exhausted",
            Self::Unexpected => "unexpected",
        }
    }
}

/// Hook for gateway events, called synchronously at the point each event
/// occurs. `call_started` and `call_finished` bracket the time a call
/// holds a limiter slot and are always paired, even if the calling future
/// is dropped mid-call.
pub trait GatewayObserver: Send + Sync {
    fn call_started(&self) {}

    fn call_finished(&self) {}

    fn outcome(&self, _outcome: CallOutcome) {}
}

/// Pairs `call_started` with `call_finished` on drop.
struct CallScope<'a> {
    observer: Option<&'a dyn GatewayObserver>,
}

impl<'a> CallScope<'a> {
    fn enter(observer: Option<&'a dyn GatewayObserver>) -> Self {
        if let Some(o) = observer {
            o.call_started();
        }
        Self { observer }
    }
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        if let Some(o) = self.observer {
            o.call_finished();
        }
    }
}

pub struct UpstreamGateway {
    client: Arc<dyn CatalogClient>,
    limiter: ConcurrencyLimiter,
    retry: RetryPolicy,
    stats: GatewayStats,
    observer: Option<Arc<dyn GatewayObserver>>,
}

impl UpstreamGateway {
    pub fn new(
        client: Arc<dyn CatalogClient>,
        limiter: ConcurrencyLimiter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            limiter,
            retry,
            stats: GatewayStats::default(),
            observer: None,
        }
    }

    /// Report every call and outcome to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn GatewayObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn stats(&self) -> GatewayStatsSnapshot {
        self.stats.snapshot()
    }

    fn record(&self, counter: &AtomicU64, outcome: CallOutcome) {
        bump(counter);
        if let Some(o) = &self.observer {
            o.outcome(outcome);
        }
    }

    /// Fetch one product. `Ok(None)` means the catalog has no such product
    /// or returned a payload that could not be decoded.
    pub async fn fetch_one(&self, id: ProductId) -> FavcacheResult<Option<CachedProduct>> {
        let attempts = self.retry.attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = {
                let _permit = self.limiter.acquire().await.map_err(|e| {
                    FavcacheError::from(UpstreamError::Unexpected {
                        cause: CatalogError::Unexpected {
                            status: 0,
                            reason: format!("Concurrency limiter closed: {}", e),
                        },
                    })
                })?;
                let _scope = CallScope::enter(self.observer.as_deref());
                bump(&self.stats.calls);
                self.client.fetch_product(id).await
            };

            match outcome {
                Ok(Some(product)) => {
                    self.record(&self.stats.hits, CallOutcome::Hit);
                    debug!(product_id = id, attempt, "catalog hit");
                    return Ok(Some(product));
                }
                Ok(None) => {
                    self.record(&self.stats.not_found, CallOutcome::NotFound);
                    debug!(product_id = id, "catalog has no such product");
                    return Ok(None);
                }
                Err(cause) if cause.is_rate_limit() => {
                    self.record(&self.stats.rate_limited, CallOutcome::RateLimited);
                    if attempt >= attempts {
                        self.record(&self.stats.retry_exhausted, CallOutcome::RetryExhausted);
                        error!(product_id = id, attempts, %cause, "catalog retries exhausted");
                        return Err(UpstreamError::RetryExhausted {
                            attempts,
                            last_cause: cause,
                        }
                        .into());
                    }
                    let backoff = self.retry.delay_for(attempt - 1);
                    let retry_after_ms = match &cause {
                        CatalogError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
                        _ => None,
                    };
                    warn!(
                        product_id = id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        ?retry_after_ms,
                        %cause,
                        "catalog rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(CatalogError::Malformed { reason }) => {
                    self.record(&self.stats.malformed, CallOutcome::Malformed);
                    warn!(product_id = id, %reason, "malformed catalog payload");
                    return Ok(None);
                }
                Err(cause) => {
                    self.record(&self.stats.unexpected, CallOutcome::Unexpected);
                    error!(product_id = id, %cause, "unexpected catalog failure");
                    return Err(UpstreamError::Unexpected { cause }.into());
                }
            }
        }
    }

    /// Fetch many products concurrently. The result is positionally
    /// aligned with `ids`; the first failure fails the whole call.
    pub async fn fetch_many(
        &self,
        ids: &[ProductId],
    ) -> FavcacheResult<Vec<Option<CachedProduct>>> {
        try_join_all(ids.iter().map(|id| self.fetch_one(*id))).await
    }
}

impl std::fmt::Debug for UpstreamGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamGateway")
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    type Reply = Result<Option<CachedProduct>, CatalogError>;

    /// Replays queued replies per id; once a queue is drained its last
    /// reply repeats.
    #[derive(Default)]
    struct QueuedClient {
        replies: Mutex<HashMap<ProductId, VecDeque<Reply>>>,
        calls: AtomicU64,
        delay: Duration,
    }

    impl QueuedClient {
        fn with(id: ProductId, replies: Vec<Reply>) -> Self {
            let client = Self::default();
            client.replies.lock().unwrap().insert(id, replies.into());
            client
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogClient for QueuedClient {
        async fn fetch_product(&self, id: ProductId) -> Result<Option<CachedProduct>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut replies = self.replies.lock().unwrap();
            let queue = replies.entry(id).or_default();
            match queue.len() {
                0 => Ok(Some(product(id))),
                1 => queue.front().cloned().unwrap(),
                _ => queue.pop_front().unwrap(),
            }
        }
    }

    fn product(id: ProductId) -> CachedProduct {
        CachedProduct::new(id, format!("Product {}", id), "img", BigDecimal::from(id), None, Utc::now())
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(4))
    }

    fn gateway(client: Arc<QueuedClient>, capacity: usize, max_retries: u32) -> UpstreamGateway {
        UpstreamGateway::new(client, ConcurrencyLimiter::new(capacity), fast_policy(max_retries))
    }

    #[tokio::test]
    async fn test_hit_returns_product() {
        let client = Arc::new(QueuedClient::default());
        let gw = gateway(client.clone(), 2, 3);

        let found = gw.fetch_one(7).await.unwrap().unwrap();
        assert_eq!(found.id, 7);
        assert_eq!(client.calls(), 1);
        assert_eq!(gw.limiter().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_not_found_is_none() {
        let client = Arc::new(QueuedClient::with(9, vec![Ok(None)]));
        let gw = gateway(client, 2, 3);
        assert_eq!(gw.fetch_one(9).await.unwrap(), None);
        assert_eq!(gw.stats().not_found, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_then_success_retries() {
        let client = Arc::new(QueuedClient::with(
            1,
            vec![
                Err(CatalogError::RateLimited { retry_after_ms: 0 }),
                Err(CatalogError::Timeout),
                Ok(Some(product(1))),
            ],
        ));
        let gw = gateway(client.clone(), 1, 3);

        let found = gw.fetch_one(1).await.unwrap();
        assert!(found.is_some());
        assert_eq!(client.calls(), 3);
        assert_eq!(gw.stats().rate_limited, 2);
    }

    #[tokio::test]
    async fn test_retry_exhausted_wraps_last_cause() {
        let client = Arc::new(QueuedClient::with(1, vec![Err(CatalogError::Timeout)]));
        let gw = gateway(client.clone(), 1, 3);

        let err = gw.fetch_one(1).await.unwrap_err();
        assert_eq!(
            err,
            FavcacheError::Upstream(UpstreamError::RetryExhausted {
                attempts: 3,
                last_cause: CatalogError::Timeout,
            })
        );
        assert_eq!(client.calls(), 3);
        assert_eq!(gw.limiter().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_zero_retries_makes_single_attempt() {
        let client = Arc::new(QueuedClient::with(
            1,
            vec![Err(CatalogError::RateLimited { retry_after_ms: 10 })],
        ));
        let gw = gateway(client.clone(), 1, 0);

        let err = gw.fetch_one(1).await.unwrap_err();
        assert!(matches!(
            err,
            FavcacheError::Upstream(UpstreamError::RetryExhausted { attempts: 1, .. })
        ));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_swallowed() {
        let client = Arc::new(QueuedClient::with(
            4,
            vec![Err(CatalogError::Malformed {
                reason: "missing field `title`".to_string(),
            })],
        ));
        let gw = gateway(client.clone(), 1, 3);

        assert_eq!(gw.fetch_one(4).await.unwrap(), None);
        assert_eq!(client.calls(), 1);
        assert_eq!(gw.stats().malformed, 1);
    }

    #[tokio::test]
    async fn test_unexpected_error_not_retried() {
        let cause = CatalogError::Unexpected {
            status: 503,
            reason: "maintenance".to_string(),
        };
        let client = Arc::new(QueuedClient::with(2, vec![Err(cause.clone())]));
        let gw = gateway(client.clone(), 1, 5);

        let err = gw.fetch_one(2).await.unwrap_err();
        assert_eq!(err, FavcacheError::Upstream(UpstreamError::Unexpected { cause }));
        assert_eq!(client.calls(), 1);
        assert_eq!(gw.limiter().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_fetch_many_preserves_positions() {
        let client = Arc::new(QueuedClient::with(2, vec![Ok(None)]));
        let gw = gateway(client, 2, 3);

        let results = gw.fetch_many(&[3, 2, 1, 3]).await.unwrap();
        let ids: Vec<Option<ProductId>> = results.iter().map(|r| r.as_ref().map(|p| p.id)).collect();
        assert_eq!(ids, vec![Some(3), None, Some(1), Some(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_does_not_stretch_backoff() {
        let client = Arc::new(QueuedClient::with(
            1,
            vec![
                Err(CatalogError::RateLimited { retry_after_ms: 60_000 }),
                Ok(Some(product(1))),
            ],
        ));
        let gw = gateway(client.clone(), 1, 3);

        let started = tokio::time::Instant::now();
        assert!(gw.fetch_one(1).await.unwrap().is_some());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(client.calls(), 2);
    }

    /// Tallies observer callbacks per outcome.
    #[derive(Default)]
    struct CountingObserver {
        outcomes: Mutex<HashMap<CallOutcome, u64>>,
        live: AtomicU64,
        started: AtomicU64,
        finished: AtomicU64,
        peak: AtomicU64,
    }

    impl CountingObserver {
        fn count(&self, outcome: CallOutcome) -> u64 {
            self.outcomes.lock().unwrap().get(&outcome).copied().unwrap_or(0)
        }
    }

    impl GatewayObserver for CountingObserver {
        fn call_started(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(live, Ordering::SeqCst);
        }

        fn call_finished(&self) {
            self.finished.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_sub(1, Ordering::SeqCst);
        }

        fn outcome(&self, outcome: CallOutcome) {
            *self.outcomes.lock().unwrap().entry(outcome).or_default() += 1;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_observer_sees_each_event_once() {
        let mut replies = HashMap::new();
        replies.insert(2, VecDeque::from(vec![Ok(None)]));
        replies.insert(
            3,
            VecDeque::from(vec![Err(CatalogError::Malformed {
                reason: "bad".to_string(),
            })]),
        );
        replies.insert(
            4,
            VecDeque::from(vec![
                Err(CatalogError::Timeout),
                Ok(Some(product(4))),
            ]),
        );
        let client = Arc::new(QueuedClient {
            replies: Mutex::new(replies),
            delay: Duration::from_millis(2),
            ..QueuedClient::default()
        });
        let observer = Arc::new(CountingObserver::default());
        let gw = Arc::new(gateway(client, 2, 3).with_observer(observer.clone()));

        // Several concurrent callers sharing one gateway.
        let callers = (0..3).map(|_| {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move { gw.fetch_many(&[1, 2, 3, 4, 5]).await })
        });
        for handle in futures_util::future::join_all(callers).await {
            handle.unwrap().unwrap();
        }

        let stats = gw.stats();
        assert_eq!(observer.count(CallOutcome::Hit), stats.hits);
        assert_eq!(observer.count(CallOutcome::NotFound), stats.not_found);
        assert_eq!(observer.count(CallOutcome::Malformed), 3);
        assert_eq!(observer.count(CallOutcome::Malformed), stats.malformed);
        assert_eq!(observer.count(CallOutcome::RateLimited), stats.rate_limited);
        assert_eq!(observer.started.load(Ordering::SeqCst), stats.calls);
        assert_eq!(observer.finished.load(Ordering::SeqCst), stats.calls);
        assert_eq!(observer.live.load(Ordering::SeqCst), 0);
        assert!(observer.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancelled_call_still_reports_finish() {
        let client = Arc::new(QueuedClient {
            delay: Duration::from_secs(60),
            ..QueuedClient::default()
        });
        let observer = Arc::new(CountingObserver::default());
        let gw = gateway(client, 1, 3).with_observer(observer.clone());

        let timed_out = tokio::time::timeout(Duration::from_millis(10), gw.fetch_one(1)).await;
        assert!(timed_out.is_err());
        assert_eq!(observer.started.load(Ordering::SeqCst), 1);
        assert_eq!(observer.finished.load(Ordering::SeqCst), 1);
        assert_eq!(observer.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fetch_many_respects_limit() {
        let client = Arc::new(QueuedClient {
            delay: Duration::from_millis(10),
            ..QueuedClient::default()
        });
        let gw = gateway(client.clone(), 2, 3);

        let ids: Vec<ProductId> = (1..=10).collect();
        let results = gw.fetch_many(&ids).await.unwrap();

        assert_eq!(results.len(), 10);
        assert_eq!(client.calls(), 10);
        assert!(gw.limiter().high_water_mark() <= 2);
    }
}
