use super::*;
use crate::events::PixelUpdate;
use crate::store::{MemoryStore, WindowSnapshot};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Store wrapper that fails (or hangs) every throttle-related call while
/// the corresponding flag is set.
struct FlakyStore {
    inner: MemoryStore,
    fail: AtomicBool,
    hang: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::default(),
            fail: AtomicBool::new(false),
            hang: AtomicBool::new(false),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    fn set_hanging(&self, hanging: bool) {
        self.hang.store(hanging, Ordering::SeqCst);
    }

    async fn throttle_fault(&self) -> Result<()> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::persistence("injected throttle failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl CanvasStore for FlakyStore {
    async fn fetch_canvas(&self) -> Result<Vec<u8>> {
        self.inner.fetch_canvas().await
    }

    async fn store_canvas(&self, buffer: &[u8]) -> Result<()> {
        self.inner.store_canvas(buffer).await
    }

    async fn set_cell(&self, bit_offset: u64, color: u8) -> Result<()> {
        self.inner.set_cell(bit_offset, color).await
    }

    async fn version(&self) -> Result<u64> {
        self.inner.version().await
    }

    async fn bump_version(&self) -> Result<u64> {
        self.inner.bump_version().await
    }

    async fn cooldown_remaining_ms(&self, writer_id: &str) -> Result<Option<u64>> {
        self.throttle_fault().await?;
        self.inner.cooldown_remaining_ms(writer_id).await
    }

    async fn set_cooldown(&self, writer_id: &str, ttl: Duration) -> Result<()> {
        self.throttle_fault().await?;
        self.inner.set_cooldown(writer_id, ttl).await
    }

    async fn window_count(&self, bucket: &str, window_start_ms: u64) -> Result<WindowSnapshot> {
        self.throttle_fault().await?;
        self.inner.window_count(bucket, window_start_ms).await
    }

    async fn record_window_entry(
        &self,
        bucket: &str,
        timestamp_ms: u64,
        member: &str,
        ttl: Duration,
    ) -> Result<()> {
        self.throttle_fault().await?;
        self.inner
            .record_window_entry(bucket, timestamp_ms, member, ttl)
            .await
    }

    async fn publish_update(&self, update: &PixelUpdate) -> Result<usize> {
        self.inner.publish_update(update).await
    }

    fn subscribe_updates(&self) -> broadcast::Receiver<PixelUpdate> {
        self.inner.subscribe_updates()
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

fn memory_store() -> Arc<dyn CanvasStore> {
    Arc::new(MemoryStore::default())
}

// ============================================================================
// Cooldown gate
// ============================================================================

#[tokio::test]
async fn test_cooldown_allows_when_clear() {
    let gate = CooldownGate::new(memory_store(), Duration::from_secs(30));

    let status = gate.check("w1").await.unwrap();
    assert!(status.allowed);
    assert_eq!(status.remaining_ms, 0);
}

#[tokio::test]
async fn test_cooldown_blocks_until_expiry() {
    let gate = CooldownGate::new(memory_store(), Duration::from_millis(50));

    gate.arm("w1").await.unwrap();

    let status = gate.check("w1").await.unwrap();
    assert!(!status.allowed);
    assert!(status.remaining_ms > 0 && status.remaining_ms <= 50);

    tokio::time::sleep(Duration::from_millis(60)).await;

    let status = gate.check("w1").await.unwrap();
    assert!(status.allowed);
}

#[tokio::test]
async fn test_cooldown_is_per_writer() {
    let gate = CooldownGate::new(memory_store(), Duration::from_secs(30));

    gate.arm("w1").await.unwrap();

    assert!(!gate.check("w1").await.unwrap().allowed);
    assert!(gate.check("w2").await.unwrap().allowed);
}

#[tokio::test]
async fn test_cooldown_arm_for_overrides_ttl() {
    let gate = CooldownGate::new(memory_store(), Duration::from_secs(3600));

    gate.arm_for("w1", Duration::from_millis(50)).await.unwrap();

    let status = gate.check("w1").await.unwrap();
    assert!(!status.allowed);
    assert!(status.remaining_ms <= 50);
}

#[tokio::test]
async fn test_cooldown_fails_open_on_store_error() {
    let store = Arc::new(FlakyStore::new());
    store.set_failing(true);
    let gate = CooldownGate::new(store, Duration::from_secs(30));

    let status = gate.check("w1").await.unwrap();
    assert!(status.allowed);

    // Arming is also absorbed.
    gate.arm("w1").await.unwrap();
}

#[tokio::test]
async fn test_cooldown_fail_closed_propagates() {
    let store = Arc::new(FlakyStore::new());
    store.set_failing(true);
    let gate = CooldownGate::new(store, Duration::from_secs(30)).with_fail_open(false);

    let result = gate.check("w1").await;
    assert!(matches!(result, Err(Error::PersistenceUnavailable { .. })));

    let result = gate.arm("w1").await;
    assert!(matches!(result, Err(Error::PersistenceUnavailable { .. })));
}

// ============================================================================
// Sliding window
// ============================================================================

#[tokio::test]
async fn test_window_counts_down_then_denies() {
    let limiter = RateLimiter::new(
        memory_store(),
        "pixel",
        RateLimitConfig::new(3, Duration::from_secs(10)),
    );

    let first = limiter.acquire("w1").await.unwrap();
    assert!(first.allowed);
    assert_eq!(first.remaining, 2);
    assert_eq!(first.reset_in_seconds, 10);
    assert_eq!(first.limit, 3);

    assert_eq!(limiter.acquire("w1").await.unwrap().remaining, 1);
    assert_eq!(limiter.acquire("w1").await.unwrap().remaining, 0);

    let denied = limiter.acquire("w1").await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.limit, 3);
    assert!(denied.reset_in_seconds >= 1 && denied.reset_in_seconds <= 10);
}

#[tokio::test]
async fn test_window_denied_attempt_is_not_recorded() {
    let store: Arc<dyn CanvasStore> = Arc::new(MemoryStore::default());
    let limiter = RateLimiter::new(
        Arc::clone(&store),
        "pixel",
        RateLimitConfig::new(2, Duration::from_secs(10)),
    );

    limiter.acquire("w1").await.unwrap();
    limiter.acquire("w1").await.unwrap();
    assert!(!limiter.acquire("w1").await.unwrap().allowed);
    assert!(!limiter.acquire("w1").await.unwrap().allowed);

    // Still exactly two entries: probing a full window never extends it.
    let snapshot = store.window_count("pixel:w1", 0).await.unwrap();
    assert_eq!(snapshot.count, 2);
}

#[tokio::test]
async fn test_window_slides() {
    let limiter = RateLimiter::new(
        memory_store(),
        "pixel",
        RateLimitConfig::new(1, Duration::from_millis(100)),
    );

    assert!(limiter.acquire("w1").await.unwrap().allowed);
    assert!(!limiter.acquire("w1").await.unwrap().allowed);

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(limiter.acquire("w1").await.unwrap().allowed);
}

#[tokio::test]
async fn test_window_keys_are_independent() {
    let limiter = RateLimiter::new(
        memory_store(),
        "pixel",
        RateLimitConfig::new(1, Duration::from_secs(10)),
    );

    assert!(limiter.acquire("w1").await.unwrap().allowed);
    assert!(!limiter.acquire("w1").await.unwrap().allowed);
    assert!(limiter.acquire("w2").await.unwrap().allowed);
}

#[tokio::test]
async fn test_window_scopes_are_independent() {
    let store: Arc<dyn CanvasStore> = Arc::new(MemoryStore::default());
    let config = RateLimitConfig::new(1, Duration::from_secs(10));
    let pixel = RateLimiter::new(Arc::clone(&store), "pixel", config.clone());
    let global = RateLimiter::new(Arc::clone(&store), "global", config);

    assert!(pixel.acquire("w1").await.unwrap().allowed);
    assert!(!pixel.acquire("w1").await.unwrap().allowed);

    // Same key, different scope: untouched window.
    assert!(global.acquire("w1").await.unwrap().allowed);
}

#[tokio::test]
async fn test_window_fails_open_with_full_allowance() {
    let store = Arc::new(FlakyStore::new());
    store.set_failing(true);
    let limiter = RateLimiter::new(store, "pixel", RateLimitConfig::new(5, Duration::from_secs(60)));

    let decision = limiter.acquire("w1").await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 5);
    assert_eq!(decision.reset_in_seconds, 60);
    assert_eq!(decision.limit, 5);
}

#[tokio::test]
async fn test_window_fails_open_on_store_hang() {
    let store = Arc::new(FlakyStore::new());
    store.set_hanging(true);
    let limiter = RateLimiter::new(
        store,
        "pixel",
        RateLimitConfig::new(5, Duration::from_secs(60))
            .with_store_timeout(Duration::from_millis(50)),
    );

    // The deadline converts the hang into a store failure, which the
    // fail-open policy then absorbs.
    let decision = limiter.acquire("w1").await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 5);
}

#[tokio::test]
async fn test_cooldown_hang_fail_closed_is_a_timeout() {
    let store = Arc::new(FlakyStore::new());
    store.set_hanging(true);
    let gate = CooldownGate::new(store, Duration::from_secs(30))
        .with_fail_open(false)
        .with_store_timeout(Duration::from_millis(50));

    let result = gate.check("w1").await;
    assert!(matches!(result, Err(Error::Timeout { .. })));
}

#[tokio::test]
async fn test_window_fail_closed_propagates() {
    let store = Arc::new(FlakyStore::new());
    store.set_failing(true);
    let limiter = RateLimiter::new(
        store,
        "pixel",
        RateLimitConfig::new(5, Duration::from_secs(60)).with_fail_open(false),
    );

    let result = limiter.acquire("w1").await;
    assert!(matches!(result, Err(Error::PersistenceUnavailable { .. })));
}

#[tokio::test]
async fn test_window_recovers_after_store_comes_back() {
    let store = Arc::new(FlakyStore::new());
    let limiter = RateLimiter::new(
        Arc::clone(&store) as Arc<dyn CanvasStore>,
        "pixel",
        RateLimitConfig::new(1, Duration::from_secs(10)),
    );

    assert!(limiter.acquire("w1").await.unwrap().allowed);
    assert!(!limiter.acquire("w1").await.unwrap().allowed);

    // While the store is down everything is allowed...
    store.set_failing(true);
    assert!(limiter.acquire("w1").await.unwrap().allowed);

    // ...and the old window still stands once it recovers.
    store.set_failing(false);
    assert!(!limiter.acquire("w1").await.unwrap().allowed);
}

// ============================================================================
// Strategy wrapper
// ============================================================================

#[tokio::test]
async fn test_throttle_cooldown_admit_and_commit() {
    let throttle = Throttle::Cooldown(CooldownGate::new(memory_store(), Duration::from_secs(30)));

    throttle.admit("w1").await.unwrap();
    // Admit alone never arms the clock.
    throttle.admit("w1").await.unwrap();

    throttle.commit("w1", None).await.unwrap();

    let denied = throttle.admit("w1").await;
    match denied {
        Err(Error::CooldownActive { remaining_ms }) => {
            assert!(remaining_ms > 0 && remaining_ms <= 30_000);
        }
        other => panic!("expected CooldownActive, got {other:?}"),
    }
}

#[tokio::test]
async fn test_throttle_cooldown_commit_honors_override() {
    let throttle = Throttle::Cooldown(CooldownGate::new(memory_store(), Duration::from_secs(3600)));

    throttle.admit("w1").await.unwrap();
    throttle
        .commit("w1", Some(Duration::from_millis(50)))
        .await
        .unwrap();

    assert!(throttle.admit("w1").await.is_err());
    tokio::time::sleep(Duration::from_millis(60)).await;
    throttle.admit("w1").await.unwrap();
}

#[tokio::test]
async fn test_throttle_window_admit_records_immediately() {
    let throttle = Throttle::Window(RateLimiter::new(
        memory_store(),
        "pixel",
        RateLimitConfig::new(1, Duration::from_secs(10)),
    ));

    throttle.admit("w1").await.unwrap();

    let denied = throttle.admit("w1").await;
    match denied {
        Err(Error::RateLimited {
            retry_after_seconds,
        }) => assert!(retry_after_seconds >= 1),
        other => panic!("expected RateLimited, got {other:?}"),
    }

    // Commit is a no-op for windows.
    throttle.commit("w1", None).await.unwrap();
}

#[test]
fn test_throttle_retry_hints() {
    let cooldown = Throttle::Cooldown(CooldownGate::new(memory_store(), Duration::from_secs(30)));
    assert_eq!(cooldown.retry_hint_seconds(None), 30);
    assert_eq!(
        cooldown.retry_hint_seconds(Some(Duration::from_secs(5))),
        5
    );

    let window = Throttle::Window(RateLimiter::new(
        memory_store(),
        "pixel",
        RateLimitConfig::new(1, Duration::from_secs(1800)),
    ));
    assert_eq!(window.retry_hint_seconds(None), 1800);
}
