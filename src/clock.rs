// =============================================================================
// Clock & Scheduler — monotonic time source, cancellable timers, cancel scopes
// =============================================================================
//
// Cooldown and dedupe math must never observe wall-clock anomalies (NTP
// step, DST, leap seconds), so every duration comparison in this crate goes
// through `Clock::now()` (backed by `tokio::time::Instant`) rather than
// `chrono::Utc::now()`. Wall-clock timestamps are still produced — via
// `Clock::wall_now()` — but only for display and event payloads.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Monotonic time source. Cheaply cloneable; all clones share no state — the
/// clock itself is stateless, a thin wrapper so call sites read `clock.now()`
/// rather than reaching for `tokio::time::Instant::now()` directly, which
/// keeps every timing decision swappable in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock;

impl Clock {
    pub fn new() -> Self {
        Self
    }

    /// Monotonic instant, suitable for cooldown/TTL/dedupe math.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Wall-clock timestamp for display and event payloads only.
    pub fn wall_now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    /// A single-fire cancellable timer.
    pub fn after(&self, duration: Duration) -> Timer {
        Timer { duration }
    }

    /// A periodic tick source. Call `.tick().await` in a loop; ticks are not
    /// queued — a slow consumer simply sees the next tick arrive late.
    pub fn ticker(&self, period: Duration) -> Ticker {
        Ticker {
            interval: tokio::time::interval(period),
        }
    }

    /// Create a root cancellation scope.
    pub fn scope(&self) -> CancelScope {
        CancelScope::root()
    }
}

/// A single-fire delay. Consumed by `.wait()`, which resolves early if the
/// owning scope is cancelled.
pub struct Timer {
    duration: Duration,
}

impl Timer {
    /// Wait out the duration, or return early if `scope` is cancelled first.
    /// Returns `true` if the full duration elapsed, `false` if cancelled.
    pub async fn wait(self, scope: &CancelScope) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => true,
            _ = scope.cancelled() => false,
        }
    }
}

/// A periodic tick source wrapping `tokio::time::Interval`.
pub struct Ticker {
    interval: tokio::time::Interval,
}

impl Ticker {
    /// Wait for the next tick, or return `None` if `scope` is cancelled first.
    pub async fn tick(&mut self, scope: &CancelScope) -> Option<Instant> {
        tokio::select! {
            instant = self.interval.tick() => Some(instant),
            _ = scope.cancelled() => None,
        }
    }
}

/// A cooperative cancellation scope. Cancelling a parent cancels every child
/// scope derived from it via `child()`. Dropping the last handle to a scope
/// does not cancel it — cancellation is explicit, via `cancel()`.
#[derive(Debug, Clone)]
pub struct CancelScope {
    token: CancellationToken,
}

impl CancelScope {
    fn root() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Derive a child scope. Cancelling `self` cancels the child; cancelling
    /// the child does not affect `self` or siblings.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once this scope (or an ancestor) is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// A one-shot latch used by the shutdown sequencer (§5) to know when a
/// long-running task has actually finished its current iteration, distinct
/// from merely having observed cancellation.
#[derive(Debug, Clone)]
pub struct Drained {
    notify: Arc<Notify>,
}

impl Drained {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn signal(&self) {
        self.notify.notify_waiters();
    }

    pub async fn wait(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

impl Default for Drained {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timer_completes_when_not_cancelled() {
        let clock = Clock::new();
        let scope = clock.scope();
        let completed = clock.after(Duration::from_millis(5)).wait(&scope).await;
        assert!(completed);
    }

    #[tokio::test]
    async fn timer_short_circuits_on_cancel() {
        let clock = Clock::new();
        let scope = clock.scope();
        scope.cancel();
        let completed = clock.after(Duration::from_secs(30)).wait(&scope).await;
        assert!(!completed);
    }

    #[tokio::test]
    async fn child_scope_cancelled_by_parent() {
        let clock = Clock::new();
        let parent = clock.scope();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        child.cancelled().await;
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn cancelling_child_does_not_cancel_parent() {
        let clock = Clock::new();
        let parent = clock.scope();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn ticker_stops_yielding_after_cancel() {
        let clock = Clock::new();
        let scope = clock.scope();
        let mut ticker = clock.ticker(Duration::from_millis(5));
        assert!(ticker.tick(&scope).await.is_some());
        scope.cancel();
        assert!(ticker.tick(&scope).await.is_none());
    }
}
