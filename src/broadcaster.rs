// =============================================================================
// Event Broadcaster (C6)
// =============================================================================
//
// A dedupe + jitter + topic fan-out bus. Three topic pools: `default` (every
// connected client), `strategy-updates` (opt-in), `recommendations`
// (implicitly everyone, same as `default` here since recommendation events
// are the primary payload this service produces).
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::RealtimeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Default,
    StrategyUpdates,
    Recommendations,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub ts: chrono::DateTime<Utc>,
    pub event: String,
    pub key: String,
    pub data: serde_json::Value,
}

/// A subscriber's lagging behind the channel capacity drops its own pending
/// items rather than blocking or disconnecting peers — matches §4.6's
/// "per-subscriber send failures log and drop that subscriber's pending item
/// without blocking others".
const CHANNEL_CAPACITY: usize = 1024;

pub struct Broadcaster {
    default_tx: broadcast::Sender<BroadcastEvent>,
    strategy_tx: broadcast::Sender<BroadcastEvent>,
    recommendations_tx: broadcast::Sender<BroadcastEvent>,
    last_broadcast: DashMap<String, Instant>,
    dedupe_enabled: bool,
    dedupe_window: Duration,
    jitter_enabled: bool,
    jitter_max: Duration,
    snapshot_enabled: bool,
    snapshot_dir: String,
    clock: Clock,
    sequence: AtomicU64,
}

impl Broadcaster {
    pub fn new(cfg: &RealtimeConfig, clock: Clock) -> Self {
        let (default_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (strategy_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (recommendations_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            default_tx,
            strategy_tx,
            recommendations_tx,
            last_broadcast: DashMap::new(),
            dedupe_enabled: cfg.dedupe_enabled,
            dedupe_window: Duration::from_millis(cfg.dedupe_window_ms),
            jitter_enabled: cfg.jitter_enabled,
            jitter_max: Duration::from_millis(cfg.jitter_max_ms),
            snapshot_enabled: cfg.snapshot_enabled,
            snapshot_dir: cfg.snapshot_dir.clone(),
            clock,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<BroadcastEvent> {
        match topic {
            Topic::Default => self.default_tx.subscribe(),
            Topic::StrategyUpdates => self.strategy_tx.subscribe(),
            Topic::Recommendations => self.recommendations_tx.subscribe(),
        }
    }

    /// Publish an event keyed by `key` (e.g. `"{symbol}:{direction}"`). Dedupe
    /// and jitter are applied before fan-out; the caller does not block on
    /// jitter since emission is spawned off.
    pub async fn publish(self: &Arc<Self>, event: &str, key: &str, data: serde_json::Value, topic: Topic) {
        self.publish_at(event, key, data, topic, self.clock.now()).await
    }

    async fn publish_at(self: &Arc<Self>, event: &str, key: &str, data: serde_json::Value, topic: Topic, now: Instant) {
        let dedupe_key = format!("{event}:{key}");
        if self.dedupe_enabled {
            if let Some(last) = self.last_broadcast.get(&dedupe_key) {
                if now.saturating_duration_since(*last) < self.dedupe_window {
                    debug!(event, key, "broadcast suppressed by dedupe window");
                    return;
                }
            }
        }
        self.last_broadcast.insert(dedupe_key, now);

        let payload = BroadcastEvent {
            ts: self.clock.wall_now(),
            event: event.to_string(),
            key: key.to_string(),
            data,
        };

        if self.jitter_enabled && self.jitter_max > Duration::ZERO {
            let delay_ms = rand::thread_rng().gen_range(0..=self.jitter_max.as_millis() as u64);
            let this = Arc::clone(self);
            let topic_copy = topic;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                this.emit(topic_copy, payload).await;
            });
        } else {
            self.emit(topic, payload).await;
        }
    }

    async fn emit(&self, topic: Topic, event: BroadcastEvent) {
        let tx = match topic {
            Topic::Default => &self.default_tx,
            Topic::StrategyUpdates => &self.strategy_tx,
            Topic::Recommendations => &self.recommendations_tx,
        };
        // `send` only fails when there are no receivers; that's a routine
        // state (no clients connected), not an error worth logging.
        let _ = tx.send(event.clone());

        if self.snapshot_enabled {
            if let Err(e) = self.append_snapshot(&event).await {
                warn!(error = %e, "failed to append broadcast event to snapshot file");
            }
        }
    }

    async fn append_snapshot(&self, event: &BroadcastEvent) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.snapshot_dir).await?;
        let filename = format!("reco_{}.ndjson", event.ts.format("%Y-%m-%d"));
        let path = std::path::Path::new(&self.snapshot_dir).join(filename);

        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
        let line = serde_json::to_string(event).unwrap_or_default();
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(dedupe_window_ms: u64) -> RealtimeConfig {
        RealtimeConfig {
            dedupe_enabled: true,
            dedupe_window_ms,
            jitter_enabled: false,
            jitter_max_ms: 0,
            snapshot_enabled: false,
            snapshot_dir: "snapshots".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_within_window_is_dropped() {
        let broadcaster = Arc::new(Broadcaster::new(&cfg(2000), Clock::new()));
        let mut rx = broadcaster.subscribe(Topic::Default);

        let now = Instant::now();
        broadcaster.publish_at("recommendation-created", "BTCUSDT:LONG", serde_json::json!({}), Topic::Default, now).await;
        broadcaster.publish_at("recommendation-created", "BTCUSDT:LONG", serde_json::json!({}), Topic::Default, now + Duration::from_millis(1500)).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn event_after_window_elapses_is_delivered() {
        let broadcaster = Arc::new(Broadcaster::new(&cfg(2000), Clock::new()));
        let mut rx = broadcaster.subscribe(Topic::Default);

        let now = Instant::now();
        broadcaster.publish_at("recommendation-created", "BTCUSDT:LONG", serde_json::json!({}), Topic::Default, now).await;
        broadcaster.publish_at("recommendation-created", "BTCUSDT:LONG", serde_json::json!({}), Topic::Default, now + Duration::from_millis(2100)).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_never_suppressed() {
        let broadcaster = Arc::new(Broadcaster::new(&cfg(2000), Clock::new()));
        let mut rx = broadcaster.subscribe(Topic::Default);

        let now = Instant::now();
        broadcaster.publish_at("recommendation-created", "BTCUSDT:LONG", serde_json::json!({}), Topic::Default, now).await;
        broadcaster.publish_at("recommendation-created", "ETHUSDT:LONG", serde_json::json!({}), Topic::Default, now).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn strategy_updates_topic_isolated_from_default() {
        let broadcaster = Arc::new(Broadcaster::new(&cfg(0), Clock::new()));
        let mut default_rx = broadcaster.subscribe(Topic::Default);
        let mut strategy_rx = broadcaster.subscribe(Topic::StrategyUpdates);

        broadcaster.publish("strategy-update", "BTCUSDT", serde_json::json!({}), Topic::StrategyUpdates).await;

        assert!(strategy_rx.try_recv().is_ok());
        assert!(default_rx.try_recv().is_err());
    }
}
