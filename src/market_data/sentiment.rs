// =============================================================================
// Sentiment Monitor — Crypto Fear & Greed Index
// =============================================================================
//
// Fetches the daily Fear & Greed Index from alternative.me. The gateway wraps
// this in its own 5-minute cache (see `gateway.rs`); this module only knows
// how to fetch and classify a single reading.
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentState {
    pub value: f64,
    pub classification: String,
    pub source: String,
}

pub struct SentimentMonitor {
    client: reqwest::Client,
}

impl SentimentMonitor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client for SentimentMonitor"),
        }
    }

    pub async fn fetch(&self) -> Result<SentimentState> {
        let url = "https://api.alternative.me/fng/?limit=1";

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("GET fear & greed index")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse fear & greed response body")?;

        if !status.is_success() {
            anyhow::bail!("fear & greed API returned {}: {}", status, body);
        }

        let entry = body["data"]
            .as_array()
            .and_then(|arr| arr.first())
            .context("fear & greed response missing data[0]")?;

        let value: f64 = entry["value"]
            .as_str()
            .unwrap_or("50")
            .parse()
            .unwrap_or(50.0);

        let classification = classify(value);

        let state = SentimentState {
            value,
            classification: classification.to_string(),
            source: "alternative.me".to_string(),
        };

        debug!(value, classification, "sentiment index fetched");
        Ok(state)
    }
}

impl Default for SentimentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(value: f64) -> &'static str {
    if value < 25.0 {
        "EXTREME_FEAR"
    } else if value < 45.0 {
        "FEAR"
    } else if value < 55.0 {
        "NEUTRAL"
    } else if value < 75.0 {
        "GREED"
    } else {
        "EXTREME_GREED"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(0.0), "EXTREME_FEAR");
        assert_eq!(classify(24.9), "EXTREME_FEAR");
        assert_eq!(classify(25.0), "FEAR");
        assert_eq!(classify(44.9), "FEAR");
        assert_eq!(classify(45.0), "NEUTRAL");
        assert_eq!(classify(54.9), "NEUTRAL");
        assert_eq!(classify(55.0), "GREED");
        assert_eq!(classify(74.9), "GREED");
        assert_eq!(classify(75.0), "EXTREME_GREED");
        assert_eq!(classify(100.0), "EXTREME_GREED");
    }
}
