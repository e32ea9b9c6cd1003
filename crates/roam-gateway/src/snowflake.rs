use std::sync::Mutex;

use anyhow::{Context, anyhow};
use futures_util::future::BoxFuture;

use roam_types::models::{EPOCH_MS, Snowflake, TIMESTAMP_SHIFT};

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

/// Source of unique, monotonically increasing ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> BoxFuture<'_, anyhow::Result<Snowflake>>;
}

/// In-process generator: `ms since epoch | worker | sequence`.
pub struct SnowflakeGenerator {
    worker_id: i64,
    /// (last millisecond used, sequence within it)
    state: Mutex<(i64, i64)>,
}

impl SnowflakeGenerator {
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: i64::from(worker_id) & ((1 << WORKER_BITS) - 1),
            state: Mutex::new((0, 0)),
        }
    }

    pub fn generate(&self) -> Snowflake {
        self.generate_at(chrono::Utc::now().timestamp_millis() - EPOCH_MS)
    }

    /// Next id given the current offset from the epoch. If the clock has
    /// not moved past the last id (or went backwards), the next
    /// millisecond is borrowed once the sequence is spent.
    fn generate_at(&self, now_ms: i64) -> Snowflake {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (last_ms, seq) = *state;

        let (ms, seq) = if now_ms > last_ms {
            (now_ms, 0)
        } else if seq < SEQUENCE_MASK {
            (last_ms, seq + 1)
        } else {
            (last_ms + 1, 0)
        };
        *state = (ms, seq);

        (ms << TIMESTAMP_SHIFT) | (self.worker_id << SEQUENCE_BITS) | seq
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn next_id(&self) -> BoxFuture<'_, anyhow::Result<Snowflake>> {
        Box::pin(async move { Ok(self.generate()) })
    }
}

/// Ids from the external snowflake service: `GET <url>` returning
/// `{"snowflake": "<int>"}`.
pub struct HttpSnowflake {
    client: reqwest::Client,
    url: String,
}

impl HttpSnowflake {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl IdGenerator for HttpSnowflake {
    fn next_id(&self) -> BoxFuture<'_, anyhow::Result<Snowflake>> {
        Box::pin(async move {
            let body: serde_json::Value = self
                .client
                .get(&self.url)
                .send()
                .await
                .context("snowflake service unreachable")?
                .error_for_status()?
                .json()
                .await?;

            match &body["snowflake"] {
                serde_json::Value::String(s) => Ok(s.parse()?),
                serde_json::Value::Number(n) => n
                    .as_i64()
                    .ok_or_else(|| anyhow!("snowflake out of range: {}", n)),
                other => Err(anyhow!("unexpected snowflake payload: {}", other)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roam_types::models::snowflake_timestamp;

    #[test]
    fn test_ids_embed_time_and_worker() {
        let g = SnowflakeGenerator::new(5);
        let id = g.generate_at(1000);
        assert_eq!(id >> TIMESTAMP_SHIFT, 1000);
        assert_eq!((id >> SEQUENCE_BITS) & 0x3ff, 5);
        assert_eq!(snowflake_timestamp(id).timestamp_millis(), EPOCH_MS + 1000);
    }

    #[test]
    fn test_same_millisecond_uses_sequence() {
        let g = SnowflakeGenerator::new(0);
        let a = g.generate_at(7);
        let b = g.generate_at(7);
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_monotonic_across_overflow_and_clock_skew() {
        let g = SnowflakeGenerator::new(1);
        let mut last = g.generate_at(50);
        for _ in 0..(SEQUENCE_MASK + 10) {
            let id = g.generate_at(50);
            assert!(id > last);
            last = id;
        }
        // Clock stepped backwards.
        let id = g.generate_at(10);
        assert!(id > last);
    }

    #[tokio::test]
    async fn test_generator_trait() {
        let g = SnowflakeGenerator::new(0);
        let a = g.next_id().await.unwrap();
        let b = g.next_id().await.unwrap();
        assert!(b > a);
    }
}
