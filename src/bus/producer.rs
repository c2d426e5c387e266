// Output bus producer (§6): publishes decision records to
// `transactions.decisions`, keyed by `user_id`. Stub mode — no real broker
// connection. A production deployment would swap `flush_loop`'s body for a
// real `rdkafka::producer::FutureProducer::send` call; the queue/backoff
// contract below (bounded queue, drop-oldest-on-full) stays the same.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use parking_lot::Mutex;
use tracing::warn;

use crate::events::DecisionRecord;

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub topic: String,
    pub max_queue: usize,
    pub sink_path: PathBuf,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            topic: "transactions.decisions".to_string(),
            max_queue: 10_000,
            sink_path: PathBuf::from("out/transactions.decisions.jsonl"),
        }
    }
}

struct Message {
    key: String,
    payload: String,
}

pub struct DecisionProducer {
    config: ProducerConfig,
    queue: Mutex<VecDeque<Message>>,
    pub published: AtomicU64,
    pub dropped: AtomicU64,
}

impl DecisionProducer {
    pub fn new(config: ProducerConfig) -> Self {
        Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, record: &DecisionRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let mut q = self.queue.lock();
        if q.len() >= self.config.max_queue {
            q.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("decision producer queue full, dropped oldest message");
        }
        q.push_back(Message { key: record.user_id.clone(), payload });
        Ok(())
    }

    pub async fn flush_loop(self: std::sync::Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(500));
        loop {
            ticker.tick().await;
            let batch: Vec<Message> = {
                let mut q = self.queue.lock();
                q.drain(..).collect()
            };
            if batch.is_empty() {
                continue;
            }
            if let Some(parent) = self.config.sink_path.parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            let mut out = String::new();
            for m in &batch {
                // real impl: producer.send(FutureRecord::to(&self.config.topic).key(&m.key).payload(&m.payload))
                out.push_str(&m.payload);
                out.push('\n');
            }
            use tokio::io::AsyncWriteExt;
            if let Ok(mut f) = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.config.sink_path)
                .await
            {
                let _ = f.write_all(out.as_bytes()).await;
            }
            self.published.fetch_add(batch.len() as u64, Ordering::Relaxed);
        }
    }
}
