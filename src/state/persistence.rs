// Durable-backing adapter for the Memory Store (§4.2).
//
// Stub mode: no real network connection. Checkpoints are written as JSONL
// snapshots on an interval and the store can be restored from the latest
// snapshot on startup. A production deployment would swap the body of
// `checkpoint_loop`/`restore` for real calls against whatever store backs
// this (a `redis` client with `tokio-comp`, or a managed KV service) —
// the method signatures and buffering contract below are what stays fixed.
//
// Key layout this stub approximates (documented for the real client):
//   fraud:user:{id}          -> serialized UserReputation      TTL 24h
//   fraud:ip:{addr}          -> serialized IpReputation        TTL 7d
//   fraud:seen:{order_id}    -> serialized DecisionRecord      TTL 10min

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PendingWrite {
    UserFlag { user_id: String, payload: String },
    IpFlag { ip: String, payload: String },
    Decision { order_id: String, payload: String },
}

/// Bounded write buffer used when the backing store is (or is modeled as)
/// unreachable (§4.2 invariant: buffer-full drops oldest write, increments
/// a loss counter).
pub struct WriteBuffer {
    queue: Mutex<VecDeque<PendingWrite>>,
    capacity: usize,
    pub dropped: AtomicU64,
}

impl WriteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn enqueue(&self, write: PendingWrite) {
        let mut q = self.queue.lock();
        if q.len() >= self.capacity {
            q.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("persistence write buffer full, dropped oldest write");
        }
        q.push_back(write);
    }

    pub fn drain(&self) -> Vec<PendingWrite> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub snapshot_path: PathBuf,
    pub checkpoint_interval_secs: u64,
    pub buffer_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("out/memory_checkpoint.jsonl"),
            checkpoint_interval_secs: 30,
            buffer_capacity: 10_000,
        }
    }
}

pub struct Persistence {
    config: PersistenceConfig,
    pub buffer: WriteBuffer,
}

impl Persistence {
    pub fn new(config: PersistenceConfig) -> Self {
        let buffer = WriteBuffer::new(config.buffer_capacity);
        Self { config, buffer }
    }

    /// Flushes the buffered writes to the snapshot file. In a real
    /// deployment this flushes to the backing KV store instead.
    pub async fn flush(&self) -> Result<usize> {
        let writes = self.buffer.drain();
        if writes.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = self.config.snapshot_path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let mut out = String::new();
        for w in &writes {
            out.push_str(&serde_json::to_string(w)?);
            out.push('\n');
        }
        use tokio::io::AsyncWriteExt;
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.snapshot_path)
            .await?;
        f.write_all(out.as_bytes()).await?;
        Ok(writes.len())
    }

    pub async fn checkpoint_loop(self: std::sync::Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.config.checkpoint_interval_secs,
        ));
        loop {
            ticker.tick().await;
            match self.flush().await {
                Ok(0) => {}
                Ok(n) => info!("persistence: flushed {} buffered writes", n),
                Err(e) => warn!("persistence: checkpoint flush failed: {}", e),
            }
        }
    }
}
