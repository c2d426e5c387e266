// fraud-orchestrator/src/main.rs
//
// Streaming fraud detection pipeline.
//
// Two operational modes:
//   tail    — tail a JSONL transaction log file (local dev / staging)
//   replay  — replay a captured log at scaled speed, honoring recorded
//             timestamps (testing / scenario replay)
//
// Usage:
//   fraud-orchestrator --mode tail --path transactions.input.jsonl
//   fraud-orchestrator --mode replay --path captured.jsonl --speed 10.0

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod agents;
mod bus;
mod config;
mod detectors;
mod engine;
mod errors;
mod events;
mod guards;
mod health;
mod metrics;
mod sink;
mod state;
mod vector_kb;

use agents::llm_client::LlmClient;
use bus::consumer::{replay_jsonl, tail_jsonl};
use bus::producer::{DecisionProducer, ProducerConfig};
use config::{Cli, Config, Mode};
use detectors::ml::{MlDetector, StandInIsolationForest};
use engine::Orchestrator;
use events::InputItem;
use guards::ResourceGuards;
use health::{HealthServer, Readiness};
use metrics::Metrics;
use sink::DurableSink;
use state::persistence::{Persistence, PersistenceConfig};
use state::MemoryStore;
use vector_kb::VectorKb;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("fraud_orchestrator=info".parse()?),
        )
        .compact()
        .init();

    let cli = Cli::parse();

    // Fatal startup (exit 1): the mandatory input source has to exist
    // before anything else stands up.
    if tokio::fs::metadata(&cli.path).await.is_err() {
        error!(path = %cli.path.display(), "input path does not exist, cannot start");
        std::process::exit(1);
    }

    let config = Arc::new(Config::default());

    let memory = Arc::new(MemoryStore::new(config.velocity_window_secs, config.seen_set_ttl_secs));
    let kb = Arc::new(VectorKb::new());
    kb.seed();
    let ml = Arc::new(MlDetector::new(Arc::new(StandInIsolationForest)));
    let guards = Arc::new(ResourceGuards::new(&config));
    let llm = Arc::new(LlmClient::new(config.llm_api_key.clone()));
    let metrics = Arc::new(Metrics::default());
    let readiness = Arc::new(Readiness::default());

    let persistence = Arc::new(Persistence::new(PersistenceConfig {
        snapshot_path: cli.output_dir.join("memory_checkpoint.jsonl"),
        buffer_capacity: config.memory_write_buffer_capacity,
        ..Default::default()
    }));
    let producer = Arc::new(DecisionProducer::new(ProducerConfig {
        topic: config.output_topic.clone(),
        sink_path: cli.output_dir.join("transactions.decisions.jsonl"),
        ..Default::default()
    }));
    let durable_sink = Arc::new(DurableSink::new(cli.output_dir.join("transactions.durable.jsonl")));

    let orchestrator = Arc::new(Orchestrator {
        config: Arc::clone(&config),
        memory: Arc::clone(&memory),
        kb: Arc::clone(&kb),
        ml: Arc::clone(&ml),
        guards: Arc::clone(&guards),
        llm: Arc::clone(&llm),
        metrics: Arc::clone(&metrics),
        persistence: Arc::clone(&persistence),
    });

    // Periodic sweep of expired seen-set entries and velocity windows (§5).
    tokio::spawn({
        let memory = Arc::clone(&memory);
        async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                memory.housekeeping(chrono::Utc::now());
            }
        }
    });
    tokio::spawn(Arc::clone(&persistence).checkpoint_loop());
    tokio::spawn(Arc::clone(&producer).flush_loop());

    let health_addr: SocketAddr = ([0, 0, 0, 0], cli.health_port).into();
    let health_server = Arc::new(HealthServer::new(
        health_addr,
        Arc::clone(&metrics),
        Arc::clone(&guards),
        Arc::clone(&readiness),
    ));
    tokio::spawn(Arc::clone(&health_server).serve());

    let (tx, mut rx) = mpsc::channel::<InputItem>(config.in_process_queue_capacity);

    match cli.mode {
        Mode::Tail => {
            info!(path = %cli.path.display(), "starting in tail mode");
            let path = cli.path.clone();
            let tx2 = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = tail_jsonl(&path, tx2, true).await {
                    error!("tail consumer exited: {}", e);
                }
            });
        }
        Mode::Replay => {
            info!(path = %cli.path.display(), speed = cli.speed, "starting in replay mode");
            let path = cli.path.clone();
            let speed = cli.speed;
            let tx2 = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = replay_jsonl(&path, tx2, speed).await {
                    error!("replay consumer exited: {}", e);
                }
            });
        }
    }
    drop(tx);
    readiness.consumer_attached.store(true, Ordering::Relaxed);

    info!(workers = config.worker_count, "fraud pipeline started");

    let semaphore = Arc::new(Semaphore::new(config.worker_count.max(1)));
    while let Some(item) = rx.recv().await {
        let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore never closed");
        let orchestrator = Arc::clone(&orchestrator);
        let producer = Arc::clone(&producer);
        let durable_sink = Arc::clone(&durable_sink);
        tokio::spawn(async move {
            let _permit = permit;
            match item {
                InputItem::Event(event) => {
                    let raw_event = event.clone();
                    match orchestrator.process(event).await {
                        Ok(outcome) => {
                            if !outcome.is_duplicate {
                                if let Err(e) = durable_sink.write(&raw_event, &outcome.record).await {
                                    warn!(order_id = %raw_event.order_id, "durable sink write failed: {}", e);
                                }
                                if let Err(e) = producer.publish(&outcome.record) {
                                    warn!(order_id = %raw_event.order_id, "decision publish failed: {}", e);
                                }
                            }
                        }
                        Err(e) => {
                            error!(order_id = %raw_event.order_id, "pipeline error: {}", e);
                        }
                    }
                }
                InputItem::Malformed { raw, reason } => {
                    let record = orchestrator.malformed_event_record(&reason);
                    if let Err(e) = durable_sink.write_malformed(&raw, &record).await {
                        warn!("durable sink write for malformed event failed: {}", e);
                    }
                    if let Err(e) = producer.publish(&record) {
                        warn!("decision publish for malformed event failed: {}", e);
                    }
                }
            }
        });
    }

    info!("event source exhausted, shutting down");

    // Every permit is only released once its owning task's durable write
    // and publish have returned, so reacquiring all of them drains every
    // still-running per-event task before the loss counters are read below
    // — otherwise a decision from the final in-flight batch could still be
    // writing when the process exits and never get tallied either way.
    let worker_count = config.worker_count.max(1) as u32;
    let _ = semaphore.acquire_many(worker_count).await.expect("semaphore never closed");

    // Non-recoverable runtime loss (exit 2): the write-buffer and output
    // producer both drop-oldest under sustained backpressure rather than
    // blocking the pipeline, so a clean shutdown still has to check whether
    // any decision or state write was silently lost along the way.
    let persistence_losses = persistence.buffer.dropped.load(Ordering::Relaxed);
    let producer_losses = producer.dropped.load(Ordering::Relaxed);
    if persistence_losses > 0 || producer_losses > 0 {
        error!(
            persistence_losses,
            producer_losses,
            "shutting down with unrecoverable write loss"
        );
        std::process::exit(2);
    }

    Ok(())
}
