/*!
# MuxQ CLI

Command-line driver for the MuxQ multi-queue task dispatcher.

The CLI provides tools for:
- Running a self-contained demo pipeline against the in-memory store,
  with concurrent producers, competing consumers and simulated failures
- Encoding a payload file into the JSON wire format a producer on any
  stack would push

The demo exercises the whole dispatch path: multiplexed pull loops, the
bounded dispatch buffer, the expiry gate and the recovery policy.
*/

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::future::join_all;
use rand::Rng;
use tokio::time::timeout;
use tracing::{info, warn};

use muxq_core::error::{MuxqError, Result};
use muxq_core::{
    dequeue_task, enqueue_task, Dispatcher, MemoryStore, RecoveryOutcome, RecoveryPolicy,
    TaskMessage,
};

/// MuxQ CLI - Multi-Queue Dispatcher Driver
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demo pipeline against the in-memory store
    Demo {
        /// Source queues (comma-separated)
        #[arg(long, short, default_value = "alpha,beta,gamma")]
        queues: String,

        /// Messages produced per queue
        #[arg(long, short, default_value = "50")]
        count: u32,

        /// Number of competing consumers
        #[arg(long, default_value = "2")]
        consumers: u32,

        /// Share of deliveries that fail processing, between 0 and 1
        #[arg(long, default_value = "0.2")]
        fail_rate: f64,

        /// Weight stamped on every produced message
        #[arg(long, short, default_value = "2")]
        weight: i32,

        /// Retry budget stamped on every produced message
        #[arg(long, short, default_value = "1")]
        retry: u32,
    },

    /// Encode a payload file into the JSON wire format
    Encode {
        /// Path to a JSON file holding the payload object
        #[arg(long, short)]
        payload: PathBuf,

        /// Weight stamped on the message
        #[arg(long, short, default_value = "0")]
        weight: i32,

        /// Retry budget stamped on the message
        #[arg(long, short, default_value = "3")]
        retry: u32,

        /// Message lifetime in seconds, 0 for a message that never expires
        #[arg(long)]
        ttl: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            queues,
            count,
            consumers,
            fail_rate,
            weight,
            retry,
        } => {
            run_demo(queues, count, consumers, fail_rate, weight, retry).await?;
        }
        Commands::Encode {
            payload,
            weight,
            retry,
            ttl,
        } => {
            encode_message(payload, weight, retry, ttl).await?;
        }
    }

    Ok(())
}

/// Counters shared by the demo consumers
#[derive(Default)]
struct DemoTally {
    completed: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
    expired: AtomicU64,
}

impl DemoTally {
    /// Messages that reached a terminal state
    fn settled(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
            + self.dropped.load(Ordering::SeqCst)
            + self.expired.load(Ordering::SeqCst)
    }
}

async fn run_demo(
    queues: String,
    count: u32,
    consumers: u32,
    fail_rate: f64,
    weight: i32,
    retry: u32,
) -> Result<()> {
    let sources: Vec<String> = queues.split(',').map(|s| s.trim().to_string()).collect();
    let fail_rate = fail_rate.clamp(0.0, 1.0);
    let total = count as u64 * sources.len() as u64;

    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(Dispatcher::new(store, sources.clone()));
    dispatcher.start().await?;

    info!(
        "Producing {} messages across {} queues, {} consumers, fail rate {}",
        total,
        sources.len(),
        consumers,
        fail_rate
    );

    let mut producers = Vec::new();
    for queue in sources {
        let dispatcher = Arc::clone(&dispatcher);
        producers.push(tokio::spawn(async move {
            for index in 0..count {
                let payload = serde_json::json!({
                    "cmd": "demo",
                    "queue": queue.as_str(),
                    "index": index,
                });
                let payload = payload.as_object().cloned().unwrap_or_default();
                if let Err(e) = enqueue_task(&dispatcher, payload, weight, retry, &queue).await {
                    warn!("Failed to enqueue into {}: {}", queue, e);
                }
            }
        }));
    }

    let tally = Arc::new(DemoTally::default());
    let policy = RecoveryPolicy::default();

    let mut workers = Vec::new();
    for worker in 0..consumers.max(1) {
        let dispatcher = Arc::clone(&dispatcher);
        let tally = Arc::clone(&tally);
        let policy = policy.clone();

        workers.push(tokio::spawn(async move {
            loop {
                if tally.settled() >= total {
                    break;
                }

                let delivery =
                    match timeout(Duration::from_millis(500), dequeue_task(&dispatcher)).await {
                        // Nothing settled within the window, check again
                        Err(_) => continue,
                        Ok(Err(MuxqError::ExpiredMessage(_))) => {
                            tally.expired.fetch_add(1, Ordering::SeqCst);
                            continue;
                        }
                        Ok(Err(e)) => {
                            warn!("Consumer {} stopping: {}", worker, e);
                            break;
                        }
                        Ok(Ok(delivery)) => delivery,
                    };

                let failed = rand::thread_rng().gen_bool(fail_rate);
                let outcome = if failed {
                    Err(anyhow::anyhow!("simulated processing failure"))
                } else {
                    Ok(())
                };

                match policy.resolve(&dispatcher, delivery, outcome).await {
                    RecoveryOutcome::Completed => {
                        tally.completed.fetch_add(1, Ordering::SeqCst);
                    }
                    RecoveryOutcome::Requeued => {
                        tally.requeued.fetch_add(1, Ordering::SeqCst);
                    }
                    RecoveryOutcome::Dropped => {
                        tally.dropped.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }));
    }

    join_all(producers).await;
    join_all(workers).await;
    dispatcher.quit().await;

    println!("Produced:  {}", total);
    println!("Completed: {}", tally.completed.load(Ordering::SeqCst));
    println!("Requeued:  {}", tally.requeued.load(Ordering::SeqCst));
    println!("Dropped:   {}", tally.dropped.load(Ordering::SeqCst));
    println!("Expired:   {}", tally.expired.load(Ordering::SeqCst));

    Ok(())
}

async fn encode_message(
    payload_path: PathBuf,
    weight: i32,
    retry: u32,
    ttl: Option<i64>,
) -> Result<()> {
    info!("Reading payload from {:?}", payload_path);

    let raw = std::fs::read_to_string(&payload_path).map_err(|e| MuxqError::Other(e.into()))?;

    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| MuxqError::SerializationError(e.to_string()))?;
    let payload = value.as_object().cloned().ok_or_else(|| {
        MuxqError::SerializationError("payload must be a JSON object".to_string())
    })?;

    let mut message = TaskMessage::new(payload, weight, retry);
    if let Some(ttl) = ttl {
        message = if ttl > 0 {
            message.with_ttl(ttl)
        } else {
            message.never_expires()
        };
    }

    let bytes = message.to_bytes()?;
    println!("{}", String::from_utf8_lossy(&bytes));

    Ok(())
}
