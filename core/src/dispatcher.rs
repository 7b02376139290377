/*!
# Dispatcher Module

This module defines the multi-queue dispatcher for MuxQ.

The dispatcher is responsible for:
- Pulling every configured source queue with its own blocking pop loop
- Fanning the pulled messages into one bounded dispatch buffer
- Handing buffered deliveries to any number of competing consumers
- Surviving transient store errors with a fixed backoff
- Stopping promptly on `quit`, even while a pop is parked

Key components include:
- The `Dispatcher` struct owning the pull loops and the dispatch buffer
- `DispatcherConfig` with the pop timeout, error backoff and buffer size
- `Delivery`, a decoded message paired with its source queue name

Backpressure comes from the buffer bound: once it is full every pull
loop blocks on its send, leaving further messages parked in the store
until a consumer drains the buffer.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{MuxqError, Result};
use crate::message::TaskMessage;
use crate::store::QueueStore;

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long a single blocking pop waits before coming back empty
    pub block_timeout: Duration,

    /// How long a pull loop pauses after a store error
    pub error_backoff: Duration,

    /// Capacity of the shared dispatch buffer
    pub buffer_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            block_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
            buffer_capacity: 10,
        }
    }
}

/// A decoded message paired with the queue it was pulled from
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The decoded message
    pub message: TaskMessage,

    /// Name of the source queue the message came from
    pub queue: String,
}

/// Multi-queue dispatcher over a list-based store
///
/// One instance owns a set of source queues, a pull loop per queue and
/// the bounded buffer the loops feed. Instances are independent; two
/// dispatchers over the same store names compete for items like two
/// connections to the same server would.
pub struct Dispatcher {
    /// Backing store holding the named lists
    store: Arc<dyn QueueStore>,

    /// Names of the source queues to pull
    sources: Vec<String>,

    /// Dispatcher configuration
    config: DispatcherConfig,

    /// Whether `start` has been called without a matching `quit`
    running: AtomicBool,

    /// Broadcasts the shutdown flag to every pull loop
    shutdown_tx: watch::Sender<bool>,

    /// Producer side of the dispatch buffer, cloned into pull loops
    buffer_tx: mpsc::Sender<Delivery>,

    /// Consumer side of the dispatch buffer, shared by competing callers
    buffer_rx: Mutex<mpsc::Receiver<Delivery>>,

    /// Join handles of the running pull loops
    pull_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create a dispatcher over `sources` with the default configuration
    pub fn new(store: Arc<dyn QueueStore>, sources: Vec<String>) -> Self {
        Self::with_config(store, sources, DispatcherConfig::default())
    }

    /// Create a dispatcher over `sources` with a custom configuration
    pub fn with_config(
        store: Arc<dyn QueueStore>,
        sources: Vec<String>,
        config: DispatcherConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (buffer_tx, buffer_rx) = mpsc::channel(config.buffer_capacity.max(1));

        Self {
            store,
            sources,
            config,
            running: AtomicBool::new(false),
            shutdown_tx,
            buffer_tx,
            buffer_rx: Mutex::new(buffer_rx),
            pull_handles: Mutex::new(Vec::new()),
        }
    }

    /// Names of the source queues this dispatcher pulls
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Whether the pull loops are currently meant to be running
    ///
    /// Advisory only: loops observe `quit` asynchronously, so a `false`
    /// here may precede the last loop actually exiting.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Serialize a message and append it at the head of the named queue
    ///
    /// Head insertion plus tail pops give first-in first-out delivery
    /// for normal traffic.
    pub async fn enqueue(&self, message: &TaskMessage, queue: &str) -> Result<()> {
        let bytes = message.to_bytes()?;
        self.store.push_head(queue, bytes).await?;
        debug!("Enqueued message {} to {}", message.id, queue);
        Ok(())
    }

    /// Serialize a message and append it at the tail of the named queue
    ///
    /// The tail is the end pops drain, so the message overtakes the
    /// waiting backlog. Retried work is deliberately served first.
    pub async fn back_queue(&self, message: &TaskMessage, queue: &str) -> Result<()> {
        let bytes = message.to_bytes()?;
        self.store.push_tail(queue, bytes).await?;
        debug!("Reinserted message {} at the pop end of {}", message.id, queue);
        Ok(())
    }

    /// Pop one message directly from a single named queue, bypassing the
    /// dispatch buffer. Waits up to the configured block timeout and
    /// returns `Ok(None)` when the queue stays empty.
    pub async fn dequeue(&self, queue: &str) -> Result<Option<Delivery>> {
        match self
            .store
            .blocking_pop(queue, self.config.block_timeout)
            .await?
        {
            Some((name, bytes)) => {
                let message = TaskMessage::from_bytes(&bytes)?;
                Ok(Some(Delivery {
                    message,
                    queue: name,
                }))
            }
            None => Ok(None),
        }
    }

    /// Receive the next delivery from the dispatch buffer
    ///
    /// Blocks until a pull loop produces one. Any number of consumers
    /// may call this concurrently; each delivery goes to exactly one of
    /// them. Deliveries already buffered remain receivable after `quit`.
    pub async fn recv(&self) -> Result<Delivery> {
        let mut buffer_rx = self.buffer_rx.lock().await;
        buffer_rx
            .recv()
            .await
            .ok_or_else(|| MuxqError::DispatcherError("dispatch buffer closed".to_string()))
    }

    /// Launch one pull loop per configured source queue
    ///
    /// Fails if the dispatcher is already running. A dispatcher stopped
    /// with `quit` can be started again.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MuxqError::DispatcherError(
                "dispatcher is already running".to_string(),
            ));
        }
        self.shutdown_tx.send_replace(false);

        let mut handles = self.pull_handles.lock().await;
        for queue in &self.sources {
            let store = Arc::clone(&self.store);
            let buffer_tx = self.buffer_tx.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            let config = self.config.clone();
            let queue = queue.clone();

            handles.push(tokio::spawn(pull_loop(
                store,
                queue,
                buffer_tx,
                shutdown_rx,
                config,
            )));
        }

        info!("Dispatcher started with {} pull loops", handles.len());
        Ok(())
    }

    /// Stop every pull loop and wait for them to exit
    ///
    /// A loop parked in a blocking pop is interrupted immediately; it
    /// does not sit out the remainder of its pop timeout. A message
    /// already popped but not yet buffered goes back to the pop end of
    /// its source queue. Calling `quit` on a stopped dispatcher is a
    /// no-op.
    pub async fn quit(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Dispatcher stopping, waiting for pull loops");
        let _ = self.shutdown_tx.send(true);

        let mut handles = self.pull_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("Dispatcher stopped");
    }
}

/// Pull loop for a single source queue
///
/// Repeatedly pops the queue tail, decodes the item and pushes the
/// delivery into the dispatch buffer. Every potentially long wait (the
/// pop, the error backoff, the buffer send) is raced against the
/// shutdown flag.
async fn pull_loop(
    store: Arc<dyn QueueStore>,
    queue: String,
    buffer_tx: mpsc::Sender<Delivery>,
    mut shutdown_rx: watch::Receiver<bool>,
    config: DispatcherConfig,
) {
    debug!("Pull loop for {} started", queue);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let popped = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // Dispatcher dropped without quit
                    break;
                }
                continue;
            }
            popped = store.blocking_pop(&queue, config.block_timeout) => popped,
        };

        let (_, bytes) = match popped {
            Ok(Some(item)) => item,
            // Pop timed out with the queue still empty; wait again
            Ok(None) => continue,
            Err(e) => {
                warn!("Pull loop for {} hit a store error: {}", queue, e);
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = sleep(config.error_backoff) => {}
                }
                continue;
            }
        };

        let message = match TaskMessage::from_bytes(&bytes) {
            Ok(message) => message,
            Err(e) => {
                error!("Discarding undecodable item from {}: {}", queue, e);
                continue;
            }
        };

        let id = message.id.clone();
        let delivery = Delivery {
            message,
            queue: queue.clone(),
        };

        tokio::select! {
            _ = shutdown_rx.changed() => {
                // Popped but not yet buffered: return the item to the pop
                // end of its queue so it is first out after a restart
                if let Err(e) = store.push_tail(&queue, bytes).await {
                    error!("Failed to return in-flight message {} to {}: {}", id, queue, e);
                }
                break;
            }
            sent = buffer_tx.send(delivery) => {
                if sent.is_err() {
                    break;
                }
                debug!("Buffered message {} from {}", id, queue);
            }
        }
    }

    debug!("Pull loop for {} stopped", queue);
}
