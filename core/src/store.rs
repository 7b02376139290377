/*!
# Store Module

This module defines the queue store abstraction for MuxQ.

The dispatcher only needs three list primitives from its backing store:
- `push_head` appends an item at the head of a named list
- `push_tail` appends an item at the tail, the end pops drain, which is
  how reinserted messages overtake the waiting backlog
- `blocking_pop` removes the tail item, waiting up to a timeout for one
  to appear

Lists are created implicitly on first use and addressed by name, so a
queue is nothing more than an agreed-upon key. The `MemoryStore`
implementation keeps everything in process memory and is suitable for
tests, demos and single-process deployments; network-backed stores can
implement the same trait.
*/

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::error::Result;

/// List primitives the dispatcher requires from a backing store
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    /// Append an item at the head of the named list
    async fn push_head(&self, queue: &str, item: Vec<u8>) -> Result<()>;

    /// Append an item at the tail of the named list, where pops drain
    async fn push_tail(&self, queue: &str, item: Vec<u8>) -> Result<()>;

    /// Remove the tail item of the named list, waiting up to `timeout`
    /// for one to appear. Returns the list name together with the item,
    /// or `Ok(None)` when the wait ends with the list still empty.
    ///
    /// The dispatcher races this call against its shutdown flag, so
    /// implementations must not remove an item they cannot return when
    /// the future is dropped mid-wait.
    async fn blocking_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<(String, Vec<u8>)>>;
}

struct MemoryList {
    items: VecDeque<Vec<u8>>,
    notify: Arc<Notify>,
}

impl MemoryList {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

/// In-memory implementation of [`QueueStore`] backed by named deques
///
/// Each list keeps its own wakeup handle, so a push only wakes waiters
/// parked on that list. A `notify_one` with no waiter present stores a
/// permit, which closes the gap between a waiter releasing the table
/// lock and parking itself.
pub struct MemoryStore {
    lists: Mutex<HashMap<String, MemoryList>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            lists: Mutex::new(HashMap::new()),
        }
    }

    /// Number of items currently held in the named list
    pub async fn len(&self, queue: &str) -> usize {
        let lists = self.lists.lock().await;
        lists.get(queue).map_or(0, |list| list.items.len())
    }

    /// Check whether the named list is currently empty
    pub async fn is_empty(&self, queue: &str) -> bool {
        self.len(queue).await == 0
    }

    async fn push(&self, queue: &str, item: Vec<u8>, at_tail: bool) {
        let notify = {
            let mut lists = self.lists.lock().await;
            let list = lists
                .entry(queue.to_string())
                .or_insert_with(MemoryList::new);
            if at_tail {
                list.items.push_back(item);
            } else {
                list.items.push_front(item);
            }
            debug!("List {} now holds {} items", queue, list.items.len());
            Arc::clone(&list.notify)
        };
        notify.notify_one();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push_head(&self, queue: &str, item: Vec<u8>) -> Result<()> {
        self.push(queue, item, false).await;
        Ok(())
    }

    async fn push_tail(&self, queue: &str, item: Vec<u8>) -> Result<()> {
        self.push(queue, item, true).await;
        Ok(())
    }

    async fn blocking_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<(String, Vec<u8>)>> {
        let deadline = Instant::now() + timeout;

        loop {
            let notify = {
                let mut lists = self.lists.lock().await;
                let list = lists
                    .entry(queue.to_string())
                    .or_insert_with(MemoryList::new);
                if let Some(item) = list.items.pop_back() {
                    return Ok(Some((queue.to_string(), item)));
                }
                Arc::clone(&list.notify)
            };

            tokio::select! {
                _ = notify.notified() => {}
                _ = sleep_until(deadline) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn head_pushes_drain_in_arrival_order() {
        let store = MemoryStore::new();
        store.push_head("jobs", b"first".to_vec()).await.unwrap();
        store.push_head("jobs", b"second".to_vec()).await.unwrap();

        let (queue, item) = store
            .blocking_pop("jobs", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue, "jobs");
        assert_eq!(item, b"first");

        let (_, item) = store
            .blocking_pop("jobs", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item, b"second");
    }

    #[tokio::test]
    async fn tail_pushes_overtake_the_backlog() {
        let store = MemoryStore::new();
        store.push_head("jobs", b"waiting".to_vec()).await.unwrap();
        store.push_tail("jobs", b"urgent".to_vec()).await.unwrap();

        let (_, item) = store
            .blocking_pop("jobs", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item, b"urgent");

        let (_, item) = store
            .blocking_pop("jobs", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item, b"waiting");
    }

    #[tokio::test]
    async fn pop_times_out_on_an_empty_list() {
        let store = MemoryStore::new();
        let started = Instant::now();

        let popped = store
            .blocking_pop("empty", Duration::from_millis(100))
            .await
            .unwrap();

        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn pop_wakes_up_for_a_late_push() {
        let store = Arc::new(MemoryStore::new());

        let producer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                store.push_head("late", b"payload".to_vec()).await.unwrap();
            })
        };

        let started = Instant::now();
        let popped = store
            .blocking_pop("late", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(popped.unwrap().1, b"payload");
        assert!(started.elapsed() < Duration::from_secs(2));
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn lists_are_independent() {
        let store = MemoryStore::new();
        store.push_head("alpha", b"a".to_vec()).await.unwrap();

        let popped = store
            .blocking_pop("beta", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(popped.is_none());

        assert_eq!(store.len("alpha").await, 1);
        assert!(store.is_empty("beta").await);
    }

    #[tokio::test]
    async fn each_item_goes_to_one_waiter() {
        let store = Arc::new(MemoryStore::new());

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .blocking_pop("shared", Duration::from_millis(500))
                        .await
                        .unwrap()
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.push_head("shared", b"only".to_vec()).await.unwrap();

        let mut delivered = 0;
        for waiter in waiters {
            if waiter.await.unwrap().is_some() {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 1);
        assert!(store.is_empty("shared").await);
    }
}
