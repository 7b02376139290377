/*!
# Task Helpers Module

Convenience wrappers pairing message construction with dispatcher calls.

These are the functions most applications use day to day: hand in a
payload, get back the assigned message id, and let the dispatcher deal
with encoding and queue placement. The dequeue side is also where the
expiry gate lives, so consumers never see a message that outlived its
`dead_time`.
*/

use chrono::Utc;
use tracing::warn;

use crate::dispatcher::{Delivery, Dispatcher};
use crate::error::{MuxqError, Result};
use crate::message::{Payload, TaskMessage};

/// Build a message from `payload` and enqueue it at the head of `queue`
///
/// Returns the id assigned to the new message.
pub async fn enqueue_task(
    dispatcher: &Dispatcher,
    payload: Payload,
    weight: i32,
    retry: u32,
    queue: &str,
) -> Result<String> {
    let message = TaskMessage::new(payload, weight, retry);
    dispatcher.enqueue(&message, queue).await?;
    Ok(message.id)
}

/// Take the next delivery from the dispatch buffer, enforcing expiry
///
/// A message whose `dead_time` has passed is discarded on the spot: the
/// call fails with [`MuxqError::ExpiredMessage`] and the message is not
/// requeued. Callers typically log the error and ask again.
pub async fn dequeue_task(dispatcher: &Dispatcher) -> Result<Delivery> {
    let delivery = dispatcher.recv().await?;

    let now = Utc::now().timestamp();
    if delivery.message.is_expired(now) {
        warn!(
            "Discarding expired message {} from {}",
            delivery.message.id, delivery.queue
        );
        return Err(MuxqError::ExpiredMessage(delivery.message.id));
    }

    Ok(delivery)
}

/// Build a message from `payload` and insert it at the pop end of `queue`
///
/// The message overtakes everything already waiting, which is the
/// behavior retries and other urgent work rely on. Returns the id
/// assigned to the new message.
pub async fn back_queue_task(
    dispatcher: &Dispatcher,
    payload: Payload,
    weight: i32,
    retry: u32,
    queue: &str,
) -> Result<String> {
    let message = TaskMessage::new(payload, weight, retry);
    dispatcher.back_queue(&message, queue).await?;
    Ok(message.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatcherConfig;
    use crate::store::{MemoryStore, QueueStore};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn payload(label: &str) -> Payload {
        json!({ "cmd": label }).as_object().unwrap().clone()
    }

    fn quick_config() -> DispatcherConfig {
        DispatcherConfig {
            block_timeout: Duration::from_millis(100),
            error_backoff: Duration::from_millis(20),
            buffer_capacity: 10,
        }
    }

    #[tokio::test]
    async fn enqueued_task_comes_back_with_its_id() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher =
            Dispatcher::with_config(store, vec!["jobs".to_string()], quick_config());
        dispatcher.start().await.unwrap();

        let id = enqueue_task(&dispatcher, payload("run"), 1, 2, "jobs")
            .await
            .unwrap();

        let delivery = timeout(Duration::from_secs(2), dequeue_task(&dispatcher))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message.id, id);
        assert_eq!(delivery.message.weight, 1);
        assert_eq!(delivery.message.retry, 2);
        assert_eq!(delivery.queue, "jobs");

        dispatcher.quit().await;
    }

    #[tokio::test]
    async fn expired_messages_are_rejected_and_gone() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::with_config(
            Arc::clone(&store) as Arc<dyn QueueStore>,
            vec!["jobs".to_string()],
            quick_config(),
        );

        let now = Utc::now().timestamp();
        let expired = TaskMessage::new(payload("stale"), 0, 0).with_deadline(now - 10);
        dispatcher.enqueue(&expired, "jobs").await.unwrap();
        dispatcher.start().await.unwrap();

        let err = timeout(Duration::from_secs(2), dequeue_task(&dispatcher))
            .await
            .unwrap()
            .unwrap_err();
        match err {
            MuxqError::ExpiredMessage(id) => assert_eq!(id, expired.id),
            other => panic!("unexpected error: {other}"),
        }

        // Discarded for good: neither buffered nor back in the store
        dispatcher.quit().await;
        assert!(store.is_empty("jobs").await);
    }

    #[tokio::test]
    async fn back_queued_task_overtakes_the_backlog() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher =
            Dispatcher::with_config(store, vec!["jobs".to_string()], quick_config());

        let waiting = enqueue_task(&dispatcher, payload("waiting"), 0, 0, "jobs")
            .await
            .unwrap();
        let urgent = back_queue_task(&dispatcher, payload("urgent"), 0, 0, "jobs")
            .await
            .unwrap();

        let first = dispatcher.dequeue("jobs").await.unwrap().unwrap();
        let second = dispatcher.dequeue("jobs").await.unwrap().unwrap();
        assert_eq!(first.message.id, urgent);
        assert_eq!(second.message.id, waiting);
    }

    #[tokio::test]
    async fn messages_with_cleared_expiry_are_delivered() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher =
            Dispatcher::with_config(store, vec!["jobs".to_string()], quick_config());
        dispatcher.start().await.unwrap();

        let message = TaskMessage::new(payload("immortal"), 0, 0).never_expires();
        dispatcher.enqueue(&message, "jobs").await.unwrap();

        let delivery = timeout(Duration::from_secs(2), dequeue_task(&dispatcher))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message.id, message.id);

        dispatcher.quit().await;
    }
}
