/*!
# MuxQ Core

Core library for MuxQ, a multi-queue task dispatcher built on the
blocking list primitives of a key-value store.

This library provides the components for funnelling several named work
queues into one consumer-facing stream:

- Task messages with identity, an open JSON payload, expiry and a retry budget
- A store contract for head/tail pushes and blocking pops, with an in-memory implementation
- A dispatcher running one pull loop per source queue into a bounded dispatch buffer
- Task helpers wrapping message construction and the expiry gate
- A weight-and-budget recovery policy for failed processing
*/

pub mod dispatcher;
pub mod error;
pub mod message;
pub mod recovery;
pub mod store;
pub mod tasks;

pub use error::Result;

pub use dispatcher::{Delivery, Dispatcher, DispatcherConfig};
pub use recovery::{RecoveryOutcome, RecoveryPolicy};
pub use store::{MemoryStore, QueueStore};
pub use tasks::{back_queue_task, dequeue_task, enqueue_task};
/// Re-export core types for convenience
pub use message::{Payload, TaskMessage};
