/*!
# Recovery Module

This module decides what happens to a delivery whose processing failed.

Consumer code reports the outcome of each unit of work as an explicit
`Result` value. On failure the policy consults two message fields:
- `weight` must reach the configured threshold for the message to be
  worth another attempt
- `retry` is the budget of attempts left; it is decremented on every
  reinsertion and a message at zero is dropped

Eligible messages are decremented and reinserted at the pop end of the
queue they came from, so a retry runs before the waiting backlog.
Everything here is terminal for the caller: failures are logged and
absorbed, never propagated, and the returned [`RecoveryOutcome`] says
which path the delivery took.
*/

use std::fmt::Display;

use tracing::{error, info, warn};

use crate::dispatcher::{Delivery, Dispatcher};
use crate::message::TaskMessage;

/// What the recovery policy did with a processed delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Processing succeeded, nothing to recover
    Completed,

    /// Processing failed and the message went back to its source queue
    /// with one less retry in its budget
    Requeued,

    /// Processing failed and the message left circulation for good
    Dropped,
}

/// Weight-and-budget reinsertion policy for failed deliveries
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Minimum weight a failed message needs to qualify for reinsertion
    pub weight_threshold: i32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            weight_threshold: 0,
        }
    }
}

impl RecoveryPolicy {
    /// Create a policy with the given weight threshold
    pub fn new(weight_threshold: i32) -> Self {
        Self { weight_threshold }
    }

    /// Whether a failed message qualifies for another attempt
    pub fn should_requeue(&self, message: &TaskMessage) -> bool {
        message.weight >= self.weight_threshold && message.retry > 0
    }

    /// Settle a processed delivery according to its outcome
    ///
    /// A success completes the delivery untouched. A failure is logged,
    /// then either reinserted at the pop end of its source queue with a
    /// decremented budget, or dropped when the message is too light or
    /// the budget is spent. Reinsertion errors are logged and turn into
    /// a drop; nothing escapes this method.
    pub async fn resolve<E: Display>(
        &self,
        dispatcher: &Dispatcher,
        delivery: Delivery,
        outcome: std::result::Result<(), E>,
    ) -> RecoveryOutcome {
        let Err(cause) = outcome else {
            return RecoveryOutcome::Completed;
        };

        let Delivery { mut message, queue } = delivery;
        error!(
            "Processing failed for message {} from {}: {}",
            message.id, queue, cause
        );

        if !self.should_requeue(&message) {
            warn!(
                "Dropping message {} (weight {}, retries left {})",
                message.id, message.weight, message.retry
            );
            return RecoveryOutcome::Dropped;
        }

        message.retry -= 1;
        match dispatcher.back_queue(&message, &queue).await {
            Ok(()) => {
                info!(
                    "Message {} reinserted into {} ({} retries left)",
                    message.id, queue, message.retry
                );
                RecoveryOutcome::Requeued
            }
            Err(e) => {
                error!(
                    "Failed to reinsert message {} into {}: {}",
                    message.id, queue, e
                );
                RecoveryOutcome::Dropped
            }
        }
    }
}
