//! Best-effort flush of a subscription.

use crate::error::BrokerError;
use crate::transport::{LeasedMessage, MessageBody, Subscription};
use std::time::Duration;
use tracing::{debug, info};

/// Messages requested per receive while draining.
pub const DRAIN_BATCH_SIZE: usize = 10;

/// Complete every message currently available on `subscription`.
///
/// Receives batches of up to [`DRAIN_BATCH_SIZE`] messages, waiting at most
/// `wait` each time, and completes all of them. Stops after the first
/// receive that returns nothing. Returns the subscription for chaining.
pub async fn drain<S>(subscription: &S, wait: Duration) -> Result<&S, BrokerError>
where
    S: Subscription + ?Sized,
{
    drain_in_batches(subscription, DRAIN_BATCH_SIZE, wait).await
}

/// [`drain`] with an explicit batch size.
pub async fn drain_in_batches<S>(
    subscription: &S,
    batch_size: usize,
    wait: Duration,
) -> Result<&S, BrokerError>
where
    S: Subscription + ?Sized,
{
    info!(subscription = %subscription.path(), "Draining subscription - starting");

    let mut completed = 0usize;
    loop {
        let batch = subscription.receive_batch(batch_size.max(1), wait).await?;
        if batch.is_empty() {
            break;
        }

        for message in &batch {
            message.complete().await?;
            debug!(message_id = %message.message_id(), "Drained message");
        }
        completed += batch.len();
    }

    info!(
        subscription = %subscription.path(),
        completed = completed,
        "Draining subscription - done"
    );

    Ok(subscription)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySubscription, Settlement};

    const WAIT: Duration = Duration::from_millis(5);

    #[tokio::test]
    async fn test_drain_completes_all_messages() {
        let subscription =
            MemorySubscription::new("orders/subscriptions/audit", Duration::from_secs(30));
        let messages: Vec<_> = (0..25)
            .map(|i| subscription.push(format!("{{\"n\":{i}}}").into_bytes(), None))
            .collect();

        let drained = drain(&subscription, WAIT).await.unwrap();

        assert_eq!(drained.path(), "orders/subscriptions/audit");
        assert!(messages.iter().all(|m| m.settlement() == Settlement::Completed));
        assert_eq!(subscription.pending_count(), 0);
        // 10 + 10 + 5, then one empty receive
        assert_eq!(subscription.receive_count(), 4);
    }

    #[tokio::test]
    async fn test_drain_empty_subscription() {
        let subscription = MemorySubscription::new("empty", Duration::from_secs(30));

        drain(&subscription, WAIT).await.unwrap();

        assert_eq!(subscription.receive_count(), 1);
    }

    #[tokio::test]
    async fn test_drain_custom_batch_size() {
        let subscription = MemorySubscription::new("jobs", Duration::from_secs(30));
        for _ in 0..6 {
            subscription.push(b"{}".to_vec(), None);
        }

        drain_in_batches(&subscription, 4, WAIT).await.unwrap();

        assert_eq!(subscription.pending_count(), 0);
        assert_eq!(subscription.receive_count(), 3);
    }
}
