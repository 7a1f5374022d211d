//! Receive loop that runs every message through the request pipeline.
//!
//! Each received batch is processed concurrently. A message whose pipeline
//! succeeds is completed; any failure abandons it so the broker can
//! redeliver it. Retry limits and dead-lettering stay with the broker.

use crate::config::BrokeredConfig;
use crate::error::BrokerError;
use crate::payload::Payload;
use crate::pipeline::{Outcome, RequestProcessor};
use crate::transport::{LeasedMessage, MessageBody, Subscription};
use futures::future::join_all;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Counters reported when a listener stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Messages handed to the pipeline
    pub received: u64,
    /// Messages completed after successful processing
    pub completed: u64,
    /// Messages abandoned after a failure
    pub abandoned: u64,
}

enum Disposition {
    Completed,
    Abandoned,
}

/// Pulls batches from a subscription and processes them until shutdown.
pub struct Listener<S: Subscription> {
    subscription: Arc<S>,
    processor: RequestProcessor,
    batch_size: usize,
    receive_wait: Duration,
    receive_error_backoff: Duration,
}

impl<S: Subscription> Listener<S> {
    /// Create a listener for `subscription`.
    pub fn new(subscription: Arc<S>, config: &BrokeredConfig) -> Self {
        Self {
            subscription,
            processor: RequestProcessor::from_config(config),
            batch_size: config.batch_size.max(1),
            receive_wait: config.drain_wait,
            receive_error_backoff: config.receive_error_backoff,
        }
    }

    /// Run until `shutdown_rx` turns `true` or its sender is dropped.
    ///
    /// Shutdown interrupts a pending receive or the pause after a failed
    /// receive, but never a batch that is already being processed.
    pub async fn run<T, R, E, F, Fut>(
        &self,
        handler: F,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> ListenerStats
    where
        T: Payload,
        R: Outcome,
        E: From<BrokerError> + Display,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        info!(
            subscription = %self.subscription.path(),
            batch_size = self.batch_size,
            "Starting listener"
        );

        let mut stats = ListenerStats::default();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let batch = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                batch = self
                    .subscription
                    .receive_batch(self.batch_size, self.receive_wait) => batch,
            };

            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    error!(
                        subscription = %self.subscription.path(),
                        error = %e,
                        "Error receiving batch"
                    );
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(self.receive_error_backoff) => {}
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                continue;
            }

            stats.received += batch.len() as u64;
            let outcomes = join_all(
                batch
                    .into_iter()
                    .map(|message| self.handle_message(Arc::new(message), &handler)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    Disposition::Completed => stats.completed += 1,
                    Disposition::Abandoned => stats.abandoned += 1,
                }
            }
        }

        info!(
            subscription = %self.subscription.path(),
            received = stats.received,
            completed = stats.completed,
            abandoned = stats.abandoned,
            "Listener stopped"
        );

        stats
    }

    async fn handle_message<T, R, E, F, Fut>(
        &self,
        message: Arc<S::Message>,
        handler: &F,
    ) -> Disposition
    where
        T: Payload,
        R: Outcome,
        E: From<BrokerError> + Display,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let processed: Result<R, E> = self
            .processor
            .process(message.clone(), |payload| handler(payload))
            .await;

        if processed.is_ok() {
            match message.complete().await {
                Ok(()) => {
                    debug!(message_id = %message.message_id(), "Message completed");
                    return Disposition::Completed;
                }
                Err(e) => {
                    warn!(
                        message_id = %message.message_id(),
                        error = %e,
                        "Failed to complete message, abandoning"
                    );
                }
            }
        }

        if let Err(e) = message.abandon().await {
            warn!(message_id = %message.message_id(), error = %e, "Failed to abandon message");
        }
        Disposition::Abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryMessage, MemorySubscription, Settlement};
    use crate::serializer::{encode, EncodeOptions};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    crate::impl_payload!(Ping, name = "Ping", properties { "Seq" => seq });

    /// Subscription whose broker connection is down.
    #[derive(Default)]
    struct Unreachable {
        receives: AtomicUsize,
    }

    #[async_trait]
    impl Subscription for Unreachable {
        type Message = MemoryMessage;

        fn path(&self) -> &str {
            "unreachable"
        }

        async fn receive_batch(
            &self,
            _max_count: usize,
            _wait: Duration,
        ) -> Result<Vec<MemoryMessage>, BrokerError> {
            self.receives.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::transport("connection refused"))
        }
    }

    fn config() -> BrokeredConfig {
        BrokeredConfig::default()
            .with_drain_wait(Duration::from_millis(10))
            .with_min_renew_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_listener_completes_and_abandons() {
        let subscription = Arc::new(MemorySubscription::new("pings", Duration::from_secs(30)));
        let mut messages = Vec::new();
        for seq in 0..4 {
            let outbound = encode(&Ping { seq }, EncodeOptions::json()).unwrap();
            messages.push(subscription.push_outbound(&outbound).unwrap());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = Listener::new(subscription.clone(), &config());

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown_tx.send(true).unwrap();
        });

        // Odd sequence numbers fail and are redelivered on every receive.
        let stats = listener
            .run(
                |ping: Ping| async move { Ok::<bool, BrokerError>(ping.seq % 2 == 0) },
                shutdown_rx,
            )
            .await;
        stopper.await.unwrap();

        assert_eq!(stats.completed, 2);
        assert!(stats.abandoned >= 2);
        assert_eq!(messages[0].settlement(), Settlement::Completed);
        assert_eq!(messages[2].settlement(), Settlement::Completed);
        assert!(messages[1].delivery_count() >= 2);
    }

    #[tokio::test]
    async fn test_listener_stops_on_dropped_sender() {
        let subscription = Arc::new(MemorySubscription::new("idle", Duration::from_secs(30)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);

        let listener = Listener::new(subscription.clone(), &config());
        let stats = listener
            .run(
                |_ping: Ping| async move { Ok::<bool, BrokerError>(true) },
                shutdown_rx,
            )
            .await;

        assert_eq!(stats, ListenerStats::default());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_receive_error_backoff() {
        let subscription = Arc::new(Unreachable::default());
        let config = config().with_receive_error_backoff(Duration::from_secs(30));
        let listener = Listener::new(subscription.clone(), &config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown_tx.send(true).unwrap();
        });

        let started = std::time::Instant::now();
        let stats = listener
            .run(
                |_ping: Ping| async move { Ok::<bool, BrokerError>(true) },
                shutdown_rx,
            )
            .await;
        stopper.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(subscription.receives.load(Ordering::SeqCst), 1);
        assert_eq!(stats, ListenerStats::default());
    }

    #[tokio::test]
    async fn test_receive_error_backoff_from_config() {
        let subscription = Arc::new(Unreachable::default());
        let config = config().with_receive_error_backoff(Duration::from_millis(20));
        let listener = Listener::new(subscription.clone(), &config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            shutdown_tx.send(true).unwrap();
        });

        listener
            .run(
                |_ping: Ping| async move { Ok::<bool, BrokerError>(true) },
                shutdown_rx,
            )
            .await;
        stopper.await.unwrap();

        assert!(subscription.receives.load(Ordering::SeqCst) >= 3);
    }
}
