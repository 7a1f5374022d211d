//! Background lock renewal for a leased message.
//!
//! [`LockRenewer::start`] spawns one renewal task per message. The task
//! sleeps for half of the remaining lock time, renews the lock, and repeats
//! until the returned [`RenewalHandle`] is stopped or dropped.
//!
//! Cancellation is cooperative: a `watch` channel is checked after every
//! wait. A renew call that is already in flight is allowed to finish, so
//! stop latency is bounded by one renewal interval plus one broker call.

use crate::config::BrokeredConfig;
use crate::error::BrokerError;
use crate::transport::{LeasedMessage, MessageBody};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Half of the time remaining until `locked_until`, never negative.
pub fn halflife(locked_until: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (locked_until - now)
        .to_std()
        .map(|remaining| remaining / 2)
        .unwrap_or(Duration::ZERO)
}

/// Starts renewal cycles.
#[derive(Debug, Clone)]
pub struct LockRenewer {
    min_interval: Duration,
}

impl Default for LockRenewer {
    fn default() -> Self {
        Self::from_config(&BrokeredConfig::default())
    }
}

impl LockRenewer {
    /// Create a renewer that never waits less than `min_interval` between
    /// renewals.
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    /// Create a renewer from configuration.
    pub fn from_config(config: &BrokeredConfig) -> Self {
        Self::new(config.min_renew_interval)
    }

    /// Start renewing the lock on `message`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`BrokerError::MissingArgument`] if the message carries no lock.
    pub fn start<M>(&self, message: Arc<M>) -> Result<RenewalHandle, BrokerError>
    where
        M: LeasedMessage + ?Sized + 'static,
    {
        let locked_until = message
            .locked_until()
            .ok_or(BrokerError::MissingArgument("message lock"))?;
        let message_id = message.message_id().to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        debug!(
            message_id = %message_id,
            locked_until = %locked_until,
            "Starting lock renewal"
        );

        let task = tokio::spawn(renewal_cycle(
            message,
            locked_until,
            self.min_interval,
            shutdown_rx,
        ));

        Ok(RenewalHandle {
            message_id,
            shutdown_tx,
            task,
        })
    }
}

async fn renewal_cycle<M>(
    message: Arc<M>,
    mut locked_until: DateTime<Utc>,
    min_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    M: LeasedMessage + ?Sized,
{
    loop {
        let wait = halflife(locked_until, Utc::now()).max(min_interval);

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // Sender dropped: the handle went away without stop().
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(wait) => {
                match message.renew_lock().await {
                    Ok(until) => {
                        locked_until = until;
                        debug!(
                            message_id = %message.message_id(),
                            locked_until = %until,
                            "Lock re-acquired"
                        );
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(
                            message_id = %message.message_id(),
                            error = %e,
                            "Lock renewal failed, retrying"
                        );
                    }
                    Err(e) => {
                        error!(
                            message_id = %message.message_id(),
                            error = %e,
                            "Lock renewal failed permanently, giving up"
                        );
                        break;
                    }
                }
            }
        }

        if *shutdown_rx.borrow() {
            break;
        }
    }
}

/// Owner of one running renewal cycle.
///
/// Call [`stop`](Self::stop) exactly once. Dropping the handle also cancels
/// the cycle, but without waiting for it to exit.
#[derive(Debug)]
pub struct RenewalHandle {
    message_id: String,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RenewalHandle {
    /// Id of the message being renewed.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Whether the renewal task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal cancellation and wait until the renewal task has exited.
    ///
    /// Once this returns no renew call is outstanding and none will be made.
    pub async fn stop(self) {
        // Err means the cycle already exited on its own.
        let _ = self.shutdown_tx.send(true);
        debug!(message_id = %self.message_id, "Lock renewal stopped");

        if let Err(e) = self.task.await {
            error!(message_id = %self.message_id, error = %e, "Lock renewal task panicked");
        }
    }
}
