//! Guarded request processing for a single leased message.
//!
//! [`RequestProcessor`] ties together lock renewal, body decoding, a user
//! handler and a success check:
//!
//! ```text
//! start renewal ─▶ decode body ─▶ handler(payload) ─▶ success(&result)
//!       │                                                   │
//!       └──────────── stop renewal on every exit ◀──────────┘
//! ```
//!
//! Failures are logged once with the message id and returned unchanged.

use crate::config::BrokeredConfig;
use crate::error::BrokerError;
use crate::payload::Payload;
use crate::renewer::LockRenewer;
use crate::serializer::decode;
use crate::transport::{LeasedMessage, MessageBody};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

/// Default success predicate for handler results.
///
/// - `bool`: the value itself
/// - `Option<T>`: `is_some()`
pub trait Outcome {
    /// Whether the handler result counts as a success.
    fn is_success(&self) -> bool;
}

impl Outcome for bool {
    fn is_success(&self) -> bool {
        *self
    }
}

impl<T> Outcome for Option<T> {
    fn is_success(&self) -> bool {
        self.is_some()
    }
}

/// Runs handlers against leased messages while keeping their locks alive.
///
/// # Example
///
/// ```rust,ignore
/// let processor = RequestProcessor::from_config(&config);
///
/// let shipped = processor
///     .process(message.clone(), |order: OrderPlaced| async move {
///         warehouse.ship(order).await.map_err(AppError::from)
///     })
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestProcessor {
    renewer: LockRenewer,
}

impl RequestProcessor {
    /// Create a processor using the given renewer.
    pub fn new(renewer: LockRenewer) -> Self {
        Self { renewer }
    }

    /// Create a processor from configuration.
    pub fn from_config(config: &BrokeredConfig) -> Self {
        Self::new(LockRenewer::from_config(config))
    }

    /// Process `message` with `handler`, judging the result with its
    /// [`Outcome`].
    pub async fn process<M, T, R, E, F, Fut>(&self, message: Arc<M>, handler: F) -> Result<R, E>
    where
        M: LeasedMessage + ?Sized + 'static,
        T: Payload,
        R: Outcome,
        E: From<BrokerError> + Display,
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.process_with(message, handler, R::is_success).await
    }

    /// Process `message` with `handler`, judging the result with `success`.
    ///
    /// The lock is renewed from before decoding until after `success` has
    /// run. Renewal is stopped, and has fully exited, before this returns on
    /// every path.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::MissingArgument`] if the message has no lock
    /// - decode errors from [`decode`]
    /// - any error returned by `handler`, unchanged
    /// - [`BrokerError::ProcessingFailed`] if `success` returns `false`
    pub async fn process_with<M, T, R, E, F, Fut, P>(
        &self,
        message: Arc<M>,
        handler: F,
        success: P,
    ) -> Result<R, E>
    where
        M: LeasedMessage + ?Sized + 'static,
        T: Payload,
        E: From<BrokerError> + Display,
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        P: FnOnce(&R) -> bool,
    {
        let renewal = match self.renewer.start(message.clone()) {
            Ok(renewal) => renewal,
            Err(e) => {
                let e = E::from(e);
                error!(message_id = %message.message_id(), error = %e, "ProcessRequest failed");
                return Err(e);
            }
        };

        let result = run_stages(&*message, handler, success).await;

        if let Err(e) = &result {
            error!(message_id = %message.message_id(), error = %e, "ProcessRequest failed");
        }

        renewal.stop().await;
        result
    }
}

async fn run_stages<M, T, R, E, F, Fut, P>(message: &M, handler: F, success: P) -> Result<R, E>
where
    M: LeasedMessage + ?Sized,
    T: Payload,
    E: From<BrokerError>,
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    P: FnOnce(&R) -> bool,
{
    let message_id = message.message_id();

    debug!(message_id = %message_id, type_name = T::TYPE_NAME, "Start of deserialize");
    let payload: T = decode(message)?;
    debug!(message_id = %message_id, "End of deserialize");

    debug!(message_id = %message_id, "Start of message processing");
    let result = handler(payload).await?;
    let succeeded = success(&result);
    debug!(
        message_id = %message_id,
        success = succeeded,
        "End of message processing"
    );

    if !succeeded {
        return Err(BrokerError::ProcessingFailed.into());
    }

    Ok(result)
}

/// Process `message` with a default [`RequestProcessor`].
pub async fn process_request<M, T, R, E, F, Fut>(message: Arc<M>, handler: F) -> Result<R, E>
where
    M: LeasedMessage + ?Sized + 'static,
    T: Payload,
    R: Outcome,
    E: From<BrokerError> + Display,
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    RequestProcessor::default().process(message, handler).await
}
