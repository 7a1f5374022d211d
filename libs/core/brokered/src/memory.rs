//! In-memory broker for tests and local development.
//!
//! [`MemorySubscription`] hands out [`MemoryMessage`]s under a lock, tracks
//! completion and abandonment, and redelivers abandoned messages on the next
//! receive.

use crate::error::BrokerError;
use crate::serializer::OutboundMessage;
use crate::transport::{LeasedMessage, MessageBody, Subscription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_delta(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

/// Settlement state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Received, not yet completed or abandoned
    Pending,
    /// Acknowledged and removed
    Completed,
    /// Released for redelivery
    Abandoned,
}

#[derive(Debug)]
struct MessageState {
    message_id: String,
    content_type: Option<String>,
    initial_body: Vec<u8>,
    body: Mutex<Option<Vec<u8>>>,
    properties: Mutex<HashMap<String, String>>,
    lock_duration: Option<Duration>,
    locked_until: Mutex<Option<DateTime<Utc>>>,
    renew_latency: Mutex<Duration>,
    renewals: AtomicUsize,
    renewals_in_flight: AtomicUsize,
    lock_lost: AtomicBool,
    settlement: Mutex<Settlement>,
    delivery_count: AtomicU32,
}

/// A leased message held in memory.
///
/// Cloning yields another handle to the same message.
#[derive(Debug, Clone)]
pub struct MemoryMessage {
    state: Arc<MessageState>,
}

impl MemoryMessage {
    /// Create a message locked for `lock_duration` from now.
    pub fn leased(body: Vec<u8>, content_type: Option<&str>, lock_duration: Duration) -> Self {
        let message = Self::build(body, content_type, Some(lock_duration));
        message.acquire_lock();
        message
    }

    /// Create a message that was received without a lock.
    pub fn unleased(body: Vec<u8>, content_type: Option<&str>) -> Self {
        Self::build(body, content_type, None)
    }

    /// Turn an encoded outbound message into a leased inbound one.
    pub fn from_outbound(
        outbound: &OutboundMessage,
        lock_duration: Duration,
    ) -> Result<Self, BrokerError> {
        let body = outbound.take_body()?;
        let message = Self::leased(body, outbound.content_type().as_deref(), lock_duration);
        for (key, value) in outbound.properties() {
            message.set_property(key, value);
        }
        Ok(message)
    }

    fn build(body: Vec<u8>, content_type: Option<&str>, lock_duration: Option<Duration>) -> Self {
        Self {
            state: Arc::new(MessageState {
                message_id: uuid::Uuid::new_v4().to_string(),
                content_type: content_type.map(str::to_string),
                initial_body: body.clone(),
                body: Mutex::new(Some(body)),
                properties: Mutex::new(HashMap::new()),
                lock_duration,
                locked_until: Mutex::new(None),
                renew_latency: Mutex::new(Duration::ZERO),
                renewals: AtomicUsize::new(0),
                renewals_in_flight: AtomicUsize::new(0),
                lock_lost: AtomicBool::new(false),
                settlement: Mutex::new(Settlement::Pending),
                delivery_count: AtomicU32::new(0),
            }),
        }
    }

    /// Delay every renew call by `latency`.
    ///
    /// Applies to every clone of this message, including redeliveries.
    pub fn with_renew_latency(self, latency: Duration) -> Self {
        *lock(&self.state.renew_latency) = latency;
        self
    }

    fn acquire_lock(&self) {
        if let Some(duration) = self.state.lock_duration {
            *lock(&self.state.locked_until) = Some(Utc::now() + lock_delta(duration));
        }
        self.state.delivery_count.fetch_add(1, Ordering::SeqCst);
    }

    fn redeliver(&self) {
        *lock(&self.state.body) = Some(self.state.initial_body.clone());
        *lock(&self.state.settlement) = Settlement::Pending;
        self.state.lock_lost.store(false, Ordering::SeqCst);
        self.acquire_lock();
    }

    /// Make every later renew call fail with [`BrokerError::LockLost`].
    pub fn lose_lock(&self) {
        self.state.lock_lost.store(true, Ordering::SeqCst);
    }

    /// Number of successful renewals.
    pub fn renewal_count(&self) -> usize {
        self.state.renewals.load(Ordering::SeqCst)
    }

    /// Number of renew calls currently awaiting the (simulated) broker.
    pub fn renewals_in_flight(&self) -> usize {
        self.state.renewals_in_flight.load(Ordering::SeqCst)
    }

    /// Current settlement state.
    pub fn settlement(&self) -> Settlement {
        *lock(&self.state.settlement)
    }

    /// Number of times the message has been handed out.
    pub fn delivery_count(&self) -> u32 {
        self.state.delivery_count.load(Ordering::SeqCst)
    }

    fn settle(&self, settlement: Settlement) -> Result<(), BrokerError> {
        let mut current = lock(&self.state.settlement);
        if *current != Settlement::Pending {
            return Err(BrokerError::LockLost(self.state.message_id.clone()));
        }
        *current = settlement;
        Ok(())
    }
}

impl MessageBody for MemoryMessage {
    fn message_id(&self) -> &str {
        &self.state.message_id
    }

    fn content_type(&self) -> Option<String> {
        self.state.content_type.clone()
    }

    fn take_body(&self) -> Result<Vec<u8>, BrokerError> {
        lock(&self.state.body).take().ok_or(BrokerError::BodyConsumed)
    }

    fn is_body_consumed(&self) -> bool {
        lock(&self.state.body).is_none()
    }

    fn set_property(&self, key: String, value: String) {
        lock(&self.state.properties).insert(key, value);
    }

    fn properties(&self) -> HashMap<String, String> {
        lock(&self.state.properties).clone()
    }
}

#[async_trait]
impl LeasedMessage for MemoryMessage {
    fn locked_until(&self) -> Option<DateTime<Utc>> {
        *lock(&self.state.locked_until)
    }

    async fn renew_lock(&self) -> Result<DateTime<Utc>, BrokerError> {
        self.state.renewals_in_flight.fetch_add(1, Ordering::SeqCst);
        let latency = *lock(&self.state.renew_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.state.renewals_in_flight.fetch_sub(1, Ordering::SeqCst);

        let duration = self
            .state
            .lock_duration
            .ok_or(BrokerError::MissingArgument("message lock"))?;
        if self.state.lock_lost.load(Ordering::SeqCst) || self.settlement() != Settlement::Pending {
            return Err(BrokerError::LockLost(self.state.message_id.clone()));
        }

        let until = Utc::now() + lock_delta(duration);
        *lock(&self.state.locked_until) = Some(until);
        self.state.renewals.fetch_add(1, Ordering::SeqCst);
        Ok(until)
    }

    async fn complete(&self) -> Result<(), BrokerError> {
        self.settle(Settlement::Completed)
    }

    async fn abandon(&self) -> Result<(), BrokerError> {
        self.settle(Settlement::Abandoned)
    }
}

/// An in-memory subscription.
#[derive(Debug)]
pub struct MemorySubscription {
    path: String,
    lock_duration: Duration,
    pending: Mutex<VecDeque<MemoryMessage>>,
    in_flight: Mutex<Vec<MemoryMessage>>,
    receives: AtomicUsize,
}

impl MemorySubscription {
    /// Create an empty subscription whose messages are locked for
    /// `lock_duration` on receive.
    pub fn new(path: impl Into<String>, lock_duration: Duration) -> Self {
        Self {
            path: path.into(),
            lock_duration,
            pending: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(Vec::new()),
            receives: AtomicUsize::new(0),
        }
    }

    /// Enqueue a raw body. Returns a handle to the queued message.
    pub fn push(&self, body: Vec<u8>, content_type: Option<&str>) -> MemoryMessage {
        let message = MemoryMessage::build(body, content_type, Some(self.lock_duration));
        lock(&self.pending).push_back(message.clone());
        message
    }

    /// Enqueue an encoded outbound message.
    pub fn push_outbound(&self, outbound: &OutboundMessage) -> Result<MemoryMessage, BrokerError> {
        let message = self.push(outbound.take_body()?, outbound.content_type().as_deref());
        for (key, value) in outbound.properties() {
            message.set_property(key, value);
        }
        Ok(message)
    }

    /// Messages waiting to be received, including abandoned ones awaiting
    /// redelivery.
    pub fn pending_count(&self) -> usize {
        let abandoned = lock(&self.in_flight)
            .iter()
            .filter(|m| m.settlement() == Settlement::Abandoned)
            .count();
        lock(&self.pending).len() + abandoned
    }

    /// Number of `receive_batch` calls so far.
    pub fn receive_count(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }

    fn requeue_abandoned(&self) {
        let mut in_flight = lock(&self.in_flight);
        let mut pending = lock(&self.pending);
        in_flight.retain(|message| match message.settlement() {
            Settlement::Pending => true,
            Settlement::Completed => false,
            Settlement::Abandoned => {
                pending.push_back(message.clone());
                false
            }
        });
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    type Message = MemoryMessage;

    fn path(&self) -> &str {
        &self.path
    }

    async fn receive_batch(
        &self,
        max_count: usize,
        wait: Duration,
    ) -> Result<Vec<MemoryMessage>, BrokerError> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        self.requeue_abandoned();

        let batch: Vec<MemoryMessage> = {
            let mut pending = lock(&self.pending);
            let count = max_count.min(pending.len());
            pending.drain(..count).collect()
        };

        if batch.is_empty() {
            tokio::time::sleep(wait).await;
            return Ok(batch);
        }

        let mut in_flight = lock(&self.in_flight);
        for message in &batch {
            if message.delivery_count() == 0 {
                message.acquire_lock();
            } else {
                message.redeliver();
            }
            in_flight.push(message.clone());
        }

        Ok(batch)
    }
}
