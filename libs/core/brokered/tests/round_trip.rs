//! End-to-end tests for the public API
//!
//! These tests go through the in-memory broker the way an application would:
//! - encode a payload and publish it
//! - receive it under a lock and run it through the request processor
//! - drain whatever is left

use brokered::memory::{MemorySubscription, Settlement};
use brokered::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Foo {
    bar: i32,
    baz: Option<String>,
}

impl_payload!(Foo, name = "Foo", contract = ("Foo", 1), properties {
    "Bar" => bar,
    "Baz" => baz,
});

fn config() -> BrokeredConfig {
    BrokeredConfig::default()
        .with_drain_wait(Duration::from_millis(5))
        .with_min_renew_interval(Duration::from_millis(10))
}

#[tokio::test]
async fn test_publish_receive_process() {
    init_test_tracing();
    let subscription = MemorySubscription::new("foo/subscriptions/all", Duration::from_millis(80));
    let expected = Foo {
        bar: 2,
        baz: Some("xxx".to_string()),
    };

    let options = config().with_property_projection(true).encode_options();
    let outbound = encode(&expected, options).unwrap();
    assert_eq!(outbound.properties().get("FooBar").map(String::as_str), Some("2"));
    subscription.push_outbound(&outbound).unwrap();

    let mut batch = subscription
        .receive_batch(DRAIN_BATCH_SIZE, Duration::from_millis(5))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    let message = Arc::new(batch.remove(0));
    assert_eq!(message.content_type().as_deref(), Some(JSON_CONTENT_TYPE));
    assert_eq!(message.properties().get("FooBaz").map(String::as_str), Some("xxx"));

    let processor = RequestProcessor::from_config(&config());
    let result: Result<Option<Foo>, BrokerError> = processor
        .process(message.clone(), |foo: Foo| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Some(foo))
        })
        .await;

    assert_eq!(result.unwrap(), Some(expected));
    assert!(message.renewal_count() >= 2);
    message.complete().await.unwrap();
    assert_eq!(message.settlement(), Settlement::Completed);
}

#[tokio::test]
async fn test_binary_publish_and_drain() {
    let subscription = MemorySubscription::new("foo/subscriptions/binary", Duration::from_secs(30));
    for bar in 0..12 {
        let foo = Foo {
            bar,
            baz: Some("x".repeat(10_000)),
        };
        let outbound = encode(&foo, EncodeOptions::binary()).unwrap();
        assert_eq!(outbound.content_type(), None);
        subscription.push_outbound(&outbound).unwrap();
    }

    let drained = drain(&subscription, Duration::from_millis(5)).await.unwrap();

    assert_eq!(drained.pending_count(), 0);
    assert_eq!(drained.receive_count(), 3);
}

#[tokio::test]
async fn test_failed_processing_leaves_message_unsettled() {
    let subscription =
        MemorySubscription::new("foo/subscriptions/failing", Duration::from_secs(30));
    let outbound = encode(&Foo { bar: 1, baz: None }, EncodeOptions::json()).unwrap();
    let queued = subscription.push_outbound(&outbound).unwrap();

    let mut batch = subscription
        .receive_batch(1, Duration::from_millis(5))
        .await
        .unwrap();
    let message = Arc::new(batch.remove(0));

    let result: Result<bool, BrokerError> =
        process_request(message.clone(), |foo: Foo| async move { Ok(foo.baz.is_some()) }).await;

    assert!(matches!(result, Err(BrokerError::ProcessingFailed)));
    assert_eq!(queued.settlement(), Settlement::Pending);

    message.abandon().await.unwrap();
    drain(&subscription, Duration::from_millis(5)).await.unwrap();
    assert_eq!(queued.settlement(), Settlement::Completed);
}

fn init_test_tracing() {
    telemetry::init_tracing(Environment::Development);
}
