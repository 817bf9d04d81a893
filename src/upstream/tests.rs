use super::*;
use crate::utils::error::UpstreamError;
use std::time::Duration;
use tokio::sync::mpsc;

fn collecting_handler() -> (BatchHandler, mpsc::UnboundedReceiver<InboundMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: BatchHandler = Arc::new(move |batch: Vec<InboundMessage>| {
        for msg in batch {
            let _ = tx.send(msg);
        }
        ConsumeResult::Success
    });
    (handler, rx)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<InboundMessage>) -> InboundMessage {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("consumer queue closed")
}

#[test]
fn test_receipt_display() {
    let receipt = SendReceipt {
        status: SendStatus::SendOk,
        message_id: "ABC".to_string(),
        topic: "orders".to_string(),
    };
    assert_eq!(
        receipt.to_string(),
        "SendResult [sendStatus=SEND_OK, msgId=ABC, topic=orders]"
    );
}

#[tokio::test]
async fn test_published_message_reaches_consumer() {
    let upstream = MemoryUpstream::new("127.0.0.1:9876", 0);
    let producer = upstream.start_producer().await.unwrap();
    let (handler, mut rx) = collecting_handler();
    let consumer = upstream
        .start_consumer("orders", "g1", handler)
        .await
        .unwrap();
    assert_eq!(consumer.topic(), "orders");
    assert_eq!(consumer.group(), "g1");

    let receipt = producer
        .publish("orders", Bytes::from_static(b"42"))
        .await
        .unwrap();
    assert_eq!(receipt.topic, "orders");

    let msg = recv(&mut rx).await;
    assert_eq!(msg.message_id, receipt.message_id);
    assert_eq!(msg.body, Bytes::from_static(b"42"));
}

#[tokio::test]
async fn test_one_consumer_per_group_receives() {
    let upstream = MemoryUpstream::new("127.0.0.1:9876", 0);
    let (h1, mut rx1) = collecting_handler();
    let (h2, mut rx2) = collecting_handler();
    let (h3, mut rx3) = collecting_handler();
    let _c1 = upstream.start_consumer("orders", "g1", h1).await.unwrap();
    let _c2 = upstream.start_consumer("orders", "g1", h2).await.unwrap();
    let _c3 = upstream.start_consumer("orders", "g2", h3).await.unwrap();

    assert_eq!(upstream.inject("orders", "m1", "x"), 2);
    assert_eq!(recv(&mut rx1).await.message_id, "m1");
    assert_eq!(recv(&mut rx3).await.message_id, "m1");
    assert!(rx2.try_recv().is_err());
}

#[tokio::test]
async fn test_inject_without_consumer_is_dropped() {
    let upstream = MemoryUpstream::new("127.0.0.1:9876", 0);
    assert_eq!(upstream.inject("nobody", "m1", "x"), 0);
}

#[tokio::test]
async fn test_consumer_shutdown_detaches() {
    let upstream = MemoryUpstream::new("127.0.0.1:9876", 0);
    let (handler, mut rx) = collecting_handler();
    let consumer = upstream.start_consumer("orders", "g1", handler).await.unwrap();
    assert_eq!(upstream.active_consumers("orders"), 1);

    consumer.shutdown().await;
    assert_eq!(upstream.active_consumers("orders"), 0);
    assert_eq!(upstream.consumers_started(), 1);
    assert_eq!(upstream.inject("orders", "m1", "x"), 0);
    // the handler was dropped with the task
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_producer_retries_transient_failures() {
    let upstream = MemoryUpstream::new("127.0.0.1:9876", 2);
    let producer = upstream.start_producer().await.unwrap();

    upstream.fail_next_publishes(2);
    assert!(producer.publish("orders", Bytes::from_static(b"a")).await.is_ok());

    upstream.fail_next_publishes(3);
    let err = producer
        .publish("orders", Bytes::from_static(b"b"))
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::Send(_)));
}

#[tokio::test]
async fn test_producer_rejects_after_shutdown() {
    let upstream = MemoryUpstream::new("127.0.0.1:9876", 2);
    let producer = upstream.start_producer().await.unwrap();
    producer.shutdown().await;
    let err = producer
        .publish("orders", Bytes::from_static(b"a"))
        .await
        .unwrap_err();
    assert_eq!(err, UpstreamError::Closed);
}

#[tokio::test]
async fn test_start_failures_are_reported() {
    let upstream = MemoryUpstream::new("127.0.0.1:9876", 2);
    upstream.set_fail_producer_start(true);
    assert!(matches!(
        upstream.start_producer().await,
        Err(UpstreamError::Create("producer", _))
    ));

    upstream.set_fail_consumer_start(true);
    let (handler, _rx) = collecting_handler();
    let err = upstream
        .start_consumer("orders", "g1", handler)
        .await
        .err()
        .expect("consumer start should fail");
    assert!(matches!(err, UpstreamError::Subscribe { ref topic, .. } if topic == "orders"));
    assert_eq!(upstream.consumers_started(), 0);
}

#[tokio::test]
async fn test_retry_later_redelivers_until_limit() {
    let upstream = MemoryUpstream::new("127.0.0.1:9876", 2);
    let (tx, mut rx) = mpsc::unbounded_channel();
    // refuse every delivery
    let handler: BatchHandler = Arc::new(move |batch: Vec<InboundMessage>| {
        let msg = &batch[0];
        let _ = tx.send(msg.message_id.clone());
        ConsumeResult::RetryLater
    });
    let _consumer = upstream
        .start_consumer("orders", "g1", handler)
        .await
        .unwrap();

    upstream.inject("orders", "m1", "a");
    upstream.inject("orders", "m2", "b");

    let mut seen = Vec::new();
    for _ in 0..6 {
        let id = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .unwrap();
        seen.push(id);
    }
    // one delivery plus two redeliveries each, in order
    assert_eq!(seen, ["m1", "m1", "m1", "m2", "m2", "m2"]);
    let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(extra.is_err());
}

#[tokio::test]
async fn test_success_after_retry_stops_redelivery() {
    let upstream = MemoryUpstream::new("127.0.0.1:9876", 5);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = attempts.clone();
    let handler: BatchHandler = Arc::new(move |_batch: Vec<InboundMessage>| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let _ = tx.send(n);
        if n < 2 {
            ConsumeResult::RetryLater
        } else {
            ConsumeResult::Success
        }
    });
    let _consumer = upstream
        .start_consumer("orders", "g1", handler)
        .await
        .unwrap();

    upstream.inject("orders", "m1", "a");
    assert_eq!(rx.recv().await, Some(1));
    assert_eq!(rx.recv().await, Some(2));
    let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(extra.is_err());
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
}
