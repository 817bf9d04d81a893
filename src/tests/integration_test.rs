use crate::broker::Broker;
use crate::client::GatewayClient;
use crate::forward::CallbackForwarder;
use crate::transport::message::{ErrorCode, HealthStatus, ServerMessage};
use crate::transport::websocket::GatewayServer;
use crate::upstream::MemoryUpstream;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

async fn start_gateway(broker: Broker) -> (String, Arc<Broker>) {
    let broker = Arc::new(broker);
    broker.init_producer().await.unwrap();
    let server = GatewayServer::bind("127.0.0.1:0", broker.clone())
        .await
        .unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    tokio::spawn(server.run());
    (url, broker)
}

fn memory_broker() -> (Broker, MemoryUpstream) {
    let upstream = MemoryUpstream::new("127.0.0.1:9876", 0);
    let broker = Broker::new(Arc::new(upstream.clone()), "gateway-group");
    (broker, upstream)
}

async fn next_message(client: &mut GatewayClient) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(2), client.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("client error")
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn integration_send_reaches_subscriber() {
    let (broker, _upstream) = memory_broker();
    let (url, broker) = start_gateway(broker).await;

    let mut subscriber = GatewayClient::connect(&url).await.unwrap();
    let mut publisher = GatewayClient::connect(&url).await.unwrap();

    let ack = subscriber.subscribe("orders", Some("c1")).await.unwrap();
    assert_eq!(
        ack,
        ServerMessage::Subscribed {
            topic: "orders".to_string(),
            client_id: "c1".to_string(),
        }
    );

    match publisher.send("orders", "hello world").await.unwrap() {
        ServerMessage::SendResult { result } => assert!(result.contains("SEND_OK")),
        other => panic!("unexpected reply: {other:?}"),
    }

    match next_message(&mut subscriber).await {
        ServerMessage::Message { topic, body, .. } => {
            assert_eq!(topic, "orders");
            assert_eq!(body, "hello world");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let stats = broker.stats();
    assert_eq!(stats.messages_sent, 1);
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.subscriber_count, 1);
}

#[tokio::test]
async fn integration_disconnected_client_does_not_affect_others() {
    let (broker, upstream) = memory_broker();
    let (url, broker) = start_gateway(broker).await;

    let mut a = GatewayClient::connect(&url).await.unwrap();
    let mut b = GatewayClient::connect(&url).await.unwrap();
    a.subscribe("orders", Some("a")).await.unwrap();
    b.subscribe("orders", Some("b")).await.unwrap();
    assert_eq!(broker.stats().subscriber_count, 2);

    b.close().await.unwrap();
    wait_until(|| broker.stats().subscriber_count == 1).await;
    assert_eq!(broker.subscriber_ids("orders"), vec!["a".to_string()]);

    for id in ["m1", "m2"] {
        upstream.inject("orders", id, "tick");
    }
    for id in ["m1", "m2"] {
        match next_message(&mut a).await {
            ServerMessage::Message { message_id, .. } => assert_eq!(message_id, id),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(broker.stats().errors, 0);
}

#[tokio::test]
async fn integration_unary_errors_and_health() {
    let (broker, _upstream) = memory_broker();
    let (url, broker) = start_gateway(broker).await;
    let mut client = GatewayClient::connect(&url).await.unwrap();

    match client.send("", "hello").await.unwrap() {
        ServerMessage::Error { code, message, .. } => {
            assert_eq!(code, ErrorCode::InvalidArgument);
            assert_eq!(message, "topic cannot be empty");
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    client.send("orders", "hello").await.unwrap();
    match client.health_check("gateway").await.unwrap() {
        ServerMessage::Health { status, stats, .. } => {
            assert_eq!(status, HealthStatus::Serving);
            let stats = stats.unwrap();
            assert_eq!(stats.messages_sent, 1);
            assert_eq!(stats, broker.stats());
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn integration_consumed_messages_are_forwarded() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let callback_url = format!("http://{}/hook", listener.local_addr().unwrap());
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = vec![0u8; 4096];
            let mut len = 0;
            // small requests: read until the body we expect is in
            while !String::from_utf8_lossy(&buf[..len]).ends_with("tick") {
                let n = stream.read(&mut buf[len..]).await.unwrap();
                if n == 0 {
                    break;
                }
                len += n;
            }
            let _ = tx.send(String::from_utf8_lossy(&buf[..len]).to_string());
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
        }
    });

    let (broker, upstream) = memory_broker();
    let forwarder = CallbackForwarder::new(&callback_url, Duration::from_secs(2)).unwrap();
    let (url, broker) = start_gateway(broker.with_forwarder(forwarder)).await;

    let mut client = GatewayClient::connect(&url).await.unwrap();
    client.subscribe("orders", None).await.unwrap();
    upstream.inject("orders", "m1", "tick");

    let request = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("callback not called")
        .unwrap();
    assert!(request.starts_with("POST /hook"));
    assert!(request.to_ascii_lowercase().contains("content-type: text/plain"));
    assert!(matches!(
        next_message(&mut client).await,
        ServerMessage::Message { .. }
    ));
    assert_eq!(broker.stats().messages_received, 1);
}

#[tokio::test]
async fn integration_shutdown_stops_consumers() {
    let (broker, upstream) = memory_broker();
    let (url, broker) = start_gateway(broker).await;
    let mut client = GatewayClient::connect(&url).await.unwrap();
    client.subscribe("orders", None).await.unwrap();
    assert_eq!(upstream.active_consumers("orders"), 1);

    broker.shutdown().await;
    assert_eq!(upstream.active_consumers("orders"), 0);
    assert_eq!(upstream.inject("orders", "m1", "late"), 0);
    assert_eq!(broker.stats().messages_received, 0);
}
