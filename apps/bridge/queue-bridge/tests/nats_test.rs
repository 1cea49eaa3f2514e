//! End-to-end tests against a real NATS server.
//!
//! Run with `cargo test -- --ignored` when Docker is available.

use core_config::server::ServerConfig;
use messaging::nats::{stream_name, NatsConnector};
use messaging::{Connector, MessageBroker, MessageStream};
use queue_bridge::shutdown;
use queue_bridge::{
    format_json, MessageBuffer, QueueBridgeListener, ResponseDrain, StreamSettings,
    TcpStreamServer,
};
use std::sync::Arc;
use std::time::Duration;
use test_utils::TestNats;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

fn free_port() -> u16 {
    let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_listener_receives_backlog_published_before_it_started() {
    let nats = TestNats::new().await;
    let connector = Arc::new(NatsConnector::new(nats.connection_string(), "bridge-test"));

    let publisher = connector.connect().await.unwrap();
    for i in 0..3 {
        publisher
            .publish_raw("orders", format!(r#"{{"n":{}}}"#, i).as_bytes())
            .await
            .unwrap();
    }
    publisher.close().await.unwrap();

    let listener = Arc::new(QueueBridgeListener::new(
        Arc::clone(&connector),
        MessageBuffer::default(),
    ));
    let (_tx, rx) = shutdown::channel();
    let task = listener.spawn("orders", rx);

    tokio::time::timeout(Duration::from_secs(5), async {
        while listener.buffered() < 3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("backlog should be buffered");

    let payloads: Vec<_> = listener.drain().into_iter().map(|m| m.payload).collect();
    assert_eq!(payloads, [r#"{"n":0}"#, r#"{"n":1}"#, r#"{"n":2}"#]);

    listener.stop().await;
    task.await.unwrap();
    assert!(!listener.is_connected().await);

    // Acknowledged deliveries leave the work queue.
    let mut stream = nats.jetstream().get_stream(stream_name("orders")).await.unwrap();
    assert_eq!(stream.info().await.unwrap().state.messages, 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_declared_queue_keeps_plain_publishes_for_later_subscribers() {
    let nats = TestNats::new().await;
    let connector = Arc::new(NatsConnector::new(nats.connection_string(), "bridge-test"));

    let broker = connector.connect().await.unwrap();
    broker.declare("test_queue").await.unwrap();
    nats.publish("test_queue", r#"{"Value":"early"}"#).await;

    let mut stream = broker.subscribe("test_queue").await.unwrap();
    let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("backlog should be delivered")
        .unwrap();
    assert_eq!(message.payload_text(), r#"{"Value":"early"}"#);
    broker.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_client_receives_message_published_to_nats() {
    let nats = TestNats::new().await;
    let connector = Arc::new(NatsConnector::new(nats.connection_string(), "bridge-test"));
    let declarer = connector.connect().await.unwrap();
    declarer.declare("test_queue").await.unwrap();
    declarer.close().await.unwrap();

    let settings = StreamSettings::new("test_queue")
        .with_intervals(Duration::from_millis(50), Duration::from_millis(50));
    let server = TcpStreamServer::new(connector, settings);
    let (tx, rx) = shutdown::channel();
    let port = free_port();
    let config = ServerConfig::new("127.0.0.1", port, 3, 100);

    let up = tokio::spawn(async move { server.up_server(&config, rx).await });
    let mut client = loop {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            break stream;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert!(up.await.unwrap().success);

    let payload = r#"{"Timestamp":"2024-01-01T10:00:00Z","Value":"x"}"#;
    nats.publish("test_queue", payload).await;

    let expected = format!("{}\n", format_json(payload));
    let mut received = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut received))
        .await
        .expect("no data streamed in time")
        .unwrap();
    assert_eq!(String::from_utf8(received).unwrap(), expected);

    tx.send(true).unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_response_drain_runs_until_cancelled() {
    let nats = TestNats::new().await;
    let connector = Arc::new(NatsConnector::new(nats.connection_string(), "bridge-test"));
    let drain = ResponseDrain::new(connector, "response_queue");
    let (tx, rx) = shutdown::channel();

    let task = tokio::spawn(async move { drain.run(rx).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    nats.publish("response_queue", r#"{"status":"ok"}"#).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!task.is_finished());

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("drain should stop on cancellation")
        .unwrap();
}
