//! End-to-end broker tests: raw TCP, HTTP and WebSocket on one port.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rtms_broker::broker::{Frame, Packet, Ssid};
use rtms_broker::http::StatusReport;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;

mod common;

use common::{read_frame, send_packet, subscribe, wait_until, write_frame};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn raw_client_subscriptions_are_released_on_disconnect() {
    let broker = common::start_broker().await;
    let baseline = broker.service.connection_count();

    let mut client = TcpStream::connect(broker.addr).await.unwrap();
    send_packet(&mut client, &subscribe("a/b")).await;
    send_packet(&mut client, &subscribe("a/b")).await;

    wait_until("subscribe", || broker.observer.count("sub:a/b") == 1).await;
    assert_eq!(broker.service.connection_count(), baseline + 1);
    assert_eq!(broker.service.subscriptions().len(), 1);

    drop(client);
    wait_until("disconnect", || broker.service.connection_count() == baseline).await;

    assert_eq!(broker.observer.count("unsub:a/b"), 1);
    assert!(broker.service.subscriptions().is_empty());

    broker.service.close();
    timeout(WAIT, broker.task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn raw_client_receives_published_frames() {
    let broker = common::start_broker().await;
    let mut client = TcpStream::connect(broker.addr).await.unwrap();

    let mut messages = Frame::new();
    messages.append(0, Ssid::from_topic("chat"), "chat", b"hi".to_vec());
    send_packet(&mut client, &Packet::Publish { messages }).await;

    let body = timeout(WAIT, read_frame(&mut client)).await.unwrap();
    let echoed = Frame::decode(&body).unwrap();
    assert_eq!(echoed.len(), 1);
    assert_eq!(echoed.messages()[0].channel, "chat");
    assert_eq!(echoed.messages()[0].payload, b"hi");
    assert!(echoed.messages()[0].time > 0);

    broker.service.close();
    timeout(WAIT, broker.task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn undecodable_frame_closes_raw_connection() {
    let broker = common::start_broker().await;
    let mut client = TcpStream::connect(broker.addr).await.unwrap();

    write_frame(&mut client, b"definitely not zlib").await;

    let mut buf = [0u8; 1];
    let read = timeout(WAIT, client.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    wait_until("close", || broker.service.connection_count() == 0).await;

    broker.service.close();
    timeout(WAIT, broker.task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn health_and_status_share_the_port() {
    let broker = common::start_broker().await;
    let base = format!("http://{}", broker.addr);

    let health = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    assert!(health.text().await.unwrap().is_empty());

    let mut client = TcpStream::connect(broker.addr).await.unwrap();
    send_packet(&mut client, &subscribe("news")).await;
    wait_until("subscribe", || broker.observer.count("sub:news") == 1).await;

    let status: StatusReport = reqwest::get(format!("{base}/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.connections, 1);
    assert_eq!(status.topics, 1);

    let missing = reqwest::get(format!("{base}/nope")).await.unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    drop(missing);

    broker.service.close();
    timeout(WAIT, broker.task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn websocket_client_round_trip() {
    let broker = common::start_broker().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/", broker.addr))
        .await
        .unwrap();

    let request = subscribe("live/scores").encode().unwrap();
    ws.send(WsMessage::Binary(request.into())).await.unwrap();
    wait_until("subscribe", || broker.observer.count("sub:live/scores") == 1).await;

    let mut messages = Frame::new();
    messages.append(7, Ssid::from_topic("live/scores"), "live/scores", b"1-0".to_vec());
    let publish = Packet::Publish { messages }.encode().unwrap();
    ws.send(WsMessage::Binary(publish.into())).await.unwrap();

    let reply = loop {
        match timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(WsMessage::Binary(bytes))) => break bytes,
            Some(Ok(_)) => continue,
            other => panic!("unexpected websocket event: {other:?}"),
        }
    };
    let echoed = Frame::decode(&reply).unwrap();
    assert_eq!(echoed.messages()[0].time, 7);
    assert_eq!(echoed.messages()[0].payload, b"1-0");

    ws.close(None).await.unwrap();
    wait_until("disconnect", || broker.service.connection_count() == 0).await;
    assert_eq!(broker.observer.count("unsub:live/scores"), 1);

    broker.service.close();
    timeout(WAIT, broker.task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    let broker = common::start_broker().await;
    let mut raw = TcpStream::connect(broker.addr).await.unwrap();
    send_packet(&mut raw, &subscribe("t")).await;
    wait_until("subscribe", || broker.service.connection_count() == 1).await;

    broker.service.close();
    broker.service.close();
    timeout(WAIT, broker.task).await.unwrap().unwrap().unwrap();

    assert_eq!(broker.service.connection_count(), 0);
    assert!(broker.service.subscriptions().is_empty());
    let mut buf = [0u8; 1];
    let read = timeout(WAIT, raw.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}
