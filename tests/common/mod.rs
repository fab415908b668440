//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rtms_broker::broker::{ConnHandle, Frame, Packet, Service, ServiceError, Ssid, TopicObserver};
use rtms_broker::config::{BrokerConfig, ListenerConfig};
use rtms_broker::net::MuxListener;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Observer that records every callback as a string and echoes publishes
/// back to the publishing connection.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

impl TopicObserver for RecordingObserver {
    fn on_subscribe(&self, _: &ConnHandle, _: &Ssid, channel: &str) {
        self.events.lock().unwrap().push(format!("sub:{channel}"));
    }

    fn on_unsubscribe(&self, _: &ConnHandle, _: &Ssid, channel: &str) {
        self.events.lock().unwrap().push(format!("unsub:{channel}"));
    }

    fn on_publish(&self, conn: &ConnHandle, frame: &Frame) {
        {
            let mut events = self.events.lock().unwrap();
            for message in frame.messages() {
                events.push(format!("pub:{}", message.channel));
            }
        }
        conn.send(frame.clone());
    }
}

/// Listener config for tests: loopback, short sniff deadline.
pub fn listener_config() -> ListenerConfig {
    ListenerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        read_timeout_ms: 2_000,
        ..ListenerConfig::default()
    }
}

/// Bind a mux on an ephemeral loopback port.
pub async fn bind_mux() -> MuxListener {
    bind_mux_with(&listener_config()).await
}

/// Bind a mux on an ephemeral loopback port with custom listener settings.
pub async fn bind_mux_with(config: &ListenerConfig) -> MuxListener {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    MuxListener::from_listener(listener, config).unwrap()
}

/// A running broker on an ephemeral port.
pub struct Broker {
    pub service: Arc<Service>,
    pub addr: SocketAddr,
    pub observer: Arc<RecordingObserver>,
    pub task: JoinHandle<Result<(), ServiceError>>,
}

pub async fn start_broker() -> Broker {
    let mut config = BrokerConfig::default();
    config.listener = listener_config();

    let observer = Arc::new(RecordingObserver::default());
    let service = Service::new(config, observer.clone());
    let mux = bind_mux().await;
    let addr = mux.local_addr();
    let task = tokio::spawn(Arc::clone(&service).serve(mux));

    Broker {
        service,
        addr,
        observer,
        task,
    }
}

/// Write one length-delimited frame.
pub async fn write_frame(stream: &mut TcpStream, body: &[u8]) {
    stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();
}

/// Read one length-delimited frame.
pub async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut body).await.unwrap();
    body
}

pub async fn send_packet(stream: &mut TcpStream, packet: &Packet) {
    write_frame(stream, &packet.encode().unwrap()).await;
}

pub fn subscribe(topic: &str) -> Packet {
    Packet::Subscribe {
        ssid: Ssid::from_topic(topic),
        channel: topic.to_string(),
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
