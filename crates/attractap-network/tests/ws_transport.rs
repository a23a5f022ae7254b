//! Integration tests for WsTransport against a local WebSocket server.

use attractap_core::ServerConfig;
use attractap_network::{Transport, TransportConfig, WsTransport, WsTransportConfig};
use attractap_protocol::Frame;
use futures::{SinkExt, StreamExt};
use rstest::rstest;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

fn config_for(addr: SocketAddr) -> TransportConfig {
    TransportConfig::new(ServerConfig::new(addr.ip().to_string(), addr.port()))
}

/// Echo text and binary messages until the client goes away.
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = socket.next().await {
            if message.is_text() || message.is_binary() {
                socket.send(message).await.unwrap();
            }
        }
    });
    addr
}

#[rstest]
#[case::envelope(Frame::text(r#"{"event":"HEARTBEAT","data":{}}"#))]
#[case::firmware_chunk(Frame::binary(vec![0xE9; 4096]))]
#[tokio::test]
async fn test_frames_roundtrip(#[case] frame: Frame) {
    let addr = spawn_echo_server().await;
    let mut transport = WsTransport::default();
    transport.connect(&config_for(addr)).await.unwrap();
    assert!(transport.is_connected());

    transport.send(frame.clone()).await.unwrap();
    assert_eq!(transport.recv().await, Some(frame));

    transport.close().await;
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_server_close_ends_recv() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(stream).await.unwrap();
        socket.send(Message::Ping(vec![1, 2])).await.unwrap();
        socket.close(None).await.unwrap();
    });

    let mut transport = WsTransport::default();
    transport.connect(&config_for(addr)).await.unwrap();
    assert_eq!(transport.recv().await, None);
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_oversized_message_is_dropped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(stream).await.unwrap();
        socket.send(Message::Text("x".repeat(200))).await.unwrap();
        socket.send(Message::Text("{}".to_string())).await.unwrap();
        while socket.next().await.is_some() {}
    });

    let mut transport = WsTransport::new(WsTransportConfig::default().with_max_message_size(100));
    transport.connect(&config_for(addr)).await.unwrap();
    assert_eq!(transport.recv().await, Some(Frame::text("{}")));
}

#[tokio::test]
async fn test_refused_connection_is_not_a_certificate_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut transport = WsTransport::default();
    let error = transport.connect(&config_for(addr)).await.unwrap_err();
    assert!(!error.is_certificate_error());
    assert!(!transport.is_connected());
}
