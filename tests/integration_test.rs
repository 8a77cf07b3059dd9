//! Integration tests for the full link flow over the simulated transport.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use spp_link::bluetooth::SimTransport;
use spp_link::{
    ConnectionState, DeviceProfile, DeviceTarget, EventForwarder, LinkError, LinkEvent,
    PeerAddress, SppClient,
};

const ADDR_A: &str = "00:00:00:00:00:01";
const ADDR_OTHER: &str = "00:00:00:00:00:02";
const ADDR_B: &str = "00:00:00:00:00:03";

fn client_with(
    transport: &Arc<SimTransport>,
    profile: DeviceProfile,
) -> (SppClient, UnboundedReceiver<LinkEvent>) {
    let client = SppClient::new(transport.clone(), profile);
    let (forwarder, rx) = EventForwarder::new();
    client.set_state_listener(forwarder.clone());
    client.set_data_listener(forwarder.clone());
    client.set_connection_listener(forwarder.clone());
    client.set_auto_connection_listener(forwarder);
    client.setup_service();
    (client, rx)
}

/// Wait for `expected`, returning the events seen before it.
async fn wait_for(rx: &mut UnboundedReceiver<LinkEvent>, expected: LinkEvent) -> Vec<LinkEvent> {
    let waiting = async {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            if event == expected {
                return seen;
            }
            seen.push(event);
        }
        panic!("event channel closed while waiting for {:?}", expected);
    };
    timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}", expected))
}

fn connected(name: &str, address: &str) -> LinkEvent {
    LinkEvent::DeviceConnected {
        name: name.to_string(),
        address: address.to_string(),
    }
}

fn attempt(name: &str, address: &str) -> LinkEvent {
    LinkEvent::NewConnection {
        name: name.to_string(),
        address: address.to_string(),
    }
}

#[tokio::test]
async fn test_state_absent_until_setup() {
    let transport = Arc::new(SimTransport::new());
    let client = SppClient::new(transport, DeviceProfile::Generic);
    client.settle().await;
    assert_eq!(client.service_state(), None);
    assert!(!client.is_service_available());

    client.setup_service();
    client.settle().await;
    assert_eq!(client.service_state(), Some(ConnectionState::None));
    assert!(client.is_service_available());
}

#[tokio::test]
async fn test_connect_send_and_receive() {
    let transport = Arc::new(SimTransport::new());
    let mut peer = transport.add_peer("Reader", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.connect(ADDR_A);

    let before = wait_for(&mut events, connected("Reader", ADDR_A)).await;
    assert_eq!(
        before,
        vec![
            LinkEvent::StateChanged(ConnectionState::Listening),
            LinkEvent::StateChanged(ConnectionState::Connecting),
            LinkEvent::StateChanged(ConnectionState::Connected),
        ]
    );
    assert_eq!(client.connected_device_name().as_deref(), Some("Reader"));
    assert_eq!(client.connected_device_address(), Some(PeerAddress::new(ADDR_A)));

    let mut remote = peer.next_link().await.unwrap();

    client.send(b"hi").await;
    let mut buf = [0u8; 4];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hi\r\n");

    client.send_text("raw").await;
    let mut buf = [0u8; 3];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"raw");

    remote.write_all(b"data").await.unwrap();
    wait_for(&mut events, LinkEvent::DataReceived(b"data".to_vec())).await;
}

#[tokio::test]
async fn test_hand_reader_prefix() {
    let transport = Arc::new(SimTransport::new());
    let mut peer = transport.add_peer("Blueberry", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::HandReader);

    client.start_service(DeviceTarget::Other);
    client.connect(ADDR_A);
    wait_for(&mut events, connected("Blueberry", ADDR_A)).await;

    let mut remote = peer.next_link().await.unwrap();
    client.send(b"READ").await;
    let mut buf = [0u8; 8];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"$:READ\r\n");
}

#[tokio::test]
async fn test_send_is_silent_when_not_connected() {
    let transport = Arc::new(SimTransport::new());
    let mut peer = transport.add_peer("Reader", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    // Before any link exists.
    client.send(b"lost").await;
    client.send_text("lost").await;

    client.start_service(DeviceTarget::Other);
    client.connect(ADDR_A);
    wait_for(&mut events, connected("Reader", ADDR_A)).await;
    let mut remote = peer.next_link().await.unwrap();

    client.disconnect();
    wait_for(&mut events, LinkEvent::DeviceDisconnected).await;
    client.send(b"late").await;

    let mut received = Vec::new();
    remote.read_to_end(&mut received).await.unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_connection_failure_returns_to_listening() {
    let transport = Arc::new(SimTransport::new());
    transport.add_unreachable_peer("Ghost", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.connect(ADDR_A);

    let before = wait_for(&mut events, LinkEvent::DeviceConnectionFailed).await;
    assert!(before.contains(&LinkEvent::Error(LinkError::ConnectFailed(ADDR_A.to_string()))));
    assert_eq!(before.last(), Some(&LinkEvent::StateChanged(ConnectionState::None)));

    wait_for(&mut events, LinkEvent::StateChanged(ConnectionState::Listening)).await;
    client.settle().await;
    assert_eq!(client.service_state(), Some(ConnectionState::Listening));
}

#[tokio::test]
async fn test_peer_close_reports_disconnect() {
    let transport = Arc::new(SimTransport::new());
    let mut peer = transport.add_peer("Reader", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.connect(ADDR_A);
    wait_for(&mut events, connected("Reader", ADDR_A)).await;

    drop(peer.next_link().await.unwrap());

    let before = wait_for(&mut events, LinkEvent::DeviceDisconnected).await;
    assert!(before
        .iter()
        .any(|e| matches!(e, LinkEvent::Error(LinkError::StreamError(_)))));
    wait_for(&mut events, LinkEvent::StateChanged(ConnectionState::Listening)).await;
    assert_eq!(client.connected_device_name(), None);
    assert_eq!(transport.open_links(), 0);
}

#[tokio::test]
async fn test_incoming_connection_while_listening() {
    let transport = Arc::new(SimTransport::new());
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Android);
    wait_for(&mut events, LinkEvent::StateChanged(ConnectionState::Listening)).await;

    let mut remote = transport.incoming("Phone", ADDR_B);
    wait_for(&mut events, connected("Phone", ADDR_B)).await;

    remote.write_all(b"hello").await.unwrap();
    wait_for(&mut events, LinkEvent::DataReceived(b"hello".to_vec())).await;
    assert_eq!(client.service_state(), Some(ConnectionState::Connected));
}

#[tokio::test]
async fn test_disconnect_restarts_listening() {
    let transport = Arc::new(SimTransport::new());
    let _peer = transport.add_peer("Reader", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.connect(ADDR_A);
    wait_for(&mut events, connected("Reader", ADDR_A)).await;

    client.disconnect();
    let before = wait_for(&mut events, LinkEvent::DeviceDisconnected).await;
    assert_eq!(before, vec![LinkEvent::StateChanged(ConnectionState::None)]);
    wait_for(&mut events, LinkEvent::StateChanged(ConnectionState::Listening)).await;

    client.settle().await;
    assert_eq!(client.service_state(), Some(ConnectionState::Listening));
    assert_eq!(transport.open_links(), 0);
}

#[tokio::test]
async fn test_stop_unblocks_hanging_connect() {
    let transport = Arc::new(SimTransport::new());
    transport.add_hanging_peer("Slow", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.connect(ADDR_A);
    wait_for(&mut events, LinkEvent::StateChanged(ConnectionState::Connecting)).await;

    client.stop_service();
    let before = wait_for(&mut events, LinkEvent::DeviceConnectionFailed).await;
    assert_eq!(before, vec![LinkEvent::StateChanged(ConnectionState::None)]);

    client.settle().await;
    assert_eq!(client.service_state(), Some(ConnectionState::None));
}

#[tokio::test]
async fn test_disconnect_not_blocked_by_pending_send() {
    let transport = Arc::new(SimTransport::new());
    let mut peer = transport.add_peer("Reader", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.connect(ADDR_A);
    wait_for(&mut events, connected("Reader", ADDR_A)).await;

    // The peer never reads, so the send fills the link and stalls.
    let _remote = peer.next_link().await.unwrap();
    let sender = client.clone();
    let pending = tokio::spawn(async move { sender.send(&[0u8; 16384]).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.disconnect();
    timeout(Duration::from_secs(2), client.settle())
        .await
        .expect("coordinator blocked behind a pending send");
    assert_eq!(client.service_state(), Some(ConnectionState::Listening));

    timeout(Duration::from_secs(2), pending)
        .await
        .expect("send never returned")
        .unwrap();
    assert_eq!(transport.open_links(), 0);
}

#[tokio::test]
async fn test_auto_connect_rotates_candidates() {
    let transport = Arc::new(SimTransport::new());
    transport.add_unreachable_peer("Scanner-A", ADDR_A);
    transport.add_unreachable_peer("Other", ADDR_OTHER);
    let _scanner_b = transport.add_peer("Scanner-B", ADDR_B);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.auto_connect("Scanner");

    wait_for(&mut events, LinkEvent::AutoConnectionStarted).await;
    wait_for(&mut events, attempt("Scanner-A", ADDR_A)).await;
    wait_for(&mut events, attempt("Scanner-B", ADDR_B)).await;
    wait_for(&mut events, LinkEvent::DeviceConnectionFailed).await;
    wait_for(&mut events, connected("Scanner-B", ADDR_B)).await;

    assert_eq!(
        transport.connect_attempts(),
        vec![PeerAddress::new(ADDR_A), PeerAddress::new(ADDR_B)]
    );
    assert!(client.is_auto_connect_enabled());
    assert!(!client.is_auto_connecting());
}

#[tokio::test]
async fn test_auto_connect_without_candidates() {
    let transport = Arc::new(SimTransport::new());
    transport.add_unreachable_peer("Printer", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.auto_connect("Scanner");
    client.settle().await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let not_found = seen
        .iter()
        .filter(|e| **e == LinkEvent::DeviceNotFound("Scanner".to_string()))
        .count();
    assert_eq!(not_found, 1);
    assert!(!seen.contains(&LinkEvent::AutoConnectionStarted));
    assert!(!client.is_auto_connect_enabled());
    assert!(transport.connect_attempts().is_empty());
}

#[tokio::test]
async fn test_auto_connect_twice_is_ignored() {
    let transport = Arc::new(SimTransport::new());
    let _scanner = transport.add_peer("Scanner-A", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.auto_connect("Scanner");
    wait_for(&mut events, connected("Scanner-A", ADDR_A)).await;

    client.auto_connect("Other");
    client.settle().await;
    assert!(events.try_recv().is_err());
    assert_eq!(transport.connect_attempts().len(), 1);
}

#[tokio::test]
async fn test_auto_connect_rearms_after_link_loss() {
    let transport = Arc::new(SimTransport::new());
    transport.add_unreachable_peer("Scanner-A", ADDR_A);
    let mut scanner_b = transport.add_peer("Scanner-B", ADDR_B);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.auto_connect("Scanner");
    wait_for(&mut events, connected("Scanner-B", ADDR_B)).await;

    drop(scanner_b.next_link().await.unwrap());

    wait_for(&mut events, LinkEvent::DeviceDisconnected).await;
    wait_for(&mut events, LinkEvent::AutoConnectionStarted).await;
    wait_for(&mut events, attempt("Scanner-A", ADDR_A)).await;
    wait_for(&mut events, connected("Scanner-B", ADDR_B)).await;
    assert!(scanner_b.next_link().await.is_some());
    assert_eq!(transport.connect_attempts().len(), 4);
}

#[tokio::test]
async fn test_listener_set_during_auto_connect_is_kept() {
    let transport = Arc::new(SimTransport::new());
    let mut scanner = transport.add_peer("Scanner-A", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.auto_connect("Scanner");
    wait_for(&mut events, connected("Scanner-A", ADDR_A)).await;

    let (second, mut second_events) = EventForwarder::new();
    client.set_connection_listener(second);

    // Still auto-connecting: the replacement receives forwarded events.
    drop(scanner.next_link().await.unwrap());
    wait_for(&mut second_events, LinkEvent::DeviceDisconnected).await;
    wait_for(&mut second_events, connected("Scanner-A", ADDR_A)).await;

    client.stop_auto_connect();
    client.settle().await;
    assert!(!client.is_auto_connect_enabled());

    // After stopping, the same listener is notified directly.
    drop(scanner.next_link().await.unwrap());
    wait_for(&mut second_events, LinkEvent::DeviceDisconnected).await;
    wait_for(&mut events, LinkEvent::StateChanged(ConnectionState::Listening)).await;
    client.settle().await;
    assert_eq!(transport.connect_attempts().len(), 2);
}

#[tokio::test]
async fn test_rapid_stop_start_keeps_single_link() {
    let transport = Arc::new(SimTransport::new());
    let _peer = transport.add_peer("Reader", ADDR_A);
    let (client, _events) = client_with(&transport, DeviceProfile::Generic);

    for _ in 0..25 {
        client.stop_service();
        client.start_service(DeviceTarget::Other);
        client.connect(ADDR_A);
    }
    client.settle().await;

    timeout(Duration::from_secs(5), async {
        while client.service_state() != Some(ConnectionState::Connected) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("never connected");

    assert_eq!(transport.open_links(), 1);
    assert!(transport.max_open_links() <= 1);
    assert!(!transport.connect_attempts().is_empty());
}

#[tokio::test]
async fn test_explicit_disconnect_rearms_without_connecting() {
    let transport = Arc::new(SimTransport::new());
    let _scanner = transport.add_peer("Scanner-A", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.auto_connect("Scanner");
    wait_for(&mut events, connected("Scanner-A", ADDR_A)).await;

    client.disconnect();
    let before = wait_for(&mut events, LinkEvent::AutoConnectionStarted).await;
    assert_eq!(
        before,
        vec![
            LinkEvent::StateChanged(ConnectionState::None),
            LinkEvent::DeviceDisconnected,
        ]
    );
    wait_for(&mut events, LinkEvent::StateChanged(ConnectionState::Listening)).await;
    client.settle().await;

    assert!(events.try_recv().is_err());
    assert!(client.is_auto_connect_enabled());
    assert!(!client.is_auto_connecting());
    assert_eq!(transport.connect_attempts().len(), 1);
}

#[tokio::test]
async fn test_stop_service_rearms_auto_connect() {
    let transport = Arc::new(SimTransport::new());
    let _scanner = transport.add_peer("Scanner-A", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    client.start_service(DeviceTarget::Other);
    client.auto_connect("Scanner");
    wait_for(&mut events, connected("Scanner-A", ADDR_A)).await;

    client.stop_service();
    wait_for(&mut events, LinkEvent::DeviceDisconnected).await;
    wait_for(&mut events, LinkEvent::AutoConnectionStarted).await;
    client.settle().await;

    assert!(events.try_recv().is_err());
    assert_eq!(client.service_state(), Some(ConnectionState::None));
    assert!(client.is_auto_connect_enabled());
    assert_eq!(transport.connect_attempts().len(), 1);
}

#[tokio::test]
async fn test_auto_connect_failure_while_stopped_is_not_forwarded() {
    let transport = Arc::new(SimTransport::new());
    transport.add_unreachable_peer("Scanner-A", ADDR_A);
    let (client, mut events) = client_with(&transport, DeviceProfile::Generic);

    // Set up but never started.
    client.auto_connect("Scanner");
    wait_for(&mut events, attempt("Scanner-A", ADDR_A)).await;
    let before = wait_for(&mut events, LinkEvent::StateChanged(ConnectionState::None)).await;
    assert!(before.contains(&LinkEvent::StateChanged(ConnectionState::Connecting)));
    client.settle().await;

    let mut after = Vec::new();
    while let Ok(event) = events.try_recv() {
        after.push(event);
    }
    assert!(!before.contains(&LinkEvent::DeviceConnectionFailed));
    assert!(!after.contains(&LinkEvent::DeviceConnectionFailed));
    assert_eq!(transport.connect_attempts(), vec![PeerAddress::new(ADDR_A)]);
    assert!(client.is_auto_connect_enabled());
    assert!(!client.is_auto_connecting());
    assert_eq!(client.service_state(), Some(ConnectionState::None));
}
