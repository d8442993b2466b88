use super::*;
use crate::protocol::messages::ProtocolVersion;
use crate::transport::RawChannel;

#[test]
fn test_recording_channel_shares_queue_between_clones() {
    let channel = RecordingChannel::new();
    let mut sender = channel.clone();

    sender.send(&[0x42, 0x01]).unwrap();
    sender.send(&[0x43]).unwrap();

    assert!(!channel.is_empty());
    assert_eq!(channel.take_packets(), vec![vec![0x42, 0x01], vec![0x43]]);
    assert!(channel.is_empty());
}

#[test]
fn test_shared_store_counts_and_fails_saves() {
    let store = SharedStore::new();
    let mut handle = store.boxed();
    let sessions = SavedSessions::placeholder("Vector-T3S7");

    handle.save(&sessions).unwrap();
    assert_eq!(store.save_count(), 1);
    assert_eq!(store.contents().unwrap().name, "Vector-T3S7");

    store.set_fail_saves(true);
    assert!(handle.save(&sessions).is_err());
    assert_eq!(store.save_count(), 1);
}

#[test]
fn test_mock_client_handshake_is_one_packet() {
    let mut client = MockClient::new(ProtocolVersion::V4, 20).unwrap();
    let packets = client.handshake().unwrap();

    assert_eq!(packets.len(), 1);
    assert!(!client.has_keys());
    assert!(client.robot_public_key().is_none());
}

#[test]
fn test_mock_client_sees_robot_handshake() {
    let mut robot = MockClient::new(ProtocolVersion::Current, 20).unwrap();
    let mut app = MockClient::new(ProtocolVersion::Current, 20).unwrap();

    let packets = robot.handshake_with(5).unwrap();
    let inbound = app.receive(&packets);

    assert!(matches!(inbound.as_slice(), [Inbound::Handshake(5)]));
}

#[test]
fn test_malformed_inbound_compares_by_error() {
    use crate::protocol::messages::MessageError;

    let inbound = Inbound::Malformed(MessageError::UnknownTag(0x7f));
    assert_eq!(inbound.clone(), inbound);
    assert_ne!(inbound, Inbound::Malformed(MessageError::UnknownTag(0x7e)));
    assert!(inbound.message().is_none());
}

#[tokio::test]
async fn test_mock_wifi_connect_goes_online() {
    use crate::pairing::{WifiController, WifiCredentials};
    use crate::protocol::messages::{WifiConnState, WifiConnectResult};

    let wifi = MockWifi::new(Vec::new());
    assert_eq!(wifi.status().await.state, WifiConnState::Disconnected);

    let credentials = WifiCredentials {
        ssid_hex: "6e6574".to_string(),
        password: "hunter22".to_string(),
        auth_type: 6,
        hidden: false,
    };
    assert_eq!(wifi.connect(&credentials).await, WifiConnectResult::Success);
    assert_eq!(wifi.status().await.state, WifiConnState::Online);

    let refusing = MockWifi::new(Vec::new()).refusing(WifiConnectResult::InvalidKey);
    assert_eq!(
        refusing.connect(&credentials).await,
        WifiConnectResult::InvalidKey
    );
    assert_eq!(refusing.connects().len(), 1);
}
