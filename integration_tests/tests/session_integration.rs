//! Cloud authorization and connection driver flows
mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pairlink::pairing::TokenError;
use pairlink::protocol::messages::{CloudStatus, ProtocolVersion, ResponseCode, RtsMessage};
use pairlink::testing::{MockClient, MockCloud, MockWifi};
use pairlink::{Collaborators, EventBus, PairingEvent};

use common::{init_logging, messages, pairing_harness, test_config};

#[tokio::test]
async fn test_owned_robot_cloud_authorizes_secondary_user() {
    init_logging();
    let (mut h, store) = pairing_harness(test_config(), ProtocolVersion::Current);
    h.session.set_has_owner(true);
    h.session.set_cloud_available(true);

    h.pair_first_time(None).unwrap();
    assert!(store.contents().unwrap().clients.is_empty());

    let inbound = h
        .send(&RtsMessage::WifiAccessPointRequest { enable: true })
        .unwrap();
    assert!(matches!(
        messages(&inbound).as_slice(),
        [RtsMessage::Response {
            code: ResponseCode::NotCloudAuthorized,
            ..
        }]
    ));

    let collaborators = Collaborators::new()
        .with_cloud(Arc::new(MockCloud::new(
            TokenError::NoError,
            TokenError::NoError,
        )))
        .with_wifi(Arc::new(MockWifi::online("6e6574")));
    h.send(&RtsMessage::CloudSessionRequest {
        session_token: "tok-3f9a".to_string(),
        client_name: "Tablet".to_string(),
        app_id: "companion".to_string(),
    })
    .unwrap();
    let inbound = h.run_jobs(&collaborators).await;

    assert_eq!(
        messages(&inbound),
        vec![RtsMessage::CloudSessionResponse {
            success: true,
            status: CloudStatus::AuthorizedAsSecondary,
            client_token_guid: "app-token".to_string(),
        }]
    );
    assert_eq!(store.contents().unwrap().clients.len(), 1);
    assert!(h.events().contains(&PairingEvent::CloudAuthorized { primary: false }));
}

async fn drain(outbound: &mut tokio::sync::mpsc::UnboundedReceiver<Bytes>) -> Vec<Vec<u8>> {
    let mut packets = Vec::new();
    while let Ok(Some(packet)) =
        tokio::time::timeout(Duration::from_millis(10), outbound.recv()).await
    {
        packets.push(packet.to_vec());
    }
    packets
}

#[tokio::test(start_paused = true)]
async fn test_driver_stops_after_repeated_timeouts() {
    init_logging();
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let mut link = pairlink::driver::open(test_config(), Collaborators::new(), events).unwrap();
    let mut client = MockClient::new(ProtocolVersion::Current, 20).unwrap();

    link.handle.begin_pairing().await.unwrap();
    assert_eq!(client.receive(&drain(&mut link.outbound).await).len(), 1);

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(61)).await;
    }

    let snapshot = link.handle.snapshot().await.unwrap();
    assert!(snapshot.stopped);
    assert_eq!(snapshot.attempts, 3);

    let mut stop_requested = false;
    while let Ok(event) = rx.try_recv() {
        stop_requested |= event == PairingEvent::StopPairingRequested;
    }
    assert!(stop_requested);

    link.handle.disconnect().await.unwrap();
    link.join().await;
}

#[tokio::test]
async fn test_driver_rejects_unsupported_handshake() {
    init_logging();
    let mut link = pairlink::driver::open(test_config(), Collaborators::new(), EventBus::new())
        .unwrap();
    let mut client = MockClient::new(ProtocolVersion::Current, 20).unwrap();

    link.handle.begin_pairing().await.unwrap();
    drain(&mut link.outbound).await;

    for packet in client.handshake_with(9).unwrap() {
        link.inbound.send(Bytes::from(packet)).await.unwrap();
    }
    let inbound = client.receive(&drain(&mut link.outbound).await);
    assert!(messages(&inbound).contains(&RtsMessage::CancelPairing));
    assert!(link.handle.snapshot().await.unwrap().stopped);
}
