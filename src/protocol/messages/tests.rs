use super::*;

fn caps(version: ProtocolVersion) -> Capabilities {
    version.capabilities()
}

fn sample_status() -> StatusReport {
    StatusReport {
        ssid_hex: "486f6d65".to_string(),
        wifi_state: WifiConnState::Online,
        access_point: false,
        ble_state: 1,
        battery_state: 2,
        build_id: "1.8.0.6051".to_string(),
        serial_number: "00e20115".to_string(),
        ota_in_progress: false,
        has_owner: true,
        cloud_authorized: true,
    }
}

#[test]
fn test_handshake_layout() {
    let bytes = Handshake::new(ProtocolVersion::Current).encode();
    assert_eq!(bytes, [0x01, 0x05, 0x00, 0x00, 0x00]);

    let parsed = Handshake::decode(&bytes).unwrap();
    assert_eq!(parsed.supported_version(), Some(ProtocolVersion::Current));
}

#[test]
fn test_handshake_rejects_short_and_foreign() {
    assert!(matches!(
        Handshake::decode(&[0x01, 0x05, 0x00]),
        Err(MessageError::Truncated { available: 3, .. })
    ));
    assert!(matches!(
        Handshake::decode(&[0x02, 0x05, 0x00, 0x00, 0x00]),
        Err(MessageError::NotHandshake(0x02))
    ));
    assert!(Handshake::decode(&[]).is_err());
}

#[test]
fn test_handshake_unknown_version() {
    let parsed = Handshake::decode(&[0x01, 0x09, 0x00, 0x00, 0x00]).unwrap();
    assert_eq!(parsed.version, 9);
    assert_eq!(parsed.supported_version(), None);
}

#[test]
fn test_envelope_carries_generation_and_tag() {
    let bytes = RtsMessage::Ack {
        tag: MessageTag::Nonce as u8,
    }
    .encode(&caps(ProtocolVersion::V4))
    .unwrap();
    assert_eq!(bytes, vec![4, MessageTag::Ack as u8, MessageTag::Nonce as u8]);
}

#[test]
fn test_challenge_is_little_endian() {
    let bytes = RtsMessage::Challenge { value: 0x0102_0304 }
        .encode(&caps(ProtocolVersion::Current))
        .unwrap();
    assert_eq!(&bytes[2..], &[0x04, 0x03, 0x02, 0x01]);
}

#[test]
fn test_wrong_generation_rejected() {
    let bytes = RtsMessage::StatusRequest
        .encode(&caps(ProtocolVersion::V4))
        .unwrap();
    let err = RtsMessage::decode(&bytes, &caps(ProtocolVersion::Current)).unwrap_err();
    assert!(matches!(
        err,
        MessageError::WrongGeneration {
            expected: 5,
            actual: 4
        }
    ));
}

#[test]
fn test_unknown_tag_rejected() {
    let err = RtsMessage::decode(&[5, 0xEE], &caps(ProtocolVersion::Current)).unwrap_err();
    assert!(matches!(err, MessageError::UnknownTag(0xEE)));
}

#[test]
fn test_generation_gated_messages() {
    let factory = caps(ProtocolVersion::Factory);
    let forget = RtsMessage::WifiForgetRequest {
        delete_all: true,
        ssid_hex: String::new(),
    };
    assert!(matches!(
        forget.encode(&factory),
        Err(MessageError::Unsupported {
            tag: MessageTag::WifiForgetRequest,
            ..
        })
    ));
    assert!(forget.encode(&caps(ProtocolVersion::V3)).is_ok());

    let response = RtsMessage::Response {
        code: ResponseCode::NotAuthenticated,
        text: String::new(),
    };
    assert!(response.encode(&caps(ProtocolVersion::V3)).is_err());
    assert!(response.encode(&caps(ProtocolVersion::V4)).is_ok());

    // Decoding a V4-only tag under V3 is refused too
    let err = RtsMessage::decode(&[3, MessageTag::AppConnectionIdRequest as u8, 0, 0], &caps(ProtocolVersion::V3))
        .unwrap_err();
    assert!(matches!(err, MessageError::Unsupported { .. }));
}

#[test]
fn test_status_fields_follow_generation() {
    let status = sample_status();

    let v5 = RtsMessage::StatusResponse(status.clone())
        .encode(&caps(ProtocolVersion::Current))
        .unwrap();
    let v2 = RtsMessage::StatusResponse(status.clone())
        .encode(&caps(ProtocolVersion::Factory))
        .unwrap();

    // serial (2 + 8 bytes), owner and cloud-authorized flags only on V5
    assert_eq!(v5.len() - v2.len(), 2 + 8 + 1 + 1);

    let decoded = RtsMessage::decode(&v2, &caps(ProtocolVersion::Factory)).unwrap();
    let RtsMessage::StatusResponse(old) = decoded else {
        panic!("expected status response");
    };
    assert_eq!(old.build_id, status.build_id);
    assert!(old.serial_number.is_empty());
    assert!(!old.has_owner);
    assert!(!old.cloud_authorized);

    let decoded = RtsMessage::decode(&v5, &caps(ProtocolVersion::Current)).unwrap();
    assert_eq!(decoded, RtsMessage::StatusResponse(status));
}

#[test]
fn test_scan_provisioned_flag_is_v3_plus() {
    let networks = vec![
        WifiScanEntry {
            auth_type: 3,
            signal_level: 4,
            ssid_hex: "4e6574".to_string(),
            hidden: false,
            provisioned: true,
        },
        WifiScanEntry {
            auth_type: 0,
            signal_level: 1,
            ssid_hex: String::new(),
            hidden: true,
            provisioned: false,
        },
    ];
    let message = RtsMessage::WifiScanResponse {
        status: 0,
        networks: networks.clone(),
    };

    let v3 = message.encode(&caps(ProtocolVersion::V3)).unwrap();
    assert_eq!(RtsMessage::decode(&v3, &caps(ProtocolVersion::V3)).unwrap(), message);

    let v2 = message.encode(&caps(ProtocolVersion::Factory)).unwrap();
    assert_eq!(v3.len() - v2.len(), networks.len());
    let RtsMessage::WifiScanResponse { networks: old, .. } =
        RtsMessage::decode(&v2, &caps(ProtocolVersion::Factory)).unwrap()
    else {
        panic!("expected scan response");
    };
    assert!(old.iter().all(|n| !n.provisioned));
}

#[test]
fn test_cloud_request_identity_fields_only_on_current() {
    let request = RtsMessage::CloudSessionRequest {
        session_token: "token".to_string(),
        client_name: "phone".to_string(),
        app_id: "app".to_string(),
    };

    let v4 = request.encode(&caps(ProtocolVersion::V4)).unwrap();
    assert_eq!(v4.len(), 2 + 2 + 5);
    let RtsMessage::CloudSessionRequest {
        client_name,
        app_id,
        ..
    } = RtsMessage::decode(&v4, &caps(ProtocolVersion::V4)).unwrap()
    else {
        panic!("expected cloud session request");
    };
    assert!(client_name.is_empty());
    assert!(app_id.is_empty());

    let v5 = request.encode(&caps(ProtocolVersion::Current)).unwrap();
    assert_eq!(RtsMessage::decode(&v5, &caps(ProtocolVersion::Current)).unwrap(), request);
}

#[test]
fn test_ip_response_absent_addresses() {
    let message = RtsMessage::WifiIpResponse {
        ipv4: Some([192, 168, 1, 20]),
        ipv6: None,
    };
    let bytes = message.encode(&caps(ProtocolVersion::Current)).unwrap();
    assert_eq!(bytes.len(), 2 + 2 + 4 + 16);
    assert_eq!(RtsMessage::decode(&bytes, &caps(ProtocolVersion::Current)).unwrap(), message);
}

#[test]
fn test_truncated_body() {
    let bytes = RtsMessage::ConnResponse {
        connection_type: ConnectionType::FirstTimePair,
        public_key: [7; 32],
    }
    .encode(&caps(ProtocolVersion::Current))
    .unwrap();

    let err = RtsMessage::decode(&bytes[..20], &caps(ProtocolVersion::Current)).unwrap_err();
    assert!(matches!(err, MessageError::Truncated { .. }));
}

#[test]
fn test_invalid_enum_value() {
    let err = RtsMessage::decode(
        &[5, MessageTag::ConnResponse as u8, 9],
        &caps(ProtocolVersion::Current),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        MessageError::InvalidValue {
            field: "connection type",
            value: 9
        }
    ));
}

#[test]
fn test_file_download_chunk() {
    let message = RtsMessage::FileDownload {
        status: 0,
        file_id: 77,
        packet_number: 256,
        packet_total: 300,
        chunk: vec![0xAB; 256],
    };
    let bytes = message.encode(&caps(ProtocolVersion::V4)).unwrap();
    assert_eq!(RtsMessage::decode(&bytes, &caps(ProtocolVersion::V4)).unwrap(), message);
}

#[test]
fn test_oversized_string_rejected() {
    let message = RtsMessage::OtaUpdateRequest {
        url: "x".repeat(70_000),
    };
    assert!(matches!(
        message.encode(&caps(ProtocolVersion::Current)),
        Err(MessageError::FieldTooLong { field: "url", .. })
    ));
}

#[test]
fn test_capabilities_table() {
    let factory = caps(ProtocolVersion::Factory);
    assert!(factory.owner_blocks_first_pair);
    assert!(!factory.cloud_session);
    assert!(!factory.connect_result);

    let v4 = caps(ProtocolVersion::V4);
    assert!(v4.response_message);
    assert!(v4.status_serial);
    assert!(!v4.cloud_client_identity);
    assert_eq!(v4.default_app_id(), "bleV4");

    let current = caps(ProtocolVersion::Current);
    assert!(current.status_cloud_authorized);
    assert!(!current.owner_blocks_first_pair);
}
