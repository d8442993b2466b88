//! Pairing and command messages exchanged with the companion app
//!
//! Every message after the handshake is `[generation][tag][fields...]`. The
//! generation byte must match the negotiated [`ProtocolVersion`]; fields whose
//! presence depends on the generation are driven by [`Capabilities`].

#[cfg(test)]
mod tests;
mod version;
mod wire;

use thiserror::Error;

use self::wire::{MessageReader, MessageWriter};
pub use self::version::{
    Capabilities, HANDSHAKE_LEN, HANDSHAKE_TAG, Handshake, ProtocolVersion,
};
use crate::protocol::crypto::lengths;

/// Shortest message the engine will look at: envelope byte plus tag
pub const MIN_MESSAGE_SIZE: usize = 2;

/// Public key length on the wire
pub const PUBLIC_KEY_LEN: usize = lengths::X25519_PUBLIC_KEY;

/// Nonce length on the wire
pub const NONCE_LEN: usize = lengths::XCHACHA_NONCE;

/// Message codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Buffer ended inside a field
    #[error("message truncated: needed {needed} more bytes, {available} available")]
    Truncated {
        /// Bytes the field still needed
        needed: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// Generation byte does not match the negotiated version
    #[error("message for generation {actual}, connection speaks {expected}")]
    WrongGeneration {
        /// Negotiated generation
        expected: u8,
        /// Generation on the wire
        actual: u8,
    },

    /// Tag byte with no message type
    #[error("unknown message tag: 0x{0:02x}")]
    UnknownTag(u8),

    /// Known tag outside this version's message set
    #[error("{tag:?} is not part of protocol {version}")]
    Unsupported {
        /// Offending tag
        tag: MessageTag,
        /// Negotiated version
        version: ProtocolVersion,
    },

    /// Enumerated field holds an unknown value
    #[error("invalid value {value} for {field}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Byte found
        value: u8,
    },

    /// String field is not UTF-8
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// String or blob longer than its length prefix allows
    #[error("{field} too long: {len} bytes")]
    FieldTooLong {
        /// Field name
        field: &'static str,
        /// Actual length
        len: usize,
    },

    /// First byte of the connection was not the handshake tag
    #[error("expected handshake, got tag 0x{0:02x}")]
    NotHandshake(u8),
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $name {
            /// Create from byte value
            #[must_use]
            pub fn from_byte(b: u8) -> Option<Self> {
                match b {
                    $( $value => Some(Self::$variant), )+
                    _ => None,
                }
            }

            fn read(reader: &mut MessageReader<'_>) -> Result<Self, MessageError> {
                let value = reader.u8()?;
                Self::from_byte(value).ok_or(MessageError::InvalidValue {
                    field: $field,
                    value,
                })
            }
        }
    };
}

wire_enum! {
    /// Message type tags
    pub enum MessageTag: "tag" {
        /// Robot's identity public key
        ConnRequest = 1,
        /// App's public key and pairing kind
        ConnResponse = 2,
        /// Nonce pair for the encrypted channel
        Nonce = 3,
        /// Acknowledgement of a message by tag
        Ack = 4,
        /// Challenge value, or the app's answer to it
        Challenge = 5,
        /// Challenge answered correctly
        ChallengeSuccess = 6,
        /// Pairing aborted
        CancelPairing = 7,
        /// App asks the robot to drop the connection
        ForceDisconnect = 8,
        StatusRequest = 9,
        StatusResponse = 10,
        WifiScanRequest = 11,
        WifiScanResponse = 12,
        WifiConnectRequest = 13,
        WifiConnectResponse = 14,
        WifiIpRequest = 15,
        WifiIpResponse = 16,
        WifiForgetRequest = 17,
        WifiForgetResponse = 18,
        WifiAccessPointRequest = 19,
        WifiAccessPointResponse = 20,
        OtaUpdateRequest = 21,
        OtaCancelRequest = 22,
        OtaUpdateResponse = 23,
        LogRequest = 24,
        LogResponse = 25,
        FileDownload = 26,
        CloudSessionRequest = 27,
        CloudSessionResponse = 28,
        AppConnectionIdRequest = 29,
        AppConnectionIdResponse = 30,
        /// Explicit rejection with a reason
        Response = 31,
    }
}

impl MessageTag {
    fn supported_by(self, caps: &Capabilities) -> bool {
        match self {
            Self::WifiForgetRequest | Self::WifiForgetResponse => caps.wifi_forget,
            Self::CloudSessionRequest | Self::CloudSessionResponse => caps.cloud_session,
            Self::AppConnectionIdRequest | Self::AppConnectionIdResponse => {
                caps.app_connection_id
            }
            Self::Response => caps.response_message,
            _ => true,
        }
    }
}

wire_enum! {
    /// Whether the app pairs for the first time or resumes a stored session
    pub enum ConnectionType: "connection type" {
        FirstTimePair = 0,
        Reconnection = 1,
    }
}

wire_enum! {
    /// Robot WiFi connectivity
    pub enum WifiConnState: "wifi state" {
        Unknown = 0,
        Online = 1,
        Connected = 2,
        Disconnected = 3,
    }
}

wire_enum! {
    /// Outcome of a WiFi connect attempt
    pub enum WifiConnectResult: "connect result" {
        Success = 0,
        Failure = 1,
        InvalidKey = 2,
        /// Gave up waiting for the network to come online
        Timeout = 3,
    }
}

wire_enum! {
    /// Result of a cloud session request
    pub enum CloudStatus: "cloud status" {
        UnknownError = 0,
        ConnectionError = 1,
        WrongAccount = 2,
        InvalidSessionToken = 3,
        AuthorizedAsPrimary = 4,
        AuthorizedAsSecondary = 5,
    }
}

wire_enum! {
    /// Reason carried by an explicit `Response`
    pub enum ResponseCode: "response code" {
        /// First-time client must cloud-authorize before this request
        NotCloudAuthorized = 0,
        /// The robot cannot serve this request
        UnsupportedRequest = 1,
        /// The encrypted session is not confirmed yet
        NotAuthenticated = 2,
    }
}

/// Robot status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusReport {
    /// Current network, hex encoded
    pub ssid_hex: String,
    /// Connectivity
    pub wifi_state: WifiConnState,
    /// Whether the robot runs its own access point
    pub access_point: bool,
    /// BLE link state
    pub ble_state: u8,
    /// Battery state
    pub battery_state: u8,
    /// Firmware build
    pub build_id: String,
    /// Serial number (V4+)
    pub serial_number: String,
    /// OTA in progress
    pub ota_in_progress: bool,
    /// Robot has an account owner (V3+)
    pub has_owner: bool,
    /// Session is cloud authorized (V5)
    pub cloud_authorized: bool,
}

impl Default for WifiConnState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// One scanned network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiScanEntry {
    /// Authentication type
    pub auth_type: u8,
    /// Signal level
    pub signal_level: u8,
    /// SSID, hex encoded
    pub ssid_hex: String,
    /// Hidden network
    pub hidden: bool,
    /// Robot already has credentials (V3+)
    pub provisioned: bool,
}

/// Application-level message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtsMessage {
    ConnRequest {
        public_key: [u8; PUBLIC_KEY_LEN],
    },
    ConnResponse {
        connection_type: ConnectionType,
        public_key: [u8; PUBLIC_KEY_LEN],
    },
    Nonce {
        to_robot: [u8; NONCE_LEN],
        to_device: [u8; NONCE_LEN],
    },
    Ack {
        tag: u8,
    },
    Challenge {
        value: u32,
    },
    ChallengeSuccess,
    CancelPairing,
    ForceDisconnect,
    StatusRequest,
    StatusResponse(StatusReport),
    WifiScanRequest,
    WifiScanResponse {
        status: u8,
        networks: Vec<WifiScanEntry>,
    },
    WifiConnectRequest {
        ssid_hex: String,
        password: String,
        timeout_secs: u8,
        auth_type: u8,
        hidden: bool,
    },
    WifiConnectResponse {
        ssid_hex: String,
        wifi_state: WifiConnState,
        result: WifiConnectResult,
    },
    WifiIpRequest,
    WifiIpResponse {
        ipv4: Option<[u8; 4]>,
        ipv6: Option<[u8; 16]>,
    },
    WifiForgetRequest {
        delete_all: bool,
        ssid_hex: String,
    },
    WifiForgetResponse {
        did_delete: bool,
        ssid_hex: String,
    },
    WifiAccessPointRequest {
        enable: bool,
    },
    WifiAccessPointResponse {
        enabled: bool,
        ssid: String,
        password: String,
    },
    OtaUpdateRequest {
        url: String,
    },
    OtaCancelRequest,
    OtaUpdateResponse {
        status: u8,
        current: u64,
        expected: u64,
    },
    LogRequest,
    LogResponse {
        exit_code: i32,
        file_id: u32,
    },
    FileDownload {
        status: u8,
        file_id: u32,
        packet_number: u32,
        packet_total: u32,
        chunk: Vec<u8>,
    },
    CloudSessionRequest {
        session_token: String,
        client_name: String,
        app_id: String,
    },
    CloudSessionResponse {
        success: bool,
        status: CloudStatus,
        client_token_guid: String,
    },
    AppConnectionIdRequest {
        connection_id: String,
    },
    AppConnectionIdResponse,
    Response {
        code: ResponseCode,
        text: String,
    },
}

impl RtsMessage {
    /// Message tag
    #[must_use]
    pub fn tag(&self) -> MessageTag {
        match self {
            Self::ConnRequest { .. } => MessageTag::ConnRequest,
            Self::ConnResponse { .. } => MessageTag::ConnResponse,
            Self::Nonce { .. } => MessageTag::Nonce,
            Self::Ack { .. } => MessageTag::Ack,
            Self::Challenge { .. } => MessageTag::Challenge,
            Self::ChallengeSuccess => MessageTag::ChallengeSuccess,
            Self::CancelPairing => MessageTag::CancelPairing,
            Self::ForceDisconnect => MessageTag::ForceDisconnect,
            Self::StatusRequest => MessageTag::StatusRequest,
            Self::StatusResponse(_) => MessageTag::StatusResponse,
            Self::WifiScanRequest => MessageTag::WifiScanRequest,
            Self::WifiScanResponse { .. } => MessageTag::WifiScanResponse,
            Self::WifiConnectRequest { .. } => MessageTag::WifiConnectRequest,
            Self::WifiConnectResponse { .. } => MessageTag::WifiConnectResponse,
            Self::WifiIpRequest => MessageTag::WifiIpRequest,
            Self::WifiIpResponse { .. } => MessageTag::WifiIpResponse,
            Self::WifiForgetRequest { .. } => MessageTag::WifiForgetRequest,
            Self::WifiForgetResponse { .. } => MessageTag::WifiForgetResponse,
            Self::WifiAccessPointRequest { .. } => MessageTag::WifiAccessPointRequest,
            Self::WifiAccessPointResponse { .. } => MessageTag::WifiAccessPointResponse,
            Self::OtaUpdateRequest { .. } => MessageTag::OtaUpdateRequest,
            Self::OtaCancelRequest => MessageTag::OtaCancelRequest,
            Self::OtaUpdateResponse { .. } => MessageTag::OtaUpdateResponse,
            Self::LogRequest => MessageTag::LogRequest,
            Self::LogResponse { .. } => MessageTag::LogResponse,
            Self::FileDownload { .. } => MessageTag::FileDownload,
            Self::CloudSessionRequest { .. } => MessageTag::CloudSessionRequest,
            Self::CloudSessionResponse { .. } => MessageTag::CloudSessionResponse,
            Self::AppConnectionIdRequest { .. } => MessageTag::AppConnectionIdRequest,
            Self::AppConnectionIdResponse => MessageTag::AppConnectionIdResponse,
            Self::Response { .. } => MessageTag::Response,
        }
    }

    /// Serialize for the negotiated generation
    ///
    /// Fields the generation does not carry are left out.
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Unsupported` for a message the generation lacks
    /// and `MessageError::FieldTooLong` for oversized strings.
    #[allow(clippy::too_many_lines)]
    pub fn encode(&self, caps: &Capabilities) -> Result<Vec<u8>, MessageError> {
        let tag = self.tag();
        if !tag.supported_by(caps) {
            return Err(MessageError::Unsupported {
                tag,
                version: caps.version,
            });
        }

        let mut w = MessageWriter::new(caps.version.as_u8(), tag as u8);
        match self {
            Self::ConnRequest { public_key } => {
                w.fixed(public_key);
            }
            Self::ConnResponse {
                connection_type,
                public_key,
            } => {
                w.u8(*connection_type as u8).fixed(public_key);
            }
            Self::Nonce {
                to_robot,
                to_device,
            } => {
                w.fixed(to_robot).fixed(to_device);
            }
            Self::Ack { tag } => {
                w.u8(*tag);
            }
            Self::Challenge { value } => {
                w.u32(*value);
            }
            Self::ChallengeSuccess
            | Self::CancelPairing
            | Self::ForceDisconnect
            | Self::StatusRequest
            | Self::WifiScanRequest
            | Self::WifiIpRequest
            | Self::OtaCancelRequest
            | Self::LogRequest
            | Self::AppConnectionIdResponse => {}
            Self::StatusResponse(status) => {
                w.string("ssid", &status.ssid_hex)?
                    .u8(status.wifi_state as u8)
                    .bool(status.access_point)
                    .u8(status.ble_state)
                    .u8(status.battery_state)
                    .string("build id", &status.build_id)?;
                if caps.status_serial {
                    w.string("serial number", &status.serial_number)?;
                }
                w.bool(status.ota_in_progress);
                if caps.status_owner {
                    w.bool(status.has_owner);
                }
                if caps.status_cloud_authorized {
                    w.bool(status.cloud_authorized);
                }
            }
            Self::WifiScanResponse { status, networks } => {
                let count = u8::try_from(networks.len()).map_err(|_| {
                    MessageError::FieldTooLong {
                        field: "networks",
                        len: networks.len(),
                    }
                })?;
                w.u8(*status).u8(count);
                for network in networks {
                    w.u8(network.auth_type)
                        .u8(network.signal_level)
                        .string("ssid", &network.ssid_hex)?
                        .bool(network.hidden);
                    if caps.scan_provisioned {
                        w.bool(network.provisioned);
                    }
                }
            }
            Self::WifiConnectRequest {
                ssid_hex,
                password,
                timeout_secs,
                auth_type,
                hidden,
            } => {
                w.string("ssid", ssid_hex)?
                    .string("password", password)?
                    .u8(*timeout_secs)
                    .u8(*auth_type)
                    .bool(*hidden);
            }
            Self::WifiConnectResponse {
                ssid_hex,
                wifi_state,
                result,
            } => {
                w.string("ssid", ssid_hex)?.u8(*wifi_state as u8);
                if caps.connect_result {
                    w.u8(*result as u8);
                }
            }
            Self::WifiIpResponse { ipv4, ipv6 } => {
                w.bool(ipv4.is_some())
                    .bool(ipv6.is_some())
                    .fixed(&ipv4.unwrap_or_default())
                    .fixed(&ipv6.unwrap_or_default());
            }
            Self::WifiForgetRequest {
                delete_all,
                ssid_hex,
            } => {
                w.bool(*delete_all).string("ssid", ssid_hex)?;
            }
            Self::WifiForgetResponse {
                did_delete,
                ssid_hex,
            } => {
                w.bool(*did_delete).string("ssid", ssid_hex)?;
            }
            Self::WifiAccessPointRequest { enable } => {
                w.bool(*enable);
            }
            Self::WifiAccessPointResponse {
                enabled,
                ssid,
                password,
            } => {
                w.bool(*enabled)
                    .string("ssid", ssid)?
                    .string("password", password)?;
            }
            Self::OtaUpdateRequest { url } => {
                w.string("url", url)?;
            }
            Self::OtaUpdateResponse {
                status,
                current,
                expected,
            } => {
                w.u8(*status).u64(*current).u64(*expected);
            }
            Self::LogResponse { exit_code, file_id } => {
                w.i32(*exit_code).u32(*file_id);
            }
            Self::FileDownload {
                status,
                file_id,
                packet_number,
                packet_total,
                chunk,
            } => {
                w.u8(*status)
                    .u32(*file_id)
                    .u32(*packet_number)
                    .u32(*packet_total)
                    .chunk("file chunk", chunk)?;
            }
            Self::CloudSessionRequest {
                session_token,
                client_name,
                app_id,
            } => {
                w.string("session token", session_token)?;
                if caps.cloud_client_identity {
                    w.string("client name", client_name)?
                        .string("app id", app_id)?;
                }
            }
            Self::CloudSessionResponse {
                success,
                status,
                client_token_guid,
            } => {
                w.bool(*success)
                    .u8(*status as u8)
                    .string("client token", client_token_guid)?;
            }
            Self::AppConnectionIdRequest { connection_id } => {
                w.string("connection id", connection_id)?;
            }
            Self::Response { code, text } => {
                w.u8(*code as u8).string("response text", text)?;
            }
        }
        Ok(w.finish())
    }

    /// Parse a message of the negotiated generation
    ///
    /// # Errors
    ///
    /// Returns a `MessageError` for a foreign generation byte, an unknown or
    /// unsupported tag, a truncated body or an out-of-range enum value.
    #[allow(clippy::too_many_lines)]
    pub fn decode(bytes: &[u8], caps: &Capabilities) -> Result<Self, MessageError> {
        let mut r = MessageReader::new(bytes);

        let generation = r.u8()?;
        if generation != caps.version.as_u8() {
            return Err(MessageError::WrongGeneration {
                expected: caps.version.as_u8(),
                actual: generation,
            });
        }

        let raw_tag = r.u8()?;
        let tag = MessageTag::from_byte(raw_tag).ok_or(MessageError::UnknownTag(raw_tag))?;
        if !tag.supported_by(caps) {
            return Err(MessageError::Unsupported {
                tag,
                version: caps.version,
            });
        }

        let message = match tag {
            MessageTag::ConnRequest => Self::ConnRequest {
                public_key: r.fixed()?,
            },
            MessageTag::ConnResponse => Self::ConnResponse {
                connection_type: ConnectionType::read(&mut r)?,
                public_key: r.fixed()?,
            },
            MessageTag::Nonce => Self::Nonce {
                to_robot: r.fixed()?,
                to_device: r.fixed()?,
            },
            MessageTag::Ack => Self::Ack { tag: r.u8()? },
            MessageTag::Challenge => Self::Challenge { value: r.u32()? },
            MessageTag::ChallengeSuccess => Self::ChallengeSuccess,
            MessageTag::CancelPairing => Self::CancelPairing,
            MessageTag::ForceDisconnect => Self::ForceDisconnect,
            MessageTag::StatusRequest => Self::StatusRequest,
            MessageTag::StatusResponse => {
                let mut status = StatusReport {
                    ssid_hex: r.string("ssid")?,
                    wifi_state: WifiConnState::read(&mut r)?,
                    access_point: r.bool()?,
                    ble_state: r.u8()?,
                    battery_state: r.u8()?,
                    build_id: r.string("build id")?,
                    ..StatusReport::default()
                };
                if caps.status_serial {
                    status.serial_number = r.string("serial number")?;
                }
                status.ota_in_progress = r.bool()?;
                if caps.status_owner {
                    status.has_owner = r.bool()?;
                }
                if caps.status_cloud_authorized {
                    status.cloud_authorized = r.bool()?;
                }
                Self::StatusResponse(status)
            }
            MessageTag::WifiScanRequest => Self::WifiScanRequest,
            MessageTag::WifiScanResponse => {
                let status = r.u8()?;
                let count = r.u8()?;
                let mut networks = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    networks.push(WifiScanEntry {
                        auth_type: r.u8()?,
                        signal_level: r.u8()?,
                        ssid_hex: r.string("ssid")?,
                        hidden: r.bool()?,
                        provisioned: if caps.scan_provisioned {
                            r.bool()?
                        } else {
                            false
                        },
                    });
                }
                Self::WifiScanResponse { status, networks }
            }
            MessageTag::WifiConnectRequest => Self::WifiConnectRequest {
                ssid_hex: r.string("ssid")?,
                password: r.string("password")?,
                timeout_secs: r.u8()?,
                auth_type: r.u8()?,
                hidden: r.bool()?,
            },
            MessageTag::WifiConnectResponse => Self::WifiConnectResponse {
                ssid_hex: r.string("ssid")?,
                wifi_state: WifiConnState::read(&mut r)?,
                result: if caps.connect_result {
                    WifiConnectResult::read(&mut r)?
                } else {
                    WifiConnectResult::Success
                },
            },
            MessageTag::WifiIpRequest => Self::WifiIpRequest,
            MessageTag::WifiIpResponse => {
                let has_v4 = r.bool()?;
                let has_v6 = r.bool()?;
                let v4: [u8; 4] = r.fixed()?;
                let v6: [u8; 16] = r.fixed()?;
                Self::WifiIpResponse {
                    ipv4: has_v4.then_some(v4),
                    ipv6: has_v6.then_some(v6),
                }
            }
            MessageTag::WifiForgetRequest => Self::WifiForgetRequest {
                delete_all: r.bool()?,
                ssid_hex: r.string("ssid")?,
            },
            MessageTag::WifiForgetResponse => Self::WifiForgetResponse {
                did_delete: r.bool()?,
                ssid_hex: r.string("ssid")?,
            },
            MessageTag::WifiAccessPointRequest => Self::WifiAccessPointRequest { enable: r.bool()? },
            MessageTag::WifiAccessPointResponse => Self::WifiAccessPointResponse {
                enabled: r.bool()?,
                ssid: r.string("ssid")?,
                password: r.string("password")?,
            },
            MessageTag::OtaUpdateRequest => Self::OtaUpdateRequest {
                url: r.string("url")?,
            },
            MessageTag::OtaCancelRequest => Self::OtaCancelRequest,
            MessageTag::OtaUpdateResponse => Self::OtaUpdateResponse {
                status: r.u8()?,
                current: r.u64()?,
                expected: r.u64()?,
            },
            MessageTag::LogRequest => Self::LogRequest,
            MessageTag::LogResponse => Self::LogResponse {
                exit_code: r.i32()?,
                file_id: r.u32()?,
            },
            MessageTag::FileDownload => Self::FileDownload {
                status: r.u8()?,
                file_id: r.u32()?,
                packet_number: r.u32()?,
                packet_total: r.u32()?,
                chunk: r.chunk()?,
            },
            MessageTag::CloudSessionRequest => {
                let session_token = r.string("session token")?;
                let (client_name, app_id) = if caps.cloud_client_identity {
                    (r.string("client name")?, r.string("app id")?)
                } else {
                    (String::new(), String::new())
                };
                Self::CloudSessionRequest {
                    session_token,
                    client_name,
                    app_id,
                }
            }
            MessageTag::CloudSessionResponse => Self::CloudSessionResponse {
                success: r.bool()?,
                status: CloudStatus::read(&mut r)?,
                client_token_guid: r.string("client token")?,
            },
            MessageTag::AppConnectionIdRequest => Self::AppConnectionIdRequest {
                connection_id: r.string("connection id")?,
            },
            MessageTag::AppConnectionIdResponse => Self::AppConnectionIdResponse,
            MessageTag::Response => Self::Response {
                code: ResponseCode::read(&mut r)?,
                text: r.string("response text")?,
            },
        };

        if r.remaining() > 0 {
            tracing::trace!(tag = ?tag, extra = r.remaining(), "Ignoring trailing bytes");
        }

        Ok(message)
    }
}
