//! Pairing state machine for one negotiated protocol generation
//!
//! The engine never blocks and never owns the connection. It borrows the
//! transport, the store and the robot state through an [`EngineContext`] for
//! the duration of one call and reports what the owning session must do as
//! [`EngineAction`]s.

use std::time::Duration;

use rand::RngCore;

use super::collaborators::{OtaProgress, WifiCredentials, WifiStatus};
use super::jobs::{Job, JobOutcome, is_cloud_authorized};
use super::key_exchange::{
    derive_session_keys, generate_numeric_password, generate_pin, read_pin_override,
};
use super::phase::{CommsState, PairingPhase};
use crate::config::PairingConfig;
use crate::events::{ConnectionStatus, EventBus, PairingEvent};
use crate::protocol::crypto::{Nonce, Role, SessionKeys, X25519KeyPair, X25519PublicKey};
use crate::protocol::messages::{
    Capabilities, CloudStatus, ConnectionType, MIN_MESSAGE_SIZE, MessageTag, ProtocolVersion,
    ResponseCode, RtsMessage, StatusReport,
};
use crate::storage::{ClientSessionRecord, SavedSessions, SessionStore};
use crate::transport::{EncryptedTransport, TransportEvent};

/// BLE state reported in status while a client is connected
pub const BLE_STATE_CONNECTED: u8 = 1;

/// Robot-wide facts the engine reads and updates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotState {
    /// Pairing mode is on; first-time pairs are accepted
    pub pairing_mode: bool,
    /// A firmware update is running
    pub ota_in_progress: bool,
    /// The robot has an account owner
    pub has_owner: bool,
    /// A cloud authenticator is attached
    pub cloud_available: bool,
    /// Battery state reported in status
    pub battery_state: u8,
}

/// What the engine borrows for one call
pub struct EngineContext<'a> {
    /// Link to the app
    pub transport: &'a mut EncryptedTransport,
    /// Robot identity keypair
    pub identity: &'a X25519KeyPair,
    /// Trusted clients, mutated before each save
    pub sessions: &'a mut SavedSessions,
    /// Where `sessions` is persisted
    pub store: &'a mut dyn SessionStore,
    /// Outgoing notifications
    pub events: &'a EventBus,
    /// Timeouts, limits and identity strings
    pub config: &'a PairingConfig,
    /// Owner-controlled robot flags
    pub robot: &'a mut RobotState,
}

/// Work for the owning session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Tear down this attempt; `forced` skips the retry
    Reset {
        /// End the attempt without retrying
        forced: bool,
    },
    /// End pairing for this connection
    StopPairing,
    /// The client proved it holds the session keys
    Authenticated,
    /// Run a job and feed the outcome back
    Dispatch(Job),
}

/// Pairing state machine
pub struct PairingEngine {
    caps: Capabilities,
    phase: PairingPhase,
    comms: CommsState,
    first_time_pair: bool,
    cloud_authorized: bool,
    challenge: u32,
    abnormalities: u32,
    challenge_attempts: u32,
    pending_record: Option<ClientSessionRecord>,
    finished: bool,
    actions: Vec<EngineAction>,
}

impl PairingEngine {
    /// Engine speaking `version`
    #[must_use]
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            caps: version.capabilities(),
            phase: PairingPhase::AwaitingHandshake,
            comms: CommsState::Unencrypted,
            first_time_pair: false,
            cloud_authorized: false,
            challenge: 0,
            abnormalities: 0,
            challenge_attempts: 0,
            pending_record: None,
            finished: false,
            actions: Vec::new(),
        }
    }

    /// Negotiated generation
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.caps.version
    }

    /// Feature set of the negotiated generation
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> PairingPhase {
        self.phase
    }

    /// Current message path
    #[must_use]
    pub fn comms_state(&self) -> CommsState {
        self.comms
    }

    /// Abnormalities counted in this attempt
    #[must_use]
    pub fn abnormalities(&self) -> u32 {
        self.abnormalities
    }

    /// Wrong challenge answers in this attempt
    #[must_use]
    pub fn challenge_attempts(&self) -> u32 {
        self.challenge_attempts
    }

    /// Whether this client paired for the first time in this attempt
    #[must_use]
    pub fn is_first_time_pair(&self) -> bool {
        self.first_time_pair
    }

    /// Whether the client completed the cloud round trip
    #[must_use]
    pub fn is_cloud_authorized(&self) -> bool {
        self.cloud_authorized
    }

    /// Drain the actions produced so far
    pub fn take_actions(&mut self) -> Vec<EngineAction> {
        std::mem::take(&mut self.actions)
    }

    /// Send the robot's public key and wait for the connection response
    pub fn start(&mut self, ctx: &mut EngineContext<'_>) {
        let public_key = *ctx.identity.public_key().as_bytes();
        self.send(ctx, &RtsMessage::ConnRequest { public_key });
        self.phase = PairingPhase::AwaitingPublicKey;
        tracing::debug!(version = %self.caps.version, "Sent public key");
    }

    /// Handle one reassembled inbound message
    pub fn handle_event(&mut self, ctx: &mut EngineContext<'_>, event: TransportEvent) {
        let bytes = match event {
            TransportEvent::PlainText(bytes) | TransportEvent::Encrypted(bytes) => bytes,
            TransportEvent::DecryptionFailed => {
                tracing::warn!(phase = %self.phase, "Decryption failed, resetting");
                self.reset(ctx, false);
                return;
            }
        };

        if bytes.len() < MIN_MESSAGE_SIZE {
            tracing::debug!(len = bytes.len(), "Dropping runt message");
            return;
        }

        match RtsMessage::decode(&bytes, &self.caps) {
            Ok(message) => self.handle_message(ctx, message),
            Err(e) => self.abnormality(ctx, &format!("malformed message: {e}")),
        }
    }

    fn handle_message(&mut self, ctx: &mut EngineContext<'_>, message: RtsMessage) {
        tracing::trace!(tag = ?message.tag(), phase = %self.phase, "Handling message");
        match message {
            RtsMessage::ConnResponse {
                connection_type,
                public_key,
            } => self.handle_conn_response(ctx, connection_type, public_key),
            RtsMessage::Ack { tag } => self.handle_ack(ctx, tag),
            RtsMessage::Challenge { value } => self.handle_challenge_response(ctx, value),
            RtsMessage::CancelPairing | RtsMessage::ForceDisconnect => {
                tracing::info!("App ended pairing");
                self.actions.push(EngineAction::StopPairing);
            }
            RtsMessage::StatusRequest
            | RtsMessage::WifiScanRequest
            | RtsMessage::WifiConnectRequest { .. }
            | RtsMessage::WifiIpRequest
            | RtsMessage::WifiForgetRequest { .. }
            | RtsMessage::WifiAccessPointRequest { .. }
            | RtsMessage::OtaUpdateRequest { .. }
            | RtsMessage::OtaCancelRequest
            | RtsMessage::LogRequest
            | RtsMessage::CloudSessionRequest { .. }
            | RtsMessage::AppConnectionIdRequest { .. } => self.handle_command(ctx, message),
            other => {
                self.abnormality(ctx, &format!("unexpected {:?} from app", other.tag()));
            }
        }
    }

    fn handle_conn_response(
        &mut self,
        ctx: &mut EngineContext<'_>,
        connection_type: ConnectionType,
        public_key: [u8; 32],
    ) {
        if self.phase != PairingPhase::AwaitingPublicKey || self.comms != CommsState::Unencrypted {
            self.abnormality(ctx, "connection response out of phase");
            return;
        }

        match connection_type {
            ConnectionType::FirstTimePair => self.begin_first_time_pair(ctx, public_key),
            ConnectionType::Reconnection => {
                self.first_time_pair = false;
                let Some(record) = ctx.sessions.find_client(&public_key) else {
                    tracing::info!("Reconnect from unknown client, resetting");
                    self.reset(ctx, false);
                    return;
                };
                ctx.transport.set_crypto_keys(SessionKeys {
                    encrypt_key: record.encrypt_key,
                    decrypt_key: record.decrypt_key,
                });
                tracing::debug!("Loaded stored session keys");
                self.send_nonces(ctx);
            }
        }
    }

    fn begin_first_time_pair(&mut self, ctx: &mut EngineContext<'_>, public_key: [u8; 32]) {
        if self.caps.owner_blocks_first_pair && ctx.robot.has_owner && ctx.config.require_cloud_auth
        {
            tracing::warn!(
                version = %self.caps.version,
                "First-time pair on an owned robot needs cloud auth this generation lacks"
            );
            self.reset(ctx, true);
            return;
        }

        if !ctx.robot.pairing_mode || ctx.robot.ota_in_progress {
            tracing::info!(
                pairing_mode = ctx.robot.pairing_mode,
                ota = ctx.robot.ota_in_progress,
                "Ignoring first-time pair outside pairing mode"
            );
            return;
        }

        self.first_time_pair = true;

        let digits = ctx.config.num_pin_digits;
        let pin = ctx
            .config
            .pin_override_path
            .as_deref()
            .and_then(|path| read_pin_override(path, digits))
            .unwrap_or_else(|| generate_pin(digits));
        ctx.events.emit(PairingEvent::PinUpdated {
            pin: pin.to_string(),
        });

        let remote = X25519PublicKey::from(public_key);
        let keys = match derive_session_keys(Role::Server, ctx.identity, &remote, &pin) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Key derivation failed: {}", e);
                self.reset(ctx, false);
                return;
            }
        };

        self.pending_record = Some(ClientSessionRecord {
            public_key,
            encrypt_key: keys.encrypt_key,
            decrypt_key: keys.decrypt_key,
        });
        ctx.transport.set_crypto_keys(keys);
        tracing::debug!("Derived first-time session keys");
        self.send_nonces(ctx);
    }

    fn send_nonces(&mut self, ctx: &mut EngineContext<'_>) {
        let to_robot = Nonce::random();
        let to_device = Nonce::random();
        ctx.transport.set_nonces(to_device, to_robot);

        self.send(
            ctx,
            &RtsMessage::Nonce {
                to_robot: *to_robot.as_bytes(),
                to_device: *to_device.as_bytes(),
            },
        );
        self.phase = PairingPhase::AwaitingNonceAck;
    }

    fn handle_ack(&mut self, ctx: &mut EngineContext<'_>, tag: u8) {
        if self.phase != PairingPhase::AwaitingNonceAck || tag != MessageTag::Nonce as u8 {
            self.abnormality(ctx, "unexpected ack");
            return;
        }

        self.comms = CommsState::Encrypted;
        ctx.transport.set_encrypted_channel_established(true);
        self.phase = PairingPhase::AwaitingChallengeResponse;

        self.challenge = rand::rngs::OsRng.next_u32();
        self.send(
            ctx,
            &RtsMessage::Challenge {
                value: self.challenge,
            },
        );
        tracing::debug!("Encrypted channel up, challenge sent");
    }

    fn handle_challenge_response(&mut self, ctx: &mut EngineContext<'_>, value: u32) {
        if self.phase != PairingPhase::AwaitingChallengeResponse
            || self.comms != CommsState::Encrypted
        {
            self.abnormality(ctx, "challenge response out of phase");
            return;
        }

        if value != self.challenge.wrapping_add(1) {
            self.challenge_attempts += 1;
            tracing::warn!(attempts = self.challenge_attempts, "Wrong challenge answer");
            if self.challenge_attempts >= ctx.config.max_match_attempts {
                self.reset(ctx, false);
                return;
            }
            self.abnormality(ctx, "wrong challenge answer");
            return;
        }

        if self.first_time_pair && (!ctx.robot.has_owner || !ctx.config.require_cloud_auth) {
            self.save_session_keys(ctx);
        }

        self.send(ctx, &RtsMessage::ChallengeSuccess);
        self.phase = PairingPhase::ConfirmedSharedSecret;
        self.abnormalities = 0;
        self.challenge_attempts = 0;

        ctx.events
            .emit(PairingEvent::StatusChanged(ConnectionStatus::EndPairing));
        if ctx.robot.pairing_mode {
            ctx.events.emit(PairingEvent::PairingCompleted);
        }
        tracing::info!(
            version = %self.caps.version,
            first_time = self.first_time_pair,
            "Client authenticated"
        );
        self.actions.push(EngineAction::Authenticated);
    }

    fn save_session_keys(&mut self, ctx: &mut EngineContext<'_>) {
        let Some(record) = self.pending_record.take() else {
            return;
        };

        if !ctx.robot.has_owner {
            ctx.sessions.clients.clear();
        }
        ctx.sessions.upsert_client(record, ctx.config.max_clients);

        match ctx.store.save(ctx.sessions) {
            Ok(()) => ctx.events.emit(PairingEvent::SessionKeysSaved {
                clients: ctx.sessions.clients.len(),
            }),
            Err(e) => tracing::error!("Failed to persist session keys: {}", e),
        }
    }

    /// Encrypted, confirmed and, where required, cloud authorized
    fn is_authorized(&mut self, ctx: &mut EngineContext<'_>) -> bool {
        if self.comms != CommsState::Encrypted || !self.phase.is_confirmed() {
            return false;
        }

        if ctx.config.require_cloud_auth
            && self.first_time_pair
            && ctx.robot.has_owner
            && !self.cloud_authorized
        {
            tracing::info!("Privileged request before cloud authorization");
            self.respond(ctx, ResponseCode::NotCloudAuthorized, "cloud authorization required");
            return false;
        }
        true
    }

    #[allow(clippy::too_many_lines)]
    fn handle_command(&mut self, ctx: &mut EngineContext<'_>, message: RtsMessage) {
        if !self.phase.is_confirmed() {
            let answerable = matches!(
                message,
                RtsMessage::StatusRequest
                    | RtsMessage::LogRequest
                    | RtsMessage::CloudSessionRequest { .. }
            );
            if answerable && self.caps.response_message {
                self.respond(ctx, ResponseCode::NotAuthenticated, "not authenticated");
            } else {
                tracing::warn!(tag = ?message.tag(), phase = %self.phase, "Ignoring request before authentication");
            }
            return;
        }

        match message {
            RtsMessage::StatusRequest => self.dispatch(Job::Status),
            RtsMessage::WifiScanRequest => self.dispatch(Job::WifiScan),
            RtsMessage::WifiConnectRequest {
                ssid_hex,
                password,
                timeout_secs,
                auth_type,
                hidden,
            } => {
                let timeout = Duration::from_secs(u64::from(timeout_secs))
                    .max(ctx.config.wifi_connect_min_timeout);
                self.dispatch(Job::WifiConnect {
                    credentials: WifiCredentials {
                        ssid_hex,
                        password,
                        auth_type,
                        hidden,
                    },
                    timeout,
                    poll_interval: ctx.config.wifi_poll_interval,
                });
            }
            RtsMessage::WifiIpRequest => self.dispatch(Job::WifiIp),
            RtsMessage::WifiForgetRequest {
                delete_all,
                ssid_hex,
            } => {
                if self.is_authorized(ctx) {
                    self.dispatch(Job::WifiForget {
                        delete_all,
                        ssid_hex,
                    });
                }
            }
            RtsMessage::WifiAccessPointRequest { enable } => {
                if !self.is_authorized(ctx) {
                    return;
                }
                let (ssid, password) = if enable {
                    (
                        ctx.config.robot_name.clone(),
                        generate_numeric_password(ctx.config.wifi_ap_password_len),
                    )
                } else {
                    (String::new(), String::new())
                };
                self.dispatch(Job::AccessPoint {
                    enable,
                    ssid,
                    password,
                });
            }
            RtsMessage::OtaUpdateRequest { url } => {
                tracing::info!("OTA update requested");
                ctx.events
                    .emit(PairingEvent::OtaUpdateRequested { url: url.clone() });
                ctx.robot.ota_in_progress = true;
                self.dispatch(Job::OtaStart { url });
            }
            RtsMessage::OtaCancelRequest => self.dispatch(Job::OtaCancel),
            RtsMessage::LogRequest => self.dispatch(Job::FetchLogs),
            RtsMessage::CloudSessionRequest {
                session_token,
                client_name,
                app_id,
            } => self.handle_cloud_request(ctx, session_token, client_name, app_id),
            RtsMessage::AppConnectionIdRequest { connection_id } => {
                tracing::info!(connection_id = %connection_id, "App connection id");
                ctx.events
                    .emit(PairingEvent::ClientConnectionId { id: connection_id });
                self.send(ctx, &RtsMessage::AppConnectionIdResponse);
            }
            other => tracing::warn!(tag = ?other.tag(), "Not a command"),
        }
    }

    fn handle_cloud_request(
        &mut self,
        ctx: &mut EngineContext<'_>,
        session_token: String,
        client_name: String,
        app_id: String,
    ) {
        if !ctx.robot.cloud_available {
            tracing::warn!("Cloud session requested without a cloud client");
            if self.caps.response_message {
                self.respond(ctx, ResponseCode::UnsupportedRequest, "cloud unavailable");
            } else {
                self.send(
                    ctx,
                    &RtsMessage::CloudSessionResponse {
                        success: false,
                        status: CloudStatus::UnknownError,
                        client_token_guid: String::new(),
                    },
                );
            }
            return;
        }

        let (client_name, app_id) = if self.caps.cloud_client_identity {
            (client_name, app_id)
        } else {
            (String::new(), self.caps.default_app_id().to_string())
        };

        self.dispatch(Job::CloudSession {
            session_token,
            client_name,
            app_id,
        });
    }

    /// Feed back the result of a dispatched job
    pub fn handle_job_outcome(&mut self, ctx: &mut EngineContext<'_>, outcome: JobOutcome) {
        if !self.phase.is_confirmed() || self.finished {
            tracing::debug!("Dropping job outcome for an unauthenticated engine");
            return;
        }

        match outcome {
            JobOutcome::Status(wifi) => {
                let status = self.status_report(ctx, &wifi);
                self.send(ctx, &RtsMessage::StatusResponse(status));
            }
            JobOutcome::WifiScan {
                status,
                mut networks,
            } => {
                if self.first_time_pair && !self.cloud_authorized {
                    for network in &mut networks {
                        network.provisioned = false;
                    }
                }
                self.send(ctx, &RtsMessage::WifiScanResponse { status, networks });
            }
            JobOutcome::WifiConnect {
                ssid_hex,
                state,
                result,
            } => self.send(
                ctx,
                &RtsMessage::WifiConnectResponse {
                    ssid_hex,
                    wifi_state: state,
                    result,
                },
            ),
            JobOutcome::WifiIp(addresses) => self.send(
                ctx,
                &RtsMessage::WifiIpResponse {
                    ipv4: addresses.ipv4,
                    ipv6: addresses.ipv6,
                },
            ),
            JobOutcome::WifiForget {
                did_delete,
                ssid_hex,
            } => self.send(
                ctx,
                &RtsMessage::WifiForgetResponse {
                    did_delete,
                    ssid_hex,
                },
            ),
            JobOutcome::AccessPoint {
                enabled,
                ssid,
                password,
            } => self.send(
                ctx,
                &RtsMessage::WifiAccessPointResponse {
                    enabled,
                    ssid,
                    password,
                },
            ),
            JobOutcome::OtaStarted { accepted, progress } => {
                if !accepted {
                    ctx.robot.ota_in_progress = false;
                }
                self.report_ota_progress(ctx, progress);
            }
            JobOutcome::OtaCancelled(wifi) => {
                ctx.robot.ota_in_progress = false;
                let status = self.status_report(ctx, &wifi);
                self.send(ctx, &RtsMessage::StatusResponse(status));
            }
            JobOutcome::OtaProgress(progress) => self.report_ota_progress(ctx, progress),
            JobOutcome::Logs { exit_code, data } => self.send_logs(ctx, exit_code, &data),
            JobOutcome::CloudSession {
                status,
                client_token_guid,
            } => {
                let success = is_cloud_authorized(status);
                if success {
                    if self.first_time_pair {
                        self.save_session_keys(ctx);
                    }
                    self.cloud_authorized = true;
                    ctx.robot.has_owner = true;
                    ctx.events.emit(PairingEvent::CloudAuthorized {
                        primary: status == CloudStatus::AuthorizedAsPrimary,
                    });
                }
                tracing::info!(?status, "Cloud session result");
                self.send(
                    ctx,
                    &RtsMessage::CloudSessionResponse {
                        success,
                        status,
                        client_token_guid,
                    },
                );
            }
        }
    }

    /// Forward updater progress to an authenticated client
    pub fn report_ota_progress(&mut self, ctx: &mut EngineContext<'_>, progress: OtaProgress) {
        if !self.phase.is_confirmed() {
            return;
        }
        self.send(
            ctx,
            &RtsMessage::OtaUpdateResponse {
                status: progress.status,
                current: progress.current,
                expected: progress.expected,
            },
        );
    }

    /// Timer expiry: harmless once authenticated
    pub fn handle_timeout(&mut self, ctx: &mut EngineContext<'_>) {
        if self.phase.is_confirmed() {
            tracing::debug!("Pairing timer fired after authentication");
            return;
        }
        tracing::info!(phase = %self.phase, "Pairing timed out");
        self.reset(ctx, false);
    }

    /// Tell the app pairing is over on whichever path is live
    pub fn send_cancel(&mut self, ctx: &mut EngineContext<'_>) {
        self.send(ctx, &RtsMessage::CancelPairing);
    }

    fn status_report(&self, ctx: &EngineContext<'_>, wifi: &WifiStatus) -> StatusReport {
        StatusReport {
            ssid_hex: wifi.ssid_hex.clone(),
            wifi_state: wifi.state,
            access_point: wifi.access_point,
            ble_state: BLE_STATE_CONNECTED,
            battery_state: ctx.robot.battery_state,
            build_id: ctx.config.build_id.clone(),
            serial_number: ctx.config.serial_number.clone(),
            ota_in_progress: ctx.robot.ota_in_progress,
            has_owner: ctx.robot.has_owner,
            // Returning clients of an owned robot count as authorized
            cloud_authorized: self.cloud_authorized
                || (!self.first_time_pair && ctx.robot.has_owner),
        }
    }

    fn send_logs(&mut self, ctx: &mut EngineContext<'_>, exit_code: i32, data: &[u8]) {
        let file_id = rand::rngs::OsRng.next_u32();
        self.send(ctx, &RtsMessage::LogResponse { exit_code, file_id });
        if exit_code != 0 || data.is_empty() {
            return;
        }

        let Ok(total) = u32::try_from(data.len()) else {
            tracing::warn!(len = data.len(), "Log archive too large to transfer");
            return;
        };

        let mut written = 0u32;
        for chunk in data.chunks(ctx.config.file_chunk_size) {
            // chunk size is bounded by the u16 length prefix
            #[allow(clippy::cast_possible_truncation)]
            {
                written += chunk.len() as u32;
            }
            self.send(
                ctx,
                &RtsMessage::FileDownload {
                    status: 0,
                    file_id,
                    packet_number: written,
                    packet_total: total,
                    chunk: chunk.to_vec(),
                },
            );
        }
        tracing::debug!(file_id, bytes = total, "Sent log archive");
    }

    fn dispatch(&mut self, job: Job) {
        self.actions.push(EngineAction::Dispatch(job));
    }

    fn respond(&mut self, ctx: &mut EngineContext<'_>, code: ResponseCode, text: &str) {
        if !self.caps.response_message {
            return;
        }
        self.send(
            ctx,
            &RtsMessage::Response {
                code,
                text: text.to_string(),
            },
        );
    }

    fn abnormality(&mut self, ctx: &mut EngineContext<'_>, reason: &str) {
        self.abnormalities += 1;
        tracing::warn!(count = self.abnormalities, phase = %self.phase, "Protocol abnormality: {}", reason);
        if self.abnormalities >= ctx.config.max_abnormalities {
            self.reset(ctx, false);
        }
    }

    /// Abandon the attempt; only the first call has any effect
    fn reset(&mut self, ctx: &mut EngineContext<'_>, forced: bool) {
        if self.finished {
            return;
        }
        self.finished = true;

        ctx.transport.set_encrypted_channel_established(false);
        if self.comms == CommsState::Unencrypted {
            self.send(ctx, &RtsMessage::CancelPairing);
        }
        self.pending_record = None;
        self.actions.push(EngineAction::Reset { forced });
    }

    fn send(&mut self, ctx: &mut EngineContext<'_>, message: &RtsMessage) {
        let bytes = match message.encode(&self.caps) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(tag = ?message.tag(), "Cannot encode message: {}", e);
                return;
            }
        };

        let sent = if self.comms == CommsState::Encrypted
            && ctx.transport.is_encrypted_channel_established()
        {
            ctx.transport.send_encrypted(&bytes)
        } else if self.comms == CommsState::Encrypted {
            tracing::debug!(tag = ?message.tag(), "Encrypted channel down, not sending");
            return;
        } else {
            ctx.transport.send_plain_text(&bytes)
        };

        if let Err(e) = sent {
            tracing::warn!(tag = ?message.tag(), "Failed to send message: {}", e);
        }
    }
}

impl std::fmt::Debug for PairingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingEngine")
            .field("version", &self.caps.version)
            .field("phase", &self.phase)
            .field("comms", &self.comms)
            .field("first_time_pair", &self.first_time_pair)
            .field("abnormalities", &self.abnormalities)
            .finish_non_exhaustive()
    }
}
