//! Per-connection owner of the pairing engine
//!
//! A [`PairingSession`] holds everything that outlives a single engine: the
//! transport, the session store, the robot identity, the attempt counter and
//! the pairing timer. Engines come and go with each attempt; the session
//! applies their resets and keeps job outcomes from a previous attempt out of
//! the current one.

use tokio::time::Instant;

use super::collaborators::OtaProgress;
use super::engine::{EngineAction, EngineContext, PairingEngine, RobotState};
use super::jobs::{Job, JobOutcome};
use super::key_exchange::load_or_create_identity;
use super::phase::PairingPhase;
use super::selector::select_engine;
use crate::config::PairingConfig;
use crate::error::Result;
use crate::events::{ConnectionStatus, EventBus, PairingEvent};
use crate::protocol::crypto::{X25519KeyPair, X25519PublicKey};
use crate::protocol::messages::{Handshake, ProtocolVersion, RtsMessage};
use crate::storage::{
    FileStore, LEGACY_IMAGE_SIZE, MemoryStore, SavedSessions, SessionStore, StorageError,
    migrate_legacy,
};
use crate::transport::{EncryptedTransport, RawChannel, TransportEvent};

/// A job tagged with the attempt that requested it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedJob {
    /// Attempt the outcome belongs to
    pub epoch: u64,
    /// Work to run
    pub job: Job,
}

/// Pairing state for one BLE connection
pub struct PairingSession {
    config: PairingConfig,
    transport: EncryptedTransport,
    store: Box<dyn SessionStore>,
    identity: X25519KeyPair,
    sessions: SavedSessions,
    events: EventBus,
    robot: RobotState,
    engine: Option<PairingEngine>,
    phase: PairingPhase,
    attempts: u32,
    deadline: Option<Instant>,
    stopped: bool,
    epoch: u64,
    jobs: Vec<DispatchedJob>,
}

impl PairingSession {
    /// Create a session over `transport` backed by `store`
    ///
    /// Loads the robot identity, generating and saving one if none is stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if a fresh identity cannot be persisted.
    pub fn new(
        config: PairingConfig,
        transport: EncryptedTransport,
        mut store: Box<dyn SessionStore>,
        events: EventBus,
    ) -> std::result::Result<Self, StorageError> {
        let (identity, sessions) = load_or_create_identity(store.as_mut(), &config.robot_name)?;

        Ok(Self {
            config,
            transport,
            store,
            identity,
            sessions,
            events,
            robot: RobotState::default(),
            engine: None,
            phase: PairingPhase::Initial,
            attempts: 0,
            deadline: None,
            stopped: false,
            epoch: 0,
            jobs: Vec::new(),
        })
    }

    /// Create a session from configuration alone
    ///
    /// Uses a file store when `store_path` is set (migrating the legacy image
    /// first when `legacy_store_path` is set) and an in-memory store otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration, an unusable packet size or
    /// a store that cannot be written.
    pub fn open(
        config: PairingConfig,
        channel: Box<dyn RawChannel>,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;
        let transport = EncryptedTransport::new(channel, config.max_packet_size)?;

        let mut store: Box<dyn SessionStore> = match &config.store_path {
            Some(path) => Box::new(FileStore::new(path)),
            None => Box::new(MemoryStore::new()),
        };

        if let Some(legacy_path) = &config.legacy_store_path {
            let mut legacy = FileStore::new(legacy_path).with_padding(LEGACY_IMAGE_SIZE);
            if migrate_legacy(&mut legacy, store.as_mut())? {
                tracing::info!(path = %legacy_path.display(), "Migrated legacy sessions");
            }
        }

        Ok(Self::new(config, transport, store, events)?)
    }

    /// Start the first pairing attempt on this connection
    pub fn begin_pairing(&mut self) {
        tracing::info!(pairing_mode = self.robot.pairing_mode, "Beginning pairing");
        self.stopped = false;
        self.attempts = 0;
        self.init();
        if self.robot.pairing_mode {
            self.events
                .emit(PairingEvent::StatusChanged(ConnectionStatus::ShowPrePin));
        }
    }

    /// Feed one raw inbound packet
    pub fn handle_packet(&mut self, packet: &[u8]) {
        if self.stopped {
            tracing::trace!("Ignoring packet after pairing stopped");
            return;
        }

        let Some(event) = self.transport.receive_packet(packet) else {
            return;
        };

        if self.engine.is_some() {
            self.with_engine(|engine, ctx| engine.handle_event(ctx, event));
            return;
        }

        match (self.phase, event) {
            (PairingPhase::AwaitingHandshake, TransportEvent::PlainText(message)) => {
                match select_engine(&message) {
                    Ok(engine) => {
                        self.engine = Some(engine);
                        self.with_engine(PairingEngine::start);
                    }
                    Err(e) => {
                        tracing::warn!("Handshake rejected: {}", e);
                        self.stop_pairing();
                    }
                }
            }
            (phase, _) => tracing::debug!(%phase, "Dropping message with no engine"),
        }
    }

    /// Pairing timer expired
    pub fn handle_timeout(&mut self) {
        self.deadline = None;
        if self.engine.is_some() {
            self.with_engine(PairingEngine::handle_timeout);
        } else if self.phase == PairingPhase::AwaitingHandshake {
            tracing::info!("Handshake timed out");
            self.send_plain(&RtsMessage::CancelPairing, ProtocolVersion::Current);
            self.handle_reset(false);
        }
    }

    /// The BLE connection went away
    ///
    /// Cancels the attempt and wipes every secret before returning.
    pub fn handle_disconnect(&mut self) {
        tracing::info!(phase = %self.phase(), "Client disconnected");
        self.teardown();
        self.stopped = true;
    }

    /// Feed back a job outcome; outcomes from an earlier attempt are dropped
    pub fn handle_job_outcome(&mut self, epoch: u64, outcome: JobOutcome) {
        if epoch != self.epoch || self.stopped {
            tracing::debug!(epoch, current = self.epoch, "Dropping stale job outcome");
            return;
        }
        self.with_engine(|engine, ctx| engine.handle_job_outcome(ctx, outcome));
    }

    /// Drain jobs requested since the last call
    pub fn take_jobs(&mut self) -> Vec<DispatchedJob> {
        std::mem::take(&mut self.jobs)
    }

    /// Push updater progress to the client
    pub fn report_ota_progress(&mut self, progress: OtaProgress) {
        self.with_engine(|engine, ctx| engine.report_ota_progress(ctx, progress));
    }

    /// Queue a progress poll while an update runs; returns whether one was queued
    pub fn poll_ota_progress(&mut self) -> bool {
        if !self.robot.ota_in_progress || !self.phase().is_confirmed() {
            return false;
        }
        self.jobs.push(DispatchedJob {
            epoch: self.epoch,
            job: Job::OtaProgress,
        });
        true
    }

    /// Remove a trusted client and persist the change
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be written.
    pub fn forget_client(
        &mut self,
        public_key: &[u8; 32],
    ) -> std::result::Result<bool, StorageError> {
        if !self.sessions.forget_client(public_key) {
            return Ok(false);
        }
        self.store.save(&self.sessions)?;
        Ok(true)
    }

    /// End pairing for this connection and ask the owner to disconnect
    pub fn stop_pairing(&mut self) {
        if self.stopped {
            return;
        }

        if let Some(mut engine) = self.engine.take() {
            let mut ctx = EngineContext {
                transport: &mut self.transport,
                identity: &self.identity,
                sessions: &mut self.sessions,
                store: self.store.as_mut(),
                events: &self.events,
                config: &self.config,
                robot: &mut self.robot,
            };
            engine.send_cancel(&mut ctx);
        } else if self.phase != PairingPhase::Initial {
            self.send_plain(&RtsMessage::CancelPairing, ProtocolVersion::Current);
        }

        tracing::info!(attempts = self.attempts, "Stopping pairing");
        self.teardown();
        self.stopped = true;
        self.events.emit(PairingEvent::StopPairingRequested);
        self.events
            .emit(PairingEvent::StatusChanged(ConnectionStatus::EndPairing));
    }

    /// Turn pairing mode on or off
    pub fn set_pairing_mode(&mut self, enabled: bool) {
        self.robot.pairing_mode = enabled;
    }

    /// Record whether the robot has an account owner
    pub fn set_has_owner(&mut self, has_owner: bool) {
        self.robot.has_owner = has_owner;
    }

    /// Record whether a firmware update is running
    pub fn set_ota_in_progress(&mut self, in_progress: bool) {
        self.robot.ota_in_progress = in_progress;
    }

    /// Record whether a cloud authenticator is attached
    pub fn set_cloud_available(&mut self, available: bool) {
        self.robot.cloud_available = available;
    }

    /// Battery state reported in status
    pub fn set_battery_state(&mut self, battery_state: u8) {
        self.robot.battery_state = battery_state;
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> PairingPhase {
        self.engine.as_ref().map_or(self.phase, PairingEngine::phase)
    }

    /// Negotiated generation, once the handshake is done
    #[must_use]
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.engine.as_ref().map(PairingEngine::version)
    }

    /// Current engine, once the handshake is done
    #[must_use]
    pub fn engine(&self) -> Option<&PairingEngine> {
        self.engine.as_ref()
    }

    /// Attempts used on this connection
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the pairing timer fires
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether pairing ended for this connection
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Current attempt number for tagging job outcomes
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Persisted sessions
    #[must_use]
    pub fn sessions(&self) -> &SavedSessions {
        &self.sessions
    }

    /// Robot-wide state
    #[must_use]
    pub fn robot(&self) -> &RobotState {
        &self.robot
    }

    /// Robot identity public key
    #[must_use]
    pub fn public_key(&self) -> X25519PublicKey {
        self.identity.public_key()
    }

    /// Event bus
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    fn init(&mut self) {
        self.teardown();

        let handshake = Handshake::new(ProtocolVersion::Current).encode();
        if let Err(e) = self.transport.send_plain_text(&handshake) {
            tracing::warn!("Failed to send handshake: {}", e);
        }
        self.phase = PairingPhase::AwaitingHandshake;
        self.deadline = Some(Instant::now() + self.config.pairing_timeout);
        tracing::debug!(attempt = self.attempts + 1, "Sent handshake");
    }

    fn teardown(&mut self) {
        self.transport.clear_secrets();
        self.engine = None;
        self.phase = PairingPhase::Initial;
        self.deadline = None;
        self.epoch += 1;
        self.jobs.clear();
    }

    fn handle_reset(&mut self, forced: bool) {
        if forced {
            tracing::info!("Forced reset, ending attempt");
            self.teardown();
            self.events
                .emit(PairingEvent::StatusChanged(ConnectionStatus::EndPairing));
            return;
        }

        self.attempts += 1;
        if self.attempts < self.config.max_pairing_attempts {
            tracing::info!(
                attempts = self.attempts,
                max = self.config.max_pairing_attempts,
                "Resetting pairing"
            );
            self.init();
            let status = if self.robot.pairing_mode {
                ConnectionStatus::ShowPrePin
            } else {
                ConnectionStatus::EndPairing
            };
            self.events.emit(PairingEvent::StatusChanged(status));
        } else {
            tracing::warn!(attempts = self.attempts, "Too many pairing attempts");
            // the engine already sent its cancel
            self.teardown();
            self.stop_pairing();
        }
    }

    fn apply(&mut self, actions: Vec<EngineAction>) {
        for action in actions {
            match action {
                EngineAction::Reset { forced } => {
                    self.handle_reset(forced);
                    return;
                }
                EngineAction::StopPairing => {
                    self.stop_pairing();
                    return;
                }
                EngineAction::Authenticated => self.attempts = 0,
                EngineAction::Dispatch(job) => self.jobs.push(DispatchedJob {
                    epoch: self.epoch,
                    job,
                }),
            }
        }
    }

    fn with_engine(&mut self, f: impl FnOnce(&mut PairingEngine, &mut EngineContext<'_>)) {
        let Some(mut engine) = self.engine.take() else {
            return;
        };

        {
            let mut ctx = EngineContext {
                transport: &mut self.transport,
                identity: &self.identity,
                sessions: &mut self.sessions,
                store: self.store.as_mut(),
                events: &self.events,
                config: &self.config,
                robot: &mut self.robot,
            };
            f(&mut engine, &mut ctx);
        }

        let actions = engine.take_actions();
        self.engine = Some(engine);
        self.apply(actions);
    }

    fn send_plain(&mut self, message: &RtsMessage, version: ProtocolVersion) {
        match message.encode(&version.capabilities()) {
            Ok(bytes) => {
                if let Err(e) = self.transport.send_plain_text(&bytes) {
                    tracing::warn!("Failed to send {:?}: {}", message.tag(), e);
                }
            }
            Err(e) => tracing::warn!("Cannot encode {:?}: {}", message.tag(), e),
        }
    }
}

impl std::fmt::Debug for PairingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingSession")
            .field("phase", &self.phase())
            .field("version", &self.version())
            .field("attempts", &self.attempts)
            .field("stopped", &self.stopped)
            .field("clients", &self.sessions.clients.len())
            .finish_non_exhaustive()
    }
}
