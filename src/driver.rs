//! Async event loop for one BLE connection
//!
//! The [`ConnectionDriver`] owns the [`PairingSession`] and is the only task
//! that touches it. Inbound packets, owner commands, job outcomes, the pairing
//! timer and the OTA progress tick are all multiplexed onto that one task.
//! Jobs run on a [`TaskExecutor`] and come back as epoch-tagged outcomes.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::PairingConfig;
use crate::error::{PairlinkError, Result};
use crate::events::EventBus;
use crate::executor::TaskExecutor;
use crate::pairing::{
    Collaborators, JobOutcome, PairingPhase, PairingSession, RobotState, run_job,
};
use crate::protocol::messages::ProtocolVersion;
use crate::storage::StorageError;
use crate::transport::{RawChannel, TransportError};

const COMMAND_CHANNEL_SIZE: usize = 16;
const INBOUND_CHANNEL_SIZE: usize = 64;

/// Outbound packet queue used as the session's raw channel
#[derive(Debug, Clone)]
pub struct PacketSink {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl PacketSink {
    /// Sink feeding `tx`
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { tx }
    }
}

impl RawChannel for PacketSink {
    fn send(&mut self, packet: &[u8]) -> std::result::Result<(), TransportError> {
        self.tx
            .send(Bytes::copy_from_slice(packet))
            .map_err(|_| TransportError::Closed)
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current phase
    pub phase: PairingPhase,
    /// Negotiated generation
    pub version: Option<ProtocolVersion>,
    /// Attempts used on this connection
    pub attempts: u32,
    /// Pairing ended for this connection
    pub stopped: bool,
    /// Robot-wide state
    pub robot: RobotState,
    /// Stored client records
    pub clients: usize,
}

/// Requests from the connection owner
#[derive(Debug)]
pub enum SessionCommand {
    /// Start pairing on this connection
    BeginPairing,
    /// Turn pairing mode on or off
    SetPairingMode(bool),
    /// Record whether the robot has an owner
    SetHasOwner(bool),
    /// Record whether a firmware update is running
    SetOtaInProgress(bool),
    /// Battery state for status reports
    SetBatteryState(u8),
    /// Remove a stored client
    ForgetClient {
        /// Client public key
        public_key: [u8; 32],
        /// Whether a record was removed
        reply: oneshot::Sender<std::result::Result<bool, StorageError>>,
    },
    /// End pairing and cancel the app
    StopPairing,
    /// The BLE link dropped; ends the driver
    Disconnect,
    /// Report the session state
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Cloneable handle for controlling a running driver
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PairlinkError::SessionClosed)
    }

    /// Start pairing
    ///
    /// # Errors
    ///
    /// Returns `PairlinkError::SessionClosed` if the driver has stopped.
    pub async fn begin_pairing(&self) -> Result<()> {
        self.send(SessionCommand::BeginPairing).await
    }

    /// Turn pairing mode on or off
    ///
    /// # Errors
    ///
    /// Returns `PairlinkError::SessionClosed` if the driver has stopped.
    pub async fn set_pairing_mode(&self, enabled: bool) -> Result<()> {
        self.send(SessionCommand::SetPairingMode(enabled)).await
    }

    /// Record whether the robot has an owner
    ///
    /// # Errors
    ///
    /// Returns `PairlinkError::SessionClosed` if the driver has stopped.
    pub async fn set_has_owner(&self, has_owner: bool) -> Result<()> {
        self.send(SessionCommand::SetHasOwner(has_owner)).await
    }

    /// Record whether a firmware update is running
    ///
    /// # Errors
    ///
    /// Returns `PairlinkError::SessionClosed` if the driver has stopped.
    pub async fn set_ota_in_progress(&self, in_progress: bool) -> Result<()> {
        self.send(SessionCommand::SetOtaInProgress(in_progress))
            .await
    }

    /// Battery state for status reports
    ///
    /// # Errors
    ///
    /// Returns `PairlinkError::SessionClosed` if the driver has stopped.
    pub async fn set_battery_state(&self, battery_state: u8) -> Result<()> {
        self.send(SessionCommand::SetBatteryState(battery_state))
            .await
    }

    /// Remove a stored client; returns whether one was removed
    ///
    /// # Errors
    ///
    /// Returns `PairlinkError::SessionClosed` if the driver has stopped, or
    /// the storage error if the change could not be saved.
    pub async fn forget_client(&self, public_key: [u8; 32]) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::ForgetClient { public_key, reply })
            .await?;
        let removed = rx.await.map_err(|_| PairlinkError::SessionClosed)??;
        Ok(removed)
    }

    /// End pairing and cancel the app
    ///
    /// # Errors
    ///
    /// Returns `PairlinkError::SessionClosed` if the driver has stopped.
    pub async fn stop_pairing(&self) -> Result<()> {
        self.send(SessionCommand::StopPairing).await
    }

    /// Report a dropped link; the driver wipes secrets and exits
    ///
    /// # Errors
    ///
    /// Returns `PairlinkError::SessionClosed` if the driver has stopped.
    pub async fn disconnect(&self) -> Result<()> {
        self.send(SessionCommand::Disconnect).await
    }

    /// Current session state
    ///
    /// # Errors
    ///
    /// Returns `PairlinkError::SessionClosed` if the driver has stopped.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| PairlinkError::SessionClosed)
    }
}

/// Event loop for one connection
pub struct ConnectionDriver {
    session: PairingSession,
    executor: TaskExecutor,
    collaborators: Collaborators,
    inbound: mpsc::Receiver<Bytes>,
    commands: mpsc::Receiver<SessionCommand>,
    outcomes_tx: mpsc::UnboundedSender<(u64, JobOutcome)>,
    outcomes_rx: mpsc::UnboundedReceiver<(u64, JobOutcome)>,
}

impl ConnectionDriver {
    /// Driver for `session`, running jobs on `executor`
    #[must_use]
    pub fn new(
        mut session: PairingSession,
        collaborators: Collaborators,
        executor: TaskExecutor,
        inbound: mpsc::Receiver<Bytes>,
        commands: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        session.set_cloud_available(collaborators.cloud.is_some());
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Self {
            session,
            executor,
            collaborators,
            inbound,
            commands,
            outcomes_tx,
            outcomes_rx,
        }
    }

    /// Run until the link drops or the owner disconnects
    pub async fn run(mut self) {
        let mut ota_tick = tokio::time::interval(self.session.config().ota_progress_interval);
        ota_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.dispatch_jobs();
            let deadline = self.session.deadline();

            tokio::select! {
                packet = self.inbound.recv() => match packet {
                    Some(packet) => self.session.handle_packet(&packet),
                    None => {
                        tracing::debug!("Inbound packet stream closed");
                        self.session.handle_disconnect();
                        break;
                    }
                },

                command = self.commands.recv() => match command {
                    Some(SessionCommand::Disconnect) | None => {
                        self.session.handle_disconnect();
                        break;
                    }
                    Some(command) => self.apply(command),
                },

                Some((epoch, outcome)) = self.outcomes_rx.recv() => {
                    self.session.handle_job_outcome(epoch, outcome);
                }

                () = sleep_until(deadline) => self.session.handle_timeout(),

                _ = ota_tick.tick() => {
                    self.session.poll_ota_progress();
                }
            }
        }

        self.executor.shutdown().await;
        tracing::debug!("Connection driver stopped");
    }

    fn apply(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::BeginPairing => self.session.begin_pairing(),
            SessionCommand::SetPairingMode(enabled) => self.session.set_pairing_mode(enabled),
            SessionCommand::SetHasOwner(has_owner) => self.session.set_has_owner(has_owner),
            SessionCommand::SetOtaInProgress(in_progress) => {
                self.session.set_ota_in_progress(in_progress);
            }
            SessionCommand::SetBatteryState(state) => self.session.set_battery_state(state),
            SessionCommand::ForgetClient { public_key, reply } => {
                let _ = reply.send(self.session.forget_client(&public_key));
            }
            SessionCommand::StopPairing => self.session.stop_pairing(),
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(SessionSnapshot {
                    phase: self.session.phase(),
                    version: self.session.version(),
                    attempts: self.session.attempts(),
                    stopped: self.session.is_stopped(),
                    robot: self.session.robot().clone(),
                    clients: self.session.sessions().clients.len(),
                });
            }
            SessionCommand::Disconnect => self.session.handle_disconnect(),
        }
    }

    fn dispatch_jobs(&mut self) {
        for dispatched in self.session.take_jobs() {
            let collaborators = self.collaborators.clone();
            let outcomes = self.outcomes_tx.clone();
            let name = dispatched.job.name();
            let submitted = self.executor.wake(async move {
                let outcome = run_job(dispatched.job, &collaborators).await;
                // the driver may have exited meanwhile
                let _ = outcomes.send((dispatched.epoch, outcome));
            });
            if let Err(e) = submitted {
                tracing::warn!(job = name, "Failed to queue job: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ConnectionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDriver")
            .field("session", &self.session)
            .field("collaborators", &self.collaborators)
            .finish_non_exhaustive()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// A running connection: packet queues plus the control handle
#[derive(Debug)]
pub struct BleLink {
    /// Control handle
    pub handle: SessionHandle,
    /// Packets received from the app
    pub inbound: mpsc::Sender<Bytes>,
    /// Packets to write to the app
    pub outbound: mpsc::UnboundedReceiver<Bytes>,
    task: JoinHandle<()>,
}

impl BleLink {
    /// Wait for the driver to exit
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!("Connection driver failed: {}", e);
        }
    }
}

/// Open a session for a new BLE connection and spawn its driver
///
/// Must be called from inside a tokio runtime.
///
/// # Errors
///
/// Returns an error for invalid configuration, an unusable store or when no
/// runtime is available.
pub fn open(
    config: PairingConfig,
    collaborators: Collaborators,
    events: EventBus,
) -> Result<BleLink> {
    let (outbound_tx, outbound) = mpsc::unbounded_channel();
    let session = PairingSession::open(config, Box::new(PacketSink::new(outbound_tx)), events)?;
    let executor = TaskExecutor::new()?;

    let (inbound, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_SIZE);
    let (commands, commands_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    let driver = ConnectionDriver::new(session, collaborators, executor, inbound_rx, commands_rx);
    tracing::debug!(?driver, "Spawning connection driver");
    let task = tokio::spawn(driver.run());

    Ok(BleLink {
        handle: SessionHandle { commands },
        inbound,
        outbound,
        task,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::events::PairingEvent;
    use crate::protocol::messages::RtsMessage;
    use crate::testing::{Inbound, MockClient, MockWifi};

    fn test_config() -> PairingConfig {
        PairingConfig::builder()
            .robot_name("Vector-T3S7")
            .build_id("v1.8.0")
            .pairing_timeout(Duration::from_secs(30))
            .build()
            .unwrap()
    }

    async fn drain(link: &mut BleLink, client: &mut MockClient) -> Vec<Inbound> {
        let mut packets = Vec::new();
        while let Ok(Some(packet)) =
            tokio::time::timeout(Duration::from_millis(50), link.outbound.recv()).await
        {
            packets.push(packet.to_vec());
        }
        client.receive(&packets)
    }

    async fn deliver(link: &BleLink, packets: Vec<Vec<u8>>) {
        for packet in packets {
            link.inbound.send(Bytes::from(packet)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_driver_pairs_and_answers_status() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let collaborators =
            Collaborators::new().with_wifi(Arc::new(MockWifi::online("6e6574")));
        let mut link = open(test_config(), collaborators, events).unwrap();
        let mut client = MockClient::new(ProtocolVersion::Current, 20).unwrap();

        link.handle.set_pairing_mode(true).await.unwrap();
        link.handle.begin_pairing().await.unwrap();
        assert_eq!(drain(&mut link, &mut client).await, vec![Inbound::Handshake(5)]);

        deliver(&link, client.handshake().unwrap()).await;
        drain(&mut link, &mut client).await;
        deliver(&link, client.first_time_response().unwrap()).await;
        drain(&mut link, &mut client).await;

        let pin = loop {
            if let PairingEvent::PinUpdated { pin } = rx.recv().await.unwrap() {
                break pin;
            }
        };
        client.enter_pin(&pin).unwrap();
        deliver(&link, client.ack_nonces().unwrap()).await;
        let challenge = drain(&mut link, &mut client)
            .await
            .iter()
            .find_map(|i| match i.message() {
                Some(RtsMessage::Challenge { value }) => Some(*value),
                _ => None,
            })
            .unwrap();
        deliver(&link, client.answer_challenge(challenge).unwrap()).await;
        drain(&mut link, &mut client).await;

        let snapshot = link.handle.snapshot().await.unwrap();
        assert!(snapshot.phase.is_confirmed());
        assert_eq!(snapshot.clients, 1);

        deliver(&link, client.send(&RtsMessage::StatusRequest).unwrap()).await;
        let inbound = drain(&mut link, &mut client).await;
        assert!(matches!(
            inbound[0].message(),
            Some(RtsMessage::StatusResponse(status)) if status.ssid_hex == "6e6574"
        ));

        link.handle.disconnect().await.unwrap();
        link.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_timer_restarts_handshake() {
        let mut link = open(test_config(), Collaborators::new(), EventBus::new()).unwrap();
        let mut client = MockClient::new(ProtocolVersion::Current, 20).unwrap();

        link.handle.begin_pairing().await.unwrap();
        assert_eq!(drain(&mut link, &mut client).await.len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let inbound = drain(&mut link, &mut client).await;
        assert!(matches!(
            inbound.as_slice(),
            [Inbound::Message(RtsMessage::CancelPairing), Inbound::Handshake(5)]
        ));
        assert_eq!(link.handle.snapshot().await.unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_driver_exits_when_inbound_closes() {
        let link = open(test_config(), Collaborators::new(), EventBus::new()).unwrap();
        let BleLink {
            handle,
            inbound,
            task,
            ..
        } = link;

        drop(inbound);
        task.await.unwrap();
        assert!(matches!(
            handle.snapshot().await,
            Err(PairlinkError::SessionClosed)
        ));
    }
}
