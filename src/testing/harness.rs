//! A [`PairingSession`] wired to a [`MockClient`]

use tokio::sync::broadcast;

use super::{MockClient, RecordingChannel};
use crate::config::PairingConfig;
use crate::error::{PairlinkError, Result};
use crate::events::{EventBus, PairingEvent};
use crate::pairing::{Collaborators, PairingSession, run_job};
use crate::protocol::messages::{ProtocolVersion, RtsMessage};
use crate::storage::SessionStore;
use crate::transport::{EncryptedTransport, TransportError};

use super::mock_client::Inbound;

/// Robot session and app simulator on one in-memory link
pub struct PairingHarness {
    /// Robot side
    pub session: PairingSession,
    /// App side
    pub client: MockClient,
    robot_wire: RecordingChannel,
    events_rx: broadcast::Receiver<PairingEvent>,
    events: Vec<PairingEvent>,
}

impl PairingHarness {
    /// Session over `store` and a fresh client speaking `version`
    ///
    /// # Errors
    ///
    /// Returns an error for a bad packet size or an unwritable store.
    pub fn new(
        config: PairingConfig,
        store: Box<dyn SessionStore>,
        version: ProtocolVersion,
    ) -> Result<Self> {
        let client = MockClient::new(version, config.max_packet_size)?;
        Self::with_client(config, store, client)
    }

    /// Session over `store` talking to an existing client
    ///
    /// # Errors
    ///
    /// Returns an error for a bad packet size or an unwritable store.
    pub fn with_client(
        config: PairingConfig,
        store: Box<dyn SessionStore>,
        mut client: MockClient,
    ) -> Result<Self> {
        client.new_connection();
        let robot_wire = RecordingChannel::new();
        let transport =
            EncryptedTransport::new(Box::new(robot_wire.clone()), config.max_packet_size)?;
        let events = EventBus::new();
        let events_rx = events.subscribe();
        let session = PairingSession::new(config, transport, store, events)?;

        Ok(Self {
            session,
            client,
            robot_wire,
            events_rx,
            events: Vec::new(),
        })
    }

    /// Hand the client over for a reconnect on a new harness
    #[must_use]
    pub fn into_client(self) -> MockClient {
        self.client
    }

    /// Deliver client packets to the robot; returns what the robot answered
    pub fn deliver(&mut self, packets: &[Vec<u8>]) -> Vec<Inbound> {
        for packet in packets {
            self.session.handle_packet(packet);
        }
        self.pump()
    }

    /// Client sends `message`; returns what the robot answered
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot encode or send the message.
    pub fn send(&mut self, message: &RtsMessage) -> Result<Vec<Inbound>> {
        let packets = self.client.send(message)?;
        Ok(self.deliver(&packets))
    }

    /// Move whatever the robot sent to the client
    pub fn pump(&mut self) -> Vec<Inbound> {
        let packets = self.robot_wire.take_packets();
        self.client.receive(&packets)
    }

    /// Begin pairing and exchange handshakes; returns the robot's messages
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot send its handshake.
    pub fn start(&mut self) -> Result<Vec<Inbound>> {
        self.session.begin_pairing();
        let mut inbound = self.pump();
        let handshake = self.client.handshake()?;
        inbound.extend(self.deliver(&handshake));
        Ok(inbound)
    }

    /// Run a first-time pair through challenge success
    ///
    /// The PIN is read from the robot's PIN event unless `pin` is given.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails to produce the expected message.
    pub fn pair_first_time(&mut self, pin: Option<&str>) -> Result<Vec<Inbound>> {
        let mut inbound = self.start()?;
        let response = self.client.first_time_response()?;
        inbound.extend(self.deliver(&response));

        let pin = match pin {
            Some(pin) => pin.to_string(),
            None => self.last_pin().ok_or(PairlinkError::SessionClosed)?,
        };
        self.client.enter_pin(&pin)?;
        inbound.extend(self.finish_key_exchange()?);
        Ok(inbound)
    }

    /// Run a reconnect with the client's stored keys through challenge success
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails to produce the expected message.
    pub fn reconnect(&mut self) -> Result<Vec<Inbound>> {
        let mut inbound = self.start()?;
        let response = self.client.reconnect_response()?;
        inbound.extend(self.deliver(&response));
        if !inbound
            .iter()
            .any(|i| matches!(i.message(), Some(RtsMessage::Nonce { .. })))
        {
            return Ok(inbound);
        }
        inbound.extend(self.finish_key_exchange()?);
        Ok(inbound)
    }

    /// Acknowledge the nonces and answer the challenge
    ///
    /// # Errors
    ///
    /// Returns an error if the robot never sent a challenge.
    pub fn finish_key_exchange(&mut self) -> Result<Vec<Inbound>> {
        let ack = self.client.ack_nonces()?;
        let mut inbound = self.deliver(&ack);

        let challenge = inbound
            .iter()
            .find_map(|i| match i.message() {
                Some(RtsMessage::Challenge { value }) => Some(*value),
                _ => None,
            })
            .ok_or(TransportError::NotEstablished)?;

        let answer = self.client.answer_challenge(challenge)?;
        inbound.extend(self.deliver(&answer));
        Ok(inbound)
    }

    /// Run every queued job against `collaborators` and feed the outcomes back
    ///
    /// Returns what the robot sent in response.
    pub async fn run_jobs(&mut self, collaborators: &Collaborators) -> Vec<Inbound> {
        let mut inbound = Vec::new();
        loop {
            let jobs = self.session.take_jobs();
            if jobs.is_empty() {
                break;
            }
            for dispatched in jobs {
                let outcome = run_job(dispatched.job, collaborators).await;
                self.session.handle_job_outcome(dispatched.epoch, outcome);
                inbound.extend(self.pump());
            }
        }
        inbound
    }

    /// Every event emitted so far
    pub fn events(&mut self) -> &[PairingEvent] {
        while let Ok(event) = self.events_rx.try_recv() {
            self.events.push(event);
        }
        &self.events
    }

    /// Most recent PIN shown by the robot
    pub fn last_pin(&mut self) -> Option<String> {
        self.events().iter().rev().find_map(|event| match event {
            PairingEvent::PinUpdated { pin } => Some(pin.clone()),
            _ => None,
        })
    }
}

impl std::fmt::Debug for PairingHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingHarness")
            .field("session", &self.session)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
