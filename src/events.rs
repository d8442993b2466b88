//! Event bus for pairing events

use tokio::sync::broadcast;

/// What the robot face should show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Waiting for the app; the PIN has not been generated yet
    ShowPrePin,
    /// Pairing flow finished or abandoned
    EndPairing,
}

/// Pairing events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// A new PIN was generated for a first-time pair
    PinUpdated {
        /// Digits to display
        pin: String,
    },
    /// A client authenticated while pairing mode was on
    PairingCompleted,
    /// The session wants the BLE connection torn down
    StopPairingRequested,
    /// The app asked for a firmware update
    OtaUpdateRequested {
        /// Update location
        url: String,
    },
    /// Face status changed
    StatusChanged(ConnectionStatus),
    /// Client records were persisted
    SessionKeysSaved {
        /// Number of stored clients
        clients: usize,
    },
    /// A cloud session was authorized
    CloudAuthorized {
        /// Authorized as primary owner
        primary: bool,
    },
    /// The app reported its connection id
    ClientConnectionId {
        /// Id as sent by the app
        id: String,
    },
}

impl PairingEvent {
    /// Whether this event changes what the robot face shows
    #[must_use]
    pub fn is_face_event(&self) -> bool {
        matches!(
            self,
            Self::PinUpdated { .. } | Self::StatusChanged(_) | Self::PairingCompleted
        )
    }
}

/// Event bus for distributing events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PairingEvent>,
}

impl EventBus {
    /// Create a new event bus
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Subscribe to events
    ///
    /// Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PairingEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    pub fn emit(&self, event: PairingEvent) {
        tracing::trace!(?event, "Emitting pairing event");
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    /// Get subscriber count
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
pub struct EventFilter {
    rx: broadcast::Receiver<PairingEvent>,
    filter: Box<dyn Fn(&PairingEvent) -> bool + Send>,
}

impl EventFilter {
    /// Create a filtered event receiver
    pub fn new<F>(bus: &EventBus, filter: F) -> Self
    where
        F: Fn(&PairingEvent) -> bool + Send + 'static,
    {
        Self {
            rx: bus.subscribe(),
            filter: Box::new(filter),
        }
    }

    /// Receive next matching event
    pub async fn recv(&mut self) -> Option<PairingEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if (self.filter)(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting
    pub fn try_recv(&mut self) -> Option<PairingEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if (self.filter)(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }

    /// Filter for events the robot face reacts to
    #[must_use]
    pub fn face_events(bus: &EventBus) -> Self {
        Self::new(bus, PairingEvent::is_face_event)
    }

    /// Filter for cloud and persistence events
    #[must_use]
    pub fn account_events(bus: &EventBus) -> Self {
        Self::new(bus, |e| {
            matches!(
                e,
                PairingEvent::SessionKeysSaved { .. } | PairingEvent::CloudAuthorized { .. }
            )
        })
    }
}
