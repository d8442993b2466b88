//! Robot services the pairing session drives on behalf of the app
//!
//! Every trait is optional: a session without a WiFi controller still pairs,
//! it just answers WiFi requests with failure codes.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::messages::{WifiConnState, WifiConnectResult, WifiScanEntry};

/// Collaborator failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The service is not running
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service ran and failed
    #[error("operation failed: {0}")]
    Failed(String),
}

/// Result of probing for a stored cloud token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// A valid token exists
    NoError,
    /// No token stored; the robot has no owner yet
    NullToken,
    /// A token exists but the cloud rejected it
    InvalidToken,
    /// Could not reach the cloud
    Connection,
    /// The session token belongs to a different account than the owner's
    WrongAccount,
    /// Anything else
    Unknown,
}

/// How a cloud session should be authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// First owner of the robot
    Primary,
    /// Additional user of an owned robot
    Secondary,
    /// Re-bind an owner whose token went stale
    Reassociate,
}

/// Outcome of a cloud authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    /// Failure kind, `TokenError::NoError` on success
    pub error: TokenError,
    /// Token handed back to the app
    pub app_token: String,
    /// Robot token issued by the cloud
    pub jwt: String,
}

/// Cloud account service
#[async_trait]
pub trait CloudAuthenticator: Send + Sync {
    /// Probe for the robot's stored token
    async fn fetch_jwt(&self) -> TokenError;

    /// Authorize a session token for this robot
    async fn authorize(
        &self,
        kind: AuthKind,
        session_token: &str,
        client_name: &str,
        app_id: &str,
    ) -> AuthResponse;
}

/// WiFi link summary
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WifiStatus {
    /// Connectivity
    pub state: WifiConnState,
    /// Current network, hex encoded
    pub ssid_hex: String,
    /// Access point mode active
    pub access_point: bool,
}

/// Network join parameters
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    /// Network, hex encoded
    pub ssid_hex: String,
    /// Passphrase
    pub password: String,
    /// Authentication type as sent by the app
    pub auth_type: u8,
    /// Hidden network
    pub hidden: bool,
}

impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid_hex", &self.ssid_hex)
            .field("auth_type", &self.auth_type)
            .field("hidden", &self.hidden)
            .finish_non_exhaustive()
    }
}

/// Assigned addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpAddresses {
    /// IPv4 address
    pub ipv4: Option<[u8; 4]>,
    /// IPv6 address
    pub ipv6: Option<[u8; 16]>,
}

/// WiFi service
#[async_trait]
pub trait WifiController: Send + Sync {
    /// Current link state
    async fn status(&self) -> WifiStatus;

    /// Scan for networks
    async fn scan(&self) -> Result<Vec<WifiScanEntry>, CollaboratorError>;

    /// Start joining a network; returns once the attempt was accepted or refused
    async fn connect(&self, credentials: &WifiCredentials) -> WifiConnectResult;

    /// Forget one network or all of them; returns whether anything was removed
    async fn forget(&self, delete_all: bool, ssid_hex: &str) -> Result<bool, CollaboratorError>;

    /// Assigned addresses
    async fn ip_addresses(&self) -> IpAddresses;

    /// Switch access point mode; returns whether it is now enabled
    async fn set_access_point(
        &self,
        enable: bool,
        ssid: &str,
        password: &str,
    ) -> Result<bool, CollaboratorError>;
}

/// Firmware update progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OtaProgress {
    /// Updater status code
    pub status: u8,
    /// Bytes downloaded
    pub current: u64,
    /// Bytes expected
    pub expected: u64,
}

/// Firmware updater
#[async_trait]
pub trait OtaController: Send + Sync {
    /// Begin downloading from `url`
    async fn start(&self, url: &str) -> Result<(), CollaboratorError>;

    /// Abort a running update
    async fn cancel(&self) -> Result<(), CollaboratorError>;

    /// Current progress
    async fn progress(&self) -> OtaProgress;
}

/// Log collection
#[async_trait]
pub trait DiagnosticsProvider: Send + Sync {
    /// Collect and return the log archive
    async fn fetch_logs(&self) -> Result<Vec<u8>, CollaboratorError>;
}

/// The services available to a session
#[derive(Clone, Default)]
pub struct Collaborators {
    /// Cloud account service
    pub cloud: Option<Arc<dyn CloudAuthenticator>>,
    /// WiFi service
    pub wifi: Option<Arc<dyn WifiController>>,
    /// Firmware updater
    pub ota: Option<Arc<dyn OtaController>>,
    /// Log collection
    pub diagnostics: Option<Arc<dyn DiagnosticsProvider>>,
}

impl Collaborators {
    /// No services
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cloud service
    #[must_use]
    pub fn with_cloud(mut self, cloud: Arc<dyn CloudAuthenticator>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Attach a WiFi service
    #[must_use]
    pub fn with_wifi(mut self, wifi: Arc<dyn WifiController>) -> Self {
        self.wifi = Some(wifi);
        self
    }

    /// Attach a firmware updater
    #[must_use]
    pub fn with_ota(mut self, ota: Arc<dyn OtaController>) -> Self {
        self.ota = Some(ota);
        self
    }

    /// Attach log collection
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsProvider>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("cloud", &self.cloud.is_some())
            .field("wifi", &self.wifi.is_some())
            .field("ota", &self.ota.is_some())
            .field("diagnostics", &self.diagnostics.is_some())
            .finish()
    }
}
