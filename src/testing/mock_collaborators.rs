//! Scriptable stand-ins for the robot services

use std::sync::Mutex;

use async_trait::async_trait;

use super::lock;
use crate::pairing::{
    AuthKind, AuthResponse, CloudAuthenticator, CollaboratorError, DiagnosticsProvider,
    IpAddresses, OtaController, OtaProgress, TokenError, WifiController, WifiCredentials,
    WifiStatus,
};
use crate::protocol::messages::{WifiConnState, WifiConnectResult, WifiScanEntry};

/// Recorded cloud authorization call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCall {
    /// Kind chosen from the token probe
    pub kind: AuthKind,
    /// Session token from the app
    pub session_token: String,
    /// Client name
    pub client_name: String,
    /// App id
    pub app_id: String,
}

/// Cloud service with a fixed token probe result and authorization answer
#[derive(Debug)]
pub struct MockCloud {
    jwt: TokenError,
    authorize_error: TokenError,
    app_token: String,
    calls: Mutex<Vec<AuthCall>>,
}

impl MockCloud {
    /// Cloud whose probe returns `jwt` and whose authorization returns `error`
    #[must_use]
    pub fn new(jwt: TokenError, authorize_error: TokenError) -> Self {
        Self {
            jwt,
            authorize_error,
            app_token: "app-token".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Unowned robot that authorizes the first user as primary
    #[must_use]
    pub fn unowned() -> Self {
        Self::new(TokenError::NullToken, TokenError::NoError)
    }

    /// Authorization calls so far
    #[must_use]
    pub fn calls(&self) -> Vec<AuthCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl CloudAuthenticator for MockCloud {
    async fn fetch_jwt(&self) -> TokenError {
        self.jwt
    }

    async fn authorize(
        &self,
        kind: AuthKind,
        session_token: &str,
        client_name: &str,
        app_id: &str,
    ) -> AuthResponse {
        lock(&self.calls).push(AuthCall {
            kind,
            session_token: session_token.to_string(),
            client_name: client_name.to_string(),
            app_id: app_id.to_string(),
        });

        let ok = self.authorize_error == TokenError::NoError;
        AuthResponse {
            error: self.authorize_error,
            app_token: if ok { self.app_token.clone() } else { String::new() },
            jwt: if ok { "robot-jwt".to_string() } else { String::new() },
        }
    }
}

/// WiFi service backed by in-memory state
#[derive(Debug)]
pub struct MockWifi {
    status: Mutex<WifiStatus>,
    networks: Vec<WifiScanEntry>,
    connect_result: WifiConnectResult,
    comes_online: bool,
    connects: Mutex<Vec<WifiCredentials>>,
    forgotten: Mutex<Vec<String>>,
}

impl MockWifi {
    /// Offline robot that sees `networks` and joins any of them
    #[must_use]
    pub fn new(networks: Vec<WifiScanEntry>) -> Self {
        Self {
            status: Mutex::new(WifiStatus {
                state: WifiConnState::Disconnected,
                ..WifiStatus::default()
            }),
            networks,
            connect_result: WifiConnectResult::Success,
            comes_online: true,
            connects: Mutex::new(Vec::new()),
            forgotten: Mutex::new(Vec::new()),
        }
    }

    /// Robot already online on `ssid_hex`
    #[must_use]
    pub fn online(ssid_hex: &str) -> Self {
        let wifi = Self::new(Vec::new());
        {
            let mut status = lock(&wifi.status);
            status.state = WifiConnState::Online;
            status.ssid_hex = ssid_hex.to_string();
        }
        wifi
    }

    /// Accepted connects never reach the online state
    #[must_use]
    pub fn never_online(mut self) -> Self {
        self.comes_online = false;
        self
    }

    /// Refuse connects with `result`
    #[must_use]
    pub fn refusing(mut self, result: WifiConnectResult) -> Self {
        self.connect_result = result;
        self
    }

    /// Credentials passed to `connect`
    #[must_use]
    pub fn connects(&self) -> Vec<WifiCredentials> {
        lock(&self.connects).clone()
    }

    /// SSIDs forgotten so far; `*` records a forget-all
    #[must_use]
    pub fn forgotten(&self) -> Vec<String> {
        lock(&self.forgotten).clone()
    }
}

#[async_trait]
impl WifiController for MockWifi {
    async fn status(&self) -> WifiStatus {
        lock(&self.status).clone()
    }

    async fn scan(&self) -> Result<Vec<WifiScanEntry>, CollaboratorError> {
        Ok(self.networks.clone())
    }

    async fn connect(&self, credentials: &WifiCredentials) -> WifiConnectResult {
        lock(&self.connects).push(credentials.clone());
        if self.connect_result != WifiConnectResult::Success {
            return self.connect_result;
        }

        let mut status = lock(&self.status);
        status.ssid_hex.clone_from(&credentials.ssid_hex);
        status.state = if self.comes_online {
            WifiConnState::Online
        } else {
            WifiConnState::Connected
        };
        WifiConnectResult::Success
    }

    async fn forget(&self, delete_all: bool, ssid_hex: &str) -> Result<bool, CollaboratorError> {
        let entry = if delete_all { "*" } else { ssid_hex };
        lock(&self.forgotten).push(entry.to_string());
        Ok(true)
    }

    async fn ip_addresses(&self) -> IpAddresses {
        if lock(&self.status).state == WifiConnState::Online {
            IpAddresses {
                ipv4: Some([192, 168, 1, 42]),
                ipv6: None,
            }
        } else {
            IpAddresses::default()
        }
    }

    async fn set_access_point(
        &self,
        enable: bool,
        _ssid: &str,
        _password: &str,
    ) -> Result<bool, CollaboratorError> {
        lock(&self.status).access_point = enable;
        Ok(enable)
    }
}

/// Updater reporting a fixed progress
#[derive(Debug, Default)]
pub struct MockOta {
    progress: Mutex<OtaProgress>,
    urls: Mutex<Vec<String>>,
    cancelled: Mutex<bool>,
}

impl MockOta {
    /// Idle updater
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reported progress
    pub fn set_progress(&self, progress: OtaProgress) {
        *lock(&self.progress) = progress;
    }

    /// URLs passed to `start`
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        lock(&self.urls).clone()
    }

    /// Whether `cancel` was called
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        *lock(&self.cancelled)
    }
}

#[async_trait]
impl OtaController for MockOta {
    async fn start(&self, url: &str) -> Result<(), CollaboratorError> {
        lock(&self.urls).push(url.to_string());
        Ok(())
    }

    async fn cancel(&self) -> Result<(), CollaboratorError> {
        *lock(&self.cancelled) = true;
        Ok(())
    }

    async fn progress(&self) -> OtaProgress {
        *lock(&self.progress)
    }
}

/// Diagnostics returning a fixed archive, or failing
#[derive(Debug)]
pub struct MockDiagnostics {
    logs: Option<Vec<u8>>,
}

impl MockDiagnostics {
    /// Diagnostics returning `logs`
    #[must_use]
    pub fn new(logs: Vec<u8>) -> Self {
        Self { logs: Some(logs) }
    }

    /// Diagnostics whose collection fails
    #[must_use]
    pub fn failing() -> Self {
        Self { logs: None }
    }
}

#[async_trait]
impl DiagnosticsProvider for MockDiagnostics {
    async fn fetch_logs(&self) -> Result<Vec<u8>, CollaboratorError> {
        self.logs
            .clone()
            .ok_or_else(|| CollaboratorError::Failed("log collection failed".to_string()))
    }
}
