//! Slow work the engine hands to the task executor
//!
//! A [`Job`] is plain data produced by the engine. [`run_job`] performs it
//! against the collaborators and returns a [`JobOutcome`], which re-enters the
//! engine on the session loop.

use std::time::Duration;

use tokio::time::Instant;

use super::collaborators::{
    AuthKind, Collaborators, IpAddresses, OtaProgress, TokenError, WifiCredentials, WifiStatus,
};
use crate::protocol::messages::{CloudStatus, WifiConnState, WifiConnectResult, WifiScanEntry};

/// Scan status reported when the scan worked
pub const SCAN_STATUS_OK: u8 = 0;
/// Scan status reported when the scan failed
pub const SCAN_STATUS_FAILED: u8 = 1;

/// Work requested by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Status,
    WifiScan,
    WifiConnect {
        credentials: WifiCredentials,
        timeout: Duration,
        poll_interval: Duration,
    },
    WifiIp,
    WifiForget {
        delete_all: bool,
        ssid_hex: String,
    },
    AccessPoint {
        enable: bool,
        ssid: String,
        password: String,
    },
    OtaStart {
        url: String,
    },
    OtaCancel,
    OtaProgress,
    FetchLogs,
    CloudSession {
        session_token: String,
        client_name: String,
        app_id: String,
    },
}

impl Job {
    /// Short name for logs; job payloads may carry secrets
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::WifiScan => "wifi-scan",
            Self::WifiConnect { .. } => "wifi-connect",
            Self::WifiIp => "wifi-ip",
            Self::WifiForget { .. } => "wifi-forget",
            Self::AccessPoint { .. } => "access-point",
            Self::OtaStart { .. } => "ota-start",
            Self::OtaCancel => "ota-cancel",
            Self::OtaProgress => "ota-progress",
            Self::FetchLogs => "fetch-logs",
            Self::CloudSession { .. } => "cloud-session",
        }
    }
}

/// Result of a [`Job`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Status(WifiStatus),
    WifiScan {
        status: u8,
        networks: Vec<WifiScanEntry>,
    },
    WifiConnect {
        ssid_hex: String,
        state: WifiConnState,
        result: WifiConnectResult,
    },
    WifiIp(IpAddresses),
    WifiForget {
        did_delete: bool,
        ssid_hex: String,
    },
    AccessPoint {
        enabled: bool,
        ssid: String,
        password: String,
    },
    OtaStarted {
        accepted: bool,
        progress: OtaProgress,
    },
    OtaCancelled(WifiStatus),
    OtaProgress(OtaProgress),
    Logs {
        exit_code: i32,
        data: Vec<u8>,
    },
    CloudSession {
        status: CloudStatus,
        client_token_guid: String,
    },
}

/// Whether a cloud status means the session was authorized
#[must_use]
pub fn is_cloud_authorized(status: CloudStatus) -> bool {
    matches!(
        status,
        CloudStatus::AuthorizedAsPrimary | CloudStatus::AuthorizedAsSecondary
    )
}

/// Perform `job`
pub async fn run_job(job: Job, collaborators: &Collaborators) -> JobOutcome {
    tracing::debug!(job = job.name(), "Running job");
    match job {
        Job::Status => JobOutcome::Status(wifi_status(collaborators).await),
        Job::WifiScan => wifi_scan(collaborators).await,
        Job::WifiConnect {
            credentials,
            timeout,
            poll_interval,
        } => wifi_connect(collaborators, credentials, timeout, poll_interval).await,
        Job::WifiIp => {
            let addresses = match &collaborators.wifi {
                Some(wifi) => wifi.ip_addresses().await,
                None => IpAddresses::default(),
            };
            JobOutcome::WifiIp(addresses)
        }
        Job::WifiForget {
            delete_all,
            ssid_hex,
        } => {
            let did_delete = match &collaborators.wifi {
                Some(wifi) => wifi.forget(delete_all, &ssid_hex).await.unwrap_or_else(|e| {
                    tracing::warn!("WiFi forget failed: {}", e);
                    false
                }),
                None => false,
            };
            JobOutcome::WifiForget {
                did_delete,
                ssid_hex,
            }
        }
        Job::AccessPoint {
            enable,
            ssid,
            password,
        } => access_point(collaborators, enable, ssid, password).await,
        Job::OtaStart { url } => {
            let Some(ota) = &collaborators.ota else {
                tracing::warn!("OTA requested without an updater");
                return JobOutcome::OtaStarted {
                    accepted: false,
                    progress: OtaProgress::default(),
                };
            };
            let accepted = match ota.start(&url).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("OTA start failed: {}", e);
                    false
                }
            };
            JobOutcome::OtaStarted {
                accepted,
                progress: ota.progress().await,
            }
        }
        Job::OtaCancel => {
            if let Some(ota) = &collaborators.ota {
                if let Err(e) = ota.cancel().await {
                    tracing::warn!("OTA cancel failed: {}", e);
                }
            }
            JobOutcome::OtaCancelled(wifi_status(collaborators).await)
        }
        Job::OtaProgress => {
            let progress = match &collaborators.ota {
                Some(ota) => ota.progress().await,
                None => OtaProgress::default(),
            };
            JobOutcome::OtaProgress(progress)
        }
        Job::FetchLogs => match &collaborators.diagnostics {
            Some(diagnostics) => match diagnostics.fetch_logs().await {
                Ok(data) => JobOutcome::Logs { exit_code: 0, data },
                Err(e) => {
                    tracing::warn!("Log collection failed: {}", e);
                    JobOutcome::Logs {
                        exit_code: -1,
                        data: Vec::new(),
                    }
                }
            },
            None => JobOutcome::Logs {
                exit_code: -1,
                data: Vec::new(),
            },
        },
        Job::CloudSession {
            session_token,
            client_name,
            app_id,
        } => cloud_session(collaborators, &session_token, &client_name, &app_id).await,
    }
}

async fn wifi_status(collaborators: &Collaborators) -> WifiStatus {
    match &collaborators.wifi {
        Some(wifi) => wifi.status().await,
        None => WifiStatus::default(),
    }
}

async fn wifi_scan(collaborators: &Collaborators) -> JobOutcome {
    let Some(wifi) = &collaborators.wifi else {
        return JobOutcome::WifiScan {
            status: SCAN_STATUS_FAILED,
            networks: Vec::new(),
        };
    };

    match wifi.scan().await {
        Ok(networks) => JobOutcome::WifiScan {
            status: SCAN_STATUS_OK,
            networks,
        },
        Err(e) => {
            tracing::warn!("WiFi scan failed: {}", e);
            JobOutcome::WifiScan {
                status: SCAN_STATUS_FAILED,
                networks: Vec::new(),
            }
        }
    }
}

async fn wifi_connect(
    collaborators: &Collaborators,
    credentials: WifiCredentials,
    timeout: Duration,
    poll_interval: Duration,
) -> JobOutcome {
    let Some(wifi) = &collaborators.wifi else {
        return JobOutcome::WifiConnect {
            ssid_hex: credentials.ssid_hex,
            state: WifiConnState::Unknown,
            result: WifiConnectResult::Failure,
        };
    };

    let started = wifi.connect(&credentials).await;
    if started != WifiConnectResult::Success {
        tracing::info!(result = ?started, "WiFi connect refused");
        return JobOutcome::WifiConnect {
            ssid_hex: credentials.ssid_hex,
            state: wifi.status().await.state,
            result: started,
        };
    }

    let deadline = Instant::now() + timeout;
    loop {
        let status = wifi.status().await;
        if status.state == WifiConnState::Online {
            return JobOutcome::WifiConnect {
                ssid_hex: credentials.ssid_hex,
                state: status.state,
                result: WifiConnectResult::Success,
            };
        }
        if Instant::now() >= deadline {
            tracing::info!(?timeout, "WiFi connect timed out");
            return JobOutcome::WifiConnect {
                ssid_hex: credentials.ssid_hex,
                state: status.state,
                result: WifiConnectResult::Timeout,
            };
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn access_point(
    collaborators: &Collaborators,
    enable: bool,
    ssid: String,
    password: String,
) -> JobOutcome {
    let enabled = match &collaborators.wifi {
        Some(wifi) => wifi
            .set_access_point(enable, &ssid, &password)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Access point switch failed: {}", e);
                false
            }),
        None => false,
    };

    if enabled {
        JobOutcome::AccessPoint {
            enabled,
            ssid,
            password,
        }
    } else {
        JobOutcome::AccessPoint {
            enabled,
            ssid: String::new(),
            password: String::new(),
        }
    }
}

async fn cloud_session(
    collaborators: &Collaborators,
    session_token: &str,
    client_name: &str,
    app_id: &str,
) -> JobOutcome {
    let failed = |status| JobOutcome::CloudSession {
        status,
        client_token_guid: String::new(),
    };

    let Some(cloud) = &collaborators.cloud else {
        return failed(CloudStatus::UnknownError);
    };

    if let Some(wifi) = &collaborators.wifi {
        if wifi.status().await.state != WifiConnState::Online {
            tracing::info!("Cloud session requested while offline");
            return failed(CloudStatus::ConnectionError);
        }
    }

    let kind = match cloud.fetch_jwt().await {
        TokenError::NullToken => AuthKind::Primary,
        TokenError::NoError => AuthKind::Secondary,
        TokenError::InvalidToken => AuthKind::Reassociate,
        TokenError::Connection => return failed(CloudStatus::ConnectionError),
        TokenError::WrongAccount | TokenError::Unknown => return failed(CloudStatus::UnknownError),
    };
    tracing::debug!(?kind, "Authorizing cloud session");

    let response = cloud
        .authorize(kind, session_token, client_name, app_id)
        .await;

    let status = match response.error {
        TokenError::NoError if kind == AuthKind::Secondary => CloudStatus::AuthorizedAsSecondary,
        TokenError::NoError => CloudStatus::AuthorizedAsPrimary,
        TokenError::Connection => CloudStatus::ConnectionError,
        TokenError::WrongAccount => CloudStatus::WrongAccount,
        TokenError::InvalidToken => CloudStatus::InvalidSessionToken,
        TokenError::NullToken | TokenError::Unknown => CloudStatus::UnknownError,
    };

    if is_cloud_authorized(status) {
        JobOutcome::CloudSession {
            status,
            client_token_guid: response.app_token,
        }
    } else {
        failed(status)
    }
}
