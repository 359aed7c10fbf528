use std::fmt;

use immich_core::{ImmichClient, Method, ProbeBody, StatusCode};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Ok,
    Limited,
    Invalid,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Ok => "OK",
            ConnectionStatus::Limited => "limited",
            ConnectionStatus::Invalid => "invalid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed,
    Status(StatusCode),
    Unreachable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCheck {
    pub name: &'static str,
    /// A 401/403 here means the key itself is rejected.
    pub auth_sensitive: bool,
    pub outcome: CheckOutcome,
}

impl ProbeCheck {
    pub fn passed(&self) -> bool {
        self.outcome == CheckOutcome::Passed
    }

    fn unauthorized(&self) -> bool {
        matches!(
            self.outcome,
            CheckOutcome::Status(status)
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub status: ConnectionStatus,
    pub checks: Vec<ProbeCheck>,
    pub server_version: Option<String>,
}

impl ProbeReport {
    pub fn from_checks(checks: Vec<ProbeCheck>, server_version: Option<String>) -> Self {
        let status = if checks
            .iter()
            .any(|check| check.auth_sensitive && check.unauthorized())
        {
            ConnectionStatus::Invalid
        } else if checks.iter().all(ProbeCheck::passed) {
            ConnectionStatus::Ok
        } else {
            ConnectionStatus::Limited
        };
        Self {
            status,
            checks,
            server_version,
        }
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection {}", self.status.as_str())?;
        if let Some(version) = &self.server_version {
            write!(f, " (server {version})")?;
        }
        let failed: Vec<String> = self
            .checks
            .iter()
            .filter(|check| !check.passed())
            .map(|check| match &check.outcome {
                CheckOutcome::Status(status) => format!("{}: HTTP {}", check.name, status.as_u16()),
                CheckOutcome::Unreachable(err) => format!("{}: {err}", check.name),
                CheckOutcome::Passed => check.name.to_string(),
            })
            .collect();
        if !failed.is_empty() {
            write!(f, "; failing: {}", failed.join(", "))?;
        }
        Ok(())
    }
}

struct Probe {
    name: &'static str,
    method: Method,
    path: &'static str,
    body: ProbeBody,
    auth_sensitive: bool,
    expect_rejection: bool,
}

fn battery() -> Vec<Probe> {
    vec![
        Probe {
            name: "server info",
            method: Method::GET,
            path: "server/about",
            body: ProbeBody::Empty,
            auth_sensitive: true,
            expect_rejection: false,
        },
        Probe {
            name: "search",
            method: Method::POST,
            path: "search/metadata",
            body: ProbeBody::Json(json!({ "page": 1, "size": 1 })),
            auth_sensitive: true,
            expect_rejection: false,
        },
        Probe {
            name: "albums",
            method: Method::GET,
            path: "albums",
            body: ProbeBody::Empty,
            auth_sensitive: false,
            expect_rejection: false,
        },
        Probe {
            name: "duplicates",
            method: Method::GET,
            path: "duplicates",
            body: ProbeBody::Empty,
            auth_sensitive: false,
            expect_rejection: false,
        },
        Probe {
            name: "upload",
            method: Method::POST,
            path: "assets",
            body: ProbeBody::EmptyMultipart,
            auth_sensitive: false,
            expect_rejection: true,
        },
    ]
}

/// Classifies how far the configured key reaches into the server API.
#[derive(Clone, Debug)]
pub struct ConnectionProbe {
    client: ImmichClient,
}

impl ConnectionProbe {
    pub fn new(client: ImmichClient) -> Self {
        Self { client }
    }

    /// `None` when cancelled before the battery finished.
    pub async fn run(&self, cancel: &CancellationToken) -> Option<ProbeReport> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            report = self.run_battery() => Some(report),
        }
    }

    async fn run_battery(&self) -> ProbeReport {
        let mut checks = Vec::new();
        for probe in battery() {
            let outcome = match self
                .client
                .probe(probe.method, probe.path, probe.body)
                .await
            {
                Ok(status) if probe.expect_rejection => {
                    if status == StatusCode::BAD_REQUEST
                        || status == StatusCode::UNPROCESSABLE_ENTITY
                    {
                        CheckOutcome::Passed
                    } else {
                        CheckOutcome::Status(status)
                    }
                }
                Ok(status) if status.is_success() => CheckOutcome::Passed,
                Ok(status) => CheckOutcome::Status(status),
                Err(err) => CheckOutcome::Unreachable(err.to_string()),
            };
            debug!(check = probe.name, ?outcome, "probe check finished");
            checks.push(ProbeCheck {
                name: probe.name,
                auth_sensitive: probe.auth_sensitive,
                outcome,
            });
        }

        let server_version = match self.client.server_version().await {
            Ok(version) => Some(version.to_string()),
            Err(err) => {
                debug!(error = %err, "server version unavailable");
                None
            }
        };
        ProbeReport::from_checks(checks, server_version)
    }
}
