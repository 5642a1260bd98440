//! Connectivity status from the router's model document

use super::auth::AuthenticatedSession;
use super::DeviceSession;
use crate::error::{Result, RouterError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// WAN link state as reported by `wwan.connection`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Connected,
    Disconnected,
    /// Transitional or unrecognized states ("Connecting", "Disconnecting", ...)
    Unknown,
}

impl Connectivity {
    fn from_wwan(value: &str) -> Self {
        match value {
            "Connected" => Connectivity::Connected,
            "Disconnected" => Connectivity::Disconnected,
            _ => Connectivity::Unknown,
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Connected => write!(f, "connected"),
            Connectivity::Disconnected => write!(f, "disconnected"),
            Connectivity::Unknown => write!(f, "unknown"),
        }
    }
}

/// One poll of the router: the full document and what it says about the link
#[derive(Debug, Clone)]
pub struct ConnectivitySnapshot {
    document: serde_json::Value,
    connectivity: Connectivity,
    /// Raw `wwan.connection` value
    connection: String,
    polled_at: DateTime<Utc>,
}

impl ConnectivitySnapshot {
    pub fn from_document(document: serde_json::Value) -> Result<Self> {
        let connection = document
            .pointer("/wwan/connection")
            .ok_or_else(|| RouterError::MalformedResponse("wwan.connection missing".into()))?
            .as_str()
            .ok_or_else(|| {
                RouterError::MalformedResponse("wwan.connection is not a string".into())
            })?
            .to_string();

        Ok(Self {
            connectivity: Connectivity::from_wwan(&connection),
            connection,
            document,
            polled_at: Utc::now(),
        })
    }

    pub fn document(&self) -> &serde_json::Value {
        &self.document
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn polled_at(&self) -> DateTime<Utc> {
        self.polled_at
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity == Connectivity::Connected
    }
}

/// GET the model document and parse it as JSON.
///
/// Transport failures stay `Unreachable`; a body that is not JSON is
/// `MalformedResponse`.
pub async fn fetch_document(device: &DeviceSession, timeout: Duration) -> Result<serde_json::Value> {
    let resp = device.get(device.endpoint().model_url(), timeout).await?;
    serde_json::from_str(&resp.body)
        .map_err(|e| RouterError::MalformedResponse(format!("model document is not JSON: {}", e)))
}

/// Poll the router's connectivity
pub async fn poll(session: &AuthenticatedSession) -> Result<ConnectivitySnapshot> {
    let device = session.device();
    let document = fetch_document(device, device.timeouts().status).await?;
    let snapshot = ConnectivitySnapshot::from_document(document)?;
    debug!(
        "wwan.connection = {:?} ({})",
        snapshot.connection(),
        snapshot.connectivity()
    );
    Ok(snapshot)
}
