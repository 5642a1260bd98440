//! HTTP client for the router's web management UI
//!
//! The router (Netgear MR1100-class hotspot) has no real API. Everything
//! goes through the pages its web UI uses:
//! 1. GET /sess_cd_tmp hands out a session cookie
//! 2. GET /api/model.json returns the full device state, including a
//!    per-session security token
//! 3. POST /Forms/config takes a form with the token, the setting to change
//!    and two redirect targets; the target the device redirects to is the
//!    only success/failure signal it gives
//!
//! A [`DeviceSession`] owns one cookie jar. Logging in consumes it and yields
//! an [`auth::AuthenticatedSession`] carrying the token.

pub mod auth;
pub mod endpoint;
pub mod reconnect;
pub mod status;

use crate::error::{Result, RouterError};
use reqwest::{Client, Method, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

pub use endpoint::DeviceEndpoint;

/// Per-call timeouts
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Login, form submissions and the reachability probe
    pub control: Duration,
    /// The model document, which is large
    pub status: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            control: Duration::from_secs(3),
            status: Duration::from_secs(10),
        }
    }
}

/// What came back from the router after following redirects
#[derive(Debug, Clone)]
pub struct DeviceResponse {
    pub status: StatusCode,
    pub final_url: Url,
    pub body: String,
}

impl DeviceResponse {
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(RouterError::UnexpectedStatus {
                status: self.status.as_u16(),
                url: self.final_url,
            })
        }
    }
}

/// One unauthenticated session with the router (one cookie jar)
pub struct DeviceSession {
    http: Client,
    endpoint: DeviceEndpoint,
    timeouts: Timeouts,
}

impl DeviceSession {
    pub fn new(endpoint: DeviceEndpoint, timeouts: Timeouts) -> Result<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| RouterError::Unreachable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            timeouts,
        })
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Raw exchange. Redirects are followed; the status is not checked.
    pub async fn request(
        &self,
        method: Method,
        url: &Url,
        form: Option<&[(&str, &str)]>,
        timeout: Duration,
    ) -> Result<DeviceResponse> {
        debug!("{} {} (timeout {:?})", method, url, timeout);

        let mut req = self.http.request(method, url.clone()).timeout(timeout);
        if let Some(fields) = form {
            req = req.form(fields);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let final_url = resp.url().clone();
        let body = resp.text().await?;

        debug!("{} from {} ({} bytes)", status, final_url, body.len());
        Ok(DeviceResponse {
            status,
            final_url,
            body,
        })
    }

    /// GET that fails with `UnexpectedStatus` on anything but 2xx
    pub async fn get(&self, url: &Url, timeout: Duration) -> Result<DeviceResponse> {
        self.request(Method::GET, url, None, timeout)
            .await?
            .error_for_status()
    }

    /// Form POST. The outcome is judged by the caller from `final_url`.
    pub async fn post_form(
        &self,
        url: &Url,
        fields: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<DeviceResponse> {
        self.request(Method::POST, url, Some(fields), timeout).await
    }

    /// Hit the session priming page. Also stores the session cookie.
    pub async fn probe(&self) -> Result<()> {
        self.get(self.endpoint.session_url(), self.timeouts.control)
            .await
            .map(|_| ())
    }
}
