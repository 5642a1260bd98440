//! Login handshake against the router's web UI

use super::endpoint::{JSON_ERR_REDIRECT, JSON_OK_REDIRECT, LOGIN_ERR_REDIRECT, LOGIN_OK_REDIRECT};
use super::{status, DeviceResponse, DeviceSession};
use crate::error::{Result, RouterError};
use std::fmt;
use tracing::{info, warn};

/// Web UI admin password. Never printed.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Per-session security token issued by the router. Never empty.
#[derive(Clone, PartialEq, Eq)]
pub struct SecToken(String);

impl SecToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecToken(***)")
    }
}

/// A session the router accepted the credential for
pub struct AuthenticatedSession {
    device: DeviceSession,
    token: SecToken,
}

impl AuthenticatedSession {
    pub fn device(&self) -> &DeviceSession {
        &self.device
    }

    pub fn token(&self) -> &SecToken {
        &self.token
    }

    /// Submit one setting change with the JSON landing pages as redirect targets
    pub async fn submit_setting(&self, field: &str, value: &str) -> Result<DeviceResponse> {
        submit_config(
            &self.device,
            self.token(),
            (field, value),
            JSON_OK_REDIRECT,
            JSON_ERR_REDIRECT,
        )
        .await
    }
}

async fn submit_config(
    device: &DeviceSession,
    token: &SecToken,
    field: (&str, &str),
    ok_redirect: &str,
    err_redirect: &str,
) -> Result<DeviceResponse> {
    let form = [
        ("token", token.as_str()),
        ("err_redirect", err_redirect),
        ("ok_redirect", ok_redirect),
        field,
    ];
    device
        .post_form(device.endpoint().config_url(), &form, device.timeouts().control)
        .await
}

/// Pull `session.secToken` out of the model document
pub fn extract_token(document: &serde_json::Value) -> Result<SecToken> {
    let token = document
        .pointer("/session/secToken")
        .ok_or_else(|| RouterError::TokenUnavailable("session.secToken missing".into()))?
        .as_str()
        .ok_or_else(|| RouterError::TokenUnavailable("session.secToken is not a string".into()))?;

    if token.is_empty() {
        return Err(RouterError::TokenUnavailable(
            "session.secToken is empty".into(),
        ));
    }
    Ok(SecToken(token.to_string()))
}

/// Log in, consuming the unauthenticated session.
///
/// The router answers the login form by redirecting to either `ok_redirect`
/// or `err_redirect`. The final URL is compared against the login success
/// page; the status code is ignored.
pub async fn login(device: DeviceSession, credential: &Credential) -> Result<AuthenticatedSession> {
    info!("Starting session with {}", device.endpoint().base());
    if let Err(e) = device.probe().await {
        // Cookies may still have been set; the token fetch decides
        warn!("Session priming failed, continuing: {}", e);
    }

    info!("Obtaining token");
    let document = match status::fetch_document(&device, device.timeouts().control).await {
        Ok(doc) => doc,
        Err(RouterError::MalformedResponse(msg)) => {
            return Err(RouterError::TokenUnavailable(msg));
        }
        Err(RouterError::UnexpectedStatus { status, url }) => {
            return Err(RouterError::TokenUnavailable(format!(
                "model document returned {} from {}",
                status, url
            )));
        }
        Err(e) => return Err(e),
    };
    let token = extract_token(&document)?;
    info!("Token obtained");

    info!("Attempting login");
    let resp = submit_config(
        &device,
        &token,
        ("session.password", credential.expose()),
        LOGIN_OK_REDIRECT,
        LOGIN_ERR_REDIRECT,
    )
    .await?;

    if &resp.final_url != device.endpoint().login_success_url() {
        return Err(RouterError::AuthRejected {
            landed: resp.final_url,
        });
    }

    info!("Login ok");
    Ok(AuthenticatedSession { device, token })
}
