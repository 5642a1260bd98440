//! Forced WAN reconnect: autoconnect off, then back on

use super::auth::AuthenticatedSession;
use crate::error::{Result, RouterError};
use std::fmt;
use tracing::info;

/// Form field holding the autoconnect setting
const AUTOCONNECT_FIELD: &str = "wwan.autoconnect";

/// Router autoconnect setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoconnectMode {
    Never,
    HomeNetwork,
}

impl AutoconnectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoconnectMode::Never => "Never",
            AutoconnectMode::HomeNetwork => "HomeNetwork",
        }
    }
}

impl fmt::Display for AutoconnectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set the autoconnect mode. Success means landing on the JSON success page.
pub async fn set_autoconnect(session: &AuthenticatedSession, mode: AutoconnectMode) -> Result<()> {
    info!("Setting autoconnect to {}", mode);
    let resp = session
        .submit_setting(AUTOCONNECT_FIELD, mode.as_str())
        .await?;

    if &resp.final_url == session.device().endpoint().json_success_url() {
        return Ok(());
    }

    let landed = resp.final_url;
    Err(match mode {
        AutoconnectMode::Never => RouterError::DisconnectFailed { landed },
        AutoconnectMode::HomeNetwork => RouterError::ReconnectFailed { landed },
    })
}

/// Drop and re-establish the WAN link.
///
/// Returns once the router has accepted both settings; it does not wait for
/// the link to come back. Callers should let the radio settle and re-poll.
pub async fn reconnect(session: &AuthenticatedSession) -> Result<()> {
    set_autoconnect(session, AutoconnectMode::Never).await?;
    set_autoconnect(session, AutoconnectMode::HomeNetwork).await?;
    info!("Router accepted reconnect");
    Ok(())
}
