//! Well-known URLs of the router's web UI

use anyhow::Context;
use reqwest::Url;

/// Session priming page; hitting it hands out the session cookie
pub const SESSION_PATH: &str = "/sess_cd_tmp";
/// Model document: full device status plus the current security token
pub const MODEL_PATH: &str = "/api/model.json";
/// Form endpoint for login and every setting change
pub const CONFIG_PATH: &str = "/Forms/config";

/// Redirect targets handed to the config form
pub const LOGIN_OK_REDIRECT: &str = "/index.html";
pub const LOGIN_ERR_REDIRECT: &str = "/index.html?loginfailed";
pub const JSON_OK_REDIRECT: &str = "/success.json";
pub const JSON_ERR_REDIRECT: &str = "/error.json";

/// Absolute URLs for one router, all derived from its base address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    base: Url,
    session: Url,
    model: Url,
    config: Url,
    login_success: Url,
    json_success: Url,
}

impl DeviceEndpoint {
    /// Accepts a bare host ("192.168.1.1") or a base URL ("http://192.168.1.1")
    pub fn parse(address: &str) -> anyhow::Result<Self> {
        let address = address.trim();
        let with_scheme = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        let base = Url::parse(&with_scheme)
            .with_context(|| format!("invalid router address {:?}", address))?;
        if base.cannot_be_a_base() || base.host().is_none() {
            anyhow::bail!("router address {:?} has no host", address);
        }

        let join = |path: &str| {
            base.join(path)
                .with_context(|| format!("cannot derive {} from {}", path, base))
        };

        Ok(Self {
            session: join(SESSION_PATH)?,
            model: join(MODEL_PATH)?,
            config: join(CONFIG_PATH)?,
            login_success: join(LOGIN_OK_REDIRECT)?,
            json_success: join(JSON_OK_REDIRECT)?,
            base,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn session_url(&self) -> &Url {
        &self.session
    }

    pub fn model_url(&self) -> &Url {
        &self.model
    }

    pub fn config_url(&self) -> &Url {
        &self.config
    }

    /// Where a successful login redirects to
    pub fn login_success_url(&self) -> &Url {
        &self.login_success
    }

    /// Where a successful setting change redirects to
    pub fn json_success_url(&self) -> &Url {
        &self.json_success
    }
}
