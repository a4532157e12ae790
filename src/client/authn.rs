//! AuthN login client.
//!
//! Clusters with authentication enabled only accept requests carrying a
//! token issued by the AuthN service. The operator logs in as the admin user
//! and hands the token to the cluster API client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::cluster_api::{ClusterApiError, REQUEST_TIMEOUT, USER_AGENT};

pub const AUTHN_HOST_VAR: &str = "AIS_AUTHN_SERVICE_HOST";
pub const AUTHN_PORT_VAR: &str = "AIS_AUTHN_SERVICE_PORT";
pub const AUTHN_USER_VAR: &str = "AIS_AUTHN_ADMIN_USERNAME";
pub const AUTHN_PASS_VAR: &str = "AIS_AUTHN_ADMIN_PASSWORD";
pub const AUTHN_HTTPS_VAR: &str = "AIS_AUTHN_USE_HTTPS";

const DEFAULT_HOST: &str = "ais-authn.ais";
const DEFAULT_PORT: &str = "52001";
const DEFAULT_ADMIN: &str = "admin";

/// Lifetime requested for operator tokens.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// A token is refreshed once it is this close to expiring.
pub const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(5 * 60);

/// AuthN service location and admin credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthNConfig {
    pub host: String,
    pub port: String,
    pub use_https: bool,
    pub admin_user: String,
    pub admin_pass: String,
}

impl AuthNConfig {
    /// Read the config from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the config through an arbitrary lookup, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            host: get(AUTHN_HOST_VAR, DEFAULT_HOST),
            port: get(AUTHN_PORT_VAR, DEFAULT_PORT),
            use_https: lookup(AUTHN_HTTPS_VAR)
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(false),
            admin_user: get(AUTHN_USER_VAR, DEFAULT_ADMIN),
            admin_pass: get(AUTHN_PASS_VAR, DEFAULT_ADMIN),
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// A token and the unix time (seconds) it expires at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenInfo {
    pub token: String,
    pub expires_at: i64,
}

impl TokenInfo {
    /// True once the token is within [`TOKEN_EXPIRY_BUFFER`] of expiring.
    pub fn is_expiring(&self, now: i64) -> bool {
        now + TOKEN_EXPIRY_BUFFER.as_secs() as i64 >= self.expires_at
    }
}

#[derive(Serialize)]
struct LoginMsg<'a> {
    password: &'a str,
    /// Nanoseconds.
    expires_in: u128,
}

#[derive(Deserialize)]
struct LoginResp {
    token: String,
}

/// Client for the AuthN service.
#[derive(Clone, Debug)]
pub struct AuthNClient {
    http: reqwest::Client,
    config: AuthNConfig,
}

impl AuthNClient {
    pub fn new(config: AuthNConfig) -> Result<Self, ClusterApiError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, config })
    }

    /// Log in as the configured admin and return a fresh token.
    pub async fn login(&self) -> Result<TokenInfo, ClusterApiError> {
        let url = format!("{}/v1/users/{}", self.config.url(), self.config.admin_user);
        debug!(url = %url, "logging in to AuthN");
        let resp = self
            .http
            .post(&url)
            .json(&LoginMsg {
                password: &self.config.admin_pass,
                expires_in: TOKEN_LIFETIME.as_nanos(),
            })
            .send()
            .await
            .map_err(|e| ClusterApiError::AuthN(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClusterApiError::AuthN(format!(
                "login as {} failed with status {}",
                self.config.admin_user, status
            )));
        }
        let body: LoginResp = resp
            .json()
            .await
            .map_err(|e| ClusterApiError::AuthN(e.to_string()))?;
        info!(user = %self.config.admin_user, "obtained AuthN token");
        Ok(TokenInfo {
            token: body.token,
            expires_at: jiff::Timestamp::now().as_second() + TOKEN_LIFETIME.as_secs() as i64,
        })
    }
}
