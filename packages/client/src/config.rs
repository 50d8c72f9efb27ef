//! Client configuration: network locations and identity.
//!
//! The embedding host sets both through [`ChatConfig`] at any time. Every
//! connection attempt and HTTP call reads the values current at that moment.

use std::sync::Arc;

use reqwest::Url;
use tokio::sync::RwLock;

use crate::{
    domain::{ChatId, UserId},
    error::ConfigError,
};

const API_SCHEMES: [&str; 2] = ["http", "https"];
const REALTIME_SCHEMES: [&str; 2] = ["ws", "wss"];

/// Base URLs of the chat backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    api_base: String,
    realtime_base: String,
}

impl Endpoints {
    /// Validate and normalize both base URLs (trailing slashes removed).
    pub fn new(api_base: &str, realtime_base: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base: normalize_base(api_base, "API", &API_SCHEMES)?,
            realtime_base: normalize_base(realtime_base, "realtime", &REALTIME_SCHEMES)?,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn realtime_base(&self) -> &str {
        &self.realtime_base
    }

    /// `{api_base}{path}`; `path` starts with `/` and may carry a query.
    pub fn api_url(&self, path: &str) -> Result<Url, ConfigError> {
        let raw = format!("{}{}", self.api_base, path);
        Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
            kind: "API",
            url: raw,
            reason: e.to_string(),
        })
    }

    /// `{realtime_base}/chat?chatId=..&userId=..&token=..`
    pub fn realtime_url(
        &self,
        chat_id: &ChatId,
        credentials: &Credentials,
    ) -> Result<Url, ConfigError> {
        let raw = format!("{}/chat", self.realtime_base);
        let mut url = Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
            kind: "realtime",
            url: raw,
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("chatId", chat_id.as_str())
            .append_pair("userId", credentials.user_id.as_str())
            .append_pair("token", &credentials.token);
        Ok(url)
    }
}

fn normalize_base(
    raw: &str,
    kind: &'static str,
    schemes: &[&str],
) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| ConfigError::InvalidUrl {
        kind,
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::UnsupportedScheme {
            kind,
            scheme: url.scheme().to_string(),
            expected: schemes.join(", "),
        });
    }

    Ok(trimmed.to_string())
}

/// Authenticated identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: UserId,
    /// Bearer token; may be empty when the backend does not check it
    pub token: String,
}

impl Credentials {
    pub fn new(user_id: &str, token: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            user_id: UserId::new(user_id)?,
            token: token.to_string(),
        })
    }
}

/// Snapshot of the configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub endpoints: Option<Endpoints>,
    pub credentials: Option<Credentials>,
}

impl Settings {
    pub fn endpoints(&self) -> Result<&Endpoints, ConfigError> {
        self.endpoints
            .as_ref()
            .ok_or(ConfigError::EndpointsNotConfigured)
    }

    pub fn credentials(&self) -> Result<&Credentials, ConfigError> {
        self.credentials
            .as_ref()
            .ok_or(ConfigError::CredentialsNotConfigured)
    }

    /// Realtime endpoint for a room with the current identity
    pub fn realtime_url(&self, chat_id: &ChatId) -> Result<Url, ConfigError> {
        self.endpoints()?
            .realtime_url(chat_id, self.credentials()?)
    }
}

/// Shared, mutable configuration handle
///
/// Clones share the same settings.
#[derive(Debug, Clone, Default)]
pub struct ChatConfig {
    settings: Arc<RwLock<Settings>>,
}

impl ChatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
        }
    }

    /// Set the HTTP API base and the realtime base.
    ///
    /// On error the previous endpoints stay in place.
    pub async fn configure_urls(&self, api_base: &str, realtime_base: &str) -> Result<(), ConfigError> {
        let endpoints = Endpoints::new(api_base, realtime_base)?;
        tracing::info!(
            "Configured endpoints: api={}, realtime={}",
            endpoints.api_base(),
            endpoints.realtime_base()
        );
        self.settings.write().await.endpoints = Some(endpoints);
        Ok(())
    }

    /// Set the identity used for connections and API calls.
    pub async fn configure_auth(&self, user_id: &str, token: &str) -> Result<(), ConfigError> {
        let credentials = Credentials::new(user_id, token)?;
        tracing::info!("Configured identity for user '{}'", credentials.user_id);
        self.settings.write().await.credentials = Some(credentials);
        Ok(())
    }

    pub async fn snapshot(&self) -> Settings {
        self.settings.read().await.clone()
    }
}
