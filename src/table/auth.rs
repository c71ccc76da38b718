//! Bearer-token credential providers
//!
//! The export core only needs a token for the storage audience. Two
//! providers are shipped: a static token (from CLI or environment) and one
//! that shells out to the Azure CLI and caches the result until shortly
//! before it expires.

use crate::error::AuthError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::process::Command;
use tracing::debug;

/// Resource audience for table storage tokens
pub const STORAGE_RESOURCE: &str = "https://storage.azure.com";

/// Tokens within this window of expiry are refreshed
const REFRESH_MARGIN_SECS: i64 = 300;

/// An access token and its expiry
#[derive(Clone)]
pub struct AccessToken {
    pub secret: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_on: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expires_on,
        }
    }

    /// Reject empty or already expired tokens
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), AuthError> {
        if self.secret.trim().is_empty() {
            return Err(AuthError::EmptyToken);
        }
        match self.expires_on {
            Some(expires_on) if expires_on <= now => Err(AuthError::Expired {
                expires_on: expires_on.to_rfc3339(),
            }),
            _ => Ok(()),
        }
    }

    fn expires_within(&self, now: DateTime<Utc>, margin: ChronoDuration) -> bool {
        self.expires_on.is_some_and(|t| t - margin <= now)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Source of bearer tokens
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Result<AccessToken, AuthError>;
}

/// Fixed token supplied up front
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(secret, None),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> Result<AccessToken, AuthError> {
        Ok(self.token.clone())
    }
}

/// `az account get-access-token` JSON output
#[derive(Deserialize)]
struct AzCliToken {
    #[serde(rename = "accessToken")]
    access_token: String,

    /// Unix seconds (newer CLI versions)
    expires_on: Option<i64>,
}

/// Token provider backed by the Azure CLI login session
pub struct AzureCliTokenProvider {
    tenant_id: Option<String>,
    cached: Mutex<Option<AccessToken>>,
}

impl AzureCliTokenProvider {
    pub fn new(tenant_id: Option<String>) -> Self {
        Self {
            tenant_id,
            cached: Mutex::new(None),
        }
    }

    fn fetch(&self) -> Result<AccessToken, AuthError> {
        let mut cmd = Command::new("az");
        cmd.args([
            "account",
            "get-access-token",
            "--resource",
            STORAGE_RESOURCE,
            "--output",
            "json",
        ]);
        if let Some(tenant) = &self.tenant_id {
            cmd.args(["--tenant", tenant]);
        }

        let output = cmd
            .output()
            .map_err(|e| AuthError::Unavailable(format!("failed to run az: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AuthError::Unavailable(format!(
                "az exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_az_output(&output.stdout)
    }
}

impl TokenProvider for AzureCliTokenProvider {
    fn token(&self) -> Result<AccessToken, AuthError> {
        let mut cached = self.cached.lock();
        let now = Utc::now();

        if let Some(token) = cached.as_ref() {
            if !token.expires_within(now, ChronoDuration::seconds(REFRESH_MARGIN_SECS)) {
                return Ok(token.clone());
            }
        }

        debug!(tenant = ?self.tenant_id, "Requesting access token from Azure CLI");
        let token = self.fetch()?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

fn parse_az_output(stdout: &[u8]) -> Result<AccessToken, AuthError> {
    let parsed: AzCliToken =
        serde_json::from_slice(stdout).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

    let expires_on = parsed
        .expires_on
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

    Ok(AccessToken::new(parsed.access_token, expires_on))
}
