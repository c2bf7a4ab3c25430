//! Channel authorization for `private-` and `presence-` topics.
//!
//! A signature is `<app_key>:<hex HMAC-SHA256>` over
//! `client_id:topic`, or `client_id:topic:channel_data` for presence topics,
//! keyed with the application secret.
//!
//! Signatures are issued by `POST /api/auth` to the application backend,
//! which presents the secret as `Authorization: Bearer <app_secret>`.

use crate::config::AuthConfig;
use fanout_core::Topic;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Authorization failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No signature supplied for a protected topic.
    #[error("authorization required for {0}")]
    Missing(String),
    /// Signature did not match.
    #[error("invalid authorization for {0}")]
    InvalidSignature(String),
    /// Signature was made for another application.
    #[error("unknown app key")]
    UnknownKey,
    /// Presence topics need `channel_data` describing the user.
    #[error("invalid channel data: {0}")]
    InvalidChannelData(String),
    /// The signing key was rejected.
    #[error("invalid signing key")]
    InvalidKey,
    /// The application credential did not match.
    #[error("invalid application credential")]
    InvalidCredential,
}

/// Signs and verifies topic authorizations.
#[derive(Debug, Clone)]
pub struct ChannelAuthorizer {
    app_key: String,
    app_secret: String,
}

impl ChannelAuthorizer {
    /// Create an authorizer.
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        }
    }

    /// Build from config. `None` when authorization is disabled.
    pub fn from_config(config: &AuthConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(&config.app_key, &config.app_secret))
    }

    /// Application key.
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Produce `<app_key>:<signature>` for a client and topic.
    pub fn sign(
        &self,
        client_id: &str,
        topic: &Topic,
        channel_data: Option<&str>,
    ) -> Result<String, AuthError> {
        let mac = self.mac(client_id, topic, channel_data)?;
        Ok(format!(
            "{}:{}",
            self.app_key,
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    /// Check an authorization string produced by [`sign`](Self::sign).
    pub fn verify(
        &self,
        client_id: &str,
        topic: &Topic,
        channel_data: Option<&str>,
        auth: &str,
    ) -> Result<(), AuthError> {
        let invalid = || AuthError::InvalidSignature(topic.to_string());

        let (key, signature) = auth.split_once(':').ok_or_else(invalid)?;
        if key != self.app_key {
            return Err(AuthError::UnknownKey);
        }
        let signature = hex::decode(signature).map_err(|_| invalid())?;

        self.mac(client_id, topic, channel_data)?
            .verify_slice(&signature)
            .map_err(|_| invalid())
    }

    /// Check an application credential in constant time.
    pub fn verify_app_credential(&self, credential: &str) -> Result<(), AuthError> {
        let expected = self.keyed(self.app_secret.as_bytes())?.finalize().into_bytes();
        self.keyed(credential.as_bytes())?
            .verify_slice(&expected)
            .map_err(|_| AuthError::InvalidCredential)
    }

    fn keyed(&self, message: &[u8]) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(self.app_secret.as_bytes())
            .map_err(|_| AuthError::InvalidKey)?;
        mac.update(message);
        Ok(mac)
    }

    fn mac(
        &self,
        client_id: &str,
        topic: &Topic,
        channel_data: Option<&str>,
    ) -> Result<HmacSha256, AuthError> {
        self.keyed(string_to_sign(client_id, topic, channel_data).as_bytes())
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .trim()
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn string_to_sign(client_id: &str, topic: &Topic, channel_data: Option<&str>) -> String {
    match channel_data {
        Some(data) => format!("{}:{}:{}", client_id, topic, data),
        None => format!("{}:{}", client_id, topic),
    }
}
