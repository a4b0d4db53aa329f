//! Passkey Gate
//!
//! Wraps the platform authentication ceremony so key operations can demand
//! proof of presence. The gate only builds ceremony options and checks what
//! comes back; credential material is owned by the platform authenticator
//! behind [`PlatformAuthenticator`].
//!
//! Every failure mode (cancellation, missing authenticator, timeout, a
//! response that does not echo our challenge) collapses to `false` on the
//! boolean entry points. There is no internal retry.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

/// Challenge size in bytes
pub const CHALLENGE_LEN: usize = 32;

/// Default ceremony timeout
pub const CEREMONY_TIMEOUT: Duration = Duration::from_secs(60);

/// COSE algorithm identifiers offered at registration
pub const COSE_ALG_EDDSA: i64 = -8;
pub const COSE_ALG_ES256: i64 = -7;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasskeyError {
    #[error("no platform authenticator available")]
    Unsupported,

    #[error("ceremony cancelled by user")]
    Cancelled,

    #[error("ceremony timed out")]
    Timeout,

    #[error("no credential registered for this relying party")]
    NoCredential,

    #[error("invalid origin: {0}")]
    InvalidOrigin(String),

    #[error("authenticator response mismatch: {0}")]
    Mismatch(&'static str),

    #[error("authenticator error: {0}")]
    Authenticator(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    Required,
    Preferred,
    Discouraged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingParty {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// Opaque user handle, base64url
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialParameter {
    #[serde(rename = "type")]
    pub kind: String,
    pub alg: i64,
}

impl CredentialParameter {
    fn public_key(alg: i64) -> Self {
        Self {
            kind: "public-key".to_string(),
            alg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub resident_key: Requirement,
    pub require_resident_key: bool,
    pub user_verification: Requirement,
}

/// Options for a credential-creation (registration) ceremony
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialCreationOptions {
    /// Random challenge, base64url without padding
    pub challenge: String,
    pub rp: RelyingParty,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<CredentialParameter>,
    pub authenticator_selection: AuthenticatorSelection,
    /// Milliseconds
    pub timeout: u64,
    pub attestation: String,
}

/// Options for an assertion (authentication) ceremony
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequestOptions {
    pub challenge: String,
    pub rp_id: String,
    /// Account whose credential may answer; any account on the RP when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub user_verification: Requirement,
    pub timeout: u64,
}

/// What an authenticator returns from registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResponse {
    pub credential_id: String,
    pub rp_id: String,
    pub challenge: String,
    pub user_present: bool,
    pub user_verified: bool,
    /// Credential public key, hex
    pub public_key: String,
}

/// What an authenticator returns from an assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    pub credential_id: String,
    pub rp_id: String,
    pub challenge: String,
    pub user_present: bool,
    pub user_verified: bool,
    pub authenticator_data: String,
    pub signature: String,
}

/// Host platform authenticator.
#[async_trait]
pub trait PlatformAuthenticator: Send + Sync {
    /// Capability check
    async fn is_available(&self) -> bool;

    async fn create_credential(
        &self,
        options: &CredentialCreationOptions,
    ) -> Result<CredentialResponse, PasskeyError>;

    async fn get_assertion(
        &self,
        options: &CredentialRequestOptions,
    ) -> Result<AssertionResponse, PasskeyError>;
}

/// Fresh random challenge, base64url without padding
pub fn new_challenge() -> String {
    let mut bytes = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Relying-party id for a serving origin: its host.
pub fn rp_id_for_origin(origin: &str) -> Result<String, PasskeyError> {
    let url = url::Url::parse(origin).map_err(|e| PasskeyError::InvalidOrigin(e.to_string()))?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| PasskeyError::InvalidOrigin(format!("{} has no host", origin)))
}

/// Proof-of-presence gate in front of key operations
#[derive(Clone)]
pub struct PasskeyGate {
    authenticator: Arc<dyn PlatformAuthenticator>,
    rp: RelyingParty,
    timeout: Duration,
}

impl PasskeyGate {
    /// Gate for the given serving origin (e.g. `https://app.lendmark.io`).
    pub fn new(
        authenticator: Arc<dyn PlatformAuthenticator>,
        origin: &str,
        rp_name: &str,
    ) -> Result<Self, PasskeyError> {
        Ok(Self {
            authenticator,
            rp: RelyingParty {
                id: rp_id_for_origin(origin)?,
                name: rp_name.to_string(),
            },
            timeout: CEREMONY_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rp_id(&self) -> &str {
        &self.rp.id
    }

    pub async fn is_supported(&self) -> bool {
        self.authenticator.is_available().await
    }

    /// Build registration options for an identity label
    pub fn creation_options(&self, identity_label: &str) -> CredentialCreationOptions {
        let mut handle = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut handle);

        CredentialCreationOptions {
            challenge: new_challenge(),
            rp: self.rp.clone(),
            user: UserEntity {
                id: URL_SAFE_NO_PAD.encode(handle),
                name: identity_label.to_string(),
                display_name: identity_label.to_string(),
            },
            pub_key_cred_params: vec![
                CredentialParameter::public_key(COSE_ALG_EDDSA),
                CredentialParameter::public_key(COSE_ALG_ES256),
            ],
            authenticator_selection: AuthenticatorSelection {
                resident_key: Requirement::Required,
                require_resident_key: true,
                user_verification: Requirement::Preferred,
            },
            timeout: self.timeout.as_millis() as u64,
            attestation: "none".to_string(),
        }
    }

    /// Build assertion options scoped to `identity_label`'s credential
    pub fn request_options(&self, identity_label: &str) -> CredentialRequestOptions {
        CredentialRequestOptions {
            challenge: new_challenge(),
            rp_id: self.rp.id.clone(),
            user_name: Some(identity_label.to_string()),
            user_verification: Requirement::Required,
            timeout: self.timeout.as_millis() as u64,
        }
    }

    /// Run a registration ceremony, reporting why it failed.
    pub async fn try_register(&self, identity_label: &str) -> Result<CredentialResponse, PasskeyError> {
        if !self.is_supported().await {
            return Err(PasskeyError::Unsupported);
        }

        let options = self.creation_options(identity_label);
        let response = tokio::time::timeout(
            self.timeout,
            self.authenticator.create_credential(&options),
        )
        .await
        .map_err(|_| PasskeyError::Timeout)??;

        if response.challenge != options.challenge {
            return Err(PasskeyError::Mismatch("challenge"));
        }
        if response.rp_id != options.rp.id {
            return Err(PasskeyError::Mismatch("rp id"));
        }
        if !response.user_present {
            return Err(PasskeyError::Mismatch("user presence"));
        }
        Ok(response)
    }

    /// Run an assertion ceremony, reporting why it failed.
    pub async fn try_authenticate(&self, identity_label: &str) -> Result<AssertionResponse, PasskeyError> {
        if !self.is_supported().await {
            return Err(PasskeyError::Unsupported);
        }

        let options = self.request_options(identity_label);
        let response = tokio::time::timeout(
            self.timeout,
            self.authenticator.get_assertion(&options),
        )
        .await
        .map_err(|_| PasskeyError::Timeout)??;

        if response.challenge != options.challenge {
            return Err(PasskeyError::Mismatch("challenge"));
        }
        if response.rp_id != options.rp_id {
            return Err(PasskeyError::Mismatch("rp id"));
        }
        if !response.user_present || !response.user_verified {
            return Err(PasskeyError::Mismatch("user verification"));
        }
        Ok(response)
    }

    /// Registration ceremony. `true` only on a verified success.
    pub async fn register(&self, identity_label: &str) -> bool {
        match self.try_register(identity_label).await {
            Ok(response) => {
                debug!("Passkey registered (credential {})", response.credential_id);
                true
            }
            Err(e) => {
                warn!("Passkey registration failed: {}", e);
                false
            }
        }
    }

    /// Assertion ceremony. `true` only on a verified success.
    pub async fn authenticate(&self, identity_label: &str) -> bool {
        match self.try_authenticate(identity_label).await {
            Ok(response) => {
                debug!("Passkey assertion ok (credential {})", response.credential_id);
                true
            }
            Err(e) => {
                warn!("Passkey authentication failed: {}", e);
                false
            }
        }
    }
}
