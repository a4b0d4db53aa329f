//! Local platform authenticator
//!
//! A software authenticator for hosts without a hardware one (terminals,
//! CI, headless servers). Resident credentials are ed25519 keys stored in a
//! JSON file readable only by the owner. Every ceremony first asks a
//! [`PresencePrompt`] to confirm the user is present.
//!
//! Assertions sign `SHA-256(rp_id) || flags || SHA-256(challenge)`.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    io::{self, BufRead, IsTerminal, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{
    passkey::{
        AssertionResponse, CredentialCreationOptions, CredentialRequestOptions,
        CredentialResponse, PasskeyError, PlatformAuthenticator, COSE_ALG_EDDSA,
    },
    storage::write_private,
};

/// Authenticator data flag: user present
pub const FLAG_USER_PRESENT: u8 = 0x01;

/// Authenticator data flag: user verified
pub const FLAG_USER_VERIFIED: u8 = 0x04;

/// Which ceremony a presence check is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceremony {
    Registration,
    Authentication,
}

/// Presence confirmation request
#[derive(Debug, Clone)]
pub struct PresenceRequest {
    pub ceremony: Ceremony,
    pub rp_id: String,
    pub user_name: Option<String>,
}

/// Source of user presence (and optionally verification).
#[async_trait]
pub trait PresencePrompt: Send + Sync {
    /// Whether the prompt can reach a user at all
    fn is_available(&self) -> bool;

    /// Whether a confirmation also verifies the user
    fn verifies_user(&self) -> bool;

    async fn confirm(&self, request: &PresenceRequest) -> bool;
}

/// Asks for a y/N confirmation on the controlling terminal.
///
/// The confirmation is typed by the logged-in OS user, so it counts as user
/// verification.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePresence;

#[async_trait]
impl PresencePrompt for ConsolePresence {
    fn is_available(&self) -> bool {
        io::stdin().is_terminal()
    }

    fn verifies_user(&self) -> bool {
        true
    }

    async fn confirm(&self, request: &PresenceRequest) -> bool {
        let question = match (request.ceremony, &request.user_name) {
            (Ceremony::Registration, Some(name)) => {
                format!("Create a passkey for {} on {}?", name, request.rp_id)
            }
            (Ceremony::Registration, None) => format!("Create a passkey on {}?", request.rp_id),
            (Ceremony::Authentication, _) => format!("Use your passkey for {}?", request.rp_id),
        };

        let answer = tokio::task::spawn_blocking(move || {
            print!("{} [y/N] ", question);
            io::stdout().flush().ok();
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).ok();
            line
        })
        .await
        .unwrap_or_default();

        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Presence prompt with a fixed answer, for headless use.
#[derive(Debug, Clone, Copy)]
pub struct FixedPresence {
    pub approve: bool,
    pub verified: bool,
}

#[async_trait]
impl PresencePrompt for FixedPresence {
    fn is_available(&self) -> bool {
        true
    }

    fn verifies_user(&self) -> bool {
        self.verified
    }

    async fn confirm(&self, _request: &PresenceRequest) -> bool {
        self.approve
    }
}

/// A resident credential
#[derive(Clone, Serialize, Deserialize)]
struct StoredCredential {
    credential_id: String,
    rp_id: String,
    user_handle: String,
    user_name: String,
    /// ed25519 secret key, hex
    secret_key: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    sign_count: u32,
}

impl StoredCredential {
    fn signing_key(&self) -> Result<SigningKey, PasskeyError> {
        let bytes = Zeroizing::new(
            hex::decode(&self.secret_key)
                .map_err(|_| PasskeyError::Authenticator("corrupt credential key".into()))?,
        );
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| PasskeyError::Authenticator("corrupt credential key".into()))?;
        Ok(SigningKey::from_bytes(&secret))
    }
}

#[derive(Default, Serialize, Deserialize)]
struct CredentialFile {
    credentials: Vec<StoredCredential>,
}

/// File-backed software authenticator
pub struct LocalAuthenticator {
    path: PathBuf,
    prompt: Arc<dyn PresencePrompt>,
    credentials: Mutex<CredentialFile>,
}

impl LocalAuthenticator {
    /// Open (or start) the credential file at `path`.
    pub fn open(path: &Path, prompt: Arc<dyn PresencePrompt>) -> Result<Self, PasskeyError> {
        let credentials = if path.exists() {
            let json = std::fs::read_to_string(path)
                .map_err(|e| PasskeyError::Authenticator(e.to_string()))?;
            serde_json::from_str(&json).map_err(|e| PasskeyError::Authenticator(e.to_string()))?
        } else {
            CredentialFile::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            prompt,
            credentials: Mutex::new(credentials),
        })
    }

    /// Number of resident credentials held for `rp_id`
    pub async fn credential_count(&self, rp_id: &str) -> usize {
        self.credentials
            .lock()
            .await
            .credentials
            .iter()
            .filter(|c| c.rp_id == rp_id)
            .count()
    }

    fn persist(&self, file: &CredentialFile) -> Result<(), PasskeyError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PasskeyError::Authenticator(e.to_string()))?;
        }
        let json = Zeroizing::new(
            serde_json::to_string_pretty(file).map_err(|e| PasskeyError::Authenticator(e.to_string()))?,
        );
        write_private(&self.path, json.as_bytes()).map_err(|e| PasskeyError::Authenticator(e.to_string()))
    }

    fn flags(&self) -> u8 {
        if self.prompt.verifies_user() {
            FLAG_USER_PRESENT | FLAG_USER_VERIFIED
        } else {
            FLAG_USER_PRESENT
        }
    }
}

/// Bytes covered by an assertion signature
pub fn assertion_payload(rp_id: &str, flags: u8, challenge: &str) -> Vec<u8> {
    let mut data = Sha256::digest(rp_id.as_bytes()).to_vec();
    data.push(flags);
    data.extend_from_slice(&Sha256::digest(challenge.as_bytes()));
    data
}

#[async_trait]
impl PlatformAuthenticator for LocalAuthenticator {
    async fn is_available(&self) -> bool {
        self.prompt.is_available()
    }

    async fn create_credential(
        &self,
        options: &CredentialCreationOptions,
    ) -> Result<CredentialResponse, PasskeyError> {
        if !options
            .pub_key_cred_params
            .iter()
            .any(|p| p.alg == COSE_ALG_EDDSA)
        {
            return Err(PasskeyError::Authenticator("no supported algorithm offered".into()));
        }

        let request = PresenceRequest {
            ceremony: Ceremony::Registration,
            rp_id: options.rp.id.clone(),
            user_name: Some(options.user.name.clone()),
        };
        if !self.prompt.confirm(&request).await {
            return Err(PasskeyError::Cancelled);
        }

        let mut secret = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(secret.as_mut_slice());
        let signing_key = SigningKey::from_bytes(&secret);
        let mut id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut id);

        let credential = StoredCredential {
            credential_id: URL_SAFE_NO_PAD.encode(id),
            rp_id: options.rp.id.clone(),
            user_handle: options.user.id.clone(),
            user_name: options.user.name.clone(),
            secret_key: hex::encode(secret.as_slice()),
            created_at: Utc::now(),
            sign_count: 0,
        };

        let mut file = self.credentials.lock().await;
        // one resident credential per account on a relying party
        file.credentials
            .retain(|c| !(c.rp_id == credential.rp_id && c.user_name == credential.user_name));
        file.credentials.push(credential.clone());
        self.persist(&file)?;

        info!("Registered passkey {} for {}", credential.credential_id, credential.rp_id);
        Ok(CredentialResponse {
            credential_id: credential.credential_id,
            rp_id: credential.rp_id,
            challenge: options.challenge.clone(),
            user_present: true,
            user_verified: self.prompt.verifies_user(),
            public_key: hex::encode(signing_key.verifying_key().as_bytes()),
        })
    }

    async fn get_assertion(
        &self,
        options: &CredentialRequestOptions,
    ) -> Result<AssertionResponse, PasskeyError> {
        let mut file = self.credentials.lock().await;
        let index = file
            .credentials
            .iter()
            .rposition(|c| {
                c.rp_id == options.rp_id
                    && options.user_name.as_ref().is_none_or(|name| *name == c.user_name)
            })
            .ok_or(PasskeyError::NoCredential)?;

        let request = PresenceRequest {
            ceremony: Ceremony::Authentication,
            rp_id: options.rp_id.clone(),
            user_name: Some(file.credentials[index].user_name.clone()),
        };
        if !self.prompt.confirm(&request).await {
            return Err(PasskeyError::Cancelled);
        }

        let flags = self.flags();
        let credential = &mut file.credentials[index];
        let signing_key = credential.signing_key()?;
        let authenticator_data = assertion_payload(&options.rp_id, flags, &options.challenge);
        let signature = signing_key.sign(&authenticator_data);
        credential.sign_count = credential.sign_count.saturating_add(1);

        let response = AssertionResponse {
            credential_id: credential.credential_id.clone(),
            rp_id: credential.rp_id.clone(),
            challenge: options.challenge.clone(),
            user_present: true,
            user_verified: flags & FLAG_USER_VERIFIED != 0,
            authenticator_data: hex::encode(&authenticator_data),
            signature: hex::encode(signature.to_bytes()),
        };

        if let Err(e) = self.persist(&file) {
            warn!("Failed to persist signature counter: {}", e);
        }
        debug!("Passkey assertion by {}", response.credential_id);
        Ok(response)
    }
}
