//! Seed Storage
//!
//! Secret-store abstraction for wallet seeds plus the encrypted envelope used
//! both at rest and for passphrase-protected remote backups:
//! - Argon2id for key derivation
//! - ChaCha20-Poly1305 for authenticated encryption
//!
//! [`FileSeedStore`] keeps one envelope per user under a data directory,
//! sealed with a random per-device secret. [`MemorySeedStore`] backs tests
//! and embedders that bring their own persistence.

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHasher,
};
use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::secmem::LockedSecret;

/// Current envelope format version
const ENVELOPE_VERSION: u32 = 1;

/// Argon2 parameters (tuned for security vs. usability)
const ARGON2_MEMORY_KB: u32 = 65536; // 64 MB
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 4;

/// File holding the per-device sealing secret
const DEVICE_KEY_FILE: &str = "device.key";

/// Extension of per-user seed envelopes
const SEED_EXTENSION: &str = "seed";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed envelope: {0}")]
    Envelope(String),

    #[error("unsupported envelope version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("decryption failed - wrong key or tampered data")]
    Decrypt,

    #[error("crypto failure: {0}")]
    Crypto(&'static str),
}

/// Encrypted secret envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedSecret {
    /// Format version
    version: u32,

    /// Argon2 salt (base64, PHC form)
    salt: String,

    /// ChaCha20-Poly1305 nonce (12 bytes, hex encoded)
    nonce: String,

    /// Ciphertext (hex encoded)
    ciphertext: String,
}

impl SealedSecret {
    /// Seal a secret under a passphrase
    pub fn seal(secret: &str, passphrase: &str) -> Result<Self, StorageError> {
        let salt = SaltString::generate(&mut OsRng);
        let key = derive_key(passphrase, salt.as_str())?;

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = ChaCha20Poly1305::new_from_slice(key.as_slice())
            .map_err(|_| StorageError::Crypto("cipher init"))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), secret.as_bytes())
            .map_err(|_| StorageError::Crypto("encryption"))?;

        Ok(Self {
            version: ENVELOPE_VERSION,
            salt: salt.to_string(),
            nonce: hex::encode(nonce_bytes),
            ciphertext: hex::encode(ciphertext),
        })
    }

    /// Open the envelope and return the secret
    pub fn open(&self, passphrase: &str) -> Result<LockedSecret, StorageError> {
        if self.version != ENVELOPE_VERSION {
            return Err(StorageError::Version {
                found: self.version,
                expected: ENVELOPE_VERSION,
            });
        }

        let key = derive_key(passphrase, &self.salt)?;
        let nonce_bytes = hex::decode(&self.nonce)
            .map_err(|_| StorageError::Envelope("nonce is not hex".into()))?;
        let ciphertext = hex::decode(&self.ciphertext)
            .map_err(|_| StorageError::Envelope("ciphertext is not hex".into()))?;
        if nonce_bytes.len() != 12 {
            return Err(StorageError::Envelope("nonce length".into()));
        }

        let cipher = ChaCha20Poly1305::new_from_slice(key.as_slice())
            .map_err(|_| StorageError::Crypto("cipher init"))?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
                .map_err(|_| StorageError::Decrypt)?,
        );

        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| StorageError::Envelope("secret is not utf-8".into()))?;
        Ok(LockedSecret::new(text))
    }

    pub fn to_json(&self) -> Result<String, StorageError> {
        serde_json::to_string(self).map_err(|e| StorageError::Envelope(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        serde_json::from_str(json).map_err(|e| StorageError::Envelope(e.to_string()))
    }
}

/// Derive a 32-byte encryption key from a passphrase using Argon2id
fn derive_key(passphrase: &str, salt: &str) -> Result<Zeroizing<[u8; 32]>, StorageError> {
    let salt = SaltString::from_b64(salt).map_err(|_| StorageError::Envelope("salt".into()))?;

    let params = argon2::Params::new(
        ARGON2_MEMORY_KB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(32),
    )
    .map_err(|_| StorageError::Crypto("argon2 parameters"))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|_| StorageError::Crypto("key derivation"))?;
    let output = hash.hash.ok_or(StorageError::Crypto("key derivation"))?;

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&output.as_bytes()[..32]);
    Ok(key)
}

/// Encode a seed for the remote backup field.
///
/// With a passphrase the backup is a sealed envelope (JSON); without one it
/// is the bare seed.
pub fn encode_backup(seed: &str, passphrase: Option<&str>) -> Result<String, StorageError> {
    match passphrase {
        Some(passphrase) => SealedSecret::seal(seed, passphrase)?.to_json(),
        None => Ok(seed.to_string()),
    }
}

/// Decode a remote backup produced by [`encode_backup`].
pub fn decode_backup(backup: &str, passphrase: Option<&str>) -> Result<LockedSecret, StorageError> {
    let trimmed = backup.trim();
    if !trimmed.starts_with('{') {
        return Ok(LockedSecret::new(trimmed));
    }
    let passphrase = passphrase
        .ok_or_else(|| StorageError::Envelope("sealed backup but no passphrase".into()))?;
    SealedSecret::from_json(trimmed)?.open(passphrase)
}

/// Secret store for wallet seeds, one per user.
#[async_trait]
pub trait SeedStore: Send + Sync {
    /// Fetch the stored seed. `Ok(None)` when nothing is stored.
    async fn get(&self, user_id: &str) -> Result<Option<LockedSecret>, StorageError>;

    /// Store (or overwrite) the seed for a user.
    async fn put(&self, user_id: &str, seed: &str) -> Result<(), StorageError>;

    /// Whether any record (readable or not) exists for the user.
    async fn contains(&self, user_id: &str) -> Result<bool, StorageError>;
}

/// In-memory seed store
#[derive(Debug, Default)]
pub struct MemorySeedStore {
    seeds: Mutex<HashMap<String, LockedSecret>>,
}

impl MemorySeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LockedSecret>> {
        self.seeds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of stored seeds
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SeedStore for MemorySeedStore {
    async fn get(&self, user_id: &str) -> Result<Option<LockedSecret>, StorageError> {
        Ok(self.lock().get(user_id).cloned())
    }

    async fn put(&self, user_id: &str, seed: &str) -> Result<(), StorageError> {
        self.lock()
            .insert(user_id.to_string(), LockedSecret::new(seed));
        Ok(())
    }

    async fn contains(&self, user_id: &str) -> Result<bool, StorageError> {
        Ok(self.lock().contains_key(user_id))
    }
}

/// Seed store backed by sealed files in a directory
#[derive(Debug)]
pub struct FileSeedStore {
    dir: PathBuf,
    device_secret: LockedSecret,
}

impl FileSeedStore {
    /// Open (or initialize) a store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;

        let key_path = dir.join(DEVICE_KEY_FILE);
        let device_secret = if key_path.exists() {
            let contents = Zeroizing::new(fs::read_to_string(&key_path)?);
            let secret = contents.trim();
            if secret.len() != 64 || hex::decode(secret).is_err() {
                return Err(StorageError::Envelope("device key is malformed".into()));
            }
            LockedSecret::new(secret)
        } else {
            let mut raw = Zeroizing::new([0u8; 32]);
            rand::thread_rng().fill_bytes(raw.as_mut_slice());
            let secret = LockedSecret::new(hex::encode(raw.as_slice()));
            write_private(&key_path, secret.as_bytes())?;
            tracing::info!("Generated device key at {}", key_path.display());
            secret
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            device_secret,
        })
    }

    /// Path of the envelope for a user. User ids are hashed so they never
    /// shape the filesystem layout.
    pub fn seed_path(&self, user_id: &str) -> PathBuf {
        let digest = Sha256::digest(user_id.as_bytes());
        self.dir
            .join(format!("{}.{}", hex::encode(digest), SEED_EXTENSION))
    }
}

#[async_trait]
impl SeedStore for FileSeedStore {
    async fn get(&self, user_id: &str) -> Result<Option<LockedSecret>, StorageError> {
        let path = self.seed_path(user_id);
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path)?;
        let envelope = SealedSecret::from_json(&json)?;
        let passphrase = self.device_secret.clone();
        // Argon2 is deliberately slow; keep it off the async workers
        let seed = tokio::task::spawn_blocking(move || envelope.open(&passphrase))
            .await
            .map_err(|_| StorageError::Crypto("blocking task"))??;
        Ok(Some(seed))
    }

    async fn put(&self, user_id: &str, seed: &str) -> Result<(), StorageError> {
        let seed = LockedSecret::new(seed);
        let passphrase = self.device_secret.clone();
        let envelope = tokio::task::spawn_blocking(move || SealedSecret::seal(&seed, &passphrase))
            .await
            .map_err(|_| StorageError::Crypto("blocking task"))??;

        let path = self.seed_path(user_id);
        let tmp = path.with_extension("tmp");
        write_private(&tmp, envelope.to_json()?.as_bytes())?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn contains(&self, user_id: &str) -> Result<bool, StorageError> {
        Ok(self.seed_path(user_id).exists())
    }
}

/// Write a file readable only by the owner
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    #[cfg(not(unix))]
    {
        let mut file = fs::File::create(path)?;
        file.write_all(contents)?;
    }

    Ok(())
}
