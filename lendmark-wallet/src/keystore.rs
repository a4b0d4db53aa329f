//! Key Store
//!
//! Local custody of one wallet seed per user on top of a [`SeedStore`].
//! Reads never fail: an absent or unreadable record loads as `None` and the
//! cause is logged. Writes return typed errors.

use chrono::{DateTime, Utc};
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    keys::{KeyError, WalletKeys},
    storage::{SeedStore, StorageError},
};

/// A resolved wallet for a user.
#[derive(Clone)]
pub struct WalletIdentity {
    pub user_id: String,
    pub label: String,
    pub is_primary: bool,
    pub is_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    keys: WalletKeys,
}

impl WalletIdentity {
    fn new(user_id: &str, keys: WalletKeys) -> Self {
        Self {
            user_id: user_id.to_string(),
            label: String::new(),
            is_primary: true,
            is_verified: false,
            verified_at: None,
            keys,
        }
    }

    pub fn address(&self) -> &str {
        self.keys.address()
    }

    pub fn public_key(&self) -> String {
        self.keys.public_key_hex()
    }

    /// The encoded seed. Handle with care.
    pub fn seed(&self) -> &str {
        self.keys.seed()
    }

    pub fn keys(&self) -> &WalletKeys {
        &self.keys
    }
}

impl fmt::Debug for WalletIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletIdentity")
            .field("user_id", &self.user_id)
            .field("address", &self.address())
            .field("label", &self.label)
            .field("is_primary", &self.is_primary)
            .field("is_verified", &self.is_verified)
            .finish_non_exhaustive()
    }
}

/// Why a local record could not be loaded
#[derive(Debug, thiserror::Error)]
enum LoadFailure {
    #[error("store: {0}")]
    Storage(#[from] StorageError),
    #[error("seed: {0}")]
    Key(#[from] KeyError),
}

/// Per-user wallet custody
#[derive(Clone)]
pub struct KeyStore {
    store: Arc<dyn SeedStore>,
}

impl KeyStore {
    pub fn new(store: Arc<dyn SeedStore>) -> Self {
        Self { store }
    }

    /// Generate a new wallet and persist its seed before returning.
    pub async fn create_wallet(&self, user_id: &str) -> Result<WalletIdentity, StorageError> {
        let keys = WalletKeys::generate();
        self.store.put(user_id, keys.seed()).await?;
        info!("Created wallet {} for user {}", keys.address(), user_id);
        Ok(WalletIdentity::new(user_id, keys))
    }

    async fn try_load(&self, user_id: &str) -> Result<Option<WalletKeys>, LoadFailure> {
        match self.store.get(user_id).await? {
            Some(seed) => Ok(Some(WalletKeys::from_seed(&seed)?)),
            None => Ok(None),
        }
    }

    /// Load the stored wallet. A corrupt record is reported as absent.
    pub async fn load_wallet(&self, user_id: &str) -> Option<WalletIdentity> {
        match self.try_load(user_id).await {
            Ok(Some(keys)) => {
                debug!("Loaded wallet {} for user {}", keys.address(), user_id);
                Some(WalletIdentity::new(user_id, keys))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Local wallet record for user {} is unreadable: {}", user_id, e);
                None
            }
        }
    }

    /// Replace the local record with `seed`. An invalid seed leaves the store
    /// untouched and yields `None`.
    pub async fn restore_wallet(&self, user_id: &str, seed: &str) -> Option<WalletIdentity> {
        let keys = match WalletKeys::from_seed(seed) {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Refusing to restore wallet for user {}: {}", user_id, e);
                return None;
            }
        };

        if let Err(e) = self.store.put(user_id, keys.seed()).await {
            warn!("Failed to persist restored wallet for user {}: {}", user_id, e);
            return None;
        }

        info!("Restored wallet {} for user {}", keys.address(), user_id);
        Some(WalletIdentity::new(user_id, keys))
    }

    /// Whether a loadable wallet exists for the user.
    pub async fn has_wallet(&self, user_id: &str) -> bool {
        match self.store.contains(user_id).await {
            Ok(false) => false,
            Ok(true) => self.load_wallet(user_id).await.is_some(),
            Err(e) => {
                warn!("Seed store unavailable for user {}: {}", user_id, e);
                false
            }
        }
    }
}
