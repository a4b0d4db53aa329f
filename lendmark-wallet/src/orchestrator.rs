//! Wallet Orchestrator
//!
//! Ties the passkey gate, local key custody, the backend record mirror and
//! the ledger together into the wallet lifecycle:
//!
//! - `initialize` resolves the active address on every identity change
//!   (local seed > remote record > none)
//! - `connect` unlocks an existing wallet behind an assertion, or creates,
//!   funds and backs up a new one behind a registration
//! - `disconnect` forgets in-memory state and keeps the local seed
//! - `sign_message` / `sign_and_send_transaction` need an unlocked wallet
//!
//! `connect` and `disconnect` are serialized per user, and concurrent
//! `connect` calls for one user and epoch share a single in-flight attempt.
//! The attempt runs on its own task, so a dropped caller does not strand
//! it. A pending ceremony is abandoned as soon as the identity changes.

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::WalletConfig,
    error::WalletError,
    flight::{KeyedLock, SingleFlight},
    keys::WalletKeys,
    keystore::{KeyStore, WalletIdentity},
    ledger::{Ledger, LedgerClient},
    passkey::{PasskeyGate, PlatformAuthenticator},
    record::{
        create_resolving_conflicts, NewWalletRecord, RemoteWalletRecord, WalletRecordClient,
        WalletRecords, DEFAULT_CONFLICT_RETRIES,
    },
    session::{WalletSession, WalletState},
    storage::{decode_backup, encode_backup, FileSeedStore},
    transaction::{LedgerTransaction, SignedTransactionResult},
};

/// The signed-in marketplace user
#[derive(Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    /// Shown in passkey prompts and stored as the record label
    pub label: String,
    /// Backend bearer token
    pub api_token: String,
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserIdentity")
            .field("user_id", &self.user_id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Signature over an off-ledger message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSignature {
    pub address: String,
    /// Upper-case hex
    pub public_key: String,
    /// Upper-case hex
    pub signature: String,
}

/// Orchestrator tunables
#[derive(Clone)]
pub struct OrchestratorSettings {
    pub max_conflict_retries: u32,
    /// Seals the remote seed backup when set
    pub backup_passphrase: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_conflict_retries: DEFAULT_CONFLICT_RETRIES,
            backup_passphrase: None,
        }
    }
}

struct Inner {
    gate: PasskeyGate,
    keystore: KeyStore,
    ledger: Arc<dyn Ledger>,
    records: Arc<dyn WalletRecords>,
    settings: OrchestratorSettings,
    session: WalletSession,
    identity: Mutex<Option<UserIdentity>>,
    connects: SingleFlight<(String, u64), Option<String>>,
    locks: KeyedLock<String>,
}

/// Clears `is_connecting` however a connect attempt ends.
struct ConnectingFlag<'a> {
    session: &'a WalletSession,
    epoch: u64,
}

impl<'a> ConnectingFlag<'a> {
    fn raise(session: &'a WalletSession, epoch: u64) -> Self {
        session.update(epoch, |state| state.is_connecting = true);
        Self { session, epoch }
    }
}

impl Drop for ConnectingFlag<'_> {
    fn drop(&mut self) {
        self.session
            .update(self.epoch, |state| state.is_connecting = false);
    }
}

#[derive(Clone)]
pub struct WalletOrchestrator {
    inner: Arc<Inner>,
}

impl WalletOrchestrator {
    pub fn new(
        gate: PasskeyGate,
        keystore: KeyStore,
        ledger: Arc<dyn Ledger>,
        records: Arc<dyn WalletRecords>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                gate,
                keystore,
                ledger,
                records,
                settings,
                session: WalletSession::new(),
                identity: Mutex::new(None),
                connects: SingleFlight::new(),
                locks: KeyedLock::new(),
            }),
        }
    }

    /// Wire up the production components from configuration.
    pub fn from_config(
        config: &WalletConfig,
        authenticator: Arc<dyn PlatformAuthenticator>,
    ) -> Result<Self, WalletError> {
        let gate = PasskeyGate::new(authenticator, &config.origin, &config.rp_name)?
            .with_timeout(config.ceremony_timeout());
        let store = FileSeedStore::open(&config.seed_dir())?;
        let ledger = LedgerClient::new(config.ledger_config())?;
        let records = WalletRecordClient::new(&config.api_base)?;

        Ok(Self::new(
            gate,
            KeyStore::new(Arc::new(store)),
            Arc::new(ledger),
            Arc::new(records),
            OrchestratorSettings {
                max_conflict_retries: config.max_conflict_retries,
                backup_passphrase: config.backup_passphrase.clone(),
            },
        ))
    }

    fn identity_slot(&self) -> MutexGuard<'_, Option<UserIdentity>> {
        self.inner
            .identity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current identity and the epoch it belongs to
    fn current(&self) -> Option<(u64, UserIdentity)> {
        let slot = self.identity_slot();
        let identity = slot.clone()?;
        Some((self.inner.session.epoch(), identity))
    }

    pub fn state(&self) -> WalletState {
        self.inner.session.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<WalletState> {
        self.inner.session.subscribe()
    }

    pub fn keystore(&self) -> &KeyStore {
        &self.inner.keystore
    }

    /// Resolve wallet state for a new identity (`None` on logout).
    pub async fn initialize(&self, identity: Option<UserIdentity>) {
        let epoch = {
            let mut slot = self.identity_slot();
            let epoch = self.inner.session.begin_epoch();
            *slot = identity.clone();
            epoch
        };

        let Some(identity) = identity else {
            self.inner
                .session
                .update(epoch, |state| state.is_initialized = true);
            info!("Wallet session cleared");
            return;
        };

        let (remote, remote_resolved) = match self.inner.records.fetch(&identity.api_token).await {
            Ok(remote) => (remote, true),
            Err(e) => {
                warn!("Could not fetch wallet record for {}: {}", identity.user_id, e);
                (None, false)
            }
        };
        let local = self.inner.keystore.load_wallet(&identity.user_id).await;

        let (address, reconciliation_pending) = match (&local, &remote) {
            (Some(local), remote) => {
                let diverged = remote
                    .as_ref()
                    .is_some_and(|remote| remote.address != local.address());
                if diverged {
                    warn!(
                        "Local wallet {} differs from backend record for user {}; reconciliation pending",
                        local.address(),
                        identity.user_id
                    );
                }
                (Some(local.address().to_string()), diverged)
            }
            (None, Some(remote)) => {
                self.restore_from_backup(epoch, &identity, remote).await;
                (Some(remote.address.clone()), false)
            }
            (None, None) => (None, false),
        };

        debug!(
            "Resolved wallet for {}: {:?}",
            identity.user_id,
            address.as_deref()
        );
        self.inner.session.update(epoch, |state| {
            state.address = address;
            state.remote_record = remote;
            state.remote_resolved = remote_resolved;
            state.reconciliation_pending = reconciliation_pending;
            state.is_initialized = true;
        });
    }

    /// Rebuild the local wallet from the backend's seed backup, if it has
    /// one and it matches the record's address.
    async fn restore_from_backup(&self, epoch: u64, identity: &UserIdentity, remote: &RemoteWalletRecord) {
        let Some(backup) = remote.seed_backup.as_deref() else {
            debug!("Backend record for {} has no seed backup", identity.user_id);
            return;
        };

        let seed = match decode_backup(backup, self.inner.settings.backup_passphrase.as_deref()) {
            Ok(seed) => seed,
            Err(e) => {
                error!("Seed backup for {} cannot be opened: {}", identity.user_id, e);
                return;
            }
        };
        match WalletKeys::from_seed(&seed) {
            Ok(keys) if keys.address() == remote.address => {}
            Ok(keys) => {
                error!(
                    "Seed backup derives {} but the record says {}; not restoring",
                    keys.address(),
                    remote.address
                );
                return;
            }
            Err(e) => {
                error!("Seed backup for {} is invalid: {}", identity.user_id, e);
                return;
            }
        }

        if self.inner.session.epoch() != epoch {
            return;
        }
        if self
            .inner
            .keystore
            .restore_wallet(&identity.user_id, &seed)
            .await
            .is_some()
        {
            info!("Restored wallet {} from backend backup", remote.address);
        }
    }

    /// Unlock or create the wallet. Returns the address, or `None` when the
    /// attempt failed (the cause is logged).
    pub async fn connect(&self) -> Option<String> {
        let Some((epoch, identity)) = self.current() else {
            warn!("connect called without a signed-in user");
            return None;
        };

        let this = self.clone();
        let key = (identity.user_id.clone(), epoch);
        self.inner
            .connects
            .run(key, move || async move { this.connect_exclusive(epoch, identity).await })
            .await
            .flatten()
    }

    async fn connect_exclusive(&self, epoch: u64, identity: UserIdentity) -> Option<String> {
        let _guard = self.inner.locks.lock(&identity.user_id).await;
        let result = if self.inner.session.epoch() == epoch {
            self.try_connect(epoch, &identity).await
        } else {
            Err(WalletError::NoIdentity)
        };
        match result {
            Ok(address) => {
                info!("Wallet connected: {}", address);
                Some(address)
            }
            Err(e) => {
                warn!("Wallet connect for {} failed: {}", identity.user_id, e);
                None
            }
        }
    }

    async fn try_connect(&self, epoch: u64, identity: &UserIdentity) -> Result<String, WalletError> {
        let inner = &self.inner;
        if !inner.gate.is_supported().await {
            return Err(WalletError::CapabilityUnsupported);
        }
        let _connecting = ConnectingFlag::raise(&inner.session, epoch);

        if !inner.keystore.has_wallet(&identity.user_id).await {
            self.resolve_remote(epoch, identity).await?;
        }

        if inner.keystore.has_wallet(&identity.user_id).await {
            self.ceremony(epoch, inner.gate.authenticate(&identity.label)).await?;
            let wallet = inner
                .keystore
                .load_wallet(&identity.user_id)
                .await
                .ok_or(WalletError::CorruptLocalState)?;
            if inner.session.snapshot().reconciliation_pending {
                warn!(
                    "Backend record still differs from local wallet {}",
                    wallet.address()
                );
            }
            return self.unlock(epoch, wallet);
        }

        self.ceremony(epoch, inner.gate.register(&identity.label)).await?;
        if inner.session.epoch() != epoch {
            return Err(WalletError::NoIdentity);
        }

        let wallet = inner.keystore.create_wallet(&identity.user_id).await?;
        if !inner.ledger.network().is_production() {
            inner.ledger.fund_wallet(wallet.address()).await;
        }

        let record = self.push_backup(identity, &wallet).await?;
        inner.session.update(epoch, |state| {
            state.remote_record = Some(record);
            state.reconciliation_pending = false;
        });
        self.unlock(epoch, wallet)
    }

    /// Fetch the backend record if `initialize` could not, restoring its
    /// backup when there is one. A failed fetch fails the connect: the create
    /// path never runs against an unknown record.
    async fn resolve_remote(&self, epoch: u64, identity: &UserIdentity) -> Result<(), WalletError> {
        let inner = &self.inner;
        if inner.session.snapshot().remote_resolved {
            return Ok(());
        }

        let remote = inner.records.fetch(&identity.api_token).await?;
        if let Some(remote) = &remote {
            info!("Backend record for {} found on retry", identity.user_id);
            self.restore_from_backup(epoch, identity, remote).await;
        }
        let address = remote.as_ref().map(|remote| remote.address.clone());
        inner.session.update(epoch, |state| {
            if state.address.is_none() {
                state.address = address;
            }
            state.remote_record = remote;
            state.remote_resolved = true;
        });
        if inner.session.epoch() != epoch {
            return Err(WalletError::NoIdentity);
        }
        Ok(())
    }

    /// Await a ceremony, abandoning it if the identity changes first.
    async fn ceremony(&self, epoch: u64, ceremony: impl Future<Output = bool>) -> Result<(), WalletError> {
        tokio::select! {
            passed = ceremony => {
                if passed {
                    Ok(())
                } else {
                    Err(WalletError::CeremonyFailed)
                }
            }
            _ = self.inner.session.epoch_ended(epoch) => {
                debug!("Identity changed during a passkey ceremony");
                Err(WalletError::NoIdentity)
            }
        }
    }

    fn unlock(&self, epoch: u64, wallet: WalletIdentity) -> Result<String, WalletError> {
        let address = wallet.address().to_string();
        if !self.inner.session.unlock(epoch, wallet) {
            // identity changed while we were connecting
            return Err(WalletError::NoIdentity);
        }
        Ok(address)
    }

    async fn push_backup(
        &self,
        identity: &UserIdentity,
        wallet: &WalletIdentity,
    ) -> Result<RemoteWalletRecord, WalletError> {
        let settings = &self.inner.settings;
        let record = NewWalletRecord {
            address: wallet.address().to_string(),
            seed: Some(encode_backup(wallet.seed(), settings.backup_passphrase.as_deref())?),
            label: identity.label.clone(),
        };

        Ok(create_resolving_conflicts(
            self.inner.records.as_ref(),
            &identity.api_token,
            &record,
            settings.max_conflict_retries,
        )
        .await?)
    }

    /// Replace a divergent backend record with the local wallet.
    pub async fn reconcile(&self) -> Result<RemoteWalletRecord, WalletError> {
        let (epoch, identity) = self.current().ok_or(WalletError::NoIdentity)?;
        let _guard = self.inner.locks.lock(&identity.user_id).await;
        let wallet = self.inner.session.wallet().ok_or(WalletError::NotConnected)?;

        let record = self.push_backup(&identity, &wallet).await?;
        info!("Backend record reconciled to {}", record.address);
        self.inner.session.update(epoch, |state| {
            state.remote_record = Some(record.clone());
            state.reconciliation_pending = false;
        });
        Ok(record)
    }

    /// Forget the in-memory wallet. The local seed stays.
    pub async fn disconnect(&self) {
        let Some((epoch, identity)) = self.current() else {
            return;
        };
        let _guard = self.inner.locks.lock(&identity.user_id).await;
        self.inner.session.lock(epoch);
        info!("Wallet disconnected for {}", identity.user_id);
    }

    fn unlocked_wallet(&self) -> Result<WalletIdentity, WalletError> {
        self.current()
            .and_then(|_| self.inner.session.wallet())
            .ok_or(WalletError::NotConnected)
    }

    /// Sign an off-ledger message with the unlocked wallet.
    pub fn sign_message(&self, message: &[u8]) -> Result<MessageSignature, WalletError> {
        let wallet = self.unlocked_wallet()?;
        let signature = wallet.keys().sign_message(message);
        Ok(MessageSignature {
            address: wallet.address().to_string(),
            public_key: wallet.public_key(),
            signature: hex::encode_upper(signature),
        })
    }

    /// Sign and submit a transaction from the unlocked wallet.
    pub async fn sign_and_send_transaction(
        &self,
        tx: &LedgerTransaction,
    ) -> Result<SignedTransactionResult, WalletError> {
        let wallet = self.unlocked_wallet()?;
        self.inner
            .ledger
            .autofill_and_submit(tx, wallet.keys())
            .await
            .map_err(|e| {
                warn!("{} from {} failed: {}", tx.kind(), wallet.address(), e);
                WalletError::from(e)
            })
    }

    /// Balance of the active address in drops, 0 when there is none.
    pub async fn get_balance(&self) -> u64 {
        match self.state().address {
            Some(address) => self.inner.ledger.get_balance(&address).await,
            None => 0,
        }
    }

    /// Explorer link for the active address
    pub fn explorer_url(&self) -> Option<String> {
        self.state()
            .address
            .map(|address| self.inner.ledger.explorer_url(&address))
    }
}
