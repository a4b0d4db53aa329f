//! Observable wallet session state
//!
//! Everything the orchestrator knows about the active user's wallet lives
//! here, behind a `tokio::sync::watch` channel so front ends can follow it.
//!
//! Each identity change starts a new epoch. Writes carry the epoch they were
//! started under and are dropped if the identity has changed since.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};
use tokio::sync::watch;
use tracing::debug;

use crate::{keystore::WalletIdentity, record::RemoteWalletRecord};

/// Snapshot of the wallet session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletState {
    /// Identity resolution has finished at least once
    pub is_initialized: bool,
    pub is_connecting: bool,
    /// Active address, if any
    pub address: Option<String>,
    pub remote_record: Option<RemoteWalletRecord>,
    /// `remote_record` reflects a successful fetch in this epoch
    pub remote_resolved: bool,
    /// Keys are loaded and may sign
    pub unlocked: bool,
    /// Local and remote addresses disagree
    pub reconciliation_pending: bool,
}

pub struct WalletSession {
    state: watch::Sender<WalletState>,
    epoch: AtomicU64,
    wallet: Mutex<Option<WalletIdentity>>,
}

impl Default for WalletSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletSession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(WalletState::default());
        Self {
            state,
            epoch: AtomicU64::new(0),
            wallet: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WalletState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> WalletState {
        self.state.borrow().clone()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn wallet_slot(&self) -> std::sync::MutexGuard<'_, Option<WalletIdentity>> {
        self.wallet.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new epoch: forget the previous identity's wallet and state.
    /// `is_initialized` survives so observers never see a regression.
    pub fn begin_epoch(&self) -> u64 {
        let mut epoch = 0;
        self.state.send_modify(|state| {
            epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *self.wallet_slot() = None;
            *state = WalletState {
                is_initialized: state.is_initialized,
                ..WalletState::default()
            };
        });
        debug!("wallet session epoch {}", epoch);
        epoch
    }

    /// Resolves once `epoch` is no longer current.
    pub async fn epoch_ended(&self, epoch: u64) {
        let mut changes = self.state.subscribe();
        while self.epoch() == epoch {
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Apply `f` if `epoch` is still current. Returns whether it was applied.
    pub fn update(&self, epoch: u64, f: impl FnOnce(&mut WalletState)) -> bool {
        let applied = self.state.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            f(state);
            true
        });
        if !applied {
            debug!("dropping stale session write from epoch {}", epoch);
        }
        applied
    }

    /// Hold `wallet` as the unlocked signer for `epoch`.
    pub fn unlock(&self, epoch: u64, wallet: WalletIdentity) -> bool {
        let address = wallet.address().to_string();
        self.update(epoch, |state| {
            *self.wallet_slot() = Some(wallet);
            state.address = Some(address);
            state.unlocked = true;
        })
    }

    /// Drop the in-memory wallet and address.
    pub fn lock(&self, epoch: u64) -> bool {
        self.update(epoch, |state| {
            *self.wallet_slot() = None;
            state.address = None;
            state.remote_record = None;
            state.unlocked = false;
        })
    }

    /// The unlocked wallet, if any
    pub fn wallet(&self) -> Option<WalletIdentity> {
        if !self.state.borrow().unlocked {
            return None;
        }
        self.wallet_slot().clone()
    }
}
