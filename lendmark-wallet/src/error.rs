//! Wallet-level error taxonomy.

use thiserror::Error;

use crate::{
    keys::KeyError, ledger::LedgerError, passkey::PasskeyError, record::RecordError,
    storage::StorageError, transaction::TransactionError,
};

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum WalletError {
    /// No platform authenticator on this host
    #[error("passkeys are not supported on this platform")]
    CapabilityUnsupported,

    /// Passkey ceremony declined, timed out or failed verification
    #[error("passkey ceremony failed")]
    CeremonyFailed,

    /// Operation needs a signed-in user
    #[error("no user identity")]
    NoIdentity,

    /// Operation needs an unlocked wallet
    #[error("wallet not connected")]
    NotConnected,

    /// Local record exists but cannot be read
    #[error("local wallet record is corrupt")]
    CorruptLocalState,

    #[error(transparent)]
    Passkey(#[from] PasskeyError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl WalletError {
    /// Ledger result code, when the ledger rejected a transaction
    pub fn result_code(&self) -> Option<&str> {
        match self {
            WalletError::Ledger(LedgerError::TransactionRejected { code, .. }) => Some(code),
            _ => None,
        }
    }
}
