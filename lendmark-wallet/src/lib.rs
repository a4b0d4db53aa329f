//! Lendmark Wallet
//!
//! Non-custodial wallet lifecycle for the Lendmark lending marketplace.
//! Keys are created and kept locally behind a passkey ceremony, the seed is
//! mirrored to the marketplace backend as a recoverable backup, and
//! transactions are built, signed and submitted against the ledger network.
//!
//! ## Security Model
//!
//! - A passkey ceremony must succeed before a seed is created or used
//! - The seed leaves the host only inside an authenticated backup push
//! - Transaction and message signing happens locally
//! - Ledger nodes and the backend are never trusted with key material
//!
//! ## Components
//!
//! ```text
//! WalletOrchestrator
//!   ├── PasskeyGate        (passkey)      proof-of-presence ceremonies
//!   ├── KeyStore           (keystore)     local seed custody over a SeedStore
//!   ├── LedgerClient       (ledger)       scoped sessions, balance, submit, faucet
//!   └── WalletRecordClient (record)       backend mirror + conflict recovery
//! ```

pub mod authenticator;
pub mod codec;
pub mod config;
pub mod error;
pub mod flight;
pub mod keys;
pub mod keystore;
pub mod ledger;
pub mod network;
pub mod orchestrator;
pub mod passkey;
pub mod record;
pub mod secmem;
pub mod session;
pub mod storage;
pub mod transaction;

pub use authenticator::{ConsolePresence, FixedPresence, LocalAuthenticator, PresencePrompt};
pub use config::WalletConfig;
pub use error::WalletError;
pub use keys::WalletKeys;
pub use keystore::{KeyStore, WalletIdentity};
pub use ledger::{Ledger, LedgerClient};
pub use network::Network;
pub use orchestrator::{MessageSignature, OrchestratorSettings, UserIdentity, WalletOrchestrator};
pub use passkey::{PasskeyGate, PlatformAuthenticator};
pub use record::{RemoteWalletRecord, WalletRecordClient, WalletRecords};
pub use session::{WalletSession, WalletState};
pub use storage::{FileSeedStore, MemorySeedStore, SeedStore};
pub use transaction::{LedgerTransaction, SignedTransactionResult};
