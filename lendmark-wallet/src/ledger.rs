//! Ledger Client
//!
//! JSON-RPC client for the ledger network. Every operation runs inside a
//! short-lived [`LedgerSession`]:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Operating -> Disconnecting -> Disconnected
//! ```
//!
//! Sessions are never shared or reused. A session that is not explicitly
//! disconnected is released on drop, so early returns and `?` cannot leak
//! one. The client counts open sessions to make that observable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::{
    keys::WalletKeys,
    network::Network,
    transaction::{self, Autofill, LedgerTransaction, SignedTransactionResult, TransactionError, SUCCESS_CODE},
};

/// Timeout for a single RPC request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for a submitted transaction to validate
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(90);

/// Interval between validation polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Ledgers a transaction stays valid for after autofill
pub const LEDGER_OFFSET: u32 = 20;

/// Reference transaction cost, in drops
const BASE_FEE: u64 = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger unreachable: {0}")]
    NetworkUnavailable(String),

    #[error("ledger request timed out")]
    Timeout,

    #[error("RPC error {code}: {message}")]
    Rpc { code: String, message: String },

    #[error("account not found")]
    AccountNotFound,

    #[error("transaction {hash} rejected: {code}")]
    TransactionRejected { code: String, hash: String },

    #[error("transaction {hash} expired before validation")]
    Expired { hash: String },

    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),

    #[error("faucet request failed: {0}")]
    Faucet(String),

    #[error(transparent)]
    Invalid(#[from] TransactionError),
}

fn transport_error(e: reqwest::Error) -> LedgerError {
    if e.is_timeout() {
        LedgerError::Timeout
    } else {
        LedgerError::NetworkUnavailable(e.to_string())
    }
}

/// Submit-time result classes that never make it into a ledger
fn is_hard_failure(engine_result: &str) -> bool {
    ["tem", "tef", "tel"]
        .iter()
        .any(|prefix| engine_result.starts_with(prefix))
}

/// Ledger client settings
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub network: Network,
    pub rpc_url: String,
    pub faucet_url: Option<String>,
    pub request_timeout: Duration,
    pub submit_timeout: Duration,
    pub poll_interval: Duration,
}

impl LedgerConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            rpc_url: network.rpc_url().to_string(),
            faucet_url: network.faucet_url().map(str::to_string),
            request_timeout: REQUEST_TIMEOUT,
            submit_timeout: SUBMIT_TIMEOUT,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// JSON-RPC request
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: [Value; 1],
}

/// JSON-RPC response
#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Value,
}

/// Balance and sequence of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    pub balance: u64,
    pub sequence: u32,
}

/// Validation status of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxStatus {
    pub validated: bool,
    pub result_code: Option<String>,
}

/// Outcome of a faucet request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaucetGrant {
    pub address: String,
    pub amount: Option<u64>,
}

/// Per-call session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Operating,
    Disconnecting,
}

/// JSON-RPC ledger client
pub struct LedgerClient {
    http: reqwest::Client,
    config: LedgerConfig,
    open_sessions: AtomicUsize,
}

impl LedgerClient {
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(transport_error)?;

        Ok(Self {
            http,
            config,
            open_sessions: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Sessions currently open against this client
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let request = RpcRequest {
            method,
            params: [params],
        };

        let response = self
            .http
            .post(&self.config.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(LedgerError::NetworkUnavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: RpcResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LedgerError::Timeout
            } else {
                LedgerError::InvalidResponse(e.to_string())
            }
        })?;

        let result = body.result;
        let failed = result.get("status").and_then(Value::as_str) == Some("error");
        if failed || result.get("error").is_some() {
            let code = result
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            if code == "actNotFound" {
                return Err(LedgerError::AccountNotFound);
            }
            let message = result
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(LedgerError::Rpc { code, message });
        }

        Ok(result)
    }

    /// Open a session after checking the node responds.
    pub async fn connect(&self) -> Result<LedgerSession<'_>, LedgerError> {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        let mut session = LedgerSession {
            client: self,
            state: SessionState::Disconnected,
            released: false,
        };
        session.transition(SessionState::Connecting);

        // a failed server_info check drops (and releases) the session
        self.rpc("server_info", json!({})).await?;
        session.transition(SessionState::Connected);
        Ok(session)
    }

    /// Balance in drops. Never fails: unfunded accounts and ledger errors
    /// read as zero.
    pub async fn get_balance(&self, address: &str) -> u64 {
        let mut session = match self.connect().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Balance lookup for {} failed to connect: {}", address, e);
                return 0;
            }
        };

        let balance = match session.account_info(address).await {
            Ok(info) => info.balance,
            Err(LedgerError::AccountNotFound) => {
                debug!("Account {} not found on ledger", address);
                0
            }
            Err(e) => {
                warn!("Balance lookup for {} failed: {}", address, e);
                0
            }
        };

        session.disconnect();
        balance
    }

    /// Fill in account fields, sign locally, submit, and wait for validation.
    pub async fn autofill_and_submit(
        &self,
        tx: &LedgerTransaction,
        keys: &WalletKeys,
    ) -> Result<SignedTransactionResult, LedgerError> {
        let mut session = self.connect().await?;
        let outcome = session.submit_transaction(tx, keys).await;
        session.disconnect();
        outcome
    }

    /// Ask the faucet to fund `address`.
    pub async fn request_funding(&self, address: &str) -> Result<FaucetGrant, LedgerError> {
        let faucet = match (&self.config.faucet_url, self.config.network.is_production()) {
            (Some(url), false) => url,
            _ => return Err(LedgerError::Faucet(format!("no faucet on {}", self.config.network))),
        };

        let url = format!("{}/accounts", faucet.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&json!({ "destination": address }))
            .send()
            .await
            .map_err(|e| LedgerError::Faucet(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LedgerError::Faucet(format!("HTTP {}", response.status())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LedgerError::Faucet(e.to_string()))?;
        let amount = match &body["amount"] {
            Value::Number(n) => n.as_f64().map(|units| (units * transaction::DROPS_PER_UNIT as f64) as u64),
            Value::String(s) => transaction::parse_amount(s).ok(),
            _ => None,
        };

        Ok(FaucetGrant {
            address: address.to_string(),
            amount,
        })
    }

    /// Fund an empty account on a test network. Failures are logged and
    /// swallowed.
    pub async fn fund_wallet(&self, address: &str) {
        if self.config.network.is_production() {
            debug!("Skipping faucet on {}", self.config.network);
            return;
        }

        let balance = self.get_balance(address).await;
        if balance > 0 {
            debug!("{} already holds {} drops, not funding", address, balance);
            return;
        }

        match self.request_funding(address).await {
            Ok(grant) => info!(
                "Faucet funded {} ({})",
                grant.address,
                grant
                    .amount
                    .map(transaction::format_amount)
                    .unwrap_or_else(|| "amount unknown".to_string())
            ),
            Err(e) => warn!("Faucet funding for {} failed: {}", address, e),
        }
    }
}

/// One short-lived connection to the ledger
pub struct LedgerSession<'a> {
    client: &'a LedgerClient,
    state: SessionState,
    released: bool,
}

impl<'a> LedgerSession<'a> {
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        trace!("ledger session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<Value, LedgerError> {
        self.transition(SessionState::Operating);
        let result = self.client.rpc(method, params).await;
        self.transition(SessionState::Connected);
        result
    }

    pub async fn account_info(&mut self, address: &str) -> Result<AccountInfo, LedgerError> {
        let result = self
            .call(
                "account_info",
                json!({ "account": address, "ledger_index": "validated" }),
            )
            .await?;

        let data = &result["account_data"];
        let balance = data["Balance"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| LedgerError::InvalidResponse("account_data.Balance".into()))?;
        let sequence = data["Sequence"]
            .as_u64()
            .and_then(|s| u32::try_from(s).ok())
            .ok_or_else(|| LedgerError::InvalidResponse("account_data.Sequence".into()))?;

        Ok(AccountInfo { balance, sequence })
    }

    /// Open-ledger fee in drops, floored at the base fee
    pub async fn fee(&mut self) -> Result<u64, LedgerError> {
        let result = self.call("fee", json!({})).await?;
        let drops = |field: &str| {
            result["drops"][field]
                .as_str()
                .and_then(|s| s.parse::<u64>().ok())
        };

        let base = drops("base_fee").unwrap_or(BASE_FEE);
        let open = drops("open_ledger_fee")
            .ok_or_else(|| LedgerError::InvalidResponse("drops.open_ledger_fee".into()))?;
        Ok(open.max(base))
    }

    pub async fn ledger_current(&mut self) -> Result<u32, LedgerError> {
        let result = self.call("ledger_current", json!({})).await?;
        result["ledger_current_index"]
            .as_u64()
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| LedgerError::InvalidResponse("ledger_current_index".into()))
    }

    /// Submit a signed blob; returns the engine result code.
    pub async fn submit(&mut self, tx_blob: &str) -> Result<String, LedgerError> {
        let result = self.call("submit", json!({ "tx_blob": tx_blob })).await?;
        result["engine_result"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LedgerError::InvalidResponse("engine_result".into()))
    }

    pub async fn tx(&mut self, hash: &str) -> Result<TxStatus, LedgerError> {
        let result = self.call("tx", json!({ "transaction": hash })).await?;
        Ok(TxStatus {
            validated: result["validated"].as_bool().unwrap_or(false),
            result_code: result["meta"]["TransactionResult"]
                .as_str()
                .map(str::to_string),
        })
    }

    pub async fn autofill(&mut self, account: &str) -> Result<Autofill, LedgerError> {
        let info = self.account_info(account).await?;
        let fee = self.fee().await?;
        let current = self.ledger_current().await?;

        Ok(Autofill {
            account: account.to_string(),
            sequence: info.sequence,
            fee,
            last_ledger_sequence: current + LEDGER_OFFSET,
        })
    }

    async fn submit_transaction(
        &mut self,
        tx: &LedgerTransaction,
        keys: &WalletKeys,
    ) -> Result<SignedTransactionResult, LedgerError> {
        let autofill = self.autofill(keys.address()).await?;
        let signed = transaction::sign(tx.to_json(&autofill)?, keys)?;
        info!("Submitting {} {}", tx.kind(), signed.hash);

        let engine_result = self.submit(&signed.tx_blob).await?;
        if is_hard_failure(&engine_result) {
            warn!("Transaction {} rejected on submit: {}", signed.hash, engine_result);
            return Err(LedgerError::TransactionRejected {
                code: engine_result,
                hash: signed.hash,
            });
        }
        debug!("Transaction {} preliminary result {}", signed.hash, engine_result);

        let submit_timeout = self.client.config.submit_timeout;
        tokio::time::timeout(
            submit_timeout,
            self.wait_for_validation(&signed.hash, autofill.last_ledger_sequence),
        )
        .await
        .map_err(|_| LedgerError::Timeout)?
    }

    async fn wait_for_validation(
        &mut self,
        hash: &str,
        last_ledger_sequence: u32,
    ) -> Result<SignedTransactionResult, LedgerError> {
        let poll_interval = self.client.config.poll_interval;
        loop {
            match self.tx(hash).await {
                Ok(TxStatus {
                    validated: true,
                    result_code,
                }) => {
                    let code = result_code
                        .ok_or_else(|| LedgerError::InvalidResponse("meta.TransactionResult".into()))?;
                    if code != SUCCESS_CODE {
                        warn!("Transaction {} failed: {}", hash, code);
                        return Err(LedgerError::TransactionRejected {
                            code,
                            hash: hash.to_string(),
                        });
                    }
                    info!("Transaction {} validated", hash);
                    return Ok(SignedTransactionResult::from_code(hash.to_string(), code));
                }
                Ok(_) => {}
                Err(LedgerError::Rpc { code, .. }) if code == "txnNotFound" => {}
                Err(e) => return Err(e),
            }

            if self.ledger_current().await? > last_ledger_sequence {
                return Err(LedgerError::Expired {
                    hash: hash.to_string(),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Close the session.
    pub fn disconnect(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.transition(SessionState::Disconnecting);
        self.released = true;
        self.client.open_sessions.fetch_sub(1, Ordering::SeqCst);
        self.transition(SessionState::Disconnected);
    }
}

impl Drop for LedgerSession<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Ledger operations the orchestrator depends on.
#[async_trait]
pub trait Ledger: Send + Sync {
    fn network(&self) -> Network;

    /// Account explorer link
    fn explorer_url(&self, address: &str) -> String {
        format!("{}/accounts/{}", self.network().explorer_url(), address)
    }

    async fn get_balance(&self, address: &str) -> u64;

    async fn autofill_and_submit(
        &self,
        tx: &LedgerTransaction,
        keys: &WalletKeys,
    ) -> Result<SignedTransactionResult, LedgerError>;

    async fn fund_wallet(&self, address: &str);
}

#[async_trait]
impl Ledger for LedgerClient {
    fn network(&self) -> Network {
        self.config.network
    }

    async fn get_balance(&self, address: &str) -> u64 {
        LedgerClient::get_balance(self, address).await
    }

    async fn autofill_and_submit(
        &self,
        tx: &LedgerTransaction,
        keys: &WalletKeys,
    ) -> Result<SignedTransactionResult, LedgerError> {
        LedgerClient::autofill_and_submit(self, tx, keys).await
    }

    async fn fund_wallet(&self, address: &str) {
        LedgerClient::fund_wallet(self, address).await
    }
}
