//! Transaction construction and local signing
//!
//! Ledger transactions are built as JSON objects. Each kind the wallet can
//! send is a variant of [`LedgerTransaction`], validated when it is
//! constructed, so a malformed payload never reaches the signer.
//!
//! Signing:
//! - signing payload is `"STX\0" || binary(tx without TxnSignature)`
//! - the blob is the hex of the binary signed transaction
//! - the hash is SHA-512Half of `"TXN\0" || blob`
//!
//! The binary form is defined in [`crate::codec`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codec;
use crate::keys::{self, is_valid_address, sha512_half, WalletKeys};

/// Drops per display unit
pub const DROPS_PER_UNIT: u64 = 1_000_000;

/// Display symbol of the native asset
pub const NATIVE_SYMBOL: &str = "LMK";

/// Largest transfer fee an issuance may carry (50%)
pub const MAX_TRANSFER_FEE: u32 = 50_000;

/// Largest issuance metadata, in bytes
pub const MAX_METADATA_LEN: usize = 1024;

/// Largest account domain, in bytes
pub const MAX_DOMAIN_LEN: usize = 256;

/// Result code of an applied transaction
pub const SUCCESS_CODE: &str = "tesSUCCESS";

const SIGNING_PREFIX: &[u8] = b"STX\0";
const HASH_PREFIX: &[u8] = b"TXN\0";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("invalid destination address: {0}")]
    InvalidDestination(String),

    #[error("cannot pay yourself")]
    SelfPayment,

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("transfer fee {0} exceeds 50000")]
    TransferFeeTooHigh(u32),

    #[error("metadata is {0} bytes (max 1024)")]
    MetadataTooLong(usize),

    #[error("domain is {0} bytes (max 256)")]
    DomainTooLong(usize),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("malformed transaction blob: {0}")]
    MalformedBlob(String),
}

/// Native asset payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    destination: String,
    amount: u64,
    destination_tag: Option<u32>,
}

impl Payment {
    pub fn new(
        destination: &str,
        amount: u64,
        destination_tag: Option<u32>,
    ) -> Result<Self, TransactionError> {
        let destination = destination.trim();
        if !is_valid_address(destination) {
            return Err(TransactionError::InvalidDestination(destination.to_string()));
        }
        if amount == 0 {
            return Err(TransactionError::ZeroAmount);
        }
        Ok(Self {
            destination: destination.to_string(),
            amount,
            destination_tag,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn destination_tag(&self) -> Option<u32> {
        self.destination_tag
    }
}

/// Fungible token issuance definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIssuance {
    asset_scale: u8,
    maximum_amount: Option<u64>,
    transfer_fee: u32,
    metadata: Vec<u8>,
    flags: u32,
}

impl TokenIssuance {
    pub fn new(
        asset_scale: u8,
        maximum_amount: Option<u64>,
        transfer_fee: u32,
        metadata: impl Into<Vec<u8>>,
        flags: u32,
    ) -> Result<Self, TransactionError> {
        if transfer_fee > MAX_TRANSFER_FEE {
            return Err(TransactionError::TransferFeeTooHigh(transfer_fee));
        }
        let metadata = metadata.into();
        if metadata.len() > MAX_METADATA_LEN {
            return Err(TransactionError::MetadataTooLong(metadata.len()));
        }
        if maximum_amount == Some(0) {
            return Err(TransactionError::ZeroAmount);
        }
        Ok(Self {
            asset_scale,
            maximum_amount,
            transfer_fee,
            metadata,
            flags,
        })
    }

    pub fn asset_scale(&self) -> u8 {
        self.asset_scale
    }

    pub fn transfer_fee(&self) -> u32 {
        self.transfer_fee
    }

    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }
}

/// Account settings update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountSet {
    domain: Option<String>,
}

impl AccountSet {
    pub fn new(domain: Option<&str>) -> Result<Self, TransactionError> {
        if let Some(domain) = domain {
            if domain.len() > MAX_DOMAIN_LEN {
                return Err(TransactionError::DomainTooLong(domain.len()));
            }
        }
        Ok(Self {
            domain: domain.map(str::to_string),
        })
    }
}

/// A transaction the wallet can sign, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerTransaction {
    Payment(Payment),
    TokenIssuance(TokenIssuance),
    AccountSet(AccountSet),
}

impl LedgerTransaction {
    pub fn payment(
        destination: &str,
        amount: u64,
        destination_tag: Option<u32>,
    ) -> Result<Self, TransactionError> {
        Payment::new(destination, amount, destination_tag).map(Self::Payment)
    }

    pub fn token_issuance(
        asset_scale: u8,
        maximum_amount: Option<u64>,
        transfer_fee: u32,
        metadata: impl Into<Vec<u8>>,
        flags: u32,
    ) -> Result<Self, TransactionError> {
        TokenIssuance::new(asset_scale, maximum_amount, transfer_fee, metadata, flags)
            .map(Self::TokenIssuance)
    }

    pub fn account_set(domain: Option<&str>) -> Result<Self, TransactionError> {
        AccountSet::new(domain).map(Self::AccountSet)
    }

    /// Wire name of the transaction type
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerTransaction::Payment(_) => "Payment",
            LedgerTransaction::TokenIssuance(_) => "MPTokenIssuanceCreate",
            LedgerTransaction::AccountSet(_) => "AccountSet",
        }
    }

    /// Build the unsigned JSON for `autofill`.
    pub fn to_json(&self, autofill: &Autofill) -> Result<Map<String, Value>, TransactionError> {
        let mut tx = Map::new();
        tx.insert("TransactionType".into(), self.kind().into());
        tx.insert("Account".into(), autofill.account.clone().into());
        tx.insert("Sequence".into(), autofill.sequence.into());
        tx.insert("Fee".into(), autofill.fee.to_string().into());
        tx.insert(
            "LastLedgerSequence".into(),
            autofill.last_ledger_sequence.into(),
        );

        match self {
            LedgerTransaction::Payment(payment) => {
                if payment.destination == autofill.account {
                    return Err(TransactionError::SelfPayment);
                }
                tx.insert("Destination".into(), payment.destination.clone().into());
                tx.insert("Amount".into(), payment.amount.to_string().into());
                if let Some(tag) = payment.destination_tag {
                    tx.insert("DestinationTag".into(), tag.into());
                }
            }
            LedgerTransaction::TokenIssuance(issuance) => {
                tx.insert("AssetScale".into(), issuance.asset_scale.into());
                if let Some(maximum) = issuance.maximum_amount {
                    tx.insert("MaximumAmount".into(), maximum.to_string().into());
                }
                if issuance.transfer_fee > 0 {
                    tx.insert("TransferFee".into(), issuance.transfer_fee.into());
                }
                if !issuance.metadata.is_empty() {
                    tx.insert(
                        "MPTokenMetadata".into(),
                        hex::encode_upper(&issuance.metadata).into(),
                    );
                }
                tx.insert("Flags".into(), issuance.flags.into());
            }
            LedgerTransaction::AccountSet(set) => {
                if let Some(domain) = &set.domain {
                    tx.insert("Domain".into(), hex::encode_upper(domain.as_bytes()).into());
                }
            }
        }

        Ok(tx)
    }
}

/// Fields the ledger client fills in before signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Autofill {
    pub account: String,
    pub sequence: u32,
    pub fee: u64,
    pub last_ledger_sequence: u32,
}

/// A signed, submittable transaction
#[derive(Debug, Clone)]
pub struct SignedBlob {
    pub tx_blob: String,
    pub hash: String,
    pub tx_json: Map<String, Value>,
}

/// Outcome of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransactionResult {
    pub hash: String,
    pub success: bool,
    pub result_code: String,
}

impl SignedTransactionResult {
    pub fn from_code(hash: String, result_code: String) -> Self {
        Self {
            success: result_code == SUCCESS_CODE,
            hash,
            result_code,
        }
    }
}

fn signing_payload(tx: &Map<String, Value>) -> Result<Vec<u8>, TransactionError> {
    let mut payload = SIGNING_PREFIX.to_vec();
    payload.extend_from_slice(&codec::encode_for_signing(tx)?);
    Ok(payload)
}

/// Hash of a signed blob, upper-case hex
pub fn transaction_hash(tx_blob: &str) -> Result<String, TransactionError> {
    let bytes = hex::decode(tx_blob).map_err(|e| TransactionError::MalformedBlob(e.to_string()))?;
    Ok(hex::encode_upper(sha512_half(&[HASH_PREFIX, bytes.as_slice()])))
}

/// Sign a filled-in transaction with the account key.
pub fn sign(mut tx: Map<String, Value>, keys: &WalletKeys) -> Result<SignedBlob, TransactionError> {
    tx.insert("SigningPubKey".into(), keys.public_key_hex().into());
    let signature = keys.sign(&signing_payload(&tx)?);
    tx.insert("TxnSignature".into(), hex::encode_upper(signature).into());

    let tx_blob = hex::encode_upper(codec::encode(&tx)?);
    let hash = transaction_hash(&tx_blob)?;
    Ok(SignedBlob {
        tx_blob,
        hash,
        tx_json: tx,
    })
}

/// Decode a blob and check its signature against its own SigningPubKey.
pub fn verify_blob(tx_blob: &str) -> Result<Map<String, Value>, TransactionError> {
    let bytes = hex::decode(tx_blob).map_err(|e| TransactionError::MalformedBlob(e.to_string()))?;
    let tx = codec::decode(&bytes)?;

    let field = |name: &str| {
        tx.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| TransactionError::MalformedBlob(format!("missing {}", name)))
    };
    let public_key = field("SigningPubKey")?;
    let signature = hex::decode(field("TxnSignature")?)
        .map_err(|e| TransactionError::MalformedBlob(e.to_string()))?;

    match keys::verify(public_key, &signing_payload(&tx)?, &signature) {
        Ok(true) => Ok(tx),
        Ok(false) => Err(TransactionError::MalformedBlob("bad signature".into())),
        Err(e) => Err(TransactionError::MalformedBlob(e.to_string())),
    }
}

/// Format drops as a display amount
pub fn format_amount(drops: u64) -> String {
    format!(
        "{}.{:06} {}",
        drops / DROPS_PER_UNIT,
        drops % DROPS_PER_UNIT,
        NATIVE_SYMBOL
    )
}

/// Parse a display amount (e.g. `"1.5"` or `"1.5 LMK"`) to drops
pub fn parse_amount(amount: &str) -> Result<u64, TransactionError> {
    let invalid = || TransactionError::InvalidAmount(amount.to_string());
    let value = amount.trim().trim_end_matches(NATIVE_SYMBOL).trim();

    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.len() > 6 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let fraction: u64 = format!("{:0<6}", fraction).parse().map_err(|_| invalid())?;

    whole
        .checked_mul(DROPS_PER_UNIT)
        .and_then(|drops| drops.checked_add(fraction))
        .ok_or_else(invalid)
}
