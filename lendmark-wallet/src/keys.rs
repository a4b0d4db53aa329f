//! Key Management
//!
//! Seed generation, ed25519 key derivation, ledger addresses and local
//! signing.
//!
//! A seed is 16 bytes of OS entropy, base58-encoded (ripple alphabet) with a
//! three byte family prefix and a four byte double-SHA-256 checksum, so every
//! encoded seed starts with `sEd`. The signing key is the SHA-512 half of the
//! entropy. The account id is RIPEMD-160 over SHA-256 of the 33-byte public
//! key. Addresses carry the same checksum scheme over a version-0 account id
//! and always start with `r`.
//!
//! Security: the encoded seed lives in a [`LockedSecret`] (memory-locked,
//! zeroed on drop) and is never included in `Debug` output.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::secmem::LockedSecret;

/// Family prefix for ed25519 seeds
const SEED_PREFIX: [u8; 3] = [0x01, 0xE1, 0x4B];

/// Version byte for account addresses
const ACCOUNT_VERSION: u8 = 0x00;

/// Bytes of seed entropy
const ENTROPY_LEN: usize = 16;

/// Bytes in an account id
const ACCOUNT_ID_LEN: usize = 20;

/// Public key type marker for ed25519 keys
const ED25519_MARKER: u8 = 0xED;

/// Domain prefix for off-ledger message signatures
const MESSAGE_PREFIX: &[u8] = b"MSG\0";

/// Key and address decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid base58 encoding")]
    Encoding,

    #[error("checksum mismatch")]
    Checksum,

    #[error("unexpected length: {0} bytes")]
    Length(usize),

    #[error("unexpected prefix")]
    Prefix,

    #[error("invalid public key")]
    PublicKey,

    #[error("invalid signature encoding")]
    Signature,
}

/// First 32 bytes of SHA-512 over the concatenated parts.
pub fn sha512_half(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[..4]);
    out
}

fn encode_checked(payload: &[u8]) -> String {
    let mut data = Zeroizing::new(Vec::with_capacity(payload.len() + 4));
    data.extend_from_slice(payload);
    data.extend_from_slice(&checksum(payload));
    bs58::encode(data.as_slice())
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .into_string()
}

fn decode_checked(encoded: &str) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    let data = Zeroizing::new(
        bs58::decode(encoded.trim())
            .with_alphabet(bs58::Alphabet::RIPPLE)
            .into_vec()
            .map_err(|_| KeyError::Encoding)?,
    );
    if data.len() < 5 {
        return Err(KeyError::Length(data.len()));
    }
    let (payload, sum) = data.split_at(data.len() - 4);
    if checksum(payload).as_slice() != sum {
        return Err(KeyError::Checksum);
    }
    Ok(Zeroizing::new(payload.to_vec()))
}

/// Decode a ledger address into its 20-byte account id.
pub fn decode_address(address: &str) -> Result<[u8; ACCOUNT_ID_LEN], KeyError> {
    let payload = decode_checked(address)?;
    if payload.len() != ACCOUNT_ID_LEN + 1 {
        return Err(KeyError::Length(payload.len()));
    }
    if payload[0] != ACCOUNT_VERSION {
        return Err(KeyError::Prefix);
    }
    let mut id = [0u8; ACCOUNT_ID_LEN];
    id.copy_from_slice(&payload[1..]);
    Ok(id)
}

/// Check whether a string is a well-formed ledger address.
pub fn is_valid_address(address: &str) -> bool {
    decode_address(address).is_ok()
}

/// Account id for a 33-byte public key: RIPEMD-160(SHA-256(key)).
pub fn account_id(public_key: &[u8]) -> [u8; ACCOUNT_ID_LEN] {
    let digest = Ripemd160::digest(Sha256::digest(public_key));
    let mut id = [0u8; ACCOUNT_ID_LEN];
    id.copy_from_slice(&digest);
    id
}

/// Encode a 20-byte account id as an `r` address.
pub fn encode_address(account_id: &[u8; ACCOUNT_ID_LEN]) -> String {
    let mut payload = [0u8; ACCOUNT_ID_LEN + 1];
    payload[0] = ACCOUNT_VERSION;
    payload[1..].copy_from_slice(account_id);
    encode_checked(&payload)
}

/// Derive the address for a 33-byte public key.
pub fn address_from_public_key(public_key: &[u8; 33]) -> String {
    encode_address(&account_id(public_key))
}

/// Validate a seed string without keeping the derived keys.
pub fn validate_seed(seed: &str) -> Result<(), KeyError> {
    decode_seed(seed).map(|_| ())
}

fn decode_seed(seed: &str) -> Result<Zeroizing<[u8; ENTROPY_LEN]>, KeyError> {
    let payload = decode_checked(seed)?;
    if payload.len() != SEED_PREFIX.len() + ENTROPY_LEN {
        return Err(KeyError::Length(payload.len()));
    }
    if payload[..SEED_PREFIX.len()] != SEED_PREFIX {
        return Err(KeyError::Prefix);
    }
    let mut entropy = Zeroizing::new([0u8; ENTROPY_LEN]);
    entropy.copy_from_slice(&payload[SEED_PREFIX.len()..]);
    Ok(entropy)
}

fn encode_seed(entropy: &[u8; ENTROPY_LEN]) -> LockedSecret {
    let mut payload = Zeroizing::new([0u8; SEED_PREFIX.len() + ENTROPY_LEN]);
    payload[..SEED_PREFIX.len()].copy_from_slice(&SEED_PREFIX);
    payload[SEED_PREFIX.len()..].copy_from_slice(entropy);
    LockedSecret::new(encode_checked(payload.as_slice()))
}

/// Wallet keys derived from a seed.
#[derive(Clone)]
pub struct WalletKeys {
    seed: LockedSecret,
    signing_key: SigningKey,
    public_key: [u8; 33],
    address: String,
}

impl WalletKeys {
    /// Generate a wallet from fresh OS entropy
    pub fn generate() -> Self {
        let mut entropy = Zeroizing::new([0u8; ENTROPY_LEN]);
        OsRng.fill_bytes(entropy.as_mut_slice());
        Self::from_entropy(&entropy, encode_seed(&entropy))
    }

    /// Restore a wallet from an encoded seed
    pub fn from_seed(seed: &str) -> Result<Self, KeyError> {
        let entropy = decode_seed(seed)?;
        Ok(Self::from_entropy(&entropy, LockedSecret::new(seed.trim())))
    }

    fn from_entropy(entropy: &[u8; ENTROPY_LEN], seed: LockedSecret) -> Self {
        let secret = Zeroizing::new(sha512_half(&[entropy.as_slice()]));
        let signing_key = SigningKey::from_bytes(&secret);

        let mut public_key = [0u8; 33];
        public_key[0] = ED25519_MARKER;
        public_key[1..].copy_from_slice(signing_key.verifying_key().as_bytes());

        Self {
            seed,
            signing_key,
            address: address_from_public_key(&public_key),
            public_key,
        }
    }

    /// The encoded seed. Handle with care.
    pub fn seed(&self) -> &str {
        self.seed.expose()
    }

    /// Classic ledger address (`r...`)
    pub fn address(&self) -> &str {
        &self.address
    }

    /// 33-byte public key (type marker + ed25519 key)
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public_key
    }

    /// Upper-case hex public key, the form the ledger expects
    pub fn public_key_hex(&self) -> String {
        hex::encode_upper(self.public_key)
    }

    /// Sign raw bytes with the account key
    pub fn sign(&self, payload: &[u8]) -> [u8; 64] {
        self.signing_key.sign(payload).to_bytes()
    }

    /// Sign an off-ledger message (domain separated from transactions)
    pub fn sign_message(&self, message: &[u8]) -> [u8; 64] {
        let mut payload = Vec::with_capacity(MESSAGE_PREFIX.len() + message.len());
        payload.extend_from_slice(MESSAGE_PREFIX);
        payload.extend_from_slice(message);
        self.sign(&payload)
    }

    /// Returns true if the seed buffer is pinned in RAM.
    pub fn is_memory_locked(&self) -> bool {
        self.seed.is_locked()
    }
}

impl fmt::Debug for WalletKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletKeys")
            .field("address", &self.address)
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Verify a signature made by [`WalletKeys::sign`].
pub fn verify(public_key_hex: &str, payload: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
    let bytes = hex::decode(public_key_hex).map_err(|_| KeyError::PublicKey)?;
    if bytes.len() != 33 || bytes[0] != ED25519_MARKER {
        return Err(KeyError::PublicKey);
    }
    let mut raw = [0u8; 32];
    raw.copy_from_slice(&bytes[1..]);
    let key = VerifyingKey::from_bytes(&raw).map_err(|_| KeyError::PublicKey)?;
    let signature = Signature::from_slice(signature).map_err(|_| KeyError::Signature)?;
    Ok(key.verify(payload, &signature).is_ok())
}

/// Verify a signature made by [`WalletKeys::sign_message`].
pub fn verify_message(public_key_hex: &str, message: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
    let mut payload = MESSAGE_PREFIX.to_vec();
    payload.extend_from_slice(message);
    verify(public_key_hex, &payload, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_wallet() {
        let keys = WalletKeys::generate();

        assert!(keys.seed().starts_with("sEd"));
        assert!(keys.address().starts_with('r'));
        assert!(is_valid_address(keys.address()));
        assert_eq!(keys.public_key_bytes()[0], 0xED);
        assert_eq!(keys.public_key_hex().len(), 66);
    }

    #[test]
    fn test_restore_is_deterministic() {
        let keys = WalletKeys::generate();
        let restored = WalletKeys::from_seed(keys.seed()).unwrap();
        let again = WalletKeys::from_seed(keys.seed()).unwrap();

        assert_eq!(keys.address(), restored.address());
        assert_eq!(restored.public_key_bytes(), again.public_key_bytes());
        assert_eq!(keys.seed(), restored.seed());
    }

    #[test]
    fn test_known_seed_vector() {
        let keys = WalletKeys::from_seed("sEdTM1uX8pu2do5XvTnutH6HsouMaM2").unwrap();
        assert_eq!(keys.address(), "rG31cLyErnqeVj2eomEjBZtq7PYaupGYzL");
        assert!(keys.public_key_hex().starts_with("ED"));
    }

    #[test]
    fn test_address_round_trips_account_id() {
        let keys = WalletKeys::generate();
        let id = account_id(&keys.public_key_bytes());
        assert_eq!(decode_address(keys.address()).unwrap(), id);
        assert_eq!(encode_address(&id), keys.address());
    }

    #[test]
    fn test_distinct_seeds_distinct_addresses() {
        let a = WalletKeys::generate();
        let b = WalletKeys::generate();
        assert_ne!(a.seed(), b.seed());
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn test_invalid_seeds() {
        assert_eq!(WalletKeys::from_seed("").unwrap_err(), KeyError::Length(0));
        assert_eq!(
            WalletKeys::from_seed("not base58 0OIl").unwrap_err(),
            KeyError::Encoding
        );

        // An address is well-formed base58check but not a seed
        let keys = WalletKeys::generate();
        assert!(WalletKeys::from_seed(keys.address()).is_err());
    }

    #[test]
    fn test_corrupted_seed_fails_checksum() {
        let keys = WalletKeys::generate();
        let mut chars: Vec<char> = keys.seed().chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'r' { 'p' } else { 'r' };
        let corrupted: String = chars.into_iter().collect();

        assert!(validate_seed(&corrupted).is_err());
    }

    #[test]
    fn test_address_validation() {
        let keys = WalletKeys::generate();
        assert!(is_valid_address(keys.address()));
        assert!(!is_valid_address(keys.seed()));
        assert!(!is_valid_address("rNotAnAddress"));
        assert_eq!(decode_address(keys.address()).unwrap().len(), 20);
    }

    #[test]
    fn test_sign_and_verify() {
        let keys = WalletKeys::generate();
        let signature = keys.sign(b"payload");

        assert!(verify(&keys.public_key_hex(), b"payload", &signature).unwrap());
        assert!(!verify(&keys.public_key_hex(), b"tampered", &signature).unwrap());
    }

    #[test]
    fn test_message_signature_is_domain_separated() {
        let keys = WalletKeys::generate();
        let signature = keys.sign_message(b"hello");

        assert!(verify_message(&keys.public_key_hex(), b"hello", &signature).unwrap());
        assert!(!verify(&keys.public_key_hex(), b"hello", &signature).unwrap());
    }

    #[test]
    fn test_debug_hides_seed() {
        let keys = WalletKeys::generate();
        let debug = format!("{:?}", keys);
        assert!(!debug.contains(keys.seed()));
        assert!(debug.contains(keys.address()));
    }
}
