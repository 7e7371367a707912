//! Wallet abstraction and a minimal secp256k1 implementation using k256
//!
//! The payment flow only needs two capabilities from a wallet: signing an
//! arbitrary message (the payment claim) and signing a transaction (the swap
//! produced by a premium build). [`LocalWallet`] implements both from a raw
//! private key; [`WatchOnlyWallet`] knows an address but cannot sign.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, B256, keccak256};
use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, SigningKey, VerifyingKey};

use crate::error::ErrorKind;

/// Length of a recoverable signature: r (32) || s (32) || v (1)
pub const SIGNATURE_LEN: usize = 65;

/// Something that holds keys on behalf of the payer
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Whether the wallet is currently able to serve requests.
    ///
    /// Being connected does not imply the wallet can sign: a
    /// [`WatchOnlyWallet`] is connected, and its signing calls return
    /// [`WalletError::SigningUnsupported`].
    fn connected(&self) -> bool;

    /// The payer address, as it appears on the wire
    fn address(&self) -> String;

    /// Sign an arbitrary message (EIP-191 personal message for [`LocalWallet`])
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, WalletError>;

    /// Sign an unsigned transaction, returning the signed bytes
    async fn sign_transaction(&self, transaction: &[u8]) -> Result<Vec<u8>, WalletError>;
}

/// Errors that can occur during wallet operations
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Wallet is not connected")]
    NotConnected,
    #[error("Wallet does not support signing")]
    SigningUnsupported,
    #[error("Invalid private key")]
    InvalidKey,
    #[error("Invalid hex string")]
    InvalidHex,
    #[error("Signing failed")]
    SigningFailed,
    #[error("Invalid signature format")]
    InvalidSignature,
    #[error("Signature recovery failed")]
    RecoveryFailed,
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::NotConnected
            | WalletError::SigningUnsupported
            | WalletError::SigningFailed => ErrorKind::SigningUnsupported,
            WalletError::InvalidKey | WalletError::InvalidHex => ErrorKind::Configuration,
            WalletError::InvalidSignature | WalletError::RecoveryFailed => {
                ErrorKind::MalformedAuthorization
            }
        }
    }
}

// ============================================================================
// LocalWallet
// ============================================================================

/// A private key held in process memory
#[derive(Clone)]
pub struct LocalWallet {
    /// The underlying secp256k1 signing key
    key: SigningKey,
    /// Cached address (derived from public key)
    address: Address,
}

impl LocalWallet {
    /// Create a new wallet from a signing key
    pub fn new(key: SigningKey) -> Self {
        let address = address_from_verifying_key(key.verifying_key());
        Self { key, address }
    }

    /// Generate a random private key
    pub fn random() -> Self {
        loop {
            // A uniformly random 32-byte string is a valid scalar with overwhelming probability
            let bytes: [u8; 32] = rand::random();
            if let Ok(key) = SigningKey::from_slice(&bytes) {
                return Self::new(key);
            }
        }
    }

    /// Create a wallet from raw bytes (32 bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        let key = SigningKey::from_slice(bytes).map_err(|_| WalletError::InvalidKey)?;
        Ok(Self::new(key))
    }

    /// The address as a typed value
    pub fn evm_address(&self) -> Address {
        self.address
    }

    /// Get the raw private key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.key.to_bytes().into()
    }

    /// Sign a 32-byte hash, returning r || s || v with v = 27 + recovery id
    pub fn sign_hash_sync(&self, hash: &B256) -> Result<[u8; SIGNATURE_LEN], WalletError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|_| WalletError::SigningFailed)?;

        let mut sig_bytes = [0u8; SIGNATURE_LEN];
        sig_bytes[..64].copy_from_slice(&signature.to_bytes());
        sig_bytes[64] = recovery_id.to_byte() + 27;
        Ok(sig_bytes)
    }
}

impl FromStr for LocalWallet {
    type Err = WalletError;

    /// Parse a hex private key, with or without 0x prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| WalletError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    fn connected(&self) -> bool {
        true
    }

    fn address(&self) -> String {
        self.address.to_string()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, WalletError> {
        let hash = eip191_hash(message);
        Ok(self.sign_hash_sync(&hash)?.to_vec())
    }

    /// Produces `signature(keccak256(tx)) || tx`.
    async fn sign_transaction(&self, transaction: &[u8]) -> Result<Vec<u8>, WalletError> {
        let hash = keccak256(transaction);
        let signature = self.sign_hash_sync(&hash)?;
        let mut signed = Vec::with_capacity(SIGNATURE_LEN + transaction.len());
        signed.extend_from_slice(&signature);
        signed.extend_from_slice(transaction);
        Ok(signed)
    }
}

// ============================================================================
// WatchOnlyWallet
// ============================================================================

/// An address without a key. Every signing request fails fast.
#[derive(Debug, Clone)]
pub struct WatchOnlyWallet {
    address: String,
}

impl WatchOnlyWallet {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Wallet for WatchOnlyWallet {
    fn connected(&self) -> bool {
        true
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    async fn sign_message(&self, _message: &[u8]) -> Result<Vec<u8>, WalletError> {
        Err(WalletError::SigningUnsupported)
    }

    async fn sign_transaction(&self, _transaction: &[u8]) -> Result<Vec<u8>, WalletError> {
        Err(WalletError::SigningUnsupported)
    }
}

// ============================================================================
// Hashing and recovery
// ============================================================================

/// EIP-191 personal message hash:
/// keccak256("\x19Ethereum Signed Message:\n" || len(message) || message)
pub fn eip191_hash(message: &[u8]) -> B256 {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut data = Vec::with_capacity(prefix.len() + message.len());
    data.extend_from_slice(prefix.as_bytes());
    data.extend_from_slice(message);
    keccak256(&data)
}

/// Derive an address from a verifying (public) key
fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    // Uncompressed public key is 0x04 || x || y; hash the 64 coordinate bytes
    let public_key = key.to_encoded_point(false);
    let hash = keccak256(&public_key.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Recover the signer address from a 65-byte signature over `hash`
pub fn recover_address(signature: &[u8], hash: &B256) -> Result<Address, WalletError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(WalletError::InvalidSignature);
    }

    let sig = k256::ecdsa::Signature::from_slice(&signature[..64])
        .map_err(|_| WalletError::InvalidSignature)?;

    // v is 27/28 on the wire, recovery ids are 0/1
    let v = signature[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recid = RecoveryId::from_byte(recovery_byte).ok_or(WalletError::RecoveryFailed)?;

    let recovered = VerifyingKey::recover_from_prehash(hash.as_slice(), &sig, recid)
        .map_err(|_| WalletError::RecoveryFailed)?;

    Ok(address_from_verifying_key(&recovered))
}

/// Recover the signer of an EIP-191 personal message
pub fn recover_message_signer(message: &[u8], signature: &[u8]) -> Result<Address, WalletError> {
    recover_address(signature, &eip191_hash(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_wallet() {
        let wallet = LocalWallet::random();
        assert_ne!(wallet.evm_address(), Address::ZERO);
    }

    #[test]
    fn test_from_hex() {
        let hex_key = "0000000000000000000000000000000000000000000000000000000000000001";
        let wallet: LocalWallet = hex_key.parse().unwrap();

        // Known address for private key = 1 (checksummed format)
        assert_eq!(wallet.address(), "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf");
    }

    #[test]
    fn test_rejects_bad_hex() {
        assert!(matches!("0xzz".parse::<LocalWallet>(), Err(WalletError::InvalidHex)));
        assert!(matches!("0x00".parse::<LocalWallet>(), Err(WalletError::InvalidKey)));
    }

    #[tokio::test]
    async fn test_sign_message_recovers_to_address() {
        let wallet = LocalWallet::random();
        let signature = wallet.sign_message(b"pay 5000").await.unwrap();
        assert_eq!(signature.len(), SIGNATURE_LEN);

        let recovered = recover_message_signer(b"pay 5000", &signature).unwrap();
        assert_eq!(recovered, wallet.evm_address());

        let other = recover_message_signer(b"pay 5001", &signature).unwrap();
        assert_ne!(other, wallet.evm_address());
    }

    #[tokio::test]
    async fn test_sign_transaction_prefixes_signature() {
        let wallet = LocalWallet::random();
        let signed = wallet.sign_transaction(b"unsigned-tx").await.unwrap();
        assert_eq!(&signed[SIGNATURE_LEN..], b"unsigned-tx");

        let recovered = recover_address(&signed[..SIGNATURE_LEN], &keccak256(b"unsigned-tx")).unwrap();
        assert_eq!(recovered, wallet.evm_address());
    }

    #[tokio::test]
    async fn test_watch_only_cannot_sign() {
        let wallet = WatchOnlyWallet::new("0x1111111111111111111111111111111111111111");
        assert!(wallet.connected());
        let err = wallet.sign_message(b"hello").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SigningUnsupported);
        assert!(wallet.sign_transaction(b"tx").await.is_err());
    }
}
