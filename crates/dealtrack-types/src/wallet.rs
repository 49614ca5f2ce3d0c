//! Signing and signature verification.
//!
//! Account addresses are raw ed25519 public keys, so verification needs
//! nothing but the address. [`LocalWallet`] is an in-memory key store that
//! implements [`Signer`].

use std::{
    collections::HashMap,
    fmt,
    sync::{PoisonError, RwLock},
};

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::{Address, DealtrackError, Result};

/// Raw ed25519 signature bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig:{}", hex::encode(&self.0[..self.0.len().min(8)]))
    }
}

/// Produces signatures on behalf of accounts.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `data` with the key behind `account`.
    async fn sign(&self, account: &Address, data: &[u8]) -> Result<Signature>;

    /// The account used when the caller does not name one.
    async fn default_address(&self) -> Result<Address>;
}

/// Check `signature` over `data` against `account`'s public key.
///
/// Malformed keys or signatures verify as `false`.
#[must_use]
pub fn verify_signature(signature: &Signature, account: &Address, data: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(account.as_bytes()) else {
        return false;
    };
    let Ok(sig) = ed25519_dalek::Signature::from_slice(&signature.0) else {
        return false;
    };
    key.verify_strict(data, &sig).is_ok()
}

/// In-memory ed25519 key store.
pub struct LocalWallet {
    keys: RwLock<HashMap<Address, SigningKey>>,
    default: RwLock<Option<Address>>,
}

impl LocalWallet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            default: RwLock::new(None),
        }
    }

    /// Generate a fresh key and return its address. The first key becomes
    /// the default address.
    pub fn generate_key(&self) -> Address {
        self.insert(SigningKey::generate(&mut OsRng))
    }

    /// Import a key from its 32-byte secret.
    pub fn import_key(&self, secret: [u8; 32]) -> Address {
        self.insert(SigningKey::from_bytes(&secret))
    }

    /// Make `address` the default signer.
    ///
    /// # Errors
    /// Returns `UnknownAccount` if no key is held for `address`.
    pub fn set_default(&self, address: Address) -> Result<()> {
        if !self.has_key(&address) {
            return Err(DealtrackError::UnknownAccount(address));
        }
        *self.default.write().unwrap_or_else(PoisonError::into_inner) = Some(address);
        Ok(())
    }

    #[must_use]
    pub fn has_key(&self, address: &Address) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(address)
    }

    fn insert(&self, key: SigningKey) -> Address {
        let address = Address::from_pubkey(key.verifying_key().to_bytes());
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, key);
        self.default
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(address);
        address
    }
}

impl Default for LocalWallet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Signer for LocalWallet {
    async fn sign(&self, account: &Address, data: &[u8]) -> Result<Signature> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        let key = keys
            .get(account)
            .ok_or(DealtrackError::UnknownAccount(*account))?;
        Ok(Signature(key.sign(data).to_bytes().to_vec()))
    }

    async fn default_address(&self) -> Result<Address> {
        self.default
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| DealtrackError::Internal("wallet has no default address".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_and_verify() {
        let wallet = LocalWallet::new();
        let addr = wallet.generate_key();
        let sig = wallet.sign(&addr, b"hello").await.unwrap();
        assert!(verify_signature(&sig, &addr, b"hello"));
        assert!(!verify_signature(&sig, &addr, b"hellp"));
    }

    #[tokio::test]
    async fn wrong_account_does_not_verify() {
        let wallet = LocalWallet::new();
        let a = wallet.generate_key();
        let b = wallet.generate_key();
        let sig = wallet.sign(&a, b"data").await.unwrap();
        assert!(!verify_signature(&sig, &b, b"data"));
    }

    #[tokio::test]
    async fn unknown_account_cannot_sign() {
        let wallet = LocalWallet::new();
        let err = wallet.sign(&Address([9u8; 32]), b"x").await.unwrap_err();
        assert!(matches!(err, DealtrackError::UnknownAccount(_)));
    }

    #[tokio::test]
    async fn first_key_is_default() {
        let wallet = LocalWallet::new();
        assert!(wallet.default_address().await.is_err());
        let first = wallet.import_key([3u8; 32]);
        let second = wallet.generate_key();
        assert_eq!(wallet.default_address().await.unwrap(), first);
        wallet.set_default(second).unwrap();
        assert_eq!(wallet.default_address().await.unwrap(), second);
    }

    #[test]
    fn malformed_signature_is_rejected() {
        assert!(!verify_signature(
            &Signature(vec![1, 2, 3]),
            &Address([0u8; 32]),
            b"x"
        ));
        assert!(!verify_signature(
            &Signature(vec![0; 64]),
            &Address::actor(5),
            b"x"
        ));
    }
}
