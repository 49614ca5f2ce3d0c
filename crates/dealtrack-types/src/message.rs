//! On-chain messages and their execution receipts.
//!
//! Parameters and return values are carried as opaque byte strings. The
//! helpers here encode them as JSON; the chain client is free to re-encode as
//! long as decoding round-trips.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

use crate::{Address, MessageId, Result, TokenAmount};

/// Method selector on the receiving actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MethodNum(pub u64);

impl fmt::Display for MethodNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method:{}", self.0)
    }
}

/// Method numbers of the built-in actors this crate talks to.
pub mod methods {
    use super::MethodNum;

    /// Storage market actor.
    pub mod market {
        use super::MethodNum;

        pub const ADD_BALANCE: MethodNum = MethodNum(2);
        pub const PUBLISH_STORAGE_DEALS: MethodNum = MethodNum(4);
    }

    /// Storage miner actor.
    pub mod miner {
        use super::MethodNum;

        pub const PRE_COMMIT_SECTOR: MethodNum = MethodNum(6);
        pub const PROVE_COMMIT_SECTOR: MethodNum = MethodNum(7);
    }
}

/// An unsigned on-chain message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub from: Address,
    pub to: Address,
    /// Sender nonce. Assigned by the message pool on push.
    pub nonce: u64,
    /// Tokens transferred along with the call.
    pub value: TokenAmount,
    pub gas_price: TokenAmount,
    pub gas_limit: u64,
    pub method: MethodNum,
    pub params: Vec<u8>,
}

impl Message {
    /// Content hash identifying this message.
    ///
    /// Format: `SHA-256("dealtrack:msg:v1:" || from || to || nonce || value || gas_price || gas_limit || method || len(params) || params)`
    #[must_use]
    pub fn id(&self) -> MessageId {
        let mut hasher = Sha256::new();
        hasher.update(b"dealtrack:msg:v1:");
        hasher.update(self.from.as_bytes());
        hasher.update(self.to.as_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(self.value.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.gas_price.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.gas_limit.to_le_bytes());
        hasher.update(self.method.0.to_le_bytes());
        hasher.update((self.params.len() as u64).to_le_bytes());
        hasher.update(&self.params);
        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        MessageId(id)
    }

    /// Decode the call parameters.
    ///
    /// # Errors
    /// Returns `Serialization` if the params do not decode as `T`.
    pub fn decode_params<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.params)?)
    }
}

/// Encode a value for use as message params or return data.
///
/// # Errors
/// Returns `Serialization` if `value` cannot be encoded.
pub fn encode_params<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Exit code of an executed message. Zero is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExitCode(pub u32);

impl ExitCode {
    pub const OK: Self = Self(0);

    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::OK
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of executing a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub exit_code: ExitCode,
    pub return_data: Vec<u8>,
    pub gas_used: u64,
}

impl MessageReceipt {
    #[must_use]
    pub fn success(return_data: Vec<u8>) -> Self {
        Self {
            exit_code: ExitCode::OK,
            return_data,
            gas_used: 0,
        }
    }

    #[must_use]
    pub fn failure(exit_code: ExitCode) -> Self {
        Self {
            exit_code,
            return_data: Vec::new(),
            gas_used: 0,
        }
    }

    /// Decode the return value.
    ///
    /// # Errors
    /// Returns `Serialization` if the return data does not decode as `T`.
    pub fn decode_return<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.return_data)?)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::DealtrackError;

    fn sample() -> Message {
        Message {
            from: Address([1u8; 32]),
            to: Address::actor(5),
            nonce: 0,
            value: Decimal::new(60, 0),
            gas_price: Decimal::ZERO,
            gas_limit: 1_000_000,
            method: methods::market::ADD_BALANCE,
            params: encode_params(&Address([1u8; 32])).unwrap(),
        }
    }

    #[test]
    fn message_id_is_content_addressed() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.id(), b.id());
        b.nonce = 1;
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn params_decode() {
        let msg = sample();
        let addr: Address = msg.decode_params().unwrap();
        assert_eq!(addr, Address([1u8; 32]));
    }

    #[test]
    fn garbage_params_fail_to_decode() {
        let mut msg = sample();
        msg.params = b"\x00\x01garbage".to_vec();
        let err = msg.decode_params::<Address>().unwrap_err();
        assert!(matches!(err, DealtrackError::Serialization(_)));
    }

    #[test]
    fn exit_code_success() {
        assert!(ExitCode::OK.is_success());
        assert!(!ExitCode(16).is_success());
        assert!(MessageReceipt::success(vec![]).exit_code.is_success());
    }
}
