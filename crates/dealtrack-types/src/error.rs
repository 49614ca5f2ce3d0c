//! Error types for dealtrack.
//!
//! All errors use the `DT_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Lookup errors (something referenced is absent)
//! - 2xx: Validation errors (structural mismatch, never retried)
//! - 3xx: Execution errors (on-chain non-success exit)
//! - 4xx: Batch publication errors
//! - 5xx: Confirmation watch errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{Address, DealId, ExitCode, MessageId, MethodNum};

/// Central error enum for all dealtrack operations.
#[derive(Debug, Error)]
pub enum DealtrackError {
    // =================================================================
    // Lookup Errors (1xx)
    // =================================================================
    /// The referenced message is unknown to the chain.
    #[error("DT_ERR_100: Message not found: {0}")]
    MessageNotFound(MessageId),

    /// The deal does not exist in market state.
    #[error("DT_ERR_101: Deal not found: {0}")]
    DealNotFound(DealId),

    /// The actor (miner, account) does not exist in state.
    #[error("DT_ERR_102: Actor not found: {0}")]
    ActorNotFound(Address),

    /// A chain collaborator failed (RPC, state load, pool rejection).
    #[error("DT_ERR_103: Chain error during {operation}: {reason}")]
    Chain { operation: String, reason: String },

    // =================================================================
    // Validation Errors (2xx)
    // =================================================================
    /// Message was sent by someone other than the expected party.
    #[error("DT_ERR_200: Wrong sender: expected {expected}, got {actual}")]
    WrongSender { expected: Address, actual: Address },

    /// Message was addressed to the wrong actor.
    #[error("DT_ERR_201: Wrong recipient: expected {expected}, got {actual}")]
    WrongRecipient { expected: Address, actual: Address },

    /// Message invoked the wrong method.
    #[error("DT_ERR_202: Wrong method: expected {expected}, got {actual}")]
    WrongMethod { expected: MethodNum, actual: MethodNum },

    /// A token amount was out of range.
    #[error("DT_ERR_203: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// The wallet holds no key for this address.
    #[error("DT_ERR_205: No key for address {0}")]
    UnknownAccount(Address),

    // =================================================================
    // Execution Errors (3xx)
    // =================================================================
    /// A message executed with a non-zero exit code.
    #[error("DT_ERR_300: {operation} failed on chain: {message} exit={exit_code}")]
    ExecutionFailed {
        operation: String,
        message: MessageId,
        exit_code: ExitCode,
    },

    // =================================================================
    // Batch Publication Errors (4xx)
    // =================================================================
    /// The publish message did not contain our proposal.
    #[error("DT_ERR_400: Deal publish didn't contain our deal (message: {message})")]
    NotInBatch { message: MessageId },

    /// The publish message executed with a non-zero exit code.
    #[error("DT_ERR_401: Deal publish failed: {message} exit={exit_code}")]
    PublishFailed {
        message: MessageId,
        exit_code: ExitCode,
    },

    /// The publish receipt is inconsistent with its batch.
    #[error("DT_ERR_402: Malformed publish receipt: {reason}")]
    MalformedReceipt { reason: String },

    // =================================================================
    // Confirmation Watch Errors (5xx)
    // =================================================================
    /// Chain state contradicts what the observed messages imply.
    #[error("DT_ERR_500: Contradictory chain state: {reason}")]
    ContradictoryState { reason: String },

    /// The watch fell behind the block feed and missed events.
    #[error("DT_ERR_501: Watch lagged behind block feed, skipped {skipped} events")]
    FeedLagged { skipped: u64 },

    /// The block feed shut down before the watch finished.
    #[error("DT_ERR_502: Block feed closed")]
    FeedClosed,

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("DT_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("DT_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("DT_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// Another error with the operation and identifiers it happened under.
    #[error("{source} ({context})")]
    Context {
        context: String,
        source: Box<DealtrackError>,
    },
}

/// Coarse classification of a [`DealtrackError`], independent of context
/// wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    NotInBatch,
    ExecutionFailure,
    MalformedReceipt,
    Watch,
    Chain,
    Internal,
}

impl DealtrackError {
    /// Wrap this error with a description of what was being done.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with all context layers stripped.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::MessageNotFound(_) | Self::DealNotFound(_) | Self::ActorNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::WrongSender { .. }
            | Self::WrongRecipient { .. }
            | Self::WrongMethod { .. }
            | Self::InvalidAmount { .. }
            | Self::UnknownAccount(_) => ErrorKind::Validation,
            Self::NotInBatch { .. } => ErrorKind::NotInBatch,
            Self::ExecutionFailed { .. } | Self::PublishFailed { .. } => {
                ErrorKind::ExecutionFailure
            }
            Self::MalformedReceipt { .. } => ErrorKind::MalformedReceipt,
            Self::ContradictoryState { .. } | Self::FeedLagged { .. } | Self::FeedClosed => {
                ErrorKind::Watch
            }
            Self::Chain { .. } => ErrorKind::Chain,
            Self::Internal(_)
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::Context { .. } => ErrorKind::Internal,
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, DealtrackError>;

/// Attach context to the error side of a [`Result`].
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|err| err.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|err| err.context(f()))
    }
}

impl From<serde_json::Error> for DealtrackError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
