//! Distributed ledger access
//!
//! [`LedgerClient`] is the seam between the submission layer and whatever
//! talks to the chain; [`rpc::RpcLedgerClient`] is the JSON-RPC implementation.

pub mod fees;
pub mod rpc;
pub mod submit;

use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

pub use fees::suggest_priority_fee;
pub use rpc::RpcLedgerClient;
pub use submit::{SubmissionPolicy, SubmitError, TransactionSubmitter};

/// How settled a transaction must be before it counts as confirmed.
///
/// Ordered from weakest to strongest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Simulate before broadcasting
    pub preflight: bool,
    pub commitment: Commitment,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            preflight: true,
            commitment: Commitment::default(),
        }
    }
}

/// Result of waiting for a transaction to reach a commitment level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmOutcome {
    /// Set when the transaction landed but its execution failed
    pub execution_error: Option<String>,
}

impl ConfirmOutcome {
    pub fn succeeded(&self) -> bool {
        self.execution_error.is_none()
    }
}

/// One recent priority-fee observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSample {
    pub slot: u64,
    #[serde(rename = "prioritizationFee")]
    pub fee: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger transport error: {context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unexpected ledger response: {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("ledger response for {0} had neither result nor error")]
    EmptyResponse(&'static str),
    #[error("transaction execution failed: {0}")]
    Execution(String),
    #[error("timed out after {0:?} waiting for the ledger")]
    Timeout(Duration),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Transport { .. } => ErrorKind::Network,
            LedgerError::Timeout(_) => ErrorKind::Timeout,
            LedgerError::Rpc { .. }
            | LedgerError::Decode { .. }
            | LedgerError::EmptyResponse(_)
            | LedgerError::Execution(_) => ErrorKind::Ledger,
        }
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current block height at the client's default commitment
    async fn current_height(&self) -> Result<u64, LedgerError>;

    /// Broadcast a signed transaction, returning its id
    async fn submit(&self, signed: &[u8], options: SubmitOptions) -> Result<String, LedgerError>;

    /// Wait until `id` reaches `commitment`
    async fn confirm(&self, id: &str, commitment: Commitment)
        -> Result<ConfirmOutcome, LedgerError>;

    async fn recent_fee_samples(&self) -> Result<Vec<FeeSample>, LedgerError>;
}

#[async_trait]
impl<T: LedgerClient + ?Sized> LedgerClient for Arc<T> {
    async fn current_height(&self) -> Result<u64, LedgerError> {
        self.as_ref().current_height().await
    }

    async fn submit(&self, signed: &[u8], options: SubmitOptions) -> Result<String, LedgerError> {
        self.as_ref().submit(signed, options).await
    }

    async fn confirm(
        &self,
        id: &str,
        commitment: Commitment,
    ) -> Result<ConfirmOutcome, LedgerError> {
        self.as_ref().confirm(id, commitment).await
    }

    async fn recent_fee_samples(&self) -> Result<Vec<FeeSample>, LedgerError> {
        self.as_ref().recent_fee_samples().await
    }
}
