//! JSON-RPC 2.0 ledger client

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use super::{Commitment, ConfirmOutcome, FeeSample, LedgerClient, LedgerError, SubmitOptions};

pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    #[serde(default)]
    confirmation_status: Option<Commitment>,
    #[serde(default)]
    err: Option<Value>,
}

#[derive(Debug)]
pub struct RpcLedgerClient {
    url: Url,
    client: reqwest::Client,
    request_id: AtomicU64,
    confirm_timeout: Duration,
    poll_interval: Duration,
    /// Commitment used for height reads
    read_commitment: Commitment,
}

impl RpcLedgerClient {
    pub fn new(url: Url) -> Self {
        Self::with_client(url, reqwest::Client::new())
    }

    pub fn with_client(url: Url, client: reqwest::Client) -> Self {
        Self {
            url,
            client,
            request_id: AtomicU64::new(1),
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_commitment: Commitment::Confirmed,
        }
    }

    /// Give up on a confirmation after `timeout`
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<T, LedgerError> {
        let id = self.next_id();
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::trace!(method, id, "-> ledger");

        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::Transport { context: method, source: e })?;
        let body = response
            .bytes()
            .await
            .map_err(|e| LedgerError::Transport { context: method, source: e })?;

        tracing::trace!(method, id, len = body.len(), "<- ledger");

        let rpc: RpcResponse = serde_json::from_slice(&body)
            .map_err(|e| LedgerError::Decode { context: method, source: e })?;
        if let Some(error) = rpc.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = rpc.result.ok_or(LedgerError::EmptyResponse(method))?;
        serde_json::from_value(result).map_err(|e| LedgerError::Decode { context: method, source: e })
    }

    async fn signature_status(&self, id: &str) -> Result<Option<SignatureStatus>, LedgerError> {
        let statuses: RpcContext<Vec<Option<SignatureStatus>>> = self
            .call(
                "getSignatureStatuses",
                json!([[id], { "searchTransactionHistory": false }]),
            )
            .await?;
        Ok(statuses.value.into_iter().next().flatten())
    }

    async fn poll_until(&self, id: &str, commitment: Commitment) -> Result<ConfirmOutcome, LedgerError> {
        loop {
            if let Some(status) = self.signature_status(id).await? {
                if let Some(err) = status.err.filter(|e| !e.is_null()) {
                    return Ok(ConfirmOutcome {
                        execution_error: Some(err.to_string()),
                    });
                }
                if let Some(reached) = status.confirmation_status
                    && reached >= commitment
                {
                    return Ok(ConfirmOutcome::default());
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn current_height(&self) -> Result<u64, LedgerError> {
        self.call(
            "getBlockHeight",
            json!([{ "commitment": self.read_commitment.as_str() }]),
        )
        .await
    }

    async fn submit(&self, signed: &[u8], options: SubmitOptions) -> Result<String, LedgerError> {
        let id: String = self
            .call(
                "sendTransaction",
                json!([
                    b64.encode(signed),
                    {
                        "encoding": "base64",
                        "skipPreflight": !options.preflight,
                        "preflightCommitment": options.commitment.as_str(),
                    }
                ]),
            )
            .await?;
        tracing::debug!(%id, "transaction sent");
        Ok(id)
    }

    async fn confirm(&self, id: &str, commitment: Commitment) -> Result<ConfirmOutcome, LedgerError> {
        tokio::time::timeout(self.confirm_timeout, self.poll_until(id, commitment))
            .await
            .map_err(|_| LedgerError::Timeout(self.confirm_timeout))?
    }

    async fn recent_fee_samples(&self) -> Result<Vec<FeeSample>, LedgerError> {
        self.call("getRecentPrioritizationFees", json!([])).await
    }
}
