//! Swap quote provider
//!
//! Quotes are opaque JSON handed back unchanged to the provider when the
//! swap transaction is built; only a few fields are read for display.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::error::ErrorKind;

pub const DEFAULT_QUOTE_API_URL: &str = "https://quote-api.jup.ag/v6";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in atomic units
    pub amount: u64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
}

fn default_slippage_bps() -> u16 {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quote(pub Value);

impl Quote {
    pub fn out_amount(&self) -> Option<u64> {
        self.0.get("outAmount")?.as_str()?.parse().ok()
    }

    pub fn price_impact_pct(&self) -> Option<&str> {
        self.0.get("priceImpactPct")?.as_str()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("quote API request failed: {context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("quote API returned {status}: {context}: {body}")]
    Status {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("quote API response was not understood: {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("swap response carried no transaction")]
    MissingTransaction,
    #[error("swap transaction is not valid base64: {0}")]
    Base64(#[source] base64::DecodeError),
    #[error("invalid quote API URL: {0}")]
    Url(#[source] url::ParseError),
}

impl QuoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuoteError::Transport { source, .. } if source.is_timeout() => ErrorKind::Timeout,
            QuoteError::Url(_) => ErrorKind::Configuration,
            _ => ErrorKind::Network,
        }
    }
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError>;

    /// Unsigned transaction bytes executing `quote` for `payer`
    async fn build_transaction(
        &self,
        quote: &Quote,
        payer: &str,
        priority_fee: Option<u64>,
    ) -> Result<Vec<u8>, QuoteError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: Option<String>,
}

/// Client for a Jupiter-style `/quote` + `/swap` HTTP API
#[derive(Debug, Clone)]
pub struct HttpQuoteProvider {
    quote_url: Url,
    swap_url: Url,
    client: reqwest::Client,
}

impl HttpQuoteProvider {
    pub fn new(base_url: &str, client: reqwest::Client) -> Result<Self, QuoteError> {
        let mut normalized = base_url.trim_end_matches('/').to_string();
        normalized.push('/');
        let base = Url::parse(&normalized).map_err(QuoteError::Url)?;
        Ok(Self {
            quote_url: base.join("./quote").map_err(QuoteError::Url)?,
            swap_url: base.join("./swap").map_err(QuoteError::Url)?,
            client,
        })
    }

    async fn read<R: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &'static str,
    ) -> Result<R, QuoteError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| QuoteError::Transport { context, source: e })?;
            return Err(QuoteError::Status { context, status, body });
        }
        response
            .json()
            .await
            .map_err(|e| QuoteError::Decode { context, source: e })
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        let context = "GET /quote";
        let response = self
            .client
            .get(self.quote_url.clone())
            .query(request)
            .send()
            .await
            .map_err(|e| QuoteError::Transport { context, source: e })?;
        Self::read(response, context).await
    }

    async fn build_transaction(
        &self,
        quote: &Quote,
        payer: &str,
        priority_fee: Option<u64>,
    ) -> Result<Vec<u8>, QuoteError> {
        let context = "POST /swap";
        let mut body = json!({
            "quoteResponse": quote,
            "userPublicKey": payer,
        });
        if let Some(fee) = priority_fee {
            body["prioritizationFeeLamports"] = json!(fee);
        }

        let response = self
            .client
            .post(self.swap_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| QuoteError::Transport { context, source: e })?;
        let swap: SwapResponse = Self::read(response, context).await?;
        let encoded = swap.swap_transaction.ok_or(QuoteError::MissingTransaction)?;
        b64.decode(encoded).map_err(QuoteError::Base64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Query, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    type Seen = Arc<Mutex<Vec<Value>>>;

    async fn spawn_api() -> (HttpQuoteProvider, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/v6/quote",
                get(|Query(params): Query<HashMap<String, String>>| async move {
                    if params.get("inputMint").map(String::as_str) == Some("bad") {
                        return Err((StatusCode::BAD_REQUEST, "unknown mint"));
                    }
                    Ok(Json(json!({
                        "inputMint": params["inputMint"],
                        "outAmount": "998877",
                        "priceImpactPct": "0.01",
                        "slippageBps": params["slippageBps"].parse::<u16>().unwrap_or(0),
                    })))
                }),
            )
            .route(
                "/v6/swap",
                post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                    let empty = body["userPublicKey"] == "nobody";
                    seen.lock().unwrap().push(body);
                    if empty {
                        Json(json!({}))
                    } else {
                        Json(json!({ "swapTransaction": "AQID" }))
                    }
                }),
            )
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let provider = HttpQuoteProvider::new(&format!("http://{addr}/v6/"), reqwest::Client::new()).unwrap();
        (provider, seen)
    }

    fn request(input: &str) -> QuoteRequest {
        QuoteRequest {
            input_mint: input.into(),
            output_mint: "So11111111111111111111111111111111111111112".into(),
            amount: 1_000_000,
            slippage_bps: 30,
        }
    }

    #[tokio::test]
    async fn test_quote_passes_query() {
        let (provider, _) = spawn_api().await;
        let quote = provider.quote(&request("USDC")).await.unwrap();
        assert_eq!(quote.out_amount(), Some(998_877));
        assert_eq!(quote.price_impact_pct(), Some("0.01"));
        assert_eq!(quote.0["slippageBps"], 30);
    }

    #[tokio::test]
    async fn test_quote_error_status() {
        let (provider, _) = spawn_api().await;
        let err = provider.quote(&request("bad")).await.unwrap_err();
        assert!(matches!(err, QuoteError::Status { status: StatusCode::BAD_REQUEST, .. }));
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_build_transaction_decodes_and_forwards_fee() {
        let (provider, seen) = spawn_api().await;
        let quote = provider.quote(&request("USDC")).await.unwrap();

        let tx = provider
            .build_transaction(&quote, "payer111", Some(5000))
            .await
            .unwrap();
        assert_eq!(tx, vec![1, 2, 3]);

        let body = seen.lock().unwrap()[0].clone();
        assert_eq!(body["userPublicKey"], "payer111");
        assert_eq!(body["prioritizationFeeLamports"], 5000);
        assert_eq!(body["quoteResponse"]["outAmount"], "998877");
    }

    #[tokio::test]
    async fn test_missing_transaction() {
        let (provider, _) = spawn_api().await;
        let quote = Quote(json!({ "outAmount": "1" }));
        let err = provider
            .build_transaction(&quote, "nobody", None)
            .await
            .unwrap_err();
        assert!(matches!(err, QuoteError::MissingTransaction));
    }

    #[test]
    fn test_bad_base_url() {
        let err = HttpQuoteProvider::new("not a url", reqwest::Client::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
