//! Server-side payment gate
//!
//! [`Paygate::intercept`] decides what happens to one request: pass it
//! through (unpriced route), answer with a 402 challenge, or let it through
//! with a [`VerifiedPayment`] attached. [`paygate_layer`] wires that decision
//! into axum as a `from_fn_with_state` middleware.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use serde_json::json;
use tracing::{Instrument, error, info, info_span, warn};
use url::Url;

use crate::chain::{AssetTable, Network};
use crate::error::ErrorKind;
use crate::x402::facilitator::Facilitator;
use crate::x402::headers::{
    AUTHORIZATION_HEADERS, IDEMPOTENCY_KEY_HEADER, REQUIREMENT_HEADERS, SETTLEMENT_HEADER,
    decode_header, encode_header,
};
use crate::x402::pricing::{PriceEntry, PricingTable};
use crate::x402::types::{
    AuthorizationPayload, MoneyAmountParseError, PaymentRequiredBody, PaymentRequirement,
    SettlementResponse,
};
use crate::x402::verifier::PaymentVerifier;

pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 300;

/// Outcome of [`Paygate::intercept`]
#[derive(Debug)]
pub enum Gate {
    /// Route is not priced
    PassThrough,
    /// Payment missing or rejected
    Challenge(Challenge),
    /// Payment accepted
    Verified(VerifiedPayment),
}

/// A 402 answer: the requirement plus a human-readable reason
#[derive(Debug, Clone)]
pub struct Challenge {
    pub requirement: PaymentRequirement,
    pub body: PaymentRequiredBody,
}

/// Inserted into the request extensions of a paid request
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub requirement: PaymentRequirement,
    pub payer: String,
    pub idempotency_key: String,
    pub tx_hash: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PaygateError {
    #[error("No asset configured for network {network}")]
    MissingAsset { network: Network },
    #[error("Price for {route} cannot be expressed in atomic units: {source}")]
    Price {
        route: String,
        #[source]
        source: MoneyAmountParseError,
    },
}

impl PaygateError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

impl IntoResponse for PaygateError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({
                "error": self.kind().as_str(),
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

#[derive(Debug)]
pub struct Paygate<F> {
    pricing: PricingTable,
    assets: AssetTable,
    pay_to: String,
    verifier: PaymentVerifier<F>,
    base_url: Option<Url>,
    max_timeout_seconds: u64,
}

impl<F> Paygate<F>
where
    F: Facilitator + Send + Sync,
{
    pub fn new(
        pricing: PricingTable,
        assets: AssetTable,
        pay_to: impl Into<String>,
        verifier: PaymentVerifier<F>,
    ) -> Self {
        Self {
            pricing,
            assets,
            pay_to: pay_to.into(),
            verifier,
            base_url: None,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
        }
    }

    /// Public origin used for `resource`; defaults to the request's Host header
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn with_max_timeout(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Check up front that every priced route can be turned into a requirement
    pub fn ensure_assets(&self) -> Result<(), PaygateError> {
        for network in self.pricing.networks() {
            if self.assets.lookup(network).is_none() {
                return Err(PaygateError::MissingAsset { network });
            }
        }
        Ok(())
    }

    /// The URL a requirement is bound to
    pub fn resource_for(&self, headers: &HeaderMap, uri: &Uri) -> Result<Url, url::ParseError> {
        let path = uri.path();
        if let Some(base) = &self.base_url {
            return base.join(path);
        }
        let host = headers
            .get(http::header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("localhost");
        Url::parse(&format!("http://{host}{path}"))
    }

    fn requirement(
        &self,
        route: &str,
        entry: &PriceEntry,
        resource: Url,
    ) -> Result<PaymentRequirement, PaygateError> {
        let asset = self
            .assets
            .lookup(entry.network)
            .ok_or(PaygateError::MissingAsset {
                network: entry.network,
            })?;
        entry
            .requirement(asset, resource, &self.pay_to, self.max_timeout_seconds)
            .map_err(|source| PaygateError::Price {
                route: route.to_string(),
                source,
            })
    }

    pub async fn intercept(
        &self,
        method: &Method,
        path: &str,
        resource: Url,
        headers: &HeaderMap,
    ) -> Result<Gate, PaygateError> {
        let Some(entry) = self.pricing.lookup(method, path) else {
            return Ok(Gate::PassThrough);
        };
        let route = format!("{method} {path}");
        let requirement = self.requirement(&route, entry, resource)?;

        let Some(header) = AUTHORIZATION_HEADERS.resolve(headers) else {
            return Ok(challenge_gate(
                requirement,
                format!("Payment required: {}", entry.description),
            ));
        };

        let payload: AuthorizationPayload = match decode_header(header) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(route = %route, error = %e, "malformed payment authorization");
                return Ok(challenge_gate(
                    requirement,
                    format!("Invalid payment authorization: {e}"),
                ));
            }
        };

        if let Some(key) = headers.get(IDEMPOTENCY_KEY_HEADER)
            && key.as_bytes() != payload.idempotency_key.as_bytes()
        {
            return Ok(challenge_gate(
                requirement,
                "Payment verification failed: idempotency key mismatch".to_string(),
            ));
        }

        let result = self.verifier.verify(&payload, &requirement).await;
        if !result.valid {
            let reason = result.error.unwrap_or_else(|| "unknown".to_string());
            info!(route = %route, payer = %payload.public_key, reason = %reason, "payment rejected");
            return Ok(challenge_gate(
                requirement,
                format!("Payment verification failed: {reason}"),
            ));
        }

        Ok(Gate::Verified(VerifiedPayment {
            requirement,
            payer: payload.public_key,
            idempotency_key: payload.idempotency_key,
            tx_hash: result.tx_hash,
        }))
    }
}

fn challenge_gate(requirement: PaymentRequirement, message: String) -> Gate {
    let price = requirement
        .display_amount()
        .map(|d| format!("${d}"))
        .unwrap_or_else(|| format!("{} atomic units", requirement.amount));
    let body = PaymentRequiredBody {
        error: "payment_required".to_string(),
        message,
        price,
        network: requirement.network,
    };
    Gate::Challenge(Challenge { requirement, body })
}

impl IntoResponse for Challenge {
    fn into_response(self) -> Response {
        info!(net = %self.requirement.network, amount = %self.requirement.amount, "< 402");

        let mut response = (StatusCode::PAYMENT_REQUIRED, axum::Json(self.body)).into_response();
        match encode_header(&self.requirement) {
            Ok(value) => {
                let headers = response.headers_mut();
                REQUIREMENT_HEADERS.insert_all(headers, value);
                headers.insert(
                    http::header::ACCESS_CONTROL_EXPOSE_HEADERS,
                    HeaderValue::from_static("payment-required, x-payment-required"),
                );
            }
            Err(e) => error!(error = %e, "failed to encode payment requirement"),
        }
        response
    }
}

impl VerifiedPayment {
    /// base64(JSON) settlement receipt, if a transaction id is known
    pub fn settlement_header(&self) -> Option<HeaderValue> {
        let transaction = self.tx_hash.clone()?;
        let receipt = SettlementResponse {
            transaction,
            network: self.requirement.network,
            payer: self.payer.clone(),
        };
        encode_header(&receipt).ok()
    }
}

/// axum middleware: `from_fn_with_state(Arc<Paygate<F>>, paygate_layer::<F>)`
pub async fn paygate_layer<F>(
    State(gate): State<Arc<Paygate<F>>>,
    mut request: Request,
    next: Next,
) -> Response
where
    F: Facilitator + Send + Sync + 'static,
{
    let resource = match gate.resource_for(request.headers(), request.uri()) {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "cannot build resource url");
            return (StatusCode::BAD_REQUEST, "Invalid Host header").into_response();
        }
    };
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let outcome = gate
        .intercept(&method, &path, resource, request.headers())
        .await;

    match outcome {
        Ok(Gate::PassThrough) => next.run(request).await,
        Ok(Gate::Challenge(challenge)) => challenge.into_response(),
        Ok(Gate::Verified(payment)) => {
            let settlement = payment.settlement_header();
            let span = info_span!(
                "x402",
                tx = payment.tx_hash.as_deref().unwrap_or("?"),
                payer = payment.payer.as_str(),
                net = payment.requirement.network.name(),
            );
            request.extensions_mut().insert(payment);

            let mut response = next.run(request).instrument(span).await;
            if let Some(value) = settlement {
                response.headers_mut().insert(SETTLEMENT_HEADER, value);
            }
            response
        }
        Err(e) => {
            error!(error = %e, kind = %e.kind(), "paygate misconfigured");
            e.into_response()
        }
    }
}
