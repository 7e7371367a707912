use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::quote::{Quote, QuoteError};
use crate::x402::VerifiedPayment;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub fn error_response(code: StatusCode, kind: ErrorKind, message: &str) -> axum::response::Response {
    (
        code,
        Json(ErrorResponse {
            error: kind.as_str().to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

pub fn error_bad_request(message: &str) -> axum::response::Response {
    error_response(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequest, message)
}

/// Upstream quote failures: 504 for timeouts, 502 otherwise
pub fn error_upstream(error: &QuoteError) -> axum::response::Response {
    let kind = error.kind();
    let code = match kind {
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    error_response(code, kind, &error.to_string())
}

/// Who paid for a premium response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub payer: String,
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// e.g. "$0.005"
    pub price: String,
}

impl From<&VerifiedPayment> for PaymentInfo {
    fn from(payment: &VerifiedPayment) -> Self {
        let price = payment
            .requirement
            .display_amount()
            .map(|d| format!("${}", d.normalize()))
            .unwrap_or_else(|| payment.requirement.amount.to_string());
        Self {
            payer: payment.payer.clone(),
            idempotency_key: payment.idempotency_key.clone(),
            transaction: payment.tx_hash.clone(),
            price,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumQuoteResponse {
    pub quote: Quote,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_amount: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_impact_pct: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub quote: Quote,
    pub user_public_key: String,
    #[serde(default)]
    pub priority_fee: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResponse {
    /// base64 unsigned transaction
    pub swap_transaction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentInfo>,
}
