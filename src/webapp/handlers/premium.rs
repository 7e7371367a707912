//! Priced endpoints
//!
//! The paygate runs in front of these; by the time a handler runs the
//! request carries a [`VerifiedPayment`] extension. The extension is optional
//! here so a deployment can unprice a route through configuration alone.

use axum::{
    Extension, Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use tracing::{info, warn};

use super::super::AppState;
use crate::quote::QuoteRequest;
use crate::webapp::models::{
    BuildRequest, BuildResponse, PaymentInfo, PremiumQuoteResponse, error_bad_request,
    error_upstream,
};
use crate::x402::VerifiedPayment;

pub async fn premium_quote_handler(
    State(state): State<AppState>,
    payment: Option<Extension<VerifiedPayment>>,
    Query(request): Query<QuoteRequest>,
) -> Response {
    let quote = match state.quotes.quote(&request).await {
        Ok(quote) => quote,
        Err(e) => {
            warn!(error = %e, kind = %e.kind(), "premium quote failed");
            return error_upstream(&e);
        }
    };

    Json(PremiumQuoteResponse {
        out_amount: quote.out_amount(),
        price_impact_pct: quote.price_impact_pct().map(ToOwned::to_owned),
        quote,
        payment: payment.map(|Extension(p)| PaymentInfo::from(&p)),
    })
    .into_response()
}

pub async fn premium_build_handler(
    State(state): State<AppState>,
    payment: Option<Extension<VerifiedPayment>>,
    Json(request): Json<BuildRequest>,
) -> Response {
    if request.user_public_key.trim().is_empty() {
        return error_bad_request("userPublicKey is required");
    }

    let unsigned = match state
        .quotes
        .build_transaction(&request.quote, &request.user_public_key, request.priority_fee)
        .await
    {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, kind = %e.kind(), "swap build failed");
            return error_upstream(&e);
        }
    };

    info!(user = %request.user_public_key, len = unsigned.len(), "built swap transaction");

    Json(BuildResponse {
        swap_transaction: b64.encode(unsigned),
        payment: payment.map(|Extension(p)| PaymentInfo::from(&p)),
    })
    .into_response()
}
