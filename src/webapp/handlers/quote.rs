use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::super::AppState;
use crate::quote::QuoteRequest;
use crate::webapp::models::error_upstream;

/// Free quote, straight from the provider
pub async fn quote_handler(
    State(state): State<AppState>,
    Query(request): Query<QuoteRequest>,
) -> Response {
    match state.quotes.quote(&request).await {
        Ok(quote) => Json(quote).into_response(),
        Err(e) => {
            warn!(error = %e, kind = %e.kind(), "quote failed");
            error_upstream(&e)
        }
    }
}
