//! Request tracing middleware
//!
//! Adds a correlation ID span to each request and logs its outcome.

use std::time::Instant;

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info_span};

/// Generate a short random hex ID
fn gen_id() -> String {
    format!("{:06x}", rand::random::<u32>() & 0xFFFFFF)
}

/// Wraps each request in a root span so paid retries don't nest under the
/// span of the request they retry.
pub async fn trace_request(request: Request, next: Next) -> Response {
    let id = gen_id();
    let span = info_span!(
        parent: None,
        "httpd",
        %id,
        method = %request.method(),
        path = request.uri().path(),
    );

    async move {
        let started = Instant::now();
        let response = next.run(request).await;
        tracing::debug!(
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "done"
        );
        response
    }
    .instrument(span)
    .await
}
