pub mod handlers;
pub mod models;
pub mod state;
pub mod trace;

pub use models::{ErrorResponse, error_bad_request, error_response};
pub use state::AppState;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, middleware, routing::get, routing::post};
use clap::Args;
use url::Url;

use crate::config::GlobalConfig;
use crate::quote::{DEFAULT_QUOTE_API_URL, HttpQuoteProvider};
use crate::x402::client::base_client;
use crate::x402::{Facilitator, FacilitatorClient, Paygate, PaymentVerifier, paygate_layer};

/// All routes, with the paygate in front of the handlers and request tracing outermost
pub fn router<F>(state: AppState, gate: Arc<Paygate<F>>) -> Router
where
    F: Facilitator + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .route("/quote", get(handlers::quote::quote_handler))
        .route("/premium/quote", get(handlers::premium::premium_quote_handler))
        .route("/premium/build", post(handlers::premium::premium_build_handler))
        .layer(middleware::from_fn_with_state(gate, paygate_layer::<F>))
        .layer(middleware::from_fn(trace::trace_request))
        .with_state(state)
}

/// Builds the paygate from configuration
pub fn create_paygate(config: &GlobalConfig) -> Result<Paygate<FacilitatorClient>> {
    // Get pay_to from config (required for server mode)
    let pay_to = config.pay_to.as_ref().ok_or_else(|| {
        anyhow::anyhow!(
            "Payment address required. Specify via --pay-to, SWAP402_PAY_TO env var, or config file"
        )
    })?;

    let facilitator = match &config.facilitator_url {
        Some(_) => Some(FacilitatorClient::try_from(config)?.with_client(base_client(config, None)?)),
        None => {
            tracing::warn!(
                mode = ?config.verification_mode,
                "No facilitator configured, every payment goes through the local fallback"
            );
            None
        }
    };
    let verifier = PaymentVerifier::new(
        facilitator,
        config.verification_mode,
        config.facilitator_timeout(),
    );

    let mut gate = Paygate::new(
        config.pricing.clone(),
        config.assets.clone(),
        pay_to.clone(),
        verifier,
    );
    if let Some(public_url) = &config.public_url {
        let base = Url::parse(public_url)
            .with_context(|| format!("Invalid public URL '{}'", public_url))?;
        gate = gate.with_base_url(base);
    }
    gate.ensure_assets()?;
    Ok(gate)
}

/// Creates an instance of the axum app with all routes and state configured
pub fn create_app(config: &GlobalConfig) -> Result<(Router, AppState)> {
    let gate = Arc::new(create_paygate(config)?);

    let quote_api_url = config
        .quote_api_url
        .as_deref()
        .unwrap_or(DEFAULT_QUOTE_API_URL);
    let quotes = HttpQuoteProvider::new(quote_api_url, base_client(config, None)?)?;

    let priced_routes = gate.pricing().iter().map(|(route, _)| route.to_string()).collect();
    let state = AppState::new(
        Arc::new(quotes),
        config.pay_to.clone().unwrap_or_default(),
        priced_routes,
    );

    Ok((router(state.clone(), gate), state))
}

#[derive(Args)]
pub struct ServeArgs {
    /// Write process ID to the specified file
    #[arg(long, value_name = "./pid.file")]
    pub pid: Option<String>,

    /// Write readiness marker to the specified file once server is listening
    ///
    /// Useful for scripts that need to wait for the server to be fully started.
    #[arg(long)]
    pub ready_file: Option<String>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
}

pub async fn run(args: ServeArgs, config: &GlobalConfig) -> Result<()> {
    let port = config.port();

    // Write PID to file if requested
    if let Some(pid_file) = &args.pid {
        let pid = std::process::id();
        std::fs::write(pid_file, pid.to_string())?;
    }

    let (app, state) = create_app(config)?;

    let addr = format!("{}:{}", args.host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        pay_to = %state.pay_to,
        facilitator = config.facilitator_url.as_deref().unwrap_or("(none)"),
        mode = ?config.verification_mode,
        priced = ?state.priced_routes,
        listen = %listener.local_addr()?,
        "Server started"
    );

    // Write ready file if requested (server is now ready to accept connections)
    if let Some(ready_file) = &args.ready_file {
        let pid = std::process::id();
        std::fs::write(ready_file, format!("ready {}", pid))?;
    }

    axum::serve(listener, app).await?;

    Ok(())
}
