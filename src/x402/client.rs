use anyhow::Result;
use clap::Args;
use reqwest_middleware::ClientWithMiddleware;
use std::sync::Arc;
use std::time::Duration;

use super::middleware::{ReqwestWithPayments, ReqwestWithPaymentsBuild};
use crate::chain::Wallet;

// Re-export config types for convenience
pub use crate::config::GlobalConfig;

/// Common payment-related arguments
#[derive(Args, Clone, Debug, Default)]
pub struct KeyArgs {
    /// Private key for x402 payment (hex string or @filename to read from file).
    #[arg(long, short = 'k', env = "SWAP402_KEY", value_name = "0xKEY or @keyfile")]
    pub key: Option<String>,

    /// Generate and use a random key instead of using a provided key
    #[arg(long, short = 'r', env = "SWAP402_USE_RANDOM_KEY")]
    pub random: bool,
}

/// Optional HTTP client configuration
#[derive(Default, Clone, Debug)]
pub struct ClientConfig {
    /// Follow redirects
    pub follow_redirects: bool,
    /// Connection timeout in seconds
    pub connect_timeout: Option<u64>,
    /// Total request timeout in seconds
    pub timeout: Option<u64>,
}

/// Plain reqwest client with the configured timeouts and redirect policy
pub fn base_client(
    global_config: &GlobalConfig,
    config: Option<&ClientConfig>,
) -> Result<reqwest::Client> {
    let mut reqwest_builder = reqwest::Client::builder();

    // Global timeouts first, `config` overrides them
    if let Some(connect_timeout) = global_config.connect_timeout() {
        reqwest_builder = reqwest_builder.connect_timeout(Duration::from_secs(connect_timeout));
    }
    if let Some(request_timeout) = global_config.request_timeout() {
        reqwest_builder = reqwest_builder.timeout(Duration::from_secs(request_timeout));
    }

    if let Some(cfg) = config {
        if cfg.follow_redirects {
            reqwest_builder = reqwest_builder.redirect(reqwest::redirect::Policy::limited(10));
        } else {
            reqwest_builder = reqwest_builder.redirect(reqwest::redirect::Policy::none());
        }

        if let Some(connect_timeout) = cfg.connect_timeout {
            reqwest_builder = reqwest_builder.connect_timeout(Duration::from_secs(connect_timeout));
        }
        if let Some(timeout) = cfg.timeout {
            reqwest_builder = reqwest_builder.timeout(Duration::from_secs(timeout));
        }
    }

    Ok(reqwest_builder.build()?)
}

/// Create an HTTP client with optional x402 payment support
///
/// With a key in `global_config` the client answers 402 challenges (within
/// the configured per-request ceiling and payment timeout); without one it is
/// a plain HTTP client and 402 responses come back untouched.
pub fn x402_client(
    global_config: &GlobalConfig,
    config: Option<&ClientConfig>,
) -> Result<ClientWithMiddleware> {
    let client = base_client(global_config, config)?;

    let Some(wallet) = global_config.load_wallet()? else {
        return Ok(reqwest_middleware::ClientBuilder::new(client).build());
    };

    tracing::debug!(address = %wallet.address(), "x402 wallet configured");
    tracing::debug!(max = %global_config.max_per_request(), "x402 spending limit");

    let mut builder = client
        .with_payments(Arc::new(wallet))
        .max(global_config.max_per_request());
    if let Some(limit) = global_config.payment_timeout() {
        builder = builder.timeout(limit);
    }
    Ok(builder.build())
}
