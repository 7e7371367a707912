//! Global configuration management for swap402
//!
//! Configuration is layered, highest priority first:
//! 1. CLI flags (every flag also reads a `SWAP402_*` environment variable)
//! 2. `--config`: a JSON file path or an inline JSON string
//! 3. Built-in defaults (USDC on all known networks, both premium routes priced)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::chain::{AssetTable, LocalWallet};
use crate::ledger::submit::SubmissionPolicy;
use crate::logging::LogFormat;
use crate::x402::client::KeyArgs;
use crate::x402::middleware::DEFAULT_MAX_PER_REQUEST;
use crate::x402::pricing::PricingTable;
use crate::x402::verifier::VerificationMode;

pub const DEFAULT_PORT: u16 = 8402;
pub const DEFAULT_FACILITATOR_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Configuration Arguments
// ============================================================================

/// Common configuration arguments (used across CLI commands)
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigArgs {
    /// Global configuration file (JSON file path or JSON string).
    ///
    /// - A file path: --config swap402.json
    ///
    /// - Inline JSON: --config '{"pay_to":"0x...","verification_mode":"relaxed"}'
    ///
    #[arg(long = "config", short = 'c', env = "SWAP402_CONFIG", value_name = "file.json or {json}")]
    pub config: Option<String>,

    /// Facilitator base URL (e.g., https://facilitator.example.com)
    #[arg(long = "facilitator-url", short = 'f', env = "SWAP402_FACILITATOR_URL", value_name = "http(s)://...")]
    pub facilitator_url: Option<String>,

    /// What to do when the facilitator cannot be reached
    #[arg(long, value_enum, env = "SWAP402_VERIFICATION_MODE")]
    pub verification_mode: Option<VerificationMode>,

    /// Address that receives payments (server mode)
    #[arg(long, short = 'o', env = "SWAP402_PAY_TO")]
    pub pay_to: Option<String>,

    /// Port to listen on (server mode)
    #[arg(long, short = 'p', env = "SWAP402_PORT")]
    pub port: Option<u16>,

    /// Maximum amount to pay for a single request, in display units (e.g. 0.05)
    #[arg(long, short = 'm', env = "SWAP402_MAX_PER_REQUEST", value_name = "AMOUNT")]
    pub max_per_request: Option<Decimal>,

    /// Ledger JSON-RPC endpoint
    #[arg(long, env = "SWAP402_RPC_URL", value_name = "http(s)://...")]
    pub rpc_url: Option<String>,

    /// Swap quote API base URL
    #[arg(long, env = "SWAP402_QUOTE_API_URL", value_name = "http(s)://...")]
    pub quote_api_url: Option<String>,

    // -------------------------------------------------------------------------
    // Logging/Tracing Options
    // -------------------------------------------------------------------------

    /// Enable verbose output (INFO level logging)
    #[arg(short = 'v', long, env = "SWAP402_VERBOSE")]
    pub verbose: bool,

    /// Enable debug output (DEBUG level logging)
    #[arg(short = 'd', long, env = "SWAP402_DEBUG", conflicts_with = "verbose")]
    pub debug: bool,

    /// Quiet mode - only show errors
    #[arg(short = 'q', long, conflicts_with_all = ["verbose", "debug"])]
    pub quiet: bool,

    /// Silent mode - suppress all terminal log output
    ///
    /// Log file output (if configured) is unaffected.
    #[arg(long, short = 's', conflicts_with_all = ["verbose", "debug", "quiet"])]
    pub silent: bool,

    /// Log output format
    #[arg(long, short = 'L', default_value = "pretty", value_enum, env = "SWAP402_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Write debug logs to file
    #[arg(long, short = 'l', env = "SWAP402_LOG_FILE", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

// ============================================================================
// Global Configuration
// ============================================================================

/// Global configuration structure (can be serialized/deserialized from JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Priced routes, keyed by "METHOD PATH"
    pub pricing: PricingTable,

    /// Settlement asset per network
    pub assets: AssetTable,

    // Server configuration
    /// Address that receives payments
    pub pay_to: Option<String>,

    /// Facilitator base URL
    pub facilitator_url: Option<String>,

    /// Per-call facilitator timeout in seconds
    pub facilitator_timeout: Option<u64>,

    pub verification_mode: VerificationMode,

    /// Public origin used to build payment resources (defaults to the Host header)
    pub public_url: Option<String>,

    /// Port for server to listen on
    pub port: Option<u16>,

    // Client configuration
    /// Private key for payments and signing (hex string or @filename)
    pub key: Option<String>,

    /// Per-request spend ceiling in display units
    pub max_per_request: Option<Decimal>,

    /// Wall-clock limit on the payment round trip, in seconds
    pub payment_timeout: Option<u64>,

    /// Connection timeout in seconds
    pub connect_timeout: Option<u64>,

    /// Total request timeout in seconds
    pub request_timeout: Option<u64>,

    // Ledger and quotes
    pub rpc_url: Option<String>,
    pub quote_api_url: Option<String>,
    pub submission: SubmissionPolicy,

    // Logging
    pub verbose: bool,
    pub debug: bool,
    pub quiet: bool,
    pub silent: bool,
    pub log_format: LogFormat,
    pub log_file: Option<PathBuf>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            pricing: PricingTable::default(),
            assets: AssetTable::with_usdc_defaults(),
            pay_to: None,
            facilitator_url: None,
            facilitator_timeout: None,
            verification_mode: VerificationMode::default(),
            public_url: None,
            port: None,
            key: None,
            max_per_request: None,
            payment_timeout: None,
            connect_timeout: None,
            request_timeout: None,
            rpc_url: None,
            quote_api_url: None,
            submission: SubmissionPolicy::default(),
            verbose: false,
            debug: false,
            quiet: false,
            silent: false,
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

impl GlobalConfig {
    /// Load configuration from ConfigArgs, CLI args taking precedence over file config
    pub fn from_args(config: &ConfigArgs) -> Result<Self> {
        load_config(config)
    }

    /// Merge key from KeyArgs into this config
    ///
    /// CLI args take precedence over config file.
    pub fn merge_key_args(&mut self, key_args: &KeyArgs) -> Result<()> {
        if key_args.random {
            let wallet = LocalWallet::random();
            self.key = Some(format!("0x{}", hex::encode(wallet.to_bytes())));
        } else if let Some(key) = &key_args.key {
            self.key = Some(read_key(key)?);
        }
        Ok(())
    }

    /// The configured wallet, if a key is set
    pub fn load_wallet(&self) -> Result<Option<LocalWallet>> {
        let Some(key) = &self.key else {
            return Ok(None);
        };
        let wallet = read_key(key)?
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid private key: {}", e))?;
        Ok(Some(wallet))
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn facilitator_timeout(&self) -> Duration {
        Duration::from_secs(
            self.facilitator_timeout
                .unwrap_or(DEFAULT_FACILITATOR_TIMEOUT_SECS),
        )
    }

    pub fn max_per_request(&self) -> Decimal {
        self.max_per_request.unwrap_or(DEFAULT_MAX_PER_REQUEST)
    }

    pub fn payment_timeout(&self) -> Option<Duration> {
        self.payment_timeout.map(Duration::from_secs)
    }

    /// Get connection timeout in seconds
    pub fn connect_timeout(&self) -> Option<u64> {
        self.connect_timeout
    }

    /// Get request timeout in seconds
    pub fn request_timeout(&self) -> Option<u64> {
        self.request_timeout
    }

    /// Initialize tracing/logging based on configuration
    ///
    /// Call once early in main(), after all merging of CLI args and config files.
    pub fn init_tracing(&self) {
        crate::logging::init_tracing(crate::logging::TracingConfig {
            verbose: self.verbose,
            debug: self.debug,
            quiet: self.quiet,
            silent: self.silent,
            format: self.log_format.clone(),
            log_file: self.log_file.clone(),
        });
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

/// `@path` reads the key from a file, anything else is the key itself
fn read_key(key: &str) -> Result<String> {
    match key.strip_prefix('@') {
        Some(file_path) => Ok(std::fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read key from file '{}'", file_path))?
            .trim()
            .to_string()),
        None => Ok(key.trim().to_string()),
    }
}

/// Helper to load JSON from either a file path or inline JSON string
fn load_json_string(input: &str) -> Result<String> {
    if input.trim_start().starts_with('{') || input.trim_start().starts_with('[') {
        return Ok(input.to_string());
    }
    let path = std::path::Path::new(input);
    if path.exists() {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file '{}'", path.display()))
    } else {
        // Not a file; let the JSON parser report what is wrong with it
        Ok(input.to_string())
    }
}

fn load_config(config_args: &ConfigArgs) -> Result<GlobalConfig> {
    let mut global_config = if let Some(config_input) = &config_args.config {
        let json_str = load_json_string(config_input)?;
        serde_json::from_str(&json_str).context("Failed to parse global config JSON")?
    } else {
        GlobalConfig::default()
    };

    if let Some(facilitator_url) = &config_args.facilitator_url {
        global_config.facilitator_url = Some(facilitator_url.clone());
    }
    if let Some(mode) = config_args.verification_mode {
        global_config.verification_mode = mode;
    }
    if let Some(pay_to) = &config_args.pay_to {
        global_config.pay_to = Some(pay_to.clone());
    }
    if let Some(port) = config_args.port {
        global_config.port = Some(port);
    }
    if let Some(max) = config_args.max_per_request {
        global_config.max_per_request = Some(max);
    }
    if let Some(rpc_url) = &config_args.rpc_url {
        global_config.rpc_url = Some(rpc_url.clone());
    }
    if let Some(quote_api_url) = &config_args.quote_api_url {
        global_config.quote_api_url = Some(quote_api_url.clone());
    }

    // Logging flags only ever turn things on
    global_config.verbose |= config_args.verbose;
    global_config.debug |= config_args.debug;
    global_config.quiet |= config_args.quiet;
    global_config.silent |= config_args.silent;
    // Always take log_format from CLI (it has a default value)
    global_config.log_format = config_args.log_format.clone();
    if let Some(log_file) = &config_args.log_file {
        global_config.log_file = Some(log_file.clone());
    }

    Ok(global_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Network;
    use http::Method;

    #[test]
    fn test_defaults() {
        let config = GlobalConfig::default();
        assert_eq!(config.port(), DEFAULT_PORT);
        assert_eq!(config.verification_mode, VerificationMode::Strict);
        assert_eq!(config.max_per_request(), DEFAULT_MAX_PER_REQUEST);
        assert!(config.assets.lookup(Network::SolanaDevnet).is_some());
        assert!(config.pricing.lookup(&Method::POST, "/premium/build").is_some());
    }

    #[test]
    fn test_inline_json_with_cli_overrides() {
        let args = ConfigArgs {
            config: Some(r#"{"pay_to":"0xfile","port":9000,"verification_mode":"relaxed"}"#.into()),
            pay_to: Some("0xcli".into()),
            ..Default::default()
        };
        let config = GlobalConfig::from_args(&args).unwrap();
        assert_eq!(config.pay_to.as_deref(), Some("0xcli"));
        assert_eq!(config.port(), 9000);
        assert_eq!(config.verification_mode, VerificationMode::Relaxed);
        // Unspecified sections keep their defaults
        assert!(!config.assets.is_empty());
    }

    #[test]
    fn test_bad_json_is_an_error() {
        let args = ConfigArgs {
            config: Some("{not json".into()),
            ..Default::default()
        };
        assert!(GlobalConfig::from_args(&args).is_err());
    }

    #[test]
    fn test_wallet_from_key() {
        let mut config = GlobalConfig::default();
        assert!(config.load_wallet().unwrap().is_none());

        config
            .merge_key_args(&KeyArgs {
                key: Some("0x0000000000000000000000000000000000000000000000000000000000000001".into()),
                random: false,
            })
            .unwrap();
        let wallet = config.load_wallet().unwrap().unwrap();
        assert_eq!(
            wallet.evm_address().to_string(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
    }
}
