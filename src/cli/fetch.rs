use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use reqwest::Method;

use crate::x402::middleware::error_kind;
use crate::x402::{ClientConfig, GlobalConfig, PaymentReceipt, x402_client};

#[derive(Args)]
pub struct FetchArgs {
    /// URL to request
    url: String,

    /// HTTP method (GET, POST, PUT, DELETE)
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request body (JSON string or @file)
    #[arg(long)]
    data: Option<String>,

    /// Headers (format: "Key: Value")
    #[arg(short = 'H', long)]
    header: Vec<String>,

    /// Show response headers
    #[arg(short = 'i', long)]
    include_headers: bool,

    /// Write output to file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Follow redirects
    #[arg(long)]
    location: bool,

    /// Exit with an error on HTTP errors (4xx, 5xx)
    #[arg(short = 'f', long)]
    fail: bool,

    /// Connection timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Maximum time for the entire request in seconds
    #[arg(long)]
    max_time: Option<u64>,
}

fn read_body(data: &str) -> Result<Vec<u8>> {
    match data.strip_prefix('@') {
        Some(path) => std::fs::read(path).with_context(|| format!("Failed to read body from '{}'", path)),
        None => Ok(data.as_bytes().to_vec()),
    }
}

pub async fn run(args: FetchArgs, config: &GlobalConfig) -> Result<()> {
    let method = args
        .method
        .parse::<Method>()
        .map_err(|_| anyhow::anyhow!("Invalid HTTP method: {}", args.method))?;

    let client_config = ClientConfig {
        follow_redirects: args.location,
        connect_timeout: args.connect_timeout,
        timeout: args.max_time,
    };
    let client = x402_client(config, Some(&client_config))?;

    let mut request = client.request(method, &args.url);
    for header in &args.header {
        if let Some((name, value)) = header.split_once(':') {
            request = request.header(name.trim(), value.trim());
        }
    }
    if let Some(data) = &args.data {
        let body = read_body(data)?;
        if data.trim_start().starts_with('{') || data.trim_start().starts_with('[') {
            request = request.header("Content-Type", "application/json");
        }
        request = request.body(body);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, kind = %error_kind(&e), "request failed");
            return Err(e.into());
        }
    };

    let status = response.status();
    if let Some(receipt) = response.extensions().get::<PaymentReceipt>() {
        eprintln!(
            "paid {} {} on {} (tx: {}, idempotency-key: {})",
            receipt
                .display_amount()
                .map(|d| d.to_string())
                .unwrap_or_else(|| receipt.amount.to_string()),
            receipt.symbol,
            receipt.network,
            receipt.transaction.as_deref().unwrap_or("?"),
            receipt.idempotency_key,
        );
    }

    let mut out: Vec<u8> = Vec::new();
    if args.include_headers {
        writeln!(out, "{:?} {}", response.version(), status)?;
        for (name, value) in response.headers() {
            writeln!(out, "{}: {}", name, value.to_str().unwrap_or("<binary>"))?;
        }
        writeln!(out)?;
    }
    out.extend_from_slice(&response.bytes().await?);

    match &args.output {
        Some(path) => std::fs::write(path, &out)
            .with_context(|| format!("Failed to write '{}'", path.display()))?,
        None => std::io::stdout().write_all(&out)?,
    }

    if args.fail && (status.is_client_error() || status.is_server_error()) {
        anyhow::bail!("HTTP {}", status);
    }
    Ok(())
}
