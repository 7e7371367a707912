//! `swap402 swap`: paid build, local signing, reliable submission

use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use clap::Args;
use url::Url;

use crate::chain::Wallet;
use crate::ledger::fees::DEFAULT_FEE_PERCENTILE;
use crate::ledger::rpc::DEFAULT_RPC_URL;
use crate::ledger::{LedgerClient, RpcLedgerClient, TransactionSubmitter, suggest_priority_fee};
use crate::quote::{Quote, QuoteRequest};
use crate::webapp::models::{BuildRequest, BuildResponse};
use crate::x402::middleware::error_kind;
use crate::x402::{GlobalConfig, PaymentReceipt, x402_client};

#[derive(Args)]
pub struct SwapArgs {
    /// Base URL of the swap402 server
    #[arg(long, env = "SWAP402_SERVER", default_value = "http://localhost:8402")]
    server: String,

    /// Input token mint
    #[arg(long)]
    input_mint: String,

    /// Output token mint
    #[arg(long)]
    output_mint: String,

    /// Input amount in atomic units
    #[arg(long)]
    amount: u64,

    /// Slippage tolerance in basis points
    #[arg(long, default_value_t = 50)]
    slippage_bps: u16,

    /// Percentile of recent priority fees to pay (0 disables the fee hint)
    #[arg(long, default_value_t = DEFAULT_FEE_PERCENTILE)]
    fee_percentile: u8,

    /// Build and sign, but don't submit
    #[arg(long)]
    dry_run: bool,
}

pub async fn run(args: SwapArgs, config: &GlobalConfig) -> Result<()> {
    let wallet = config
        .load_wallet()?
        .ok_or_else(|| anyhow::anyhow!("No key provided. Use --key, SWAP402_KEY, or --random"))?;
    let payer = wallet.address();

    let server = Url::parse(&args.server).with_context(|| format!("Invalid server URL '{}'", args.server))?;
    let rpc_url = config.rpc_url.as_deref().unwrap_or(DEFAULT_RPC_URL);
    let ledger = Arc::new(
        RpcLedgerClient::new(Url::parse(rpc_url).with_context(|| format!("Invalid RPC URL '{}'", rpc_url))?),
    );
    let client = x402_client(config, None)?;

    // Free quote first, so nothing is paid for a pair the provider can't route
    let request = QuoteRequest {
        input_mint: args.input_mint,
        output_mint: args.output_mint,
        amount: args.amount,
        slippage_bps: args.slippage_bps,
    };
    let quote: Quote = client
        .get(server.join("quote")?)
        .query(&request)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    tracing::info!(out_amount = ?quote.out_amount(), "quote received");

    let priority_fee = if args.fee_percentile == 0 {
        None
    } else {
        match ledger.recent_fee_samples().await {
            Ok(samples) => Some(suggest_priority_fee(&samples, args.fee_percentile)),
            Err(e) => {
                tracing::warn!(error = %e, "no priority fee hint");
                None
            }
        }
    };

    let build = BuildRequest {
        quote,
        user_public_key: payer.clone(),
        priority_fee,
    };
    let response = match client.post(server.join("premium/build")?).json(&build).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, kind = %error_kind(&e), "paid build failed");
            return Err(e.into());
        }
    };
    if let Some(receipt) = response.extensions().get::<PaymentReceipt>() {
        tracing::info!(
            amount = %receipt.amount,
            network = %receipt.network,
            tx = receipt.transaction.as_deref().unwrap_or("?"),
            "paid for build"
        );
    }
    let built: BuildResponse = response.error_for_status()?.json().await?;
    let unsigned = b64
        .decode(&built.swap_transaction)
        .context("Server returned a transaction that is not base64")?;

    let submitter = TransactionSubmitter::new(ledger, &config.submission);
    let prepared = submitter.sign_and_prepare(&wallet, &unsigned).await?;

    if args.dry_run {
        println!("{}", b64.encode(&prepared.signed));
        return Ok(());
    }

    match submitter.submit(&prepared).await {
        Ok(submitted) => {
            println!("{}", submitted.id);
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, kind = %e.kind(), "submission failed");
            Err(e.into())
        }
    }
}
