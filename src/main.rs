use anyhow::Result;
use clap::{Parser, Subcommand};

use swap402::{cli, config, webapp, x402};

#[derive(Parser)]
#[command(name = "swap402")]
#[command(about = "Pay-per-request swap quotes over HTTP 402, with reliable ledger submission")]
#[command(long_about = "\
Pay-per-request swap quotes over HTTP 402, with reliable ledger submission

swap402 runs a quote server whose premium routes answer HTTP 402 until paid,
and a client that pays those challenges (within a per-request ceiling) and
drives the resulting transaction to confirmation.

TYPICAL WORKFLOWS:

  Server side:
    swap402 serve --pay-to 0x... --facilitator-url https://facilitator.example

  Client side:
    swap402 key random > key.hex
    swap402 -k @key.hex fetch http://localhost:8402/premium/quote?inputMint=...
    swap402 -k @key.hex swap --input-mint ... --output-mint ... --amount 1000000

For more details on each command, use: swap402 <command> --help
")]
struct Cli {
    /// Global configuration arguments
    #[command(flatten)]
    config: config::ConfigArgs,

    /// Private key configuration
    #[command(flatten)]
    key: x402::KeyArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the paid quote server
    ///
    ///  - Free routes: /health, /quote.
    ///
    ///  - Priced routes (/premium/quote, /premium/build) answer 402 until paid.
    ///
    /// Example:
    ///
    ///  $ swap402 serve --pay-to 0x...
    ///
    ///  $ swap402 --port 8080 serve --host 127.0.0.1
    ///
    Serve(webapp::ServeArgs),

    /// Make an HTTP request, paying any 402 challenge
    ///
    /// Example:
    ///
    ///  $ swap402 -k @key.hex --max-per-request 0.02 fetch http://localhost:8402/premium/quote?...
    ///
    Fetch(cli::fetch::FetchArgs),

    /// Quote, pay for a build, sign and submit a swap
    ///
    /// Example:
    ///
    ///  $ swap402 -k @key.hex swap --input-mint EPjF... --output-mint So11... --amount 1000000
    ///
    Swap(cli::swap::SwapArgs),

    /// Key utilities
    ///
    /// Example:
    ///
    ///  $ swap402 key random
    ///
    ///  $ swap402 -k @key.hex key address
    ///
    Key(cli::key::KeyCommandArgs),

    /// Display version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build GlobalConfig once from top-level args
    let mut global_config = config::GlobalConfig::from_args(&cli.config)?;
    global_config.merge_key_args(&cli.key)?;

    // Initialize tracing after config is fully merged
    global_config.init_tracing();

    tracing::debug!("swap402 starting");

    match cli.command {
        Commands::Serve(args) => webapp::run(args, &global_config).await?,
        Commands::Fetch(args) => cli::fetch::run(args, &global_config).await?,
        Commands::Swap(args) => cli::swap::run(args, &global_config).await?,
        Commands::Key(args) => cli::key::run(args, &global_config).await?,
        Commands::Version => println!("{}", cli::version("swap402")),
    }

    tracing::debug!("swap402 shutting down");

    Ok(())
}
