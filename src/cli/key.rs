use std::io::{self, IsTerminal, Read};

use alloy_primitives::keccak256;
use anyhow::Result;
use clap::{Args, Subcommand};

use crate::chain::LocalWallet;
use crate::config::GlobalConfig;

#[derive(Args)]
pub struct KeyCommandArgs {
    #[command(subcommand)]
    command: KeyCommands,
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Generate a random secret key
    Random,

    /// Derive a new secret key from the current key using a namespace
    Derive {
        /// Namespace for key derivation (e.g., "devnet", "bot-a")
        namespace: String,
    },

    /// Display the address for the current key
    Address,
}

pub async fn run(args: KeyCommandArgs, config: &GlobalConfig) -> Result<()> {
    if let KeyCommands::Random = args.command {
        println!("{}", hex::encode(LocalWallet::random().to_bytes()));
        return Ok(());
    }

    let wallet = match config.load_wallet()? {
        Some(wallet) => wallet,
        None => read_stdin_key()?,
    };

    match args.command {
        KeyCommands::Derive { namespace } => {
            println!("{}", hex::encode(derive_key(&wallet, &namespace)?.to_bytes()));
        }
        KeyCommands::Address => {
            println!("{}", wallet.evm_address());
        }
        KeyCommands::Random => {}
    }
    Ok(())
}

/// The key command also accepts the key on stdin
fn read_stdin_key() -> Result<LocalWallet> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        anyhow::bail!(
            "No key provided. Use --key flag, set SWAP402_KEY environment variable, pipe key to stdin, or use --random"
        );
    }
    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    buffer
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid private key: {}", e))
}

/// keccak256(key || namespace) as a new key
fn derive_key(wallet: &LocalWallet, namespace: &str) -> Result<LocalWallet> {
    let mut input = wallet.to_bytes().to_vec();
    input.extend_from_slice(namespace.as_bytes());
    Ok(LocalWallet::from_bytes(keccak256(&input).as_slice())?)
}
