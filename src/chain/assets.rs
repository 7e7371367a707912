//! Asset table: which token a network's prices are settled in
//!
//! Every priced route names a network; the asset table supplies the token
//! address, symbol and decimals used to turn a display price into atomic units.
//! A priced network with no entry here is a configuration error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Network;

/// Token metadata embedded in every payment requirement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetInfo {
    /// Token contract / mint address
    pub address: String,
    /// Number of decimal places of the atomic unit
    pub decimals: u8,
    /// Ticker, e.g. "USDC"
    pub symbol: String,
}

impl AssetInfo {
    pub fn new(address: impl Into<String>, decimals: u8, symbol: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            decimals,
            symbol: symbol.into(),
        }
    }
}

// ============================================================================
// Built-in USDC deployments
// ============================================================================

const USDC_DEPLOYMENTS: &[(Network, &str)] = &[
    (Network::Solana, "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
    (Network::SolanaDevnet, "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU"),
    (Network::Base, "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
    (Network::BaseSepolia, "0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
];

const USDC_DECIMALS: u8 = 6;

/// Network → asset mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetTable {
    assets: BTreeMap<Network, AssetInfo>,
}

impl AssetTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            assets: BTreeMap::new(),
        }
    }

    /// Create a table with USDC on every built-in network
    pub fn with_usdc_defaults() -> Self {
        let mut table = Self::new();
        for (network, address) in USDC_DEPLOYMENTS {
            table.register(*network, AssetInfo::new(*address, USDC_DECIMALS, "USDC"));
        }
        table
    }

    /// Register (or replace) the asset for a network
    pub fn register(&mut self, network: Network, asset: AssetInfo) {
        self.assets.insert(network, asset);
    }

    pub fn lookup(&self, network: Network) -> Option<&AssetInfo> {
        self.assets.get(&network)
    }

    pub fn networks(&self) -> impl Iterator<Item = Network> + '_ {
        self.assets.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl Default for AssetTable {
    fn default() -> Self {
        Self::with_usdc_defaults()
    }
}
