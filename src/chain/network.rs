//! Payment network definitions

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Metadata for a payment network
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    /// The canonical network identifier
    pub network: Network,
    /// Whether this is a testnet
    pub is_testnet: bool,
    /// All valid names/aliases for this network (first is canonical, used for Display and on the wire)
    pub names: &'static [&'static str],
}

// Single source of truth for networks: generates the enum (with serde names and
// aliases), NETWORK_REGISTRY and the lookup impls.
// Syntax: VariantName => (is_testnet, [names...])
macro_rules! define_networks {
    ($(
        $variant:ident => ($is_testnet:expr, [$first_name:expr $(, $other_names:expr)* $(,)?])
    ),+ $(,)?) => {
        /// Networks a payment can be made on.
        ///
        /// Two networks are the same only if the variants are equal; names are
        /// never compared by prefix.
        #[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum Network {
            $(
                #[serde(rename = $first_name $(, alias = $other_names)*)]
                $variant,
            )+
        }

        // Order matches the enum declaration, so `*self as usize` indexes it.
        const NETWORK_REGISTRY: &[NetworkInfo] = &[
            $(
                NetworkInfo {
                    network: Network::$variant,
                    is_testnet: $is_testnet,
                    names: &[$first_name $(, $other_names)*],
                },
            )+
        ];

        impl Network {
            /// Get the metadata for this network (O(1) lookup)
            pub fn info(&self) -> &'static NetworkInfo {
                &NETWORK_REGISTRY[*self as usize]
            }

            /// Return all known [`Network`] variants.
            pub fn variants() -> impl Iterator<Item = Network> {
                NETWORK_REGISTRY.iter().map(|info| info.network)
            }
        }
    };
}

define_networks! {
    Solana        => (false, ["solana", "solana-mainnet", "Solana"]),
    SolanaDevnet  => (true,  ["solana-devnet", "SolanaDevnet"]),
    Base          => (false, ["base", "Base"]),
    BaseSepolia   => (true,  ["base-sepolia", "BaseSepolia"]),
}

impl Network {
    /// Get all valid names/aliases for this network
    pub fn names(&self) -> &'static [&'static str] {
        self.info().names
    }

    /// Get the primary name (first in names array, kebab-case)
    pub fn name(&self) -> &'static str {
        self.info().names[0]
    }

    /// Check if this is a testnet
    pub fn is_testnet(&self) -> bool {
        self.info().is_testnet
    }

    /// Parse a network name string (supports all aliases, case-insensitive)
    pub fn parse(s: &str) -> Option<Network> {
        NETWORK_REGISTRY.iter().find_map(|info| {
            info.names
                .iter()
                .any(|name| name.eq_ignore_ascii_case(s))
                .then_some(info.network)
        })
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_network() {
        assert_eq!(Network::parse("base"), Some(Network::Base));
        assert_eq!(Network::parse("BaseSepolia"), Some(Network::BaseSepolia));
        assert_eq!(Network::parse("solana-mainnet"), Some(Network::Solana));
        assert!(Network::parse("invalid").is_none());
    }

    #[test]
    fn test_registry_order_matches_enum() {
        for network in Network::variants() {
            assert_eq!(network.info().network, network);
        }
    }

    #[test]
    fn test_prefix_is_not_equality() {
        // "solana" is a prefix of "solana-devnet", they must stay distinct
        assert_ne!(Network::parse("solana"), Network::parse("solana-devnet"));
        assert!(Network::parse("sol").is_none());
        assert!(serde_json::from_str::<Network>("\"solana-dev\"").is_err());
    }

    #[test]
    fn test_serde_uses_canonical_name() {
        assert_eq!(serde_json::to_string(&Network::SolanaDevnet).unwrap(), "\"solana-devnet\"");
        let parsed: Network = serde_json::from_str("\"BaseSepolia\"").unwrap();
        assert_eq!(parsed, Network::BaseSepolia);
    }

    #[test]
    fn test_is_testnet() {
        assert!(Network::BaseSepolia.is_testnet());
        assert!(!Network::Base.is_testnet());
        assert!(Network::SolanaDevnet.is_testnet());
    }
}
