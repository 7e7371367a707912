//! Static route pricing
//!
//! Routes are keyed by `"METHOD PATH"`, e.g. `"POST /premium/build"`. A route
//! absent from the table is free.

use std::collections::BTreeMap;

use http::Method;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::chain::{AssetInfo, Network};
use crate::x402::types::{
    MoneyAmount, MoneyAmountParseError, PROTOCOL_VERSION, PaymentRequirement, Scheme,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEntry {
    /// Display price, e.g. `0.005` for half a cent
    pub price: Decimal,
    pub description: String,
    pub network: Network,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    "application/json".to_string()
}

impl PriceEntry {
    pub fn new(price: Decimal, description: impl Into<String>, network: Network) -> Self {
        Self {
            price,
            description: description.into(),
            network,
            mime_type: default_mime_type(),
        }
    }

    pub fn money(&self) -> MoneyAmount {
        MoneyAmount(self.price)
    }

    /// Synthesize the requirement for one request to this route
    pub fn requirement(
        &self,
        asset: &AssetInfo,
        resource: Url,
        pay_to: &str,
        max_timeout_seconds: u64,
    ) -> Result<PaymentRequirement, MoneyAmountParseError> {
        Ok(PaymentRequirement {
            protocol_version: PROTOCOL_VERSION,
            scheme: Scheme::Exact,
            network: self.network,
            amount: self.money().as_token_amount(asset.decimals)?,
            resource,
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            pay_to: pay_to.to_string(),
            max_timeout_seconds,
            asset: asset.clone(),
        })
    }
}

/// `"METHOD PATH"` → price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingTable {
    routes: BTreeMap<String, PriceEntry>,
}

pub fn route_key(method: &Method, path: &str) -> String {
    format!("{} {}", method.as_str().to_ascii_uppercase(), path)
}

impl PricingTable {
    pub fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// The two premium routes of the quote server, priced on `network`
    pub fn premium_defaults(network: Network) -> Self {
        let mut table = Self::new();
        table.insert(
            &Method::GET,
            "/premium/quote",
            PriceEntry::new(Decimal::new(5, 3), "Premium swap quote", network),
        );
        table.insert(
            &Method::POST,
            "/premium/build",
            PriceEntry::new(Decimal::new(1, 2), "Build unsigned swap transaction", network),
        );
        table
    }

    pub fn insert(&mut self, method: &Method, path: &str, entry: PriceEntry) {
        self.routes.insert(route_key(method, path), entry);
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Option<&PriceEntry> {
        self.routes.get(&route_key(method, path))
    }

    /// Every network some route is priced on
    pub fn networks(&self) -> impl Iterator<Item = Network> + '_ {
        self.routes.values().map(|entry| entry.network)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PriceEntry)> {
        self.routes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::premium_defaults(Network::BaseSepolia)
    }
}
