//! Wire types for the pay-per-request protocol
//!
//! Every type here crosses a process boundary: requirements travel in the 402
//! challenge, authorization payloads in the paid retry, verify requests and
//! responses between server and facilitator. JSON field names are camelCase.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::chain::{AssetInfo, Network, Wallet, WalletError};
use crate::x402::UnixTimestamp;

// ============================================================================
// Protocol Version
// ============================================================================

/// The only protocol version this crate speaks. Versions must match exactly.
pub const PROTOCOL_VERSION: u8 = 1;

// ============================================================================
// Scheme
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exact")
    }
}

// ============================================================================
// Money Amount and Token Amount
// ============================================================================

/// A display-currency price, e.g. `$0.005`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MoneyAmount(pub Decimal);

#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("Failed to parse decimal")]
    DecimalParse,
    #[error("Negative amount not allowed")]
    Negative,
    #[error("Amount does not fit in atomic units")]
    Overflow,
}

impl MoneyAmount {
    /// Scale to atomic units of an asset with `decimals` places, rounding half-even
    pub fn as_token_amount(&self, decimals: u8) -> Result<TokenAmount, MoneyAmountParseError> {
        if self.0.is_sign_negative() && !self.0.is_zero() {
            return Err(MoneyAmountParseError::Negative);
        }
        let factor = 10u128
            .checked_pow(u32::from(decimals))
            .and_then(Decimal::from_u128)
            .ok_or(MoneyAmountParseError::Overflow)?;
        let token_units = self
            .0
            .checked_mul(factor)
            .ok_or(MoneyAmountParseError::Overflow)?;

        token_units
            .round()
            .to_u128()
            .map(TokenAmount)
            .ok_or(MoneyAmountParseError::Overflow)
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    /// Accepts `0.005` or `$0.005`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix('$').unwrap_or(s);
        let decimal = Decimal::from_str(s).map_err(|_| MoneyAmountParseError::DecimalParse)?;
        if decimal < Decimal::zero() {
            return Err(MoneyAmountParseError::Negative);
        }
        Ok(MoneyAmount(decimal))
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0.normalize())
    }
}

/// An amount in the smallest indivisible unit of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub u128);

impl TokenAmount {
    /// Convert back to display units: `amount / 10^decimals`
    pub fn to_display(&self, decimals: u8) -> Option<Decimal> {
        let raw = i128::try_from(self.0).ok()?;
        Decimal::try_from_i128_with_scale(raw, decimals as u32)
            .ok()
            .map(|d| d.normalize())
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = u128::from_str(&s).map_err(serde::de::Error::custom)?;
        Ok(TokenAmount(value))
    }
}

// ============================================================================
// Hex-encoded signature bytes
// ============================================================================

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Payment Requirement
// ============================================================================

/// What the server wants in exchange for one call to a priced route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub protocol_version: u8,
    pub scheme: Scheme,
    pub network: Network,
    /// Atomic units of `asset`
    pub amount: TokenAmount,
    pub resource: Url,
    pub description: String,
    pub mime_type: String,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: AssetInfo,
}

/// Error type for payment signing operations
#[derive(Debug, thiserror::Error)]
pub enum PaymentSignError {
    #[error("Clock error: {0}")]
    Clock(#[source] std::time::SystemTimeError),
    #[error("Failed to encode payment claim: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Signing failed: {0}")]
    Wallet(#[source] WalletError),
}

impl PaymentRequirement {
    /// `amount / 10^decimals`, or `None` if it does not fit a decimal
    pub fn display_amount(&self) -> Option<Decimal> {
        self.amount.to_display(self.asset.decimals)
    }

    /// Build the canonical claim for this requirement and have `wallet` sign it.
    ///
    /// Fails fast, before any signing call, if the wallet is not connected.
    pub async fn sign(
        &self,
        wallet: &dyn Wallet,
        idempotency_key: &str,
    ) -> Result<AuthorizationPayload, PaymentSignError> {
        if !wallet.connected() {
            return Err(PaymentSignError::Wallet(WalletError::NotConnected));
        }

        let now = UnixTimestamp::try_now().map_err(PaymentSignError::Clock)?;
        let payer = wallet.address();
        let claim = PaymentClaim {
            protocol_version: self.protocol_version,
            scheme: self.scheme,
            network: self.network,
            amount: self.amount,
            resource: self.resource.clone(),
            pay_to: self.pay_to.clone(),
            timestamp: now,
            payer: payer.clone(),
            idempotency_key: idempotency_key.to_string(),
        };
        let message = claim.canonical().map_err(PaymentSignError::Encode)?;

        let signature = wallet
            .sign_message(message.as_bytes())
            .await
            .map_err(PaymentSignError::Wallet)?;

        Ok(AuthorizationPayload {
            protocol_version: self.protocol_version,
            scheme: self.scheme,
            network: self.network,
            message,
            signature,
            public_key: payer,
            idempotency_key: idempotency_key.to_string(),
        })
    }
}

// ============================================================================
// Payment Claim and Authorization Payload
// ============================================================================

/// The statement the payer's wallet signs.
///
/// The canonical string is compact JSON in field declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentClaim {
    pub protocol_version: u8,
    pub scheme: Scheme,
    pub network: Network,
    pub amount: TokenAmount,
    pub resource: Url,
    pub pay_to: String,
    pub timestamp: UnixTimestamp,
    pub payer: String,
    pub idempotency_key: String,
}

impl PaymentClaim {
    pub fn canonical(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn parse(message: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(message)
    }
}

/// Client-signed proof of payment intent, sent on the paid retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPayload {
    pub protocol_version: u8,
    pub scheme: Scheme,
    pub network: Network,
    /// Canonical [`PaymentClaim`] string
    pub message: String,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub public_key: String,
    pub idempotency_key: String,
}

// ============================================================================
// Verification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    pub fn valid(tx_hash: Option<String>) -> Self {
        Self {
            valid: true,
            tx_hash,
            error: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            tx_hash: None,
            error: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub payment_payload: AuthorizationPayload,
    pub payment_requirements: PaymentRequirement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_optional_tx_hash")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

/// Deserialize Option<String>, treating empty strings as None
fn deserialize_optional_tx_hash<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.filter(|s| !s.is_empty()))
}

// ============================================================================
// Challenge body and settlement receipt
// ============================================================================

/// JSON body of a 402 response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequiredBody {
    pub error: String,
    pub message: String,
    /// Display price, e.g. `$0.005`
    pub price: String,
    pub network: Network,
}

/// Carried base64(JSON) in the settlement header of a paid response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    pub transaction: String,
    pub network: Network,
    pub payer: String,
}
