//! x402 payment protocol integration
//!
//! This module contains all x402-related functionality including:
//! - Wire types and header codecs
//! - Payment middleware for HTTP clients
//! - Payment gate and verifier for HTTP servers
//! - Idempotency tokens shared by both sides

pub mod client;
pub mod facilitator;
pub mod headers;
pub mod idempotency;
pub mod middleware;
pub mod paygate;
pub mod pricing;
pub mod timestamp;
pub mod types;
pub mod verifier;

pub use facilitator::{Facilitator, FacilitatorClient, FacilitatorError};
pub use idempotency::{IdempotencyRegistry, IdempotencyStore};
pub use paygate::{Paygate, VerifiedPayment, paygate_layer};
pub use pricing::{PriceEntry, PricingTable};
pub use timestamp::UnixTimestamp;
pub use types::{
    AuthorizationPayload, MoneyAmount, PaymentRequirement, PaymentSignError, TokenAmount,
    VerificationResult,
};
pub use verifier::{PaymentVerifier, VerificationMode};

pub use client::{ClientConfig, GlobalConfig, KeyArgs, x402_client};
pub use middleware::{PaymentError, PaymentReceipt, X402Payments};
