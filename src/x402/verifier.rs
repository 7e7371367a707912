//! Server-side payment verification
//!
//! Gates run in order and the first failure wins:
//! 1. protocol version equality
//! 2. network equality (enum equality, never a name prefix)
//! 3. the facilitator's verdict, under a per-call timeout
//! 4. if the facilitator cannot answer: reject in [`VerificationMode::Strict`],
//!    or accept a structurally valid payload with a local placeholder id in
//!    [`VerificationMode::Relaxed`]
//!
//! [`PaymentVerifier::verify`] never returns an error. Failures are
//! `valid: false` plus a reason; the paygate decides status codes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chain::wallet::recover_message_signer;
use crate::x402::facilitator::Facilitator;
use crate::x402::types::{
    AuthorizationPayload, PaymentClaim, PaymentRequirement, VerificationResult, VerifyRequest,
    VerifyResponse,
};
use crate::x402::UnixTimestamp;

/// Prefix of locally generated transaction ids. `:` never appears in a hex or
/// base58 transaction id, so these cannot be mistaken for real settlements.
pub const UNSETTLED_PREFIX: &str = "unsettled:";

/// How far a claim timestamp may run ahead of the server clock
const MAX_CLOCK_SKEW_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    /// An unreachable facilitator rejects the payment
    #[default]
    Strict,
    /// An unreachable facilitator falls back to local structural checks
    Relaxed,
}

#[derive(Debug, Clone)]
pub struct PaymentVerifier<F> {
    facilitator: Option<F>,
    mode: VerificationMode,
    timeout: Duration,
}

impl<F> PaymentVerifier<F>
where
    F: Facilitator + Send + Sync,
{
    pub fn new(facilitator: Option<F>, mode: VerificationMode, timeout: Duration) -> Self {
        Self {
            facilitator,
            mode,
            timeout,
        }
    }

    pub fn mode(&self) -> VerificationMode {
        self.mode
    }

    pub async fn verify(
        &self,
        payload: &AuthorizationPayload,
        requirement: &PaymentRequirement,
    ) -> VerificationResult {
        if payload.protocol_version != requirement.protocol_version {
            return VerificationResult::invalid(format!(
                "protocol version mismatch: expected {}, got {}",
                requirement.protocol_version, payload.protocol_version
            ));
        }

        if payload.network != requirement.network {
            return VerificationResult::invalid(format!(
                "network mismatch: expected {}, got {}",
                requirement.network, payload.network
            ));
        }

        let unreachable = match self.ask_facilitator(payload, requirement).await {
            Ok(response) if response.is_valid => {
                debug!(tx = ?response.tx_hash, "facilitator accepted payment");
                return VerificationResult::valid(response.tx_hash);
            }
            Ok(response) => {
                let reason = response
                    .invalid_reason
                    .unwrap_or_else(|| "rejected by facilitator".to_string());
                return VerificationResult::invalid(reason);
            }
            Err(reason) => reason,
        };

        match self.mode {
            VerificationMode::Strict => {
                warn!(reason = %unreachable, "facilitator unavailable, rejecting payment");
                VerificationResult::invalid(format!("facilitator unavailable: {unreachable}"))
            }
            VerificationMode::Relaxed => {
                let now = match UnixTimestamp::try_now() {
                    Ok(now) => now,
                    Err(e) => return VerificationResult::invalid(format!("clock error: {e}")),
                };
                match check_structure(payload, requirement, now) {
                    Ok(()) => {
                        let pseudo = pseudo_transaction_id();
                        warn!(
                            reason = %unreachable,
                            tx = %pseudo,
                            "facilitator unavailable, accepting unsettled payment"
                        );
                        VerificationResult::valid(Some(pseudo))
                    }
                    Err(reason) => VerificationResult::invalid(reason),
                }
            }
        }
    }

    /// `Err` carries why the facilitator could not produce a verdict
    async fn ask_facilitator(
        &self,
        payload: &AuthorizationPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerifyResponse, String> {
        let Some(facilitator) = &self.facilitator else {
            return Err("no facilitator configured".to_string());
        };

        let request = VerifyRequest {
            payment_payload: payload.clone(),
            payment_requirements: requirement.clone(),
        };

        match tokio::time::timeout(self.timeout, facilitator.verify(&request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.timeout)),
        }
    }
}

/// Local checks that a payload really authorizes payment of `requirement`
pub fn check_structure(
    payload: &AuthorizationPayload,
    requirement: &PaymentRequirement,
    now: UnixTimestamp,
) -> Result<(), String> {
    let claim = PaymentClaim::parse(&payload.message)
        .map_err(|e| format!("malformed payment claim: {e}"))?;

    if payload.scheme != requirement.scheme || claim.scheme != requirement.scheme {
        return Err(format!("scheme mismatch: expected {}", requirement.scheme));
    }
    if claim.protocol_version != requirement.protocol_version {
        return Err("protocol version mismatch in claim".to_string());
    }
    if claim.network != requirement.network {
        return Err(format!(
            "network mismatch in claim: expected {}, got {}",
            requirement.network, claim.network
        ));
    }
    if claim.amount != requirement.amount {
        return Err(format!(
            "amount mismatch: expected {}, got {}",
            requirement.amount, claim.amount
        ));
    }
    if !claim.pay_to.eq_ignore_ascii_case(&requirement.pay_to) {
        return Err("recipient mismatch".to_string());
    }
    if claim.resource != requirement.resource {
        return Err("resource mismatch".to_string());
    }
    if claim.idempotency_key != payload.idempotency_key {
        return Err("idempotency key mismatch".to_string());
    }
    if !claim.payer.eq_ignore_ascii_case(&payload.public_key) {
        return Err("payer does not match public key".to_string());
    }

    let signer = recover_message_signer(payload.message.as_bytes(), &payload.signature)
        .map_err(|e| format!("invalid signature: {e}"))?;
    if !signer.to_string().eq_ignore_ascii_case(&payload.public_key) {
        return Err("signature does not match public key".to_string());
    }

    if claim.timestamp > now + MAX_CLOCK_SKEW_SECS {
        return Err("payment claim is from the future".to_string());
    }
    if claim.timestamp.seconds_until(now) > requirement.max_timeout_seconds {
        return Err("payment claim expired".to_string());
    }

    Ok(())
}

fn pseudo_transaction_id() -> String {
    let bytes: [u8; 16] = rand::random();
    format!("{UNSETTLED_PREFIX}{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::chain::{AssetInfo, LocalWallet, Network};
    use crate::x402::types::{PROTOCOL_VERSION, Scheme, TokenAmount};

    // Mock facilitator for testing
    #[derive(Clone)]
    enum MockFacilitator {
        Unreachable,
        Verdict(VerifyResponse),
        Hangs,
    }

    #[derive(Clone)]
    struct Counting {
        inner: MockFacilitator,
        calls: Arc<AtomicUsize>,
    }

    impl Facilitator for Counting {
        type Error = String;

        async fn verify(&self, _request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.inner {
                MockFacilitator::Unreachable => Err("connection refused".to_string()),
                MockFacilitator::Verdict(response) => Ok(response.clone()),
                MockFacilitator::Hangs => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err("unreachable".to_string())
                }
            }
        }
    }

    fn counting(inner: MockFacilitator) -> (Counting, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Counting {
                inner,
                calls: calls.clone(),
            },
            calls,
        )
    }

    fn requirement(network: Network) -> PaymentRequirement {
        PaymentRequirement {
            protocol_version: PROTOCOL_VERSION,
            scheme: Scheme::Exact,
            network,
            amount: TokenAmount(5000),
            resource: url::Url::parse("http://localhost/premium/quote").unwrap(),
            description: "Premium quote".into(),
            mime_type: "application/json".into(),
            pay_to: "0x2222222222222222222222222222222222222222".into(),
            max_timeout_seconds: 300,
            asset: AssetInfo::new("mint", 6, "USDC"),
        }
    }

    async fn signed(requirement: &PaymentRequirement) -> AuthorizationPayload {
        requirement
            .sign(&LocalWallet::random(), "idem-1")
            .await
            .unwrap()
    }

    fn verifier(
        facilitator: Option<Counting>,
        mode: VerificationMode,
    ) -> PaymentVerifier<Counting> {
        PaymentVerifier::new(facilitator, mode, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_network_mismatch_is_rejected_before_facilitator() {
        let (facilitator, calls) = counting(MockFacilitator::Verdict(VerifyResponse {
            is_valid: true,
            tx_hash: Some("0xabc".into()),
            invalid_reason: None,
        }));
        let verifier = verifier(Some(facilitator), VerificationMode::Relaxed);

        let mut payload = signed(&requirement(Network::Solana)).await;
        payload.network = Network::SolanaDevnet;

        let result = verifier.verify(&payload, &requirement(Network::Solana)).await;
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("network mismatch"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_protocol_version_must_match() {
        let verifier = verifier(None, VerificationMode::Relaxed);
        let req = requirement(Network::Base);
        let mut payload = signed(&req).await;
        payload.protocol_version = 2;

        let result = verifier.verify(&payload, &req).await;
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("protocol version"));
    }

    #[tokio::test]
    async fn test_facilitator_verdict_is_trusted() {
        let (facilitator, calls) = counting(MockFacilitator::Verdict(VerifyResponse {
            is_valid: true,
            tx_hash: Some("5VERYrealSig".into()),
            invalid_reason: None,
        }));
        let verifier = verifier(Some(facilitator), VerificationMode::Strict);
        let req = requirement(Network::Base);

        let result = verifier.verify(&signed(&req).await, &req).await;
        assert!(result.valid);
        assert_eq!(result.tx_hash.as_deref(), Some("5VERYrealSig"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (facilitator, _) = counting(MockFacilitator::Verdict(VerifyResponse {
            is_valid: false,
            tx_hash: None,
            invalid_reason: Some("insufficient funds".into()),
        }));
        let verifier = PaymentVerifier::new(
            Some(facilitator),
            VerificationMode::Relaxed,
            Duration::from_secs(2),
        );
        let result = verifier.verify(&signed(&req).await, &req).await;
        assert!(!result.valid);
        assert_eq!(result.error.as_deref(), Some("insufficient funds"));
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_when_unreachable() {
        let (facilitator, _) = counting(MockFacilitator::Unreachable);
        let verifier = verifier(Some(facilitator), VerificationMode::Strict);
        let req = requirement(Network::Base);

        let result = verifier.verify(&signed(&req).await, &req).await;
        assert!(!result.valid);
        assert!(result.tx_hash.is_none());
    }

    #[tokio::test]
    async fn test_relaxed_mode_issues_distinct_pseudo_ids() {
        let (facilitator, _) = counting(MockFacilitator::Unreachable);
        let verifier = verifier(Some(facilitator), VerificationMode::Relaxed);
        let req = requirement(Network::Base);
        let payload = signed(&req).await;

        let first = verifier.verify(&payload, &req).await;
        let second = verifier.verify(&payload, &req).await;
        assert!(first.valid && second.valid);

        let first = first.tx_hash.unwrap();
        let second = second.tx_hash.unwrap();
        assert!(first.starts_with(UNSETTLED_PREFIX));
        assert_eq!(first.len(), UNSETTLED_PREFIX.len() + 32);
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_facilitator_timeout_counts_as_unreachable() {
        let (facilitator, calls) = counting(MockFacilitator::Hangs);
        let verifier = verifier(Some(facilitator), VerificationMode::Strict);
        let req = requirement(Network::Base);

        let result = verifier.verify(&signed(&req).await, &req).await;
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("timed out"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_relaxed_mode_still_checks_structure() {
        let verifier = verifier(None, VerificationMode::Relaxed);
        let req = requirement(Network::Base);

        // Signed for a different amount
        let mut cheaper = req.clone();
        cheaper.amount = TokenAmount(1);
        let result = verifier.verify(&signed(&cheaper).await, &req).await;
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("amount mismatch"));

        // Tampered signature
        let mut payload = signed(&req).await;
        payload.signature[10] ^= 0xff;
        let result = verifier.verify(&payload, &req).await;
        assert!(!result.valid);

        // Claimed payer differs from signer
        let mut payload = signed(&req).await;
        payload.public_key = "0x3333333333333333333333333333333333333333".into();
        assert!(!verifier.verify(&payload, &req).await.valid);
    }

    #[tokio::test]
    async fn test_expired_claim_is_rejected() {
        let req = requirement(Network::Base);
        let payload = signed(&req).await;
        let now = UnixTimestamp::try_now().unwrap();

        assert!(check_structure(&payload, &req, now).is_ok());
        let later = now + req.max_timeout_seconds + 10;
        assert_eq!(
            check_structure(&payload, &req, later).unwrap_err(),
            "payment claim expired"
        );
    }
}
