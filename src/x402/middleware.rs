//! Client-side payment middleware for reqwest
//!
//! [`X402Payments`] turns any [`ClientWithMiddleware`] request into a
//! challenge-resolving call. Per logical call it sends at most two requests:
//! the original, and, if that came back 402, one paid retry. The payment step
//! is never looped; a caller that retries the whole operation gets the same
//! idempotency token and therefore the same charge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{Extensions, HeaderValue, StatusCode};
use reqwest::{Client, ClientBuilder, Request, Response};
use reqwest_middleware as rqm;
use rqm::ClientWithMiddleware;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::chain::{Network, Wallet};
use crate::error::ErrorKind;
use crate::x402::headers::{
    AUTHORIZATION_HEADERS, HeaderCodecError, IDEMPOTENCY_KEY_HEADER, REQUIREMENT_HEADERS,
    SETTLEMENT_HEADER, decode_header, encode_header,
};
use crate::x402::idempotency::{IdempotencyRegistry, IdempotencyStore};
use crate::x402::types::{
    PaymentRequiredBody, PaymentRequirement, PaymentSignError, SettlementResponse, TokenAmount,
};

/// Per-request spend ceiling used when none is configured, in display units
pub const DEFAULT_MAX_PER_REQUEST: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Server answered 402 without a payment requirement")]
    MissingChallenge,
    #[error("Failed to decode payment requirement: {0}")]
    MalformedChallenge(#[source] HeaderCodecError),
    #[error("Payment amount {amount} cannot be represented with {decimals} decimals")]
    UnrepresentableAmount { amount: TokenAmount, decimals: u8 },
    #[error("Payment of {requested} exceeds the per-request ceiling of {ceiling}")]
    CeilingExceeded { requested: Decimal, ceiling: Decimal },
    #[error("Failed to sign payment: {0}")]
    Signing(#[source] PaymentSignError),
    #[error("Failed to encode payment payload to HTTP header: {0}")]
    HeaderEncode(#[source] HeaderCodecError),
    #[error("Request object is not cloneable. Are you passing a streaming body?")]
    RequestNotCloneable,
    #[error("Payment round trip timed out after {0:?}")]
    Timeout(Duration),
    #[error("Paid request rejected with {status}: {reason}")]
    PaymentRejected { status: StatusCode, reason: String },
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::MissingChallenge
            | PaymentError::MalformedChallenge(_)
            | PaymentError::UnrepresentableAmount { .. } => ErrorKind::MalformedChallenge,
            PaymentError::CeilingExceeded { .. } => ErrorKind::CeilingExceeded,
            PaymentError::Signing(_) => ErrorKind::SigningUnsupported,
            PaymentError::HeaderEncode(_) => ErrorKind::MalformedAuthorization,
            PaymentError::RequestNotCloneable => ErrorKind::Configuration,
            PaymentError::Timeout(_) => ErrorKind::Timeout,
            PaymentError::PaymentRejected { .. } => ErrorKind::PaymentRejected,
        }
    }

    /// The payment error inside a middleware error, if there is one
    pub fn from_middleware(error: &rqm::Error) -> Option<&PaymentError> {
        match error {
            rqm::Error::Middleware(inner) => inner.downcast_ref::<PaymentError>(),
            rqm::Error::Reqwest(_) => None,
        }
    }
}

impl From<PaymentError> for rqm::Error {
    fn from(error: PaymentError) -> Self {
        rqm::Error::Middleware(error.into())
    }
}

/// Classify any error coming out of a paying client
pub fn error_kind(error: &rqm::Error) -> ErrorKind {
    if let Some(payment) = PaymentError::from_middleware(error) {
        return payment.kind();
    }
    match error {
        rqm::Error::Reqwest(e) if e.is_timeout() => ErrorKind::Timeout,
        rqm::Error::Reqwest(_) => ErrorKind::Network,
        rqm::Error::Middleware(_) => ErrorKind::Network,
    }
}

// ============================================================================
// Payment receipt
// ============================================================================

/// Attached to the extensions of a successful paid response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    /// Atomic units paid
    pub amount: TokenAmount,
    pub decimals: u8,
    pub symbol: String,
    pub network: Network,
    pub idempotency_key: String,
    /// Settlement id from the server, if it reported one
    pub transaction: Option<String>,
}

impl PaymentReceipt {
    pub fn display_amount(&self) -> Option<Decimal> {
        self.amount.to_display(self.decimals)
    }
}

// ============================================================================
// X402Payments middleware
// ============================================================================

#[derive(Clone)]
pub struct X402Payments {
    wallet: Arc<dyn Wallet>,
    registry: Arc<dyn IdempotencyStore>,
    max_per_request: Decimal,
    round_trip_timeout: Option<Duration>,
}

impl X402Payments {
    /// A middleware backed by the process-wide idempotency registry
    pub fn new(wallet: Arc<dyn Wallet>) -> Self {
        Self {
            wallet,
            registry: IdempotencyRegistry::shared(),
            max_per_request: DEFAULT_MAX_PER_REQUEST,
            round_trip_timeout: None,
        }
    }

    /// Per-request spend ceiling in display units (e.g. `0.05` for five cents)
    pub fn max(mut self, max_per_request: Decimal) -> Self {
        self.max_per_request = max_per_request;
        self
    }

    pub fn registry(mut self, registry: Arc<dyn IdempotencyStore>) -> Self {
        self.registry = registry;
        self
    }

    /// Wall-clock limit on the whole challenge/sign/retry round trip
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.round_trip_timeout = Some(timeout);
        self
    }

    /// Refuse anything above the ceiling before the wallet is touched
    pub fn assert_max_amount(&self, requirement: &PaymentRequirement) -> Result<Decimal, PaymentError> {
        let requested = requirement
            .display_amount()
            .ok_or(PaymentError::UnrepresentableAmount {
                amount: requirement.amount,
                decimals: requirement.asset.decimals,
            })?;
        if requested > self.max_per_request {
            return Err(PaymentError::CeilingExceeded {
                requested,
                ceiling: self.max_per_request,
            });
        }
        Ok(requested)
    }

    async fn pay(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        let payer = self.wallet.address();
        let token = self
            .registry
            .get_or_create(&payer, req.url().as_str(), req.method().as_str())
            .await;
        let token_header =
            HeaderValue::from_str(&token).map_err(|e| PaymentError::HeaderEncode(HeaderCodecError::HeaderValue(e)))?;
        req.headers_mut().insert(IDEMPOTENCY_KEY_HEADER, token_header.clone());

        let retry_req = req.try_clone();
        let res = next.clone().run(req, extensions).await?;

        if res.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(res);
        }

        let header = REQUIREMENT_HEADERS
            .resolve(res.headers())
            .ok_or(PaymentError::MissingChallenge)?;
        let requirement: PaymentRequirement =
            decode_header(header).map_err(PaymentError::MalformedChallenge)?;

        let requested = self.assert_max_amount(&requirement)?;
        debug!(
            net = %requirement.network,
            amount = %requested,
            resource = %requirement.resource,
            "x402 challenge accepted"
        );

        let payload = requirement
            .sign(self.wallet.as_ref(), &token)
            .await
            .map_err(PaymentError::Signing)?;

        // Fully built before anything is sent
        let payment_header = encode_header(&payload).map_err(PaymentError::HeaderEncode)?;
        let retry_req = {
            let mut req = retry_req.ok_or(PaymentError::RequestNotCloneable)?;
            let headers = req.headers_mut();
            AUTHORIZATION_HEADERS.insert_all(headers, payment_header);
            headers.insert(IDEMPOTENCY_KEY_HEADER, token_header);
            req
        };

        let mut response = next.run(retry_req, extensions).await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<PaymentRequiredBody>(&text)
                .map(|body| body.message)
                .unwrap_or(text);
            warn!(%status, reason = %reason, "paid request rejected");
            return Err(PaymentError::PaymentRejected { status, reason }.into());
        }

        let transaction = response
            .headers()
            .get(SETTLEMENT_HEADER)
            .and_then(|value| decode_header::<SettlementResponse>(value).ok())
            .map(|settlement| settlement.transaction);
        info!(
            net = %requirement.network,
            amount = %requested,
            tx = transaction.as_deref().unwrap_or("?"),
            "x402 payment accepted"
        );

        response.extensions_mut().insert(PaymentReceipt {
            amount: requirement.amount,
            decimals: requirement.asset.decimals,
            symbol: requirement.asset.symbol.clone(),
            network: requirement.network,
            idempotency_key: token,
            transaction,
        });

        Ok(response)
    }
}

#[async_trait]
impl rqm::Middleware for X402Payments {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        match self.round_trip_timeout {
            Some(limit) => tokio::time::timeout(limit, self.pay(req, extensions, next))
                .await
                .map_err(|_| PaymentError::Timeout(limit))?,
            None => self.pay(req, extensions, next).await,
        }
    }
}

// ============================================================================
// Builder extension traits
// ============================================================================

pub struct ReqwestWithPaymentsBuilder<A> {
    inner: A,
    x402: X402Payments,
}

impl<A> ReqwestWithPaymentsBuilder<A> {
    pub fn max(self, max_per_request: Decimal) -> Self {
        Self {
            inner: self.inner,
            x402: self.x402.max(max_per_request),
        }
    }

    pub fn registry(self, registry: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            inner: self.inner,
            x402: self.x402.registry(registry),
        }
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        Self {
            inner: self.inner,
            x402: self.x402.timeout(timeout),
        }
    }
}

pub trait ReqwestWithPaymentsBuild {
    type BuildResult;

    fn build(self) -> Self::BuildResult;
}

impl ReqwestWithPaymentsBuild for ReqwestWithPaymentsBuilder<Client> {
    type BuildResult = ClientWithMiddleware;

    fn build(self) -> Self::BuildResult {
        rqm::ClientBuilder::new(self.inner).with(self.x402).build()
    }
}

impl ReqwestWithPaymentsBuild for ReqwestWithPaymentsBuilder<ClientBuilder> {
    type BuildResult = Result<ClientWithMiddleware, reqwest::Error>;

    fn build(self) -> Self::BuildResult {
        let client = self.inner.build()?;
        Ok(rqm::ClientBuilder::new(client).with(self.x402).build())
    }
}

pub trait ReqwestWithPayments {
    type Inner;

    fn with_payments(self, wallet: Arc<dyn Wallet>) -> ReqwestWithPaymentsBuilder<Self::Inner>;
}

impl ReqwestWithPayments for Client {
    type Inner = Client;

    fn with_payments(self, wallet: Arc<dyn Wallet>) -> ReqwestWithPaymentsBuilder<Self::Inner> {
        ReqwestWithPaymentsBuilder {
            inner: self,
            x402: X402Payments::new(wallet),
        }
    }
}

impl ReqwestWithPayments for ClientBuilder {
    type Inner = ClientBuilder;

    fn with_payments(self, wallet: Arc<dyn Wallet>) -> ReqwestWithPaymentsBuilder<Self::Inner> {
        ReqwestWithPaymentsBuilder {
            inner: self,
            x402: X402Payments::new(wallet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::{Request as AxumRequest, State};
    use axum::middleware::{Next, from_fn_with_state};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::{get, post};

    use crate::chain::{AssetTable, LocalWallet, WalletError, WatchOnlyWallet};
    use crate::x402::facilitator::Facilitator;
    use crate::x402::paygate::{Paygate, paygate_layer};
    use crate::x402::pricing::PricingTable;
    use crate::x402::types::{VerifyRequest, VerifyResponse};
    use crate::x402::verifier::{PaymentVerifier, VerificationMode};

    #[derive(Clone)]
    struct MockFacilitator {
        valid: bool,
    }

    impl Facilitator for MockFacilitator {
        type Error = String;

        async fn verify(&self, _request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
            Ok(VerifyResponse {
                is_valid: self.valid,
                tx_hash: self.valid.then(|| "0xfeed".to_string()),
                invalid_reason: (!self.valid).then(|| "insufficient balance".to_string()),
            })
        }
    }

    struct CountingWallet {
        inner: LocalWallet,
        signs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Wallet for CountingWallet {
        fn connected(&self) -> bool {
            true
        }

        fn address(&self) -> String {
            self.inner.address()
        }

        async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, WalletError> {
            self.signs.fetch_add(1, Ordering::SeqCst);
            self.inner.sign_message(message).await
        }

        async fn sign_transaction(&self, transaction: &[u8]) -> Result<Vec<u8>, WalletError> {
            self.inner.sign_transaction(transaction).await
        }
    }

    #[derive(Clone, Default)]
    struct Seen {
        requests: Arc<AtomicUsize>,
        idempotency_keys: Arc<Mutex<Vec<Option<String>>>>,
    }

    async fn record(State(seen): State<Seen>, request: AxumRequest, next: Next) -> AxumResponse {
        seen.requests.fetch_add(1, Ordering::SeqCst);
        let key = request
            .headers()
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        seen.idempotency_keys.lock().unwrap().push(key);
        next.run(request).await
    }

    async fn spawn_server(valid: bool) -> (SocketAddr, Seen) {
        let verifier = PaymentVerifier::new(
            Some(MockFacilitator { valid }),
            VerificationMode::Strict,
            Duration::from_secs(2),
        );
        let gate = Arc::new(Paygate::new(
            PricingTable::premium_defaults(Network::BaseSepolia),
            AssetTable::default(),
            "0x2222222222222222222222222222222222222222",
            verifier,
        ));
        let seen = Seen::default();

        let app = Router::new()
            .route("/quote", get(|| async { "free quote" }))
            .route("/premium/quote", get(|| async { "premium quote" }))
            .route("/premium/build", post(|| async { "unsigned tx" }))
            .route(
                "/bare-402",
                get(|| async { StatusCode::PAYMENT_REQUIRED.into_response() }),
            )
            .route(
                "/garbled-402",
                get(|| async {
                    (StatusCode::PAYMENT_REQUIRED, [("payment-required", "%%%")]).into_response()
                }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    "late"
                }),
            )
            .layer(from_fn_with_state(gate, paygate_layer::<MockFacilitator>))
            .layer(from_fn_with_state(seen.clone(), record));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, seen)
    }

    fn client(wallet: Arc<dyn Wallet>, max: Decimal) -> ClientWithMiddleware {
        Client::new()
            .with_payments(wallet)
            .registry(Arc::new(IdempotencyRegistry::new()))
            .max(max)
            .build()
    }

    fn counting_wallet() -> (Arc<dyn Wallet>, Arc<AtomicUsize>) {
        let signs = Arc::new(AtomicUsize::new(0));
        let wallet = CountingWallet {
            inner: LocalWallet::random(),
            signs: signs.clone(),
        };
        (Arc::new(wallet), signs)
    }

    #[tokio::test]
    async fn test_unpriced_request_is_one_call() {
        let (addr, seen) = spawn_server(true).await;
        let (wallet, signs) = counting_wallet();

        let response = client(wallet, Decimal::ONE)
            .get(format!("http://{addr}/quote"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.extensions().get::<PaymentReceipt>().is_none());
        assert_eq!(response.text().await.unwrap(), "free quote");
        assert_eq!(seen.requests.load(Ordering::SeqCst), 1);
        assert_eq!(signs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_priced_request_pays_once() {
        let (addr, seen) = spawn_server(true).await;
        let (wallet, signs) = counting_wallet();

        let response = client(wallet, Decimal::ONE)
            .post(format!("http://{addr}/premium/build"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let receipt = response.extensions().get::<PaymentReceipt>().cloned().unwrap();
        assert_eq!(receipt.amount, TokenAmount(10_000));
        assert_eq!(receipt.transaction.as_deref(), Some("0xfeed"));
        assert_eq!(receipt.display_amount().unwrap(), Decimal::new(1, 2));

        assert_eq!(response.text().await.unwrap(), "unsigned tx");
        assert_eq!(seen.requests.load(Ordering::SeqCst), 2);
        assert_eq!(signs.load(Ordering::SeqCst), 1);

        // Both attempts carried the same token
        let keys = seen.idempotency_keys.lock().unwrap().clone();
        assert_eq!(keys.len(), 2);
        assert!(keys[0].is_some());
        assert_eq!(keys[0], keys[1]);
        assert_eq!(keys[0].as_deref(), Some(receipt.idempotency_key.as_str()));
    }

    #[tokio::test]
    async fn test_retrying_whole_operation_reuses_token() {
        let (addr, seen) = spawn_server(true).await;
        let (wallet, _) = counting_wallet();
        let client = client(wallet, Decimal::ONE);

        for _ in 0..2 {
            client
                .get(format!("http://{addr}/premium/quote"))
                .send()
                .await
                .unwrap();
        }

        let keys = seen.idempotency_keys.lock().unwrap().clone();
        assert_eq!(keys.len(), 4);
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_ceiling_is_checked_before_signing() {
        let (addr, seen) = spawn_server(true).await;
        let (wallet, signs) = counting_wallet();

        let err = client(wallet, Decimal::new(1, 3))
            .get(format!("http://{addr}/premium/quote"))
            .send()
            .await
            .unwrap_err();

        assert_eq!(error_kind(&err), ErrorKind::CeilingExceeded);
        assert!(matches!(
            PaymentError::from_middleware(&err),
            Some(PaymentError::CeilingExceeded { .. })
        ));
        assert_eq!(signs.load(Ordering::SeqCst), 0);
        assert_eq!(seen.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watch_only_wallet_fails_fast() {
        let (addr, seen) = spawn_server(true).await;
        let wallet: Arc<dyn Wallet> =
            Arc::new(WatchOnlyWallet::new("0x1111111111111111111111111111111111111111"));

        let err = client(wallet, Decimal::ONE)
            .get(format!("http://{addr}/premium/quote"))
            .send()
            .await
            .unwrap_err();

        assert_eq!(error_kind(&err), ErrorKind::SigningUnsupported);
        assert_eq!(seen.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_payment_is_not_retried() {
        let (addr, seen) = spawn_server(false).await;
        let (wallet, signs) = counting_wallet();

        let err = client(wallet, Decimal::ONE)
            .get(format!("http://{addr}/premium/quote"))
            .send()
            .await
            .unwrap_err();

        match PaymentError::from_middleware(&err) {
            Some(PaymentError::PaymentRejected { status, reason }) => {
                assert_eq!(*status, StatusCode::PAYMENT_REQUIRED);
                assert!(reason.contains("insufficient balance"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(seen.requests.load(Ordering::SeqCst), 2);
        assert_eq!(signs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_402_without_requirement() {
        let (addr, _) = spawn_server(true).await;
        let (wallet, signs) = counting_wallet();

        let err = client(wallet, Decimal::ONE)
            .get(format!("http://{addr}/bare-402"))
            .send()
            .await
            .unwrap_err();

        assert!(matches!(
            PaymentError::from_middleware(&err),
            Some(PaymentError::MissingChallenge)
        ));
        assert_eq!(error_kind(&err), ErrorKind::MalformedChallenge);
        assert_eq!(signs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_402_with_undecodable_requirement() {
        let (addr, seen) = spawn_server(true).await;
        let (wallet, signs) = counting_wallet();

        let err = client(wallet, Decimal::ONE)
            .get(format!("http://{addr}/garbled-402"))
            .send()
            .await
            .unwrap_err();

        assert!(matches!(
            PaymentError::from_middleware(&err),
            Some(PaymentError::MalformedChallenge(_))
        ));
        assert_eq!(error_kind(&err), ErrorKind::MalformedChallenge);
        assert_eq!(signs.load(Ordering::SeqCst), 0);
        assert_eq!(seen.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_round_trip_timeout() {
        let (addr, _) = spawn_server(true).await;
        let (wallet, _) = counting_wallet();

        let client = Client::new()
            .with_payments(wallet)
            .registry(Arc::new(IdempotencyRegistry::new()))
            .timeout(Duration::from_millis(100))
            .build();
        let err = client
            .get(format!("http://{addr}/slow"))
            .send()
            .await
            .unwrap_err();

        assert_eq!(error_kind(&err), ErrorKind::Timeout);
    }
}
