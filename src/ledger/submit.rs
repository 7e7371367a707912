//! Reliable submission of signed transactions
//!
//! A transaction is prepared once, which pins its deadline height, then
//! driven through bounded attempts:
//!
//! ```text
//! Prepared -> Sent -> Confirmed
//!                  -> Expired             (height passed the deadline, terminal)
//!                  -> Failed(retryable)   (backoff, then Sent again)
//!                  -> Failed(terminal)    (attempts exhausted)
//! ```
//!
//! The deadline is checked before every send, the first included, and an
//! expired transaction is never handed to the ledger again.

use std::fmt::{self, Display};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Commitment, LedgerClient, LedgerError, SubmitOptions};
use crate::chain::{Wallet, WalletError};
use crate::error::ErrorKind;

/// Submission settings as they appear in configuration.
///
/// Preflight simulation is not configurable; every send asks for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubmissionPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Blocks past the preparation height before the transaction expires
    pub deadline_window: u64,
    pub commitment: Commitment,
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            deadline_window: 150,
            commitment: Commitment::Confirmed,
        }
    }
}

impl SubmissionPolicy {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions {
            preflight: true,
            commitment: self.commitment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// `min(base * 2^attempt, max_delay)`, saturating
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// A signed transaction with its deadline pinned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSubmission {
    pub signed: Vec<u8>,
    pub deadline_height: u64,
}

impl PreparedSubmission {
    fn attempt(&self, attempt_number: u32) -> SubmissionAttempt<'_> {
        SubmissionAttempt {
            signed_bytes: &self.signed,
            deadline_height: self.deadline_height,
            attempt_number,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SubmissionAttempt<'a> {
    pub signed_bytes: &'a [u8],
    pub deadline_height: u64,
    /// 1-based
    pub attempt_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    Prepared,
    Sent { attempt: u32 },
    Confirmed,
    Expired,
    Failed { retryable: bool },
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            SubmissionState::Prepared
                | SubmissionState::Sent { .. }
                | SubmissionState::Failed { retryable: true }
        )
    }
}

impl Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionState::Prepared => f.write_str("prepared"),
            SubmissionState::Sent { attempt } => write!(f, "sent (attempt {attempt})"),
            SubmissionState::Confirmed => f.write_str("confirmed"),
            SubmissionState::Expired => f.write_str("expired"),
            SubmissionState::Failed { retryable: true } => f.write_str("failed (retryable)"),
            SubmissionState::Failed { retryable: false } => f.write_str("failed (terminal)"),
        }
    }
}

/// A transaction that reached the requested commitment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub id: String,
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("transaction expired: ledger height {height} is past deadline {deadline}; rebuild and re-sign")]
    Expired { deadline: u64, height: u64 },
    #[error("submission failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: LedgerError,
    },
    #[error("could not read ledger height: {0}")]
    Height(#[source] LedgerError),
    #[error("could not sign transaction: {0}")]
    Signing(#[source] WalletError),
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::Expired { .. } => ErrorKind::SubmissionExpired,
            SubmitError::Exhausted { .. } => ErrorKind::SubmissionExhausted,
            SubmitError::Height(e) => e.kind(),
            SubmitError::Signing(e) => e.kind(),
        }
    }
}

enum AttemptOutcome {
    Confirmed(String),
    Expired { height: u64 },
    Failed(LedgerError),
}

pub struct TransactionSubmitter<L> {
    ledger: L,
    policy: RetryPolicy,
    options: SubmitOptions,
    deadline_window: u64,
}

impl<L: LedgerClient> TransactionSubmitter<L> {
    pub fn new(ledger: L, policy: &SubmissionPolicy) -> Self {
        Self {
            ledger,
            policy: policy.retry_policy(),
            options: policy.submit_options(),
            deadline_window: policy.deadline_window,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Pin the deadline for an already-signed transaction
    pub async fn prepare(&self, signed: Vec<u8>) -> Result<PreparedSubmission, SubmitError> {
        let height = self
            .ledger
            .current_height()
            .await
            .map_err(SubmitError::Height)?;
        let prepared = PreparedSubmission {
            signed,
            deadline_height: height.saturating_add(self.deadline_window),
        };
        debug!(
            height,
            deadline = prepared.deadline_height,
            state = %SubmissionState::Prepared,
            "submission prepared"
        );
        Ok(prepared)
    }

    /// Sign `unsigned` with `wallet`, then [`prepare`](Self::prepare) it
    pub async fn sign_and_prepare(
        &self,
        wallet: &dyn Wallet,
        unsigned: &[u8],
    ) -> Result<PreparedSubmission, SubmitError> {
        let signed = wallet
            .sign_transaction(unsigned)
            .await
            .map_err(SubmitError::Signing)?;
        self.prepare(signed).await
    }

    /// Drive a prepared transaction to confirmation or a terminal failure
    pub async fn submit(&self, prepared: &PreparedSubmission) -> Result<Submitted, SubmitError> {
        let max_attempts = self.policy.max_attempts;
        let mut last = None;

        for attempt_number in 1..=max_attempts {
            let attempt = prepared.attempt(attempt_number);
            match self.run_attempt(&attempt).await {
                AttemptOutcome::Confirmed(id) => {
                    info!(%id, attempts = attempt_number, state = %SubmissionState::Confirmed, "transaction confirmed");
                    return Ok(Submitted {
                        id,
                        attempts: attempt_number,
                    });
                }
                AttemptOutcome::Expired { height } => {
                    warn!(
                        height,
                        deadline = attempt.deadline_height,
                        state = %SubmissionState::Expired,
                        "transaction expired before send"
                    );
                    return Err(SubmitError::Expired {
                        deadline: attempt.deadline_height,
                        height,
                    });
                }
                AttemptOutcome::Failed(error) => {
                    let retryable = attempt_number < max_attempts;
                    let state = SubmissionState::Failed { retryable };
                    warn!(
                        attempt = attempt_number,
                        error = %error,
                        %state,
                        "submission attempt failed"
                    );
                    last = Some(error);
                    if retryable {
                        tokio::time::sleep(self.policy.delay_for(attempt_number - 1)).await;
                    }
                }
            }
        }

        Err(SubmitError::Exhausted {
            attempts: max_attempts,
            last: last.unwrap_or(LedgerError::EmptyResponse("submit")),
        })
    }

    async fn run_attempt(&self, attempt: &SubmissionAttempt<'_>) -> AttemptOutcome {
        // An unreadable height cannot prove the deadline still holds, so nothing is sent
        let height = match self.ledger.current_height().await {
            Ok(height) => height,
            Err(e) => return AttemptOutcome::Failed(e),
        };
        if height > attempt.deadline_height {
            return AttemptOutcome::Expired { height };
        }

        let state = SubmissionState::Sent {
            attempt: attempt.attempt_number,
        };
        debug!(height, %state, "sending transaction");
        let id = match self.ledger.submit(attempt.signed_bytes, self.options).await {
            Ok(id) => id,
            Err(e) => return AttemptOutcome::Failed(e),
        };

        match self.ledger.confirm(&id, self.options.commitment).await {
            Ok(outcome) => match outcome.execution_error {
                None => AttemptOutcome::Confirmed(id),
                Some(reason) => AttemptOutcome::Failed(LedgerError::Execution(reason)),
            },
            Err(e) => AttemptOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::chain::{LocalWallet, WatchOnlyWallet};
    use crate::ledger::{ConfirmOutcome, FeeSample};

    #[derive(Default)]
    struct MockLedger {
        height: AtomicU64,
        /// Added to the height after every successful submit
        height_step_per_submit: u64,
        submit_results: Mutex<VecDeque<Result<String, LedgerError>>>,
        confirm_results: Mutex<VecDeque<ConfirmOutcome>>,
        submits: AtomicUsize,
        submitted: Mutex<Vec<Vec<u8>>>,
    }

    impl MockLedger {
        fn at_height(height: u64) -> Self {
            Self {
                height: AtomicU64::new(height),
                ..Default::default()
            }
        }

        fn failing_submits(self, failures: usize) -> Self {
            {
                let mut results = self.submit_results.lock().unwrap();
                for _ in 0..failures {
                    results.push_back(Err(LedgerError::Rpc {
                        code: -32005,
                        message: "node is behind".into(),
                    }));
                }
            }
            self
        }

        fn submits(&self) -> usize {
            self.submits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LedgerClient for MockLedger {
        async fn current_height(&self) -> Result<u64, LedgerError> {
            Ok(self.height.load(Ordering::SeqCst))
        }

        async fn submit(&self, signed: &[u8], options: SubmitOptions) -> Result<String, LedgerError> {
            assert!(options.preflight);
            let n = self.submits.fetch_add(1, Ordering::SeqCst);
            self.submitted.lock().unwrap().push(signed.to_vec());
            let result = self
                .submit_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(format!("sig-{n}")));
            if result.is_ok() {
                self.height
                    .fetch_add(self.height_step_per_submit, Ordering::SeqCst);
            }
            result
        }

        async fn confirm(
            &self,
            _id: &str,
            _commitment: Commitment,
        ) -> Result<ConfirmOutcome, LedgerError> {
            Ok(self
                .confirm_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }

        async fn recent_fee_samples(&self) -> Result<Vec<FeeSample>, LedgerError> {
            Ok(Vec::new())
        }
    }

    fn policy() -> SubmissionPolicy {
        SubmissionPolicy {
            deadline_window: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_doubles_and_clips() {
        let policy = SubmissionPolicy::default().retry_policy();
        let delays: Vec<u64> = (0..7).map(|a| policy.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 8000, 8000]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        // Huge attempt numbers saturate instead of overflowing
        assert_eq!(policy.delay_for(200), Duration::from_millis(8000));
    }

    #[test]
    fn test_preflight_cannot_be_configured_off() {
        let policy: SubmissionPolicy =
            serde_json::from_str(r#"{"commitment": "finalized"}"#).unwrap();
        let options = policy.submit_options();
        assert!(options.preflight);
        assert_eq!(options.commitment, Commitment::Finalized);

        assert!(serde_json::from_str::<SubmissionPolicy>(r#"{"preflight": false}"#).is_err());
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = SubmissionPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(policy.retry_policy().max_attempts, 1);
    }

    #[test]
    fn test_terminal_states() {
        assert!(SubmissionState::Confirmed.is_terminal());
        assert!(SubmissionState::Expired.is_terminal());
        assert!(SubmissionState::Failed { retryable: false }.is_terminal());
        assert!(!SubmissionState::Failed { retryable: true }.is_terminal());
        assert!(!SubmissionState::Sent { attempt: 1 }.is_terminal());
    }

    #[tokio::test]
    async fn test_prepare_pins_deadline() {
        let submitter = TransactionSubmitter::new(MockLedger::at_height(100), &policy());
        let prepared = submitter.prepare(vec![1, 2, 3]).await.unwrap();
        assert_eq!(prepared.deadline_height, 110);

        // Height moving on does not move the deadline
        submitter.ledger().height.store(105, Ordering::SeqCst);
        let submitted = submitter.submit(&prepared).await.unwrap();
        assert_eq!(submitted.attempts, 1);
        assert_eq!(prepared.deadline_height, 110);
    }

    #[tokio::test]
    async fn test_first_attempt_confirms() {
        let submitter = TransactionSubmitter::new(MockLedger::at_height(7), &policy());
        let prepared = submitter.prepare(b"signed".to_vec()).await.unwrap();
        let submitted = submitter.submit(&prepared).await.unwrap();

        assert_eq!(submitted, Submitted { id: "sig-0".into(), attempts: 1 });
        assert_eq!(submitter.ledger().submits(), 1);
    }

    #[tokio::test]
    async fn test_expired_before_first_attempt_never_submits() {
        let submitter = TransactionSubmitter::new(MockLedger::at_height(100), &policy());
        let prepared = submitter.prepare(b"signed".to_vec()).await.unwrap();
        submitter.ledger().height.store(111, Ordering::SeqCst);

        let err = submitter.submit(&prepared).await.unwrap_err();
        assert!(matches!(err, SubmitError::Expired { deadline: 110, height: 111 }));
        assert_eq!(err.kind(), ErrorKind::SubmissionExpired);
        assert_eq!(submitter.ledger().submits(), 0);
    }

    #[tokio::test]
    async fn test_height_equal_to_deadline_still_sends() {
        let submitter = TransactionSubmitter::new(MockLedger::at_height(100), &policy());
        let prepared = submitter.prepare(b"signed".to_vec()).await.unwrap();
        submitter.ledger().height.store(110, Ordering::SeqCst);

        assert!(submitter.submit(&prepared).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_backoff_then_confirm() {
        let ledger = MockLedger::at_height(1).failing_submits(1);
        let submitter = TransactionSubmitter::new(ledger, &policy());
        let prepared = submitter.prepare(b"signed".to_vec()).await.unwrap();

        let started = tokio::time::Instant::now();
        let submitted = submitter.submit(&prepared).await.unwrap();

        assert_eq!(submitted.attempts, 2);
        assert!(started.elapsed() >= Duration::from_millis(500));
        // Same bytes every time
        let sent = submitter.ledger().submitted.lock().unwrap().clone();
        assert_eq!(sent, vec![b"signed".to_vec(), b"signed".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let ledger = MockLedger::at_height(1).failing_submits(5);
        let submitter = TransactionSubmitter::new(ledger, &policy());
        let prepared = submitter.prepare(b"signed".to_vec()).await.unwrap();

        let started = tokio::time::Instant::now();
        let err = submitter.submit(&prepared).await.unwrap_err();

        match &err {
            SubmitError::Exhausted { attempts, last } => {
                assert_eq!(*attempts, 3);
                assert!(matches!(last, LedgerError::Rpc { code: -32005, .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::SubmissionExhausted);
        assert_eq!(submitter.ledger().submits(), 3);
        // 500ms + 1000ms between the three attempts, none after the last
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert!(started.elapsed() < Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_error_is_retried() {
        let ledger = MockLedger::at_height(1);
        ledger.confirm_results.lock().unwrap().push_back(ConfirmOutcome {
            execution_error: Some("InstructionError(2, Custom(6001))".into()),
        });
        let submitter = TransactionSubmitter::new(ledger, &policy());
        let prepared = submitter.prepare(b"signed".to_vec()).await.unwrap();

        let submitted = submitter.submit(&prepared).await.unwrap();
        assert_eq!(submitted.attempts, 2);
        assert_eq!(submitted.id, "sig-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_between_retries_stops_resending() {
        let mut ledger = MockLedger::at_height(100);
        ledger.height_step_per_submit = 20;
        ledger.confirm_results.lock().unwrap().push_back(ConfirmOutcome {
            execution_error: Some("blockhash not found".into()),
        });
        let submitter = TransactionSubmitter::new(ledger, &policy());
        let prepared = submitter.prepare(b"signed".to_vec()).await.unwrap();

        let err = submitter.submit(&prepared).await.unwrap_err();
        assert!(matches!(err, SubmitError::Expired { deadline: 110, height: 120 }));
        assert_eq!(submitter.ledger().submits(), 1);
    }

    #[tokio::test]
    async fn test_sign_and_prepare() {
        let submitter = TransactionSubmitter::new(MockLedger::at_height(5), &policy());

        let wallet = LocalWallet::random();
        let prepared = submitter.sign_and_prepare(&wallet, b"unsigned").await.unwrap();
        assert!(prepared.signed.ends_with(b"unsigned"));
        assert_eq!(prepared.deadline_height, 15);

        let watch_only = WatchOnlyWallet::new("0x1111111111111111111111111111111111111111");
        let err = submitter
            .sign_and_prepare(&watch_only, b"unsigned")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SigningUnsupported);
    }
}
