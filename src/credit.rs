//! Prepaid-credit admission gate.
//!
//! One credit unit is consumed per submitted file. The gate only *checks*;
//! the backend debits the balance when it accepts a submission, and the
//! client displays the backend-reported `credits_used` rather than
//! decrementing anything locally.
//!
//! A balance source that cannot be reached fails closed: the check reports
//! `has_enough = false` and nothing is submitted.

use crate::error::ClientError;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

/// Anything that can report the current credit balance.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance(&self) -> Result<u64, ClientError>;
}

/// A balance known up front. Used by tests and offline tooling.
#[derive(Debug, Clone, Copy)]
pub struct FixedBalance(pub u64);

#[async_trait]
impl BalanceSource for FixedBalance {
    async fn balance(&self) -> Result<u64, ClientError> {
        Ok(self.0)
    }
}

/// Result of one admission check. Derived fresh for every submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditCheck {
    pub required_units: u64,
    pub current_balance: u64,
    pub has_enough: bool,
    /// `max(0, required - balance)`.
    pub missing: u64,
    /// Balance left after the debit; zero when insufficient.
    pub remaining_after: u64,
    /// Set when the balance could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<String>,
}

impl CreditCheck {
    /// Pure comparison of a request against a known balance.
    pub fn compute(required_units: u64, current_balance: u64) -> Self {
        let has_enough = required_units <= current_balance;
        Self {
            required_units,
            current_balance,
            has_enough,
            missing: required_units.saturating_sub(current_balance),
            remaining_after: current_balance.saturating_sub(required_units),
            unavailable: None,
        }
    }

    fn unavailable(required_units: u64, reason: String) -> Self {
        Self {
            required_units,
            current_balance: 0,
            has_enough: false,
            missing: required_units,
            remaining_after: 0,
            unavailable: Some(reason),
        }
    }
}

/// Checks requests against a [`BalanceSource`].
pub struct CreditGate<'a> {
    source: &'a dyn BalanceSource,
}

impl<'a> CreditGate<'a> {
    pub fn new(source: &'a dyn BalanceSource) -> Self {
        Self { source }
    }

    /// Compare `requested_units` against the live balance.
    pub async fn check(&self, requested_units: u64) -> CreditCheck {
        match self.source.balance().await {
            Ok(balance) => {
                let check = CreditCheck::compute(requested_units, balance);
                debug!(
                    "Credit check: {} required, {} available",
                    requested_units, balance
                );
                check
            }
            Err(e) => {
                warn!("Credit balance unavailable, refusing admission: {}", e);
                CreditCheck::unavailable(requested_units, e.to_string())
            }
        }
    }

    /// Like [`check`](Self::check), but a shortfall becomes
    /// [`ClientError::AdmissionRejected`] and an unreadable balance
    /// [`ClientError::BalanceUnavailable`].
    pub async fn admit(&self, requested_units: u64) -> Result<CreditCheck, ClientError> {
        let check = self.check(requested_units).await;
        if let Some(reason) = &check.unavailable {
            return Err(ClientError::BalanceUnavailable {
                required: requested_units,
                reason: reason.clone(),
            });
        }
        if check.has_enough {
            Ok(check)
        } else {
            Err(ClientError::AdmissionRejected {
                required: check.required_units,
                balance: check.current_balance,
                missing: check.missing,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    #[async_trait]
    impl BalanceSource for Unreachable {
        async fn balance(&self) -> Result<u64, ClientError> {
            Err(ClientError::Network {
                endpoint: "/credits/balance/".into(),
                detail: "connection refused".into(),
            })
        }
    }

    #[test]
    fn compute_holds_for_all_small_pairs() {
        for balance in 0..20u64 {
            for required in 0..20u64 {
                let c = CreditCheck::compute(required, balance);
                assert_eq!(c.has_enough, required <= balance);
                assert_eq!(c.missing, required.saturating_sub(balance));
                if c.has_enough {
                    assert_eq!(c.remaining_after, balance - required);
                }
            }
        }
    }

    #[tokio::test]
    async fn admit_rejects_shortfall() {
        let source = FixedBalance(2);
        let gate = CreditGate::new(&source);
        let err = gate.admit(3).await.unwrap_err();
        match err {
            ClientError::AdmissionRejected {
                required,
                balance,
                missing,
            } => {
                assert_eq!((required, balance, missing), (3, 2, 1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn admit_exact_balance() {
        let source = FixedBalance(3);
        let check = tokio_test::block_on(CreditGate::new(&source).admit(3)).unwrap();
        assert_eq!(check.remaining_after, 0);
    }

    #[tokio::test]
    async fn unreachable_source_fails_closed() {
        let gate = CreditGate::new(&Unreachable);
        let check = gate.check(1).await;
        assert!(!check.has_enough);
        assert_eq!(check.missing, 1);
        assert!(check.unavailable.as_deref().unwrap().contains("connection refused"));
        let err = gate.admit(1).await.unwrap_err();
        assert!(matches!(err, ClientError::BalanceUnavailable { required: 1, .. }));
        let msg = err.to_string();
        assert!(msg.contains("connection refused"), "got: {msg}");
        assert!(!msg.contains("0 available"), "got: {msg}");
    }
}
