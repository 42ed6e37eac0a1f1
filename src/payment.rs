use async_trait::async_trait;
use ulid::Ulid;

use crate::model::Money;

/// Provider-side reference for a settled charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    Declined(String),
    Unavailable(String),
    TimedOut,
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentError::Declined(reason) => write!(f, "payment declined: {reason}"),
            PaymentError::Unavailable(e) => write!(f, "payment gateway unavailable: {e}"),
            PaymentError::TimedOut => write!(f, "payment confirmation timed out"),
        }
    }
}

impl std::error::Error for PaymentError {}

/// Confirms a charge for a pending reservation.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn confirm_payment(
        &self,
        reservation_id: Ulid,
        amount: Money,
        currency: &str,
    ) -> Result<PaymentRef, PaymentError>;
}

/// Gateway for deployments that only take cash: every online charge is declined.
#[derive(Debug, Default, Clone, Copy)]
pub struct CashOnly;

#[async_trait]
impl PaymentGateway for CashOnly {
    async fn confirm_payment(
        &self,
        _reservation_id: Ulid,
        _amount: Money,
        _currency: &str,
    ) -> Result<PaymentRef, PaymentError> {
        Err(PaymentError::Declined("online payments are disabled".into()))
    }
}
