//! Payment gateway collaborator.
//!
//! Abstraction over the external payment service's `charge` and `refund`
//! endpoints, with a mock for development and a scripted decliner for
//! failure-path tests. Production replaces these with the real
//! integration.

use crate::types::{Money, OrderId, UserId};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, PaymentGatewayError>;

/// Payment gateway error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentGatewayError {
    /// The charge was declined
    Declined {
        /// Decline reason
        reason: String,
    },
    /// The refund was rejected
    RefundRejected {
        /// Rejection reason
        reason: String,
    },
    /// Gateway timeout
    Timeout,
    /// Other error
    Other {
        /// Error message
        message: String,
    },
}

impl std::fmt::Display for PaymentGatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Declined { reason } => write!(f, "charge declined: {reason}"),
            Self::RefundRejected { reason } => write!(f, "refund rejected: {reason}"),
            Self::Timeout => write!(f, "gateway timeout"),
            Self::Other { message } => write!(f, "payment error: {message}"),
        }
    }
}

impl std::error::Error for PaymentGatewayError {}

/// A settled charge
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    /// Order the charge settles
    pub order_id: OrderId,
    /// Gateway transaction id
    pub transaction_id: String,
    /// Amount charged
    pub amount: Money,
}

/// Payment gateway trait
pub trait PaymentGateway: Send + Sync {
    /// Charge `amount` against the user's payment account.
    ///
    /// # Errors
    ///
    /// Returns an error when the charge does not settle.
    fn charge(
        &self,
        order_id: OrderId,
        user_id: UserId,
        pay_type: u32,
        pay_account: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<PaymentReceipt>> + Send>>;

    /// Refund `amount` to the account a charge came from.
    ///
    /// # Errors
    ///
    /// Returns an error when the refund is rejected.
    fn refund(
        &self,
        order_id: OrderId,
        user_id: UserId,
        pay_type: u32,
        pay_account: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send>>;
}

/// Mock payment gateway (always settles).
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway;

impl MockPaymentGateway {
    /// Creates a new mock gateway
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new())
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn charge(
        &self,
        order_id: OrderId,
        user_id: UserId,
        _pay_type: u32,
        _pay_account: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<PaymentReceipt>> + Send>> {
        Box::pin(async move {
            let transaction_id = format!("txn_{}", uuid::Uuid::new_v4());
            tracing::info!(
                order_id = %order_id,
                user_id = %user_id,
                amount = amount.cents(),
                transaction_id = %transaction_id,
                "mock charge settled"
            );
            Ok(PaymentReceipt {
                order_id,
                transaction_id,
                amount,
            })
        })
    }

    fn refund(
        &self,
        order_id: OrderId,
        user_id: UserId,
        _pay_type: u32,
        _pay_account: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send>> {
        Box::pin(async move {
            let refund_id = format!("rfd_{}", uuid::Uuid::new_v4());
            tracing::info!(
                order_id = %order_id,
                user_id = %user_id,
                amount = amount.cents(),
                refund_id = %refund_id,
                "mock refund settled"
            );
            Ok(refund_id)
        })
    }
}

/// Gateway whose next charge can be scripted to decline, for failure-path
/// tests.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    decline_next: AtomicBool,
}

impl ScriptedGateway {
    /// Creates a gateway that settles until scripted otherwise
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next charge decline
    pub fn decline_next_charge(&self) {
        self.decline_next.store(true, Ordering::SeqCst);
    }
}

impl PaymentGateway for ScriptedGateway {
    fn charge(
        &self,
        order_id: OrderId,
        _user_id: UserId,
        _pay_type: u32,
        _pay_account: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<PaymentReceipt>> + Send>> {
        let decline = self.decline_next.swap(false, Ordering::SeqCst);
        Box::pin(async move {
            if decline {
                return Err(PaymentGatewayError::Declined {
                    reason: "scripted decline".to_string(),
                });
            }
            Ok(PaymentReceipt {
                order_id,
                transaction_id: format!("txn_{}", uuid::Uuid::new_v4()),
                amount,
            })
        })
    }

    fn refund(
        &self,
        _order_id: OrderId,
        _user_id: UserId,
        _pay_type: u32,
        _pay_account: &str,
        _amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send>> {
        Box::pin(async move { Ok(format!("rfd_{}", uuid::Uuid::new_v4())) })
    }
}
