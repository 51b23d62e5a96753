//! Error taxonomy for the reservation core.

use crate::types::{Money, OrderId, OrderStatus, SeatClass};
use thiserror::Error;

/// Result type alias for booking operations.
pub type Result<T> = std::result::Result<T, BookingError>;

/// Failure of a collaborator store (order persistence, sequence table).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("store error: {0}")]
pub struct StoreError(
    /// What the store reported
    pub String,
);

/// Why an order cannot be paid right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotPayableReason {
    /// Already paid
    AlreadyPaid,
    /// Payment deadline passed
    TimedOut,
    /// Replaced by a rebooking
    Changed,
    /// Ticket already issued
    Issued,
    /// Cancelled by the user
    Cancelled,
    /// Already refunded
    Refunded,
    /// Journey concluded
    Expired,
}

impl std::fmt::Display for NotPayableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AlreadyPaid => "order is already paid",
            Self::TimedOut => "payment deadline has passed",
            Self::Changed => "order has been rebooked",
            Self::Issued => "ticket has already been issued",
            Self::Cancelled => "order was cancelled",
            Self::Refunded => "order was refunded",
            Self::Expired => "journey has concluded",
        };
        f.write_str(s)
    }
}

/// All the ways a booking operation can fail.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BookingError {
    // ═══════════════════════════════════════════════════════════
    // Booking preconditions
    // ═══════════════════════════════════════════════════════════
    /// The user hit the per-day cancellation cap.
    #[error("daily cancellation limit of {limit} reached")]
    DailyCancelLimitExceeded {
        /// The configured cap
        limit: u32,
    },

    /// The user already has an order awaiting payment.
    #[error("an unpaid order exists; complete or cancel it first")]
    UnpaidOrderExists,

    /// No train with that number runs on that date.
    #[error("train {train_num} does not run on {date}")]
    TrainNotFound {
        /// Requested train number
        train_num: String,
        /// Requested date
        date: chrono::NaiveDate,
    },

    /// The train has no cars of the requested class.
    #[error("train has no {seat_class} cars")]
    SeatClassInvalid {
        /// Requested class
        seat_class: SeatClass,
    },

    /// The passenger already travels during that window.
    #[error("passenger has an overlapping journey")]
    PassengerTimeConflict,

    /// Every seat and standing slot on the requested segments is taken.
    #[error("no tickets available")]
    NoTicketsAvailable,

    // ═══════════════════════════════════════════════════════════
    // Lifecycle transitions
    // ═══════════════════════════════════════════════════════════
    /// Unknown order id.
    #[error("order {order_id} not found")]
    OrderNotFound {
        /// The id looked up
        order_id: OrderId,
    },

    /// The order is not in a payable status.
    #[error("order not payable: {reason}")]
    OrderNotPayable {
        /// Specific rejection
        reason: NotPayableReason,
    },

    /// Tendered amount differs from the order price.
    #[error("payment of {offered} does not match order price {expected}")]
    PriceMismatch {
        /// The order's price
        expected: Money,
        /// The tendered amount
        offered: Money,
    },

    /// The fare table has no entry for the needed price key.
    #[error("no fare entry for key {key}")]
    PriceUnavailable {
        /// Fare-table key that was missing
        key: String,
    },

    /// The order was already rebooked once (or is itself a rebooking).
    #[error("order already rebooked; only one rebooking per chain")]
    AlreadyChanged,

    /// The order's status does not admit the attempted operation.
    #[error("cannot {operation} an order in status {status}")]
    InvalidTransition {
        /// Status the order was in
        status: OrderStatus,
        /// Operation that was attempted
        operation: &'static str,
    },

    // ═══════════════════════════════════════════════════════════
    // Collaborators
    // ═══════════════════════════════════════════════════════════
    /// The payment gateway declined or failed the charge.
    #[error("payment failed: {reason}")]
    PaymentFailed {
        /// Gateway-reported reason
        reason: String,
    },

    /// The payment gateway failed the refund.
    #[error("refund failed: {reason}")]
    RefundFailed {
        /// Gateway-reported reason
        reason: String,
    },

    /// The id pool could not be refilled.
    #[error("id pool exhausted")]
    IdPoolExhausted,

    /// A collaborator store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Returns `true` if the failure is a business rejection the caller can
    /// present to the user as-is (as opposed to an infrastructure fault).
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        !matches!(
            self,
            Self::Store(_) | Self::IdPoolExhausted | Self::PriceUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_not_user_errors() {
        assert!(!BookingError::Store(StoreError("down".into())).is_user_error());
        assert!(BookingError::UnpaidOrderExists.is_user_error());
        assert!(BookingError::NoTicketsAvailable.is_user_error());
    }
}
