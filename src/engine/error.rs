use chrono::{DateTime, NaiveDate, Utc};
use ulid::Ulid;

use crate::catalog::CatalogError;
use crate::model::Status;
use crate::payment::PaymentError;
use crate::store::StoreError;

/// Why a candidate interval was rejected. Never retryable as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    InvalidInterval(&'static str),
    TooSoon { earliest: DateTime<Utc> },
    TooFarAhead { latest: NaiveDate },
    /// Overlaps the given confirmed reservation.
    SlotTaken(Ulid),
}

impl std::fmt::Display for ConflictError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictError::InvalidInterval(msg) => write!(f, "invalid interval: {msg}"),
            ConflictError::TooSoon { earliest } => {
                write!(f, "too soon: bookings must start after {earliest}")
            }
            ConflictError::TooFarAhead { latest } => {
                write!(f, "too far ahead: last bookable date is {latest}")
            }
            ConflictError::SlotTaken(id) => write!(f, "slot taken by reservation {id}"),
        }
    }
}

impl std::error::Error for ConflictError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelError {
    AlreadyCancelled(Ulid),
    NotFound(Ulid),
}

impl std::fmt::Display for CancelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelError::AlreadyCancelled(id) => write!(f, "reservation {id} is already cancelled"),
            CancelError::NotFound(id) => write!(f, "reservation not found: {id}"),
        }
    }
}

impl std::error::Error for CancelError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    Conflict(ConflictError),
    Cancel(CancelError),
    UnknownResource(Ulid),
    InvalidHolder(&'static str),
    /// The operation needs the reservation in another status.
    InvalidState { id: Ulid, status: Status },
    /// Payment failed; the pending reservation has been cancelled.
    Payment(PaymentError),
    /// Infrastructure failure or timeout. The only retryable category.
    Unavailable(String),
}

impl BookingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::Unavailable(_))
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BookingError::Conflict(ConflictError::InvalidInterval(_)) => "invalid_interval",
            BookingError::Conflict(ConflictError::TooSoon { .. }) => "too_soon",
            BookingError::Conflict(ConflictError::TooFarAhead { .. }) => "too_far_ahead",
            BookingError::Conflict(ConflictError::SlotTaken(_)) => "slot_taken",
            BookingError::Cancel(CancelError::AlreadyCancelled(_)) => "already_cancelled",
            BookingError::Cancel(CancelError::NotFound(_)) => "not_found",
            BookingError::UnknownResource(_) => "unknown_resource",
            BookingError::InvalidHolder(_) => "invalid_holder",
            BookingError::InvalidState { .. } => "invalid_state",
            BookingError::Payment(_) => "payment_failed",
            BookingError::Unavailable(_) => "unavailable",
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::Conflict(e) => write!(f, "{e}"),
            BookingError::Cancel(e) => write!(f, "{e}"),
            BookingError::UnknownResource(id) => write!(f, "unknown resource: {id}"),
            BookingError::InvalidHolder(msg) => write!(f, "invalid holder: {msg}"),
            BookingError::InvalidState { id, status } => {
                write!(f, "reservation {id} is {status}")
            }
            BookingError::Payment(e) => write!(f, "{e}"),
            BookingError::Unavailable(e) => write!(f, "unavailable: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<ConflictError> for BookingError {
    fn from(e: ConflictError) -> Self {
        BookingError::Conflict(e)
    }
}

impl From<CancelError> for BookingError {
    fn from(e: CancelError) -> Self {
        BookingError::Cancel(e)
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => BookingError::Cancel(CancelError::NotFound(id)),
            StoreError::Duplicate(winner) => BookingError::Conflict(ConflictError::SlotTaken(winner)),
            StoreError::AlreadyExists(id) => {
                BookingError::Unavailable(format!("reservation id {id} already used"))
            }
            StoreError::InvalidTransition { id, from: Status::Cancelled } => {
                BookingError::Cancel(CancelError::AlreadyCancelled(id))
            }
            StoreError::InvalidTransition { id, from } => BookingError::InvalidState { id, status: from },
            StoreError::Unavailable(e) => BookingError::Unavailable(e),
        }
    }
}

impl From<CatalogError> for BookingError {
    fn from(e: CatalogError) -> Self {
        BookingError::Unavailable(e.to_string())
    }
}
