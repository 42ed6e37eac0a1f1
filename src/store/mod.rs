mod wal_store;

pub use wal_store::WalStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// A confirmed reservation would overlap the given one.
    Duplicate(Ulid),
    /// The reservation's current status does not allow the requested change.
    InvalidTransition { id: Ulid, from: Status },
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            StoreError::Duplicate(id) => write!(f, "overlaps confirmed reservation: {id}"),
            StoreError::InvalidTransition { id, from } => {
                write!(f, "reservation {id} is {from} and cannot make that change")
            }
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Durable reservation storage.
///
/// Implementations must reject any write that would leave two confirmed
/// reservations overlapping on the same (resource, date) with
/// `StoreError::Duplicate`, atomically with the write itself, and any status
/// change the reservation lifecycle forbids with `StoreError::InvalidTransition`.
/// That is the guard that holds when several booking engines share one store.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Every reservation on the day, any status, ordered by start.
    async fn load_reservations(&self, resource_id: Ulid, date: NaiveDate) -> Result<Vec<Reservation>, StoreError>;

    async fn get_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    async fn insert_reservation(&self, reservation: Reservation) -> Result<Reservation, StoreError>;

    async fn update_status(&self, id: Ulid, update: StatusUpdate) -> Result<Reservation, StoreError>;

    /// Cancel `old_id` and insert `replacement` as one write. `old_id` must be confirmed.
    async fn replace_reservation(
        &self,
        old_id: Ulid,
        cancellation: Cancellation,
        replacement: Reservation,
    ) -> Result<Reservation, StoreError>;

    async fn reservations_for_holder(&self, holder: &Holder) -> Result<Vec<Reservation>, StoreError>;

    async fn reservations_for_resource(&self, resource_id: Ulid) -> Result<Vec<Reservation>, StoreError>;

    async fn pending_reservations(&self) -> Result<Vec<Reservation>, StoreError>;
}
