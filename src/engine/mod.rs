mod availability;
mod calendar;
mod conflict;
mod error;
pub mod lifecycle;
mod mutations;
mod queries;

pub use availability::{candidate_starts, free_windows, merge_overlapping, subtract_intervals};
pub use calendar::SlotCalendar;
pub use conflict::{BookingRequest, ConflictChecker};
pub use error::{BookingError, CancelError, ConflictError};

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::BookingPolicy;
use crate::model::*;
use crate::payment::PaymentGateway;
use crate::store::ReservationStore;

/// The booking service: every create, cancel, reschedule and settlement goes through here.
///
/// Read-check-write runs under a per-(resource, date) mutex, so within one
/// engine the conflict check always sees the latest confirmed state. The
/// store's own conditional writes cover engines sharing a store.
pub struct Engine {
    store: Arc<dyn ReservationStore>,
    catalog: Arc<dyn Catalog>,
    payments: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
    write_slots: DashMap<SlotKey, Arc<Mutex<()>>>,
    /// Settlements in flight. Concurrent callers for one id share a single gateway call.
    settlements: DashMap<Ulid, Arc<OnceCell<Result<Reservation, BookingError>>>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        catalog: Arc<dyn Catalog>,
        payments: Arc<dyn PaymentGateway>,
        policy: BookingPolicy,
    ) -> Self {
        Self::with_clock(store, catalog, payments, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn ReservationStore>,
        catalog: Arc<dyn Catalog>,
        payments: Arc<dyn PaymentGateway>,
        policy: BookingPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            payments,
            clock,
            policy,
            write_slots: DashMap::new(),
            settlements: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run a store or catalog call under the configured timeout.
    pub(super) async fn bounded<T, E>(
        &self,
        what: &'static str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, BookingError>
    where
        BookingError: From<E>,
    {
        match tokio::time::timeout(self.policy.call_timeout(), call).await {
            Ok(result) => result.map_err(BookingError::from),
            Err(_) => Err(BookingError::Unavailable(format!("{what} timed out"))),
        }
    }

    pub(super) async fn resource(&self, id: Ulid) -> Result<Resource, BookingError> {
        self.bounded("catalog lookup", self.catalog.get_resource(id))
            .await?
            .ok_or(BookingError::UnknownResource(id))
    }

    pub(super) async fn reservation(&self, id: Ulid) -> Result<Reservation, BookingError> {
        self.bounded("store read", self.store.get_reservation(id))
            .await?
            .ok_or(BookingError::Cancel(CancelError::NotFound(id)))
    }

    pub(super) async fn day(&self, key: SlotKey) -> Result<Vec<Reservation>, BookingError> {
        self.bounded("store read", self.store.load_reservations(key.resource_id, key.date))
            .await
    }

    /// Exclusive write slot for one (resource, date).
    pub(super) async fn lock_slot(&self, key: SlotKey) -> OwnedMutexGuard<()> {
        let slot = self.write_slots.entry(key).or_default().clone();
        slot.lock_owned().await
    }

    /// Both slots, acquired in sorted order to prevent deadlocks. One guard if the keys match.
    pub(super) async fn lock_slots(&self, a: SlotKey, b: SlotKey) -> Vec<OwnedMutexGuard<()>> {
        let mut keys = vec![a, b];
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock_slot(key).await);
        }
        guards
    }

    /// Forget write slots nobody holds or waits on, and settlement claims
    /// whose callers went away before finishing.
    pub fn prune_write_slots(&self) {
        self.write_slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        self.settlements.retain(|_, claim| Arc::strong_count(claim) > 1);
    }

    pub fn write_slot_count(&self) -> usize {
        self.write_slots.len()
    }
}
