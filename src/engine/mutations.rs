use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::payment::{PaymentError, PaymentRef};

use super::conflict::{BookingRequest, ConflictChecker};
use super::lifecycle;
use super::{BookingError, ConflictError, Engine};

fn validate_holder(holder: &Holder) -> Result<(), BookingError> {
    let Holder::Guest(contact) = holder else {
        return Ok(());
    };
    let fields = [
        (&contact.name, "guest name is required"),
        (&contact.email, "guest email is required"),
        (&contact.phone, "guest phone is required"),
    ];
    for (value, missing) in fields {
        if value.trim().is_empty() {
            return Err(BookingError::InvalidHolder(missing));
        }
        if value.len() > MAX_CONTACT_FIELD_LEN {
            return Err(BookingError::InvalidHolder("guest contact field too long"));
        }
    }
    if !contact.email.contains('@') {
        return Err(BookingError::InvalidHolder("guest email is malformed"));
    }
    Ok(())
}

fn outcome<T>(result: &Result<T, BookingError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.label(),
    }
}

impl Engine {
    pub async fn create_booking(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        duration_hours: u32,
        holder: Holder,
        payment_method: PaymentMethod,
    ) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let result = self
            .create_inner(resource_id, date, start, duration_hours, holder, payment_method)
            .await;
        observability::record("create", outcome(&result), started);
        match &result {
            Ok(r) => info!(
                "booking {} created on {} {} ({}, {} {})",
                r.id, r.key(), r.interval, r.status, r.total_price, r.currency
            ),
            Err(e) => debug!("booking on {resource_id}@{date} {start} rejected: {e}"),
        }
        result
    }

    async fn create_inner(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        duration_hours: u32,
        holder: Holder,
        payment_method: PaymentMethod,
    ) -> Result<Reservation, BookingError> {
        validate_holder(&holder)?;
        let resource = self.resource(resource_id).await?;
        let request = BookingRequest::new(resource_id, date, start, duration_hours);
        let key = SlotKey::new(resource_id, date);

        let _slot = self.lock_slot(key).await;
        let existing = self.day(key).await?;
        let now = self.now();
        let interval = ConflictChecker::new(self.policy()).check(&request, &resource, &existing, now)?;

        let reservation = lifecycle::open(&resource, date, interval, holder, payment_method, now);
        self.bounded("store write", self.store.insert_reservation(reservation))
            .await
    }

    /// Cancel on behalf of `by`. A second cancel returns `AlreadyCancelled` and changes nothing.
    pub async fn cancel_booking(&self, id: Ulid, by: Actor) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let result = self.cancel_inner(id, by).await;
        observability::record("cancel", outcome(&result), started);
        if let Ok(r) = &result {
            let refund = r.cancellation.as_ref().map_or(0, |c| c.refund_due);
            info!("booking {id} cancelled by {by:?}, refund due {refund} {}", r.currency);
        }
        result
    }

    async fn cancel_inner(&self, id: Ulid, by: Actor) -> Result<Reservation, BookingError> {
        let key = self.reservation(id).await?.key();
        let _slot = self.lock_slot(key).await;
        // Re-read under the slot: a settlement or expiry may have landed meanwhile.
        let current = self.reservation(id).await?;
        let update = lifecycle::cancel(&current, by, self.now(), self.policy())?;
        self.bounded("store write", self.store.update_status(id, update))
            .await
    }

    /// Move a confirmed booking. The original is cancelled and its replacement
    /// inserted in one store write; on any error the original is untouched.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        new_date: NaiveDate,
        new_start: NaiveTime,
        new_duration_hours: u32,
    ) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let result = self
            .reschedule_inner(id, new_date, new_start, new_duration_hours)
            .await;
        observability::record("reschedule", outcome(&result), started);
        match &result {
            Ok(r) => info!("booking {id} rescheduled as {} on {} {}", r.id, r.key(), r.interval),
            Err(e) => debug!("reschedule of {id} rejected: {e}"),
        }
        result
    }

    async fn reschedule_inner(
        &self,
        id: Ulid,
        new_date: NaiveDate,
        new_start: NaiveTime,
        new_duration_hours: u32,
    ) -> Result<Reservation, BookingError> {
        let original = self.reservation(id).await?;
        lifecycle::ensure_reschedulable(&original)?;
        let resource = self.resource(original.resource_id).await?;
        let new_key = SlotKey::new(original.resource_id, new_date);

        let _slots = self.lock_slots(original.key(), new_key).await;
        let original = self.reservation(id).await?;
        lifecycle::ensure_reschedulable(&original)?;

        let existing = self.day(new_key).await?;
        let now = self.now();
        let request = BookingRequest::new(original.resource_id, new_date, new_start, new_duration_hours).rescheduling(id);
        let interval = ConflictChecker::new(self.policy()).check(&request, &resource, &existing, now)?;

        let (cancellation, replacement) = lifecycle::reschedule(&original, &resource, new_date, interval, now)?;
        self.bounded("store write", self.store.replace_reservation(id, cancellation, replacement))
            .await
    }

    /// Charge a pending booking and confirm it.
    ///
    /// The gateway call happens outside the write slot; the slot is re-checked
    /// afterwards. Declines, gateway failures and timeouts cancel the booking.
    /// Callers settling the same id concurrently wait for one charge and all
    /// receive its result.
    pub async fn settle_payment(&self, id: Ulid) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let claim = self.settlements.entry(id).or_default().clone();
        let result = claim.get_or_init(|| self.settle_inner(id)).await.clone();
        self.settlements.remove_if(&id, |_, current| Arc::ptr_eq(current, &claim));
        observability::record("settle", outcome(&result), started);
        result
    }

    async fn settle_inner(&self, id: Ulid) -> Result<Reservation, BookingError> {
        let pending = self.reservation(id).await?;
        lifecycle::ensure_pending(&pending)?;

        let charge = match tokio::time::timeout(
            self.policy().call_timeout(),
            self.payments
                .confirm_payment(id, pending.total_price, &pending.currency),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PaymentError::TimedOut),
        };

        let _slot = self.lock_slot(pending.key()).await;
        let current = self.reservation(id).await?;
        let now = self.now();

        let reference = match charge {
            Ok(PaymentRef(reference)) => reference,
            Err(e) => {
                let update = lifecycle::decline(&current, now)?;
                self.bounded("store write", self.store.update_status(id, update))
                    .await?;
                metrics::counter!(observability::PAYMENTS_TOTAL, "outcome" => "declined").increment(1);
                warn!("payment for booking {id} failed, booking cancelled: {e}");
                return Err(BookingError::Payment(e));
            }
        };

        let update = match lifecycle::settle(&current, reference.clone(), now) {
            Ok(update) => update,
            Err(e) => {
                warn!("payment {reference} captured for booking {id} which is now {}; refund manually", current.status);
                return Err(e);
            }
        };

        match self
            .bounded("store write", self.store.update_status(id, update))
            .await
        {
            Ok(confirmed) => {
                metrics::counter!(observability::PAYMENTS_TOTAL, "outcome" => "settled").increment(1);
                info!("payment {reference} settled booking {id}");
                Ok(confirmed)
            }
            Err(BookingError::Conflict(ConflictError::SlotTaken(winner))) => {
                let update = lifecycle::lost_slot(&current, reference, now);
                self.bounded("store write", self.store.update_status(id, update))
                    .await?;
                metrics::counter!(observability::PAYMENTS_TOTAL, "outcome" => "slot_lost").increment(1);
                warn!("booking {id} lost its slot to {winner} before payment settled; full refund due");
                Err(ConflictError::SlotTaken(winner).into())
            }
            Err(e) => Err(e),
        }
    }

    /// Settle on a background task.
    pub fn spawn_settlement(self: &Arc<Self>, id: Ulid) -> JoinHandle<Result<Reservation, BookingError>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.settle_payment(id).await })
    }

    /// Cancel pending bookings whose payment window closed before `now`.
    /// Returns the ids actually expired.
    pub async fn expire_pending(&self, now: DateTime<Utc>) -> Result<Vec<Ulid>, BookingError> {
        let cutoff = now - self.policy().payment_timeout();
        let stale: Vec<Reservation> = self
            .bounded("store read", self.store.pending_reservations())
            .await?
            .into_iter()
            .filter(|r| r.created_at <= cutoff)
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for r in stale {
            let _slot = self.lock_slot(r.key()).await;
            let current = self.reservation(r.id).await?;
            let Ok(update) = lifecycle::decline(&current, now) else {
                debug!("pending booking {} settled before expiry", r.id);
                continue;
            };
            self.bounded("store write", self.store.update_status(r.id, update))
                .await?;
            metrics::counter!(observability::PENDING_EXPIRED_TOTAL).increment(1);
            info!("expired unpaid booking {} on {}", r.id, r.key());
            expired.push(r.id);
        }
        Ok(expired)
    }
}
