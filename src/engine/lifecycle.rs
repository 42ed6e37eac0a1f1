//! Reservation state machine.
//!
//! `Pending → Confirmed`, `Pending → Cancelled`, `Confirmed → Cancelled`.
//! Nothing leaves `Cancelled`. Every function here is pure: it inspects a
//! reservation and returns the record to persist, leaving the write to the caller.

use chrono::{DateTime, NaiveDate, Utc};
use ulid::Ulid;

use crate::config::BookingPolicy;
use crate::model::*;

use super::error::{BookingError, CancelError, ConflictError};

pub fn can_transition(from: Status, to: Status) -> bool {
    matches!(
        (from, to),
        (Status::Pending, Status::Confirmed) | (Status::Pending, Status::Cancelled) | (Status::Confirmed, Status::Cancelled)
    )
}

/// Starting status and payment state for a new reservation.
pub fn initial_state(method: PaymentMethod) -> (Status, PaymentState) {
    match method {
        PaymentMethod::Online => (Status::Pending, PaymentState::Unpaid),
        PaymentMethod::Cash => (Status::Confirmed, PaymentState::Unpaid),
        PaymentMethod::NotRequired => (Status::Confirmed, PaymentState::NotRequired),
    }
}

/// A fresh reservation for an interval that already passed the conflict check.
pub fn open(
    resource: &Resource,
    date: NaiveDate,
    interval: TimeInterval,
    holder: Holder,
    payment_method: PaymentMethod,
    now: DateTime<Utc>,
) -> Reservation {
    let (status, payment_state) = initial_state(payment_method);
    Reservation {
        id: Ulid::new(),
        resource_id: resource.id,
        date,
        interval,
        status,
        holder,
        total_price: resource.price_for(interval.duration_hours()),
        currency: resource.currency.clone(),
        payment_method,
        payment_state,
        payment_ref: None,
        rescheduled_from: None,
        cancellation: None,
        created_at: now,
        updated_at: now,
    }
}

/// Amount owed back to the holder when `by` cancels at `now`.
pub fn refund_due(reservation: &Reservation, by: Actor, now: DateTime<Utc>, policy: &BookingPolicy) -> Money {
    if reservation.payment_state != PaymentState::Paid {
        return 0;
    }
    let total = reservation.total_price;
    match by {
        Actor::Venue | Actor::System => total,
        Actor::Holder => {
            let lead = reservation.starts_at() - now;
            if lead >= policy.full_refund_notice() {
                total
            } else if lead >= policy.partial_refund_notice() {
                // percent <= 100, so the share never exceeds total
                let share = u128::from(total) * u128::from(policy.partial_refund_percent()) / 100;
                Money::try_from(share).unwrap_or(total)
            } else {
                0
            }
        }
    }
}

pub fn cancel(
    reservation: &Reservation,
    by: Actor,
    now: DateTime<Utc>,
    policy: &BookingPolicy,
) -> Result<StatusUpdate, CancelError> {
    if !can_transition(reservation.status, Status::Cancelled) {
        return Err(CancelError::AlreadyCancelled(reservation.id));
    }
    let cancellation = Cancellation {
        at: now,
        by,
        refund_due: refund_due(reservation, by, now, policy),
    };
    Ok(StatusUpdate {
        status: Status::Cancelled,
        payment_state: reservation.payment_state,
        payment_ref: None,
        cancellation: Some(cancellation),
        at: now,
    })
}

pub fn ensure_pending(reservation: &Reservation) -> Result<(), BookingError> {
    match reservation.status {
        Status::Pending => Ok(()),
        status => Err(BookingError::InvalidState {
            id: reservation.id,
            status,
        }),
    }
}

/// Payment went through: confirm and record the provider reference.
pub fn settle(reservation: &Reservation, payment_ref: String, now: DateTime<Utc>) -> Result<StatusUpdate, BookingError> {
    ensure_pending(reservation)?;
    Ok(StatusUpdate {
        status: Status::Confirmed,
        payment_state: PaymentState::Paid,
        payment_ref: Some(payment_ref),
        cancellation: None,
        at: now,
    })
}

/// Payment declined, failed, or never arrived.
pub fn decline(reservation: &Reservation, now: DateTime<Utc>) -> Result<StatusUpdate, BookingError> {
    ensure_pending(reservation)?;
    Ok(StatusUpdate {
        status: Status::Cancelled,
        payment_state: reservation.payment_state,
        payment_ref: None,
        cancellation: Some(Cancellation {
            at: now,
            by: Actor::System,
            refund_due: 0,
        }),
        at: now,
    })
}

/// Payment captured but a confirmed booking took the slot first: cancel and refund in full.
pub fn lost_slot(reservation: &Reservation, payment_ref: String, now: DateTime<Utc>) -> StatusUpdate {
    StatusUpdate {
        status: Status::Cancelled,
        payment_state: PaymentState::Paid,
        payment_ref: Some(payment_ref),
        cancellation: Some(Cancellation {
            at: now,
            by: Actor::System,
            refund_due: reservation.total_price,
        }),
        at: now,
    }
}

/// Only confirmed reservations move; pending ones settle or expire first.
pub fn ensure_reschedulable(reservation: &Reservation) -> Result<(), BookingError> {
    match reservation.status {
        Status::Confirmed => Ok(()),
        Status::Cancelled => Err(CancelError::AlreadyCancelled(reservation.id).into()),
        status => Err(BookingError::InvalidState {
            id: reservation.id,
            status,
        }),
    }
}

/// The cancellation of `original` and its confirmed replacement at `interval` on `date`.
///
/// The replacement keeps holder and payment details. A paid reservation
/// can only move to an interval with the same price, since the charge is carried over.
pub fn reschedule(
    original: &Reservation,
    resource: &Resource,
    date: NaiveDate,
    interval: TimeInterval,
    now: DateTime<Utc>,
) -> Result<(Cancellation, Reservation), BookingError> {
    ensure_reschedulable(original)?;

    let total_price = resource.price_for(interval.duration_hours());
    if original.payment_state == PaymentState::Paid && total_price != original.total_price {
        return Err(ConflictError::InvalidInterval("paid reservation cannot change its price").into());
    }

    let cancellation = Cancellation {
        at: now,
        by: Actor::Holder,
        refund_due: 0,
    };
    let replacement = Reservation {
        id: Ulid::new(),
        resource_id: original.resource_id,
        date,
        interval,
        status: Status::Confirmed,
        holder: original.holder.clone(),
        total_price,
        currency: resource.currency.clone(),
        payment_method: original.payment_method,
        payment_state: original.payment_state,
        payment_ref: original.payment_ref.clone(),
        rescheduled_from: Some(original.id),
        cancellation: None,
        created_at: now,
        updated_at: now,
    };
    Ok((cancellation, replacement))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()
    }

    fn arena() -> Resource {
        let h = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        Resource::new(Ulid::new(), "Arena", 3500, h(6), h(22))
    }

    fn booked(method: PaymentMethod) -> Reservation {
        open(
            &arena(),
            NaiveDate::from_ymd_opt(2026, 10, 21).unwrap(),
            TimeInterval::new(600, 720),
            Holder::Account(Ulid::new()),
            method,
            now(),
        )
    }

    fn paid() -> Reservation {
        let mut r = booked(PaymentMethod::Online);
        let update = settle(&r, "pi_1".into(), now()).unwrap();
        update.apply_to(&mut r);
        r
    }

    #[test]
    fn transitions() {
        use Status::*;
        assert!(can_transition(Pending, Confirmed));
        assert!(can_transition(Pending, Cancelled));
        assert!(can_transition(Confirmed, Cancelled));
        assert!(!can_transition(Confirmed, Pending));
        assert!(!can_transition(Cancelled, Confirmed));
        assert!(!can_transition(Cancelled, Cancelled));
    }

    #[test]
    fn initial_state_by_payment_method() {
        let online = booked(PaymentMethod::Online);
        assert_eq!((online.status, online.payment_state), (Status::Pending, PaymentState::Unpaid));
        let cash = booked(PaymentMethod::Cash);
        assert_eq!((cash.status, cash.payment_state), (Status::Confirmed, PaymentState::Unpaid));
        let free = booked(PaymentMethod::NotRequired);
        assert_eq!(
            (free.status, free.payment_state),
            (Status::Confirmed, PaymentState::NotRequired)
        );
        assert_eq!(cash.total_price, 7000);
    }

    #[test]
    fn cancel_twice_is_rejected() {
        let policy = BookingPolicy::default();
        let mut r = booked(PaymentMethod::Cash);
        cancel(&r, Actor::Holder, now(), &policy).unwrap().apply_to(&mut r);
        assert_eq!(r.status, Status::Cancelled);
        assert_eq!(
            cancel(&r, Actor::Venue, now(), &policy),
            Err(CancelError::AlreadyCancelled(r.id))
        );
    }

    #[test]
    fn refund_tiers_for_holder() {
        let policy = BookingPolicy::default();
        let r = paid();
        let start = r.starts_at();
        assert_eq!(refund_due(&r, Actor::Holder, start - Duration::hours(30), &policy), 7000);
        assert_eq!(refund_due(&r, Actor::Holder, start - Duration::hours(24), &policy), 7000);
        assert_eq!(refund_due(&r, Actor::Holder, start - Duration::hours(18), &policy), 3500);
        assert_eq!(refund_due(&r, Actor::Holder, start - Duration::hours(12), &policy), 3500);
        assert_eq!(refund_due(&r, Actor::Holder, start - Duration::hours(2), &policy), 0);
        assert_eq!(refund_due(&r, Actor::Venue, start - Duration::hours(2), &policy), 7000);
        assert_eq!(refund_due(&r, Actor::System, start - Duration::hours(2), &policy), 7000);
    }

    #[test]
    fn unpaid_reservations_owe_nothing() {
        let policy = BookingPolicy::default();
        let r = booked(PaymentMethod::Cash);
        assert_eq!(refund_due(&r, Actor::Venue, now(), &policy), 0);
    }

    #[test]
    fn settle_and_decline_need_pending() {
        let r = paid();
        assert_eq!(r.status, Status::Confirmed);
        assert_eq!(r.payment_ref.as_deref(), Some("pi_1"));
        assert!(matches!(
            settle(&r, "pi_2".into(), now()),
            Err(BookingError::InvalidState { status: Status::Confirmed, .. })
        ));

        let pending = booked(PaymentMethod::Online);
        let declined = decline(&pending, now()).unwrap();
        assert_eq!(declined.status, Status::Cancelled);
        assert_eq!(declined.cancellation.map(|c| c.by), Some(Actor::System));
    }

    #[test]
    fn lost_slot_refunds_in_full() {
        let pending = booked(PaymentMethod::Online);
        let update = lost_slot(&pending, "pi_9".into(), now());
        assert_eq!(update.status, Status::Cancelled);
        assert_eq!(update.payment_state, PaymentState::Paid);
        assert_eq!(update.cancellation.map(|c| c.refund_due), Some(7000));
    }

    #[test]
    fn reschedule_carries_holder_and_payment() {
        let resource = arena();
        let original = paid();
        let date = NaiveDate::from_ymd_opt(2026, 10, 22).unwrap();
        let (cancellation, replacement) =
            reschedule(&original, &resource, date, TimeInterval::new(840, 960), now()).unwrap();

        assert_eq!(cancellation.refund_due, 0);
        assert_eq!(replacement.status, Status::Confirmed);
        assert_eq!(replacement.holder, original.holder);
        assert_eq!(replacement.payment_state, PaymentState::Paid);
        assert_eq!(replacement.payment_ref, original.payment_ref);
        assert_eq!(replacement.rescheduled_from, Some(original.id));
        assert_eq!(replacement.total_price, 7000);
        assert_ne!(replacement.id, original.id);
    }

    #[test]
    fn reschedule_rules() {
        let resource = arena();
        let date = NaiveDate::from_ymd_opt(2026, 10, 22).unwrap();

        let paid = paid();
        let longer = reschedule(&paid, &resource, date, TimeInterval::new(840, 1020), now());
        assert!(matches!(longer, Err(BookingError::Conflict(ConflictError::InvalidInterval(_)))));

        // Cash bookings are repriced freely
        let cash = booked(PaymentMethod::Cash);
        let (_, longer) = reschedule(&cash, &resource, date, TimeInterval::new(840, 1020), now()).unwrap();
        assert_eq!(longer.total_price, 10500);

        let pending = booked(PaymentMethod::Online);
        assert!(matches!(
            reschedule(&pending, &resource, date, TimeInterval::new(840, 960), now()),
            Err(BookingError::InvalidState { status: Status::Pending, .. })
        ));
    }
}
