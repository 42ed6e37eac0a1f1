use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::availability;
use super::calendar::SlotCalendar;
use super::{BookingError, ConflictError, Engine};

// Reads take no write slot: results are advisory and may be stale by the time
// the caller acts on them. Creation re-checks under the slot.
impl Engine {
    /// Hourly start times from opening whose `duration_hours` interval fits
    /// before closing and is not taken by a confirmed booking.
    pub async fn list_available_starts(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        duration_hours: u32,
    ) -> Result<Vec<NaiveTime>, BookingError> {
        if duration_hours == 0 || duration_hours > self.policy().max_duration_hours() {
            return Err(ConflictError::InvalidInterval("duration out of range").into());
        }
        let resource = self.resource(resource_id).await?;
        let existing = self.day(SlotKey::new(resource_id, date)).await?;
        let calendar = SlotCalendar::build(resource_id, date, &existing, None);

        let candidates = availability::candidate_starts(&resource, duration_hours);
        Ok(calendar
            .free_slots_from(&candidates, duration_hours)
            .into_iter()
            .filter_map(|m| NaiveTime::from_hms_opt(m / 60, m % 60, 0))
            .collect())
    }

    /// Operating hours minus confirmed bookings.
    pub async fn free_windows(&self, resource_id: Ulid, date: NaiveDate) -> Result<Vec<TimeInterval>, BookingError> {
        let resource = self.resource(resource_id).await?;
        let existing = self.day(SlotKey::new(resource_id, date)).await?;
        let calendar = SlotCalendar::build(resource_id, date, &existing, None);
        Ok(availability::free_windows(&resource, &calendar))
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Reservation, BookingError> {
        self.reservation(id).await
    }

    /// A holder's bookings split around now. Cancelled ones are always history.
    pub async fn holder_bookings(&self, holder: &Holder) -> Result<HolderBookings, BookingError> {
        let all = self
            .bounded("store read", self.store.reservations_for_holder(holder))
            .await?;
        let now = self.now();

        let (mut upcoming, mut past): (Vec<_>, Vec<_>) = all
            .into_iter()
            .partition(|r| r.status != Status::Cancelled && r.timing(now) != Timing::Past);
        upcoming.sort_by_key(|r| r.starts_at());
        past.sort_by_key(|r| std::cmp::Reverse(r.starts_at()));
        Ok(HolderBookings { upcoming, past })
    }

    /// Every booking on a pitch from `from` onwards, any status, by date then start.
    pub async fn venue_bookings(&self, resource_id: Ulid, from: NaiveDate) -> Result<Vec<Reservation>, BookingError> {
        let mut all = self
            .bounded("store read", self.store.reservations_for_resource(resource_id))
            .await?;
        all.retain(|r| r.date >= from);
        all.sort_by_key(|r| (r.date, r.interval.start));
        Ok(all)
    }
}
