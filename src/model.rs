use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight of the booking date.
pub type Minutes = u32;

/// Whole currency units. Rates are quoted per hour.
pub type Money = u64;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

pub const DEFAULT_CURRENCY: &str = "LKR";

/// Minute of day for a wall-clock time (seconds are ignored).
pub fn minute_of_day(t: NaiveTime) -> Minutes {
    t.hour() * 60 + t.minute()
}

fn format_minutes(m: Minutes) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Half-open interval `[start, end)` in minutes of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: Minutes,
    pub end: Minutes,
}

impl TimeInterval {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "TimeInterval start must be before end");
        Self { start, end }
    }

    /// Interval beginning at `start` and lasting `duration_hours` whole hours.
    /// `None` if `start` carries seconds or the interval would run past midnight.
    pub fn from_start(start: NaiveTime, duration_hours: u32) -> Option<Self> {
        if start.second() != 0 || start.nanosecond() != 0 || duration_hours == 0 {
            return None;
        }
        let s = minute_of_day(start);
        let e = s.checked_add(duration_hours.checked_mul(60)?)?;
        (e <= MINUTES_PER_DAY).then(|| Self::new(s, e))
    }

    pub fn duration_minutes(&self) -> Minutes {
        self.end - self.start
    }

    pub fn duration_hours(&self) -> u32 {
        self.duration_minutes() / 60
    }

    /// The overlap predicate. Every conflict decision in the crate goes through here.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, m: Minutes) -> bool {
        self.start <= m && m < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_interval(&self, other: &TimeInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn start_time(&self) -> NaiveTime {
        NaiveTime::default() + Duration::minutes(i64::from(self.start))
    }
}

impl std::fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", format_minutes(self.start), format_minutes(self.end))
    }
}

/// A bookable pitch. Owned by the catalog; read-only to the booking logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    pub hourly_rate: Money,
    pub currency: String,
    pub opens_at: NaiveTime,
    /// `00:00` means the pitch stays open until midnight.
    pub closes_at: NaiveTime,
}

impl Resource {
    pub fn new(id: Ulid, name: impl Into<String>, hourly_rate: Money, opens_at: NaiveTime, closes_at: NaiveTime) -> Self {
        Self {
            id,
            name: name.into(),
            hourly_rate,
            currency: DEFAULT_CURRENCY.to_string(),
            opens_at,
            closes_at,
        }
    }

    /// Operating bounds as an interval, or `None` if they are inverted or empty.
    pub fn operating_hours(&self) -> Option<TimeInterval> {
        let start = minute_of_day(self.opens_at);
        let end = match minute_of_day(self.closes_at) {
            0 => MINUTES_PER_DAY,
            m => m,
        };
        (start < end).then(|| TimeInterval::new(start, end))
    }

    /// Saturates rather than wrapping; the catalog caps rates well below that.
    pub fn price_for(&self, duration_hours: u32) -> Money {
        self.hourly_rate.saturating_mul(Money::from(duration_hours))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuestContact {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Who a reservation is for. Exactly one variant is ever present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Holder {
    Account(Ulid),
    Guest(GuestContact),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Confirmed,
    Cancelled,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Pending => "pending",
            Status::Confirmed => "confirmed",
            Status::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Charged through the payment gateway before the slot is confirmed.
    Online,
    /// Collected at the venue.
    Cash,
    NotRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentState {
    Unpaid,
    Paid,
    NotRequired,
}

/// Who asked for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    Holder,
    Venue,
    /// Payment declined, payment expired, or slot lost at settlement.
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub at: DateTime<Utc>,
    pub by: Actor,
    pub refund_due: Money,
}

/// (resource, date): the unit of write serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub resource_id: Ulid,
    pub date: NaiveDate,
}

impl SlotKey {
    pub fn new(resource_id: Ulid, date: NaiveDate) -> Self {
        Self { resource_id, date }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.resource_id, self.date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    Upcoming,
    InProgress,
    Past,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub interval: TimeInterval,
    pub status: Status,
    pub holder: Holder,
    pub total_price: Money,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_state: PaymentState,
    pub payment_ref: Option<String>,
    /// The reservation this one replaced through a reschedule.
    pub rescheduled_from: Option<Ulid>,
    pub cancellation: Option<Cancellation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.resource_id, self.date)
    }

    pub fn duration_hours(&self) -> u32 {
        self.interval.duration_hours()
    }

    pub fn occupies_slot(&self) -> bool {
        self.status == Status::Confirmed
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.interval.start_time()).and_utc()
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.starts_at() + Duration::minutes(i64::from(self.interval.duration_minutes()))
    }

    pub fn timing(&self, now: DateTime<Utc>) -> Timing {
        if now < self.starts_at() {
            Timing::Upcoming
        } else if now < self.ends_at() {
            Timing::InProgress
        } else {
            Timing::Past
        }
    }
}

/// A status transition as written to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: Status,
    pub payment_state: PaymentState,
    pub payment_ref: Option<String>,
    pub cancellation: Option<Cancellation>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn apply_to(&self, r: &mut Reservation) {
        r.status = self.status;
        r.payment_state = self.payment_state;
        if self.payment_ref.is_some() {
            r.payment_ref = self.payment_ref.clone();
        }
        if self.cancellation.is_some() {
            r.cancellation = self.cancellation.clone();
        }
        r.updated_at = self.at;
    }
}

/// The event types. This is the WAL record format and the notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    StatusChanged {
        id: Ulid,
        key: SlotKey,
        update: StatusUpdate,
    },
    /// Cancel-old plus create-new, committed as one record.
    Rescheduled {
        old_id: Ulid,
        old_key: SlotKey,
        cancellation: Cancellation,
        replacement: Reservation,
    },
}

impl Event {
    pub fn resource_id(&self) -> Ulid {
        match self {
            Event::ReservationCreated { reservation } => reservation.resource_id,
            Event::StatusChanged { key, .. } => key.resource_id,
            Event::Rescheduled { old_key, .. } => old_key.resource_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::ReservationCreated { .. } => "reservation_created",
            Event::StatusChanged { .. } => "status_changed",
            Event::Rescheduled { .. } => "rescheduled",
        }
    }
}

/// A holder's reservations split by the current time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolderBookings {
    /// Not yet finished and not cancelled, soonest first.
    pub upcoming: Vec<Reservation>,
    /// Finished or cancelled, most recent first.
    pub past: Vec<Reservation>,
}
