use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use ulid::Ulid;

use crate::config::BookingPolicy;
use crate::model::*;

use super::calendar::SlotCalendar;
use super::error::ConflictError;

/// A candidate booking as the caller asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRequest {
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub duration_hours: u32,
    /// Set when this request replaces an existing reservation.
    pub rescheduling: Option<Ulid>,
}

impl BookingRequest {
    pub fn new(resource_id: Ulid, date: NaiveDate, start: NaiveTime, duration_hours: u32) -> Self {
        Self {
            resource_id,
            date,
            start,
            duration_hours,
            rescheduling: None,
        }
    }

    pub fn rescheduling(mut self, original: Ulid) -> Self {
        self.rescheduling = Some(original);
        self
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start).and_utc()
    }
}

/// Business-rule evaluation of a request. Pure: no I/O, `now` is passed in.
#[derive(Debug, Clone, Copy)]
pub struct ConflictChecker<'a> {
    policy: &'a BookingPolicy,
}

impl<'a> ConflictChecker<'a> {
    pub fn new(policy: &'a BookingPolicy) -> Self {
        Self { policy }
    }

    /// Shape checks only: duration bounds, whole-minute start, operating hours.
    pub fn interval_for(&self, request: &BookingRequest, resource: &Resource) -> Result<TimeInterval, ConflictError> {
        if request.duration_hours == 0 {
            return Err(ConflictError::InvalidInterval("duration must be at least one hour"));
        }
        if request.duration_hours > self.policy.max_duration_hours() {
            return Err(ConflictError::InvalidInterval("duration exceeds the maximum"));
        }
        let interval = TimeInterval::from_start(request.start, request.duration_hours)
            .ok_or(ConflictError::InvalidInterval("start must be HH:MM and end by midnight"))?;
        let hours = resource
            .operating_hours()
            .ok_or(ConflictError::InvalidInterval("resource has no operating hours"))?;
        if !hours.contains_interval(&interval) {
            return Err(ConflictError::InvalidInterval("outside operating hours"));
        }
        Ok(interval)
    }

    /// Run every check in order; the first failure wins. `existing` may hold any
    /// statuses and other days, the calendar filters them.
    pub fn check(
        &self,
        request: &BookingRequest,
        resource: &Resource,
        existing: &[Reservation],
        now: DateTime<Utc>,
    ) -> Result<TimeInterval, ConflictError> {
        let interval = self.interval_for(request, resource)?;

        let notice = match request.rescheduling {
            Some(_) => self.policy.reschedule_min_notice(),
            None => self.policy.min_notice(),
        };
        let earliest = now + notice;
        if request.starts_at() <= earliest {
            return Err(ConflictError::TooSoon { earliest });
        }

        let latest = (now + self.policy.max_horizon()).date_naive();
        if request.date > latest {
            return Err(ConflictError::TooFarAhead { latest });
        }

        let calendar = SlotCalendar::build(resource.id, request.date, existing, request.rescheduling);
        match calendar.first_conflict(&interval, None) {
            Some(winner) => Err(ConflictError::SlotTaken(winner)),
            None => Ok(interval),
        }
    }
}
