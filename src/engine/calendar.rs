use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// Confirmed occupancy of one pitch on one date, sorted by start.
///
/// Built on demand from whatever the store returns; never persisted. Because
/// confirmed reservations never overlap each other, sorting by start also
/// sorts by end, which is what lets `overlapping` binary-search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCalendar {
    resource_id: Ulid,
    date: NaiveDate,
    entries: Vec<(TimeInterval, Ulid)>,
}

impl SlotCalendar {
    pub fn build(resource_id: Ulid, date: NaiveDate, reservations: &[Reservation], excluding: Option<Ulid>) -> Self {
        let mut entries: Vec<(TimeInterval, Ulid)> = reservations
            .iter()
            .filter(|r| r.resource_id == resource_id && r.date == date)
            .filter(|r| r.occupies_slot() && Some(r.id) != excluding)
            .map(|r| (r.interval, r.id))
            .collect();
        entries.sort_by_key(|(i, _)| i.start);
        Self {
            resource_id,
            date,
            entries,
        }
    }

    pub fn resource_id(&self) -> Ulid {
        self.resource_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Stored entries overlapping `candidate`, in start order.
    pub fn overlapping<'a>(&'a self, candidate: &'a TimeInterval) -> impl Iterator<Item = &'a (TimeInterval, Ulid)> + 'a {
        let first = self.entries.partition_point(|(i, _)| i.end <= candidate.start);
        self.entries[first..]
            .iter()
            .take_while(move |(i, _)| i.start < candidate.end)
            .filter(move |(i, _)| i.overlaps(candidate))
    }

    /// The reservation blocking `candidate`, if any.
    pub fn first_conflict(&self, candidate: &TimeInterval, excluding: Option<Ulid>) -> Option<Ulid> {
        self.overlapping(candidate)
            .map(|(_, id)| *id)
            .find(|id| Some(*id) != excluding)
    }

    pub fn is_free(&self, candidate: &TimeInterval, excluding: Option<Ulid>) -> bool {
        self.first_conflict(candidate, excluding).is_none()
    }

    /// Candidate starts whose `duration_hours` interval is free and ends by midnight.
    pub fn free_slots_from(&self, candidate_starts: &[Minutes], duration_hours: u32) -> Vec<Minutes> {
        let Some(length) = duration_hours.checked_mul(60).filter(|&l| l > 0) else {
            return Vec::new();
        };
        candidate_starts
            .iter()
            .filter_map(|&s| {
                let end = s.checked_add(length).filter(|&e| e <= MINUTES_PER_DAY)?;
                Some(TimeInterval::new(s, end))
            })
            .filter(|candidate| self.is_free(candidate, None))
            .map(|candidate| candidate.start)
            .collect()
    }

    pub fn intervals(&self) -> Vec<TimeInterval> {
        self.entries.iter().map(|(i, _)| *i).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
