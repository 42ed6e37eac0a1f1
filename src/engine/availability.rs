use crate::limits::START_STEP_MINUTES;
use crate::model::*;

use super::calendar::SlotCalendar;

// ── Free-time computation ─────────────────────────────────────────

/// Operating hours minus confirmed bookings, as disjoint sorted windows.
pub fn free_windows(resource: &Resource, calendar: &SlotCalendar) -> Vec<TimeInterval> {
    let Some(hours) = resource.operating_hours() else {
        return Vec::new();
    };
    let taken = merge_overlapping(&calendar.intervals());
    subtract_intervals(&[hours], &taken)
}

/// Hourly starts from opening time whose whole interval ends by closing.
pub fn candidate_starts(resource: &Resource, duration_hours: u32) -> Vec<Minutes> {
    let Some(hours) = resource.operating_hours() else {
        return Vec::new();
    };
    let length = duration_hours * 60;
    if length == 0 {
        return Vec::new();
    }
    (hours.start..hours.end)
        .step_by(START_STEP_MINUTES as usize)
        .take_while(|s| s + length <= hours.end)
        .collect()
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut merged: Vec<TimeInterval> = Vec::new();
    for &interval in sorted {
        if let Some(last) = merged.last_mut() {
            if interval.start <= last.end {
                last.end = last.end.max(interval.end);
                continue;
            }
        }
        merged.push(interval);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start; `to_remove` disjoint.
pub fn subtract_intervals(base: &[TimeInterval], to_remove: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeInterval::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(TimeInterval::new(current_start, b.end));
        }
    }

    result
}
