//! Hard ceilings applied regardless of configuration.

use crate::model::Minutes;

/// Longest single booking accepted even if policy allows more.
pub const MAX_DURATION_HOURS: u32 = 12;

/// Upper bound for any notice or horizon setting (one year).
pub const MAX_POLICY_WINDOW_MINUTES: i64 = 366 * 24 * 60;

/// Step between advertised start times.
pub const START_STEP_MINUTES: Minutes = 60;

/// Highest hourly rate a pitch may carry; keeps every booking price representable.
pub const MAX_HOURLY_RATE: u64 = 100_000_000;

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_CONTACT_FIELD_LEN: usize = 254;

/// Largest WAL payload accepted on replay; anything bigger is treated as corruption.
pub const MAX_WAL_ENTRY_BYTES: usize = 1 << 20;

pub const NOTIFY_CHANNEL_CAPACITY: usize = 256;
