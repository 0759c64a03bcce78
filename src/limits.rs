use crate::model::Ms;

// ── Time sanity ─────────────────────────────────────────────────

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single booking may not span more than 14 days.
pub const MAX_BOOKING_DURATION_MS: Ms = 14 * 24 * 3_600_000;

pub const DAY_MS: Ms = 86_400_000;

// ── Priority thresholds ─────────────────────────────────────────

/// Raw score at or below this maps to `Priority::Low`.
pub const LOW_PRIORITY_MAX_SCORE: i64 = 30;
/// Raw score at or below this (and above the low cutoff) maps to `Priority::Normal`.
pub const NORMAL_PRIORITY_MAX_SCORE: i64 = 70;
/// Added to the raw score for group admins.
pub const ADMIN_ROLE_BONUS: i64 = 50;

// ── Display ranking ─────────────────────────────────────────────

pub const EMERGENCY_RANK_BONUS: i64 = 1000;
pub const CONFIRMED_RANK_BONUS: i64 = 100;
/// Recency bonus decays linearly to zero over this many days.
pub const RECENCY_RANK_CAP_DAYS: i64 = 30;

// ── Emergency resolution ────────────────────────────────────────

/// Bounded linear search: the reschedule probe gives up after this many slots.
pub const RESCHEDULE_MAX_ATTEMPTS: u32 = 12;
/// Probe step between candidate start times.
pub const RESCHEDULE_STEP_MS: Ms = 30 * 60_000;
/// Emergency bookings allowed per user per calendar month.
pub const EMERGENCY_MONTHLY_CAP: u32 = 3;

// ── Recurrence expansion ────────────────────────────────────────

/// Rolling generation horizon ahead of "now".
pub const GENERATION_HORIZON_MS: Ms = 28 * DAY_MS;
/// Generation resumes one minute past the watermark.
pub const WATERMARK_NUDGE_MS: Ms = 60_000;

// ── Input guards ────────────────────────────────────────────────

pub const MAX_VEHICLES: usize = 50_000;
pub const MAX_BOOKINGS_PER_VEHICLE: usize = 10_000;
pub const MAX_PURPOSE_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 2_000;
