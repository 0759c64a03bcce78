use chrono::{DateTime, Datelike, Days, Months, NaiveDate};
use tokio::sync::watch;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct SeriesRequest {
    pub vehicle_id: Ulid,
    pub group_id: Ulid,
    pub user_id: Ulid,
    pub pattern: RecurrencePattern,
    pub interval: u32,
    /// Bit 0 = Monday .. bit 6 = Sunday. Ignored unless Weekly.
    pub days_of_week: u8,
    pub start_time: Ms,
    pub end_time: Ms,
    pub start_date: Ms,
    pub end_date: Option<Ms>,
    pub purpose: String,
}

/// One occurrence the expander could not place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOccurrence {
    pub span: Span,
    pub conflicts: Vec<Ulid>,
}

/// Result of one expansion run over a single series. Skipped occurrences
/// are generation gaps, not retries — the series never auto-reschedules.
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub series_id: Ulid,
    pub created: Vec<Ulid>,
    pub skipped: Vec<SkippedOccurrence>,
    pub watermark: Option<Ms>,
}

fn validate_series(req: &SeriesRequest) -> Result<(), EngineError> {
    if req.vehicle_id.is_nil() {
        return Err(EngineError::Validation("vehicle id required"));
    }
    if req.group_id.is_nil() {
        return Err(EngineError::Validation("group id required"));
    }
    if req.interval == 0 {
        return Err(EngineError::Validation("interval must be positive"));
    }
    if req.pattern == RecurrencePattern::Weekly && (req.days_of_week == 0 || req.days_of_week >= 0x80)
    {
        return Err(EngineError::Validation("weekly pattern needs a day-of-week mask"));
    }
    if req.start_time < 0 || req.end_time > DAY_MS || req.end_time <= req.start_time {
        return Err(EngineError::Validation("daily time window invalid"));
    }
    if req.start_date < MIN_VALID_TIMESTAMP_MS || req.start_date > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if let Some(end) = req.end_date
        && end <= req.start_date {
            return Err(EngineError::Validation("recurrence end before start"));
        }
    if req.purpose.len() > MAX_PURPOSE_LEN {
        return Err(EngineError::LimitExceeded("purpose too long"));
    }
    Ok(())
}

// ── Date expansion (pure) ───────────────────────────────────────

fn utc_date(ms: Ms) -> NaiveDate {
    // Inputs are range-validated; the conversion cannot fail.
    DateTime::from_timestamp_millis(ms).unwrap().date_naive()
}

fn day_start_ms(date: NaiveDate) -> Ms {
    date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis()
}

fn weekday_bit(date: NaiveDate) -> u8 {
    1 << date.weekday().num_days_from_monday()
}

/// Occurrence dates for a series clipped to `[from_ms, through_ms]`.
/// Daily and monthly steps are anchored at the recurrence start date so the
/// phase never drifts between runs; monthly clamps day 31 to shorter months.
pub(crate) fn occurrence_dates(series: &RecurringBooking, from_ms: Ms, through_ms: Ms) -> Vec<NaiveDate> {
    let anchor = utc_date(series.start_date);
    let from = utc_date(from_ms).max(anchor);
    let through = utc_date(through_ms);
    let mut dates = Vec::new();
    if from > through {
        return dates;
    }

    match series.pattern {
        RecurrencePattern::Daily => {
            let mut date = anchor;
            while date <= through {
                if date >= from {
                    dates.push(date);
                }
                date = match date.checked_add_days(Days::new(series.interval as u64)) {
                    Some(d) => d,
                    None => break,
                };
            }
        }
        RecurrencePattern::Weekly => {
            let anchor_monday = anchor
                - chrono::Duration::days(anchor.weekday().num_days_from_monday() as i64);
            let mut date = from;
            while date <= through {
                let week = (date - anchor_monday).num_days() / 7;
                if week % series.interval as i64 == 0 && series.days_of_week & weekday_bit(date) != 0
                {
                    dates.push(date);
                }
                date = match date.checked_add_days(Days::new(1)) {
                    Some(d) => d,
                    None => break,
                };
            }
        }
        RecurrencePattern::Monthly => {
            let mut k = 0u32;
            loop {
                let date = match anchor.checked_add_months(Months::new(k * series.interval)) {
                    Some(d) => d,
                    None => break,
                };
                if date > through {
                    break;
                }
                if date >= from {
                    dates.push(date);
                }
                k += 1;
            }
        }
    }
    dates
}

impl Engine {
    // ── Series lifecycle ─────────────────────────────────────

    /// Create a recurring series and run the first expansion immediately.
    pub async fn create_series(
        &self,
        req: SeriesRequest,
        now: Ms,
    ) -> Result<(Ulid, GenerationReport), EngineError> {
        validate_series(&req)?;
        if self.get_vehicle(&req.vehicle_id).is_none() {
            return Err(EngineError::NotFound(req.vehicle_id));
        }
        let id = Ulid::new();
        let series = RecurringBooking {
            id,
            vehicle_id: req.vehicle_id,
            group_id: req.group_id,
            user_id: req.user_id,
            pattern: req.pattern,
            interval: req.interval,
            days_of_week: req.days_of_week,
            start_time: req.start_time,
            end_time: req.end_time,
            start_date: req.start_date,
            end_date: req.end_date,
            status: SeriesStatus::Active,
            last_generated_until: None,
            paused_until: None,
            purpose: req.purpose,
            created_at: now,
            updated_at: now,
        };
        let vehicle_id = series.vehicle_id;
        self.series
            .insert(id, std::sync::Arc::new(tokio::sync::RwLock::new(series)));
        self.entity_to_vehicle.insert(id, vehicle_id);
        self.emit(
            vehicle_id,
            &VehicleEvent::RecurringBookingCreated {
                series_id: id,
                vehicle_id,
            },
        );
        let report = self.expand_series(id, now).await?;
        Ok((id, report))
    }

    /// Change the open-ended attributes of a series and re-expand. Already
    /// generated bookings keep their old windows.
    pub async fn update_series(
        &self,
        id: Ulid,
        purpose: Option<String>,
        end_date: Option<Ms>,
        now: Ms,
    ) -> Result<GenerationReport, EngineError> {
        let series = self.get_series(&id).ok_or(EngineError::NotFound(id))?;
        let vehicle_id;
        {
            let mut guard = series.write().await;
            if let Some(p) = purpose {
                guard.purpose = p;
            }
            guard.end_date = end_date;
            guard.updated_at = now;
            vehicle_id = guard.vehicle_id;
        }
        self.emit(
            vehicle_id,
            &VehicleEvent::RecurringBookingUpdated {
                series_id: id,
                vehicle_id,
            },
        );
        self.expand_series(id, now).await
    }

    pub async fn pause_series(
        &self,
        id: Ulid,
        paused_until: Option<Ms>,
        now: Ms,
    ) -> Result<(), EngineError> {
        let series = self.get_series(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = series.write().await;
        guard.status = SeriesStatus::Paused;
        guard.paused_until = paused_until;
        guard.updated_at = now;
        let vehicle_id = guard.vehicle_id;
        drop(guard);
        self.emit(
            vehicle_id,
            &VehicleEvent::RecurringBookingUpdated {
                series_id: id,
                vehicle_id,
            },
        );
        Ok(())
    }

    /// End a series: future generated bookings (start ≥ now) are cancelled,
    /// past ones stay untouched.
    pub async fn cancel_series(&self, id: Ulid, now: Ms) -> Result<Vec<Ulid>, EngineError> {
        let series = self.get_series(&id).ok_or(EngineError::NotFound(id))?;
        let mut sguard = series.write().await;
        sguard.status = SeriesStatus::Ended;
        sguard.updated_at = now;
        let vehicle_id = sguard.vehicle_id;

        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let mut guard = vs.write().await;
        let mut cancelled = Vec::new();
        for b in guard.bookings.iter_mut() {
            if b.recurring_booking_id == Some(id)
                && b.span.start >= now
                && b.transition_to(BookingStatus::Cancelled, now)
            {
                b.append_note("cancelled: recurring series ended", now);
                cancelled.push(b.id);
            }
        }
        drop(guard);
        drop(sguard);

        for booking_id in &cancelled {
            self.emit(
                vehicle_id,
                &VehicleEvent::BookingCancelled {
                    booking_id: *booking_id,
                    vehicle_id,
                    reason: Some("recurring series ended".into()),
                },
            );
        }
        self.emit(
            vehicle_id,
            &VehicleEvent::RecurringBookingUpdated {
                series_id: id,
                vehicle_id,
            },
        );
        Ok(cancelled)
    }

    // ── Expansion ────────────────────────────────────────────

    /// One expansion run for one series. Idempotent: a re-run with an
    /// unchanged watermark stages nothing new. The watermark only advances,
    /// and advances together with the staged bookings under the same locks.
    pub async fn expand_series(&self, id: Ulid, now: Ms) -> Result<GenerationReport, EngineError> {
        let series_arc = self.get_series(&id).ok_or(EngineError::NotFound(id))?;
        // Lock order is always series → vehicle.
        let mut series = series_arc.write().await;
        let mut report = GenerationReport {
            series_id: id,
            watermark: series.last_generated_until,
            ..Default::default()
        };

        match series.status {
            SeriesStatus::Ended => return Ok(report),
            SeriesStatus::Paused => {
                // Indefinite pause, or a pause window still running.
                if series.paused_until.is_none_or(|p| p > now) {
                    return Ok(report);
                }
            }
            SeriesStatus::Active => {}
        }

        let generation_start = match series.last_generated_until {
            Some(w) => w + WATERMARK_NUDGE_MS,
            None => series.start_date,
        }
        .max(now);
        let mut generation_through = now + GENERATION_HORIZON_MS;
        if let Some(end) = series.end_date {
            generation_through = generation_through.min(end);
        }
        if generation_start > generation_through {
            return Ok(report);
        }

        metrics::counter!(observability::EXPANSION_RUNS_TOTAL).increment(1);
        let (score, priority) = self.score_user(series.user_id, series.vehicle_id).await;

        let vs = self
            .get_vehicle(&series.vehicle_id)
            .ok_or(EngineError::NotFound(series.vehicle_id))?;
        let mut guard = vs.write().await;

        let mut max_end: Option<Ms> = None;
        for date in occurrence_dates(&series, generation_start, generation_through) {
            let day = day_start_ms(date);
            let span = Span::new(day + series.start_time, day + series.end_time);
            if span.start < generation_start || span.start > generation_through {
                continue;
            }
            // Already represented — same window, same series.
            if guard
                .bookings
                .iter()
                .any(|b| b.recurring_booking_id == Some(id) && b.span == span)
            {
                continue;
            }
            // Vehicle at capacity: record a gap, leave the watermark alone
            // so the occurrence is retried once room frees up.
            if guard.bookings.len() >= MAX_BOOKINGS_PER_VEHICLE {
                tracing::debug!(series = %id, start = span.start, "occurrence skipped: vehicle at booking cap");
                report.skipped.push(SkippedOccurrence {
                    span,
                    conflicts: Vec::new(),
                });
                continue;
            }
            let conflicts: Vec<Ulid> = guard
                .overlapping_bookings(&span, None, Some(id))
                .map(|b| b.id)
                .chain(guard.overlapping_maintenance(&span).map(|m| m.id))
                .collect();
            if !conflicts.is_empty() {
                tracing::debug!(series = %id, start = span.start, "occurrence skipped: window occupied");
                report.skipped.push(SkippedOccurrence { span, conflicts });
                continue;
            }

            let booking = Booking {
                id: Ulid::new(),
                vehicle_id: series.vehicle_id,
                group_id: series.group_id,
                user_id: series.user_id,
                span,
                purpose: series.purpose.clone(),
                notes: String::new(),
                is_emergency: false,
                emergency_reason: None,
                priority,
                priority_score: score,
                status: BookingStatus::Confirmed,
                recurring_booking_id: Some(id),
                created_at: now,
                updated_at: now,
            };
            self.entity_to_vehicle.insert(booking.id, series.vehicle_id);
            self.emit(
                series.vehicle_id,
                &VehicleEvent::BookingCreated {
                    booking_id: booking.id,
                    vehicle_id: series.vehicle_id,
                    user_id: series.user_id,
                    span,
                    priority,
                    emergency: false,
                },
            );
            report.created.push(booking.id);
            max_end = Some(max_end.map_or(span.end, |m| m.max(span.end)));
            guard.insert_booking(booking);
        }

        if let Some(end) = max_end
            && series.last_generated_until.is_none_or(|w| end > w) {
                series.last_generated_until = Some(end);
                series.updated_at = now;
            }
        report.watermark = series.last_generated_until;

        metrics::histogram!(observability::EXPANSION_GENERATED).record(report.created.len() as f64);
        tracing::debug!(
            series = %id,
            created = report.created.len(),
            skipped = report.skipped.len(),
            "expansion run complete"
        );
        Ok(report)
    }

    /// Series ids eligible for the periodic expansion sweep.
    pub fn active_series_ids(&self) -> Vec<Ulid> {
        self.series
            .iter()
            .filter(|e| {
                e.value()
                    .try_read()
                    .map(|s| s.status != SeriesStatus::Ended)
                    .unwrap_or(true)
            })
            .map(|e| *e.key())
            .collect()
    }

    /// One sweep over every non-ended series. Per-series failures are
    /// logged and do not abort the pass; a raised shutdown flag stops the
    /// sweep before the next series starts.
    pub async fn run_expansion_pass(
        &self,
        now: Ms,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Vec<GenerationReport> {
        let mut reports = Vec::new();
        for id in self.active_series_ids() {
            if shutdown.is_some_and(|s| *s.borrow()) {
                tracing::info!("expansion pass interrupted by shutdown");
                break;
            }
            match self.expand_series(id, now).await {
                Ok(report) => reports.push(report),
                Err(e) => tracing::warn!(series = %id, "expansion failed: {e}"),
            }
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn series(pattern: RecurrencePattern, interval: u32, days_of_week: u8, start: NaiveDate) -> RecurringBooking {
        RecurringBooking {
            id: Ulid::new(),
            vehicle_id: Ulid::new(),
            group_id: Ulid::new(),
            user_id: Ulid::new(),
            pattern,
            interval,
            days_of_week,
            start_time: 9 * 3_600_000,
            end_time: 10 * 3_600_000,
            start_date: day_start_ms(start),
            end_date: None,
            status: SeriesStatus::Active,
            last_generated_until: None,
            paused_until: None,
            purpose: String::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn daily_steps_by_interval() {
        // 2025-06-02 is a Monday.
        let s = series(RecurrencePattern::Daily, 2, 0, date(2025, 6, 2));
        let dates = occurrence_dates(&s, s.start_date, day_start_ms(date(2025, 6, 10)));
        assert_eq!(
            dates,
            vec![
                date(2025, 6, 2),
                date(2025, 6, 4),
                date(2025, 6, 6),
                date(2025, 6, 8),
                date(2025, 6, 10),
            ]
        );
    }

    #[test]
    fn daily_phase_anchored_at_start_date() {
        let s = series(RecurrencePattern::Daily, 3, 0, date(2025, 6, 2));
        // Window starting mid-cycle still lands on the anchored phase.
        let dates = occurrence_dates(&s, day_start_ms(date(2025, 6, 4)), day_start_ms(date(2025, 6, 12)));
        assert_eq!(dates, vec![date(2025, 6, 5), date(2025, 6, 8), date(2025, 6, 11)]);
    }

    #[test]
    fn weekly_mask_monday_wednesday() {
        // Mask bit 0 = Monday, bit 2 = Wednesday.
        let s = series(RecurrencePattern::Weekly, 1, 0b101, date(2025, 6, 2));
        let dates = occurrence_dates(&s, s.start_date, day_start_ms(date(2025, 6, 15)));
        assert_eq!(
            dates,
            vec![
                date(2025, 6, 2),
                date(2025, 6, 4),
                date(2025, 6, 9),
                date(2025, 6, 11),
            ]
        );
    }

    #[test]
    fn weekly_interval_skips_weeks() {
        let s = series(RecurrencePattern::Weekly, 2, 0b1, date(2025, 6, 2));
        let dates = occurrence_dates(&s, s.start_date, day_start_ms(date(2025, 6, 30)));
        assert_eq!(
            dates,
            vec![date(2025, 6, 2), date(2025, 6, 16), date(2025, 6, 30)]
        );
    }

    #[test]
    fn monthly_clamps_short_months() {
        let s = series(RecurrencePattern::Monthly, 1, 0, date(2025, 1, 31));
        let dates = occurrence_dates(&s, s.start_date, day_start_ms(date(2025, 5, 1)));
        assert_eq!(
            dates,
            vec![
                date(2025, 1, 31),
                date(2025, 2, 28),
                date(2025, 3, 31),
                date(2025, 4, 30),
            ]
        );
    }

    #[test]
    fn window_before_start_yields_nothing() {
        let s = series(RecurrencePattern::Daily, 1, 0, date(2025, 6, 10));
        let dates = occurrence_dates(&s, day_start_ms(date(2025, 6, 1)), day_start_ms(date(2025, 6, 5)));
        assert!(dates.is_empty());
    }
}
