use chrono::{DateTime, Datelike, Months};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{validate_window, window_is_free};
use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct EmergencyRequest {
    pub vehicle_id: Ulid,
    pub group_id: Ulid,
    pub user_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub purpose: String,
    pub reason: String,
    /// When set, conflicts the probe cannot move are cancelled outright;
    /// otherwise they are parked in PendingApproval for a human to resolve.
    pub auto_cancel_conflicts: bool,
}

/// Per-conflict outcome of an emergency resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResolution {
    Rescheduled { booking_id: Ulid, from: Span, to: Span },
    AutoCancelled { booking_id: Ulid },
    PendingResolution { booking_id: Ulid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescheduleResult {
    pub booking_id: Ulid,
    pub from: Span,
    pub to: Span,
}

/// What the resolver did, bucketed for downstream notification.
#[derive(Debug, Clone)]
pub struct EmergencyOutcome {
    pub booking: Booking,
    pub rescheduled: Vec<RescheduleResult>,
    pub auto_cancelled: Vec<Ulid>,
    pub pending_resolution: Vec<Ulid>,
}

/// `[month start, next month start)` in UTC for the instant `now`.
fn month_window(now: Ms) -> Span {
    let dt = DateTime::from_timestamp_millis(now).unwrap();
    let month_start = dt
        .date_naive()
        .with_day(1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    let next_month = month_start.checked_add_months(Months::new(1)).unwrap();
    Span::new(month_start.timestamp_millis(), next_month.timestamp_millis())
}

impl Engine {
    /// Emergency bookings created by this user in the current calendar month.
    async fn emergency_count_this_month(&self, user_id: Ulid, now: Ms) -> u32 {
        let window = month_window(now);
        // Snapshot the Arcs first; a map shard guard must not live across
        // an await.
        let vehicles: Vec<_> = self.vehicles.iter().map(|e| e.value().clone()).collect();
        let mut count = 0u32;
        for vs in vehicles {
            let guard = vs.read().await;
            count += guard
                .bookings
                .iter()
                .filter(|b| {
                    b.user_id == user_id
                        && b.is_emergency
                        && window.contains_instant(b.created_at)
                })
                .count() as u32;
        }
        count
    }

    /// Emergency creation path. Conflicts are processed in start-time order:
    /// a nested emergency fails the whole request before any mutation, every
    /// other conflict is rescheduled if the probe finds a slot, otherwise
    /// cancelled or parked per `auto_cancel_conflicts`. The emergency booking
    /// itself is always created Confirmed afterwards.
    pub async fn create_emergency_booking(
        &self,
        req: EmergencyRequest,
        now: Ms,
    ) -> Result<EmergencyOutcome, EngineError> {
        if req.vehicle_id.is_nil() {
            return Err(EngineError::Validation("vehicle id required"));
        }
        if req.group_id.is_nil() {
            return Err(EngineError::Validation("group id required"));
        }
        if req.reason.trim().is_empty() {
            return Err(EngineError::Validation("emergency reason required"));
        }
        if req.purpose.len() > MAX_PURPOSE_LEN {
            return Err(EngineError::LimitExceeded("purpose too long"));
        }
        let span = validate_window(req.start, req.end)?;
        // The calendar conversions below require an in-range instant.
        if now < MIN_VALID_TIMESTAMP_MS || now > MAX_VALID_TIMESTAMP_MS {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }

        let used = self.emergency_count_this_month(req.user_id, now).await;
        if used >= EMERGENCY_MONTHLY_CAP {
            metrics::counter!(observability::QUOTA_REJECTIONS_TOTAL).increment(1);
            tracing::info!(user = %req.user_id, used, "emergency quota exhausted");
            return Err(EngineError::QuotaExceeded {
                used,
                cap: EMERGENCY_MONTHLY_CAP,
            });
        }

        let (score, _) = self.score_user(req.user_id, req.vehicle_id).await;

        let vs = self
            .get_vehicle(&req.vehicle_id)
            .ok_or(EngineError::NotFound(req.vehicle_id))?;
        let mut guard = vs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many bookings on vehicle"));
        }

        // Maintenance still wins: the vehicle is physically unavailable.
        if let Some(block) = guard.overlapping_maintenance(&span).next() {
            return Err(EngineError::MaintenanceBlocked(block.id));
        }

        // Snapshot in start-time order (the list is sorted). First pass:
        // a nested emergency aborts the whole operation before any mutation.
        let conflicts: Vec<Booking> = guard
            .overlapping_bookings(&span, None, None)
            .cloned()
            .collect();
        if let Some(nested) = conflicts.iter().find(|c| c.is_emergency) {
            return Err(EngineError::EmergencyConflict(nested.id));
        }

        let mut outcome = EmergencyOutcome {
            booking: Booking {
                id: Ulid::new(),
                vehicle_id: req.vehicle_id,
                group_id: req.group_id,
                user_id: req.user_id,
                span,
                purpose: req.purpose,
                notes: String::new(),
                is_emergency: true,
                emergency_reason: Some(req.reason),
                priority: Priority::Emergency,
                priority_score: score,
                status: BookingStatus::Confirmed,
                recurring_booking_id: None,
                created_at: now,
                updated_at: now,
            },
            rescheduled: Vec::new(),
            auto_cancelled: Vec::new(),
            pending_resolution: Vec::new(),
        };

        for conflict in conflicts {
            let resolution =
                self.resolve_conflict(&mut guard, &conflict, &span, req.auto_cancel_conflicts, now);
            match resolution {
                ConflictResolution::Rescheduled { booking_id, from, to } => {
                    metrics::counter!(observability::EMERGENCY_RESOLUTIONS_TOTAL, "outcome" => "rescheduled")
                        .increment(1);
                    outcome.rescheduled.push(RescheduleResult { booking_id, from, to });
                }
                ConflictResolution::AutoCancelled { booking_id } => {
                    metrics::counter!(observability::EMERGENCY_RESOLUTIONS_TOTAL, "outcome" => "auto_cancelled")
                        .increment(1);
                    outcome.auto_cancelled.push(booking_id);
                }
                ConflictResolution::PendingResolution { booking_id } => {
                    metrics::counter!(observability::EMERGENCY_RESOLUTIONS_TOTAL, "outcome" => "pending_resolution")
                        .increment(1);
                    outcome.pending_resolution.push(booking_id);
                }
            }
        }

        guard.insert_booking(outcome.booking.clone());
        self.entity_to_vehicle
            .insert(outcome.booking.id, req.vehicle_id);
        self.emit(
            req.vehicle_id,
            &VehicleEvent::BookingCreated {
                booking_id: outcome.booking.id,
                vehicle_id: req.vehicle_id,
                user_id: req.user_id,
                span,
                priority: Priority::Emergency,
                emergency: true,
            },
        );
        tracing::info!(
            booking = %outcome.booking.id,
            rescheduled = outcome.rescheduled.len(),
            cancelled = outcome.auto_cancelled.len(),
            pending = outcome.pending_resolution.len(),
            "emergency booking resolved"
        );
        Ok(outcome)
    }

    /// Resolve one non-emergency conflict against the emergency window.
    fn resolve_conflict(
        &self,
        vs: &mut VehicleState,
        conflict: &Booking,
        emergency: &Span,
        auto_cancel: bool,
        now: Ms,
    ) -> ConflictResolution {
        if conflict.status.window_mutable()
            && let Some(to) = self.probe_reschedule(vs, conflict, emergency, now) {
                let from = conflict.span;
                // Remove + reinsert keeps the list sorted after the span change.
                if let Some(mut moved) = vs.remove_booking(conflict.id) {
                    moved.span = to;
                    moved.append_note(
                        &format!(
                            "rescheduled due to emergency booking [{}, {})",
                            emergency.start, emergency.end
                        ),
                        now,
                    );
                    vs.insert_booking(moved);
                }
                self.emit(
                    vs.id,
                    &VehicleEvent::BookingRescheduled {
                        booking_id: conflict.id,
                        vehicle_id: vs.id,
                        from,
                        to,
                    },
                );
                return ConflictResolution::Rescheduled {
                    booking_id: conflict.id,
                    from,
                    to,
                };
            }

        if auto_cancel
            && let Some(b) = vs.booking_mut(conflict.id)
            && b.transition_to(BookingStatus::Cancelled, now) {
                b.append_note(
                    &format!(
                        "auto-cancelled due to emergency booking [{}, {})",
                        emergency.start, emergency.end
                    ),
                    now,
                );
                self.emit(
                    vs.id,
                    &VehicleEvent::BookingCancelled {
                        booking_id: conflict.id,
                        vehicle_id: vs.id,
                        reason: Some("emergency override".into()),
                    },
                );
                return ConflictResolution::AutoCancelled {
                    booking_id: conflict.id,
                };
            }

        // Park it for a human. InProgress and NoShow conflicts land here too:
        // the status transition is skipped when the machine forbids it, but
        // the annotation and the outcome bucket still record the collision.
        if let Some(b) = vs.booking_mut(conflict.id) {
            if b.status.can_transition_to(BookingStatus::PendingApproval) {
                b.transition_to(BookingStatus::PendingApproval, now);
            }
            b.append_note(
                &format!(
                    "pending resolution due to emergency booking [{}, {})",
                    emergency.start, emergency.end
                ),
                now,
            );
        }
        ConflictResolution::PendingResolution {
            booking_id: conflict.id,
        }
    }

    /// Bounded linear search for a conflict-free slot of the same duration.
    /// Starts at `max(emergency.end, now)`, steps 30 minutes, gives up after
    /// 12 attempts. Deliberately predictable rather than optimal.
    fn probe_reschedule(
        &self,
        vs: &VehicleState,
        conflict: &Booking,
        emergency: &Span,
        now: Ms,
    ) -> Option<Span> {
        let duration = conflict.span.duration_ms();
        let mut start = emergency.end.max(now);
        for attempt in 0..RESCHEDULE_MAX_ATTEMPTS {
            let candidate = Span::new(start, start + duration);
            if window_is_free(
                vs,
                &candidate,
                Some(conflict.id),
                conflict.recurring_booking_id,
            ) {
                metrics::histogram!(observability::RESCHEDULE_PROBE_ATTEMPTS)
                    .record((attempt + 1) as f64);
                return Some(candidate);
            }
            start += RESCHEDULE_STEP_MS;
        }
        metrics::histogram!(observability::RESCHEDULE_PROBE_ATTEMPTS)
            .record(RESCHEDULE_MAX_ATTEMPTS as f64);
        tracing::debug!(booking = %conflict.id, "reschedule probe exhausted");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_window_covers_now() {
        // 2025-06-15T12:00:00Z
        let now: Ms = 1_749_988_800_000;
        let window = month_window(now);
        assert!(window.contains_instant(now));
        // 2025-06-01T00:00:00Z .. 2025-07-01T00:00:00Z
        assert_eq!(window.start, 1_748_736_000_000);
        assert_eq!(window.end, 1_751_328_000_000);
    }
}
