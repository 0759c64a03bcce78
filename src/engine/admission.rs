use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{now_ms, validate_window};
use super::{Engine, EngineError};

/// Normal (non-emergency) booking request. `purpose` and `notes` are opaque
/// to the admission logic.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub vehicle_id: Ulid,
    pub group_id: Ulid,
    pub user_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub purpose: String,
    pub notes: String,
}

fn validate_request(req: &BookingRequest) -> Result<Span, EngineError> {
    if req.vehicle_id.is_nil() {
        return Err(EngineError::Validation("vehicle id required"));
    }
    if req.group_id.is_nil() {
        return Err(EngineError::Validation("group id required"));
    }
    if req.purpose.len() > MAX_PURPOSE_LEN {
        return Err(EngineError::LimitExceeded("purpose too long"));
    }
    if req.notes.len() > MAX_NOTES_LEN {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    validate_window(req.start, req.end)
}

impl Engine {
    /// Normal creation path: Confirmed on a clear window, PendingApproval
    /// when any conflict matches or outranks the requester, rejection when
    /// the requester strictly outranks every conflict — displacing existing
    /// bookings requires the emergency flag, never plain priority.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        let span = validate_request(&req)?;
        let now = now_ms();

        // Collaborator call happens before the vehicle lock is taken.
        let (score, priority) = self.score_user(req.user_id, req.vehicle_id).await;

        let vs = self
            .get_vehicle(&req.vehicle_id)
            .ok_or(EngineError::NotFound(req.vehicle_id))?;
        let mut guard = vs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many bookings on vehicle"));
        }

        // Maintenance overlap is a hard stop, distinct from booking conflicts.
        if let Some(block) = guard.overlapping_maintenance(&span).next() {
            let block_id = block.id;
            metrics::counter!(observability::ADMISSIONS_TOTAL, "outcome" => "maintenance_blocked")
                .increment(1);
            return Err(EngineError::MaintenanceBlocked(block_id));
        }

        let conflicts: Vec<(Ulid, Priority)> = guard
            .overlapping_bookings(&span, None, None)
            .map(|b| (b.id, b.priority))
            .collect();

        let status = if conflicts.is_empty() {
            BookingStatus::Confirmed
        } else if conflicts.iter().any(|(_, p)| *p >= priority) {
            BookingStatus::PendingApproval
        } else {
            let ids: Vec<Ulid> = conflicts.into_iter().map(|(id, _)| id).collect();
            tracing::info!(
                vehicle = %req.vehicle_id,
                user = %req.user_id,
                conflicts = ids.len(),
                "booking rejected: outranked conflicts are not auto-displaced"
            );
            metrics::counter!(observability::ADMISSIONS_TOTAL, "outcome" => "rejected")
                .increment(1);
            return Err(EngineError::Conflict { conflicts: ids });
        };

        let booking = Booking {
            id: Ulid::new(),
            vehicle_id: req.vehicle_id,
            group_id: req.group_id,
            user_id: req.user_id,
            span,
            purpose: req.purpose,
            notes: req.notes,
            is_emergency: false,
            emergency_reason: None,
            priority,
            priority_score: score,
            status,
            recurring_booking_id: None,
            created_at: now,
            updated_at: now,
        };

        let event = match status {
            BookingStatus::Confirmed => {
                metrics::counter!(observability::ADMISSIONS_TOTAL, "outcome" => "confirmed")
                    .increment(1);
                VehicleEvent::BookingCreated {
                    booking_id: booking.id,
                    vehicle_id: booking.vehicle_id,
                    user_id: booking.user_id,
                    span,
                    priority,
                    emergency: false,
                }
            }
            _ => {
                metrics::counter!(observability::ADMISSIONS_TOTAL, "outcome" => "pending")
                    .increment(1);
                VehicleEvent::BookingPendingApproval {
                    booking_id: booking.id,
                    vehicle_id: booking.vehicle_id,
                    user_id: booking.user_id,
                    span,
                    conflicts: conflicts.len(),
                }
            }
        };

        guard.insert_booking(booking.clone());
        self.entity_to_vehicle.insert(booking.id, req.vehicle_id);
        self.emit(req.vehicle_id, &event);
        tracing::debug!(booking = %booking.id, ?status, "booking admitted");
        Ok(booking)
    }

    /// PendingApproval → Confirmed, by a group admin (authorization is the
    /// caller's problem; the transition itself lives here).
    pub async fn approve_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (vehicle_id, mut guard) = self.resolve_entity_write(&id).await?;
        let now = now_ms();
        let booking = guard.booking_mut(id).ok_or(EngineError::NotFound(id))?;
        let from = booking.status;
        if !booking.transition_to(BookingStatus::Confirmed, now) {
            return Err(EngineError::InvalidTransition {
                from,
                to: BookingStatus::Confirmed,
            });
        }
        self.emit(
            vehicle_id,
            &VehicleEvent::BookingApproved {
                booking_id: id,
                vehicle_id,
            },
        );
        Ok(())
    }

    /// Any non-terminal → Cancelled, with the reason appended to notes.
    pub async fn cancel_booking(&self, id: Ulid, reason: &str) -> Result<(), EngineError> {
        let (vehicle_id, mut guard) = self.resolve_entity_write(&id).await?;
        let now = now_ms();
        let booking = guard.booking_mut(id).ok_or(EngineError::NotFound(id))?;
        let from = booking.status;
        if !booking.transition_to(BookingStatus::Cancelled, now) {
            return Err(EngineError::InvalidTransition {
                from,
                to: BookingStatus::Cancelled,
            });
        }
        booking.append_note(&format!("cancelled: {reason}"), now);
        self.emit(
            vehicle_id,
            &VehicleEvent::BookingCancelled {
                booking_id: id,
                vehicle_id,
                reason: Some(reason.to_string()),
            },
        );
        Ok(())
    }

    pub async fn start_trip(&self, id: Ulid) -> Result<(), EngineError> {
        self.apply_transition(id, BookingStatus::InProgress).await
    }

    pub async fn complete_trip(&self, id: Ulid) -> Result<(), EngineError> {
        self.apply_transition(id, BookingStatus::Completed).await
    }

    pub async fn mark_no_show(&self, id: Ulid) -> Result<(), EngineError> {
        self.apply_transition(id, BookingStatus::NoShow).await
    }

    async fn apply_transition(&self, id: Ulid, to: BookingStatus) -> Result<(), EngineError> {
        let (_, mut guard) = self.resolve_entity_write(&id).await?;
        let now = now_ms();
        let booking = guard.booking_mut(id).ok_or(EngineError::NotFound(id))?;
        let from = booking.status;
        if !booking.transition_to(to, now) {
            return Err(EngineError::InvalidTransition { from, to });
        }
        Ok(())
    }

    // ── Maintenance blocks ───────────────────────────────────

    pub async fn add_maintenance_block(
        &self,
        id: Ulid,
        vehicle_id: Ulid,
        start: Ms,
        end: Ms,
        reason: String,
    ) -> Result<(), EngineError> {
        let span = validate_window(start, end)?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let mut guard = vs.write().await;
        guard.insert_maintenance(MaintenanceBlock {
            id,
            vehicle_id,
            span,
            reason,
            status: MaintenanceStatus::Scheduled,
        });
        self.entity_to_vehicle.insert(id, vehicle_id);
        Ok(())
    }

    /// Mark a block Completed (work done) or Cancelled (never happened);
    /// either way it stops blocking the window.
    pub async fn close_maintenance_block(&self, id: Ulid, completed: bool) -> Result<(), EngineError> {
        let (_, mut guard) = self.resolve_entity_write(&id).await?;
        let block = guard.maintenance_mut(id).ok_or(EngineError::NotFound(id))?;
        block.status = if completed {
            MaintenanceStatus::Completed
        } else {
            MaintenanceStatus::Cancelled
        };
        Ok(())
    }
}
