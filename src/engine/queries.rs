use ulid::Ulid;

use crate::model::*;

use super::conflict::{conflict_set, validate_window};
use super::priority::ranking_score;
use super::{ConflictSet, Engine, EngineError};

impl Engine {
    /// Everything occupying the vehicle that intersects `[start, end)`.
    pub async fn find_overlapping(
        &self,
        vehicle_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<ConflictSet, EngineError> {
        let span = validate_window(start, end)?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        Ok(conflict_set(&guard, &span, None, None))
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let vehicle_id = self
            .get_vehicle_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Full reservation history of a vehicle, in start order.
    pub async fn list_bookings(&self, vehicle_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        Ok(guard.bookings.clone())
    }

    pub async fn list_maintenance(
        &self,
        vehicle_id: Ulid,
    ) -> Result<Vec<MaintenanceBlock>, EngineError> {
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        Ok(guard.maintenance.clone())
    }

    pub async fn list_series(&self, vehicle_id: Ulid) -> Vec<RecurringBooking> {
        // Snapshot the Arcs first; a map shard guard must not live across
        // an await.
        let handles: Vec<_> = self.series.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for series in handles {
            let guard = series.read().await;
            if guard.vehicle_id == vehicle_id {
                out.push(guard.clone());
            }
        }
        out
    }

    /// Live bookings of a vehicle ordered by display rank, highest first.
    /// Ties break on creation time, oldest first. Purely presentational —
    /// admission never consults this ordering.
    pub async fn priority_queue(
        &self,
        vehicle_id: Ulid,
        now: Ms,
    ) -> Result<Vec<Booking>, EngineError> {
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        let mut queue: Vec<Booking> = guard
            .bookings
            .iter()
            .filter(|b| !b.status.is_terminal())
            .cloned()
            .collect();
        drop(guard);
        queue.sort_by_key(|b| (std::cmp::Reverse(ranking_score(b, now)), b.created_at));
        Ok(queue)
    }
}
