mod admission;
mod conflict;
mod emergency;
mod error;
mod priority;
mod queries;
mod recurrence;

pub use admission::BookingRequest;
pub use conflict::ConflictSet;
pub use emergency::{ConflictResolution, EmergencyOutcome, EmergencyRequest, RescheduleResult};
pub use error::EngineError;
pub use priority::{ranking_score, raw_score, score_to_priority};
pub use recurrence::{GenerationReport, SeriesRequest, SkippedOccurrence};

pub(crate) use conflict::now_ms;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::membership::MembershipLookup;
use crate::model::*;
use crate::notify::NotifyHub;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

/// The scheduling engine. Holds per-vehicle state behind a `RwLock` — the
/// write guard is the serialization unit that keeps the overlap check and
/// the subsequent insert atomic per vehicle.
pub struct Engine {
    pub(super) vehicles: DashMap<Ulid, SharedVehicleState>,
    pub(super) series: DashMap<Ulid, Arc<RwLock<RecurringBooking>>>,
    /// Reverse lookup: booking/maintenance id → vehicle id.
    pub(super) entity_to_vehicle: DashMap<Ulid, Ulid>,
    pub(super) membership: Arc<dyn MembershipLookup>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(membership: Arc<dyn MembershipLookup>, notify: Arc<NotifyHub>) -> Self {
        Self {
            vehicles: DashMap::new(),
            series: DashMap::new(),
            entity_to_vehicle: DashMap::new(),
            membership,
            notify,
        }
    }

    pub fn get_vehicle(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    pub fn get_vehicle_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_vehicle.get(entity_id).map(|e| *e.value())
    }

    pub fn get_series(&self, id: &Ulid) -> Option<Arc<RwLock<RecurringBooking>>> {
        self.series.get(id).map(|e| e.value().clone())
    }

    /// Lookup entity → vehicle, get vehicle, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<VehicleState>), EngineError> {
        let vehicle_id = self
            .get_vehicle_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.write_owned().await;
        Ok((vehicle_id, guard))
    }

    /// Fetch the requester's membership and run the scorer. Happens before
    /// any vehicle lock is taken — the collaborator call may block.
    pub(super) async fn score_user(&self, user_id: Ulid, vehicle_id: Ulid) -> (i64, Priority) {
        let membership = self.membership.get_member(user_id, vehicle_id).await;
        let score = priority::raw_score(membership.as_ref());
        (score, priority::score_to_priority(score))
    }

    pub(super) fn emit(&self, vehicle_id: Ulid, event: &VehicleEvent) {
        self.notify.send(vehicle_id, event);
    }

    // ── Vehicle lifecycle ────────────────────────────────────

    pub async fn register_vehicle(
        &self,
        id: Ulid,
        group_id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        if id.is_nil() {
            return Err(EngineError::Validation("vehicle id required"));
        }
        if group_id.is_nil() {
            return Err(EngineError::Validation("group id required"));
        }
        if self.vehicles.len() >= crate::limits::MAX_VEHICLES {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        if self.vehicles.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let vs = VehicleState::new(id, group_id, name);
        self.vehicles.insert(id, Arc::new(RwLock::new(vs)));
        Ok(())
    }

    pub async fn update_vehicle(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        let vs = self.get_vehicle(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = vs.write().await;
        guard.name = name;
        Ok(())
    }

    /// Remove a vehicle. Refused while any booking still occupies it.
    pub async fn remove_vehicle(&self, id: Ulid) -> Result<(), EngineError> {
        let vs = self.get_vehicle(&id).ok_or(EngineError::NotFound(id))?;
        let guard = vs.read().await;
        if guard.bookings.iter().any(|b| b.status.blocks_vehicle()) {
            return Err(EngineError::HasActiveBookings(id));
        }
        for b in &guard.bookings {
            self.entity_to_vehicle.remove(&b.id);
        }
        for m in &guard.maintenance {
            self.entity_to_vehicle.remove(&m.id);
        }
        drop(guard);
        self.vehicles.remove(&id);
        self.notify.remove(&id);
        Ok(())
    }
}
