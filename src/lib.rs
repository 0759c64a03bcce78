//! Booking conflict and priority scheduling engine for shared vehicle
//! fleets. In-memory, per-vehicle serialized, collaborator-backed.

pub mod engine;
pub mod limits;
pub mod membership;
pub mod model;
pub mod notify;
pub mod observability;
pub mod scheduler;

pub use engine::{
    BookingRequest, ConflictResolution, ConflictSet, EmergencyOutcome, EmergencyRequest, Engine,
    EngineError, GenerationReport, RescheduleResult, SeriesRequest, SkippedOccurrence,
};
pub use membership::{MembershipLookup, StaticMemberships};
pub use notify::NotifyHub;
