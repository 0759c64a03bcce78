use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    Validation(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Normal-path creation blocked by equal/higher-priority bookings, or by
    /// a strictly-outranked set this design refuses to displace.
    Conflict { conflicts: Vec<Ulid> },
    /// Candidate window intersects an open maintenance block.
    MaintenanceBlocked(Ulid),
    /// Emergency attempted against an existing emergency booking.
    EmergencyConflict(Ulid),
    QuotaExceeded { used: u32, cap: u32 },
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    HasActiveBookings(Ulid),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict { conflicts } => {
                write!(f, "window conflicts with {} existing booking(s)", conflicts.len())
            }
            EngineError::MaintenanceBlocked(id) => {
                write!(f, "window blocked by maintenance: {id}")
            }
            EngineError::EmergencyConflict(id) => {
                write!(f, "cannot override existing emergency booking: {id}")
            }
            EngineError::QuotaExceeded { used, cap } => {
                write!(f, "emergency quota exceeded: {used} of {cap} this month")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "illegal status transition: {from:?} -> {to:?}")
            }
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot remove vehicle {id}: has active bookings")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
