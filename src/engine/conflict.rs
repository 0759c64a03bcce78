use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Validate a raw request window and turn it into a `Span`.
pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if end <= start {
        return Err(EngineError::Validation("window end must be after start"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("window too wide"));
    }
    Ok(span)
}

/// Transient overlap result: everything intersecting a candidate window.
/// Not persisted anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConflictSet {
    pub bookings: Vec<Ulid>,
    pub maintenance: Vec<Ulid>,
}

impl ConflictSet {
    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty() && self.maintenance.is_empty()
    }
}

/// Read-only overlap check. An empty result is a common, valid outcome.
pub(crate) fn conflict_set(
    vs: &VehicleState,
    span: &Span,
    exclude_booking: Option<Ulid>,
    exclude_series: Option<Ulid>,
) -> ConflictSet {
    ConflictSet {
        bookings: vs
            .overlapping_bookings(span, exclude_booking, exclude_series)
            .map(|b| b.id)
            .collect(),
        maintenance: vs.overlapping_maintenance(span).map(|m| m.id).collect(),
    }
}

/// True if the candidate window is clear of bookings (minus exclusions)
/// and open maintenance blocks. The reschedule probe's inner test.
pub(crate) fn window_is_free(
    vs: &VehicleState,
    span: &Span,
    exclude_booking: Option<Ulid>,
    exclude_series: Option<Ulid>,
) -> bool {
    vs.overlapping_bookings(span, exclude_booking, exclude_series)
        .next()
        .is_none()
        && vs.overlapping_maintenance(span).next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::*;

    #[test]
    fn window_validation() {
        assert!(validate_window(100, 200).is_ok());
        assert!(matches!(
            validate_window(200, 200),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_window(200, 100),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_window(-5, 100),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_window(0, MAX_VALID_TIMESTAMP_MS + 1),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_window(0, MAX_BOOKING_DURATION_MS + 1),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}
