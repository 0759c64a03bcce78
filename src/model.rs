use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Admission priority of a booking. `Emergency` is never produced by the
/// score mapping — it is set directly on emergency-flagged bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Emergency,
}

impl Priority {
    /// Integer weight used by the display ranking score.
    pub fn rank(self) -> i64 {
        match self {
            Priority::Low => 1,
            Priority::Normal => 2,
            Priority::High => 3,
            Priority::Emergency => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    PendingApproval,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }

    /// Whether a booking in this status occupies the vehicle for conflict
    /// purposes. Everything outside {Cancelled, Completed} counts — NoShow
    /// windows stay visible.
    pub fn blocks_vehicle(self) -> bool {
        !matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    /// Legal status transitions. `Confirmed → PendingApproval` is the
    /// emergency pending-mark; window mutation is not a transition.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        match (self, next) {
            (PendingApproval, Confirmed | Cancelled | NoShow) => true,
            (Confirmed, InProgress | PendingApproval | Cancelled | NoShow) => true,
            (InProgress, Completed | Cancelled | NoShow) => true,
            _ => false,
        }
    }

    /// Reschedule (window mutation) is only legal in these states.
    pub fn window_mutable(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::PendingApproval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupRole {
    Member,
    Admin,
}

/// A user's stake in a vehicle, fetched from the membership collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    /// Ownership share in `[0, 1]`.
    pub share_percentage: f64,
    pub role: GroupRole,
}

/// The reservation of one vehicle by one user for `[span.start, span.end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub group_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub purpose: String,
    pub notes: String,
    pub is_emergency: bool,
    pub emergency_reason: Option<String>,
    pub priority: Priority,
    /// Raw scorer output the priority enum was derived from.
    pub priority_score: i64,
    pub status: BookingStatus,
    pub recurring_booking_id: Option<Ulid>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    /// Append a line to the booking's notes.
    pub fn append_note(&mut self, note: &str, now: Ms) {
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(note);
        self.updated_at = now;
    }

    /// Apply a status transition if the state machine allows it.
    pub fn transition_to(&mut self, next: BookingStatus, now: Ms) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = now;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesStatus {
    Active,
    Paused,
    Ended,
}

/// Template describing a repeating reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringBooking {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub group_id: Ulid,
    pub user_id: Ulid,
    pub pattern: RecurrencePattern,
    /// Every N units (days, weeks, months).
    pub interval: u32,
    /// Bitmask, bit 0 = Monday .. bit 6 = Sunday. Required non-zero for Weekly.
    pub days_of_week: u8,
    /// Offset from UTC midnight.
    pub start_time: Ms,
    /// Offset from UTC midnight, `> start_time`, within the same day.
    pub end_time: Ms,
    pub start_date: Ms,
    pub end_date: Option<Ms>,
    pub status: SeriesStatus,
    /// Watermark: no occurrence at or before this instant is regenerated.
    /// Monotonically non-decreasing.
    pub last_generated_until: Option<Ms>,
    pub paused_until: Option<Ms>,
    pub purpose: String,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaintenanceStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl MaintenanceStatus {
    pub fn blocks_vehicle(self) -> bool {
        !matches!(self, MaintenanceStatus::Completed | MaintenanceStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceBlock {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub span: Span,
    pub reason: String,
    pub status: MaintenanceStatus,
}

/// Per-vehicle scheduling state. Bookings are never removed — cancellation
/// is a status flip, so the list is the full reservation history.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub id: Ulid,
    pub group_id: Ulid,
    pub name: Option<String>,
    /// Sorted by `span.start`. Span changes must go through
    /// `remove_booking` + `insert_booking` to keep the order.
    pub bookings: Vec<Booking>,
    /// Sorted by `span.start`.
    pub maintenance: Vec<MaintenanceBlock>,
}

impl VehicleState {
    pub fn new(id: Ulid, group_id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            group_id,
            name,
            bookings: Vec::new(),
            maintenance: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings that occupy the vehicle and overlap the query window,
    /// minus the given exclusions. Uses binary search to skip bookings
    /// starting at or after `query.end`.
    pub fn overlapping_bookings(
        &self,
        query: &Span,
        exclude_booking: Option<Ulid>,
        exclude_series: Option<Ulid>,
    ) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound].iter().filter(move |b| {
            b.span.end > query.start
                && b.status.blocks_vehicle()
                && exclude_booking != Some(b.id)
                && (exclude_series.is_none() || b.recurring_booking_id != exclude_series)
        })
    }

    pub fn insert_maintenance(&mut self, block: MaintenanceBlock) {
        let pos = self
            .maintenance
            .binary_search_by_key(&block.span.start, |m| m.span.start)
            .unwrap_or_else(|e| e);
        self.maintenance.insert(pos, block);
    }

    pub fn maintenance_mut(&mut self, id: Ulid) -> Option<&mut MaintenanceBlock> {
        self.maintenance.iter_mut().find(|m| m.id == id)
    }

    /// Open maintenance blocks overlapping the query window.
    pub fn overlapping_maintenance(&self, query: &Span) -> impl Iterator<Item = &MaintenanceBlock> {
        let right_bound = self
            .maintenance
            .partition_point(|m| m.span.start < query.end);
        self.maintenance[..right_bound]
            .iter()
            .filter(move |m| m.span.end > query.start && m.status.blocks_vehicle())
    }
}

/// Notifications published after a scheduling decision. Delivery is
/// best-effort; the booking state change is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleEvent {
    BookingCreated {
        booking_id: Ulid,
        vehicle_id: Ulid,
        user_id: Ulid,
        span: Span,
        priority: Priority,
        emergency: bool,
    },
    BookingPendingApproval {
        booking_id: Ulid,
        vehicle_id: Ulid,
        user_id: Ulid,
        span: Span,
        conflicts: usize,
    },
    BookingApproved {
        booking_id: Ulid,
        vehicle_id: Ulid,
    },
    BookingCancelled {
        booking_id: Ulid,
        vehicle_id: Ulid,
        reason: Option<String>,
    },
    BookingRescheduled {
        booking_id: Ulid,
        vehicle_id: Ulid,
        from: Span,
        to: Span,
    },
    RecurringBookingCreated {
        series_id: Ulid,
        vehicle_id: Ulid,
    },
    RecurringBookingUpdated {
        series_id: Ulid,
        vehicle_id: Ulid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_booking(start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            vehicle_id: Ulid::new(),
            group_id: Ulid::new(),
            user_id: Ulid::new(),
            span: Span::new(start, end),
            purpose: String::new(),
            notes: String::new(),
            is_emergency: false,
            emergency_reason: None,
            priority: Priority::Normal,
            priority_score: 50,
            status,
            recurring_booking_id: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Emergency);
        assert_eq!(Priority::Emergency.rank(), 4);
    }

    #[test]
    fn status_transitions() {
        use BookingStatus::*;
        assert!(PendingApproval.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(InProgress));
        assert!(Confirmed.can_transition_to(PendingApproval)); // emergency pending-mark
        assert!(InProgress.can_transition_to(Completed));
        assert!(PendingApproval.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(NoShow));

        assert!(!Completed.can_transition_to(Confirmed));
        assert!(!Cancelled.can_transition_to(PendingApproval));
        assert!(!NoShow.can_transition_to(Cancelled));
        assert!(!PendingApproval.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(PendingApproval));
    }

    #[test]
    fn terminal_and_blocking_sets_differ() {
        use BookingStatus::*;
        // NoShow is terminal but still occupies the window.
        assert!(NoShow.is_terminal());
        assert!(NoShow.blocks_vehicle());
        assert!(!Cancelled.blocks_vehicle());
        assert!(!Completed.blocks_vehicle());
        assert!(InProgress.blocks_vehicle());
    }

    #[test]
    fn transition_to_rejects_illegal() {
        let mut b = blank_booking(100, 200, BookingStatus::Completed);
        assert!(!b.transition_to(BookingStatus::Confirmed, 10));
        assert_eq!(b.status, BookingStatus::Completed);
        assert_eq!(b.updated_at, 0);
    }

    #[test]
    fn append_note_separates_lines() {
        let mut b = blank_booking(100, 200, BookingStatus::Confirmed);
        b.append_note("first", 5);
        b.append_note("second", 6);
        assert_eq!(b.notes, "first\nsecond");
        assert_eq!(b.updated_at, 6);
    }

    #[test]
    fn booking_ordering() {
        let mut vs = VehicleState::new(Ulid::new(), Ulid::new(), None);
        vs.insert_booking(blank_booking(300, 400, BookingStatus::Confirmed));
        vs.insert_booking(blank_booking(100, 200, BookingStatus::Confirmed));
        vs.insert_booking(blank_booking(200, 300, BookingStatus::Confirmed));
        assert_eq!(vs.bookings[0].span.start, 100);
        assert_eq!(vs.bookings[1].span.start, 200);
        assert_eq!(vs.bookings[2].span.start, 300);
    }

    #[test]
    fn overlapping_skips_cancelled_and_completed() {
        let mut vs = VehicleState::new(Ulid::new(), Ulid::new(), None);
        vs.insert_booking(blank_booking(100, 200, BookingStatus::Cancelled));
        vs.insert_booking(blank_booking(100, 200, BookingStatus::Completed));
        vs.insert_booking(blank_booking(100, 200, BookingStatus::NoShow));
        let hits: Vec<_> = vs
            .overlapping_bookings(&Span::new(150, 250), None, None)
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].status, BookingStatus::NoShow);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut vs = VehicleState::new(Ulid::new(), Ulid::new(), None);
        vs.insert_booking(blank_booking(100, 200, BookingStatus::Confirmed));
        let hits: Vec<_> = vs
            .overlapping_bookings(&Span::new(200, 300), None, None)
            .collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn overlapping_excludes_by_id_and_series() {
        let mut vs = VehicleState::new(Ulid::new(), Ulid::new(), None);
        let series = Ulid::new();
        let mut a = blank_booking(100, 200, BookingStatus::Confirmed);
        a.recurring_booking_id = Some(series);
        let b = blank_booking(150, 250, BookingStatus::Confirmed);
        let a_id = a.id;
        let b_id = b.id;
        vs.insert_booking(a);
        vs.insert_booking(b);

        let query = Span::new(100, 300);
        let all: Vec<_> = vs.overlapping_bookings(&query, None, None).collect();
        assert_eq!(all.len(), 2);

        let minus_a: Vec<_> = vs
            .overlapping_bookings(&query, Some(a_id), None)
            .collect();
        assert_eq!(minus_a.len(), 1);
        assert_eq!(minus_a[0].id, b_id);

        let minus_series: Vec<_> = vs
            .overlapping_bookings(&query, None, Some(series))
            .collect();
        assert_eq!(minus_series.len(), 1);
        assert_eq!(minus_series[0].id, b_id);
    }

    #[test]
    fn maintenance_terminal_not_blocking() {
        let mut vs = VehicleState::new(Ulid::new(), Ulid::new(), None);
        vs.insert_maintenance(MaintenanceBlock {
            id: Ulid::new(),
            vehicle_id: vs.id,
            span: Span::new(100, 200),
            reason: "oil change".into(),
            status: MaintenanceStatus::Completed,
        });
        vs.insert_maintenance(MaintenanceBlock {
            id: Ulid::new(),
            vehicle_id: vs.id,
            span: Span::new(150, 250),
            reason: "brakes".into(),
            status: MaintenanceStatus::Scheduled,
        });
        let hits: Vec<_> = vs.overlapping_maintenance(&Span::new(100, 300)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reason, "brakes");
    }

    #[test]
    fn remove_booking_preserves_order() {
        let mut vs = VehicleState::new(Ulid::new(), Ulid::new(), None);
        let bookings: Vec<Booking> = (0..3)
            .map(|i| blank_booking((i as Ms) * 100, (i as Ms) * 100 + 50, BookingStatus::Confirmed))
            .collect();
        let ids: Vec<Ulid> = bookings.iter().map(|b| b.id).collect();
        for b in bookings {
            vs.insert_booking(b);
        }
        vs.remove_booking(ids[1]);
        assert_eq!(vs.bookings.len(), 2);
        assert_eq!(vs.bookings[0].id, ids[0]);
        assert_eq!(vs.bookings[1].id, ids[2]);
        assert!(vs.remove_booking(Ulid::new()).is_none());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = VehicleEvent::BookingRescheduled {
            booking_id: Ulid::new(),
            vehicle_id: Ulid::new(),
            from: Span::new(100, 200),
            to: Span::new(300, 400),
        };
        let json = serde_json::to_string(&event).unwrap();
        let decoded: VehicleEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, decoded);
    }
}
