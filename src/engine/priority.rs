use crate::limits::*;
use crate::model::*;

// ── Admission priority ──────────────────────────────────────────

/// Raw priority score for a (user, vehicle) pair. Ownership share in
/// percent points plus a flat admin bonus; no membership scores zero.
pub fn raw_score(membership: Option<&Membership>) -> i64 {
    match membership {
        Some(m) => {
            let base = (m.share_percentage * 100.0).floor() as i64;
            let role = if m.role == GroupRole::Admin {
                ADMIN_ROLE_BONUS
            } else {
                0
            };
            base + role
        }
        None => 0,
    }
}

/// Map a raw score to the admission priority enum. Total and pure;
/// `Emergency` is never produced here.
pub fn score_to_priority(score: i64) -> Priority {
    if score <= LOW_PRIORITY_MAX_SCORE {
        Priority::Low
    } else if score <= NORMAL_PRIORITY_MAX_SCORE {
        Priority::Normal
    } else {
        Priority::High
    }
}

// ── Display ranking ─────────────────────────────────────────────

/// Ordering score for the display queue. Rewards emergency status heavily,
/// confirmed over pending, and recency with a linear decay capped at
/// `RECENCY_RANK_CAP_DAYS`. Never used for admission decisions.
pub fn ranking_score(booking: &Booking, now: Ms) -> i64 {
    let mut score = booking.priority.rank();
    if booking.is_emergency {
        score += EMERGENCY_RANK_BONUS;
    }
    if booking.status == BookingStatus::Confirmed {
        score += CONFIRMED_RANK_BONUS;
    }
    let days_old = ((now - booking.created_at) / DAY_MS).max(0);
    score += (RECENCY_RANK_CAP_DAYS - days_old).clamp(0, RECENCY_RANK_CAP_DAYS);
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn member(share: f64, role: GroupRole) -> Membership {
        Membership {
            share_percentage: share,
            role,
        }
    }

    fn booking(priority: Priority, status: BookingStatus, emergency: bool, created_at: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            vehicle_id: Ulid::new(),
            group_id: Ulid::new(),
            user_id: Ulid::new(),
            span: Span::new(0, 100),
            purpose: String::new(),
            notes: String::new(),
            is_emergency: emergency,
            emergency_reason: emergency.then(|| "reason".to_string()),
            priority,
            priority_score: 0,
            status,
            recurring_booking_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn score_from_share_and_role() {
        assert_eq!(raw_score(Some(&member(0.25, GroupRole::Member))), 25);
        assert_eq!(raw_score(Some(&member(0.25, GroupRole::Admin))), 75);
        assert_eq!(raw_score(Some(&member(1.0, GroupRole::Admin))), 150);
        assert_eq!(raw_score(None), 0);
        // floor, not round
        assert_eq!(raw_score(Some(&member(0.339, GroupRole::Member))), 33);
    }

    #[test]
    fn score_monotone_in_share() {
        let low = raw_score(Some(&member(0.1, GroupRole::Member)));
        let high = raw_score(Some(&member(0.5, GroupRole::Member)));
        assert!(high >= low);
    }

    #[test]
    fn threshold_boundaries() {
        assert_eq!(score_to_priority(0), Priority::Low);
        assert_eq!(score_to_priority(30), Priority::Low);
        assert_eq!(score_to_priority(31), Priority::Normal);
        assert_eq!(score_to_priority(70), Priority::Normal);
        assert_eq!(score_to_priority(71), Priority::High);
        assert_eq!(score_to_priority(150), Priority::High);
    }

    #[test]
    fn ranking_rewards_emergency_and_confirmed() {
        let now = 100 * DAY_MS;
        let plain = booking(Priority::High, BookingStatus::PendingApproval, false, now);
        let confirmed = booking(Priority::High, BookingStatus::Confirmed, false, now);
        let emergency = booking(Priority::Emergency, BookingStatus::Confirmed, true, now);
        assert!(ranking_score(&confirmed, now) > ranking_score(&plain, now));
        assert!(ranking_score(&emergency, now) > ranking_score(&confirmed, now));
    }

    #[test]
    fn ranking_recency_decays_and_caps() {
        let now = 100 * DAY_MS;
        let fresh = booking(Priority::Normal, BookingStatus::Confirmed, false, now);
        let old = booking(
            Priority::Normal,
            BookingStatus::Confirmed,
            false,
            now - 10 * DAY_MS,
        );
        let ancient = booking(
            Priority::Normal,
            BookingStatus::Confirmed,
            false,
            now - 90 * DAY_MS,
        );
        assert_eq!(ranking_score(&fresh, now) - ranking_score(&old, now), 10);
        // decayed to zero, no negative bonus
        assert_eq!(
            ranking_score(&ancient, now),
            Priority::Normal.rank() + CONFIRMED_RANK_BONUS
        );
    }
}
