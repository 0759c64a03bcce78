use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::Membership;

/// External source of ownership shares and group roles. The scorer consumes
/// this; a missing membership simply scores zero.
#[async_trait]
pub trait MembershipLookup: Send + Sync {
    async fn get_member(&self, user_id: Ulid, vehicle_id: Ulid) -> Option<Membership>;
}

/// In-memory membership table, for tests and single-process deployments.
#[derive(Default)]
pub struct StaticMemberships {
    members: DashMap<(Ulid, Ulid), Membership>,
}

impl StaticMemberships {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: Ulid, vehicle_id: Ulid, membership: Membership) {
        self.members.insert((user_id, vehicle_id), membership);
    }

    pub fn remove(&self, user_id: Ulid, vehicle_id: Ulid) {
        self.members.remove(&(user_id, vehicle_id));
    }
}

#[async_trait]
impl MembershipLookup for StaticMemberships {
    async fn get_member(&self, user_id: Ulid, vehicle_id: Ulid) -> Option<Membership> {
        self.members.get(&(user_id, vehicle_id)).map(|m| *m.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GroupRole;

    #[tokio::test]
    async fn lookup_hit_and_miss() {
        let members = StaticMemberships::new();
        let user = Ulid::new();
        let vehicle = Ulid::new();
        members.insert(
            user,
            vehicle,
            Membership {
                share_percentage: 0.25,
                role: GroupRole::Admin,
            },
        );

        let found = members.get_member(user, vehicle).await.unwrap();
        assert_eq!(found.role, GroupRole::Admin);
        assert!(members.get_member(Ulid::new(), vehicle).await.is_none());

        members.remove(user, vehicle);
        assert!(members.get_member(user, vehicle).await.is_none());
    }
}
