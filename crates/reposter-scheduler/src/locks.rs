use std::sync::Arc;

use dashmap::DashMap;
use reposter_core::GroupId;
use tokio::sync::{Mutex, OwnedMutexGuard};

type ChannelKey = (GroupId, String);

/// Exclusive right to deliver to one (group, channel) pair.
///
/// Held by a dispatch worker or a manual operation for the whole
/// reconcile; released on drop.
#[derive(Debug)]
pub struct ChannelClaim {
    _guard: OwnedMutexGuard<()>,
}

/// Exclusive right to run a manual operation on a group.
#[derive(Debug)]
pub struct GroupClaim {
    _guard: OwnedMutexGuard<()>,
}

/// Per-(group, channel) and per-group locks owned by one engine.
///
/// Entries are created on first claim and removed by [`evict_idle`] once
/// nobody holds or waits on them.
///
/// [`evict_idle`]: DeliveryLocks::evict_idle
#[derive(Debug, Default)]
pub struct DeliveryLocks {
    channels: DashMap<ChannelKey, Arc<Mutex<()>>>,
    groups: DashMap<GroupId, Arc<Mutex<()>>>,
}

impl DeliveryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking claim; `None` when someone else is delivering there.
    pub fn try_claim(&self, group: GroupId, chat_id: &str) -> Option<ChannelClaim> {
        let lock = Arc::clone(
            self.channels
                .entry((group, chat_id.to_string()))
                .or_default()
                .value(),
        );
        lock.try_lock_owned()
            .ok()
            .map(|guard| ChannelClaim { _guard: guard })
    }

    pub fn try_claim_group(&self, group: GroupId) -> Option<GroupClaim> {
        let lock = Arc::clone(self.groups.entry(group).or_default().value());
        lock.try_lock_owned()
            .ok()
            .map(|guard| GroupClaim { _guard: guard })
    }

    /// Drop entries that only the map references. Returns how many went.
    pub fn evict_idle(&self) -> usize {
        let before = self.channels.len() + self.groups.len();
        self.channels.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.groups.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - (self.channels.len() + self.groups.len())
    }

    /// Number of live lock entries.
    pub fn len(&self) -> usize {
        self.channels.len() + self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_claim_is_exclusive_until_dropped() {
        let locks = DeliveryLocks::new();
        let first = locks.try_claim(GroupId(1), "@a").expect("first claim");
        assert!(locks.try_claim(GroupId(1), "@a").is_none());
        assert!(locks.try_claim(GroupId(1), "@b").is_some());
        assert!(locks.try_claim(GroupId(2), "@a").is_some());
        drop(first);
        assert!(locks.try_claim(GroupId(1), "@a").is_some());
    }

    #[test]
    fn group_claims_are_independent_of_channel_claims() {
        let locks = DeliveryLocks::new();
        let _group = locks.try_claim_group(GroupId(1)).unwrap();
        assert!(locks.try_claim_group(GroupId(1)).is_none());
        assert!(locks.try_claim(GroupId(1), "@a").is_some());
    }

    #[test]
    fn eviction_keeps_held_entries() {
        let locks = DeliveryLocks::new();
        let held = locks.try_claim(GroupId(1), "@a").unwrap();
        drop(locks.try_claim(GroupId(1), "@b"));
        drop(locks.try_claim_group(GroupId(1)));
        assert_eq!(locks.len(), 3);

        assert_eq!(locks.evict_idle(), 2);
        assert_eq!(locks.len(), 1);
        assert!(locks.try_claim(GroupId(1), "@a").is_none());

        drop(held);
        assert_eq!(locks.evict_idle(), 1);
        assert!(locks.is_empty());
    }
}
