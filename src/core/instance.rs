//! Per-commander presence records for the observer's current instance.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::model::{ActorId, LocationState};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipRecord {
    pub state: LocationState,
    pub system: String,
    /// Arrival/departure flip-flop. Not a live presence oracle: it only turns
    /// repeated raw detections into single arrival edges.
    pub here: bool,
}

/// Presence records scoped to one instance. Emptied wholesale by the location
/// tracker; records never expire on their own.
#[derive(Clone, Debug, Default)]
pub struct InstanceMembership {
    records: HashMap<ActorId, MembershipRecord>,
}

impl InstanceMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or replaces) the record for `actor_id`. The commander counts as
    /// here only when its context matches the observer's current one.
    pub fn add(
        &mut self,
        actor_id: ActorId,
        state: LocationState,
        system: &str,
        current: (LocationState, &str),
    ) -> &mut MembershipRecord {
        let (current_state, current_system) = current;
        let here = system == current_system && state == current_state;
        let record = MembershipRecord {
            state,
            system: system.to_string(),
            here,
        };
        match self.records.entry(actor_id) {
            Entry::Occupied(slot) => {
                let slot = slot.into_mut();
                *slot = record;
                slot
            }
            Entry::Vacant(slot) => slot.insert(record),
        }
    }

    pub fn get(&self, actor_id: ActorId) -> Option<&MembershipRecord> {
        self.records.get(&actor_id)
    }

    pub fn get_mut(&mut self, actor_id: ActorId) -> Option<&mut MembershipRecord> {
        self.records.get_mut(&actor_id)
    }

    pub fn is_here(&self, actor_id: ActorId) -> bool {
        self.records.get(&actor_id).is_some_and(|r| r.here)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Moves every record out, leaving the membership empty.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
