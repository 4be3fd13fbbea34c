use std::collections::HashSet;

use crate::model::TimeSlot;
use crate::segment::{self, SegmentUnit};

use super::{Owner, ResourceAvailability, ResourceId};

/// Every stored segment answering one (resource, slot) query.
///
/// Not persisted on its own. Transitions are attempted on every row, with no
/// short-circuit, and the group reports success only if all rows accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceGroupedAvailability {
    availabilities: Vec<ResourceAvailability>,
}

impl ResourceGroupedAvailability {
    pub fn new(availabilities: Vec<ResourceAvailability>) -> Self {
        Self { availabilities }
    }

    /// Fresh free rows covering `slot` on the default grid.
    pub fn of(resource_id: ResourceId, slot: TimeSlot, parent_id: Option<ResourceId>) -> Self {
        Self::of_with_unit(resource_id, slot, parent_id, SegmentUnit::default_segment())
    }

    pub fn of_with_unit(
        resource_id: ResourceId,
        slot: TimeSlot,
        parent_id: Option<ResourceId>,
        unit: SegmentUnit,
    ) -> Self {
        // All rows of one declaration share a parent, synthetic or not.
        let parent_id = parent_id.unwrap_or_else(ResourceId::new_one);
        let availabilities = segment::split(&slot, unit)
            .into_iter()
            .map(|segment| ResourceAvailability::new(resource_id, segment, Some(parent_id)))
            .collect();
        Self { availabilities }
    }

    pub fn block(&mut self, requester: Owner) -> bool {
        self.apply_to_all(|ra| ra.block(requester))
    }

    pub fn release(&mut self, requester: Owner) -> bool {
        self.apply_to_all(|ra| ra.release(requester))
    }

    pub fn disable(&mut self, requester: Owner) -> bool {
        self.apply_to_all(|ra| ra.disable(requester))
    }

    pub fn enable(&mut self, requester: Owner) -> bool {
        self.apply_to_all(|ra| ra.enable(requester))
    }

    fn apply_to_all(&mut self, mut transition: impl FnMut(&mut ResourceAvailability) -> bool) -> bool {
        self.availabilities
            .iter_mut()
            .fold(true, |all, ra| transition(ra) && all)
    }

    pub fn resource_id(&self) -> Option<ResourceId> {
        self.availabilities.first().map(|ra| ra.resource_id)
    }

    pub fn len(&self) -> usize {
        self.availabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.availabilities.is_empty()
    }

    /// The query found nothing: the range was never declared, which is a
    /// different failure from the segments being held by someone else.
    pub fn has_no_slots(&self) -> bool {
        self.availabilities.is_empty()
    }

    /// Current holders, `Owner::none()` included when any row is free.
    pub fn owners(&self) -> HashSet<Owner> {
        self.availabilities.iter().map(|ra| ra.blocked_by()).collect()
    }

    pub fn blocked_entirely_by(&self, owner: Owner) -> bool {
        self.availabilities.iter().all(|ra| ra.blocked_by() == owner)
    }

    pub fn is_disabled_entirely_by(&self, owner: Owner) -> bool {
        self.availabilities.iter().all(|ra| ra.is_disabled_by(owner))
    }

    pub fn is_entirely_available(&self) -> bool {
        self.availabilities.iter().all(|ra| ra.blocked_by().by_none())
    }

    pub fn find_blocked_by(&self, owner: Owner) -> Vec<&ResourceAvailability> {
        self.availabilities
            .iter()
            .filter(|ra| ra.blocked_by() == owner)
            .collect()
    }

    pub fn availabilities(&self) -> &[ResourceAvailability] {
        &self.availabilities
    }

    pub fn into_availabilities(self) -> Vec<ResourceAvailability> {
        self.availabilities
    }
}
