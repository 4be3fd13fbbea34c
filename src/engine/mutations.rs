use std::collections::HashSet;

use tracing::{debug, info};

use crate::availability::{Owner, ResourceGroupedAvailability, ResourceId};
use crate::model::*;
use crate::notify::{DomainEvent, ResourceTakenOver};
use crate::observability;

use super::{Engine, EngineError};

impl Engine {
    /// Declare `slot` (normalized and split) as free segments of `resource_id`.
    pub fn create_resource_slots(
        &self,
        resource_id: ResourceId,
        slot: TimeSlot,
        parent_id: Option<ResourceId>,
    ) -> Result<(), EngineError> {
        let group = ResourceGroupedAvailability::of_with_unit(resource_id, slot, parent_id, self.segment);
        self.store.save_new(&group)?;
        info!(%resource_id, slot = %self.normalize(&slot), segments = group.len(), "resource slots created");
        Ok(())
    }

    pub fn block(&self, resource_id: ResourceId, slot: TimeSlot, requester: Owner) -> Result<bool, EngineError> {
        let mut group = self.find(resource_id, slot);
        self.commit("block", &mut group, |g| g.block(requester))
    }

    pub fn release(&self, resource_id: ResourceId, slot: TimeSlot, requester: Owner) -> Result<bool, EngineError> {
        let mut group = self.find(resource_id, slot);
        self.commit("release", &mut group, |g| g.release(requester))
    }

    /// Only the owner that disabled a segment can enable it again.
    pub fn enable(&self, resource_id: ResourceId, slot: TimeSlot, requester: Owner) -> Result<bool, EngineError> {
        let mut group = self.find(resource_id, slot);
        self.commit("enable", &mut group, |g| g.enable(requester))
    }

    /// Take the slot away from whoever holds it. On success publishes
    /// `ResourceTakenOver` naming the displaced owners.
    pub fn disable(&self, resource_id: ResourceId, slot: TimeSlot, requester: Owner) -> Result<bool, EngineError> {
        let mut group = self.find(resource_id, slot);
        let previous_owners: HashSet<Owner> = group.owners().into_iter().filter(|o| !o.by_none()).collect();
        if !self.commit("disable", &mut group, |g| g.disable(requester))? {
            return Ok(false);
        }

        if !previous_owners.is_empty() {
            metrics::counter!(observability::TAKEOVERS_TOTAL).increment(1);
            info!(%resource_id, %slot, displaced = previous_owners.len(), "resource taken over");
        }
        let event = ResourceTakenOver::new(resource_id, previous_owners, slot, (self.clock)());
        self.events.publish(&DomainEvent::ResourceTakenOver(event));
        Ok(true)
    }

    /// Block the whole of `within` on one candidate that is entirely free for
    /// it, chosen at random. `None` when no candidate qualifies or the block
    /// lost a race.
    pub fn block_random_available(
        &self,
        candidates: &HashSet<ResourceId>,
        within: TimeSlot,
        owner: Owner,
    ) -> Result<Option<ResourceId>, EngineError> {
        let normalized = self.normalize(&within);
        let mut group = self
            .store
            .load_availabilities_of_random_resources_within(&normalized, candidates);
        let picked = group.resource_id();
        if self.commit("block_random", &mut group, |g| g.block(owner))? {
            Ok(picked)
        } else {
            Ok(None)
        }
    }

    /// Apply `transition` to every row; persist only if all rows accepted.
    fn commit(
        &self,
        op: &'static str,
        group: &mut ResourceGroupedAvailability,
        transition: impl FnOnce(&mut ResourceGroupedAvailability) -> bool,
    ) -> Result<bool, EngineError> {
        if group.has_no_slots() {
            debug!(op, "no segments declared for the requested slot");
            metrics::counter!(observability::TRANSITIONS_TOTAL, "op" => op, "outcome" => "no_slots").increment(1);
            return Ok(false);
        }

        let accepted = transition(group) && self.store.save_checking_version(group.availabilities())?;
        if !accepted {
            debug!(op, resource_id = ?group.resource_id(), "transition rejected");
        }
        metrics::counter!(
            observability::TRANSITIONS_TOTAL,
            "op" => op,
            "outcome" => observability::outcome_label(accepted)
        )
        .increment(1);
        Ok(accepted)
    }
}
