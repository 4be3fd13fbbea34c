use std::collections::HashSet;

use crate::availability::{ResourceGroupedAvailability, ResourceId};
use crate::calendar::{Calendar, Calendars};
use crate::model::*;

use super::Engine;

impl Engine {
    /// Rows of `resource_id` covering the normalized `within`.
    pub fn find(&self, resource_id: ResourceId, within: TimeSlot) -> ResourceGroupedAvailability {
        let normalized = self.normalize(&within);
        ResourceGroupedAvailability::new(self.store.load_all_within_slot(resource_id, &normalized))
    }

    /// Rows of every resource declared under `parent_id`. The group may span
    /// several resources, so it is for reading only.
    pub fn find_by_parent_id(&self, parent_id: ResourceId, within: TimeSlot) -> ResourceGroupedAvailability {
        let normalized = self.normalize(&within);
        ResourceGroupedAvailability::new(self.store.load_all_by_parent_id_within_slot(parent_id, &normalized))
    }

    pub fn load_calendar(&self, resource_id: ResourceId, within: TimeSlot) -> Calendar {
        self.read_model.load(resource_id, &self.normalize(&within))
    }

    pub fn load_calendars(&self, resource_ids: &HashSet<ResourceId>, within: TimeSlot) -> Calendars {
        self.read_model.load_all(resource_ids, &self.normalize(&within))
    }
}
