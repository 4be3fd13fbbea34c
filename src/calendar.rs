use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::availability::{Owner, ResourceAvailability, ResourceId};
use crate::model::TimeSlot;
use crate::store::ReservationStore;

/// Merged windows of one resource, per owner. `Owner::none()` holds free time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calendar {
    pub resource_id: ResourceId,
    pub calendar: HashMap<Owner, Vec<TimeSlot>>,
}

impl Calendar {
    pub fn with_available_slots(resource_id: ResourceId, slots: Vec<TimeSlot>) -> Self {
        Self {
            resource_id,
            calendar: HashMap::from([(Owner::none(), slots)]),
        }
    }

    pub fn empty(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            calendar: HashMap::new(),
        }
    }

    pub fn available_slots(&self) -> &[TimeSlot] {
        self.taken_by(Owner::none())
    }

    pub fn taken_by(&self, owner: Owner) -> &[TimeSlot] {
        self.calendar.get(&owner).map_or(&[][..], Vec::as_slice)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calendars {
    pub calendars: HashMap<ResourceId, Calendar>,
}

impl Calendars {
    pub fn of(calendars: impl IntoIterator<Item = Calendar>) -> Self {
        Self {
            calendars: calendars.into_iter().map(|c| (c.resource_id, c)).collect(),
        }
    }

    /// Unknown resources read as an empty calendar.
    pub fn get(&self, resource_id: ResourceId) -> Calendar {
        self.calendars
            .get(&resource_id)
            .cloned()
            .unwrap_or_else(|| Calendar::empty(resource_id))
    }
}

/// Builds calendars from stored segment rows.
pub struct CalendarReadModel {
    store: Arc<dyn ReservationStore>,
}

impl CalendarReadModel {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    pub fn load(&self, resource_id: ResourceId, slot: &TimeSlot) -> Calendar {
        self.load_all(&HashSet::from([resource_id]), slot).get(resource_id)
    }

    pub fn load_all(&self, resource_ids: &HashSet<ResourceId>, slot: &TimeSlot) -> Calendars {
        let rows = self.store.load_all_for_resources_within_slot(resource_ids, slot);
        Calendars::of(build_calendars(rows))
    }
}

/// Partition by (resource, owner), sort each partition by start and fold
/// touching segments into one window.
fn build_calendars(rows: Vec<ResourceAvailability>) -> Vec<Calendar> {
    let mut partitions: HashMap<ResourceId, HashMap<Owner, Vec<TimeSlot>>> = HashMap::new();
    for ra in rows {
        partitions
            .entry(ra.resource_id)
            .or_default()
            .entry(ra.blocked_by())
            .or_default()
            .push(ra.segment);
    }

    partitions
        .into_iter()
        .map(|(resource_id, owners)| Calendar {
            resource_id,
            calendar: owners
                .into_iter()
                .map(|(owner, segments)| (owner, merge_adjacent(segments)))
                .collect(),
        })
        .collect()
}

fn merge_adjacent(mut segments: Vec<TimeSlot>) -> Vec<TimeSlot> {
    segments.sort_by_key(|s| (s.from, s.to));
    let mut merged: Vec<TimeSlot> = Vec::with_capacity(segments.len());
    for segment in segments {
        match merged.last_mut() {
            Some(last) if last.to == segment.from => last.to = segment.to,
            _ => merged.push(segment),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::ResourceGroupedAvailability;
    use crate::model::HOUR_MS;
    use crate::store::RowStore;

    const H: i64 = HOUR_MS;

    #[test]
    fn merge_joins_touching_segments_only() {
        let merged = merge_adjacent(vec![
            TimeSlot::new(2 * H, 3 * H),
            TimeSlot::new(0, H),
            TimeSlot::new(H, 2 * H),
            TimeSlot::new(5 * H, 6 * H),
        ]);
        assert_eq!(merged, vec![TimeSlot::new(0, 3 * H), TimeSlot::new(5 * H, 6 * H)]);
        assert!(merge_adjacent(Vec::new()).is_empty());
    }

    #[test]
    fn calendar_accessors() {
        let rid = ResourceId::new_one();
        let cal = Calendar::with_available_slots(rid, vec![TimeSlot::new(0, H)]);
        assert_eq!(cal.available_slots(), &[TimeSlot::new(0, H)]);
        assert!(cal.taken_by(Owner::new_one()).is_empty());
        assert!(Calendar::empty(rid).available_slots().is_empty());
    }

    #[test]
    fn calendars_get_falls_back_to_empty() {
        let known = ResourceId::new_one();
        let unknown = ResourceId::new_one();
        let calendars = Calendars::of([Calendar::with_available_slots(known, vec![TimeSlot::new(0, H)])]);
        assert_eq!(calendars.get(known).available_slots().len(), 1);
        assert_eq!(calendars.get(unknown), Calendar::empty(unknown));
    }

    #[test]
    fn read_model_splits_free_and_taken_time() {
        let store = Arc::new(RowStore::in_memory());
        let rid = ResourceId::new_one();
        let day = TimeSlot::new(0, 24 * H);
        store
            .save_new(&ResourceGroupedAvailability::of(rid, day, None))
            .unwrap();

        let owner = Owner::new_one();
        let mut rows = store.load_all_within_slot(rid, &TimeSlot::new(10 * H, 12 * H));
        rows.iter_mut().for_each(|ra| {
            ra.block(owner);
        });
        assert!(store.save_checking_version(&rows).unwrap());

        let model = CalendarReadModel::new(store);
        let cal = model.load(rid, &day);
        assert_eq!(cal.taken_by(owner), &[TimeSlot::new(10 * H, 12 * H)]);
        assert_eq!(
            cal.available_slots(),
            &[TimeSlot::new(0, 10 * H), TimeSlot::new(12 * H, 24 * H)]
        );
    }

    #[test]
    fn read_model_keeps_resources_apart() {
        let store = Arc::new(RowStore::in_memory());
        let a = ResourceId::new_one();
        let b = ResourceId::new_one();
        store
            .save_new(&ResourceGroupedAvailability::of(a, TimeSlot::new(0, H), None))
            .unwrap();
        store
            .save_new(&ResourceGroupedAvailability::of(b, TimeSlot::new(H, 2 * H), None))
            .unwrap();

        let model = CalendarReadModel::new(store);
        let calendars = model.load_all(&HashSet::from([a, b]), &TimeSlot::new(0, 2 * H));
        assert_eq!(calendars.get(a).available_slots(), &[TimeSlot::new(0, H)]);
        assert_eq!(calendars.get(b).available_slots(), &[TimeSlot::new(H, 2 * H)]);
    }

    #[test]
    fn undeclared_resource_has_empty_calendar() {
        let model = CalendarReadModel::new(Arc::new(RowStore::in_memory()));
        let rid = ResourceId::new_one();
        assert_eq!(model.load(rid, &TimeSlot::new(0, H)), Calendar::empty(rid));
    }
}
