use std::collections::{HashMap, HashSet};
use std::path::Path;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::availability::*;
use crate::engine::EngineError;
use crate::model::TimeSlot;
use crate::observability;
use crate::wal::Wal;

/// Journal record: one committed store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    SegmentsCreated {
        rows: Vec<ResourceAvailability>,
    },
    BlockadeChanged {
        id: AvailabilityId,
        version: u64,
        blockade: Blockade,
    },
}

/// Persistence contract for segment rows.
///
/// Loads return owned copies; the only way to change a stored row is
/// `save_checking_version`, a per-row compare-and-swap on `version`.
pub trait ReservationStore: Send + Sync {
    /// Insert every row of `group`. Fails without inserting anything if any
    /// segment shares time with a stored segment of the same resource, or
    /// with another segment of the group.
    fn save_new(&self, group: &ResourceGroupedAvailability) -> Result<(), EngineError>;

    fn load_by_id(&self, id: AvailabilityId) -> Option<ResourceAvailability>;

    /// Rows of `resource_id` whose segment lies within `slot`, by start.
    fn load_all_within_slot(&self, resource_id: ResourceId, slot: &TimeSlot) -> Vec<ResourceAvailability>;

    fn load_all_by_parent_id_within_slot(
        &self,
        parent_id: ResourceId,
        slot: &TimeSlot,
    ) -> Vec<ResourceAvailability>;

    fn load_all_for_resources_within_slot(
        &self,
        resource_ids: &HashSet<ResourceId>,
        slot: &TimeSlot,
    ) -> Vec<ResourceAvailability>;

    /// For each row: if the stored version still equals `row.version`, store
    /// its blockade and bump the version. Every row is attempted. `true` only
    /// if every row matched; rows that did match stay written either way.
    fn save_checking_version(&self, rows: &[ResourceAvailability]) -> Result<bool, EngineError>;

    /// Rows within `slot` of one candidate picked uniformly at random among
    /// those fully available for the slot. Empty when none qualifies.
    fn load_availabilities_of_random_resources_within(
        &self,
        slot: &TimeSlot,
        candidates: &HashSet<ResourceId>,
    ) -> ResourceGroupedAvailability;
}

/// Per-resource index entries, sorted by `(from, to)`.
type SegmentIndex = Vec<(TimeSlot, AvailabilityId)>;

fn segment_key(slot: &TimeSlot) -> (i64, i64) {
    (slot.from, slot.to)
}

/// Stored segments never overlap, so only the last one starting before
/// `segment` ends can share time with it.
fn clashes_with_stored(index: &SegmentIndex, segment: &TimeSlot) -> bool {
    let after = index.partition_point(|(s, _)| s.from < segment.to);
    after > 0 && index[after - 1].0.to > segment.from
}

/// Concurrent row store, optionally backed by a journal.
///
/// Lock order, outermost first: compaction gate, segment index shard,
/// row shard, journal.
pub struct RowStore {
    rows: DashMap<AvailabilityId, ResourceAvailability>,
    /// resource → its segments; doubles as the (resource, segment) unique index.
    segments: DashMap<ResourceId, SegmentIndex>,
    /// parent → resources declared under it.
    children: DashMap<ResourceId, HashSet<ResourceId>>,
    /// Shared by mutations, exclusive while compacting.
    gate: RwLock<()>,
    journal: Option<Mutex<Wal>>,
}

impl Default for RowStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl RowStore {
    pub fn in_memory() -> Self {
        Self {
            rows: DashMap::new(),
            segments: DashMap::new(),
            children: DashMap::new(),
            gate: RwLock::new(()),
            journal: None,
        }
    }

    /// Open a journal-backed store, replaying whatever `path` already holds.
    /// A torn tail left by a crash is cut off first.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let events = Wal::recover(path)?;
        let mut store = Self::in_memory();
        for event in &events {
            store.apply(event);
        }
        store.journal = Some(Mutex::new(Wal::open_after_replay(path, events.len() as u64)?));
        info!(
            path = %path.display(),
            records = events.len(),
            rows = store.row_count(),
            resources = store.resource_count(),
            "reservation store opened"
        );
        Ok(store)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn resource_count(&self) -> usize {
        self.segments.iter().filter(|e| !e.value().is_empty()).count()
    }

    /// Records appended since open or the last compaction; 0 without a journal.
    pub fn appends_since_compact(&self) -> u64 {
        self.journal
            .as_ref()
            .map_or(0, |wal| wal.lock().appends_since_compact())
    }

    /// Rewrite the journal as one `SegmentsCreated` record per resource
    /// carrying current blockades and versions. No-op without a journal.
    pub fn compact(&self) -> Result<(), EngineError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let _exclusive = self.gate.write();

        let mut per_resource: HashMap<ResourceId, Vec<ResourceAvailability>> = HashMap::new();
        for entry in self.rows.iter() {
            per_resource
                .entry(entry.resource_id)
                .or_default()
                .push(entry.value().clone());
        }
        let snapshot: Vec<StoreEvent> = per_resource
            .into_values()
            .map(|mut rows| {
                rows.sort_by_key(|ra| segment_key(&ra.segment));
                StoreEvent::SegmentsCreated { rows }
            })
            .collect();

        let mut wal = journal.lock();
        let before = wal.appends_since_compact();
        wal.compact(&snapshot)?;
        info!(
            path = %wal.path().display(),
            records_before = before,
            records_after = snapshot.len(),
            "journal compacted"
        );
        Ok(())
    }

    fn journal_append(&self, event: &StoreEvent) -> Result<(), EngineError> {
        if let Some(journal) = &self.journal {
            journal.lock().append(event).map_err(|e| {
                warn!("journal append failed: {e}");
                EngineError::from(e)
            })?;
        }
        Ok(())
    }

    /// Apply a replayed record. No journaling, no uniqueness check.
    fn apply(&self, event: &StoreEvent) {
        match event {
            StoreEvent::SegmentsCreated { rows } => {
                for ra in rows {
                    let mut index = self.segments.entry(ra.resource_id).or_default();
                    self.index_row(&mut index, ra);
                }
            }
            StoreEvent::BlockadeChanged { id, version, blockade } => match self.rows.get_mut(id) {
                Some(mut stored) => {
                    stored.blockade = *blockade;
                    stored.version = *version;
                }
                None => warn!(%id, "journal changes a row that was never created, skipping"),
            },
        }
    }

    fn index_row(&self, index: &mut SegmentIndex, ra: &ResourceAvailability) {
        let key = segment_key(&ra.segment);
        let pos = index
            .binary_search_by_key(&key, |(s, _)| segment_key(s))
            .unwrap_or_else(|e| e);
        index.insert(pos, (ra.segment, ra.id));
        self.rows.insert(ra.id, ra.clone());
        self.children
            .entry(ra.parent_id)
            .or_default()
            .insert(ra.resource_id);
    }

    fn within(&self, resource_id: ResourceId, slot: &TimeSlot) -> Vec<ResourceAvailability> {
        let Some(index) = self.segments.get(&resource_id) else {
            return Vec::new();
        };
        let first = index.partition_point(|(s, _)| s.from < slot.from);
        index[first..]
            .iter()
            .take_while(|(s, _)| s.from <= slot.to)
            .filter(|(s, _)| s.to <= slot.to)
            .filter_map(|(_, id)| self.rows.get(id).map(|r| r.value().clone()))
            .collect()
    }

    fn compare_and_set(&self, ra: &ResourceAvailability) -> Result<bool, EngineError> {
        let Some(mut stored) = self.rows.get_mut(&ra.id) else {
            debug!(id = %ra.id, "version check against unknown row");
            return Ok(false);
        };
        if stored.version != ra.version {
            debug!(
                id = %ra.id,
                expected = ra.version,
                found = stored.version,
                "stale version, row not written"
            );
            metrics::counter!(observability::VERSION_CONFLICTS_TOTAL).increment(1);
            return Ok(false);
        }
        let version = ra.version + 1;
        self.journal_append(&StoreEvent::BlockadeChanged {
            id: ra.id,
            version,
            blockade: ra.blockade,
        })?;
        stored.blockade = ra.blockade;
        stored.version = version;
        Ok(true)
    }
}

/// Stored segments cover `slot` end to end with no owner on any of them.
fn fully_available(rows: &[ResourceAvailability], slot: &TimeSlot) -> bool {
    let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
        return false;
    };
    first.segment.from == slot.from
        && last.segment.to == slot.to
        && rows.windows(2).all(|w| w[0].segment.to == w[1].segment.from)
        && rows.iter().all(|ra| ra.blocked_by().by_none())
}

impl ReservationStore for RowStore {
    fn save_new(&self, group: &ResourceGroupedAvailability) -> Result<(), EngineError> {
        let Some(resource_id) = group.resource_id() else {
            return Ok(());
        };
        let rows = group.availabilities();
        if let Some(other) = rows.iter().map(|ra| ra.resource_id).find(|r| *r != resource_id) {
            return Err(EngineError::MixedGroup(resource_id, other));
        }

        let _shared = self.gate.read();
        let mut index = self.segments.entry(resource_id).or_default();
        let mut incoming: Vec<TimeSlot> = rows.iter().map(|ra| ra.segment).collect();
        incoming.sort_by_key(segment_key);
        let clash = incoming
            .windows(2)
            .find(|pair| pair[0].to > pair[1].from)
            .map(|pair| pair[1])
            .or_else(|| incoming.iter().copied().find(|s| clashes_with_stored(&index, s)));
        if let Some(segment) = clash {
            return Err(EngineError::DuplicateSegment { resource_id, segment });
        }

        self.journal_append(&StoreEvent::SegmentsCreated { rows: rows.to_vec() })?;
        for ra in rows {
            self.index_row(&mut index, ra);
        }
        metrics::counter!(observability::SEGMENTS_CREATED_TOTAL).increment(rows.len() as u64);
        debug!(%resource_id, segments = rows.len(), "segments declared");
        Ok(())
    }

    fn load_by_id(&self, id: AvailabilityId) -> Option<ResourceAvailability> {
        self.rows.get(&id).map(|r| r.value().clone())
    }

    fn load_all_within_slot(&self, resource_id: ResourceId, slot: &TimeSlot) -> Vec<ResourceAvailability> {
        self.within(resource_id, slot)
    }

    fn load_all_by_parent_id_within_slot(
        &self,
        parent_id: ResourceId,
        slot: &TimeSlot,
    ) -> Vec<ResourceAvailability> {
        let kids: Vec<ResourceId> = match self.children.get(&parent_id) {
            Some(kids) => kids.iter().copied().collect(),
            None => return Vec::new(),
        };
        let mut rows: Vec<ResourceAvailability> = kids
            .into_iter()
            .flat_map(|rid| self.within(rid, slot))
            .filter(|ra| ra.parent_id == parent_id)
            .collect();
        rows.sort_by_key(|ra| (segment_key(&ra.segment), ra.resource_id));
        rows
    }

    fn load_all_for_resources_within_slot(
        &self,
        resource_ids: &HashSet<ResourceId>,
        slot: &TimeSlot,
    ) -> Vec<ResourceAvailability> {
        resource_ids
            .iter()
            .flat_map(|rid| self.within(*rid, slot))
            .collect()
    }

    fn save_checking_version(&self, rows: &[ResourceAvailability]) -> Result<bool, EngineError> {
        let _shared = self.gate.read();
        let mut all_matched = true;
        for ra in rows {
            all_matched &= self.compare_and_set(ra)?;
        }
        Ok(all_matched)
    }

    fn load_availabilities_of_random_resources_within(
        &self,
        slot: &TimeSlot,
        candidates: &HashSet<ResourceId>,
    ) -> ResourceGroupedAvailability {
        let available: Vec<Vec<ResourceAvailability>> = candidates
            .iter()
            .map(|rid| self.within(*rid, slot))
            .filter(|rows| fully_available(rows, slot))
            .collect();
        available
            .choose(&mut rand::thread_rng())
            .map(|rows| ResourceGroupedAvailability::new(rows.clone()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HOUR_MS;

    const H: i64 = HOUR_MS;

    fn declare(store: &RowStore, resource_id: ResourceId, slot: TimeSlot) -> ResourceGroupedAvailability {
        let group = ResourceGroupedAvailability::of(resource_id, slot, None);
        store.save_new(&group).unwrap();
        group
    }

    fn test_journal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("slotwise_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn save_and_load_within_slot() {
        let store = RowStore::in_memory();
        let rid = ResourceId::new_one();
        declare(&store, rid, TimeSlot::new(0, 2 * H));

        assert_eq!(store.load_all_within_slot(rid, &TimeSlot::new(0, 2 * H)).len(), 8);
        let first_hour = store.load_all_within_slot(rid, &TimeSlot::new(0, H));
        assert_eq!(first_hour.len(), 4);
        assert!(first_hour.windows(2).all(|w| w[0].segment.to == w[1].segment.from));
        assert!(store.load_all_within_slot(rid, &TimeSlot::new(3 * H, 4 * H)).is_empty());
        assert!(store
            .load_all_within_slot(ResourceId::new_one(), &TimeSlot::new(0, H))
            .is_empty());
    }

    #[test]
    fn duplicate_declaration_fails_and_inserts_nothing() {
        let store = RowStore::in_memory();
        let rid = ResourceId::new_one();
        declare(&store, rid, TimeSlot::new(H, 2 * H));

        let overlapping = ResourceGroupedAvailability::of(rid, TimeSlot::new(0, 3 * H), None);
        let err = store.save_new(&overlapping).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateSegment { resource_id, .. } if resource_id == rid));
        assert_eq!(store.row_count(), 4);
    }

    #[test]
    fn partially_overlapping_segments_are_rejected() {
        let store = RowStore::in_memory();
        let rid = ResourceId::new_one();
        let hour = crate::segment::SegmentUnit::new(60).unwrap();
        store
            .save_new(&ResourceGroupedAvailability::of_with_unit(rid, TimeSlot::new(0, 2 * H), None, hour))
            .unwrap();

        // Hand-built rows shifted half an hour off the stored grid.
        let shifted = ResourceGroupedAvailability::new(vec![
            ResourceAvailability::new(rid, TimeSlot::new(H + H / 2, 2 * H + H / 2), None),
            ResourceAvailability::new(rid, TimeSlot::new(3 * H, 4 * H), None),
        ]);
        let err = store.save_new(&shifted).unwrap_err();
        assert!(matches!(
            err,
            EngineError::DuplicateSegment { segment, .. } if segment == TimeSlot::new(H + H / 2, 2 * H + H / 2)
        ));
        assert_eq!(store.row_count(), 2);

        // Touching is fine.
        declare(&store, rid, TimeSlot::new(2 * H, 3 * H));
        assert_eq!(store.row_count(), 6);
    }

    #[test]
    fn overlap_within_one_group_is_rejected() {
        let store = RowStore::in_memory();
        let rid = ResourceId::new_one();
        let group = ResourceGroupedAvailability::new(vec![
            ResourceAvailability::new(rid, TimeSlot::new(0, H), None),
            ResourceAvailability::new(rid, TimeSlot::new(H / 2, H + H / 2), None),
        ]);
        assert!(matches!(store.save_new(&group), Err(EngineError::DuplicateSegment { .. })));
        assert_eq!(store.row_count(), 0);
    }

    #[test]
    fn same_segment_on_other_resource_is_fine() {
        let store = RowStore::in_memory();
        declare(&store, ResourceId::new_one(), TimeSlot::new(0, H));
        declare(&store, ResourceId::new_one(), TimeSlot::new(0, H));
        assert_eq!(store.row_count(), 8);
        assert_eq!(store.resource_count(), 2);
    }

    #[test]
    fn mixed_group_is_rejected() {
        let store = RowStore::in_memory();
        let mut rows = ResourceGroupedAvailability::of(ResourceId::new_one(), TimeSlot::new(0, H), None)
            .into_availabilities();
        rows.push(ResourceAvailability::new(ResourceId::new_one(), TimeSlot::new(H, 2 * H), None));
        let result = store.save_new(&ResourceGroupedAvailability::new(rows));
        assert!(matches!(result, Err(EngineError::MixedGroup(..))));
        assert_eq!(store.row_count(), 0);
    }

    #[test]
    fn load_by_parent_spans_resources() {
        let store = RowStore::in_memory();
        let parent = ResourceId::new_one();
        let a = ResourceId::new_one();
        let b = ResourceId::new_one();
        store
            .save_new(&ResourceGroupedAvailability::of(a, TimeSlot::new(0, H), Some(parent)))
            .unwrap();
        store
            .save_new(&ResourceGroupedAvailability::of(b, TimeSlot::new(0, H), Some(parent)))
            .unwrap();
        declare(&store, ResourceId::new_one(), TimeSlot::new(0, H));

        let rows = store.load_all_by_parent_id_within_slot(parent, &TimeSlot::new(0, H));
        assert_eq!(rows.len(), 8);
        assert!(rows.iter().all(|ra| ra.parent_id == parent));
    }

    #[test]
    fn version_check_bumps_and_rejects_stale() {
        let store = RowStore::in_memory();
        let rid = ResourceId::new_one();
        declare(&store, rid, TimeSlot::new(0, H));

        let mut rows = store.load_all_within_slot(rid, &TimeSlot::new(0, H));
        let stale = rows.clone();
        let owner = Owner::new_one();
        rows.iter_mut().for_each(|ra| {
            ra.block(owner);
        });
        assert!(store.save_checking_version(&rows).unwrap());

        let stored = store.load_by_id(rows[0].id).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.blocked_by(), owner);

        assert!(!store.save_checking_version(&stale).unwrap());
        assert_eq!(store.load_by_id(rows[0].id).unwrap().blocked_by(), owner);
    }

    #[test]
    fn lost_race_on_one_row_keeps_the_others_written() {
        let store = RowStore::in_memory();
        let rid = ResourceId::new_one();
        declare(&store, rid, TimeSlot::new(0, H));
        let mut mine = store.load_all_within_slot(rid, &TimeSlot::new(0, H));

        // A competitor commits the second row first.
        let mut theirs = vec![mine[1].clone()];
        theirs[0].block(Owner::new_one());
        assert!(store.save_checking_version(&theirs).unwrap());

        let me = Owner::new_one();
        mine.iter_mut().for_each(|ra| {
            ra.block(me);
        });
        assert!(!store.save_checking_version(&mine).unwrap());

        let after = store.load_all_within_slot(rid, &TimeSlot::new(0, H));
        assert_eq!(after.iter().filter(|ra| ra.blocked_by() == me).count(), 3);
        assert_eq!(after[1].blocked_by(), theirs[0].blocked_by());
    }

    #[test]
    fn random_pick_only_from_fully_available() {
        let store = RowStore::in_memory();
        let free = ResourceId::new_one();
        let taken = ResourceId::new_one();
        let short = ResourceId::new_one();
        let day = TimeSlot::new(0, 24 * H);
        declare(&store, free, day);
        declare(&store, taken, day);
        declare(&store, short, TimeSlot::new(0, 12 * H));

        let mut rows = store.load_all_within_slot(taken, &TimeSlot::new(5 * H, 6 * H));
        rows.iter_mut().for_each(|ra| {
            ra.block(Owner::new_one());
        });
        store.save_checking_version(&rows).unwrap();

        let candidates = HashSet::from([free, taken, short]);
        for _ in 0..20 {
            let group = store.load_availabilities_of_random_resources_within(&day, &candidates);
            assert_eq!(group.resource_id(), Some(free));
            assert_eq!(group.len(), 96);
        }

        let none = store.load_availabilities_of_random_resources_within(&day, &HashSet::from([taken]));
        assert!(none.has_no_slots());
    }

    #[test]
    fn random_pick_reaches_every_candidate() {
        let store = RowStore::in_memory();
        let slot = TimeSlot::new(0, H);
        let candidates: HashSet<ResourceId> = (0..3).map(|_| ResourceId::new_one()).collect();
        for rid in &candidates {
            declare(&store, *rid, slot);
        }
        let mut seen = HashSet::new();
        for _ in 0..300 {
            let group = store.load_availabilities_of_random_resources_within(&slot, &candidates);
            seen.insert(group.resource_id().unwrap());
        }
        assert_eq!(seen, candidates);
    }

    #[test]
    fn journal_replay_restores_rows_and_versions() {
        let path = test_journal_path("replay.wal");
        let rid = ResourceId::new_one();
        let owner = Owner::new_one();
        {
            let store = RowStore::open(&path).unwrap();
            declare(&store, rid, TimeSlot::new(0, H));
            let mut rows = store.load_all_within_slot(rid, &TimeSlot::new(0, H));
            rows.iter_mut().for_each(|ra| {
                ra.block(owner);
            });
            assert!(store.save_checking_version(&rows).unwrap());
            // One creation record, then one record per written row.
            assert_eq!(store.appends_since_compact(), 5);
        }

        let reopened = RowStore::open(&path).unwrap();
        assert_eq!(reopened.appends_since_compact(), 5);
        let rows = reopened.load_all_within_slot(rid, &TimeSlot::new(0, H));
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|ra| ra.version == 1 && ra.blocked_by() == owner));

        // Uniqueness still holds after replay.
        let again = ResourceGroupedAvailability::of(rid, TimeSlot::new(0, H), None);
        assert!(reopened.save_new(&again).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn compaction_preserves_state() {
        let path = test_journal_path("compact.wal");
        let rid = ResourceId::new_one();
        let slot = TimeSlot::new(0, H);
        {
            let store = RowStore::open(&path).unwrap();
            declare(&store, rid, slot);
            for _ in 0..10 {
                let owner = Owner::new_one();
                let mut rows = store.load_all_within_slot(rid, &slot);
                rows.iter_mut().for_each(|ra| {
                    ra.block(owner);
                });
                store.save_checking_version(&rows).unwrap();
                rows = store.load_all_within_slot(rid, &slot);
                rows.iter_mut().for_each(|ra| {
                    ra.release(owner);
                });
                store.save_checking_version(&rows).unwrap();
            }
            assert_eq!(store.appends_since_compact(), 81);
            store.compact().unwrap();
            assert_eq!(store.appends_since_compact(), 0);
        }

        let reopened = RowStore::open(&path).unwrap();
        assert_eq!(reopened.appends_since_compact(), 1);
        let rows = reopened.load_all_within_slot(rid, &slot);
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|ra| ra.version == 20 && ra.blocked_by().by_none()));
        let _ = std::fs::remove_file(&path);
    }
}
