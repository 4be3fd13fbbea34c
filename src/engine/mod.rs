mod error;
mod mutations;
mod queries;

pub use error::EngineError;

use std::sync::Arc;

use crate::calendar::CalendarReadModel;
use crate::model::*;
use crate::notify::EventBus;
use crate::segment::{self, SegmentUnit};
use crate::store::{ReservationStore, RowStore};

/// Source of `occurred_at` for published events.
pub type Clock = fn() -> Ms;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Availability facade: declare segments, take and give them back, read
/// calendars.
///
/// Synchronous and lock-free at this level. Every mutation is a
/// load, in-memory transition, versioned save; concurrent callers race on the
/// store's per-row version check and losers get `false`.
pub struct Engine {
    store: Arc<dyn ReservationStore>,
    read_model: CalendarReadModel,
    events: Arc<EventBus>,
    segment: SegmentUnit,
    clock: Clock,
}

impl Engine {
    pub fn new(store: Arc<dyn ReservationStore>, events: Arc<EventBus>) -> Self {
        Self::with_segment(store, events, SegmentUnit::default_segment())
    }

    pub fn with_segment(store: Arc<dyn ReservationStore>, events: Arc<EventBus>, segment: SegmentUnit) -> Self {
        Self {
            read_model: CalendarReadModel::new(Arc::clone(&store)),
            store,
            events,
            segment,
            clock: now_ms,
        }
    }

    /// Memory-only engine with no event handlers.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(RowStore::in_memory()), Arc::new(EventBus::default()))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn segment_unit(&self) -> SegmentUnit {
        self.segment
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    fn normalize(&self, slot: &TimeSlot) -> TimeSlot {
        segment::normalize_to_segment_boundaries(slot, self.segment)
    }
}
