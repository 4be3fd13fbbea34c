mod grouped;

pub use grouped::ResourceGroupedAvailability;

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::TimeSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub Ulid);

impl ResourceId {
    pub fn new_one() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of one stored segment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AvailabilityId(pub Ulid);

impl AvailabilityId {
    pub fn new_one() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for AvailabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Holder of a segment. `Owner::none()` marks a free segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Owner(Option<Ulid>);

impl Owner {
    pub const fn none() -> Self {
        Self(None)
    }

    pub fn of(id: Ulid) -> Self {
        Self(Some(id))
    }

    pub fn new_one() -> Self {
        Self(Some(Ulid::new()))
    }

    pub fn id(&self) -> Option<Ulid> {
        self.0
    }

    pub fn by_none(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => id.fmt(f),
            None => f.write_str("nobody"),
        }
    }
}

/// Who holds a segment and whether it is administratively disabled.
/// A disabled blockade always names the disabler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blockade {
    pub taken_by: Owner,
    pub disabled: bool,
}

impl Blockade {
    pub const fn none() -> Self {
        Self {
            taken_by: Owner::none(),
            disabled: false,
        }
    }

    pub fn owned_by(owner: Owner) -> Self {
        Self {
            taken_by: owner,
            disabled: false,
        }
    }

    /// `None` for `Owner::none()`: a disabled segment must name its disabler.
    pub fn disabled_by(owner: Owner) -> Option<Self> {
        (!owner.by_none()).then_some(Self {
            taken_by: owner,
            disabled: true,
        })
    }

    pub fn can_be_taken_by(&self, requester: Owner) -> bool {
        self.taken_by.by_none() || self.taken_by == requester
    }

    pub fn is_disabled_by(&self, owner: Owner) -> bool {
        self.disabled && self.taken_by == owner
    }
}

impl Default for Blockade {
    fn default() -> Self {
        Self::none()
    }
}

/// One canonical segment of one resource.
///
/// Transitions only touch the in-memory copy; the store persists them with
/// a version check. Every transition leaves the row untouched when it
/// returns `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAvailability {
    pub id: AvailabilityId,
    pub resource_id: ResourceId,
    pub parent_id: ResourceId,
    pub segment: TimeSlot,
    pub blockade: Blockade,
    pub version: u64,
}

impl ResourceAvailability {
    /// A fresh, free row at version 0. Without a parent a synthetic one is
    /// generated so that every row has a parent to group by.
    pub fn new(resource_id: ResourceId, segment: TimeSlot, parent_id: Option<ResourceId>) -> Self {
        Self {
            id: AvailabilityId::new_one(),
            resource_id,
            parent_id: parent_id.unwrap_or_else(ResourceId::new_one),
            segment,
            blockade: Blockade::none(),
            version: 0,
        }
    }

    pub fn block(&mut self, requester: Owner) -> bool {
        if !self.is_available_for(requester) {
            return false;
        }
        self.blockade = Blockade::owned_by(requester);
        true
    }

    pub fn release(&mut self, requester: Owner) -> bool {
        if !self.is_available_for(requester) {
            return false;
        }
        self.blockade = Blockade::none();
        true
    }

    /// Displaces whoever held the segment. Refused only for `Owner::none()`.
    pub fn disable(&mut self, requester: Owner) -> bool {
        let Some(blockade) = Blockade::disabled_by(requester) else {
            return false;
        };
        self.blockade = blockade;
        true
    }

    pub fn enable(&mut self, requester: Owner) -> bool {
        if !self.blockade.can_be_taken_by(requester) {
            return false;
        }
        self.blockade = Blockade::none();
        true
    }

    pub fn is_disabled(&self) -> bool {
        self.blockade.disabled
    }

    pub fn is_disabled_by(&self, owner: Owner) -> bool {
        self.blockade.is_disabled_by(owner)
    }

    pub fn blocked_by(&self) -> Owner {
        self.blockade.taken_by
    }

    fn is_available_for(&self, requester: Owner) -> bool {
        self.blockade.can_be_taken_by(requester) && !self.is_disabled()
    }
}
