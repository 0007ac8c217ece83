//! Per-kind payloads stored in the entity registries.

use std::fmt;

pub use worldmap_schema::FeedKind as EntityKind;
use worldmap_schema::{Biome, StructureKind};

use crate::hex::HexCoord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Tiles have no feed id; they are keyed by the hex they describe.
    pub fn for_hex(hex: HexCoord) -> Self {
        let col = u64::from(hex.col as u32);
        let row = u64::from(hex.row as u32);
        Self((col << 32) | row)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileInfo {
    pub biome: Biome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmyInfo {
    pub owner: OwnerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureInfo {
    pub owner: OwnerId,
    pub kind: StructureKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuestInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChestInfo;

/// What the clustering pass needs to know about an entity.
pub trait ClusterSubject {
    const KIND: EntityKind;

    fn owner(&self) -> Option<OwnerId> {
        None
    }

    fn category(&self) -> Option<StructureKind> {
        None
    }
}

impl ClusterSubject for ArmyInfo {
    const KIND: EntityKind = EntityKind::Army;

    fn owner(&self) -> Option<OwnerId> {
        Some(self.owner)
    }
}

impl ClusterSubject for StructureInfo {
    const KIND: EntityKind = EntityKind::Structure;

    fn owner(&self) -> Option<OwnerId> {
        Some(self.owner)
    }

    fn category(&self) -> Option<StructureKind> {
        Some(self.kind)
    }
}

impl ClusterSubject for QuestInfo {
    const KIND: EntityKind = EntityKind::Quest;
}

impl ClusterSubject for ChestInfo {
    const KIND: EntityKind = EntityKind::Chest;
}
