//! Application of live feed events to the world registries.
//!
//! Events are applied strictly in arrival order; a later position for an id
//! always replaces the earlier one. Each applied event reports which hexes
//! changed terrain visibility so the caller can invalidate cached chunks.

use thiserror::Error;
use worldmap_schema::{parse_feed_lines, Biome, FeedEvent, FeedPayload};

use crate::{
    hex::{CoordinateRangeError, HexCoord},
    records::{
        ArmyInfo, ChestInfo, EntityId, EntityKind, OwnerId, QuestInfo, StructureInfo, TileInfo,
    },
    registry::UpsertOutcome,
    world::WorldState,
};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("{kind} event {id} has out-of-range coordinates: {source}")]
    CoordinateOutOfRange {
        kind: EntityKind,
        id: u64,
        #[source]
        source: CoordinateRangeError,
    },
    #[error("malformed feed line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl FeedError {
    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            FeedError::CoordinateOutOfRange { kind, .. } => Some(*kind),
            FeedError::Malformed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedChange {
    Upserted(UpsertOutcome),
    Removed,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEffect {
    pub kind: EntityKind,
    pub hex: HexCoord,
    pub change: FeedChange,
    /// Hexes whose terrain rendering changed (exploration, occupancy).
    pub terrain_dirty: Vec<HexCoord>,
    /// The number of records of `kind` went up or down.
    pub count_changed: bool,
    /// The active window has to be rebuilt even if the chunk key stays the same.
    pub force_refresh: bool,
}

impl FeedEffect {
    fn new(kind: EntityKind, hex: HexCoord, change: FeedChange) -> Self {
        Self {
            kind,
            hex,
            change,
            terrain_dirty: Vec::new(),
            count_changed: matches!(
                change,
                FeedChange::Removed | FeedChange::Upserted(UpsertOutcome::Inserted)
            ),
            force_refresh: false,
        }
    }

    pub fn changed(&self) -> bool {
        match self.change {
            FeedChange::Upserted(outcome) => outcome.changed(),
            FeedChange::Removed => true,
            FeedChange::Ignored => !self.terrain_dirty.is_empty(),
        }
    }
}

/// Applies one event. Coordinate errors reject only this event.
pub fn apply_event(world: &mut WorldState, event: &FeedEvent) -> Result<FeedEffect, FeedError> {
    let kind = event.kind();
    let hex = HexCoord::from_contract(event.hex).map_err(|source| FeedError::CoordinateOutOfRange {
        kind,
        id: event.id,
        source,
    })?;
    let id = EntityId(event.id);

    let effect = match &event.payload {
        FeedPayload::Tile { biome } => apply_tile(world, hex, *biome, event.deleted),
        FeedPayload::Army { owner } => {
            if event.deleted {
                removal(kind, hex, world.armies.remove(id).map(|r| r.hex), false)
            } else {
                let outcome = world.armies.upsert(id, hex, ArmyInfo { owner: OwnerId(*owner) });
                let mut effect = FeedEffect::new(kind, hex, FeedChange::Upserted(outcome));
                if !world.is_explored(hex) {
                    world.tiles.upsert(
                        EntityId::for_hex(hex),
                        hex,
                        TileInfo {
                            biome: Biome::Grassland,
                        },
                    );
                    effect.terrain_dirty.push(hex);
                }
                effect
            }
        }
        FeedPayload::Structure { owner, structure } => {
            if event.deleted {
                removal(kind, hex, world.structures.remove(id).map(|r| r.hex), true)
            } else {
                let info = StructureInfo {
                    owner: OwnerId(*owner),
                    kind: *structure,
                };
                occupancy(kind, hex, world.structures.upsert(id, hex, info))
            }
        }
        FeedPayload::Quest => {
            if event.deleted {
                removal(kind, hex, world.quests.remove(id).map(|r| r.hex), true)
            } else {
                occupancy(kind, hex, world.quests.upsert(id, hex, QuestInfo))
            }
        }
        FeedPayload::Chest => {
            if event.deleted {
                removal(kind, hex, world.chests.remove(id).map(|r| r.hex), false)
            } else {
                let outcome = world.chests.upsert(id, hex, ChestInfo);
                FeedEffect::new(kind, hex, FeedChange::Upserted(outcome))
            }
        }
    };
    Ok(effect)
}

fn apply_tile(world: &mut WorldState, hex: HexCoord, biome: Biome, deleted: bool) -> FeedEffect {
    let kind = EntityKind::Tile;
    let id = EntityId::for_hex(hex);
    if deleted {
        let mut effect = removal(kind, hex, world.tiles.remove(id).map(|r| r.hex), true);
        effect.force_refresh = effect.change == FeedChange::Removed;
        return effect;
    }
    let outcome = world.tiles.upsert(id, hex, TileInfo { biome });
    let mut effect = FeedEffect::new(kind, hex, FeedChange::Upserted(outcome));
    if outcome.changed() {
        effect.terrain_dirty.push(hex);
    }
    effect
}

fn removal(
    kind: EntityKind,
    hex: HexCoord,
    removed_from: Option<HexCoord>,
    dirties_terrain: bool,
) -> FeedEffect {
    match removed_from {
        Some(at) => {
            let mut effect = FeedEffect::new(kind, at, FeedChange::Removed);
            if dirties_terrain {
                effect.terrain_dirty.push(at);
            }
            effect
        }
        None => FeedEffect::new(kind, hex, FeedChange::Ignored),
    }
}

/// Structures and quests hide the terrain under them.
fn occupancy(kind: EntityKind, hex: HexCoord, outcome: UpsertOutcome) -> FeedEffect {
    let mut effect = FeedEffect::new(kind, hex, FeedChange::Upserted(outcome));
    match outcome {
        UpsertOutcome::Inserted => effect.terrain_dirty.push(hex),
        UpsertOutcome::Moved { from } => effect.terrain_dirty.extend([from, hex]),
        UpsertOutcome::Updated | UpsertOutcome::Unchanged => {}
    }
    effect
}

/// Parses a JSON-lines dump, turning bad lines into [`FeedError::Malformed`].
pub fn read_feed(text: &str) -> Vec<Result<FeedEvent, FeedError>> {
    parse_feed_lines(text)
        .map(|(line, parsed)| parsed.map_err(|source| FeedError::Malformed { line, source }))
        .collect()
}

/// Applied and rejected event counts per entity kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStats {
    applied: [u64; 5],
    rejected: [u64; 5],
    malformed: u64,
}

impl FeedStats {
    pub fn record_applied(&mut self, kind: EntityKind) {
        self.applied[kind.index()] += 1;
    }

    pub fn record_rejected(&mut self, error: &FeedError) {
        match error.kind() {
            Some(kind) => self.rejected[kind.index()] += 1,
            None => self.malformed += 1,
        }
    }

    pub fn applied(&self, kind: EntityKind) -> u64 {
        self.applied[kind.index()]
    }

    pub fn rejected(&self, kind: EntityKind) -> u64 {
        self.rejected[kind.index()]
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub fn total_applied(&self) -> u64 {
        self.applied.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::WORLD_CENTER;
    use worldmap_schema::{ContractHex, StructureKind};

    fn contract(col: i32, row: i32) -> ContractHex {
        let hex = HexCoord::new(col, row).to_contract().unwrap();
        assert_eq!(i64::from(hex.col), i64::from(col) + WORLD_CENTER);
        hex
    }

    fn event(id: u64, col: i32, row: i32, payload: FeedPayload) -> FeedEvent {
        FeedEvent::new(id, contract(col, row), payload)
    }

    #[test]
    fn army_spawn_reveals_grassland() {
        let mut world = WorldState::default();
        let effect = apply_event(&mut world, &event(1, 3, 4, FeedPayload::Army { owner: 9 })).unwrap();
        assert_eq!(effect.change, FeedChange::Upserted(UpsertOutcome::Inserted));
        assert_eq!(effect.terrain_dirty, vec![HexCoord::new(3, 4)]);
        assert_eq!(
            world.explored(HexCoord::new(3, 4)).map(|t| t.biome),
            Some(Biome::Grassland)
        );

        let repeat = apply_event(&mut world, &event(1, 3, 4, FeedPayload::Army { owner: 9 })).unwrap();
        assert!(!repeat.changed());
        assert!(repeat.terrain_dirty.is_empty());
    }

    #[test]
    fn army_on_explored_hex_keeps_biome() {
        let mut world = WorldState::default();
        apply_event(&mut world, &event(0, 2, 2, FeedPayload::Tile { biome: Biome::Snow })).unwrap();
        let effect = apply_event(&mut world, &event(5, 2, 2, FeedPayload::Army { owner: 1 })).unwrap();
        assert!(effect.terrain_dirty.is_empty());
        assert_eq!(world.explored(HexCoord::new(2, 2)).unwrap().biome, Biome::Snow);
    }

    #[test]
    fn tile_removal_forces_refresh() {
        let mut world = WorldState::default();
        apply_event(&mut world, &event(0, 1, 1, FeedPayload::Tile { biome: Biome::Taiga })).unwrap();
        let removed = apply_event(
            &mut world,
            &FeedEvent::deletion(0, contract(1, 1), FeedPayload::Tile { biome: Biome::Taiga }),
        )
        .unwrap();
        assert!(removed.force_refresh);
        assert!(!world.is_explored(HexCoord::new(1, 1)));

        let again = apply_event(
            &mut world,
            &FeedEvent::deletion(0, contract(1, 1), FeedPayload::Tile { biome: Biome::Taiga }),
        )
        .unwrap();
        assert_eq!(again.change, FeedChange::Ignored);
        assert!(!again.force_refresh);
    }

    #[test]
    fn structure_move_dirties_both_hexes() {
        let mut world = WorldState::default();
        let payload = FeedPayload::Structure {
            owner: 2,
            structure: StructureKind::Village,
        };
        let placed = apply_event(&mut world, &event(7, 0, 0, payload.clone())).unwrap();
        assert!(placed.count_changed);
        let moved = apply_event(&mut world, &event(7, 5, 0, payload)).unwrap();
        assert!(!moved.count_changed);
        assert_eq!(
            moved.terrain_dirty,
            vec![HexCoord::new(0, 0), HexCoord::new(5, 0)]
        );
        assert!(world.hides_terrain(HexCoord::new(5, 0)));
        assert!(!world.hides_terrain(HexCoord::new(0, 0)));
    }

    #[test]
    fn deleting_unknown_ids_is_ignored() {
        let mut world = WorldState::default();
        let effect = apply_event(
            &mut world,
            &FeedEvent::deletion(44, contract(0, 0), FeedPayload::Chest),
        )
        .unwrap();
        assert_eq!(effect.change, FeedChange::Ignored);
        assert!(!effect.changed());
    }

    #[test]
    fn out_of_range_coordinates_reject_one_event() {
        let mut world = WorldState::default();
        let bad = FeedEvent::new(3, ContractHex::new(u32::MAX, 0), FeedPayload::Quest);
        let err = apply_event(&mut world, &bad).unwrap_err();
        assert_eq!(err.kind(), Some(EntityKind::Quest));
        let mut stats = FeedStats::default();
        stats.record_rejected(&err);
        assert_eq!(stats.rejected(EntityKind::Quest), 1);

        let effect = apply_event(&mut world, &event(4, 1, 1, FeedPayload::Quest)).unwrap();
        stats.record_applied(effect.kind);
        assert_eq!(world.quests.len(), 1);
        assert_eq!(world.count(EntityKind::Quest), 1);
        assert_eq!(stats.total_applied(), 1);
    }

    #[test]
    fn read_feed_reports_bad_lines() {
        let text = "{\"id\":1,\"hex\":{\"col\":2147483646,\"row\":2147483646},\"kind\":\"chest\"}\n{oops}\n";
        let parsed = read_feed(text);
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].is_ok());
        assert!(matches!(parsed[1], Err(FeedError::Malformed { line: 2, .. })));
    }
}
