use crate::{
    hex::HexCoord,
    records::{ArmyInfo, ChestInfo, EntityId, EntityKind, QuestInfo, StructureInfo, TileInfo},
    registry::EntityRegistry,
};

/// One registry per entity kind.
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    pub tiles: EntityRegistry<TileInfo>,
    pub armies: EntityRegistry<ArmyInfo>,
    pub structures: EntityRegistry<StructureInfo>,
    pub quests: EntityRegistry<QuestInfo>,
    pub chests: EntityRegistry<ChestInfo>,
}

impl WorldState {
    pub fn explored(&self, hex: HexCoord) -> Option<&TileInfo> {
        self.tiles.get(EntityId::for_hex(hex)).map(|record| &record.data)
    }

    pub fn is_explored(&self, hex: HexCoord) -> bool {
        self.explored(hex).is_some()
    }

    /// Hexes drawn without a terrain mesh because something sits on top of them.
    pub fn hides_terrain(&self, hex: HexCoord) -> bool {
        self.structures.occupied(hex) || self.quests.occupied(hex)
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Tile => self.tiles.len(),
            EntityKind::Army => self.armies.len(),
            EntityKind::Structure => self.structures.len(),
            EntityKind::Quest => self.quests.len(),
            EntityKind::Chest => self.chests.len(),
        }
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
        self.armies.clear();
        self.structures.clear();
        self.quests.clear();
        self.chests.clear();
    }

    pub fn is_consistent(&self) -> bool {
        self.tiles.is_consistent()
            && self.armies.is_consistent()
            && self.structures.is_consistent()
            && self.quests.is_consistent()
            && self.chests.is_consistent()
    }
}
