use std::collections::HashMap;

use worldmap_schema::Biome;

use crate::{cache::RenderCategory, records::EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    Loading,
    Ready,
    Failed,
}

/// Anything that needs a loaded model before it can be drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetSlot {
    Tiles(RenderCategory),
    Entities(EntityKind),
}

/// Load state of every model the renderer depends on. Unknown slots count as loading.
#[derive(Debug, Clone, Default)]
pub struct AssetTracker {
    states: HashMap<AssetSlot, AssetState>,
}

impl AssetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all_ready() -> Self {
        let mut tracker = Self::new();
        for slot in Self::known_slots() {
            tracker.set(slot, AssetState::Ready);
        }
        tracker
    }

    pub fn known_slots() -> impl Iterator<Item = AssetSlot> {
        Biome::ALL
            .into_iter()
            .map(|biome| AssetSlot::Tiles(RenderCategory::Biome(biome)))
            .chain(std::iter::once(AssetSlot::Tiles(RenderCategory::Outline)))
            .chain(
                [
                    EntityKind::Army,
                    EntityKind::Structure,
                    EntityKind::Quest,
                    EntityKind::Chest,
                ]
                .into_iter()
                .map(AssetSlot::Entities),
            )
    }

    pub fn set(&mut self, slot: AssetSlot, state: AssetState) {
        self.states.insert(slot, state);
    }

    pub fn state(&self, slot: AssetSlot) -> AssetState {
        self.states.get(&slot).copied().unwrap_or(AssetState::Loading)
    }

    pub fn is_ready(&self, slot: AssetSlot) -> bool {
        self.state(slot) == AssetState::Ready
    }
}
