//! Id-keyed and position-keyed entity storage.
//!
//! Each registry keeps two views of the same records: an authoritative map from
//! id to record, and a `col -> row -> ids` spatial index. Every mutation goes
//! through [`EntityRegistry::upsert`] or [`EntityRegistry::remove`], which keep
//! both views in step.

use std::collections::BTreeMap;

use crate::{hex::HexCoord, records::EntityId};

#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord<T> {
    pub id: EntityId,
    pub hex: HexCoord,
    pub data: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Moved { from: HexCoord },
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

#[derive(Debug, Clone)]
pub struct EntityRegistry<T> {
    by_id: BTreeMap<EntityId, EntityRecord<T>>,
    by_position: BTreeMap<i32, BTreeMap<i32, Vec<EntityId>>>,
}

impl<T> Default for EntityRegistry<T> {
    fn default() -> Self {
        Self {
            by_id: BTreeMap::new(),
            by_position: BTreeMap::new(),
        }
    }
}

impl<T: PartialEq> EntityRegistry<T> {
    /// Inserts or replaces the record for `id`. Re-applying the same update is a no-op.
    pub fn upsert(&mut self, id: EntityId, hex: HexCoord, data: T) -> UpsertOutcome {
        let Some(existing) = self.by_id.get_mut(&id) else {
            self.index(id, hex);
            self.by_id.insert(id, EntityRecord { id, hex, data });
            return UpsertOutcome::Inserted;
        };

        if existing.hex == hex {
            if existing.data == data {
                return UpsertOutcome::Unchanged;
            }
            existing.data = data;
            return UpsertOutcome::Updated;
        }

        let from = existing.hex;
        existing.hex = hex;
        existing.data = data;
        self.unindex(id, from);
        self.index(id, hex);
        UpsertOutcome::Moved { from }
    }
}

impl<T> EntityRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes `id` from both views. Absent ids are ignored.
    pub fn remove(&mut self, id: EntityId) -> Option<EntityRecord<T>> {
        let record = self.by_id.remove(&id)?;
        self.unindex(id, record.hex);
        Some(record)
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityRecord<T>> {
        self.by_id.get(&id)
    }

    /// Records located on `hex`, in arrival order.
    pub fn at(&self, hex: HexCoord) -> impl Iterator<Item = &EntityRecord<T>> + '_ {
        self.by_position
            .get(&hex.col)
            .and_then(|rows| rows.get(&hex.row))
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
    }

    pub fn occupied(&self, hex: HexCoord) -> bool {
        self.at(hex).next().is_some()
    }

    /// Records inside the axis-aligned rectangle around `center`, in spatial index order.
    pub fn query_visible(
        &self,
        center: HexCoord,
        half_width: i32,
        half_height: i32,
    ) -> Vec<&EntityRecord<T>> {
        let cols = center.col.saturating_sub(half_width)..=center.col.saturating_add(half_width);
        let rows = center.row.saturating_sub(half_height)..=center.row.saturating_add(half_height);
        let mut out = Vec::new();
        for (_, by_row) in self.by_position.range(cols) {
            for (_, ids) in by_row.range(rows.clone()) {
                out.extend(ids.iter().filter_map(|id| self.by_id.get(id)));
            }
        }
        out
    }

    /// Records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord<T>> + '_ {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_position.clear();
    }

    /// True when both views hold exactly the same ids at the same positions.
    pub fn is_consistent(&self) -> bool {
        let mut indexed = 0usize;
        for (col, by_row) in &self.by_position {
            for (row, ids) in by_row {
                if ids.is_empty() {
                    return false;
                }
                for id in ids {
                    match self.by_id.get(id) {
                        Some(record) if record.hex == HexCoord::new(*col, *row) => indexed += 1,
                        _ => return false,
                    }
                }
            }
        }
        indexed == self.by_id.len()
    }

    fn index(&mut self, id: EntityId, hex: HexCoord) {
        self.by_position
            .entry(hex.col)
            .or_default()
            .entry(hex.row)
            .or_default()
            .push(id);
    }

    fn unindex(&mut self, id: EntityId, hex: HexCoord) {
        let Some(by_row) = self.by_position.get_mut(&hex.col) else {
            return;
        };
        if let Some(ids) = by_row.get_mut(&hex.row) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                by_row.remove(&hex.row);
            }
        }
        if by_row.is_empty() {
            self.by_position.remove(&hex.col);
        }
    }
}
