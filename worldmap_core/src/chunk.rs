//! Chunk partitioning of the hex plane.
//!
//! A chunk key is the `(row, col)` hex origin of a `chunk_size` square cell in
//! world space. The visible window is centered on that origin and spans the
//! configured [`RenderChunkSize`].

use std::{collections::BTreeSet, fmt, num::ParseIntError, str::FromStr};

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hex::{HexCoord, HexLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChunkKey {
    pub start_row: i32,
    pub start_col: i32,
}

impl ChunkKey {
    pub const fn new(start_row: i32, start_col: i32) -> Self {
        Self {
            start_row,
            start_col,
        }
    }

    pub fn origin(self) -> HexCoord {
        HexCoord::new(self.start_col, self.start_row)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.start_row, self.start_col)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkKeyParseError {
    #[error("chunk key {0:?} is not of the form \"row,col\"")]
    Shape(String),
    #[error("chunk key component {part:?} is not an integer: {source}")]
    Component {
        part: String,
        #[source]
        source: ParseIntError,
    },
}

impl FromStr for ChunkKey {
    type Err = ChunkKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',');
        let (Some(row), Some(col), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ChunkKeyParseError::Shape(s.to_string()));
        };
        let parse = |part: &str| {
            part.trim()
                .parse::<i32>()
                .map_err(|source| ChunkKeyParseError::Component {
                    part: part.to_string(),
                    source,
                })
        };
        Ok(ChunkKey::new(parse(row)?, parse(col)?))
    }
}

/// Size of the visible window in hexes. The window reaches `width / 2` columns and
/// `height / 2` rows out from the chunk origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderChunkSize {
    pub width: u32,
    pub height: u32,
}

impl Default for RenderChunkSize {
    fn default() -> Self {
        Self {
            width: 60,
            height: 44,
        }
    }
}

impl RenderChunkSize {
    /// `(half_width, half_height)` in hexes.
    pub fn half_extents(&self) -> (i32, i32) {
        let half = |v: u32| i32::try_from(v / 2).unwrap_or(i32::MAX);
        (half(self.width), half(self.height))
    }
}

/// Maps positions to chunk keys and enumerates windows around them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkGrid {
    chunk_size: i32,
    render: RenderChunkSize,
    layout: HexLayout,
    lead_x: f32,
    lead_z: f32,
}

impl ChunkGrid {
    pub fn new(chunk_size: u32, render: RenderChunkSize, layout: HexLayout) -> Self {
        Self {
            chunk_size: i32::try_from(chunk_size.max(1)).unwrap_or(i32::MAX),
            render,
            layout,
            lead_x: 0.5,
            lead_z: 0.5,
        }
    }

    /// Fraction of a chunk the camera target is pushed forward before resolving.
    pub fn with_camera_lead(mut self, lead_x: f32, lead_z: f32) -> Self {
        self.lead_x = lead_x;
        self.lead_z = lead_z;
        self
    }

    pub fn chunk_size(&self) -> i32 {
        self.chunk_size
    }

    pub fn render_size(&self) -> RenderChunkSize {
        self.render
    }

    pub fn layout(&self) -> HexLayout {
        self.layout
    }

    fn pitch(&self) -> (f64, f64) {
        let size = f64::from(self.chunk_size);
        (
            size * self.layout.horizontal_pitch(),
            size * self.layout.vertical_pitch(),
        )
    }

    pub fn key_for_world(&self, x: f32, z: f32) -> ChunkKey {
        let (pitch_x, pitch_z) = self.pitch();
        let chunk_x = (f64::from(x) / pitch_x).floor();
        let chunk_z = (f64::from(z) / pitch_z).floor();
        let size = f64::from(self.chunk_size);
        let clamp = |v: f64| v.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32;
        ChunkKey::new(clamp(chunk_z * size), clamp(chunk_x * size))
    }

    /// Active chunk for a camera looking at `target`.
    pub fn key_for_camera(&self, target: Vec3) -> ChunkKey {
        let (pitch_x, pitch_z) = self.pitch();
        let x = f64::from(target.x) + f64::from(self.lead_x) * pitch_x;
        let z = f64::from(target.z) + f64::from(self.lead_z) * pitch_z;
        self.key_for_world(x as f32, z as f32)
    }

    /// Chunk whose cell contains the center of `hex`.
    pub fn key_for_hex(&self, hex: HexCoord) -> ChunkKey {
        let world = self.layout.to_world(hex, true);
        self.key_for_world(world.x, world.z)
    }

    pub fn step(&self, key: ChunkKey, drow: i32, dcol: i32) -> ChunkKey {
        ChunkKey::new(
            key.start_row.saturating_add(drow.saturating_mul(self.chunk_size)),
            key.start_col.saturating_add(dcol.saturating_mul(self.chunk_size)),
        )
    }

    /// The key itself and its eight surrounding chunks.
    pub fn neighborhood(&self, key: ChunkKey) -> Vec<ChunkKey> {
        let mut keys = Vec::with_capacity(9);
        for drow in -1..=1 {
            for dcol in -1..=1 {
                keys.push(self.step(key, drow, dcol));
            }
        }
        keys
    }

    /// Chunks offset from `key` by every `(row, col)` step in the given ranges.
    pub fn surrounding_keys(
        &self,
        key: ChunkKey,
        rows: std::ops::RangeInclusive<i32>,
        cols: std::ops::RangeInclusive<i32>,
    ) -> Vec<ChunkKey> {
        let mut keys = Vec::new();
        for drow in rows {
            for dcol in cols.clone() {
                keys.push(self.step(key, drow, dcol));
            }
        }
        keys
    }

    pub fn window_contains(&self, key: ChunkKey, hex: HexCoord) -> bool {
        let (half_w, half_h) = self.render.half_extents();
        (i64::from(hex.col) - i64::from(key.start_col)).abs() <= i64::from(half_w)
            && (i64::from(hex.row) - i64::from(key.start_row)).abs() <= i64::from(half_h)
    }

    /// Every hex of the window around `key`, row-major.
    pub fn window_hexes(&self, key: ChunkKey) -> impl Iterator<Item = HexCoord> {
        let (half_w, half_h) = self.render.half_extents();
        let origin = key.origin();
        (-half_h..=half_h).flat_map(move |drow| {
            (-half_w..=half_w).map(move |dcol| origin.offset(dcol, drow))
        })
    }

    /// All chunk keys whose cells intersect the window around `key`, sorted.
    pub fn covering_chunks(&self, key: ChunkKey) -> Vec<ChunkKey> {
        let keys: BTreeSet<ChunkKey> = self
            .window_hexes(key)
            .map(|hex| self.key_for_hex(hex))
            .collect();
        keys.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_grid() -> ChunkGrid {
        ChunkGrid::new(
            10,
            RenderChunkSize {
                width: 40,
                height: 30,
            },
            HexLayout::new(1.0),
        )
    }

    #[test]
    fn key_string_round_trip() {
        let key = ChunkKey::new(-24, 16);
        assert_eq!(key.to_string(), "-24,16");
        assert_eq!("-24,16".parse::<ChunkKey>().unwrap(), key);
        assert_eq!(" 8 , 0".parse::<ChunkKey>().unwrap(), ChunkKey::new(8, 0));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(matches!(
            "12".parse::<ChunkKey>(),
            Err(ChunkKeyParseError::Shape(_))
        ));
        assert!(matches!(
            "1,2,3".parse::<ChunkKey>(),
            Err(ChunkKeyParseError::Shape(_))
        ));
        assert!(matches!(
            "abc,4".parse::<ChunkKey>(),
            Err(ChunkKeyParseError::Component { .. })
        ));
    }

    #[test]
    fn camera_at_origin_resolves_to_origin_chunk() {
        let grid = scenario_grid();
        assert_eq!(grid.key_for_camera(Vec3::ZERO).to_string(), "0,0");
    }

    #[test]
    fn small_camera_moves_keep_the_active_key() {
        let grid = scenario_grid();
        let half_x = 10.0 * 3f32.sqrt() / 2.0;
        let half_z = 10.0 * 1.5 / 2.0;
        for (dx, dz) in [
            (half_x * 0.9, 0.0),
            (-half_x * 0.9, 0.0),
            (0.0, half_z * 0.9),
            (0.0, -half_z * 0.9),
            (half_x * 0.5, -half_z * 0.5),
        ] {
            assert_eq!(
                grid.key_for_camera(Vec3::new(dx, 0.0, dz)),
                ChunkKey::new(0, 0),
                "moved by ({dx}, {dz})"
            );
        }
        assert_eq!(
            grid.key_for_camera(Vec3::new(half_x * 1.1, 0.0, 0.0)),
            ChunkKey::new(0, 10)
        );
        assert_eq!(
            grid.key_for_camera(Vec3::new(0.0, 0.0, -half_z * 1.1)),
            ChunkKey::new(-10, 0)
        );
    }

    #[test]
    fn key_is_stable_within_a_cell() {
        let grid = scenario_grid();
        let pitch_x = 10.0 * 3f32.sqrt();
        let key = grid.key_for_world(pitch_x * 2.0 + 0.01, 15.0 * 3.0 + 0.01);
        assert_eq!(key, ChunkKey::new(30, 20));
        assert_eq!(grid.key_for_world(pitch_x * 2.9, 15.0 * 3.9), key);
        assert_eq!(grid.key_for_world(-0.01, -0.01), ChunkKey::new(-10, -10));
    }

    #[test]
    fn window_is_an_axis_aligned_rectangle() {
        let grid = scenario_grid();
        let key = ChunkKey::new(10, 20);
        assert!(grid.window_contains(key, HexCoord::new(40, 25)));
        assert!(grid.window_contains(key, HexCoord::new(0, -5)));
        assert!(!grid.window_contains(key, HexCoord::new(41, 10)));
        assert!(!grid.window_contains(key, HexCoord::new(20, 26)));
        assert_eq!(grid.window_hexes(key).count(), 41 * 31);
        assert!(grid.window_hexes(key).all(|h| grid.window_contains(key, h)));
    }

    #[test]
    fn covering_chunks_include_every_window_hex() {
        let grid = scenario_grid();
        let key = ChunkKey::new(0, 0);
        let covering = grid.covering_chunks(key);
        assert!(covering.contains(&key));
        for hex in grid.window_hexes(key) {
            assert!(covering.contains(&grid.key_for_hex(hex)));
        }
        let mut sorted = covering.clone();
        sorted.dedup();
        assert_eq!(sorted.len(), covering.len());
    }

    #[test]
    fn neighborhood_is_three_by_three() {
        let grid = scenario_grid();
        let keys = grid.neighborhood(ChunkKey::new(10, 10));
        assert_eq!(keys.len(), 9);
        assert!(keys.contains(&ChunkKey::new(0, 0)));
        assert!(keys.contains(&ChunkKey::new(20, 20)));
        let prefetch = grid.surrounding_keys(ChunkKey::new(0, 0), -2..=1, -1..=1);
        assert_eq!(prefetch.len(), 12);
        assert!(prefetch.contains(&ChunkKey::new(-20, -10)));
        assert!(!prefetch.contains(&ChunkKey::new(20, 0)));
    }
}
