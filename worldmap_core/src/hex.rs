//! Hex coordinate math shared by chunking, rendering and clustering.
//!
//! Coordinates are offset `(col, row)` pairs. Odd rows are shifted by half a hex
//! width in world space; distances go through cube coordinates so every consumer
//! agrees on the same metric.

use std::fmt;

use bevy::math::Vec3;
use thiserror::Error;
use worldmap_schema::ContractHex;

/// Offset between contract space (feed) and engine-local space.
pub const WORLD_CENTER: i64 = 2_147_483_646;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Engine-local hex coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct HexCoord {
    pub col: i32,
    pub row: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("coordinate ({col}, {row}) does not fit the target space")]
pub struct CoordinateRangeError {
    pub col: i64,
    pub row: i64,
}

impl HexCoord {
    pub const fn new(col: i32, row: i32) -> Self {
        Self { col, row }
    }

    /// Subtracts [`WORLD_CENTER`] from a feed coordinate.
    pub fn from_contract(hex: ContractHex) -> Result<Self, CoordinateRangeError> {
        let col = i64::from(hex.col) - WORLD_CENTER;
        let row = i64::from(hex.row) - WORLD_CENTER;
        match (i32::try_from(col), i32::try_from(row)) {
            (Ok(col), Ok(row)) => Ok(Self { col, row }),
            _ => Err(CoordinateRangeError { col, row }),
        }
    }

    pub fn to_contract(self) -> Result<ContractHex, CoordinateRangeError> {
        let col = i64::from(self.col) + WORLD_CENTER;
        let row = i64::from(self.row) + WORLD_CENTER;
        match (u32::try_from(col), u32::try_from(row)) {
            (Ok(c), Ok(r)) => Ok(ContractHex::new(c, r)),
            _ => Err(CoordinateRangeError { col, row }),
        }
    }

    /// Cube coordinates `(x, y, z)` with `x + y + z == 0`.
    fn cube(self) -> (i64, i64, i64) {
        let col = i64::from(self.col);
        let row = i64::from(self.row);
        let x = col;
        let z = row - (col - (col & 1)) / 2;
        (x, -x - z, z)
    }

    /// Number of hex steps between `self` and `other`.
    pub fn distance(self, other: HexCoord) -> u32 {
        let (ax, ay, az) = self.cube();
        let (bx, by, bz) = other.cube();
        let d = (ax - bx).abs().max((ay - by).abs()).max((az - bz).abs());
        u32::try_from(d).unwrap_or(u32::MAX)
    }

    pub fn offset(self, dcol: i32, drow: i32) -> Self {
        Self {
            col: self.col.saturating_add(dcol),
            row: self.row.saturating_add(drow),
        }
    }
}

impl fmt::Display for HexCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.col, self.row)
    }
}

/// World-space placement of hexes of radius `hex_size`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HexLayout {
    pub hex_size: f32,
}

impl Default for HexLayout {
    fn default() -> Self {
        Self { hex_size: 1.0 }
    }
}

impl HexLayout {
    pub fn new(hex_size: f32) -> Self {
        Self { hex_size }
    }

    /// Horizontal distance between neighbouring hex centers.
    pub fn horizontal_pitch(&self) -> f64 {
        SQRT_3 * f64::from(self.hex_size)
    }

    /// Vertical distance between neighbouring rows.
    pub fn vertical_pitch(&self) -> f64 {
        1.5 * f64::from(self.hex_size)
    }

    fn row_offset(&self, row: i32) -> f64 {
        if row % 2 == 0 {
            0.0
        } else {
            self.horizontal_pitch() / 2.0
        }
    }

    /// Center of `hex` in world space. Non-flat placement adds a stable height jitter.
    pub fn to_world(&self, hex: HexCoord, flat: bool) -> Vec3 {
        let x = f64::from(hex.col) * self.horizontal_pitch() - self.row_offset(hex.row);
        let z = f64::from(hex.row) * self.vertical_pitch();
        let y = if flat {
            0.0
        } else {
            hash_coordinates(x, z) * 2.0
        };
        Vec3::new(x as f32, y as f32, z as f32)
    }

    pub fn to_hex(&self, position: Vec3) -> HexCoord {
        let row = (f64::from(position.z) / self.vertical_pitch()).round();
        let row = saturating_i32(row);
        let col = ((f64::from(position.x) + self.row_offset(row)) / self.horizontal_pitch()).round();
        HexCoord::new(saturating_i32(col), row)
    }
}

fn saturating_i32(value: f64) -> i32 {
    if value.is_nan() {
        0
    } else {
        value.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
    }
}

/// Deterministic value in `[0, 1)` for a pair of coordinates.
pub fn hash_coordinates(x: f64, y: f64) -> f64 {
    let v = (x * 12.9898 + y * 78.233).sin() * 43_758.545_3;
    v - v.floor()
}

/// Yaw in multiples of 60 degrees, stable per hex.
pub fn instance_yaw(hex: HexCoord) -> f32 {
    let step = (hash_coordinates(f64::from(hex.col), f64::from(hex.row)) * 6.0).floor();
    (step * std::f64::consts::FRAC_PI_3) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_round_trip() {
        let hex = HexCoord::new(-12, 40);
        let contract = hex.to_contract().unwrap();
        assert_eq!(contract.col, 2_147_483_634);
        assert_eq!(HexCoord::from_contract(contract).unwrap(), hex);

        let origin = HexCoord::from_contract(ContractHex::new(2_147_483_646, 2_147_483_646)).unwrap();
        assert_eq!(origin, HexCoord::new(0, 0));
    }

    #[test]
    fn contract_out_of_range_is_rejected() {
        assert!(HexCoord::from_contract(ContractHex::new(u32::MAX, 0)).is_err());
        assert!(HexCoord::new(i32::MIN, 0).to_contract().is_err());
    }

    #[test]
    fn world_round_trip_over_grid() {
        for layout in [HexLayout::new(1.0), HexLayout::new(0.5), HexLayout::new(3.0)] {
            for row in -60..=60 {
                for col in -60..=60 {
                    let hex = HexCoord::new(col, row);
                    for flat in [true, false] {
                        let world = layout.to_world(hex, flat);
                        assert_eq!(layout.to_hex(world), hex, "{hex} flat={flat}");
                    }
                }
            }
        }
    }

    #[test]
    fn odd_rows_shift_left_by_half_pitch() {
        let layout = HexLayout::new(1.0);
        let even = layout.to_world(HexCoord::new(2, 0), true);
        let odd = layout.to_world(HexCoord::new(2, 1), true);
        let negative_odd = layout.to_world(HexCoord::new(2, -1), true);
        let half = (layout.horizontal_pitch() / 2.0) as f32;
        assert!((even.x - odd.x - half).abs() < 1e-5);
        assert!((odd.x - negative_odd.x).abs() < 1e-5);
        assert!((odd.z - 1.5).abs() < 1e-5);
    }

    #[test]
    fn distance_metric_laws() {
        let samples: Vec<HexCoord> = (-6..=6)
            .flat_map(|col| (-6..=6).map(move |row| HexCoord::new(col * 3 - 1, row * 2 + 1)))
            .collect();
        for &a in &samples {
            assert_eq!(a.distance(a), 0);
            for &b in &samples {
                assert_eq!(a.distance(b), b.distance(a));
                for &c in samples.iter().step_by(7) {
                    assert!(a.distance(c) <= a.distance(b) + b.distance(c));
                }
            }
        }
    }

    #[test]
    fn neighbouring_hexes_are_one_step_apart() {
        let a = HexCoord::new(10, 10);
        assert_eq!(a.distance(HexCoord::new(11, 10)), 1);
        assert_eq!(a.distance(HexCoord::new(10, 11)), 1);
        assert_eq!(a.distance(HexCoord::new(50, 50)), 60);
    }

    #[test]
    fn yaw_is_a_sixth_turn_multiple() {
        for col in -5..5 {
            let yaw = instance_yaw(HexCoord::new(col, 3));
            let steps = yaw / std::f32::consts::FRAC_PI_3;
            assert!((steps - steps.round()).abs() < 1e-4);
            assert!((0.0..6.0).contains(&steps.round()));
            assert_eq!(yaw, instance_yaw(HexCoord::new(col, 3)));
        }
    }
}
