use std::fmt;

use serde::{Deserialize, Serialize};

use crate::TILE_WIDTH;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TilePos {
    pub x: i32,
    pub z: i32,
}

impl TilePos {
    #[inline]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    #[inline]
    pub fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            z: self.z + dz,
        }
    }

    /// Chessboard distance, the ring index of `other` around `self`.
    #[inline]
    pub fn chebyshev(self, other: TilePos) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }

    /// World-space block coordinates of the tile's minimum corner.
    #[inline]
    pub fn block_origin(self) -> (i32, i32) {
        (self.x * TILE_WIDTH as i32, self.z * TILE_WIDTH as i32)
    }

    /// Positions of the `width`×`width` square whose minimum corner is `self`, row by row.
    pub fn square(self, width: usize) -> impl Iterator<Item = TilePos> {
        let w = width as i32;
        (0..w).flat_map(move |dz| (0..w).map(move |dx| self.offset(dx, dz)))
    }

    /// True if `pos` lies in the `width`×`width` square anchored at `self`.
    #[inline]
    pub fn square_contains(self, width: usize, pos: TilePos) -> bool {
        let w = width as i32;
        pos.x >= self.x && pos.x < self.x + w && pos.z >= self.z && pos.z < self.z + w
    }
}

impl fmt::Display for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

impl From<(i32, i32)> for TilePos {
    fn from(value: (i32, i32)) -> Self {
        Self::new(value.0, value.1)
    }
}

impl From<TilePos> for (i32, i32) {
    fn from(value: TilePos) -> Self {
        (value.x, value.z)
    }
}
