use farfield_world::TilePos;

use crate::tile::Tile;

/// Square grid of tile slots anchored at `origin` (the minimum corner).
///
/// A tile that is being mutated is taken out of its slot, so stages read the
/// rest of the window as context without aliasing the target.
#[derive(Debug)]
pub struct Window {
    origin: TilePos,
    side: usize,
    slots: Vec<Option<Tile>>,
}

impl Window {
    pub fn new(origin: TilePos, side: usize) -> Self {
        let mut slots = Vec::with_capacity(side * side);
        slots.resize_with(side * side, || None);
        Self {
            origin,
            side,
            slots,
        }
    }

    #[inline]
    pub fn origin(&self) -> TilePos {
        self.origin
    }

    #[inline]
    pub fn side(&self) -> usize {
        self.side
    }

    #[inline]
    pub fn rel_to_abs(&self, rx: usize, rz: usize) -> TilePos {
        self.origin.offset(rx as i32, rz as i32)
    }

    #[inline]
    pub fn abs_to_rel(&self, pos: TilePos) -> Option<(usize, usize)> {
        let rx = pos.x - self.origin.x;
        let rz = pos.z - self.origin.z;
        let s = self.side as i32;
        if rx < 0 || rz < 0 || rx >= s || rz >= s {
            return None;
        }
        Some((rx as usize, rz as usize))
    }

    #[inline]
    fn slot(&self, pos: TilePos) -> Option<usize> {
        self.abs_to_rel(pos).map(|(rx, rz)| rz * self.side + rx)
    }

    pub fn contains(&self, pos: TilePos) -> bool {
        self.abs_to_rel(pos).is_some()
    }

    pub fn get(&self, pos: TilePos) -> Option<&Tile> {
        self.slot(pos).and_then(|i| self.slots[i].as_ref())
    }

    pub fn take(&mut self, pos: TilePos) -> Option<Tile> {
        self.slot(pos).and_then(|i| self.slots[i].take())
    }

    /// Hands the tile back if it lies outside the window or its slot is occupied.
    pub fn put(&mut self, tile: Tile) -> Result<(), Tile> {
        match self.slot(tile.pos) {
            Some(i) if self.slots[i].is_none() => {
                self.slots[i] = Some(tile);
                Ok(())
            }
            _ => Err(tile),
        }
    }

    pub fn positions(&self) -> impl Iterator<Item = TilePos> + '_ {
        self.origin.square(self.side)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.slots.iter().flatten()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Present tiles within `radius` of `center`, excluding `center` itself.
    pub fn neighbors(&self, center: TilePos, radius: i32) -> impl Iterator<Item = &Tile> {
        self.tiles()
            .filter(move |t| t.pos != center && t.pos.chebyshev(center) <= radius)
    }

    /// Takes every present tile out, leaving the slots empty.
    pub fn drain(&mut self) -> Vec<Tile> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    /// Puts tiles back; returns the ones that did not fit.
    pub fn refill(&mut self, tiles: Vec<Tile>) -> Vec<Tile> {
        let mut rejected = Vec::new();
        for t in tiles {
            if let Err(t) = self.put(t) {
                rejected.push(t);
            }
        }
        rejected
    }

    /// The sub-square left after trimming `trim` slots from every side.
    pub fn cutout(&self, trim: usize) -> Cutout {
        let side = self.side.saturating_sub(2 * trim);
        let min = if side == 0 {
            self.origin
        } else {
            self.origin.offset(trim as i32, trim as i32)
        };
        Cutout { min, side }
    }
}

/// Region of a window a stage is allowed to mutate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cutout {
    min: TilePos,
    side: usize,
}

impl Cutout {
    pub fn new(min: TilePos, side: usize) -> Self {
        Self { min, side }
    }

    #[inline]
    pub fn min(&self) -> TilePos {
        self.min
    }

    #[inline]
    pub fn side(&self) -> usize {
        self.side
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.side == 0
    }

    #[inline]
    pub fn contains(&self, pos: TilePos) -> bool {
        self.min.square_contains(self.side, pos)
    }

    pub fn positions(&self) -> impl Iterator<Item = TilePos> {
        self.min.square(self.side)
    }
}
