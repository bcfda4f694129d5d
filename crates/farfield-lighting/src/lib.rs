//! Light baking for finished tiles: sky columns plus flood fill, then a seam
//! pass that carries light across tile edges inside one batch.
#![forbid(unsafe_code)]

use std::collections::VecDeque;

use farfield_chunk::{LightStorage, Tile};
use farfield_world::{Stage, TILE_WIDTH, TilePos};
use hashbrown::HashMap;

const W: usize = TILE_WIDTH;

pub trait LightingEngine: Send + Sync {
    /// Bakes every tile whose light is not yet correct; the rest of `tiles`
    /// is read as context across edges.
    fn bake_lighting(&self, tiles: &mut [Tile], max_sky_light: u8);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FloodLightEngine;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    XNeg,
    XPos,
    ZNeg,
    ZPos,
}

impl Side {
    const ALL: [Side; 4] = [Side::XNeg, Side::XPos, Side::ZNeg, Side::ZPos];

    fn offset(self) -> (i32, i32) {
        match self {
            Side::XNeg => (-1, 0),
            Side::XPos => (1, 0),
            Side::ZNeg => (0, -1),
            Side::ZPos => (0, 1),
        }
    }

    /// Local (x, z) of the `i`-th cell along this edge.
    fn cell(self, i: usize) -> (usize, usize) {
        match self {
            Side::XNeg => (0, i),
            Side::XPos => (W - 1, i),
            Side::ZNeg => (i, 0),
            Side::ZPos => (i, W - 1),
        }
    }

    fn opposite(self) -> Side {
        match self {
            Side::XNeg => Side::XPos,
            Side::XPos => Side::XNeg,
            Side::ZNeg => Side::ZPos,
            Side::ZPos => Side::ZNeg,
        }
    }
}

/// Light values along one tile edge, `plane[y * 16 + i]`.
struct EdgePlanes {
    side: Side,
    sky: Vec<u8>,
    block: Vec<u8>,
}

fn edge_planes(tile: &Tile, side: Side) -> Option<(Vec<u8>, Vec<u8>)> {
    let (sky, block) = (tile.sky_light.as_ref()?, tile.block_light.as_ref()?);
    let mut sp = Vec::with_capacity(tile.height * W);
    let mut bp = Vec::with_capacity(tile.height * W);
    for ly in 0..tile.height {
        let y = tile.min_y + ly as i32;
        for i in 0..W {
            let (x, z) = side.cell(i);
            sp.push(sky.get(x, y, z));
            bp.push(block.get(x, y, z));
        }
    }
    Some((sp, bp))
}

type Queue = VecDeque<(usize, usize, usize)>;

struct LightGrid {
    height: usize,
    passable: Vec<bool>,
    sky: Vec<u8>,
    block: Vec<u8>,
}

impl LightGrid {
    #[inline]
    fn idx(&self, x: usize, y: usize, z: usize) -> usize {
        (y * W + z) * W + x
    }

    fn new(tile: &Tile) -> Self {
        let n = tile.height * W * W;
        let mut passable = vec![true; n];
        for ly in 0..tile.height {
            let y = tile.min_y + ly as i32;
            for z in 0..W {
                for x in 0..W {
                    passable[(ly * W + z) * W + x] = tile.block(x, y, z).propagates_light();
                }
            }
        }
        Self {
            height: tile.height,
            passable,
            sky: vec![0; n],
            block: vec![0; n],
        }
    }

    fn from_storage(tile: &Tile) -> Option<Self> {
        let (sky, block) = (tile.sky_light.as_ref()?, tile.block_light.as_ref()?);
        let mut g = Self::new(tile);
        for ly in 0..tile.height {
            let y = tile.min_y + ly as i32;
            for z in 0..W {
                for x in 0..W {
                    let i = g.idx(x, ly, z);
                    g.sky[i] = sky.get(x, y, z);
                    g.block[i] = block.get(x, y, z);
                }
            }
        }
        Some(g)
    }

    /// Open-sky columns at full strength plus block emitters.
    fn seed_local(&mut self, tile: &Tile, max_sky: u8, q_sky: &mut Queue, q_blk: &mut Queue) {
        if max_sky > 0 {
            for z in 0..W {
                for x in 0..W {
                    for ly in (0..self.height).rev() {
                        let y = tile.min_y + ly as i32;
                        if tile.block(x, y, z).blocks_sky_light() {
                            break;
                        }
                        let i = self.idx(x, ly, z);
                        self.sky[i] = max_sky;
                        q_sky.push_back((x, ly, z));
                    }
                }
            }
        }
        for ly in 0..self.height {
            let y = tile.min_y + ly as i32;
            for z in 0..W {
                for x in 0..W {
                    let em = tile.block(x, y, z).emission();
                    if em > 0 {
                        let i = self.idx(x, ly, z);
                        self.block[i] = em;
                        q_blk.push_back((x, ly, z));
                    }
                }
            }
        }
    }

    /// Seeds this tile's edge from a neighbour's facing edge, one level dimmer.
    fn seed_edge(&mut self, planes: &EdgePlanes, q_sky: &mut Queue, q_blk: &mut Queue) {
        for ly in 0..self.height {
            for i in 0..W {
                let (x, z) = planes.side.cell(i);
                let cell = self.idx(x, ly, z);
                if !self.passable[cell] {
                    continue;
                }
                let p = ly * W + i;
                let sv = planes.sky.get(p).copied().unwrap_or(0).saturating_sub(1);
                if sv > self.sky[cell] {
                    self.sky[cell] = sv;
                    q_sky.push_back((x, ly, z));
                }
                let bv = planes.block.get(p).copied().unwrap_or(0).saturating_sub(1);
                if bv > self.block[cell] {
                    self.block[cell] = bv;
                    q_blk.push_back((x, ly, z));
                }
            }
        }
    }

    fn flood(&self, levels: &mut [u8], q: &mut Queue) {
        while let Some((x, y, z)) = q.pop_front() {
            let level = levels[self.idx(x, y, z)];
            if level <= 1 {
                continue;
            }
            let (x, y, z) = (x as i32, y as i32, z as i32);
            for (nx, ny, nz) in [
                (x + 1, y, z),
                (x - 1, y, z),
                (x, y + 1, z),
                (x, y - 1, z),
                (x, y, z + 1),
                (x, y, z - 1),
            ] {
                if nx < 0 || ny < 0 || nz < 0 || nx >= W as i32 || nz >= W as i32 {
                    continue;
                }
                if ny as usize >= self.height {
                    continue;
                }
                let (nx, ny, nz) = (nx as usize, ny as usize, nz as usize);
                let i = self.idx(nx, ny, nz);
                if !self.passable[i] {
                    continue;
                }
                let v = level - 1;
                if levels[i] < v {
                    levels[i] = v;
                    q.push_back((nx, ny, nz));
                }
            }
        }
    }

    fn propagate(&mut self, mut q_sky: Queue, mut q_blk: Queue) {
        let mut sky = std::mem::take(&mut self.sky);
        self.flood(&mut sky, &mut q_sky);
        self.sky = sky;
        let mut block = std::mem::take(&mut self.block);
        self.flood(&mut block, &mut q_blk);
        self.block = block;
    }

    fn store(self, tile: &mut Tile) {
        let mut sky = LightStorage::new(tile.min_y, tile.height);
        let mut block = LightStorage::new(tile.min_y, tile.height);
        for ly in 0..self.height {
            let y = tile.min_y + ly as i32;
            for z in 0..W {
                for x in 0..W {
                    let i = self.idx(x, ly, z);
                    sky.set(x, y, z, self.sky[i]);
                    block.set(x, y, z, self.block[i]);
                }
            }
        }
        tile.sky_light = Some(sky);
        tile.block_light = Some(block);
    }
}

fn neighbour_planes(
    tiles: &[Tile],
    index: &HashMap<TilePos, usize>,
    pos: TilePos,
) -> Vec<EdgePlanes> {
    let mut out = Vec::new();
    for side in Side::ALL {
        let (dx, dz) = side.offset();
        let Some(&ni) = index.get(&pos.offset(dx, dz)) else {
            continue;
        };
        if let Some((sky, block)) = edge_planes(&tiles[ni], side.opposite()) {
            out.push(EdgePlanes { side, sky, block });
        }
    }
    out
}

impl LightingEngine for FloodLightEngine {
    fn bake_lighting(&self, tiles: &mut [Tile], max_sky_light: u8) {
        let pending: Vec<usize> = tiles
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_light_correct() && t.stage() != Stage::Empty)
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return;
        }

        for &i in &pending {
            let tile = &mut tiles[i];
            let mut grid = LightGrid::new(tile);
            let (mut q_sky, mut q_blk) = (Queue::new(), Queue::new());
            grid.seed_local(tile, max_sky_light, &mut q_sky, &mut q_blk);
            grid.propagate(q_sky, q_blk);
            grid.store(tile);
        }

        let index: HashMap<TilePos, usize> =
            tiles.iter().enumerate().map(|(i, t)| (t.pos, i)).collect();
        for &i in &pending {
            let planes = neighbour_planes(tiles, &index, tiles[i].pos);
            if planes.is_empty() {
                continue;
            }
            let tile = &mut tiles[i];
            let Some(mut grid) = LightGrid::from_storage(tile) else {
                continue;
            };
            let (mut q_sky, mut q_blk) = (Queue::new(), Queue::new());
            for p in &planes {
                grid.seed_edge(p, &mut q_sky, &mut q_blk);
            }
            grid.propagate(q_sky, q_blk);
            grid.store(tile);
        }

        for &i in &pending {
            tiles[i].set_light_correct(true);
        }
        log::trace!(target: "worldgen", "baked light for {} tiles", pending.len());
    }
}
