//! Bundled terrain routines: height-field noise, climate biomes, biome surfaces,
//! brick towers as cross-tile structures, and trees.

use farfield_world::{GenCtx, Stage, StructureStart, TILE_WIDTH, TilePos};

use crate::block::{Biome, Block};
use crate::library::{GenerationLibrary, LibraryFault};
use crate::section::BIOMES_PER_SECTION;
use crate::tile::{HeightmapKind, Tile};
use crate::window::Window;

const W: usize = TILE_WIDTH;
const SALT_TOWER: u32 = 0x5457_5752;
const SALT_TOWER_X: u32 = 0x0A11_7C01;
const SALT_TOWER_Z: u32 = 0x0A11_7C02;
const SALT_TREE: u32 = 0x7EE5_0001;
const SALT_TRUNK: u32 = 0x7EE5_0002;

#[derive(Clone, Copy, Debug, Default)]
pub struct NoiseGenerator;

impl GenerationLibrary for NoiseGenerator {
    fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut GenCtx,
        window: &Window,
        tile: &mut Tile,
    ) -> Result<(), LibraryFault> {
        match stage {
            Stage::StructureStart => structure_starts(ctx, tile),
            Stage::StructureReference => structure_references(ctx, window, tile),
            Stage::Biomes => biomes(ctx, tile),
            Stage::Noise => noise(ctx, tile),
            Stage::Surface => surface(ctx, tile),
            Stage::Features => features(ctx, tile),
            Stage::Empty | Stage::Carvers | Stage::Light | Stage::Full => {}
        }
        Ok(())
    }
}

fn remap_noise_to_height(noise: f32, min_h: i32, max_h: i32) -> i32 {
    let span = (max_h - min_h) as f32;
    ((noise + 1.0) * 0.5 * span) as i32 + min_h
}

/// Y of the topmost stone block of a world column.
fn column_height(ctx: &GenCtx, min_y: i32, max_y: i32, wx: i32, wz: i32) -> i32 {
    let p = &ctx.params;
    let base = ctx.height.get_noise_2d(wx as f32, wz as f32);
    let detail = ctx.detail.get_noise_2d(wx as f32, wz as f32) * 0.1;
    let n = (base + detail).clamp(-1.0, 1.0);
    remap_noise_to_height(n, p.min_height, p.max_height).clamp(min_y + 1, max_y - 2)
}

fn hash2(ix: i32, iz: i32, seed: u32) -> u32 {
    let mut h = (ix as u32).wrapping_mul(0x85eb_ca6b)
        ^ (iz as u32).wrapping_mul(0xc2b2_ae35)
        ^ seed.wrapping_mul(0x27d4_eb2d);
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb_352d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846c_a68b);
    h ^= h >> 16;
    h
}

fn rand01(world_seed: u32, ix: i32, iz: i32, salt: u32) -> f32 {
    let h = hash2(ix, iz, (world_seed ^ salt).wrapping_add(0x9E37_79B9));
    ((h & 0x00FF_FFFF) as f32) / 16_777_216.0
}

fn place_start(ctx: &GenCtx, pos: TilePos) -> Option<StructureStart> {
    let p = &ctx.params;
    let seed = ctx.seed as u32;
    if rand01(seed, pos.x, pos.z, SALT_TOWER) >= p.tower_chance {
        return None;
    }
    let (bx, bz) = pos.block_origin();
    let ox = (hash2(pos.x, pos.z, seed ^ SALT_TOWER_X) % W as u32) as i32;
    let oz = (hash2(pos.x, pos.z, seed ^ SALT_TOWER_Z) % W as u32) as i32;
    Some(StructureStart {
        tile: pos,
        center_x: bx + ox,
        center_z: bz + oz,
        radius: p.tower_radius,
        height: p.tower_height,
    })
}

fn footprint_overlaps(s: &StructureStart, pos: TilePos) -> bool {
    let (bx, bz) = pos.block_origin();
    let last = W as i32 - 1;
    s.center_x - s.radius <= bx + last
        && s.center_x + s.radius >= bx
        && s.center_z - s.radius <= bz + last
        && s.center_z + s.radius >= bz
}

fn structure_starts(ctx: &mut GenCtx, tile: &mut Tile) {
    let start = ctx.structure_start_with(tile.pos, |c, p| place_start(c, p));
    tile.structure_starts = start.into_iter().collect();
}

/// Collects neighbouring starts whose footprint reaches into this tile. Prefers
/// what the window already generated, falling back to the context's memo.
fn structure_references(ctx: &mut GenCtx, window: &Window, tile: &mut Tile) {
    let r = ctx.params.reference_radius;
    let mut refs = Vec::new();
    for dz in -r..=r {
        for dx in -r..=r {
            let npos = tile.pos.offset(dx, dz);
            let start = if npos == tile.pos {
                tile.structure_starts.first().copied()
            } else {
                match window.get(npos) {
                    Some(n) if n.is_at_least(Stage::StructureStart) => {
                        n.structure_starts.first().copied()
                    }
                    _ => ctx.structure_start_with(npos, |c, p| place_start(c, p)),
                }
            };
            if start.is_some_and(|s| footprint_overlaps(&s, tile.pos)) {
                refs.push(npos);
            }
        }
    }
    tile.structure_refs = refs;
}

fn pick_biome(ctx: &GenCtx, min_y: i32, max_y: i32, wx: i32, wz: i32) -> Biome {
    let sea = ctx.params.sea_level;
    let h = column_height(ctx, min_y, max_y, wx, wz);
    if h < sea - 3 {
        return Biome::Ocean;
    }
    if h <= sea + 1 {
        return Biome::Beach;
    }
    let t = ctx.temperature.get_noise_2d(wx as f32, wz as f32);
    let m = ctx.moisture.get_noise_2d(wx as f32, wz as f32);
    if t < -0.45 {
        Biome::SnowyPlains
    } else if t < -0.15 {
        Biome::Taiga
    } else if t > 0.35 && m < 0.0 {
        Biome::Desert
    } else if m > 0.15 {
        Biome::Forest
    } else {
        Biome::Plains
    }
}

fn biomes(ctx: &mut GenCtx, tile: &mut Tile) {
    let (bx, bz) = tile.pos.block_origin();
    let mut columns = [Biome::Plains; 16];
    for cz in 0..4 {
        for cx in 0..4 {
            let wx = bx + (cx * 4 + 2) as i32;
            let wz = bz + (cz * 4 + 2) as i32;
            columns[cz * 4 + cx] = pick_biome(ctx, tile.min_y, tile.max_y(), wx, wz);
        }
    }
    let mut out = Vec::with_capacity(tile.section_count() * BIOMES_PER_SECTION);
    for _ in 0..tile.section_count() * 4 {
        out.extend_from_slice(&columns);
    }
    tile.set_biomes(out);
}

fn noise(ctx: &mut GenCtx, tile: &mut Tile) {
    let (bx, bz) = tile.pos.block_origin();
    let sea = ctx.params.sea_level.min(tile.max_y() - 1);
    for z in 0..W {
        for x in 0..W {
            let h = column_height(ctx, tile.min_y, tile.max_y(), bx + x as i32, bz + z as i32);
            tile.set_block(x, tile.min_y, z, Block::BEDROCK);
            for y in tile.min_y + 1..=h {
                tile.set_block(x, y, z, Block::STONE);
            }
            for y in h + 1..=sea {
                tile.set_block(x, y, z, Block::WATER);
            }
        }
    }
    tile.recalc_heightmaps();
}

fn surface(ctx: &mut GenCtx, tile: &mut Tile) {
    let depth = ctx.params.topsoil_thickness;
    for z in 0..W {
        for x in 0..W {
            let top = tile.surface_y(HeightmapKind::OceanFloor, x, z) - 1;
            if top <= tile.min_y {
                continue;
            }
            let (cap, filler) = tile.biome_at(x, top, z).surface_blocks();
            let submerged = tile.block(x, top + 1, z) == Block::WATER;
            for d in 0..=depth {
                let y = top - d;
                if y <= tile.min_y {
                    break;
                }
                if tile.block(x, y, z) != Block::STONE {
                    continue;
                }
                let b = match d {
                    0 if submerged && cap == Block::GRASS => Block::DIRT,
                    0 => cap,
                    _ => filler,
                };
                tile.set_block(x, y, z, b);
            }
        }
    }
}

fn features(ctx: &mut GenCtx, tile: &mut Tile) {
    let mut towers = Vec::new();
    for &rp in &tile.structure_refs {
        let start = if rp == tile.pos {
            tile.structure_starts.first().copied()
        } else {
            ctx.structure_start_with(rp, |c, p| place_start(c, p))
        };
        towers.extend(start);
    }
    for s in &towers {
        build_tower(ctx, tile, s);
    }
    plant_trees(ctx, tile);
    tile.recalc_heightmaps();
}

/// Brick ring with a glowstone crown, clipped to this tile.
fn build_tower(ctx: &GenCtx, tile: &mut Tile, s: &StructureStart) {
    let (bx, bz) = tile.pos.block_origin();
    let base = column_height(ctx, tile.min_y, tile.max_y(), s.center_x, s.center_z) + 1;
    let outer = s.radius * s.radius;
    let inner = (s.radius - 1) * (s.radius - 1);
    for z in 0..W {
        for x in 0..W {
            let dx = bx + x as i32 - s.center_x;
            let dz = bz + z as i32 - s.center_z;
            let d2 = dx * dx + dz * dz;
            if d2 > outer || d2 <= inner {
                continue;
            }
            for y in base..base + s.height {
                tile.set_block(x, y, z, Block::BRICK);
            }
            tile.set_block(x, base + s.height, z, Block::GLOWSTONE);
        }
    }
}

/// Trees stay two columns away from the tile edge so leaves never cross it.
fn plant_trees(ctx: &GenCtx, tile: &mut Tile) {
    let p = &ctx.params;
    let seed = ctx.seed as u32;
    let (bx, bz) = tile.pos.block_origin();
    for z in 2..W - 2 {
        for x in 2..W - 2 {
            let wx = bx + x as i32;
            let wz = bz + z as i32;
            if rand01(seed, wx, wz, SALT_TREE) >= p.tree_probability {
                continue;
            }
            let top = tile.surface_y(HeightmapKind::WorldSurface, x, z) - 1;
            if tile.block(x, top, z) != Block::GRASS {
                continue;
            }
            if matches!(tile.biome_at(x, top, z), Biome::Desert | Biome::Ocean | Biome::Beach) {
                continue;
            }
            let span = (p.trunk_max - p.trunk_min + 1).max(1) as u32;
            let trunk = p.trunk_min + (hash2(wx, wz, seed ^ SALT_TRUNK) % span) as i32;
            for y in top + 1..=top + trunk {
                tile.set_block(x, y, z, Block::LOG);
            }
            let crown = top + trunk;
            for ly in crown - 1..=crown + 1 {
                let r: i32 = if ly > crown { 1 } else { 2 };
                for dz in -r..=r {
                    for dx in -r..=r {
                        if dx.abs() == r && dz.abs() == r {
                            continue;
                        }
                        let lx = (x as i32 + dx) as usize;
                        let lz = (z as i32 + dz) as usize;
                        if tile.block(lx, ly, lz).is_air() {
                            tile.set_block(lx, ly, lz, Block::LEAVES);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farfield_world::{Level, TerrainParams};

    fn level(params: TerrainParams) -> Level {
        Level::new("test", 42, -16, 192, true, params)
    }

    fn run_chain(level: &Level, window: &mut Window, pos: TilePos) -> Tile {
        let mut ctx = NoiseGenerator.make_context(level);
        let mut tile = window.take(pos).unwrap();
        for stage in farfield_world::StageChain::ORDER {
            NoiseGenerator
                .run_stage(stage, &mut ctx, window, &mut tile)
                .unwrap();
            tile.advance_to(stage);
        }
        tile
    }

    fn window_around(level: &Level, center: TilePos) -> Window {
        let mut w = Window::new(center.offset(-1, -1), 3);
        let positions: Vec<_> = w.positions().collect();
        for p in positions {
            w.put(Tile::empty(p, level.min_y, level.height)).unwrap();
        }
        w
    }

    #[test]
    fn chain_fills_terrain_biomes_and_heightmaps() {
        let level = level(TerrainParams::default());
        let center = TilePos::new(3, -2);
        let mut w = window_around(&level, center);
        let tile = run_chain(&level, &mut w, center);
        assert!(tile.has_blocks());
        assert!(tile.biomes.is_some());
        assert!(tile.has_heightmaps());
        for z in 0..W {
            for x in 0..W {
                assert_eq!(tile.block(x, level.min_y, z), Block::BEDROCK);
                let top = tile.surface_y(HeightmapKind::WorldSurface, x, z);
                assert!(top > level.min_y + 1);
            }
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let level = level(TerrainParams::default());
        let center = TilePos::new(-7, 11);
        let a = run_chain(&level, &mut window_around(&level, center), center);
        let b = run_chain(&level, &mut window_around(&level, center), center);
        assert_eq!(a.sections, b.sections);
        assert_eq!(a.biomes, b.biomes);
    }

    #[test]
    fn towers_reference_their_own_tile() {
        let params = TerrainParams {
            tower_chance: 1.0,
            ..TerrainParams::default()
        };
        let level = level(params);
        let center = TilePos::new(0, 0);
        let tile = run_chain(&level, &mut window_around(&level, center), center);
        assert_eq!(tile.structure_starts.len(), 1);
        assert!(tile.structure_refs.contains(&center));
        let has_brick = tile
            .sections
            .iter()
            .flatten()
            .any(|s| s.blocks().contains(&Block::BRICK));
        assert!(has_brick);
    }
}
