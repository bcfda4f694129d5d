use farfield_chunk::{
    BIOMES_PER_SECTION, Biome, Block, HeightmapKind, LightStorage, SECTION_VOLUME, Section, Tile,
    TileOrigin,
};
use farfield_world::{
    GeneratorParams, Level, LogOnce, MAX_LIGHT, SECTION_HEIGHT, Stage, TILE_WIDTH, TilePos,
};
use fastnbt::Value;

use crate::LOG_TARGET;
use crate::error::DecodeError;
use crate::palette;
use crate::record::{SectionRecord, TileRecord};

/// How persisted records are mapped onto tiles of one level.
#[derive(Clone, Debug)]
pub struct ParseOptions {
    pub min_y: i32,
    pub height: usize,
    /// Records below this stage are discarded and regenerated.
    pub min_persisted_stage: Stage,
    pub assume_finished: bool,
    pub pull_lighting: bool,
}

impl ParseOptions {
    pub fn new(level: &Level, params: &GeneratorParams) -> Self {
        Self {
            min_y: level.min_y,
            height: level.height,
            min_persisted_stage: params.min_persisted_stage,
            assume_finished: params.assume_pre_existing_finished,
            pull_lighting: params.pull_lighting_for_pregenerated,
        }
    }

    fn section_count(&self) -> usize {
        self.height / SECTION_HEIGHT
    }

    fn section_index(&self, y: i8) -> Option<usize> {
        let base = self.min_y.div_euclid(SECTION_HEIGHT as i32);
        let si = i32::from(y) - base;
        (si >= 0 && (si as usize) < self.section_count()).then_some(si as usize)
    }
}

/// Decodes one persisted record.
///
/// `Ok(None)` means the record exists but must not be used: it belongs to a
/// different position or has not reached `min_persisted_stage`. Section-level
/// faults never fail the record; the affected section keeps its default.
pub fn parse_tile(
    bytes: &[u8],
    expected: TilePos,
    opts: &ParseOptions,
    once: &LogOnce,
) -> Result<Option<Tile>, DecodeError> {
    let record: TileRecord = fastnbt::from_bytes(bytes)?;
    let found = TilePos::new(record.x_pos, record.z_pos);
    if found != expected {
        if found == TilePos::new(0, 0) {
            once.warn(
                LOG_TARGET,
                "tile records at [0, 0] found away from the origin; keeping them at the requested position",
            );
        } else {
            log::error!(
                target: LOG_TARGET,
                "tile record for {expected} claims position {found}; treating it as unreadable"
            );
            return Ok(None);
        }
    }

    let stage = record
        .status
        .as_deref()
        .and_then(Stage::from_status)
        .unwrap_or(Stage::Empty);
    if stage < opts.min_persisted_stage {
        log::debug!(
            target: LOG_TARGET,
            "tile record for {expected} is only at {stage}; regenerating"
        );
        return Ok(None);
    }

    let mut tile = Tile::empty(expected, opts.min_y, opts.height);
    tile.origin = TileOrigin::Persisted;
    tile.advance_to(if opts.assume_finished {
        Stage::Full
    } else {
        stage
    });

    let mut biomes = vec![Biome::default(); opts.section_count() * BIOMES_PER_SECTION];
    let mut any_biomes = false;
    for sec in &record.sections {
        let Some(si) = opts.section_index(sec.y) else {
            continue;
        };
        if let Some(states) = &sec.block_states {
            match decode_block_states(states) {
                Ok(section) => {
                    tile.sections[si] = (!section.is_all_air()).then_some(section);
                }
                Err(e) => warn_decode(once, "block states", &e),
            }
        }
        if let Some(b) = &sec.biomes {
            match decode_biomes(b) {
                Ok(values) => {
                    let start = si * BIOMES_PER_SECTION;
                    biomes[start..start + BIOMES_PER_SECTION].copy_from_slice(&values);
                    any_biomes = true;
                }
                Err(e) => warn_decode(once, "biomes", &e),
            }
        }
    }
    if any_biomes {
        tile.set_biomes(biomes);
    }

    for (name, value) in &record.heightmaps {
        let Some(kind) = HeightmapKind::from_name(name) else {
            continue;
        };
        match decode_heightmap(value, opts) {
            Ok(v) => {
                tile.heightmaps.insert(kind, v);
            }
            Err(e) => warn_decode(once, "height map", &e),
        }
    }

    if opts.pull_lighting {
        read_light(&record, &mut tile, opts, once);
        tile.set_light_correct(record.is_light_on && tile.has_light());
    }
    Ok(Some(tile))
}

fn warn_decode(once: &LogOnce, what: &str, e: &DecodeError) {
    once.warn(LOG_TARGET, &format!("failed to decode {what}: {e}"));
}

fn compound(v: &Value) -> Result<&std::collections::HashMap<String, Value>, DecodeError> {
    match v {
        Value::Compound(map) => Ok(map),
        _ => Err(DecodeError::Shape("expected a compound")),
    }
}

fn long_array(v: Option<&Value>) -> Result<Option<&[i64]>, DecodeError> {
    match v {
        None => Ok(None),
        Some(Value::LongArray(arr)) => Ok(Some(&arr[..])),
        Some(_) => Err(DecodeError::Shape("expected a long array")),
    }
}

fn palette_list(map: &std::collections::HashMap<String, Value>) -> Result<&[Value], DecodeError> {
    match map.get("palette") {
        Some(Value::List(entries)) if !entries.is_empty() => Ok(entries),
        Some(Value::List(_)) => Err(DecodeError::Shape("empty palette")),
        _ => Err(DecodeError::Shape("missing palette")),
    }
}

fn lookup<T: Copy>(palette: &[T], indices: Vec<u32>) -> Result<Vec<T>, DecodeError> {
    indices
        .into_iter()
        .map(|i| {
            palette
                .get(i as usize)
                .copied()
                .ok_or(DecodeError::PaletteIndex {
                    index: i,
                    len: palette.len(),
                })
        })
        .collect()
}

fn decode_block_states(v: &Value) -> Result<Section, DecodeError> {
    let map = compound(v)?;
    let entries = palette_list(map)?;
    let pal = entries
        .iter()
        .map(|e| match compound(e)?.get("Name") {
            Some(Value::String(name)) => Ok(Block::from_name(name)),
            _ => Err(DecodeError::Shape("palette entry without a name")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if pal.len() == 1 {
        return Ok(Section::filled(pal[0]));
    }
    let data = long_array(map.get("data"))?.ok_or(DecodeError::Shape("missing block data"))?;
    let indices = palette::unpack(data, palette::block_bits(pal.len()), SECTION_VOLUME)?;
    Ok(Section::from_blocks(lookup(&pal, indices)?))
}

fn decode_biomes(v: &Value) -> Result<Vec<Biome>, DecodeError> {
    let map = compound(v)?;
    let pal = palette_list(map)?
        .iter()
        .map(|e| match e {
            Value::String(name) => Ok(Biome::from_name(name).unwrap_or_default()),
            _ => Err(DecodeError::Shape("biome palette entry is not a string")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if pal.len() == 1 {
        return Ok(vec![pal[0]; BIOMES_PER_SECTION]);
    }
    let data = long_array(map.get("data"))?.ok_or(DecodeError::Shape("missing biome data"))?;
    let indices = palette::unpack(data, palette::biome_bits(pal.len()), BIOMES_PER_SECTION)?;
    lookup(&pal, indices)
}

fn decode_heightmap(v: &Value, opts: &ParseOptions) -> Result<Vec<i32>, DecodeError> {
    let data = long_array(Some(v))?.ok_or(DecodeError::Shape("missing height data"))?;
    let bits = palette::heightmap_bits(opts.height);
    let values = palette::unpack(data, bits, TILE_WIDTH * TILE_WIDTH)?;
    Ok(values
        .into_iter()
        .map(|h| opts.min_y + h.min(opts.height as u32) as i32)
        .collect())
}

/// Loads packed light. Sky data missing for a section above one that had it
/// means the section is open sky and is filled at full strength.
fn read_light(record: &TileRecord, tile: &mut Tile, opts: &ParseOptions, once: &LogOnce) {
    let count = opts.section_count();
    let mut by_index: Vec<Option<&SectionRecord>> = vec![None; count];
    for sec in &record.sections {
        if let Some(si) = opts.section_index(sec.y) {
            by_index[si] = Some(sec);
        }
    }

    let mut block = LightStorage::new(opts.min_y, opts.height);
    let mut sky = LightStorage::new(opts.min_y, opts.height);
    let mut found_sky = false;
    for (si, sec) in by_index.iter().enumerate() {
        let block_arr = sec
            .and_then(|s| s.block_light.as_ref())
            .filter(|a| !a.is_empty());
        if let Some(arr) = block_arr {
            if !block.set_section_nibbles(si, &as_bytes(arr)) {
                once.warn(LOG_TARGET, "ignoring persisted light: bad block-light array length");
                return;
            }
        }
        let sky_arr = sec
            .and_then(|s| s.sky_light.as_ref())
            .filter(|a| !a.is_empty());
        match sky_arr {
            Some(arr) => {
                if !sky.set_section_nibbles(si, &as_bytes(arr)) {
                    once.warn(LOG_TARGET, "ignoring persisted light: bad sky-light array length");
                    return;
                }
                found_sky = true;
            }
            None if found_sky => sky.fill_section(si, MAX_LIGHT),
            None => {}
        }
    }
    tile.block_light = Some(block);
    tile.sky_light = Some(sky);
}

fn as_bytes(arr: &[i8]) -> Vec<u8> {
    arr.iter().map(|&b| b as u8).collect()
}
