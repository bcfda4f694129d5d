use std::collections::HashMap;

use farfield_chunk::{BIOMES_PER_SECTION, Biome, Block, Section, Tile};
use farfield_world::{SECTION_HEIGHT, TILE_WIDTH};
use fastnbt::{ByteArray, LongArray, Value};
use serde::{Deserialize, Serialize};

use crate::palette;

/// On-disk tile record. Only the fields the pipeline reads are modelled.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TileRecord {
    #[serde(rename = "xPos", default)]
    pub x_pos: i32,
    #[serde(rename = "zPos", default)]
    pub z_pos: i32,
    #[serde(rename = "yPos", default, skip_serializing_if = "Option::is_none")]
    pub y_pos: Option<i32>,
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "isLightOn", default)]
    pub is_light_on: bool,
    #[serde(default, alias = "Sections")]
    pub sections: Vec<SectionRecord>,
    #[serde(rename = "Heightmaps", default, skip_serializing_if = "HashMap::is_empty")]
    pub heightmaps: HashMap<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SectionRecord {
    #[serde(rename = "Y")]
    pub y: i8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_states: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biomes: Option<Value>,
    #[serde(rename = "BlockLight", default, skip_serializing_if = "Option::is_none")]
    pub block_light: Option<ByteArray>,
    #[serde(rename = "SkyLight", default, skip_serializing_if = "Option::is_none")]
    pub sky_light: Option<ByteArray>,
}

fn palette_of<T: Copy + PartialEq>(items: &[T]) -> (Vec<T>, Vec<u32>) {
    let mut palette: Vec<T> = Vec::new();
    let mut indices = Vec::with_capacity(items.len());
    for &it in items {
        let idx = match palette.iter().position(|p| *p == it) {
            Some(i) => i,
            None => {
                palette.push(it);
                palette.len() - 1
            }
        };
        indices.push(idx as u32);
    }
    (palette, indices)
}

fn encode_blocks(section: Option<&Section>) -> Value {
    let air = Section::default();
    let section = section.unwrap_or(&air);
    let (pal, indices) = palette_of(section.blocks());
    let entries = pal
        .iter()
        .map(|b: &Block| {
            Value::Compound(HashMap::from([(
                "Name".to_owned(),
                Value::String(format!("minecraft:{}", b.name())),
            )]))
        })
        .collect();
    let mut map = HashMap::from([("palette".to_owned(), Value::List(entries))]);
    if pal.len() > 1 {
        let data = palette::pack(&indices, palette::block_bits(pal.len()));
        map.insert("data".to_owned(), Value::LongArray(LongArray::new(data)));
    }
    Value::Compound(map)
}

fn encode_biomes(biomes: &[Biome]) -> Value {
    let (pal, indices) = palette_of(biomes);
    let entries = pal
        .iter()
        .map(|b| Value::String(format!("minecraft:{}", b.name())))
        .collect();
    let mut map = HashMap::from([("palette".to_owned(), Value::List(entries))]);
    if pal.len() > 1 {
        let data = palette::pack(&indices, palette::biome_bits(pal.len()));
        map.insert("data".to_owned(), Value::LongArray(LongArray::new(data)));
    }
    Value::Compound(map)
}

fn to_byte_array(nibbles: Vec<u8>) -> ByteArray {
    ByteArray::new(nibbles.into_iter().map(|b| b as i8).collect())
}

impl TileRecord {
    pub fn from_tile(tile: &Tile) -> Self {
        let base_section = tile.min_y.div_euclid(SECTION_HEIGHT as i32);
        let mut sections = Vec::with_capacity(tile.section_count());
        for si in 0..tile.section_count() {
            let biomes = tile.biomes.as_ref().and_then(|b| {
                b.get(si * BIOMES_PER_SECTION..(si + 1) * BIOMES_PER_SECTION)
                    .map(encode_biomes)
            });
            sections.push(SectionRecord {
                y: (base_section + si as i32) as i8,
                block_states: Some(encode_blocks(tile.sections[si].as_ref())),
                biomes,
                block_light: tile
                    .block_light
                    .as_ref()
                    .map(|l| to_byte_array(l.section_nibbles(si))),
                sky_light: tile
                    .sky_light
                    .as_ref()
                    .map(|l| to_byte_array(l.section_nibbles(si))),
            });
        }
        let bits = palette::heightmap_bits(tile.height);
        let heightmaps = tile
            .heightmaps
            .iter()
            .filter(|(_, v)| v.len() == TILE_WIDTH * TILE_WIDTH)
            .map(|(kind, values)| {
                let rel: Vec<u32> = values
                    .iter()
                    .map(|&h| (h - tile.min_y).clamp(0, tile.height as i32) as u32)
                    .collect();
                (
                    kind.name().to_owned(),
                    Value::LongArray(LongArray::new(palette::pack(&rel, bits))),
                )
            })
            .collect();
        TileRecord {
            x_pos: tile.pos.x,
            z_pos: tile.pos.z,
            y_pos: Some(base_section),
            status: Some(format!("minecraft:{}", tile.stage().name())),
            is_light_on: tile.is_light_correct(),
            sections,
            heightmaps,
        }
    }
}

/// Serializes a tile into the persisted record format.
pub fn encode_tile(tile: &Tile) -> Result<Vec<u8>, fastnbt::error::Error> {
    fastnbt::to_bytes(&TileRecord::from_tile(tile))
}
