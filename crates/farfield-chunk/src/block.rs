use farfield_world::MAX_LIGHT;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(pub u16);

const NAMES: [&str; 13] = [
    "air",
    "stone",
    "dirt",
    "grass_block",
    "sand",
    "snow_block",
    "water",
    "oak_log",
    "oak_leaves",
    "bricks",
    "glowstone",
    "bedrock",
    "gravel",
];

impl Block {
    pub const AIR: Block = Block(0);
    pub const STONE: Block = Block(1);
    pub const DIRT: Block = Block(2);
    pub const GRASS: Block = Block(3);
    pub const SAND: Block = Block(4);
    pub const SNOW: Block = Block(5);
    pub const WATER: Block = Block(6);
    pub const LOG: Block = Block(7);
    pub const LEAVES: Block = Block(8);
    pub const BRICK: Block = Block(9);
    pub const GLOWSTONE: Block = Block(10);
    pub const BEDROCK: Block = Block(11);
    pub const GRAVEL: Block = Block(12);

    pub fn name(self) -> &'static str {
        NAMES.get(self.0 as usize).copied().unwrap_or("stone")
    }

    /// Unknown names decode as stone so foreign terrain keeps its shape.
    pub fn from_name(name: &str) -> Block {
        let n = name.strip_prefix("minecraft:").unwrap_or(name);
        match n {
            "cave_air" | "void_air" => Block::AIR,
            "grass" => Block::GRASS,
            _ => NAMES
                .iter()
                .position(|&k| k == n)
                .map(|i| Block(i as u16))
                .unwrap_or(Block::STONE),
        }
    }

    #[inline]
    pub fn is_air(self) -> bool {
        self == Block::AIR
    }

    #[inline]
    pub fn emission(self) -> u8 {
        if self == Block::GLOWSTONE { MAX_LIGHT } else { 0 }
    }

    /// Light passes through (with the usual one-level falloff when spreading).
    #[inline]
    pub fn propagates_light(self) -> bool {
        matches!(self, Block::AIR | Block::WATER | Block::LEAVES)
    }

    /// Stops straight-down sky light at full strength.
    #[inline]
    pub fn blocks_sky_light(self) -> bool {
        !self.is_air()
    }

    #[inline]
    pub fn is_motion_blocking(self) -> bool {
        !self.is_air()
    }

    /// Solid ground: not air and not fluid or foliage.
    #[inline]
    pub fn is_solid(self) -> bool {
        !matches!(self, Block::AIR | Block::WATER | Block::LEAVES)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Biome {
    #[default]
    Plains,
    Desert,
    Forest,
    Taiga,
    SnowyPlains,
    Ocean,
    Beach,
}

impl Biome {
    pub const ALL: [Biome; 7] = [
        Biome::Plains,
        Biome::Desert,
        Biome::Forest,
        Biome::Taiga,
        Biome::SnowyPlains,
        Biome::Ocean,
        Biome::Beach,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Biome::Plains => "plains",
            Biome::Desert => "desert",
            Biome::Forest => "forest",
            Biome::Taiga => "taiga",
            Biome::SnowyPlains => "snowy_plains",
            Biome::Ocean => "ocean",
            Biome::Beach => "beach",
        }
    }

    pub fn from_name(name: &str) -> Option<Biome> {
        let n = name.strip_prefix("minecraft:").unwrap_or(name);
        Biome::ALL.iter().copied().find(|b| b.name() == n)
    }

    /// Top block and filler placed by the surface stage.
    pub fn surface_blocks(self) -> (Block, Block) {
        match self {
            Biome::Desert | Biome::Beach => (Block::SAND, Block::SAND),
            Biome::Ocean => (Block::GRAVEL, Block::GRAVEL),
            Biome::SnowyPlains => (Block::SNOW, Block::DIRT),
            Biome::Plains | Biome::Forest | Biome::Taiga => (Block::GRASS, Block::DIRT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_with_namespace() {
        for id in 0..NAMES.len() as u16 {
            let b = Block(id);
            assert_eq!(Block::from_name(&format!("minecraft:{}", b.name())), b);
        }
        assert_eq!(Block::from_name("minecraft:cave_air"), Block::AIR);
        assert_eq!(Block::from_name("minecraft:deepslate"), Block::STONE);
        assert_eq!(Biome::from_name("minecraft:snowy_plains"), Some(Biome::SnowyPlains));
        assert_eq!(Biome::from_name("minecraft:nowhere"), None);
    }

    #[test]
    fn light_properties() {
        assert_eq!(Block::GLOWSTONE.emission(), 15);
        assert!(Block::WATER.propagates_light());
        assert!(Block::WATER.blocks_sky_light());
        assert!(!Block::WATER.is_solid());
        assert!(!Block::STONE.propagates_light());
    }
}
