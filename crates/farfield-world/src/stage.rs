use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Generation stages in the order a tile passes through them.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Empty,
    StructureStart,
    StructureReference,
    Biomes,
    Noise,
    Surface,
    Carvers,
    Features,
    Light,
    Full,
}

/// Tiles below this stage never reach a result sink.
pub const MIN_DELIVERY_STAGE: Stage = Stage::Biomes;

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Empty,
        Stage::StructureStart,
        Stage::StructureReference,
        Stage::Biomes,
        Stage::Noise,
        Stage::Surface,
        Stage::Carvers,
        Stage::Features,
        Stage::Light,
        Stage::Full,
    ];

    /// Status string written to persisted records.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Empty => "empty",
            Stage::StructureStart => "structure_starts",
            Stage::StructureReference => "structure_references",
            Stage::Biomes => "biomes",
            Stage::Noise => "noise",
            Stage::Surface => "surface",
            Stage::Carvers => "carvers",
            Stage::Features => "features",
            Stage::Light => "light",
            Stage::Full => "full",
        }
    }

    /// Parses a persisted status tag. Accepts namespaced and legacy spellings.
    pub fn from_status(status: &str) -> Option<Stage> {
        let s = status.trim();
        let s = s.strip_prefix("minecraft:").unwrap_or(s);
        let stage = match s {
            "empty" => Stage::Empty,
            "structure_starts" | "structure_start" => Stage::StructureStart,
            "structure_references" | "structure_reference" => Stage::StructureReference,
            "biomes" => Stage::Biomes,
            "noise" => Stage::Noise,
            "surface" => Stage::Surface,
            "carvers" | "liquid_carvers" => Stage::Carvers,
            "features" => Stage::Features,
            "initialize_light" | "light" => Stage::Light,
            "spawn" | "heightmaps" | "full" => Stage::Full,
            _ => return None,
        };
        Some(stage)
    }

    pub fn next(self) -> Option<Stage> {
        let idx = Stage::ALL.iter().position(|s| *s == self)?;
        Stage::ALL.get(idx + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase().replace('-', "_");
        Stage::from_status(&lowered).ok_or_else(|| format!("unknown generation stage '{s}'"))
    }
}

/// One entry of the stage chain: the stage and the border radius it needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageDef {
    pub stage: Stage,
    pub border: usize,
}

/// The fixed stage order run by the stage runner. Carvers are never part of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageChain {
    defs: Vec<StageDef>,
    max_border: usize,
}

impl StageChain {
    pub const ORDER: [Stage; 6] = [
        Stage::StructureStart,
        Stage::StructureReference,
        Stage::Biomes,
        Stage::Noise,
        Stage::Surface,
        Stage::Features,
    ];

    /// `structure_border` is the context radius given to the two structure stages.
    pub fn new(structure_border: usize) -> Self {
        let defs: Vec<StageDef> = Self::ORDER
            .iter()
            .map(|&stage| StageDef {
                stage,
                border: match stage {
                    Stage::StructureStart | Stage::StructureReference => structure_border,
                    _ => 0,
                },
            })
            .collect();
        let max_border = defs.iter().map(|d| d.border).max().unwrap_or(0);
        Self { defs, max_border }
    }

    pub fn defs(&self) -> &[StageDef] {
        &self.defs
    }

    pub fn max_border(&self) -> usize {
        self.max_border
    }

    pub fn border_of(&self, stage: Stage) -> usize {
        self.defs
            .iter()
            .find(|d| d.stage == stage)
            .map(|d| d.border)
            .unwrap_or(0)
    }

    /// Slots trimmed from each side of the full window before running `def`.
    #[inline]
    pub fn trim_for(&self, def: &StageDef) -> usize {
        self.max_border - def.border
    }

    /// Stages that run for a request targeting `target`, in order. Carvers
    /// have no step of their own, so reaching them means running features.
    pub fn through(&self, target: Stage) -> impl Iterator<Item = &StageDef> {
        let target = match target {
            Stage::Carvers => Stage::Features,
            t => t,
        };
        self.defs.iter().take_while(move |d| d.stage <= target)
    }
}

impl Default for StageChain {
    fn default() -> Self {
        Self::new(0)
    }
}
