use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed record: {0}")]
    Nbt(#[from] fastnbt::error::Error),
    #[error("unexpected shape: {0}")]
    Shape(&'static str),
    #[error("palette index {index} out of range for palette of {len}")]
    PaletteIndex { index: u32, len: usize },
    #[error("packed array has {actual} longs, expected {expected}")]
    PackedLength { expected: usize, actual: usize },
}
