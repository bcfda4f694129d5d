//! Bit-packed index arrays. Entries never straddle two longs.

use crate::error::DecodeError;

#[inline]
pub fn ceil_log2(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

/// Block palettes never pack tighter than 4 bits.
#[inline]
pub fn block_bits(palette_len: usize) -> u32 {
    ceil_log2(palette_len).max(4)
}

#[inline]
pub fn biome_bits(palette_len: usize) -> u32 {
    ceil_log2(palette_len)
}

/// Height values range over `0..=height`.
#[inline]
pub fn heightmap_bits(height: usize) -> u32 {
    ceil_log2(height + 1)
}

#[inline]
fn packed_len(count: usize, bits: u32) -> usize {
    let per_long = (64 / bits) as usize;
    count.div_ceil(per_long)
}

pub fn unpack(data: &[i64], bits: u32, count: usize) -> Result<Vec<u32>, DecodeError> {
    if bits == 0 {
        return Ok(vec![0; count]);
    }
    if bits > 32 {
        return Err(DecodeError::Shape("packed entry wider than 32 bits"));
    }
    let expected = packed_len(count, bits);
    if data.len() != expected {
        return Err(DecodeError::PackedLength {
            expected,
            actual: data.len(),
        });
    }
    let per_long = (64 / bits) as usize;
    let mask = (1u64 << bits) - 1;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let word = data[i / per_long] as u64;
        let shift = (i % per_long) as u32 * bits;
        out.push(((word >> shift) & mask) as u32);
    }
    Ok(out)
}

pub fn pack(values: &[u32], bits: u32) -> Vec<i64> {
    if bits == 0 {
        return Vec::new();
    }
    let per_long = (64 / bits) as usize;
    let mask = (1u64 << bits) - 1;
    let mut out = vec![0u64; packed_len(values.len(), bits)];
    for (i, &v) in values.iter().enumerate() {
        let shift = (i % per_long) as u32 * bits;
        out[i / per_long] |= (u64::from(v) & mask) << shift;
    }
    out.into_iter().map(|w| w as i64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_widths() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(16), 4);
        assert_eq!(block_bits(2), 4);
        assert_eq!(block_bits(17), 5);
        assert_eq!(heightmap_bits(384), 9);
    }

    #[test]
    fn entries_do_not_span_longs() {
        // 5 bits: 12 entries per long, 4 bits of padding
        let values: Vec<u32> = (0..4096).map(|i| (i % 31) as u32).collect();
        let packed = pack(&values, 5);
        assert_eq!(packed.len(), 342);
        assert_eq!(unpack(&packed, 5, 4096).unwrap(), values);
    }

    #[test]
    fn wrong_length_is_reported() {
        let err = unpack(&[0; 3], 4, 4096).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::PackedLength {
                expected: 256,
                actual: 3
            }
        ));
        assert_eq!(unpack(&[], 0, 64).unwrap(), vec![0; 64]);
    }
}
