//! Values-section compression for the record codec.
//!
//! Three precisions are supported:
//!
//! | Precision | Bytes/component | Decoding error |
//! |-----------|-----------------|----------------|
//! | Full      | 4               | exact          |
//! | Half      | 2 (IEEE binary16, `half::f16`) | <= 1e-3 |
//! | Quantized8| 1 (+8 per vector for min/scale) | <= 1e-2 |

use crate::error::{Error, Result};
use half::f16;
use std::io::{Read, Write};

/// Precision of the compressed values section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// 32-bit floats, exact round-trip.
    Full,
    /// IEEE 754 binary16.
    Half,
    /// Linear 8-bit range encoding with per-vector min/scale.
    Quantized8,
}

impl Precision {
    /// One-byte wire tag.
    #[must_use]
    pub(super) const fn tag(self) -> u8 {
        match self {
            Self::Full => 0,
            Self::Half => 1,
            Self::Quantized8 => 2,
        }
    }

    pub(super) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Full),
            1 => Ok(Self::Half),
            2 => Ok(Self::Quantized8),
            other => Err(Error::InvalidFormat(format!(
                "unknown precision tag {other}"
            ))),
        }
    }
}

/// Writes `dim (4 LE)` followed by the values at the given precision.
pub(super) fn write_values<W: Write>(
    values: &[f32],
    precision: Precision,
    writer: &mut W,
) -> Result<()> {
    let dim = u32::try_from(values.len())
        .map_err(|_| Error::InvalidArgument("vector dimension exceeds u32".into()))?;
    writer.write_all(&dim.to_le_bytes())?;

    match precision {
        Precision::Full => {
            for value in values {
                writer.write_all(&value.to_le_bytes())?;
            }
        }
        Precision::Half => {
            for value in values {
                writer.write_all(&f16::from_f32(*value).to_le_bytes())?;
            }
        }
        Precision::Quantized8 => {
            let min = values.iter().copied().fold(f32::INFINITY, f32::min);
            let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let scale = if max > min { (max - min) / 255.0 } else { 0.0 };

            writer.write_all(&min.to_le_bytes())?;
            writer.write_all(&scale.to_le_bytes())?;
            for value in values {
                let code = if scale > 0.0 {
                    ((value - min) / scale).round().clamp(0.0, 255.0) as u8
                } else {
                    0
                };
                writer.write_all(&[code])?;
            }
        }
    }
    Ok(())
}

/// Reads a values section written by [`write_values`].
pub(super) fn read_values<R: Read>(precision: Precision, reader: &mut R) -> Result<Vec<f32>> {
    let mut four = [0u8; 4];
    reader.read_exact(&mut four)?;
    let dim = u32::from_le_bytes(four) as usize;

    let mut values = Vec::with_capacity(dim);
    match precision {
        Precision::Full => {
            for _ in 0..dim {
                reader.read_exact(&mut four)?;
                values.push(f32::from_le_bytes(four));
            }
        }
        Precision::Half => {
            let mut two = [0u8; 2];
            for _ in 0..dim {
                reader.read_exact(&mut two)?;
                values.push(f16::from_le_bytes(two).to_f32());
            }
        }
        Precision::Quantized8 => {
            reader.read_exact(&mut four)?;
            let min = f32::from_le_bytes(four);
            reader.read_exact(&mut four)?;
            let scale = f32::from_le_bytes(four);

            let mut byte = [0u8; 1];
            for _ in 0..dim {
                reader.read_exact(&mut byte)?;
                values.push(min + f32::from(byte[0]) * scale);
            }
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Vector;

    fn unit_range_vector() -> Vector {
        Vector::new((0..64).map(|i| (i as f32 / 63.0) - 0.5).collect()).unwrap()
    }

    #[test]
    fn test_full_round_trip_is_exact() {
        let v = unit_range_vector();
        let bytes = v.to_compressed_binary(Precision::Full).unwrap();
        let decoded = Vector::from_compressed_binary(&bytes).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn test_half_round_trip_within_tolerance() {
        let v = unit_range_vector();
        let bytes = v.to_compressed_binary(Precision::Half).unwrap();
        let decoded = Vector::from_compressed_binary(&bytes).unwrap();
        for (a, b) in v.values().iter().zip(decoded.values()) {
            assert!((a - b).abs() <= 1e-3, "half error too large: {a} vs {b}");
        }
        assert_eq!(decoded.id, v.id);
    }

    #[test]
    fn test_quantized8_round_trip_within_tolerance() {
        let v = unit_range_vector();
        let bytes = v.to_compressed_binary(Precision::Quantized8).unwrap();
        let decoded = Vector::from_compressed_binary(&bytes).unwrap();
        for (a, b) in v.values().iter().zip(decoded.values()) {
            assert!((a - b).abs() <= 1e-2, "q8 error too large: {a} vs {b}");
        }
    }

    #[test]
    fn test_quantized8_constant_vector() {
        let v = Vector::new(vec![2.5; 16]).unwrap();
        let bytes = v.to_compressed_binary(Precision::Quantized8).unwrap();
        let decoded = Vector::from_compressed_binary(&bytes).unwrap();
        for b in decoded.values() {
            assert!((b - 2.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_compressed_is_smaller() {
        let v = unit_range_vector();
        let full = v.to_compressed_binary(Precision::Full).unwrap().len();
        let half = v.to_compressed_binary(Precision::Half).unwrap().len();
        let q8 = v.to_compressed_binary(Precision::Quantized8).unwrap().len();
        assert!(half < full);
        assert!(q8 < half);
    }

    #[test]
    fn test_unknown_precision_tag() {
        let v = Vector::new(vec![1.0]).unwrap();
        let mut bytes = v.to_compressed_binary(Precision::Full).unwrap();
        // The precision tag sits right after the prefix; corrupt it.
        let tag_pos = bytes.len() - 4 - 4 - 1;
        bytes[tag_pos] = 9;
        assert!(Vector::from_compressed_binary(&bytes).is_err());
    }
}
