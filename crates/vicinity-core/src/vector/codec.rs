//! Binary codec for vector records.
//!
//! The uncompressed layout is a compatibility contract:
//!
//! ```text
//! id (16) | priority (1) | user_id (4 LE) | org_id (4 LE)
//! | tag_count (2 LE) | tags (2 LE each)
//! | text_len (LEB128 varint) | text (UTF-8)
//! | dim (4 LE) | values (4 LE each)
//! ```
//!
//! The compressed layout shares the prefix up to the text section, then
//! carries a one-byte precision tag followed by the values section encoded
//! by [`super::compression`].

use super::compression::{self, Precision};
use super::{Vector, VectorAttributes};
use crate::error::{Error, Result};
use std::io::{Read, Write};
use uuid::Uuid;

/// Rough encoded-size estimate used to pre-size output buffers.
pub(super) fn encoded_len_hint(v: &Vector) -> usize {
    16 + 9
        + 2
        + v.tags.len() * 2
        + 5
        + v.original_text.as_ref().map_or(0, String::len)
        + 4
        + v.values().len() * 4
}

/// Writes the record in the uncompressed contract layout.
pub(super) fn write_record<W: Write>(v: &Vector, writer: &mut W) -> Result<()> {
    write_prefix(v, writer)?;
    let dim = u32::try_from(v.values().len())
        .map_err(|_| Error::InvalidArgument("vector dimension exceeds u32".into()))?;
    writer.write_all(&dim.to_le_bytes())?;
    for value in v.values() {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Writes the record with a compressed values section.
pub(super) fn write_compressed_record<W: Write>(
    v: &Vector,
    precision: Precision,
    writer: &mut W,
) -> Result<()> {
    write_prefix(v, writer)?;
    writer.write_all(&[precision.tag()])?;
    compression::write_values(v.values(), precision, writer)
}

/// Reads a record in the uncompressed contract layout.
pub(super) fn read_record<R: Read>(reader: &mut R) -> Result<Vector> {
    let (id, attributes, tags, original_text) = read_prefix(reader)?;
    let dim = read_u32(reader)? as usize;
    if dim == 0 {
        return Err(Error::InvalidFormat("record with zero dimension".into()));
    }

    let mut values = Vec::with_capacity(dim);
    let mut buf = [0u8; 4];
    for _ in 0..dim {
        reader.read_exact(&mut buf)?;
        values.push(f32::from_le_bytes(buf));
    }

    Ok(Vector {
        id,
        values,
        tags,
        attributes,
        original_text,
    })
}

/// Reads a record with a compressed values section.
pub(super) fn read_compressed_record<R: Read>(reader: &mut R) -> Result<Vector> {
    let (id, attributes, tags, original_text) = read_prefix(reader)?;

    let mut tag = [0u8; 1];
    reader.read_exact(&mut tag)?;
    let precision = Precision::from_tag(tag[0])?;
    let values = compression::read_values(precision, reader)?;
    if values.is_empty() {
        return Err(Error::InvalidFormat("record with zero dimension".into()));
    }

    Ok(Vector {
        id,
        values,
        tags,
        attributes,
        original_text,
    })
}

fn write_prefix<W: Write>(v: &Vector, writer: &mut W) -> Result<()> {
    writer.write_all(v.id.as_bytes())?;
    writer.write_all(&v.attributes.priority.to_le_bytes())?;
    writer.write_all(&v.attributes.user_id.to_le_bytes())?;
    writer.write_all(&v.attributes.org_id.to_le_bytes())?;

    let tag_count = u16::try_from(v.tags.len())
        .map_err(|_| Error::InvalidArgument("record carries more than 65535 tags".into()))?;
    writer.write_all(&tag_count.to_le_bytes())?;
    for tag in &v.tags {
        writer.write_all(&tag.to_le_bytes())?;
    }

    match &v.original_text {
        Some(text) => {
            let len = u32::try_from(text.len())
                .map_err(|_| Error::InvalidArgument("original text exceeds u32 bytes".into()))?;
            write_varint(len, writer)?;
            writer.write_all(text.as_bytes())?;
        }
        None => write_varint(0, writer)?,
    }

    Ok(())
}

type Prefix = (Uuid, VectorAttributes, Vec<u16>, Option<String>);

fn read_prefix<R: Read>(reader: &mut R) -> Result<Prefix> {
    let mut id_bytes = [0u8; 16];
    reader.read_exact(&mut id_bytes)?;
    let id = Uuid::from_bytes(id_bytes);

    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    let priority = i8::from_le_bytes(byte);
    let user_id = read_u32(reader)?;
    let org_id = read_u32(reader)?;

    let mut two = [0u8; 2];
    reader.read_exact(&mut two)?;
    let tag_count = u16::from_le_bytes(two) as usize;
    let mut tags = Vec::with_capacity(tag_count);
    for _ in 0..tag_count {
        reader.read_exact(&mut two)?;
        tags.push(u16::from_le_bytes(two));
    }

    let text_len = read_varint(reader)? as usize;
    let original_text = if text_len == 0 {
        None
    } else {
        let mut buf = vec![0u8; text_len];
        reader.read_exact(&mut buf)?;
        Some(
            String::from_utf8(buf)
                .map_err(|_| Error::InvalidFormat("record text is not valid UTF-8".into()))?,
        )
    };

    Ok((
        id,
        VectorAttributes {
            priority,
            user_id,
            org_id,
        },
        tags,
        original_text,
    ))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// LEB128 unsigned varint encoding, 1-5 bytes for a u32.
fn write_varint<W: Write>(mut value: u32, writer: &mut W) -> Result<()> {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        writer.write_all(&[byte])?;
        if value == 0 {
            return Ok(());
        }
    }
}

fn read_varint<R: Read>(reader: &mut R) -> Result<u32> {
    let mut value: u32 = 0;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        if shift >= 32 {
            return Err(Error::InvalidFormat("varint overflows u32".into()));
        }
        value |= u32::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vector {
        let mut v = Vector::with_text(vec![0.25, -1.5, 3.75], "hello vectors").unwrap();
        v.tags = vec![7, 42, 1000];
        v.attributes = VectorAttributes {
            priority: -3,
            user_id: 12,
            org_id: 99,
        };
        v
    }

    #[test]
    fn test_round_trip_full() {
        let v = sample();
        let bytes = v.to_binary().unwrap();
        let decoded = Vector::from_binary(&bytes).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn test_round_trip_without_text() {
        let v = Vector::new(vec![1.0, 2.0]).unwrap();
        let decoded = Vector::from_binary(&v.to_binary().unwrap()).unwrap();
        assert_eq!(decoded, v);
        assert!(decoded.original_text.is_none());
    }

    #[test]
    fn test_layout_is_stable() {
        let v = sample();
        let bytes = v.to_binary().unwrap();

        // id | attributes | tag_count
        assert_eq!(&bytes[0..16], v.id.as_bytes());
        assert_eq!(bytes[16] as i8, -3);
        assert_eq!(u32::from_le_bytes(bytes[17..21].try_into().unwrap()), 12);
        assert_eq!(u32::from_le_bytes(bytes[21..25].try_into().unwrap()), 99);
        assert_eq!(u16::from_le_bytes(bytes[25..27].try_into().unwrap()), 3);
    }

    #[test]
    fn test_truncated_record_fails() {
        let v = sample();
        let bytes = v.to_binary().unwrap();
        assert!(Vector::from_binary(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_from_reader() {
        let v = sample();
        let bytes = v.to_binary().unwrap();
        let mut reader = std::io::Cursor::new(bytes);
        assert_eq!(Vector::from_reader(&mut reader).unwrap(), v);
    }

    #[test]
    fn test_varint_round_trip() {
        for value in [0u32, 1, 127, 128, 300, 65_535, u32::MAX] {
            let mut buf = Vec::new();
            write_varint(value, &mut buf).unwrap();
            let mut cursor = std::io::Cursor::new(buf);
            assert_eq!(read_varint(&mut cursor).unwrap(), value);
        }
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_record_round_trips(
            values in proptest::collection::vec(-1000.0f32..1000.0, 1..64),
            tags in proptest::collection::vec(any::<u16>(), 0..8),
            priority in any::<i8>(),
            user_id in any::<u32>(),
            text in proptest::option::of("[a-zA-Z0-9 ]{1,40}"),
        ) {
            let mut v = Vector::new(values).unwrap();
            v.tags = tags;
            v.attributes = VectorAttributes {
                priority,
                user_id,
                org_id: user_id.wrapping_mul(3),
            };
            v.original_text = text;

            let decoded = Vector::from_binary(&v.to_binary().unwrap()).unwrap();
            prop_assert_eq!(decoded, v);
        }
    }
}
