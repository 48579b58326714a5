//! Vector record: a fixed-dimensional value with identity and metadata.
//!
//! Records are immutable once written to the list; "update" is
//! delete+insert. The binary layout is a compatibility contract, see
//! [`codec`].

mod codec;
mod compression;

pub use compression::Precision;

use crate::distance::DistanceCalculator;
use crate::error::{Error, Result};
use crate::simd;
use serde::{Deserialize, Serialize};
use std::io::Read;
use uuid::Uuid;

/// Fixed-typed metadata carried by every vector record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VectorAttributes {
    /// Caller-assigned priority.
    pub priority: i8,
    /// Owning user.
    pub user_id: u32,
    /// Owning organization.
    pub org_id: u32,
}

/// A vector record in the database.
///
/// A record consists of:
/// - A stable 128-bit identifier, assigned on creation
/// - An ordered sequence of 32-bit floats of fixed dimensionality
/// - A small set of user tag codes plus typed attributes
/// - Optionally, the original source text the values embed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    /// Unique identifier, assigned on creation.
    pub id: Uuid,

    /// The vector components. Never empty.
    values: Vec<f32>,

    /// User tag codes.
    pub tags: Vec<u16>,

    /// Typed metadata.
    pub attributes: VectorAttributes,

    /// Original source text, when the values came from an embedding.
    pub original_text: Option<String>,
}

impl Vector {
    /// Creates a new record with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `values` is empty.
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::InvalidArgument(
                "vector must have at least one dimension".into(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            values,
            tags: Vec::new(),
            attributes: VectorAttributes::default(),
            original_text: None,
        })
    }

    /// Creates a new record carrying the text its values embed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `values` is empty.
    pub fn with_text(values: Vec<f32>, text: impl Into<String>) -> Result<Self> {
        let mut v = Self::new(values)?;
        v.original_text = Some(text.into());
        Ok(v)
    }

    /// Decodes a record from its binary form.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` on a corrupt or truncated record.
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        codec::read_record(&mut cursor)
    }

    /// Decodes a record from a reader.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` on a corrupt record, `Io` on read failure.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        codec::read_record(reader)
    }

    /// Encodes the record into its binary form.
    ///
    /// The layout is a compatibility contract; see [`codec`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the record carries more than `u16::MAX`
    /// tags.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(codec::encoded_len_hint(self));
        codec::write_record(self, &mut out)?;
        Ok(out)
    }

    /// Encodes the record with the values section compressed.
    ///
    /// `Full` round-trips exactly; `Half` decodes within 1e-3 per component,
    /// `Quantized8` within 1e-2.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the record carries more than `u16::MAX`
    /// tags.
    pub fn to_compressed_binary(&self, precision: Precision) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(codec::encoded_len_hint(self));
        codec::write_compressed_record(self, precision, &mut out)?;
        Ok(out)
    }

    /// Decodes a record produced by [`Self::to_compressed_binary`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` on a corrupt record or unknown precision tag.
    pub fn from_compressed_binary(bytes: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        codec::read_compressed_record(&mut cursor)
    }

    /// Returns the vector components.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Returns the dimensionality.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Elementwise sum. The result is a fresh record (new id, no metadata).
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the operands differ in length.
    pub fn try_add(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |a, b| a + b)
    }

    /// Elementwise difference. The result is a fresh record.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the operands differ in length.
    pub fn try_sub(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Divides every component by `scalar`. The result is a fresh record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when `scalar` is zero or non-finite.
    pub fn div_scalar(&self, scalar: f32) -> Result<Self> {
        if scalar == 0.0 || !scalar.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "cannot divide vector by {scalar}"
            )));
        }
        Self::new(self.values.iter().map(|v| v / scalar).collect())
    }

    /// Returns the L2 magnitude.
    #[must_use]
    pub fn magnitude(&self) -> f32 {
        simd::squared_norm(&self.values).sqrt()
    }

    /// Computes the distance to `other` under `calc`.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the records differ in length.
    pub fn distance(&self, other: &Self, calc: DistanceCalculator) -> Result<f32> {
        calc.distance(&self.values, &other.values)
    }

    /// Computes distances to many records in one batch pass.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` on the first record with a different
    /// length.
    pub fn batch_distance(&self, others: &[Self], calc: DistanceCalculator) -> Result<Vec<f32>> {
        let targets: Vec<&[f32]> = others.iter().map(|v| v.values.as_slice()).collect();
        calc.distances(&self.values, &targets)
    }

    fn zip_with(&self, other: &Self, f: impl Fn(f32, f32) -> f32) -> Result<Self> {
        if self.values.len() != other.values.len() {
            return Err(Error::DimensionMismatch {
                expected: self.values.len(),
                actual: other.values.len(),
            });
        }
        Self::new(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        )
    }
}
