//! Quantized indexes: binary (sign/threshold) and product (k-means
//! sub-codebooks) quantization.

mod binary;
mod product;

pub use binary::{hamming_distance, quantize, BinaryQuantizationIndex};
pub use product::ProductQuantizationIndex;
