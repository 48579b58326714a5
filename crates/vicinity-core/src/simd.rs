//! Explicit SIMD kernels using the `wide` crate for portable vectorization.
//!
//! These are the hot primitives behind the batch distance path: 8-wide f32
//! lanes with a scalar tail for the remainder. The `wide` crate selects the
//! best instruction set per platform (AVX2/SSE on `x86_64`, NEON on
//! `aarch64`, SIMD128 on WASM) without any code changes here.

use wide::f32x8;

/// Computes dot product using explicit SIMD (8-wide f32 lanes).
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let simd_len = a.len() / 8;
    let remainder = a.len() % 8;

    let mut sum = f32x8::ZERO;

    for i in 0..simd_len {
        let offset = i * 8;
        let va = f32x8::from(&a[offset..offset + 8]);
        let vb = f32x8::from(&b[offset..offset + 8]);
        sum = va.mul_add(vb, sum);
    }

    let mut result = sum.reduce_add();

    let base = simd_len * 8;
    for i in 0..remainder {
        result += a[base + i] * b[base + i];
    }

    result
}

/// Computes squared L2 distance using explicit SIMD.
///
/// Avoids the sqrt for comparison purposes (faster when only ranking matters).
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn squared_l2_distance(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let simd_len = a.len() / 8;
    let remainder = a.len() % 8;

    let mut sum = f32x8::ZERO;

    for i in 0..simd_len {
        let offset = i * 8;
        let va = f32x8::from(&a[offset..offset + 8]);
        let vb = f32x8::from(&b[offset..offset + 8]);
        let diff = va - vb;
        sum = diff.mul_add(diff, sum);
    }

    let mut result = sum.reduce_add();

    let base = simd_len * 8;
    for i in 0..remainder {
        let diff = a[base + i] - b[base + i];
        result += diff * diff;
    }

    result
}

/// Computes euclidean distance using explicit SIMD.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    squared_l2_distance(a, b).sqrt()
}

/// Computes the squared L2 norm using explicit SIMD.
#[inline]
#[must_use]
pub fn squared_norm(a: &[f32]) -> f32 {
    let simd_len = a.len() / 8;
    let remainder = a.len() % 8;

    let mut sum = f32x8::ZERO;

    for i in 0..simd_len {
        let offset = i * 8;
        let va = f32x8::from(&a[offset..offset + 8]);
        sum = va.mul_add(va, sum);
    }

    let mut result = sum.reduce_add();

    let base = simd_len * 8;
    for i in 0..remainder {
        result += a[base + i] * a[base + i];
    }

    result
}

/// Computes cosine similarity with a single fused SIMD pass.
///
/// Accumulates `dot(a,b)`, `norm(a)²` and `norm(b)²` in one loop, then
/// combines: `dot / (sqrt(norm_a) * sqrt(norm_b))`. Zero-norm inputs yield
/// a similarity of 0.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let simd_len = a.len() / 8;
    let remainder = a.len() % 8;

    let mut dot = f32x8::ZERO;
    let mut norm_a = f32x8::ZERO;
    let mut norm_b = f32x8::ZERO;

    for i in 0..simd_len {
        let offset = i * 8;
        let va = f32x8::from(&a[offset..offset + 8]);
        let vb = f32x8::from(&b[offset..offset + 8]);
        dot = va.mul_add(vb, dot);
        norm_a = va.mul_add(va, norm_a);
        norm_b = vb.mul_add(vb, norm_b);
    }

    let mut dot_sum = dot.reduce_add();
    let mut norm_a_sum = norm_a.reduce_add();
    let mut norm_b_sum = norm_b.reduce_add();

    let base = simd_len * 8;
    for i in 0..remainder {
        dot_sum += a[base + i] * b[base + i];
        norm_a_sum += a[base + i] * a[base + i];
        norm_b_sum += b[base + i] * b[base + i];
    }

    if norm_a_sum == 0.0 || norm_b_sum == 0.0 {
        return 0.0;
    }

    dot_sum / (norm_a_sum.sqrt() * norm_b_sum.sqrt())
}

/// Computes Manhattan (L1) distance using explicit SIMD.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn manhattan_distance(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let simd_len = a.len() / 8;
    let remainder = a.len() % 8;

    let mut sum = f32x8::ZERO;

    for i in 0..simd_len {
        let offset = i * 8;
        let va = f32x8::from(&a[offset..offset + 8]);
        let vb = f32x8::from(&b[offset..offset + 8]);
        sum += (va - vb).abs();
    }

    let mut result = sum.reduce_add();

    let base = simd_len * 8;
    for i in 0..remainder {
        result += (a[base + i] - b[base + i]).abs();
    }

    result
}

/// Computes Chebyshev (L∞) distance using explicit SIMD.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn chebyshev_distance(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let simd_len = a.len() / 8;
    let remainder = a.len() % 8;

    let mut max = f32x8::ZERO;

    for i in 0..simd_len {
        let offset = i * 8;
        let va = f32x8::from(&a[offset..offset + 8]);
        let vb = f32x8::from(&b[offset..offset + 8]);
        max = max.max((va - vb).abs());
    }

    // Horizontal max across the 8 lanes
    let mut result = max
        .to_array()
        .into_iter()
        .fold(0.0f32, |acc, lane| acc.max(lane));

    let base = simd_len * 8;
    for i in 0..remainder {
        result = result.max((a[base + i] - b[base + i]).abs());
    }

    result
}
