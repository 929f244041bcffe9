//! Linear-offset arithmetic over n-dimensional row-major shapes.
//!
//! All multiplications are checked; overflow surfaces as
//! [`FormatError::DimensionOverflow`] rather than wrapping.

use crate::error::FormatError;

/// Row-major strides for `shape`: `s[rank-1] = 1`,
/// `s[i] = s[i+1] * shape[i+1]`.
pub fn strides(shape: &[u64]) -> Result<Vec<u64>, FormatError> {
    let rank = shape.len();
    let mut s = vec![1u64; rank];
    for i in (0..rank.saturating_sub(1)).rev() {
        s[i] = s[i + 1]
            .checked_mul(shape[i + 1])
            .ok_or(FormatError::DimensionOverflow)?;
    }
    Ok(s)
}

/// Convert a linear element index into a multi-index within `shape`.
pub fn linear_to_index(linear: u64, shape: &[u64]) -> Vec<u64> {
    let rank = shape.len();
    let mut index = vec![0u64; rank];
    let mut remaining = linear;
    for d in (0..rank).rev() {
        if shape[d] == 0 {
            return index;
        }
        index[d] = remaining % shape[d];
        remaining /= shape[d];
    }
    index
}

/// Convert a multi-index within `shape` into a linear element index.
pub fn index_to_linear(index: &[u64], shape: &[u64]) -> Result<u64, FormatError> {
    debug_assert_eq!(index.len(), shape.len());
    let s = strides(shape)?;
    let mut linear = 0u64;
    for (d, &i) in index.iter().enumerate() {
        let term = i
            .checked_mul(s[d])
            .ok_or(FormatError::DimensionOverflow)?;
        linear = linear
            .checked_add(term)
            .ok_or(FormatError::DimensionOverflow)?;
    }
    Ok(linear)
}

/// Checked product of a shape, in elements.
pub fn element_count(shape: &[u64]) -> Result<u64, FormatError> {
    shape.iter().try_fold(1u64, |acc, &d| {
        acc.checked_mul(d).ok_or(FormatError::DimensionOverflow)
    })
}
