//! NaN-aware statistics and column-major (Fortran order) flattening helpers
//! shared by the estimators.

use ndarray::{Array2, ArrayView2};
use num_traits::Float;

/// Flatten a raster in column-major order (row index varies fastest).
pub fn ravel_fortran<T: Copy>(data: &ArrayView2<T>) -> Vec<T> {
    data.t().iter().copied().collect()
}

/// Number of non-NaN entries
pub fn count_valid<T: Float>(values: &[T]) -> usize {
    values.iter().filter(|v| !v.is_nan()).count()
}

/// Median of the non-NaN entries, or NaN when there are none.
///
/// An even count averages the two middle values.
pub fn nanmedian<T: Float>(values: &[T]) -> T {
    let mut valid: Vec<T> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return T::nan();
    }

    valid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = valid.len() / 2;
    if valid.len() % 2 == 1 {
        valid[mid]
    } else {
        (valid[mid - 1] + valid[mid]) / (T::one() + T::one())
    }
}

/// Element-wise f64 sum of equally shaped rasters.
///
/// NaN propagates, so a pixel missing in any input is NaN in the sum.
pub fn nan_propagating_sum<'a, I>(rasters: I, shape: (usize, usize)) -> Array2<f64>
where
    I: IntoIterator<Item = ArrayView2<'a, f32>>,
{
    let mut sum = Array2::<f64>::zeros(shape);
    for raster in rasters {
        sum.zip_mut_with(&raster, |acc, &v| *acc += v as f64);
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, ShapeBuilder};

    /// Column-major rebuild of a flattened raster
    fn unravel_fortran<T>(values: Vec<T>, shape: (usize, usize)) -> Option<Array2<T>> {
        Array2::from_shape_vec(shape.f(), values).ok()
    }

    #[test]
    fn test_ravel_is_column_major() {
        let data = array![[1, 2, 3], [4, 5, 6]];
        assert_eq!(ravel_fortran(&data.view()), vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_unravel_inverts_ravel() {
        let data = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let flat = ravel_fortran(&data.view());
        let back = unravel_fortran(flat, data.dim()).unwrap();
        assert_eq!(back, data);

        assert!(unravel_fortran(vec![1.0, 2.0], (2, 2)).is_none());
    }

    #[test]
    fn test_nanmedian() {
        assert_eq!(nanmedian(&[3.0f32, f32::NAN, 1.0, 2.0]), 2.0);
        assert_eq!(nanmedian(&[4.0f64, 1.0, f64::NAN, 3.0, 2.0]), 2.5);
        assert!(nanmedian::<f32>(&[f32::NAN, f32::NAN]).is_nan());
        assert!(nanmedian::<f64>(&[]).is_nan());
    }

    #[test]
    fn test_sum_propagates_nan() {
        let a = array![[1.0f32, f32::NAN], [2.0, 3.0]];
        let b = array![[1.0f32, 1.0], [f32::NAN, 3.0]];
        let sum = nan_propagating_sum([a.view(), b.view()], (2, 2));

        assert_eq!(sum[[0, 0]], 2.0);
        assert!(sum[[0, 1]].is_nan());
        assert!(sum[[1, 0]].is_nan());
        assert_eq!(sum[[1, 1]], 6.0);
        assert_eq!(count_valid(sum.as_slice().unwrap()), 2);
    }
}
