//! Simple array statistics functions

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Find the index of the maximum element in an array, NaN elements are skipped
pub fn argmax(arr: ArrayView1<f64>) -> Option<usize> {
    arr.iter()
        .enumerate()
        .filter(|(_, x)| !x.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (idx, &val)| match best {
            Some((_, max_val)) if max_val >= val => best,
            _ => Some((idx, val)),
        })
        .map(|(idx, _)| idx)
}

/// Mean of every column
pub fn column_mean(samples: ArrayView2<f64>) -> Option<Array1<f64>> {
    samples.mean_axis(Axis(0))
}

/// Unbiased sample covariance of the columns, `None` for fewer than two rows
pub fn covariance(samples: ArrayView2<f64>) -> Option<Array2<f64>> {
    let n = samples.nrows();
    if n < 2 {
        return None;
    }
    let mean = column_mean(samples)?;
    let centered = &samples - &mean;
    Some(centered.t().dot(&centered) / (n - 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_argmax_basic() {
        assert_eq!(argmax(array![1.0, 3.0, 2.0, 5.0, 4.0].view()), Some(3));
    }

    #[test]
    fn test_argmax_first_of_equal() {
        assert_eq!(argmax(array![5.0, 1.0, 5.0].view()), Some(0));
    }

    #[test]
    fn test_argmax_skips_nan_and_infinity() {
        assert_eq!(
            argmax(array![f64::NAN, f64::NEG_INFINITY, -1.0].view()),
            Some(2)
        );
        assert_eq!(argmax(array![f64::NEG_INFINITY].view()), Some(0));
    }

    #[test]
    fn test_argmax_empty() {
        let arr: Array1<f64> = Array1::from(vec![]);
        assert_eq!(argmax(arr.view()), None);
    }

    #[test]
    fn test_covariance() {
        let samples = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let cov = covariance(samples.view()).unwrap();
        assert_abs_diff_eq!(cov, array![[1.0, 2.0], [2.0, 4.0]], epsilon = 1e-12);
        assert!(covariance(array![[1.0, 2.0]].view()).is_none());
    }
}
