use ndarray::{Array1, ArrayView1};
use std::ops::Deref;

// Underlying array is guaranteed to be sorted, contiguous and non-empty
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SortedArray(Array1<f64>);

impl SortedArray {
    pub fn maximum(&self) -> f64 {
        self[self.len() - 1]
    }

    pub fn minimum(&self) -> f64 {
        self[0]
    }

    pub fn median(&self) -> f64 {
        let i = (self.len() - 1) / 2;
        if self.len() % 2 == 0 {
            0.5 * (self[i] + self[i + 1])
        } else {
            self[i]
        }
    }

    // R-5 from https://en.wikipedia.org/wiki/Quantile
    pub fn ppf(&self, q: f64) -> f64 {
        assert!(
            (0.0..=1.0).contains(&q),
            "quantile should be between zero and unity"
        );
        let h = (self.len() as f64) * q - 0.5;
        let h_floor = h.floor();
        if h_floor < 0.0 {
            self.minimum()
        } else {
            #[allow(clippy::cast_sign_loss)]
            let i = h_floor as usize;
            if i >= self.len() - 1 {
                self.maximum()
            } else {
                self[i] + (h - h_floor) * (self[i + 1] - self[i])
            }
        }
    }
}

impl TryFrom<Vec<f64>> for SortedArray {
    type Error = ();

    /// Fails for empty input
    fn try_from(mut v: Vec<f64>) -> Result<Self, ()> {
        if v.is_empty() {
            return Err(());
        }
        v.sort_unstable_by(f64::total_cmp);
        Ok(Self(Array1::from_vec(v)))
    }
}

impl TryFrom<ArrayView1<'_, f64>> for SortedArray {
    type Error = ();

    fn try_from(v: ArrayView1<'_, f64>) -> Result<Self, ()> {
        v.to_vec().try_into()
    }
}

impl Deref for SortedArray {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        // Constructed from a Vec, so always in standard layout
        self.0.as_slice().unwrap_or(&[])
    }
}

#[allow(clippy::float_cmp)]
#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use rand::prelude::*;

    fn random_sorted(rng: &mut StdRng, n: usize) -> SortedArray {
        (0..n)
            .map(|_| rng.random::<f64>())
            .collect::<Vec<_>>()
            .try_into()
            .unwrap()
    }

    #[test]
    fn median_is_ppf_half() {
        let mut rng = StdRng::seed_from_u64(0);
        for i in 0..10 {
            let a = random_sorted(&mut rng, 100 + i);
            assert_eq!(a.median(), a.ppf(0.5));
        }
    }

    #[test]
    fn extremes_are_ppf_zero_and_unity() {
        let mut rng = StdRng::seed_from_u64(1);
        for i in 0..10 {
            let a = random_sorted(&mut rng, 100 + i);
            assert_eq!(a.minimum(), a.ppf(0.0));
            assert_eq!(a.maximum(), a.ppf(1.0));
        }
    }

    #[test]
    fn ppf_tenths() {
        let a = SortedArray::try_from(Array1::linspace(0.0, 1.0, 11).view()).unwrap();
        let actual: Array1<f64> = Array1::linspace(0.0, 1.0, 11).mapv(|q| a.ppf(q));
        // from scipy.stats.mstats import mquantiles
        // mquantiles(np.linspace(0, 1, 11), prob=np.linspace(0, 1, 11), alphap=0.5, betap=0.5)
        let desired = Array1::from(vec![
            0., 0.06, 0.17, 0.28, 0.39, 0.5, 0.61, 0.72, 0.83, 0.94, 1.,
        ]);
        assert_abs_diff_eq!(actual, desired, epsilon = 1e-7);
    }

    #[test]
    fn empty_is_rejected() {
        assert!(SortedArray::try_from(vec![]).is_err());
    }
}
