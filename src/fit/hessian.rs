use crate::fit::LogPosterior;
use crate::params::Bounds;

use nalgebra::DMatrix;
use ndarray::Array2;

/// Covariance matrix as the inverse of the finite-difference Hessian of the negative
/// log-likelihood at `x`
///
/// `steps` are the absolute finite-difference steps. The stencil centre is moved inside the
/// bounds when `x` is closer than one step to a bound. Returns the reason of failure as a
/// message, it ends up in a warning of the fit result.
pub(super) fn hessian_covariance<P: LogPosterior + ?Sized>(
    posterior: &P,
    x: &[f64],
    steps: &[f64],
    bounds: &[Bounds],
) -> Result<Array2<f64>, String> {
    let ndim = x.len();
    let centre: Vec<f64> = x
        .iter()
        .zip(steps)
        .zip(bounds)
        .map(|((&x, &h), b)| {
            if b.upper - b.lower > 2.0 * h {
                x.clamp(b.lower + h, b.upper - h)
            } else {
                x
            }
        })
        .collect();

    let mut point = centre.clone();
    let mut nll = |shifts: &[(usize, f64)]| -> Result<f64, String> {
        point.copy_from_slice(&centre);
        for &(i, shift) in shifts {
            point[i] += shift;
        }
        match posterior.ln_likelihood(&point) {
            Ok(value) if value.is_finite() => Ok(-value),
            Ok(value) => Err(format!("log-likelihood is {value} near the best fit")),
            Err(err) => Err(err.to_string()),
        }
    };

    let f0 = nll(&[])?;
    let mut hessian = DMatrix::<f64>::zeros(ndim, ndim);
    for i in 0..ndim {
        let hi = steps[i];
        let plus = nll(&[(i, hi)])?;
        let minus = nll(&[(i, -hi)])?;
        hessian[(i, i)] = (plus - 2.0 * f0 + minus) / (hi * hi);
        for j in 0..i {
            let hj = steps[j];
            let pp = nll(&[(i, hi), (j, hj)])?;
            let pm = nll(&[(i, hi), (j, -hj)])?;
            let mp = nll(&[(i, -hi), (j, hj)])?;
            let mm = nll(&[(i, -hi), (j, -hj)])?;
            let value = (pp - pm - mp + mm) / (4.0 * hi * hj);
            hessian[(i, j)] = value;
            hessian[(j, i)] = value;
        }
    }
    if hessian.iter().any(|h| !h.is_finite()) {
        return Err("Hessian has non-finite elements".to_owned());
    }

    let cholesky = hessian
        .cholesky()
        .ok_or_else(|| "Hessian is not positive definite".to_owned())?;
    let inverse = cholesky.inverse();
    Ok(Array2::from_shape_fn((ndim, ndim), |(i, j)| inverse[(i, j)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::tests::GaussianPosterior;

    use approx::assert_relative_eq;

    #[test]
    fn gaussian_covariance() {
        let posterior = GaussianPosterior::new(vec![1.0, -2.0], vec![0.5, 3.0], 0.6);
        let cov = hessian_covariance(
            &posterior,
            &[1.0, -2.0],
            &[1e-3, 1e-3],
            &[Bounds::unbounded(), Bounds::unbounded()],
        )
        .unwrap();
        assert_relative_eq!(cov[(0, 0)], 0.25, max_relative = 1e-5);
        assert_relative_eq!(cov[(1, 1)], 9.0, max_relative = 1e-5);
        assert_relative_eq!(cov[(0, 1)], 0.6 * 0.5 * 3.0, max_relative = 1e-5);
        assert_relative_eq!(cov[(0, 1)], cov[(1, 0)]);
    }

    #[test]
    fn stencil_moves_inside_bounds() {
        let posterior = GaussianPosterior::new(vec![0.0], vec![2.0], 0.0);
        let cov = hessian_covariance(&posterior, &[0.0], &[1e-3], &[Bounds::non_negative()])
            .unwrap();
        assert_relative_eq!(cov[(0, 0)], 4.0, max_relative = 1e-5);
    }

    #[test]
    fn flat_likelihood_fails() {
        let posterior = GaussianPosterior::new(vec![0.0, 0.0], vec![1.0, f64::INFINITY], 0.0);
        assert!(
            hessian_covariance(
                &posterior,
                &[0.0, 0.0],
                &[1e-3, 1e-3],
                &[Bounds::unbounded(), Bounds::unbounded()],
            )
            .is_err()
        );
    }
}
