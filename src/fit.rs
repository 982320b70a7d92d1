use ndarray::{Array, Array1, Array2};
use ndarray_linalg::{Lapack, LeastSquaresSvd, Scalar};

use crate::{Error, Result};

/// Generate the Vandermonde matrix of `degree` for observations `x`
///
/// Each row of the matrix is a geometric progression for an individual
/// observation `x` from power `0` to `degree` inclusive.
///
/// # Panics
///
/// Panics in the event that `degree` cannot be converted to `i32`.
///
/// # Examples
///
/// ```
/// use inp_spectrum::fit::vandermonde;
/// use ndarray::arr2;
///
/// let observations: Vec<f64> = vec![2., 3.];
/// let vander = vandermonde(&observations, 2).unwrap();
///
/// let expected = arr2(&[[1., 2., 4.], [1., 3., 9.]]);
/// assert_eq!(vander, expected);
/// ```
pub fn vandermonde<T: Copy + Scalar>(x: &[T], degree: usize) -> Result<Array2<T>> {
    let vals = x.iter().flat_map(|xi| {
        (0..=degree).map(|i| xi.powi(i32::try_from(i).expect("{i} doesn't fit in `i32`")))
    });

    Ok(Array::from_iter(vals).into_shape((x.len(), degree + 1))?)
}

/// Coefficients of a degree-one least-squares fit `y = intercept + slope * x`.
#[derive(Clone, Copy, Debug)]
pub struct LinearFit<E> {
    pub intercept: E,
    pub slope: E,
}

impl<E: Scalar> LinearFit<E> {
    #[must_use]
    pub fn evaluate(&self, x: E) -> E {
        self.intercept + self.slope * x
    }
}

/// Fit a straight line through `(x, y)` pairs by least squares.
///
/// # Errors
/// Returns an error if the slices differ in length, fewer than two points
/// are supplied, or the underlying solve fails.
pub fn linear_fit<E: Scalar + Lapack>(x: &[E], y: &[E]) -> Result<LinearFit<E>> {
    if x.len() != y.len() {
        return Err(Error::FitLengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    if x.len() < 2 {
        return Err(Error::UnderdeterminedFit { points: x.len() });
    }

    let design = vandermonde(x, 1)?;
    let rhs: Array1<E> = Array1::from(y.to_vec());
    let solution = design.least_squares(&rhs)?;

    Ok(LinearFit {
        intercept: solution.solution[0],
        slope: solution.solution[1],
    })
}

#[cfg(test)]
mod tests {
    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;

    use super::{linear_fit, vandermonde};

    #[test]
    fn exact_line_is_recovered() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y: Vec<f64> = x.iter().map(|x| 2.0 + 3.0 * x).collect();

        let fit = linear_fit(&x, &y).unwrap();

        approx::assert_relative_eq!(fit.intercept, 2.0, max_relative = 1e-10);
        approx::assert_relative_eq!(fit.slope, 3.0, max_relative = 1e-10);
        approx::assert_relative_eq!(fit.evaluate(5.0), 17.0, max_relative = 1e-10);
    }

    #[test]
    fn random_lines_are_recovered() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);

        for _ in 0..10 {
            let intercept: f64 = rng.gen_range(-10.0..10.0);
            let slope: f64 = rng.gen_range(-5.0..5.0);
            let num_points = rng.gen_range(2..50);

            let x: Vec<f64> = (0..num_points).map(|_| rng.gen_range(-30.0..0.0)).collect();
            let y: Vec<f64> = x.iter().map(|x| intercept + slope * x).collect();

            let fit = linear_fit(&x, &y).unwrap();

            approx::assert_relative_eq!(fit.intercept, intercept, max_relative = 1e-6);
            approx::assert_relative_eq!(fit.slope, slope, max_relative = 1e-6);
        }
    }

    #[test]
    fn fitted_line_passes_through_the_centroid() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.5, 1.5, 3.5, 3.5];

        let fit = linear_fit(&x, &y).unwrap();

        approx::assert_relative_eq!(
            fit.evaluate(1.5),
            y.iter().sum::<f64>() / 4.0,
            max_relative = 1e-10
        );
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert!(linear_fit(&[1.0], &[2.0]).is_err());
        assert!(linear_fit(&[1.0, 2.0], &[2.0]).is_err());
    }

    #[test]
    fn vandermonde_rows_are_geometric_progressions() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let data_points: Vec<f64> = (0..8).map(|_| rng.gen()).collect();
        let degree = 3;

        let vander = vandermonde(&data_points, degree).unwrap();

        for (ii, data_point) in data_points.iter().enumerate() {
            for jj in 0..=degree {
                let expected = data_point.powi(i32::try_from(jj).unwrap());
                approx::assert_relative_eq!(expected, vander[[ii, jj]]);
            }
        }
    }
}
