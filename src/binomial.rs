use num_traits::{Float, ToPrimitive};

use crate::{Error, Result};

/// Agresti-Coull estimate of a binomial proportion.
///
/// `point` is the adjusted proportion; `lower` and `upper` are the two-sided
/// confidence bounds at the requested z-score. All three are proportions of
/// `n_total`; multiply by the total to recover well counts.
#[derive(Clone, Copy, Debug)]
pub struct ProportionEstimate<E> {
    pub point: E,
    pub lower: E,
    pub upper: E,
}

/// Estimate the fraction of frozen wells with an Agresti-Coull interval.
///
/// The adjusted centre is `(n_frozen + z^2/2) / (n_total + z^2)`, which is
/// better behaved near the 0 and 1 extremes than the plain Wald interval.
/// `n_frozen > n_total` is undefined and must be guarded upstream.
///
/// # Errors
/// Returns an error when `n_total` is not positive.
pub fn agresti_coull<E: Float>(n_frozen: E, n_total: E, z: E) -> Result<ProportionEstimate<E>> {
    if n_total <= E::zero() {
        return Err(Error::NonPositiveTotal {
            n_total: n_total.to_f64().unwrap_or(f64::NAN),
        });
    }
    debug_assert!(n_frozen <= n_total, "frozen count exceeds total");

    let two = E::from(2.0).expect("2 must be representable");
    let four = E::from(4.0).expect("4 must be representable");

    let p = n_frozen / n_total;
    let halfwidth = z * ((p * (E::one() - p) + z * z / (four * n_total)) / n_total).sqrt();
    let centre = p + z * z / (two * n_total);
    let denom = E::one() + z * z / n_total;

    Ok(ProportionEstimate {
        point: centre / denom,
        lower: (centre - halfwidth) / denom,
        upper: (centre + halfwidth) / denom,
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::agresti_coull;

    #[test]
    fn half_frozen_plate_is_symmetric() {
        let estimate = agresti_coull(16.0, 32.0, 1.96).unwrap();
        approx::assert_relative_eq!(estimate.point, 0.5);
        approx::assert_relative_eq!(estimate.lower, 1.0 - estimate.upper, max_relative = 1e-12);
        approx::assert_relative_eq!(estimate.lower, 0.336_31, max_relative = 1e-4);
    }

    #[test]
    fn zero_total_is_rejected() {
        assert!(agresti_coull(0.0, 0.0, 1.96).is_err());
        assert!(agresti_coull(0.0, -4.0, 1.96).is_err());
    }

    #[test]
    fn adjusted_centre_matches_closed_form() {
        let z: f64 = 1.96;
        let estimate = agresti_coull(5.0, 32.0, z).unwrap();
        let expected = (5.0 + z * z / 2.0) / (32.0 + z * z);
        approx::assert_relative_eq!(estimate.point, expected, max_relative = 1e-12);
    }

    proptest! {
        #[test]
        fn bounds_bracket_the_point(
            (n_total, n_frozen) in (2u32..500).prop_flat_map(|n| (Just(n), 1..n)),
            z in 0.1f64..4.0,
        ) {
            let estimate = agresti_coull(f64::from(n_frozen), f64::from(n_total), z).unwrap();
            prop_assert!(estimate.lower <= estimate.point);
            prop_assert!(estimate.point <= estimate.upper);
        }

        #[test]
        fn interval_narrows_with_more_wells_at_fixed_proportion(
            n_frozen in 1u32..16,
            z in 0.5f64..3.0,
        ) {
            let narrow = agresti_coull(f64::from(2 * n_frozen), 32.0, z).unwrap();
            let wide = agresti_coull(f64::from(n_frozen), 16.0, z).unwrap();
            prop_assert!(narrow.upper - narrow.lower < wide.upper - wide.lower);
        }
    }
}
