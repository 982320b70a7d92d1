use num_traits::Float;

/// Convert ice-nucleating particles per milliliter of suspension to particles
/// per liter of sampled air at STP.
///
/// The conversion accounts for the volume of air drawn through the filter,
/// the proportion of the filter suspended, and the suspension volume.
///
/// # Examples
///
/// ```
/// use inp_spectrum::units::inp_ml_to_l;
///
/// let per_l = inp_ml_to_l(10.0, 620.48, 1.0, 10.0);
/// approx::assert_relative_eq!(per_l, 0.1612, max_relative = 1e-3);
/// ```
pub fn inp_ml_to_l<E: Float>(x: E, vol_air_filt: E, prop_filter_used: E, vol_susp: E) -> E {
    x * vol_susp / (vol_air_filt * prop_filter_used)
}

/// Convert particles per liter of sampled air back to particles per
/// milliliter of suspension. Algebraic inverse of [`inp_ml_to_l`].
///
/// # Examples
///
/// ```
/// use inp_spectrum::units::{inp_l_to_ml, inp_ml_to_l};
///
/// let per_l = inp_ml_to_l(10.0, 620.48, 1.0, 10.0);
/// approx::assert_relative_eq!(inp_l_to_ml(per_l, 620.48, 1.0, 10.0), 10.0);
/// ```
pub fn inp_l_to_ml<E: Float>(x: E, vol_air_filt: E, prop_filter_used: E, vol_susp: E) -> E {
    x * vol_air_filt * prop_filter_used / vol_susp
}

/// Root mean square of a slice.
///
/// Returns NaN for an empty slice; callers that can meet an empty window are
/// expected to guard for it.
pub fn rms<E: Float>(values: &[E]) -> E {
    let n = E::from(values.len()).expect("length must fit in the scalar type");
    (values.iter().fold(E::zero(), |acc, &v| acc + v * v) / n).sqrt()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{inp_l_to_ml, inp_ml_to_l, rms};

    #[test]
    fn rms_of_known_values() {
        approx::assert_relative_eq!(rms(&[1.0, 2.0, 3.0, 4.0, 5.0]), 3.3166, max_relative = 1e-4);
        approx::assert_relative_eq!(rms(&[3.0, 3.0, 3.0]), 3.0);
    }

    #[test]
    fn rms_of_empty_slice_is_nan() {
        assert!(rms::<f64>(&[]).is_nan());
    }

    proptest! {
        #[test]
        fn conversion_round_trips(
            x in 0.0f64..1e9,
            vol_air_filt in 1e-3f64..1e5,
            prop_filter_used in 1e-3f64..1.0,
            vol_susp in 1e-3f64..1e3,
        ) {
            let there = inp_ml_to_l(x, vol_air_filt, prop_filter_used, vol_susp);
            let back = inp_l_to_ml(there, vol_air_filt, prop_filter_used, vol_susp);
            prop_assert!((back - x).abs() <= 1e-9 * x.abs().max(1.0));
        }

        #[test]
        fn conversion_scales_linearly(
            x in 0.0f64..1e6,
            vol_air_filt in 1e-3f64..1e5,
            prop_filter_used in 1e-3f64..1.0,
            vol_susp in 1e-3f64..1e3,
        ) {
            let one = inp_ml_to_l(x, vol_air_filt, prop_filter_used, vol_susp);
            let two = inp_ml_to_l(2.0 * x, vol_air_filt, prop_filter_used, vol_susp);
            prop_assert!((two - 2.0 * one).abs() <= 1e-9 * one.abs().max(1.0));
        }
    }
}
