use log::{info, warn};
use ndarray::Array1;

use crate::binning::FrozenAtTemp;
use crate::binomial::agresti_coull;
use crate::config::Config;
use crate::dilution::DilutionMap;
use crate::spectrum::{Spectrum, SpectrumPoint, Volumes};
use crate::{Error, Result};

/// Per-dilution candidate series over the temperature ladder. NaN marks a
/// bin with no usable estimate.
struct Candidate {
    factor: f64,
    value: Array1<f64>,
    lower: Array1<f64>,
    upper: Array1<f64>,
}

/// Reconcile the per-dilution estimates into one concentration spectrum.
///
/// Background selection, the per-dilution concentration and interval
/// calculation, and saturation pruning are vectorised over the ladder; the
/// final walk is sequential because each bin's selection depends on the
/// previously retained value.
///
/// # Errors
/// Returns an error if the table is empty, the dilution map has no
/// background entry, or a mapped sample is missing from the table.
pub fn reconcile(
    frozen: &FrozenAtTemp,
    dilutions: &DilutionMap,
    wells_per_sample: u32,
    volumes: &Volumes,
    config: &Config,
) -> Result<Spectrum> {
    let n_bins = frozen.temps.len();
    if n_bins == 0 {
        return Err(Error::EmptyTable {
            what: "frozen-at-temperature table",
        });
    }

    let background = dilutions
        .background()
        .ok_or(Error::BackgroundEntries { found: 0 })?;
    let background_counts = frozen.column(background)?;
    let (most_diluted, _) = dilutions.most_diluted();
    let most_diluted_counts = frozen.column(most_diluted)?;

    // A background that frequently freezes more than a real dilution is a
    // faulty sensor; in that case the most-diluted sample stands in for it.
    let exceedances = background_counts
        .iter()
        .zip(&most_diluted_counts)
        .filter(|(bg, md)| bg > md)
        .count();
    let reference = if exceedances < config.background_override_count {
        background_counts
    } else {
        warn!(
            "background exceeds the most-diluted sample in {exceedances} bins; \
             substituting {most_diluted} as the reference"
        );
        most_diluted_counts
    };

    let n_total: Vec<f64> = reference
        .iter()
        .map(|&r| f64::from(wells_per_sample) - f64::from(r))
        .collect();

    let candidates = build_candidates(
        frozen,
        dilutions,
        &reference,
        &n_total,
        wells_per_sample,
        volumes,
        config,
    )?;

    let spectrum = walk(frozen, &candidates, config);

    let nulled = spectrum
        .points
        .iter()
        .filter(|p| p.inp_per_l.is_none())
        .count();
    if nulled > 0 {
        info!("reconciled spectrum has {nulled} of {n_bins} bins without data");
    }

    Ok(spectrum)
}

/// Concentration from an (adjusted) frozen-well count, in INP per milliliter
/// of suspension.
///
/// Fraction unfrozen follows a Poisson assumption on the number of active
/// nucleators per well; saturation (`wells == n_total`) yields infinity and
/// is pruned by the caller.
fn inp_ml_from_wells(wells: f64, n_total: f64, vol_well_ml: f64, factor: f64) -> f64 {
    -((n_total - wells) / n_total).ln() / vol_well_ml * factor
}

#[allow(clippy::too_many_arguments)]
fn build_candidates(
    frozen: &FrozenAtTemp,
    dilutions: &DilutionMap,
    reference: &[u32],
    n_total: &[f64],
    wells_per_sample: u32,
    volumes: &Volumes,
    config: &Config,
) -> Result<Vec<Candidate>> {
    let n_bins = frozen.temps.len();
    let vol_well_ml = config.vol_well_ul / 1000.0;
    let cutoff = config.saturation_cutoff(wells_per_sample);

    let mut candidates = Vec::new();
    for (sample, factor) in dilutions.finite_sorted() {
        let counts = frozen.column(sample)?;
        let mut value = Array1::from_elem(n_bins, f64::NAN);
        let mut lower = Array1::from_elem(n_bins, f64::NAN);
        let mut upper = Array1::from_elem(n_bins, f64::NAN);

        for i in 0..n_bins {
            // Counts this close to the ceiling make the log-formula
            // numerically unstable.
            if counts[i] >= cutoff {
                continue;
            }
            if n_total[i] <= 0.0 {
                warn!(
                    "reference column saturated at {} degC; bin has no usable total",
                    frozen.temps[i]
                );
                continue;
            }

            let adjusted = f64::from(counts[i].saturating_sub(reference[i]));
            let estimate = agresti_coull(adjusted, n_total[i], config.z_score)?;
            let lower_wells = (estimate.lower * n_total[i]).max(0.0);
            let upper_wells = estimate.upper * n_total[i];

            let point = volumes.ml_to_l(inp_ml_from_wells(
                adjusted,
                n_total[i],
                vol_well_ml,
                factor,
            ));
            let lower_l = volumes.ml_to_l(inp_ml_from_wells(
                lower_wells,
                n_total[i],
                vol_well_ml,
                factor,
            ));
            let upper_l = volumes.ml_to_l(inp_ml_from_wells(
                upper_wells,
                n_total[i],
                vol_well_ml,
                factor,
            ));

            if point.is_finite() {
                value[i] = point;
            }
            if lower_l.is_finite() {
                lower[i] = lower_l;
            }
            if upper_l.is_finite() {
                upper[i] = upper_l;
            }
        }

        candidates.push(Candidate {
            factor,
            value,
            lower,
            upper,
        });
    }

    Ok(candidates)
}

/// Walk the dilutions from least to most diluted, blending them into one
/// spectrum.
///
/// The selection starts from the least-diluted series. For each following
/// dilution only the trailing non-null points of the current selection are
/// revisited; once the selection drops relative to its predecessor
/// (saturation onset) every later index in the window is arbitrated between
/// the current value and the next dilution's value, and everything past the
/// window belongs to the next dilution outright.
fn walk(frozen: &FrozenAtTemp, candidates: &[Candidate], config: &Config) -> Spectrum {
    let n_bins = frozen.temps.len();
    let first = &candidates[0];
    let mut dilution = vec![first.factor; n_bins];
    let mut value: Vec<f64> = first.value.to_vec();
    let mut lower: Vec<f64> = first.lower.to_vec();
    let mut upper: Vec<f64> = first.upper.to_vec();

    for next in &candidates[1..] {
        let retained: Vec<usize> = value
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nan())
            .map(|(i, _)| i)
            .collect();
        let window: &[usize] = if retained.len() > config.dilution_window {
            &retained[retained.len() - config.dilution_window..]
        } else {
            &retained
        };

        let Some(&window_end) = window.last() else {
            // Nothing retained at all: the next dilution takes the whole
            // spectrum.
            for i in 0..n_bins {
                dilution[i] = next.factor;
                value[i] = next.value[i];
                lower[i] = next.lower[i];
                upper[i] = next.upper[i];
            }
            continue;
        };

        let mut dropped = false;
        for &i in window {
            if i == 0 {
                continue;
            }
            let previous = value[i - 1];
            if previous.is_nan() {
                continue;
            }
            let current = value[i];
            let candidate = next.value[i];

            if !dropped && current < previous {
                dropped = true;
            }
            if !dropped {
                continue;
            }

            if current < previous && candidate < previous {
                // A drop below history with no replacement is untrustworthy
                // on either side.
                value[i] = f64::NAN;
                lower[i] = f64::NAN;
                upper[i] = f64::NAN;
            } else if current >= previous && candidate >= previous {
                let band = previous + upper[i - 1];
                let current_in_band = band > current;
                let candidate_in_band = band > candidate;
                if current_in_band && candidate_in_band {
                    let current_width = upper[i] - current;
                    let candidate_width = next.upper[i] - candidate;
                    if candidate_width < current_width {
                        dilution[i] = next.factor;
                        value[i] = candidate;
                        lower[i] = next.lower[i];
                        upper[i] = next.upper[i];
                    }
                } else if current_in_band {
                    // Current selection stands.
                } else if candidate_in_band {
                    dilution[i] = next.factor;
                    value[i] = candidate;
                    lower[i] = next.lower[i];
                    upper[i] = next.upper[i];
                } else {
                    // Neither agrees with history: split the difference.
                    dilution[i] = next.factor;
                    lower[i] = (lower[i] * lower[i] + next.lower[i] * next.lower[i]).sqrt() / 2.0;
                    upper[i] = (upper[i] * upper[i] + next.upper[i] * next.upper[i]).sqrt() / 2.0;
                    value[i] = (current + candidate) / 2.0;
                }
            } else if current >= previous {
                // Current selection stands.
            } else if candidate >= previous {
                dilution[i] = next.factor;
                value[i] = candidate;
                lower[i] = next.lower[i];
                upper[i] = next.upper[i];
            }
        }

        // Beyond the transition zone the more concentrated dilution is
        // authoritative.
        for i in window_end + 1..n_bins {
            dilution[i] = next.factor;
            value[i] = next.value[i];
            lower[i] = next.lower[i];
            upper[i] = next.upper[i];
        }
    }

    let points = (0..n_bins)
        .map(|i| SpectrumPoint {
            temp_c: frozen.temps[i],
            dilution: dilution[i],
            inp_per_l: finite(value[i]),
            lower_ci: finite(lower[i]),
            upper_ci: finite(upper[i]),
        })
        .collect();

    Spectrum { points }
}

fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

#[cfg(test)]
mod tests {
    use crate::binning::FrozenAtTemp;
    use crate::config::Config;
    use crate::dilution::DilutionMap;
    use crate::spectrum::Volumes;

    use super::{inp_ml_from_wells, reconcile};

    #[allow(clippy::cast_precision_loss)]
    fn ladder(start: f64, step: f64, bins: usize) -> Vec<f64> {
        (0..bins).map(|i| start - step * i as f64).collect()
    }

    fn table(temps: Vec<f64>, columns: Vec<(&str, Vec<u32>)>) -> FrozenAtTemp {
        let samples = columns.iter().map(|(name, _)| (*name).to_owned()).collect();
        let counts = (0..temps.len())
            .map(|row| columns.iter().map(|(_, c)| c[row]).collect())
            .collect();
        FrozenAtTemp {
            temps,
            samples,
            counts,
        }
    }

    fn unit_volumes() -> Volumes {
        Volumes::new(1.0, 1.0, 1.0).unwrap()
    }

    #[test]
    fn saturated_dilution_hands_over_to_the_next() {
        // Factor 1 reaches 30 of 32 wells at -15 degC; from there the
        // factor-11 estimate must carry the spectrum.
        let temps = ladder(-10.0, 0.5, 21);
        let s0 = vec![
            2, 3, 4, 6, 8, 10, 13, 16, 20, 25, // -10.0 .. -14.5
            30, 30, 31, 31, 32, 32, 32, 32, 32, 32, 32, // -15.0 .. -20.0
        ];
        let s1 = vec![
            0, 0, 0, 0, 1, 1, 1, 2, 2, 3, //
            3, 4, 5, 6, 8, 10, 12, 15, 18, 22, 26,
        ];
        let background = vec![0; 21];

        let frozen = table(
            temps,
            vec![("Sample_0", s0), ("Sample_1", s1), ("Sample_2", background)],
        );
        let dilutions = DilutionMap::new([
            ("Sample_0".to_owned(), 1.0),
            ("Sample_1".to_owned(), 11.0),
            ("Sample_2".to_owned(), f64::INFINITY),
        ])
        .unwrap();

        let spectrum = reconcile(
            &frozen,
            &dilutions,
            32,
            &unit_volumes(),
            &Config::default(),
        )
        .unwrap();

        // Warm side still belongs to factor 1.
        let warm = spectrum.at(-10.0).unwrap();
        approx::assert_relative_eq!(warm.dilution, 1.0);
        approx::assert_relative_eq!(
            warm.inp_per_l.unwrap(),
            inp_ml_from_wells(2.0, 32.0, 0.05, 1.0),
            max_relative = 1e-12
        );
        let last_undiluted = spectrum.at(-14.5).unwrap();
        approx::assert_relative_eq!(last_undiluted.dilution, 1.0);

        // At and below the saturation temperature the next dilution holds.
        for point in spectrum.points.iter().filter(|p| p.temp_c <= -15.0) {
            approx::assert_relative_eq!(point.dilution, 11.0);
        }
        let handover = spectrum.at(-15.0).unwrap();
        approx::assert_relative_eq!(
            handover.inp_per_l.unwrap(),
            inp_ml_from_wells(3.0, 32.0, 0.05, 11.0),
            max_relative = 1e-12
        );
    }

    #[test]
    fn near_saturation_counts_are_pruned() {
        // 30 of 32 wells is the cutoff: those bins carry no value even when
        // no other dilution can replace them.
        let temps = ladder(-10.0, 0.5, 4);
        let frozen = table(
            temps,
            vec![
                ("Sample_0", vec![10, 29, 30, 32]),
                ("Sample_1", vec![0, 1, 1, 2]),
                ("Sample_2", vec![0, 0, 0, 0]),
            ],
        );
        let dilutions = DilutionMap::new([
            ("Sample_0".to_owned(), 1.0),
            ("Sample_1".to_owned(), 11.0),
            ("Sample_2".to_owned(), f64::INFINITY),
        ])
        .unwrap();

        let spectrum = reconcile(
            &frozen,
            &dilutions,
            32,
            &unit_volumes(),
            &Config::default(),
        )
        .unwrap();

        assert!(spectrum.at(-10.0).unwrap().inp_per_l.is_some());
        assert!(spectrum.at(-10.5).unwrap().inp_per_l.is_some());
        // The 30- and 32-count bins fall past the factor-1 window and are
        // served by factor 11 instead.
        approx::assert_relative_eq!(spectrum.at(-11.0).unwrap().dilution, 11.0);
        approx::assert_relative_eq!(spectrum.at(-11.5).unwrap().dilution, 11.0);
    }

    #[test]
    fn faulty_background_is_replaced_by_the_most_diluted_sample() {
        // The background reads higher than the most-diluted sample in every
        // bin, so the most-diluted column becomes the reference.
        let bins = 16;
        let temps = ladder(-10.0, 0.5, bins);
        let s0: Vec<u32> = (0..bins as u32).map(|i| 6 + i).collect();
        let s1 = vec![1; bins];
        let background = vec![5; bins];

        let frozen = table(
            temps,
            vec![
                ("Sample_0", s0.clone()),
                ("Sample_1", s1),
                ("Sample_2", background),
            ],
        );
        let dilutions = DilutionMap::new([
            ("Sample_0".to_owned(), 1.0),
            ("Sample_1".to_owned(), 11.0),
            ("Sample_2".to_owned(), f64::INFINITY),
        ])
        .unwrap();

        let spectrum = reconcile(
            &frozen,
            &dilutions,
            32,
            &unit_volumes(),
            &Config::default(),
        )
        .unwrap();

        // n_total = 32 - 1 and counts are reduced by 1, not by 5.
        let expected = inp_ml_from_wells(f64::from(s0[0] - 1), 31.0, 0.05, 1.0);
        approx::assert_relative_eq!(
            spectrum.at(-10.0).unwrap().inp_per_l.unwrap(),
            expected,
            max_relative = 1e-12
        );
    }

    #[test]
    fn reliable_background_is_subtracted_from_every_column() {
        let temps = ladder(-10.0, 0.5, 4);
        let frozen = table(
            temps,
            vec![
                ("Sample_0", vec![6, 8, 10, 12]),
                ("Sample_1", vec![2, 2, 3, 3]),
                ("Sample_2", vec![2, 2, 2, 2]),
            ],
        );
        let dilutions = DilutionMap::new([
            ("Sample_0".to_owned(), 1.0),
            ("Sample_1".to_owned(), 11.0),
            ("Sample_2".to_owned(), f64::INFINITY),
        ])
        .unwrap();

        let spectrum = reconcile(
            &frozen,
            &dilutions,
            32,
            &unit_volumes(),
            &Config::default(),
        )
        .unwrap();

        // Background of 2: adjusted count 4 against a usable total of 30.
        let expected = inp_ml_from_wells(4.0, 30.0, 0.05, 1.0);
        approx::assert_relative_eq!(
            spectrum.at(-10.0).unwrap().inp_per_l.unwrap(),
            expected,
            max_relative = 1e-12
        );
    }

    #[test]
    fn confidence_bounds_bracket_the_value() {
        let temps = ladder(-10.0, 0.5, 6);
        let frozen = table(
            temps,
            vec![
                ("Sample_0", vec![4, 6, 9, 13, 18, 24]),
                ("Sample_1", vec![0, 1, 1, 2, 2, 3]),
                ("Sample_2", vec![0, 0, 0, 0, 0, 0]),
            ],
        );
        let dilutions = DilutionMap::new([
            ("Sample_0".to_owned(), 1.0),
            ("Sample_1".to_owned(), 11.0),
            ("Sample_2".to_owned(), f64::INFINITY),
        ])
        .unwrap();

        let spectrum = reconcile(
            &frozen,
            &dilutions,
            32,
            &unit_volumes(),
            &Config::default(),
        )
        .unwrap();

        for point in &spectrum.points {
            if let (Some(v), Some(lo), Some(up)) =
                (point.inp_per_l, point.lower_ci, point.upper_ci)
            {
                assert!(lo <= v, "lower bound above value at {}", point.temp_c);
                assert!(up >= v, "upper bound below value at {}", point.temp_c);
            }
        }
    }

    #[test]
    fn missing_background_entry_is_rejected() {
        let temps = ladder(-10.0, 0.5, 2);
        let frozen = table(
            temps,
            vec![("Sample_0", vec![1, 2]), ("Sample_1", vec![0, 1])],
        );
        let dilutions = DilutionMap::new([
            ("Sample_0".to_owned(), 1.0),
            ("Sample_1".to_owned(), 11.0),
        ])
        .unwrap();

        let result = reconcile(
            &frozen,
            &dilutions,
            32,
            &unit_volumes(),
            &Config::default(),
        );
        assert!(result.is_err());
    }
}
