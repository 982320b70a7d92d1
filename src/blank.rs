use std::collections::BTreeMap;

use itertools::Itertools;
use log::{info, warn};

use crate::config::Config;
use crate::fit::linear_fit;
use crate::spectrum::{temp_key, BlankPoint, BlankSpectrum, Header, Spectrum, SpectrumPoint};
use crate::units::rms;
use crate::{Error, Result};

/// Result of applying a blank correction to one sample spectrum.
#[derive(Clone, Debug)]
pub struct CorrectionOutcome {
    pub spectrum: Spectrum,
    /// True when the whole spectrum was judged untrustworthy and replaced by
    /// the error sentinel.
    pub error_flagged: bool,
    /// Number of points that fell below the uncorrected floor.
    pub flagged_points: usize,
}

/// Average several reconciled blank runs into a single background spectrum.
///
/// Rows are grouped by temperature; each group carries the arithmetic mean
/// of the values, the RMS of each confidence bound, the sorted union of the
/// contributing dilution factors, and the number of contributing runs.
/// Non-positive values never describe a background and are dropped before
/// grouping. The carried header spans the earliest start to the latest end
/// of the inputs.
///
/// # Errors
/// Returns an error when no spectra are supplied or the inputs disagree on
/// filtering volumes.
pub fn average_blanks(blanks: &[(Spectrum, Header)]) -> Result<BlankSpectrum> {
    let Some(((_, first_header), rest)) = blanks.split_first() else {
        return Err(Error::NoBlanks);
    };
    let mut header = first_header.clone();
    for (_, other) in rest {
        if other.volumes != header.volumes {
            return Err(Error::BlankVolumeMismatch);
        }
        if other.start_time < header.start_time {
            header.start_time = other.start_time.clone();
        }
        if other.end_time > header.end_time {
            header.end_time = other.end_time.clone();
        }
    }

    struct Group {
        temp_c: f64,
        dilutions: Vec<f64>,
        values: Vec<f64>,
        lowers: Vec<f64>,
        uppers: Vec<f64>,
    }

    let mut groups: BTreeMap<i64, Group> = BTreeMap::new();
    for (spectrum, _) in blanks {
        for point in &spectrum.points {
            let Some(value) = point.inp_per_l else {
                continue;
            };
            if value <= 0.0 {
                continue;
            }
            let group = groups
                .entry(temp_key(point.temp_c))
                .or_insert_with(|| Group {
                    temp_c: point.temp_c,
                    dilutions: Vec::new(),
                    values: Vec::new(),
                    lowers: Vec::new(),
                    uppers: Vec::new(),
                });
            group.dilutions.push(point.dilution);
            group.values.push(value);
            if let Some(lower) = point.lower_ci {
                group.lowers.push(lower);
            }
            if let Some(upper) = point.upper_ci {
                group.uppers.push(upper);
            }
        }
    }

    let points = groups
        .values()
        .rev()
        .map(|group| {
            #[allow(clippy::cast_precision_loss)]
            let mean = group.values.iter().sum::<f64>() / group.values.len() as f64;
            #[allow(clippy::cast_possible_truncation)]
            let blank_count = group.values.len() as u32;
            BlankPoint {
                temp_c: group.temp_c,
                dilutions: group
                    .dilutions
                    .iter()
                    .copied()
                    .sorted_by(|a, b| a.partial_cmp(b).expect("factors are never NaN"))
                    .dedup()
                    .collect(),
                inp_per_l: mean,
                lower_ci: if group.lowers.is_empty() {
                    0.0
                } else {
                    rms(&group.lowers)
                },
                upper_ci: if group.uppers.is_empty() {
                    0.0
                } else {
                    rms(&group.uppers)
                },
                blank_count,
            }
        })
        .collect();

    Ok(BlankSpectrum { points, header })
}

/// Subtract an averaged background from a sample spectrum.
///
/// The subtraction happens in INP-per-milliliter-of-suspension space using
/// each side's own volumes; confidence bounds combine as the root sum of
/// squares in the same space. Zero-valued rows are preserved verbatim.
/// Sample temperatures colder than the blank's coldest point extend the
/// blank by extrapolation; gaps on the warm side or inside the blank's range
/// are logged and left uncorrected.
///
/// # Errors
/// Returns an error only for structural problems during extrapolation; data
/// quality issues degrade the output in-band.
pub fn apply_blank(
    sample: &Spectrum,
    sample_header: &Header,
    blank: &BlankSpectrum,
    config: &Config,
) -> Result<CorrectionOutcome> {
    let covered: Vec<i64> = blank.points.iter().map(|p| temp_key(p.temp_c)).collect();
    let blank_coldest = blank
        .points
        .iter()
        .map(|p| p.temp_c)
        .fold(f64::INFINITY, f64::min);
    let blank_warmest = blank
        .points
        .iter()
        .map(|p| p.temp_c)
        .fold(f64::NEG_INFINITY, f64::max);

    let missing: Vec<f64> = sample
        .points
        .iter()
        .filter(|p| matches!(p.inp_per_l, Some(v) if v != 0.0))
        .map(|p| p.temp_c)
        .filter(|t| !covered.contains(&temp_key(*t)))
        .collect();

    let cold_missing: Vec<f64> = missing
        .iter()
        .copied()
        .filter(|&t| t < blank_coldest)
        .collect();
    let blank = if cold_missing.is_empty() {
        blank.clone()
    } else {
        extrapolate_blanks(blank, &cold_missing, config)?
    };
    for &temp in missing.iter().filter(|&&t| t >= blank_coldest) {
        if temp > blank_warmest {
            warn!("no blank coverage at {temp} degC (warmer than the averaged blank); left uncorrected");
        } else {
            warn!("no blank coverage at {temp} degC; left uncorrected");
        }
    }

    let blank_by_key: BTreeMap<i64, &BlankPoint> = blank
        .points
        .iter()
        .map(|p| (temp_key(p.temp_c), p))
        .collect();

    let mut corrected: Vec<SpectrumPoint> = sample.points.clone();
    for point in &mut corrected {
        let Some(value) = point.inp_per_l else {
            continue;
        };
        if value == 0.0 {
            continue;
        }
        let Some(blank_point) = blank_by_key.get(&temp_key(point.temp_c)) else {
            continue;
        };

        let sample_ml = sample_header.volumes.l_to_ml(value);
        let blank_ml = blank.header.volumes.l_to_ml(blank_point.inp_per_l);
        point.inp_per_l = Some(sample_header.volumes.ml_to_l(sample_ml - blank_ml));

        if let (Some(lower), Some(upper)) = (point.lower_ci, point.upper_ci) {
            let sample_lower = sample_header.volumes.l_to_ml(lower);
            let sample_upper = sample_header.volumes.l_to_ml(upper);
            let blank_lower = blank.header.volumes.l_to_ml(blank_point.lower_ci);
            let blank_upper = blank.header.volumes.l_to_ml(blank_point.upper_ci);
            point.lower_ci = Some(
                sample_header
                    .volumes
                    .ml_to_l(sample_lower.hypot(blank_lower)),
            );
            point.upper_ci = Some(
                sample_header
                    .volumes
                    .ml_to_l(sample_upper.hypot(blank_upper)),
            );
        }
    }

    let mut spectrum = Spectrum { points: corrected };
    spectrum.sort_descending();
    Ok(final_check(spectrum, sample, config))
}

/// Flag corrected values that undercut the uncorrected floor and enforce
/// temperature monotonicity.
///
/// If more than `error_threshold_pct` percent of all points fall below
/// `original - lower_ci` the entire corrected spectrum is replaced by the
/// error sentinel. Otherwise every cold-side dip is overwritten with the
/// previous retained value, its upper bound widened to the RMS of the two.
fn final_check(mut corrected: Spectrum, original: &Spectrum, config: &Config) -> CorrectionOutcome {
    let original_by_key: BTreeMap<i64, &SpectrumPoint> = original
        .points
        .iter()
        .map(|p| (temp_key(p.temp_c), p))
        .collect();

    let mut flagged = 0usize;
    for point in &corrected.points {
        let Some(value) = point.inp_per_l else {
            continue;
        };
        let Some(origin) = original_by_key.get(&temp_key(point.temp_c)) else {
            continue;
        };
        if let (Some(original_value), Some(original_lower)) = (origin.inp_per_l, origin.lower_ci) {
            if value < original_value - original_lower {
                flagged += 1;
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let percent = flagged as f64 / corrected.points.len() as f64 * 100.0;
    if percent > config.error_threshold_pct {
        warn!(
            "{flagged} of {} corrected points fall below the uncorrected floor; \
             discarding the whole spectrum",
            corrected.points.len()
        );
        for point in &mut corrected.points {
            point.inp_per_l = Some(config.error_signal);
            point.lower_ci = Some(config.error_signal);
            point.upper_ci = Some(config.error_signal);
        }
        return CorrectionOutcome {
            spectrum: corrected,
            error_flagged: true,
            flagged_points: flagged,
        };
    }

    let mut overwritten = 0usize;
    for i in 1..corrected.points.len() {
        let previous = corrected.points[i - 1].clone();
        let current = &mut corrected.points[i];
        if let (Some(previous_value), Some(current_value)) = (previous.inp_per_l, current.inp_per_l)
        {
            if current_value < previous_value {
                // Concentration cannot fall as temperature drops; carry the
                // warmer value forward.
                current.inp_per_l = Some(previous_value);
                current.upper_ci = match (current.upper_ci, previous.upper_ci) {
                    (Some(a), Some(b)) => Some(rms(&[a, b])),
                    (a, b) => a.or(b),
                };
                current.lower_ci = previous.lower_ci;
                overwritten += 1;
            }
        }
    }
    if flagged > 0 || overwritten > 0 {
        info!("blank correction: {flagged} flagged, {overwritten} overwritten for monotonicity");
    }

    CorrectionOutcome {
        spectrum: corrected,
        error_flagged: false,
        flagged_points: flagged,
    }
}

/// Extend a blank spectrum to colder temperatures by linear extrapolation.
///
/// The slope comes from a least-squares line through the last
/// `extrapolation_window` points of the blank. A final point that breaks
/// monotonicity is excluded from the fit and re-extrapolated itself. The
/// confidence bounds of synthetic rows scale the extrapolated value by the
/// window's mean bound-to-value ratio, and `blank_count` is zero so
/// consumers can tell measured from extrapolated rows apart.
///
/// # Errors
/// Returns an error when fewer than two usable points remain for the fit.
pub fn extrapolate_blanks(
    blank: &BlankSpectrum,
    missing_cold_temps: &[f64],
    config: &Config,
) -> Result<BlankSpectrum> {
    let mut extended = blank.clone();
    extended.sort_descending();
    let points = &extended.points;
    let n = points.len();

    let coldest = points.last().map_or(f64::INFINITY, |p| p.temp_c);
    let mut targets: Vec<f64> = missing_cold_temps
        .iter()
        .copied()
        .filter(|&t| t < coldest)
        .collect();
    if targets.is_empty() {
        info!("no extrapolation needed for {missing_cold_temps:?}");
        return Ok(extended);
    }

    let window_len = config.extrapolation_window;
    let window: &[BlankPoint] = if n > 1 && points[n - 1].inp_per_l < points[n - 2].inp_per_l {
        warn!(
            "coldest blank point at {} degC breaks monotonicity; excluded from the slope",
            points[n - 1].temp_c
        );
        targets.push(points[n - 1].temp_c);
        &points[n.saturating_sub(window_len + 1)..n - 1]
    } else {
        &points[n.saturating_sub(window_len)..]
    };

    for pair in points.windows(2) {
        if pair[0].inp_per_l > pair[1].inp_per_l {
            warn!(
                "blank value decreases between {} and {} degC",
                pair[0].temp_c, pair[1].temp_c
            );
        }
    }

    let x: Vec<f64> = window.iter().map(|p| p.temp_c).collect();
    let y: Vec<f64> = window.iter().map(|p| p.inp_per_l).collect();
    let line = linear_fit(&x, &y)?;

    #[allow(clippy::cast_precision_loss)]
    let ratio = |bound: fn(&BlankPoint) -> f64| {
        window
            .iter()
            .map(|p| bound(p) / p.inp_per_l.max(config.ci_ratio_floor))
            .sum::<f64>()
            / window.len() as f64
    };
    let lower_ratio = ratio(|p| p.lower_ci);
    let upper_ratio = ratio(|p| p.upper_ci);

    let dilutions: Vec<f64> = window
        .iter()
        .flat_map(|p| p.dilutions.iter().copied())
        .sorted_by(|a, b| a.partial_cmp(b).expect("factors are never NaN"))
        .dedup()
        .collect();

    targets.sort_by(|a, b| b.partial_cmp(a).expect("temperatures are never NaN"));
    for temp_c in targets {
        let value = line.evaluate(temp_c);
        extended.points.retain(|p| temp_key(p.temp_c) != temp_key(temp_c));
        extended.points.push(BlankPoint {
            temp_c,
            dilutions: dilutions.clone(),
            inp_per_l: value,
            lower_ci: value * lower_ratio,
            upper_ci: value * upper_ratio,
            blank_count: 0,
        });
    }
    extended.sort_descending();

    Ok(extended)
}
