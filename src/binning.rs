use log::warn;

use crate::config::Config;
use crate::dilution::DilutionMap;
use crate::{Error, Result};

/// Column names under which instruments report the ramp temperature.
pub const TEMPERATURE_COLUMNS: &[&str] = &["Avg_Temp", "Temperature"];

/// Prefix of per-sample frozen-count columns.
pub const SAMPLE_PREFIX: &str = "Sample_";

/// A named column of the raw instrument table.
#[derive(Clone, Debug)]
pub struct NamedColumn {
    pub name: String,
    pub values: Vec<f64>,
}

/// The reviewed freeze-down ramp: one temperature and one frozen-well count
/// per sample for every capture timestamp, warmest first.
#[derive(Clone, Debug)]
pub struct RampTable {
    temps: Vec<f64>,
    samples: Vec<String>,
    /// Row-major counts, one entry per sample per observation.
    counts: Vec<Vec<u32>>,
}

impl RampTable {
    /// Assemble a ramp from named columns handed over by the file layer.
    ///
    /// The temperature column must be present under one of the
    /// [`TEMPERATURE_COLUMNS`] names; sample columns are recognised by the
    /// `Sample_` prefix.
    ///
    /// # Errors
    /// Returns an error if the temperature column is missing, no sample
    /// columns are present, the table is empty, or column lengths disagree.
    pub fn from_named_columns(columns: &[NamedColumn]) -> Result<Self> {
        let temp_column = columns
            .iter()
            .find(|c| TEMPERATURE_COLUMNS.contains(&c.name.as_str()))
            .ok_or(Error::TemperatureColumnMissing {
                accepted: TEMPERATURE_COLUMNS,
            })?;
        let temps = temp_column.values.clone();
        if temps.is_empty() {
            return Err(Error::EmptyTable { what: "ramp table" });
        }

        let sample_columns: Vec<&NamedColumn> = columns
            .iter()
            .filter(|c| c.name.starts_with(SAMPLE_PREFIX))
            .collect();
        if sample_columns.is_empty() {
            return Err(Error::EmptyTable {
                what: "sample columns",
            });
        }
        for column in &sample_columns {
            if column.values.len() != temps.len() {
                return Err(Error::ColumnLength {
                    name: column.name.clone(),
                    len: column.values.len(),
                    expected: temps.len(),
                });
            }
        }

        let samples = sample_columns.iter().map(|c| c.name.clone()).collect();
        let counts = (0..temps.len())
            .map(|row| {
                sample_columns
                    .iter()
                    .map(|c| {
                        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                        let count = c.values[row].round().max(0.0) as u32;
                        count
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            temps,
            samples,
            counts,
        })
    }

    #[must_use]
    pub fn samples(&self) -> &[String] {
        &self.samples
    }
}

/// Frozen-well counts on a fixed temperature ladder, warmest first.
#[derive(Clone, Debug)]
pub struct FrozenAtTemp {
    pub temps: Vec<f64>,
    pub samples: Vec<String>,
    pub counts: Vec<Vec<u32>>,
}

impl FrozenAtTemp {
    /// The count series of one sample.
    ///
    /// # Errors
    /// Returns an error if the sample is not in the table.
    pub fn column(&self, sample: &str) -> Result<Vec<u32>> {
        let idx = self
            .samples
            .iter()
            .position(|s| s == sample)
            .ok_or_else(|| Error::MissingSample {
                sample: sample.to_owned(),
            })?;
        Ok(self.counts.iter().map(|row| row[idx]).collect())
    }
}

/// Collapse a raw ramp onto a fixed-step temperature ladder.
///
/// The ladder is anchored at the first observation where the least-diluted
/// sample freezes: its temperature, rounded to one decimal, becomes a
/// literal row, preceded by `initial_temp_rows` synthetic all-zero rows on
/// the standard grid above it. From there the ladder steps down by
/// `temp_step`; each nominal temperature takes the maximum count observed
/// within the tolerance band around it, falling back to the maximum over
/// all warmer observations when the band is empty (sparse sampling holds
/// the last known value, it is not an error).
///
/// # Errors
/// Returns an error if the least-diluted sample named by the dilution map
/// is absent from the ramp.
pub fn bin_by_temperature(
    ramp: &RampTable,
    dilutions: &DilutionMap,
    temp_step: f64,
    config: &Config,
) -> Result<FrozenAtTemp> {
    let (least_diluted, _) = dilutions.least_diluted();
    let least_idx = ramp
        .samples
        .iter()
        .position(|s| s == least_diluted)
        .ok_or_else(|| Error::MissingSample {
            sample: least_diluted.to_owned(),
        })?;

    let first_frozen = ramp
        .counts
        .iter()
        .position(|row| row[least_idx] != 0)
        .unwrap_or_else(|| {
            warn!("sample {least_diluted} never froze; anchoring the ladder at the first row");
            0
        });

    let t0 = round_deci(ramp.temps[first_frozen]);
    let origin = (t0 / config.temp_rounding_interval).ceil() * config.temp_rounding_interval;
    let num_samples = ramp.samples.len();

    let mut temps = Vec::new();
    let mut counts: Vec<Vec<u32>> = Vec::new();

    for j in (1..=config.initial_temp_rows).rev() {
        #[allow(clippy::cast_precision_loss)]
        let offset = j as f64 * config.temp_rounding_interval;
        temps.push(round_deci(origin + offset));
        counts.push(vec![0; num_samples]);
    }
    temps.push(t0);
    counts.push(ramp.counts[first_frozen].clone());

    let min_temp = ramp.temps.iter().copied().fold(f64::INFINITY, f64::min);
    let mut nominal = origin;
    while nominal - temp_step > min_temp {
        nominal -= temp_step;
        let lower = nominal - config.temp_tolerance;
        let upper = nominal + config.temp_tolerance;

        let row = (0..num_samples)
            .map(|s| {
                let in_band = ramp
                    .temps
                    .iter()
                    .zip(&ramp.counts)
                    .filter(|(&t, _)| t > lower && t < upper)
                    .map(|(_, row)| row[s])
                    .max();
                in_band.unwrap_or_else(|| {
                    ramp.temps
                        .iter()
                        .zip(&ramp.counts)
                        .filter(|(&t, _)| t > upper)
                        .map(|(_, row)| row[s])
                        .max()
                        .unwrap_or(0)
                })
            })
            .collect();

        temps.push(round_deci(nominal));
        counts.push(row);
    }

    Ok(FrozenAtTemp {
        temps,
        samples: ramp.samples.clone(),
        counts,
    })
}

fn round_deci(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
