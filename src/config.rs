use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::Result;

/// Tunable constants for the whole pipeline.
///
/// One instance is threaded explicitly through every stage so tests can vary
/// individual knobs without touching process-wide state. The defaults are the
/// operational values used for 96-well (32 wells per sample) plates.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Z-score of the two-sided confidence interval (1.96 for 95 %).
    pub z_score: f64,
    /// Volume of suspension per well, in microliters.
    pub vol_well_ul: f64,
    /// Interval the temperature ladder snaps to, in degrees Celsius.
    pub temp_rounding_interval: f64,
    /// Half-width of the band used when matching raw observations to a
    /// nominal ladder temperature.
    pub temp_tolerance: f64,
    /// Number of synthetic all-zero rows emitted above the first frozen
    /// observation.
    pub initial_temp_rows: usize,
    /// Wells excluded from the usable ceiling; counts at or above
    /// `wells_per_sample - saturation_margin` are too close to saturation for
    /// the log-formula to be trusted.
    pub saturation_margin: u32,
    /// How often the background column must exceed the most-diluted column
    /// before the background sensor is judged faulty and substituted.
    pub background_override_count: usize,
    /// Number of trailing points of the selected spectrum revisited when the
    /// next dilution takes over.
    pub dilution_window: usize,
    /// Number of cold-end blank points used to fit the extrapolation slope.
    pub extrapolation_window: usize,
    /// Percentage of corrected points allowed below the uncorrected floor
    /// before the whole corrected spectrum is discarded.
    pub error_threshold_pct: f64,
    /// Sentinel written in place of values judged unreliable. Never a valid
    /// concentration.
    pub error_signal: f64,
    /// Floor applied to blank values when deriving the CI-to-value ratio for
    /// extrapolated points.
    pub ci_ratio_floor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            z_score: 1.96,
            vol_well_ul: 50.0,
            temp_rounding_interval: 0.5,
            temp_tolerance: 0.01,
            initial_temp_rows: 4,
            saturation_margin: 2,
            background_override_count: 10,
            dilution_window: 4,
            extrapolation_window: 4,
            error_threshold_pct: 10.0,
            error_signal: -9999.0,
            ci_ratio_floor: 0.001,
        }
    }
}

impl Config {
    /// Parse a configuration from TOML text; absent keys keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the text is not valid TOML or names unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Counts at or above this value are pruned as saturated.
    #[must_use]
    pub const fn saturation_cutoff(&self, wells_per_sample: u32) -> u32 {
        wells_per_sample.saturating_sub(self.saturation_margin)
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn defaults_match_operational_constants() {
        let config = Config::default();
        approx::assert_relative_eq!(config.z_score, 1.96);
        approx::assert_relative_eq!(config.vol_well_ul, 50.0);
        approx::assert_relative_eq!(config.temp_rounding_interval, 0.5);
        assert_eq!(config.saturation_cutoff(32), 30);
    }

    #[test]
    fn toml_overrides_only_named_keys() {
        let config = Config::from_toml_str("z_score = 2.58\ndilution_window = 6\n").unwrap();
        approx::assert_relative_eq!(config.z_score, 2.58);
        assert_eq!(config.dilution_window, 6);
        approx::assert_relative_eq!(config.error_signal, -9999.0);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml_str("wells = 32\n").is_err());
    }
}
