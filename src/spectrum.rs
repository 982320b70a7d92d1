use std::collections::BTreeMap;

use crate::units::{inp_l_to_ml, inp_ml_to_l};
use crate::{Error, Result};

/// Physical sampling volumes attached to one experiment.
///
/// Blank and sample runs commonly use different volumes, so each spectrum
/// carries its own set and all unit conversions go through the owning side's
/// values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Volumes {
    /// Volume of air drawn through the filter, in liters.
    pub vol_air_filt: f64,
    /// Proportion of the filter suspended, in (0, 1].
    pub prop_filter_used: f64,
    /// Volume of the suspension, in milliliters.
    pub vol_susp: f64,
}

impl Volumes {
    /// # Errors
    /// Returns an error if any volume is non-positive or non-finite; a zero
    /// here would silently zero or blow up every downstream concentration.
    pub fn new(vol_air_filt: f64, prop_filter_used: f64, vol_susp: f64) -> Result<Self> {
        for (name, value) in [
            ("vol_air_filt", vol_air_filt),
            ("proportion_filter_used", prop_filter_used),
            ("vol_susp", vol_susp),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(Error::NonPositiveVolume { name, value });
            }
        }
        Ok(Self {
            vol_air_filt,
            prop_filter_used,
            vol_susp,
        })
    }

    #[must_use]
    pub fn ml_to_l(&self, x: f64) -> f64 {
        inp_ml_to_l(x, self.vol_air_filt, self.prop_filter_used, self.vol_susp)
    }

    #[must_use]
    pub fn l_to_ml(&self, x: f64) -> f64 {
        inp_l_to_ml(x, self.vol_air_filt, self.prop_filter_used, self.vol_susp)
    }
}

/// Scalar metadata parsed from the free-text header preceding a spectrum
/// table.
///
/// `start_time`/`end_time` are `%Y-%m-%d %H:%M:%S` strings; the format is
/// fixed-width and most-significant-first, so lexicographic order is
/// chronological order and min/max across files works on the strings
/// directly.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub site: String,
    pub treatment: String,
    pub start_time: String,
    pub end_time: String,
    pub volumes: Volumes,
    /// Free-form keys carried through untouched (filter colour, operator,
    /// altitudes, ...).
    pub extra: BTreeMap<String, String>,
}

impl Header {
    /// Parse `key = value` lines into a header.
    ///
    /// # Errors
    /// Returns an error when a required key is absent, a volume does not
    /// parse as a number, or a volume is non-positive.
    pub fn from_lines<'a, I>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut fields = BTreeMap::new();
        for line in lines {
            if let Some((key, value)) = line.split_once(" = ") {
                fields.insert(key.trim().to_owned(), value.trim().to_owned());
            } else if !line.trim().is_empty() {
                log::warn!("unexpected header line format: {line}");
            }
        }

        let mut take = |key: &'static str| -> Result<String> {
            fields.remove(key).ok_or(Error::MissingHeaderKey { key })
        };

        let site = take("site")?;
        let treatment = take("treatment")?;
        let start_time = take("start_time")?;
        let end_time = take("end_time")?;
        let vol_air_filt = parse_volume("vol_air_filt", &take("vol_air_filt")?)?;
        let prop_filter_used =
            parse_volume("proportion_filter_used", &take("proportion_filter_used")?)?;
        let vol_susp = parse_volume("vol_susp", &take("vol_susp")?)?;

        Ok(Self {
            site,
            treatment,
            start_time,
            end_time,
            volumes: Volumes::new(vol_air_filt, prop_filter_used, vol_susp)?,
            extra: fields,
        })
    }

    /// Render the header back into `key = value` lines, required keys first.
    #[must_use]
    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("site = {}", self.site),
            format!("start_time = {}", self.start_time),
            format!("end_time = {}", self.end_time),
            format!("treatment = {}", self.treatment),
            format!("vol_air_filt = {}", self.volumes.vol_air_filt),
            format!("proportion_filter_used = {}", self.volumes.prop_filter_used),
            format!("vol_susp = {}", self.volumes.vol_susp),
        ];
        for (key, value) in &self.extra {
            lines.push(format!("{key} = {value}"));
        }
        lines
    }
}

fn parse_volume(key: &'static str, value: &str) -> Result<f64> {
    value.parse().map_err(|_| Error::MalformedHeaderValue {
        key,
        value: value.to_owned(),
    })
}

/// One temperature bin of a reconciled spectrum.
///
/// `None` marks a numerically undefined or pruned bin, distinct from a true
/// zero concentration. The CI fields hold the Agresti-Coull bound
/// concentrations for the selected dilution.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectrumPoint {
    pub temp_c: f64,
    /// Dilution factor whose estimate was selected for this bin.
    pub dilution: f64,
    pub inp_per_l: Option<f64>,
    pub lower_ci: Option<f64>,
    pub upper_ci: Option<f64>,
}

/// A reconciled concentration spectrum, points in descending temperature
/// order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Spectrum {
    pub points: Vec<SpectrumPoint>,
}

impl Spectrum {
    pub fn sort_descending(&mut self) {
        self.points.sort_by(|a, b| {
            b.temp_c
                .partial_cmp(&a.temp_c)
                .expect("temperatures are never NaN")
        });
    }

    /// Look up the point at a temperature, matching on the deci-degree grid.
    #[must_use]
    pub fn at(&self, temp_c: f64) -> Option<&SpectrumPoint> {
        let key = temp_key(temp_c);
        self.points.iter().find(|p| temp_key(p.temp_c) == key)
    }
}

/// One temperature bin of an averaged background spectrum.
#[derive(Clone, Debug, PartialEq)]
pub struct BlankPoint {
    pub temp_c: f64,
    /// Sorted union of the dilution factors that contributed to this bin.
    pub dilutions: Vec<f64>,
    pub inp_per_l: f64,
    pub lower_ci: f64,
    pub upper_ci: f64,
    /// Number of blank runs contributing; zero marks an extrapolated row.
    pub blank_count: u32,
}

/// Averaged background signal over a time window, with the metadata of the
/// runs it was built from.
#[derive(Clone, Debug, PartialEq)]
pub struct BlankSpectrum {
    pub points: Vec<BlankPoint>,
    pub header: Header,
}

impl BlankSpectrum {
    pub fn sort_descending(&mut self) {
        self.points.sort_by(|a, b| {
            b.temp_c
                .partial_cmp(&a.temp_c)
                .expect("temperatures are never NaN")
        });
    }

    #[must_use]
    pub fn at(&self, temp_c: f64) -> Option<&BlankPoint> {
        let key = temp_key(temp_c);
        self.points.iter().find(|p| temp_key(p.temp_c) == key)
    }
}

/// Deci-degree key for grouping and matching ladder temperatures.
///
/// Every temperature in a spectrum is rounded to one decimal by
/// construction, so this key is exact for the data that reaches it.
pub(crate) fn temp_key(temp_c: f64) -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    let key = (temp_c * 10.0).round() as i64;
    key
}
