use std::path::PathBuf;

use thiserror::Error;

/// Failure modes of the processing pipeline.
///
/// Structural problems (missing columns, bad volumes, malformed maps) halt a
/// run; statistical problems never appear here, they degrade the output
/// in-band instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("temperature column not found; accepted names are {accepted:?}")]
    TemperatureColumnMissing { accepted: &'static [&'static str] },

    #[error("column `{name}` has {len} rows, expected {expected}")]
    ColumnLength {
        name: String,
        len: usize,
        expected: usize,
    },

    #[error("{what} contains no rows")]
    EmptyTable { what: &'static str },

    #[error("dilution factor for `{sample}` must be positive, got {factor}")]
    InvalidDilutionFactor { sample: String, factor: f64 },

    #[error("dilution map must contain at most one background (infinite) entry, found {found}")]
    BackgroundEntries { found: usize },

    #[error("dilution map contains no finite dilution factors")]
    NoFiniteDilutions,

    #[error("sample `{sample}` from the dilution map is missing from the count table")]
    MissingSample { sample: String },

    #[error("volume parameter `{name}` must be positive, got {value}")]
    NonPositiveVolume { name: &'static str, value: f64 },

    #[error("total well count must be positive, got {n_total}")]
    NonPositiveTotal { n_total: f64 },

    #[error("required header key `{key}` is missing")]
    MissingHeaderKey { key: &'static str },

    #[error("header value `{value}` for `{key}` is not a number")]
    MalformedHeaderValue { key: &'static str, value: String },

    #[error("no blank spectra to average")]
    NoBlanks,

    #[error("blank spectra disagree on filtering volumes")]
    BlankVolumeMismatch,

    #[error("need at least two points for a linear fit, got {points}")]
    UnderdeterminedFit { points: usize },

    #[error("fit inputs have mismatched lengths: {x} vs {y}")]
    FitLengthMismatch { x: usize, y: usize },

    #[error("no row matching the expected columns {expected:?} in {path}")]
    ColumnRowMissing {
        path: PathBuf,
        expected: &'static [&'static str],
    },

    #[error("malformed value `{value}` in column `{column}` of {path}")]
    MalformedCell {
        path: PathBuf,
        column: &'static str,
        value: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}
