use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::spectrum::{BlankPoint, BlankSpectrum, Header, Spectrum, SpectrumPoint};
use crate::{Error, Result};

/// Canonical column order of a reconciled spectrum file.
pub const SPECTRUM_COLUMNS: &[&str] = &["degC", "dilution", "INPS_L", "lower_CI", "upper_CI"];

/// Canonical column order of an averaged blank file.
pub const BLANK_COLUMNS: &[&str] = &[
    "degC",
    "dilution",
    "INPS_L",
    "lower_CI",
    "upper_CI",
    "blank_count",
];

#[derive(Deserialize, Serialize)]
struct SpectrumRow {
    #[serde(rename = "degC")]
    temp_c: f64,
    dilution: f64,
    #[serde(rename = "INPS_L")]
    inp_per_l: Option<f64>,
    #[serde(rename = "lower_CI")]
    lower_ci: Option<f64>,
    #[serde(rename = "upper_CI")]
    upper_ci: Option<f64>,
}

/// Split a flexible-header file into its `key = value` preamble and the
/// tabular body.
///
/// Header lines run until the first line that exactly matches the expected
/// column names; everything from that line on is standard delimited data.
fn split_flexible_header<'a>(
    text: &'a str,
    expected: &'static [&'static str],
    path: &Path,
) -> Result<(Vec<&'a str>, &'a str)> {
    let joined = expected.join(",");
    let mut offset = 0;
    let mut header_lines = Vec::new();
    for segment in text.split_inclusive('\n') {
        if segment.trim_end().trim_start() == joined {
            return Ok((header_lines, &text[offset..]));
        }
        header_lines.push(segment.trim_end());
        offset += segment.len();
    }
    Err(Error::ColumnRowMissing {
        path: path.to_path_buf(),
        expected,
    })
}

/// Read a reconciled spectrum and its header metadata.
///
/// # Errors
/// Returns an error if the file cannot be read, the column row is missing,
/// the header lacks a required key, or a body cell fails to parse.
pub fn read_spectrum(path: &Path) -> Result<(Header, Spectrum)> {
    let text = fs::read_to_string(path)?;
    let (header_lines, body) = split_flexible_header(&text, SPECTRUM_COLUMNS, path)?;
    let header = Header::from_lines(header_lines)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(body.as_bytes());
    let mut points = Vec::new();
    for row in reader.deserialize() {
        let row: SpectrumRow = row?;
        points.push(SpectrumPoint {
            temp_c: row.temp_c,
            dilution: row.dilution,
            inp_per_l: row.inp_per_l,
            lower_ci: row.lower_ci,
            upper_ci: row.upper_ci,
        });
    }

    Ok((header, Spectrum { points }))
}

/// Write a reconciled spectrum under the flexible-header convention.
///
/// The header's `key = value` lines precede the column row; an existing file
/// is never overwritten, a `(N)` suffix uniquifies the name instead. Returns
/// the path actually written.
///
/// # Errors
/// Returns an error if serialisation or the write fails.
pub fn write_spectrum(path: &Path, header: &Header, spectrum: &Spectrum) -> Result<PathBuf> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(SPECTRUM_COLUMNS)?;
    for point in &spectrum.points {
        writer.serialize(SpectrumRow {
            temp_c: point.temp_c,
            dilution: point.dilution,
            inp_per_l: point.inp_per_l,
            lower_ci: point.lower_ci,
            upper_ci: point.upper_ci,
        })?;
    }
    write_with_header(path, header, writer)
}

/// Read an averaged blank spectrum and its header metadata.
///
/// # Errors
/// Returns an error under the same conditions as [`read_spectrum`].
pub fn read_blank(path: &Path) -> Result<BlankSpectrum> {
    let text = fs::read_to_string(path)?;
    let (header_lines, body) = split_flexible_header(&text, BLANK_COLUMNS, path)?;
    let header = Header::from_lines(header_lines)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(body.as_bytes());
    let mut points = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cell = |idx: usize| record.get(idx).unwrap_or("");
        let parse = |column: &'static str, value: &str| -> Result<f64> {
            value.parse().map_err(|_| Error::MalformedCell {
                path: path.to_path_buf(),
                column,
                value: value.to_owned(),
            })
        };

        let dilutions = cell(1)
            .split(';')
            .filter(|s| !s.is_empty())
            .map(|s| parse("dilution", s))
            .collect::<Result<Vec<f64>>>()?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let blank_count = parse("blank_count", cell(5))? as u32;
        points.push(BlankPoint {
            temp_c: parse("degC", cell(0))?,
            dilutions,
            inp_per_l: parse("INPS_L", cell(2))?,
            lower_ci: parse("lower_CI", cell(3))?,
            upper_ci: parse("upper_CI", cell(4))?,
            blank_count,
        });
    }

    Ok(BlankSpectrum { points, header })
}

/// Write an averaged blank spectrum under the flexible-header convention.
///
/// The dilution union is `;`-joined on the wire; it stays a typed list in
/// memory and is split again on read.
///
/// # Errors
/// Returns an error if serialisation or the write fails.
pub fn write_blank(path: &Path, blank: &BlankSpectrum) -> Result<PathBuf> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(BLANK_COLUMNS)?;
    for point in &blank.points {
        let dilutions = point
            .dilutions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";");
        writer.write_record([
            point.temp_c.to_string(),
            dilutions,
            point.inp_per_l.to_string(),
            point.lower_ci.to_string(),
            point.upper_ci.to_string(),
            point.blank_count.to_string(),
        ])?;
    }
    write_with_header(path, &blank.header, writer)
}

fn write_with_header(path: &Path, header: &Header, writer: csv::Writer<Vec<u8>>) -> Result<PathBuf> {
    let body = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let path = unique_path(path);

    let mut text = String::new();
    for line in header.to_lines() {
        text.push_str(&line);
        text.push('\n');
    }
    text.push_str(&String::from_utf8_lossy(&body));

    fs::write(&path, text)?;
    Ok(path)
}

/// Uniquify an output path by appending `(N)` to the stem while the target
/// exists. Each run owns the files it writes and never clobbers an earlier
/// version.
#[must_use]
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut counter = 1;
    loop {
        let candidate = if extension.is_empty() {
            path.with_file_name(format!("{stem}({counter})"))
        } else {
            path.with_file_name(format!("{stem}({counter}).{extension}"))
        };
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
