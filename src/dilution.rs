use std::collections::BTreeMap;

use crate::{Error, Result};

/// Mapping from sample identifier to fold-dilution factor.
///
/// Factor 1 is the undiluted suspension; larger factors are progressively
/// more diluted. An infinite factor marks the de-ionised background sample.
/// At most one background entry is allowed, and at least one finite entry is
/// required.
#[derive(Clone, Debug)]
pub struct DilutionMap {
    factors: BTreeMap<String, f64>,
}

impl DilutionMap {
    /// Build a validated map from `(sample, factor)` pairs.
    ///
    /// # Errors
    /// Returns an error for non-positive or NaN factors, more than one
    /// infinite entry, or a map with no finite entries.
    pub fn new<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let factors: BTreeMap<String, f64> = entries.into_iter().collect();
        for (sample, &factor) in &factors {
            if !(factor > 0.0) {
                return Err(Error::InvalidDilutionFactor {
                    sample: sample.clone(),
                    factor,
                });
            }
        }
        let backgrounds = factors.values().filter(|f| f.is_infinite()).count();
        if backgrounds > 1 {
            return Err(Error::BackgroundEntries { found: backgrounds });
        }
        if factors.values().filter(|f| f.is_finite()).count() == 0 {
            return Err(Error::NoFiniteDilutions);
        }
        Ok(Self { factors })
    }

    /// The background (infinite-dilution) sample, if one was declared.
    #[must_use]
    pub fn background(&self) -> Option<&str> {
        self.factors
            .iter()
            .find(|(_, f)| f.is_infinite())
            .map(|(sample, _)| sample.as_str())
    }

    /// Finite entries sorted by ascending dilution factor.
    #[must_use]
    pub fn finite_sorted(&self) -> Vec<(&str, f64)> {
        let mut entries: Vec<(&str, f64)> = self
            .factors
            .iter()
            .filter(|(_, f)| f.is_finite())
            .map(|(sample, &factor)| (sample.as_str(), factor))
            .collect();
        entries.sort_by(|a, b| a.1.partial_cmp(&b.1).expect("factors are never NaN"));
        entries
    }

    /// The sample with the smallest finite factor (closest to the raw
    /// suspension).
    #[must_use]
    pub fn least_diluted(&self) -> (&str, f64) {
        *self
            .finite_sorted()
            .first()
            .expect("at least one finite dilution")
    }

    /// The sample with the largest finite factor.
    #[must_use]
    pub fn most_diluted(&self) -> (&str, f64) {
        *self
            .finite_sorted()
            .last()
            .expect("at least one finite dilution")
    }

    #[must_use]
    pub fn factor(&self, sample: &str) -> Option<f64> {
        self.factors.get(sample).copied()
    }
}
