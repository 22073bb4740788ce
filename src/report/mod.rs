//! Storm report records as they move through the pipeline.
//!
//! - [`RawReport`] - one CSV row, field name to field value, in column order
//! - [`NormalizedReport`] - a raw row plus its [`Category`] and `observedAt` stamp
//!
//! Normalization is additive: the raw columns are carried through untouched
//! and the two injected keys are appended when the record is serialized.

mod fields;
mod normalizer;

pub use fields::{Measurement, StormFields};
pub use normalizer::{Clock, FixedClock, Normalizer, SystemClock};

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Key injected for the storm category.
pub const CATEGORY_KEY: &str = "category";
/// Key injected for the observation timestamp.
pub const OBSERVED_AT_KEY: &str = "observedAt";

/// Storm category, one per published feed.
///
/// Declaration order is the publish order within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Tornado,
    Hail,
    Wind,
}

impl Category {
    /// All categories in publish order.
    pub const ALL: [Category; 3] = [Category::Tornado, Category::Hail, Category::Wind];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Tornado => "tornado",
            Category::Hail => "hail",
            Category::Wind => "wind",
        }
    }

    /// Suffix used in the remote feed filenames (`today_torn.csv`, `240526_rpts_hail.csv`).
    pub fn feed_suffix(self) -> &'static str {
        match self {
            Category::Tornado => "torn",
            Category::Hail => "hail",
            Category::Wind => "wind",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tornado" => Ok(Category::Tornado),
            "hail" => Ok(Category::Hail),
            "wind" => Ok(Category::Wind),
            other => Err(format!("unknown storm category: {other}")),
        }
    }
}

/// One parsed CSV row.
///
/// Fields keep the column order of the feed header. Inserting a name that
/// already exists replaces its value in place, so a header with a repeated
/// column name keeps the last value for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawReport {
    fields: Vec<(String, String)>,
}

impl RawReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for RawReport
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut report = RawReport::new();
        for (name, value) in iter {
            report.insert(name, value);
        }
        report
    }
}

impl Serialize for RawReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A raw row stamped with its category and observation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedReport {
    raw: RawReport,
    category: Category,
    observed_at: String,
}

impl NormalizedReport {
    pub fn new(raw: RawReport, category: Category, observed_at: impl Into<String>) -> Self {
        Self {
            raw,
            category,
            observed_at: observed_at.into(),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn observed_at(&self) -> &str {
        &self.observed_at
    }

    /// The untouched source row.
    pub fn raw(&self) -> &RawReport {
        &self.raw
    }

    /// Looks up a field by name, including the injected `category` and `observedAt`.
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            CATEGORY_KEY => Some(self.category.as_str()),
            OBSERVED_AT_KEY => Some(&self.observed_at),
            _ => self.raw.get(name),
        }
    }

    /// Serializes the record as the JSON object published to the broker.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl Serialize for NormalizedReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Injected keys win over a raw column of the same name.
        let raw_fields = self
            .raw
            .iter()
            .filter(|(name, _)| *name != CATEGORY_KEY && *name != OBSERVED_AT_KEY);

        let mut map = serializer.serialize_map(None)?;
        for (name, value) in raw_fields {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry(CATEGORY_KEY, &self.category)?;
        map.serialize_entry(OBSERVED_AT_KEY, &self.observed_at)?;
        map.end()
    }
}
