//! Typed, read-only view over the well-known storm report columns.
//!
//! Reports keep their string values on the wire; this view coerces the
//! columns downstream consumers care about. Values that are absent or do not
//! parse come back as `None` rather than a sentinel.

use super::{Category, NormalizedReport};

/// Category-specific measurement column.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    /// `F_Scale` rating, e.g. `EF2` or `UNK`.
    FScale(Option<String>),
    /// `Size` in hundredths of an inch.
    HailSize(Option<u32>),
    /// `Speed` in mph. Feeds report `UNK` when the gust was not measured.
    WindSpeed(Option<u32>),
}

/// Coerced columns of one report.
#[derive(Debug, Clone, PartialEq)]
pub struct StormFields {
    /// `Time` as HHMM.
    pub time: Option<u16>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub measurement: Measurement,
}

impl StormFields {
    /// Both coordinates present and inside valid lat/lon bounds.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon))
                if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) =>
            {
                Some((lat, lon))
            }
            _ => None,
        }
    }
}

impl NormalizedReport {
    pub fn fields(&self) -> StormFields {
        let raw = self.raw();
        let measurement = match self.category() {
            Category::Tornado => Measurement::FScale(
                raw.get("F_Scale")
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned),
            ),
            Category::Hail => Measurement::HailSize(parse_trimmed(raw.get("Size"))),
            Category::Wind => Measurement::WindSpeed(parse_trimmed(raw.get("Speed"))),
        };

        StormFields {
            time: parse_trimmed(raw.get("Time")).filter(|t: &u16| *t < 2400 && t % 100 < 60),
            latitude: parse_trimmed(raw.get("Lat")),
            longitude: parse_trimmed(raw.get("Lon")),
            measurement,
        }
    }
}

fn parse_trimmed<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}
