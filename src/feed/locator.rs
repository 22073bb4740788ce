use crate::report::Category;
use chrono::{DateTime, NaiveDate};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Errors that can occur while building feed locations.
#[derive(Error, Debug)]
pub enum LocatorError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// A backfill date that is neither `YYYY-MM-DD` nor unix seconds.
    #[error("Invalid date '{0}': expected YYYY-MM-DD or unix seconds")]
    InvalidDate(String),
}

/// Which day's feeds a run reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedDate {
    /// The rolling `today_*.csv` feeds. Rows get per-row wall-clock stamps.
    Today,
    /// A historical day, using date-coded feeds and one uniform stamp.
    Backfill(BackfillDate),
}

impl FeedDate {
    /// Filename of one category's feed for this date.
    pub fn feed_file(&self, category: Category) -> String {
        match self {
            FeedDate::Today => format!("today_{}.csv", category.feed_suffix()),
            FeedDate::Backfill(date) => {
                format!("{}_rpts_{}.csv", date.file_code(), category.feed_suffix())
            }
        }
    }

    /// Timestamp applied to every row of a run, if the run has one.
    pub fn explicit_timestamp(&self) -> Option<&str> {
        match self {
            FeedDate::Today => None,
            FeedDate::Backfill(date) => Some(date.label()),
        }
    }
}

impl fmt::Display for FeedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedDate::Today => f.write_str("today"),
            FeedDate::Backfill(date) => write!(f, "{}", date.day()),
        }
    }
}

/// A backfill day plus the caller's original spelling of it.
///
/// Accepts `YYYY-MM-DD` or unix seconds (interpreted in UTC). The original
/// text is kept verbatim and becomes the `observedAt` stamp of every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillDate {
    day: NaiveDate,
    label: String,
}

impl BackfillDate {
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Six-digit `YYMMDD` code used in archived feed filenames.
    pub fn file_code(&self) -> String {
        self.day.format("%y%m%d").to_string()
    }
}

impl FromStr for BackfillDate {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || LocatorError::InvalidDate(s.to_owned());

        let day = if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            let secs: i64 = trimmed.parse().map_err(|_| invalid())?;
            DateTime::from_timestamp(secs, 0)
                .ok_or_else(invalid)?
                .date_naive()
        } else {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| invalid())?
        };

        Ok(Self {
            day,
            label: trimmed.to_owned(),
        })
    }
}

/// Validates the feed base URL and normalizes it to end in `/`.
///
/// Without the trailing slash, [`Url::join`] would replace the last path
/// segment instead of appending the feed filename.
pub fn parse_base_url(url_str: &str) -> Result<Url, LocatorError> {
    let mut url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(LocatorError::UnsupportedScheme(scheme.to_owned())),
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

/// Full URL of one category's feed.
pub fn feed_url(base: &Url, category: Category, date: &FeedDate) -> Result<Url, LocatorError> {
    Ok(base.join(&date.feed_file(category))?)
}
