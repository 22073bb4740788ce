//! Storm report feed retrieval.
//!
//! - **Locating**: build per-category feed URLs for today or a backfill date
//! - **Fetching**: streamed HTTP GET with timeout and size limits
//! - **Parsing**: incremental header-plus-rows CSV decoding into [`RawReport`]s
//!
//! # Example
//!
//! ```ignore
//! use stormfeed::feed::{feed_url, fetch_reports, parse_base_url, FeedDate, FeedLimits};
//! use stormfeed::report::Category;
//!
//! let base = parse_base_url("https://www.spc.noaa.gov/climo/reports/")?;
//! let url = feed_url(&base, Category::Hail, &FeedDate::Today)?;
//! let rows = fetch_reports(&client, url.as_str(), FeedLimits::default()).await?;
//! ```
//!
//! [`RawReport`]: crate::report::RawReport

mod fetcher;
mod locator;
mod parser;

pub use fetcher::{fetch_reports, FeedLimits, FetchError, DEFAULT_MAX_FEED_BYTES, DEFAULT_TIMEOUT};
pub use locator::{feed_url, parse_base_url, BackfillDate, FeedDate, LocatorError};
pub use parser::{parse_reports, ParseError, RowParser};
