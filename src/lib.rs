//! Storm report ingestion: download the daily tornado, hail and wind CSV
//! feeds, tag each row with its category and observation time, and publish
//! one JSON message per row to Kafka.

pub mod config;
pub mod delivery;
pub mod feed;
pub mod pipeline;
pub mod report;
