//! Trunkpeak - peak concurrent SIP trunking call analysis
//!
//! This library pulls a day of call detail records from the provider, keeps
//! the trunking calls that did not fail, and counts for every second how many
//! of them were active at once. The busiest seconds are reported and the
//! per-second counts are stored in a per-run SQLite database.

pub mod call_record;
pub mod cli;
pub mod config;
pub mod csv_output;
pub mod error;
pub mod histogram;
pub mod interval;
pub mod json_output;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod top_k;
