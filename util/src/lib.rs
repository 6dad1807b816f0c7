//! Defines one-off utility functions used throughout the workspace
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

use std::time::{SystemTime, UNIX_EPOCH};

pub mod errors;
pub mod hex;
pub mod logging;

/// Returns the current unix timestamp in seconds, represented as u64
///
/// A clock set before the unix epoch reads as zero
pub fn get_current_time_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}
