//! Checks on a parsed config

use std::ops::RangeInclusive;

use constants::SCRIPT_INTEGER_BITS_RANGE;

use crate::AgoraConfig;

/// The supported history page sizes
const HISTORY_PAGE_SIZES: RangeInclusive<usize> = 1..=200;

/// Validate a parsed config
pub fn validate_config(config: &AgoraConfig) -> Result<(), String> {
    if !SCRIPT_INTEGER_BITS_RANGE.contains(&config.script_integer_bits) {
        return Err(format!(
            "script integer bits must be in {SCRIPT_INTEGER_BITS_RANGE:?}, got {}",
            config.script_integer_bits
        ));
    }
    if config.fee_per_kb == 0 {
        return Err("fee per kb must be at least 1".to_string());
    }
    if config.dust_sats == 0 {
        return Err("dust sats must be at least 1".to_string());
    }
    if !HISTORY_PAGE_SIZES.contains(&config.history_page_size) {
        return Err(format!(
            "history page size must be in {HISTORY_PAGE_SIZES:?}, got {}",
            config.history_page_size
        ));
    }
    Ok(())
}
