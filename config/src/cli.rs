//! The CLI and config definitions

use clap::Parser;
use constants::{
    DEFAULT_DUST_SATS, DEFAULT_FEE_PER_KB, DEFAULT_HISTORY_PAGE_SIZE, DEFAULT_MIN_ATOM_SCALE_FACTOR,
    DEFAULT_MIN_PRICE_INTEGER, DEFAULT_MIN_SCALE_RATIO, DEFAULT_SCRIPT_INTEGER_BITS,
};
use serde::{Deserialize, Serialize};
use util::logging::LevelFilter;

// -------
// | CLI |
// -------

/// Defines the offer book command line interface
///
/// Later occurrences of a flag override earlier ones, which lets explicit
/// flags override the config file
#[derive(Debug, Parser, Serialize, Deserialize)]
#[clap(author, about, long_about = None, args_override_self = true)]
#[rustfmt::skip]
pub struct Cli {
    // ---------------
    // | Config File |
    // ---------------
    /// A TOML config file to read from, explicit flags take precedence
    #[clap(long, value_parser)]
    pub config_file: Option<String>,

    // ---------------------
    // | Ledger Parameters |
    // ---------------------
    /// The value of token outputs and the smallest output the ledger relays
    #[clap(long, value_parser, default_value_t = DEFAULT_DUST_SATS)]
    pub dust_sats: u64,
    /// The fee rate of built transactions, in sats per 1000 bytes
    #[clap(long, value_parser, default_value_t = DEFAULT_FEE_PER_KB)]
    pub fee_per_kb: u64,
    /// The bit width of Script integers, including the sign bit
    #[clap(long, value_parser, default_value_t = DEFAULT_SCRIPT_INTEGER_BITS)]
    pub script_integer_bits: u32,

    // ----------------------------
    // | Approximation Parameters |
    // ----------------------------
    /// The minimum factor truncated atoms are scaled by when the price isn't
    /// a divisor of 10^9 nanosats
    #[clap(long, value_parser, default_value_t = DEFAULT_MIN_ATOM_SCALE_FACTOR)]
    pub min_atom_scale_factor: u64,
    /// Truncate sats further while the scaled price is below this
    #[clap(long, value_parser, default_value_t = DEFAULT_MIN_PRICE_INTEGER)]
    pub min_price_integer: u64,
    /// Only truncate sats further while the scale factor exceeds the scaled
    /// price by this ratio
    #[clap(long, value_parser, default_value_t = DEFAULT_MIN_SCALE_RATIO)]
    pub min_scale_ratio: u64,

    // -----------
    // | Queries |
    // -----------
    /// The number of txs per page of offer history
    #[clap(long, value_parser, default_value_t = DEFAULT_HISTORY_PAGE_SIZE)]
    pub history_page_size: usize,

    // -----------
    // | Logging |
    // -----------
    /// The log level, e.g. "debug"
    #[clap(long, value_parser, default_value = "info")]
    pub log_level: String,
}

// ----------
// | Config |
// ----------

/// The parsed and validated configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgoraConfig {
    /// The value of token outputs and the smallest output the ledger relays
    pub dust_sats: u64,
    /// The fee rate of built transactions, in sats per 1000 bytes
    pub fee_per_kb: u64,
    /// The bit width of Script integers, including the sign bit
    pub script_integer_bits: u32,
    /// The minimum scale factor for prices that aren't a divisor of 10^9
    pub min_atom_scale_factor: u64,
    /// Truncate sats further while the scaled price is below this
    pub min_price_integer: u64,
    /// Only truncate sats further while the scale factor exceeds the scaled
    /// price by this ratio
    pub min_scale_ratio: u64,
    /// The number of txs per page of offer history
    pub history_page_size: usize,
    /// The log level
    pub log_level: LevelFilter,
}

impl Default for AgoraConfig {
    fn default() -> Self {
        Self {
            dust_sats: DEFAULT_DUST_SATS,
            fee_per_kb: DEFAULT_FEE_PER_KB,
            script_integer_bits: DEFAULT_SCRIPT_INTEGER_BITS,
            min_atom_scale_factor: DEFAULT_MIN_ATOM_SCALE_FACTOR,
            min_price_integer: DEFAULT_MIN_PRICE_INTEGER,
            min_scale_ratio: DEFAULT_MIN_SCALE_RATIO,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            log_level: LevelFilter::INFO,
        }
    }
}

impl AgoraConfig {
    /// Install the global logger at the configured level
    pub fn setup_logging(&self) {
        util::logging::setup_system_logger(self.log_level);
    }
}
