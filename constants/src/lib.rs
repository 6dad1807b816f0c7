//! Defines protocol-wide constants for agora offers

#![deny(unsafe_code)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(missing_docs)]

// ----------------------
// | Network Parameters |
// ----------------------

/// The default dust limit of the network, the minimum value of an output
pub const DEFAULT_DUST_SATS: u64 = 546;

/// The default fee rate, in satoshis per kilobyte
pub const DEFAULT_FEE_PER_KB: u64 = 1000;

/// The number of nano-satoshis in a satoshi, prices are quoted in nanosats
pub const NANOSATS_PER_SAT: u64 = 1_000_000_000;

/// The version used for all transactions built by the covenants
pub const TX_VERSION: i32 = 2;

/// The sequence number used for all inputs
pub const DEFAULT_SEQUENCE: u32 = 0xffff_ffff;

/// The number of bits of a Script integer, including the sign bit
pub const DEFAULT_SCRIPT_INTEGER_BITS: u32 = 32;
/// The Script integer widths covenants can be built for
pub const SCRIPT_INTEGER_BITS_RANGE: std::ops::RangeInclusive<u32> = 9..=64;

// -----------------
// | Sighash Flags |
// -----------------

/// SIGHASH_ALL | SIGHASH_FORKID
pub const ALL_BIP143: u8 = 0x41;

/// SIGHASH_ALL | SIGHASH_ANYONECANPAY | SIGHASH_FORKID
pub const ALL_ANYONECANPAY_BIP143: u8 = 0xc1;

// ----------------------
// | Agora Protocol IDs |
// ----------------------

/// The LOKAD id prefixing all agora ads
pub const AGORA_LOKAD_ID: &[u8] = b"AGR0";

/// The covenant variant string for oneshot offers
pub const ONESHOT_VARIANT: &[u8] = b"ONESHOT";

/// The covenant variant string for partial offers
pub const PARTIAL_VARIANT: &[u8] = b"PARTIAL";

/// The name the agora plugin is registered under in the indexer
pub const PLUGIN_NAME: &str = "agora";

/// Data tag of plugin entries for outputs not matching their advertised covenant
pub const PLUGIN_ERROR_TAG: &[u8] = b"ERROR";

/// Plugin group prefix for offers of a token id
pub const TOKEN_ID_PREFIX: &[u8] = b"T";

/// Plugin group prefix for offers by a maker pubkey
pub const PUBKEY_PREFIX: &[u8] = b"P";

/// Plugin group prefix for offers of a fungible token id
pub const FUNGIBLE_TOKEN_ID_PREFIX: &[u8] = b"F";

/// Plugin group prefix for offers of a token in an NFT group
pub const GROUP_TOKEN_ID_PREFIX: &[u8] = b"G";

/// The max page size when paging through plugin groups
pub const PLUGIN_GROUPS_MAX_PAGE_SIZE: usize = 50;

/// The default page size of historic offer queries
pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 25;

// -------------------------
// | Partial Approximation |
// -------------------------

/// The default minimum scale factor applied to truncated atoms
pub const DEFAULT_MIN_ATOM_SCALE_FACTOR: u64 = 1000;

/// The default minimum integer used to represent the scaled price
pub const DEFAULT_MIN_PRICE_INTEGER: u64 = 1000;

/// The default minimum ratio between the scale factor and the scaled price
pub const DEFAULT_MIN_SCALE_RATIO: u64 = 1000;

/// The max atoms an SLP amount can hold
pub const SLP_MAX_ATOMS: u64 = u64::MAX;

/// The max atoms an ALP amount can hold
pub const ALP_MAX_ATOMS: u64 = 0xffff_ffff_ffff;

/// The script length assumed before it is first measured
pub const INITIAL_SCRIPT_LEN: usize = 0x7f;

// -------------
// | Lock Time |
// -------------

/// Lock times at or above this value are interpreted as timestamps
pub const MIN_LOCK_TIME: u32 = 500_000_000;

/// How far the median time past is assumed to lag behind the wall clock
pub const MAX_MTP_LAG_SECS: u64 = 14 * 24 * 3600;
