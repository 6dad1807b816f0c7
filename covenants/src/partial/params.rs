//! Selects the truncation and scaling parameters of a partial offer
//!
//! The requested price is approximated by the closest ratio representable
//! with Script integers; the resulting `AgoraPartial::asked_sats` is the
//! ground truth for what takers pay.

use constants::{
    DEFAULT_DUST_SATS, DEFAULT_MIN_ATOM_SCALE_FACTOR, DEFAULT_MIN_PRICE_INTEGER,
    DEFAULT_MIN_SCALE_RATIO, INITIAL_SCRIPT_LEN, NANOSATS_PER_SAT, SCRIPT_INTEGER_BITS_RANGE,
};
use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use tracing::debug;

use super::AgoraPartial;
use crate::{
    ecc::Pubkey,
    errors::CovenantError,
    token::{TokenId, TokenProtocol},
};

/// What a maker asks for when creating a partial offer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgoraPartialParams {
    /// The atoms to offer, the actual offer may be slightly less
    pub offered_atoms: u64,
    /// The requested price in nanosats per atom
    pub price_nanosats_per_atom: u64,
    /// The maker's pubkey
    pub maker_pk: Pubkey,
    /// The smallest amount a taker may accept
    pub min_accepted_atoms: u64,
    /// The offered token
    pub token_id: TokenId,
    /// The type number of the offered token
    pub token_type: u8,
    /// The protocol of the offered token
    pub token_protocol: TokenProtocol,
    /// Lock time enforced on accept transactions, see `OfferBook::select_params`
    pub enforced_lock_time: u32,
    /// Value of the token outputs the covenant enforces
    pub dust_sats: u64,
    /// Minimum scale factor of truncated atoms for imprecise prices
    pub min_atom_scale_factor: u64,
    /// Truncate sats further while the scaled price is below this
    pub min_price_integer: u64,
    /// Only truncate sats further while the scale factor exceeds the scaled
    /// price by at least this ratio
    pub min_scale_ratio: u64,
}

impl Default for AgoraPartialParams {
    fn default() -> Self {
        Self {
            offered_atoms: 0,
            price_nanosats_per_atom: 0,
            maker_pk: [0; 33],
            min_accepted_atoms: 0,
            token_id: TokenId::default(),
            token_type: 1,
            token_protocol: TokenProtocol::Slp,
            enforced_lock_time: 0,
            dust_sats: DEFAULT_DUST_SATS,
            min_atom_scale_factor: DEFAULT_MIN_ATOM_SCALE_FACTOR,
            min_price_integer: DEFAULT_MIN_PRICE_INTEGER,
            min_scale_ratio: DEFAULT_MIN_SCALE_RATIO,
        }
    }
}

/// Convert a big integer that must fit into a u64
fn to_u64(value: &BigUint, name: &str) -> Result<u64, CovenantError> {
    value.to_u64().ok_or_else(|| CovenantError::infeasible(format!("{name} {value} exceeds u64")))
}

/// Convert a byte count chosen by the search into the struct's width
fn trunc_bytes(value: u32, name: &str) -> Result<u8, CovenantError> {
    u8::try_from(value).map_err(|_| CovenantError::infeasible(format!("{name} {value} too large")))
}

impl AgoraPartial {
    /// Approximate the requested offer by covenant parameters, for a network
    /// whose Script integers have `script_integer_bits` bits including sign
    pub fn approximate(
        params: &AgoraPartialParams,
        script_integer_bits: u32,
    ) -> Result<Self, CovenantError> {
        validate_params(params)?;
        if !SCRIPT_INTEGER_BITS_RANGE.contains(&script_integer_bits) {
            return Err(CovenantError::infeasible(format!(
                "script_integer_bits must be in {SCRIPT_INTEGER_BITS_RANGE:?}, got {script_integer_bits}"
            )));
        }

        let offered_atoms = BigUint::from(params.offered_atoms);
        let price = BigUint::from(params.price_nanosats_per_atom);
        let nanosats = BigUint::from(NANOSATS_PER_SAT);
        let max_script_int = (BigUint::one() << (script_integer_bits - 1)) - 1u32;

        // Prices dividing 10^9 are exact and need no extra precision
        let is_precise_price = NANOSATS_PER_SAT % params.price_nanosats_per_atom == 0;
        let min_atom_scale_factor =
            BigUint::from(if is_precise_price { 1 } else { params.min_atom_scale_factor });

        let mut trunc_atoms = offered_atoms.clone();
        let mut num_atoms_trunc_bytes = 0u32;
        while &trunc_atoms * &min_atom_scale_factor > max_script_int {
            trunc_atoms >>= 8;
            num_atoms_trunc_bytes += 1;
        }

        let required_sats = &offered_atoms * &price / &nanosats;
        let mut required_trunc_sats = required_sats;
        let mut num_sats_trunc_bytes = 0u32;
        while required_trunc_sats > max_script_int {
            required_trunc_sats >>= 8;
            num_sats_trunc_bytes += 1;
        }

        if trunc_atoms.is_zero() {
            return Err(CovenantError::infeasible(format!(
                "Parameters cannot be represented in Script: {} atoms truncate to 0",
                params.offered_atoms
            )));
        }
        let mut atoms_scale_factor = &max_script_int / &trunc_atoms;

        let calc_price = |scale: &BigUint, num_sats_trunc_bytes: u32| -> BigUint {
            ((BigUint::one() << (8 * num_sats_trunc_bytes)) * scale * &nanosats)
                / ((BigUint::one() << (8 * num_atoms_trunc_bytes)) * &price)
        };

        // Few atoms for many sats: truncate sats further for precision, but
        // only while the scale factor stays well above the price
        let min_price_integer = BigUint::from(params.min_price_integer);
        let min_scale_ratio = BigUint::from(params.min_scale_ratio);
        let mut scaled_price = calc_price(&atoms_scale_factor, num_sats_trunc_bytes);
        while scaled_price < min_price_integer
            && &scaled_price * &min_scale_ratio < atoms_scale_factor
        {
            num_sats_trunc_bytes += 1;
            scaled_price = calc_price(&atoms_scale_factor, num_sats_trunc_bytes);
        }

        // Rounding the sats up in the Script must not overflow
        if &trunc_atoms * &atoms_scale_factor + &scaled_price - 1u32 > max_script_int {
            if &trunc_atoms * &atoms_scale_factor <= scaled_price {
                atoms_scale_factor >>= 1;
                scaled_price = calc_price(&atoms_scale_factor, num_sats_trunc_bytes);
            }
            if scaled_price > &max_script_int + 1u32 {
                return Err(CovenantError::infeasible(format!(
                    "Parameters cannot be represented in Script: offered_atoms={}, \
                     price_nanosats_per_atom={}",
                    params.offered_atoms, params.price_nanosats_per_atom
                )));
            }
            let max_trunc_atoms = &max_script_int + 1u32 - &scaled_price;
            if trunc_atoms > max_trunc_atoms {
                atoms_scale_factor = BigUint::one();
                trunc_atoms = max_trunc_atoms;
            } else {
                atoms_scale_factor = &max_trunc_atoms / &trunc_atoms;
            }
            scaled_price = calc_price(&atoms_scale_factor, num_sats_trunc_bytes);
        }

        let min_accepted_scaled_trunc_atoms = (BigUint::from(params.min_accepted_atoms)
            * &atoms_scale_factor)
            >> (8 * num_atoms_trunc_bytes);

        let partial = AgoraPartial {
            trunc_atoms: to_u64(&trunc_atoms, "trunc_atoms")?,
            num_atoms_trunc_bytes: trunc_bytes(num_atoms_trunc_bytes, "num_atoms_trunc_bytes")?,
            atoms_scale_factor: to_u64(&atoms_scale_factor, "atoms_scale_factor")?,
            scaled_trunc_atoms_per_trunc_sat: to_u64(
                &scaled_price,
                "scaled_trunc_atoms_per_trunc_sat",
            )?,
            num_sats_trunc_bytes: trunc_bytes(num_sats_trunc_bytes, "num_sats_trunc_bytes")?,
            maker_pk: params.maker_pk,
            min_accepted_scaled_trunc_atoms: to_u64(
                &min_accepted_scaled_trunc_atoms,
                "min_accepted_scaled_trunc_atoms",
            )?,
            token_id: params.token_id,
            token_type: params.token_type,
            token_protocol: params.token_protocol,
            script_len: INITIAL_SCRIPT_LEN,
            enforced_lock_time: params.enforced_lock_time,
            dust_sats: params.dust_sats,
        };
        if partial.scaled_trunc_atoms_per_trunc_sat == 0 {
            return Err(CovenantError::infeasible(format!(
                "Parameters cannot be represented in Script: price {} rounds to 0",
                params.price_nanosats_per_atom
            )));
        }
        partial.validate()?;

        let min_accepted_atoms = partial.min_accepted_atoms();
        if min_accepted_atoms < 1 {
            return Err(CovenantError::infeasible(format!(
                "min_accepted_atoms too small, got truncated to 0: min_accepted_atoms={}",
                params.min_accepted_atoms
            )));
        }
        let min_asked_sats = partial.asked_sats(partial.prepare_accepted_atoms(min_accepted_atoms))?;
        if min_asked_sats < partial.dust_sats {
            return Err(CovenantError::infeasible(format!(
                "min_accepted_atoms would cost less than dust at this price: {min_asked_sats} sats \
                 < {} dust",
                partial.dust_sats
            )));
        }

        let partial = partial.with_measured_script_len();
        debug!(
            offered_atoms = partial.offered_atoms(),
            num_atoms_trunc_bytes = partial.num_atoms_trunc_bytes,
            num_sats_trunc_bytes = partial.num_sats_trunc_bytes,
            atoms_scale_factor = partial.atoms_scale_factor,
            script_len = partial.script_len,
            "approximated partial offer"
        );
        Ok(partial)
    }
}

/// Check the requested offer before approximating it
fn validate_params(params: &AgoraPartialParams) -> Result<(), CovenantError> {
    if params.offered_atoms < 1 {
        return Err(CovenantError::infeasible(format!(
            "offered_atoms must be at least 1, got {}",
            params.offered_atoms
        )));
    }
    if params.price_nanosats_per_atom < 1 {
        return Err(CovenantError::infeasible(format!(
            "price_nanosats_per_atom must be at least 1, got {}",
            params.price_nanosats_per_atom
        )));
    }
    if params.min_accepted_atoms < 1 {
        return Err(CovenantError::infeasible(format!(
            "min_accepted_atoms must be at least 1, got {}",
            params.min_accepted_atoms
        )));
    }
    let max_atoms = params.token_protocol.max_atoms();
    if params.offered_atoms > max_atoms {
        return Err(CovenantError::infeasible(format!(
            "For {}, offered_atoms can be at most {max_atoms:#x}, got {}",
            params.token_protocol, params.offered_atoms
        )));
    }
    if params.min_accepted_atoms > params.offered_atoms {
        return Err(CovenantError::infeasible(format!(
            "offered_atoms must be greater than min_accepted_atoms, got offered_atoms={} \
             min_accepted_atoms={}",
            params.offered_atoms, params.min_accepted_atoms
        )));
    }
    Ok(())
}
