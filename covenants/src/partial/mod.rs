//! The partial offer covenant
//!
//! A partial offer sells tokens in any quantity between a minimum and the
//! full offered amount. Script integers are only 31 bits wide (plus sign), so
//! the covenant works on truncated amounts: token amounts drop their lowest
//! `num_atoms_trunc_bytes` bytes and sats amounts drop their lowest
//! `num_sats_trunc_bytes` bytes. Truncated token amounts are additionally
//! multiplied by `atoms_scale_factor` to gain precision before dividing by
//! the price, `scaled_trunc_atoms_per_trunc_sat`.
//!
//! Accepting part of an offer sends the remainder to a new covenant with the
//! same terms, see `AgoraPartial::with_trunc_atoms`.

mod params;
mod script;
mod signatory;

pub use params::AgoraPartialParams;
pub use signatory::{AgoraAdSignatory, AgoraPartialCancelSignatory, AgoraPartialSignatory};

use constants::{AGORA_LOKAD_ID, INITIAL_SCRIPT_LEN, NANOSATS_PER_SAT, PARTIAL_VARIANT};

use crate::{
    ecc::Pubkey,
    errors::CovenantError,
    script::{
        OP_CHECKSIGVERIFY, OP_DROP, OP_EQUAL, OP_EQUALVERIFY, OP_RESERVED, OP_RETURN, Op, Script,
        push_bytes_op,
    },
    ser::ByteReader,
    token::{
        Token, TokenId, TokenProtocol, TokenType, alp_send_intro, parse_alp_send, parse_slp_send,
        slp_send,
    },
};

/// Length of the SLP ad pushdata
const SLP_AD_PUSHDATA_LEN: usize = 63;
/// Length of the ALP ad pushdata, which carries the LOKAD id and variant
const ALP_AD_PUSHDATA_LEN: usize = 75;
/// The most bytes that can be truncated off an 8-byte amount
const MAX_TRUNC_BYTES: u8 = 7;

/// A partial offer covenant with all its parameters
///
/// Instances are immutable values; accepting part of an offer derives a new
/// instance for the remainder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgoraPartial {
    /// Offered atoms with the lowest `num_atoms_trunc_bytes` bytes removed
    pub trunc_atoms: u64,
    /// How many bytes are truncated off token amounts
    pub num_atoms_trunc_bytes: u8,
    /// Factor truncated atoms are multiplied with in the Script
    pub atoms_scale_factor: u64,
    /// The price, in scaled truncated atoms per truncated sat
    pub scaled_trunc_atoms_per_trunc_sat: u64,
    /// How many bytes are truncated off sats amounts
    pub num_sats_trunc_bytes: u8,
    /// The maker's pubkey, receives the sats and can cancel
    pub maker_pk: Pubkey,
    /// The minimum accepted amount, scaled and truncated
    pub min_accepted_scaled_trunc_atoms: u64,
    /// The offered token
    pub token_id: TokenId,
    /// The type number of the offered token
    pub token_type: u8,
    /// The protocol of the offered token
    pub token_protocol: TokenProtocol,
    /// Byte length of the Script after the first OP_CODESEPARATOR
    pub script_len: usize,
    /// Lock time enforced on accept transactions
    pub enforced_lock_time: u32,
    /// Value of the token outputs the Script enforces
    pub dust_sats: u64,
}

impl AgoraPartial {
    // ------------
    // | Queries |
    // ------------

    /// The number of bits truncated off token amounts
    pub fn num_atoms_trunc_bits(&self) -> u32 {
        8 * self.num_atoms_trunc_bytes as u32
    }

    /// The number of bits truncated off sats amounts
    pub fn num_sats_trunc_bits(&self) -> u32 {
        8 * self.num_sats_trunc_bytes as u32
    }

    /// The actually offered atoms, which may be less than what was requested
    /// when approximating
    pub fn offered_atoms(&self) -> u64 {
        self.trunc_atoms << self.num_atoms_trunc_bits()
    }

    /// The actual minimum of atoms that can be accepted
    pub fn min_accepted_atoms(&self) -> u64 {
        let scaled = (self.min_accepted_scaled_trunc_atoms as u128) << self.num_atoms_trunc_bits();
        let min_accepted = scaled / self.atoms_scale_factor.max(1) as u128;
        u64::try_from(min_accepted).unwrap_or(u64::MAX)
    }

    /// The sats that have to be paid to the maker to accept `accepted_atoms`
    ///
    /// `accepted_atoms` must have its truncated bits cleared, see
    /// `prepare_accepted_atoms`
    pub fn asked_sats(&self, accepted_atoms: u64) -> Result<u64, CovenantError> {
        let bits = self.num_atoms_trunc_bits();
        let accepted_trunc_atoms = accepted_atoms >> bits;
        if accepted_trunc_atoms << bits != accepted_atoms {
            return Err(CovenantError::invalid_accepted(format!(
                "accepted_atoms must have the last {bits} bits set to zero, use \
                 prepare_accepted_atoms to get a valid amount"
            )));
        }

        // Divide rounding up, as the Script does
        let scaled = accepted_trunc_atoms as u128 * self.atoms_scale_factor as u128;
        let price = self.scaled_trunc_atoms_per_trunc_sat as u128;
        let asked_trunc_sats = (scaled + price - 1) / price;
        let asked_sats = asked_trunc_sats << self.num_sats_trunc_bits();
        u64::try_from(asked_sats)
            .map_err(|_| CovenantError::overflow(format!("asked sats {asked_sats} exceed u64")))
    }

    /// Clear the truncated bits of `accepted_atoms`
    pub fn prepare_accepted_atoms(&self, accepted_atoms: u64) -> u64 {
        let bits = self.num_atoms_trunc_bits();
        (accepted_atoms >> bits) << bits
    }

    /// The effective price in nanosats per atom when accepting
    /// `accepted_atoms`, the full offer if `None`
    pub fn price_nanosats_per_atom(&self, accepted_atoms: Option<u64>) -> Result<u64, CovenantError> {
        let prepared = self.prepare_accepted_atoms(accepted_atoms.unwrap_or(self.offered_atoms()));
        if prepared == 0 {
            return Err(CovenantError::invalid_accepted("cannot price zero atoms"));
        }
        let sats = self.asked_sats(prepared)? as u128;
        let price = sats * NANOSATS_PER_SAT as u128 / prepared as u128;
        u64::try_from(price).map_err(|_| CovenantError::overflow(format!("price {price} exceeds u64")))
    }

    /// Reject accepting `accepted_atoms` if the remainder could never be
    /// accepted or would be worth less than dust
    pub fn prevent_unacceptable_remainder(&self, accepted_atoms: u64) -> Result<(), CovenantError> {
        let offered_atoms = self.offered_atoms();
        if accepted_atoms > offered_atoms {
            return Err(CovenantError::invalid_accepted(format!(
                "cannot accept {accepted_atoms} atoms, only {offered_atoms} are offered"
            )));
        }
        let leftover_atoms = self.prepare_accepted_atoms(offered_atoms - accepted_atoms);
        if leftover_atoms == 0 {
            return Ok(());
        }

        let leftover_trunc_atoms = leftover_atoms >> self.num_atoms_trunc_bits();
        let leftover_scaled = leftover_trunc_atoms as u128 * self.atoms_scale_factor as u128;
        if leftover_scaled < self.min_accepted_scaled_trunc_atoms as u128 {
            return Err(CovenantError::UnacceptableRemainder { accepted_atoms });
        }
        if self.asked_sats(leftover_atoms)? < self.dust_sats {
            return Err(CovenantError::RemainderBelowDust { accepted_atoms });
        }
        Ok(())
    }

    /// The covenant left behind after a partial accept, holding
    /// `trunc_atoms` truncated atoms under the same terms
    pub fn with_trunc_atoms(&self, trunc_atoms: u64) -> Self {
        Self { trunc_atoms, ..self.clone() }
    }

    /// The token type of the offered token
    pub fn token_type(&self) -> TokenType {
        TokenType { protocol: self.token_protocol, number: self.token_type }
    }

    // -----------------
    // | Serialization |
    // -----------------

    /// The offer terms as committed to in the Script and the ad
    pub fn ad_pushdata(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(ALP_AD_PUSHDATA_LEN);
        if self.token_protocol == TokenProtocol::Alp {
            data.extend_from_slice(AGORA_LOKAD_ID);
            data.push(PARTIAL_VARIANT.len() as u8);
            data.extend_from_slice(PARTIAL_VARIANT);
        }
        data.push(self.num_atoms_trunc_bytes);
        data.push(self.num_sats_trunc_bytes);
        data.extend_from_slice(&self.atoms_scale_factor.to_le_bytes());
        data.extend_from_slice(&self.scaled_trunc_atoms_per_trunc_sat.to_le_bytes());
        data.extend_from_slice(&self.min_accepted_scaled_trunc_atoms.to_le_bytes());
        data.extend_from_slice(&self.enforced_lock_time.to_le_bytes());
        data.extend_from_slice(&self.maker_pk);
        data
    }

    /// The token protocol intro followed by the ad, together with the length
    /// of the intro
    pub fn covenant_consts(&self) -> (Vec<u8>, usize) {
        let ad_pushdata = self.ad_pushdata();
        match self.token_protocol {
            TokenProtocol::Slp => {
                let mut consts = slp_send(&self.token_id, self.token_type, &[0]).into_bytecode();
                let intro_len = consts.len();
                consts.extend_from_slice(&ad_pushdata);
                (consts, intro_len)
            },
            TokenProtocol::Alp => {
                let mut consts = alp_send_intro(&self.token_id, self.token_type);
                let intro_len = consts.len();
                let empp_intro = Script::from_ops(&[
                    Op::Code(OP_RETURN),
                    Op::Code(OP_RESERVED),
                    push_bytes_op(ad_pushdata),
                ]);
                consts.extend_from_slice(empp_intro.bytecode());
                (consts, intro_len)
            },
        }
    }

    /// The data the agora indexer plugin stores for this offer
    pub fn plugin_data(&self) -> Vec<Vec<u8>> {
        vec![
            PARTIAL_VARIANT.to_vec(),
            vec![self.num_atoms_trunc_bytes],
            vec![self.num_sats_trunc_bytes],
            self.atoms_scale_factor.to_le_bytes().to_vec(),
            self.scaled_trunc_atoms_per_trunc_sat.to_le_bytes().to_vec(),
            self.min_accepted_scaled_trunc_atoms.to_le_bytes().to_vec(),
            self.enforced_lock_time.to_le_bytes().to_vec(),
        ]
    }

    /// The SLP ad script, which the offered tokens are sent to before the
    /// offer is created so the terms are revealed on chain
    pub fn ad_script(&self) -> Script {
        let (consts, _) = self.covenant_consts();
        Script::from_ops(&[
            push_bytes_op(consts),
            Op::Code(OP_DROP),
            push_bytes_op(self.maker_pk.to_vec()),
            Op::Code(OP_CHECKSIGVERIFY),
            push_bytes_op(PARTIAL_VARIANT.to_vec()),
            Op::Code(OP_EQUALVERIFY),
            push_bytes_op(AGORA_LOKAD_ID.to_vec()),
            Op::Code(OP_EQUAL),
        ])
    }

    // -----------
    // | Parsing |
    // -----------

    /// Reconstruct an offer from an ad pushdata and the token it holds
    pub fn parse_ad_pushdata(
        pushdata: &[u8],
        token: &Token,
        dust_sats: u64,
    ) -> Result<Self, CovenantError> {
        let protocol = token.token_type.protocol;
        let mut reader = ByteReader::new(pushdata);
        match protocol {
            TokenProtocol::Slp if pushdata.len() != SLP_AD_PUSHDATA_LEN => {
                return Err(CovenantError::serialization(format!(
                    "SLP partial ad must be {SLP_AD_PUSHDATA_LEN} bytes, got {}",
                    pushdata.len()
                )))
            },
            TokenProtocol::Alp => {
                if pushdata.len() != ALP_AD_PUSHDATA_LEN {
                    return Err(CovenantError::serialization(format!(
                        "ALP partial ad must be {ALP_AD_PUSHDATA_LEN} bytes, got {}",
                        pushdata.len()
                    )));
                }
                let lokad_id = reader.read_bytes(AGORA_LOKAD_ID.len())?;
                let variant_len = reader.read_u8()? as usize;
                let variant = reader.read_bytes(variant_len)?;
                if lokad_id != AGORA_LOKAD_ID || variant != PARTIAL_VARIANT {
                    return Err(CovenantError::serialization("not a partial ad"));
                }
            },
            TokenProtocol::Slp => {},
        }

        let num_atoms_trunc_bytes = reader.read_u8()?;
        let num_sats_trunc_bytes = reader.read_u8()?;
        let atoms_scale_factor = reader.read_u64()?;
        let scaled_trunc_atoms_per_trunc_sat = reader.read_u64()?;
        let min_accepted_scaled_trunc_atoms = reader.read_u64()?;
        let enforced_lock_time = reader.read_u32()?;
        let maker_pk: Pubkey = reader.read_array()?;

        Self::from_terms(
            PartialTerms {
                num_atoms_trunc_bytes,
                num_sats_trunc_bytes,
                atoms_scale_factor,
                scaled_trunc_atoms_per_trunc_sat,
                min_accepted_scaled_trunc_atoms,
                enforced_lock_time,
            },
            maker_pk,
            token,
            dust_sats,
        )
    }

    /// Reconstruct an offer from the data stored by the indexer plugin
    pub fn from_plugin_data(
        data: &[Vec<u8>],
        maker_pk: Pubkey,
        token: &Token,
        dust_sats: u64,
    ) -> Result<Self, CovenantError> {
        if data.first().map(Vec::as_slice) != Some(PARTIAL_VARIANT) {
            return Err(CovenantError::serialization("plugin data is not a partial offer"));
        }
        if data.len() < 7 {
            return Err(CovenantError::unsupported("Outdated plugin"));
        }

        /// Parse a fixed size little endian field
        fn field<const N: usize>(data: &[u8], name: &str) -> Result<[u8; N], CovenantError> {
            data.try_into().map_err(|_| {
                CovenantError::serialization(format!("{name} must be {N} bytes, got {}", data.len()))
            })
        }

        let [num_atoms_trunc_bytes] = field::<1>(&data[1], "num_atoms_trunc_bytes")?;
        let [num_sats_trunc_bytes] = field::<1>(&data[2], "num_sats_trunc_bytes")?;
        let terms = PartialTerms {
            num_atoms_trunc_bytes,
            num_sats_trunc_bytes,
            atoms_scale_factor: u64::from_le_bytes(field(&data[3], "atoms_scale_factor")?),
            scaled_trunc_atoms_per_trunc_sat: u64::from_le_bytes(field(
                &data[4],
                "scaled_trunc_atoms_per_trunc_sat",
            )?),
            min_accepted_scaled_trunc_atoms: u64::from_le_bytes(field(
                &data[5],
                "min_accepted_scaled_trunc_atoms",
            )?),
            enforced_lock_time: u32::from_le_bytes(field(&data[6], "enforced_lock_time")?),
        };
        Self::from_terms(terms, maker_pk, token, dust_sats)
    }

    /// Reconstruct an SLP offer from the consts pushed first by either its ad
    /// or its covenant script
    pub fn from_redeem_script(
        redeem_script: &Script,
        token: &Token,
        dust_sats: u64,
    ) -> Result<Self, CovenantError> {
        let consts = redeem_script
            .ops()
            .next()
            .transpose()?
            .and_then(|op| op.push_data().map(<[u8]>::to_vec))
            .ok_or_else(|| CovenantError::serialization("redeem script must start with a push"))?;
        let intro_len = slp_send(&token.token_id, token.token_type.number, &[0]).len();
        if consts.len() < intro_len {
            return Err(CovenantError::serialization("covenant consts too short"));
        }
        Self::parse_ad_pushdata(&consts[intro_len..], token, dust_sats)
    }

    /// Reconstruct an offer from its SLP ad redeem script
    pub fn from_ad_script(ad_script: &Script, token: &Token, dust_sats: u64) -> Result<Self, CovenantError> {
        let partial = Self::from_redeem_script(ad_script, token, dust_sats)?;
        if partial.ad_script() != *ad_script {
            return Err(CovenantError::serialization("ad script doesn't match the offer terms"));
        }
        Ok(partial)
    }

    /// Reconstruct an offer from its covenant script
    ///
    /// Fails unless the script is byte-for-byte the covenant the recovered
    /// terms produce
    pub fn from_covenant_script(script: &Script, dust_sats: u64) -> Result<Self, CovenantError> {
        let mut ops = script.ops();
        let mut next_push = || {
            ops.next()
                .transpose()?
                .and_then(|op| op.push_data().map(<[u8]>::to_vec))
                .ok_or_else(|| CovenantError::serialization("covenant must start with two pushes"))
        };
        let consts = next_push()?;
        let scaled_trunc_atoms: [u8; 8] = next_push()?
            .try_into()
            .map_err(|_| CovenantError::serialization("offered amount must be 8 bytes"))?;
        let scaled_trunc_atoms = u64::from_le_bytes(scaled_trunc_atoms);

        // Recover the token from the protocol intro; its amount is a
        // placeholder until the scale factor is known
        let (send, ad_pushdata) = if consts.first() == Some(&OP_RETURN) {
            let intro_len = slp_send(&TokenId::default(), 0, &[0]).len();
            if consts.len() < intro_len {
                return Err(CovenantError::serialization("covenant consts too short"));
            }
            let send = parse_slp_send(&Script::new(consts[..intro_len].to_vec()))?;
            (send, consts[intro_len..].to_vec())
        } else {
            let intro_len = alp_send_intro(&TokenId::default(), 0).len();
            if consts.len() < intro_len {
                return Err(CovenantError::serialization("covenant consts too short"));
            }
            let mut alp_send = consts[..intro_len].to_vec();
            alp_send.push(0);
            let send = parse_alp_send(&alp_send)?;
            let empp = Script::new(consts[intro_len..].to_vec());
            let pushdata = crate::token::parse_empp(&empp)
                .and_then(|pushdata| pushdata.into_iter().next())
                .ok_or_else(|| CovenantError::serialization("covenant has no ALP ad"))?;
            (send, pushdata)
        };
        let send = send.ok_or_else(|| CovenantError::serialization("covenant has no token intro"))?;

        let placeholder = Token::new(send.token_id, send.token_type, 0);
        let terms = Self::parse_ad_pushdata(&ad_pushdata, &placeholder, dust_sats)?;
        if terms.atoms_scale_factor == 0 || scaled_trunc_atoms % terms.atoms_scale_factor != 0 {
            return Err(CovenantError::serialization("offered amount is not scaled"));
        }
        let partial = terms.with_trunc_atoms(scaled_trunc_atoms / terms.atoms_scale_factor);
        partial.validate()?;
        if partial.script() != *script {
            return Err(CovenantError::serialization("script is not a partial covenant"));
        }
        Ok(partial)
    }

    /// Assemble an offer from parsed terms and the token held by the offer
    fn from_terms(
        terms: PartialTerms,
        maker_pk: Pubkey,
        token: &Token,
        dust_sats: u64,
    ) -> Result<Self, CovenantError> {
        if terms.num_atoms_trunc_bytes > MAX_TRUNC_BYTES {
            return Err(CovenantError::serialization(format!(
                "cannot truncate {} bytes",
                terms.num_atoms_trunc_bytes
            )));
        }
        let bits = 8 * terms.num_atoms_trunc_bytes as u32;
        let trunc_atoms = token.atoms >> bits;
        if token.atoms != 0 && trunc_atoms << bits != token.atoms {
            return Err(CovenantError::serialization(format!(
                "offered atoms {} have non-zero truncated bits",
                token.atoms
            )));
        }

        let partial = Self {
            trunc_atoms,
            num_atoms_trunc_bytes: terms.num_atoms_trunc_bytes,
            atoms_scale_factor: terms.atoms_scale_factor,
            scaled_trunc_atoms_per_trunc_sat: terms.scaled_trunc_atoms_per_trunc_sat,
            num_sats_trunc_bytes: terms.num_sats_trunc_bytes,
            maker_pk,
            min_accepted_scaled_trunc_atoms: terms.min_accepted_scaled_trunc_atoms,
            token_id: token.token_id,
            token_type: token.token_type.number,
            token_protocol: token.token_type.protocol,
            script_len: INITIAL_SCRIPT_LEN,
            enforced_lock_time: terms.enforced_lock_time,
            dust_sats,
        };
        // The offered amount of a bare ad is a placeholder, so only the terms
        // are checked before the Script is built
        partial.validate_terms()?;
        Ok(partial.with_measured_script_len())
    }

    /// Check the parameters can be encoded in a covenant
    pub fn validate(&self) -> Result<(), CovenantError> {
        if self.trunc_atoms == 0 {
            return Err(CovenantError::infeasible("trunc_atoms must be at least 1"));
        }
        self.validate_terms()?;
        if self.trunc_atoms.leading_zeros() < self.num_atoms_trunc_bits() {
            return Err(CovenantError::overflow(format!(
                "{} truncated atoms don't fit into u64",
                self.trunc_atoms
            )));
        }
        self.trunc_atoms.checked_mul(self.atoms_scale_factor).ok_or_else(|| {
            CovenantError::overflow(format!(
                "scaled atoms {} * {} overflow",
                self.trunc_atoms, self.atoms_scale_factor
            ))
        })?;
        Ok(())
    }

    /// Check the terms that the Script arithmetic depends on, independent of
    /// the offered amount
    fn validate_terms(&self) -> Result<(), CovenantError> {
        if self.num_atoms_trunc_bytes > MAX_TRUNC_BYTES || self.num_sats_trunc_bytes > MAX_TRUNC_BYTES {
            return Err(CovenantError::infeasible(format!(
                "cannot truncate {} token bytes and {} sats bytes",
                self.num_atoms_trunc_bytes, self.num_sats_trunc_bytes
            )));
        }
        if self.atoms_scale_factor == 0 || self.scaled_trunc_atoms_per_trunc_sat == 0 {
            return Err(CovenantError::infeasible("scale factor and price must be at least 1"));
        }
        Ok(())
    }

    /// Measure the Script after the first OP_CODESEPARATOR and store its
    /// length, which the Script itself depends on
    fn with_measured_script_len(mut self) -> Self {
        self.script_len = INITIAL_SCRIPT_LEN;
        let mut measured = self.script_after_codesep_len();
        if measured > INITIAL_SCRIPT_LEN {
            // Crossing 0x80 widens the script length push in the Script
            self.script_len = INITIAL_SCRIPT_LEN + 1;
            measured = self.script_after_codesep_len();
        }
        self.script_len = measured;
        self
    }

    /// The length of the Script after the first OP_CODESEPARATOR
    fn script_after_codesep_len(&self) -> usize {
        let (consts, _) = self.covenant_consts();
        let scaled = self.trunc_atoms.wrapping_mul(self.atoms_scale_factor);
        let prefix = Script::from_ops(&[
            push_bytes_op(consts),
            push_bytes_op(scaled.to_le_bytes().to_vec()),
        ]);
        self.script().len() - prefix.len() - 1
    }
}

/// Offer terms recovered from an ad or plugin data
struct PartialTerms {
    /// See `AgoraPartial::num_atoms_trunc_bytes`
    num_atoms_trunc_bytes: u8,
    /// See `AgoraPartial::num_sats_trunc_bytes`
    num_sats_trunc_bytes: u8,
    /// See `AgoraPartial::atoms_scale_factor`
    atoms_scale_factor: u64,
    /// See `AgoraPartial::scaled_trunc_atoms_per_trunc_sat`
    scaled_trunc_atoms_per_trunc_sat: u64,
    /// See `AgoraPartial::min_accepted_scaled_trunc_atoms`
    min_accepted_scaled_trunc_atoms: u64,
    /// See `AgoraPartial::enforced_lock_time`
    enforced_lock_time: u32,
}
