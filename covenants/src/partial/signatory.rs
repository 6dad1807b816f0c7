//! Signatories unlocking partial offers and their SLP ads

use std::sync::Arc;

use constants::{AGORA_LOKAD_ID, ALL_BIP143, PARTIAL_VARIANT};

use super::AgoraPartial;
use crate::{
    builder::Signatory,
    ecc::{Ecc, Pubkey, SecretKeyBytes},
    errors::CovenantError,
    hash::sha256d,
    script::{OP_0, OP_1, Op, Script, push_bytes_op, push_number_op},
    token::TokenProtocol,
    tx::{UnsignedTxInput, ser_tx_outputs},
};

/// The part of the preimage rebuilt by the covenant: the version and the two
/// hashes zeroed by ANYONECANPAY
const PREIMAGE_PREFIX_LEN: usize = 68;

/// Output index of the taker's outputs when the offer is fully accepted, after
/// the OP_RETURN and the maker's payment
const BUYER_OUTPUTS_IDX: usize = 2;

/// The variant pushes SLP covenants check at the end of their Script
fn variant_pushes(protocol: TokenProtocol) -> Vec<Op> {
    match protocol {
        TokenProtocol::Slp => vec![
            push_bytes_op(AGORA_LOKAD_ID.to_vec()),
            push_bytes_op(PARTIAL_VARIANT.to_vec()),
        ],
        TokenProtocol::Alp => vec![],
    }
}

/// Sign the input with SIGHASH_ALL, committing to the Script after the first
/// OP_CODESEPARATOR if `codesep_idx` is given
fn sign_all(
    ecc: &dyn Ecc,
    sk: &SecretKeyBytes,
    input: &UnsignedTxInput<'_>,
    codesep_idx: Option<usize>,
) -> Result<Vec<u8>, CovenantError> {
    let preimage = input.sighash_preimage(ALL_BIP143, codesep_idx)?;
    let mut sig = ecc.schnorr_sign(sk, &sha256d(&preimage))?;
    sig.push(ALL_BIP143);
    Ok(sig)
}

/// Accepts a partial offer
///
/// The covenant key is a throwaway key of the taker; the covenant checks the
/// same signature both against the preimage it rebuilds and against the tx
#[derive(Clone, Debug)]
pub struct AgoraPartialSignatory {
    /// The offer being accepted
    pub partial: AgoraPartial,
    /// The accepted atoms, truncated
    pub accepted_trunc_atoms: u64,
    /// The taker's covenant secret key
    pub covenant_sk: SecretKeyBytes,
    /// The taker's covenant pubkey
    pub covenant_pk: Pubkey,
}

impl AgoraPartialSignatory {
    /// Create a signatory accepting `accepted_trunc_atoms` of the offer
    pub fn new(
        partial: AgoraPartial,
        accepted_trunc_atoms: u64,
        covenant_sk: SecretKeyBytes,
        covenant_pk: Pubkey,
    ) -> Arc<dyn Signatory> {
        Arc::new(Self { partial, accepted_trunc_atoms, covenant_sk, covenant_pk })
    }
}

impl Signatory for AgoraPartialSignatory {
    fn sign(&self, ecc: &dyn Ecc, input: UnsignedTxInput<'_>) -> Result<Script, CovenantError> {
        let preimage = input.covenant_preimage()?;
        let covenant_sig = ecc.schnorr_sign(&self.covenant_sk, &sha256d(&preimage))?;

        // A remainder adds the new covenant output before the taker's outputs
        let has_leftover = self.accepted_trunc_atoms < self.partial.trunc_atoms;
        let buyer_outputs_idx = BUYER_OUTPUTS_IDX + usize::from(has_leftover);
        let buyer_outputs = input.tx.outputs.get(buyer_outputs_idx..).ok_or_else(|| {
            CovenantError::signing(format!("accept tx has no output {buyer_outputs_idx}"))
        })?;

        let accepted_scaled = self
            .accepted_trunc_atoms
            .checked_mul(self.partial.atoms_scale_factor)
            .and_then(|scaled| i64::try_from(scaled).ok())
            .ok_or_else(|| {
                CovenantError::overflow(format!(
                    "{} accepted truncated atoms overflow when scaled",
                    self.accepted_trunc_atoms
                ))
            })?;

        let mut ops = variant_pushes(self.partial.token_protocol);
        ops.extend([
            push_bytes_op(self.covenant_pk.to_vec()),
            push_bytes_op(covenant_sig),
            push_bytes_op(ser_tx_outputs(buyer_outputs)),
            push_bytes_op(preimage[PREIMAGE_PREFIX_LEN..].to_vec()),
            push_number_op(accepted_scaled),
            Op::Code(OP_1),
            push_bytes_op(self.partial.script().into_bytecode()),
        ]);
        Ok(Script::from_ops(&ops))
    }
}

/// Cancels a partial offer with the maker's key
#[derive(Clone, Debug)]
pub struct AgoraPartialCancelSignatory {
    /// The offer being cancelled
    pub partial: AgoraPartial,
    /// The maker's secret key
    pub cancel_sk: SecretKeyBytes,
}

impl AgoraPartialCancelSignatory {
    /// Create a signatory cancelling the offer
    pub fn new(partial: AgoraPartial, cancel_sk: SecretKeyBytes) -> Arc<dyn Signatory> {
        Arc::new(Self { partial, cancel_sk })
    }
}

impl Signatory for AgoraPartialCancelSignatory {
    fn sign(&self, ecc: &dyn Ecc, input: UnsignedTxInput<'_>) -> Result<Script, CovenantError> {
        let sig = sign_all(ecc, &self.cancel_sk, &input, Some(0))?;
        let mut ops = variant_pushes(self.partial.token_protocol);
        ops.extend([
            push_bytes_op(sig),
            Op::Push(OP_0, vec![]),
            push_bytes_op(self.partial.script().into_bytecode()),
        ]);
        Ok(Script::from_ops(&ops))
    }
}

/// Spends an SLP ad output into the covenant it advertises
#[derive(Clone, Debug)]
pub struct AgoraAdSignatory {
    /// The maker's secret key
    pub maker_sk: SecretKeyBytes,
    /// The covenant variant named by the ad
    pub variant: Vec<u8>,
}

impl AgoraAdSignatory {
    /// Create a signatory for an ad of the given variant
    pub fn new(maker_sk: SecretKeyBytes, variant: &[u8]) -> Arc<dyn Signatory> {
        Arc::new(Self { maker_sk, variant: variant.to_vec() })
    }
}

impl Signatory for AgoraAdSignatory {
    fn sign(&self, ecc: &dyn Ecc, input: UnsignedTxInput<'_>) -> Result<Script, CovenantError> {
        let redeem_script = input.sign_data()?.script_code().clone();
        let sig = sign_all(ecc, &self.maker_sk, &input, None)?;
        Ok(Script::from_ops(&[
            push_bytes_op(AGORA_LOKAD_ID.to_vec()),
            push_bytes_op(self.variant.clone()),
            push_bytes_op(sig),
            push_bytes_op(redeem_script.into_bytecode()),
        ]))
    }
}
