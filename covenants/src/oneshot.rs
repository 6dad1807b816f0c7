//! The oneshot offer covenant
//!
//! A oneshot offer can only be accepted in full: the accepting transaction
//! must start with exactly the enforced outputs, which send the offered
//! token amount and pay the maker. The maker can cancel with `cancel_pk`.

use std::sync::Arc;

use constants::{AGORA_LOKAD_ID, ALL_ANYONECANPAY_BIP143, ALL_BIP143, ONESHOT_VARIANT};

use crate::{
    builder::Signatory,
    ecc::{Ecc, Pubkey, SecretKeyBytes},
    errors::CovenantError,
    hash::sha256d,
    script::*,
    token::{Token, TokenProtocol, slp_send},
    tx::{TxOutput, UnsignedTxInput, parse_tx_outputs, ser_tx_outputs},
};

/// Offset of hashOutputs in the preimage tail: outpoint, the 2-byte script
/// code, value and sequence
const HASH_OUTPUTS_IDX: u64 = 50;
/// The preimage prefix rebuilt by the covenant
const PREIMAGE_PREFIX_LEN: usize = 68;
/// Position of the enforced outputs push in the covenant
const ENFORCED_OUTPUTS_OP_IDX: usize = 1;
/// Position of the cancel pubkey push in the covenant
const CANCEL_PK_OP_IDX: usize = 27;

/// A oneshot offer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgoraOneshot {
    /// The outputs an accept tx must start with
    pub enforced_outputs: Vec<TxOutput>,
    /// The maker's key, which can cancel the offer
    pub cancel_pk: Pubkey,
}

impl AgoraOneshot {
    /// The covenant's redeem script
    pub fn script(&self) -> Script {
        Script::from_ops(&[
            Op::Code(OP_IF),
            push_bytes_op(ser_tx_outputs(&self.enforced_outputs)),
            Op::Code(OP_SWAP),
            Op::Code(OP_CAT),
            Op::Code(OP_HASH256),
            Op::Code(OP_OVER),
            push_number_op(HASH_OUTPUTS_IDX as i64),
            Op::Code(OP_SPLIT),
            Op::Code(OP_NIP),
            push_number_op(32),
            Op::Code(OP_SPLIT),
            Op::Code(OP_DROP),
            Op::Code(OP_EQUALVERIFY),
            Op::Code(OP_2),
            push_number_op(PREIMAGE_PREFIX_LEN as i64),
            Op::Code(OP_NUM2BIN),
            Op::Code(OP_SWAP),
            Op::Code(OP_CAT),
            Op::Code(OP_SHA256),
            Op::Code(OP_3DUP),
            Op::Code(OP_ROT),
            Op::Code(OP_CHECKDATASIGVERIFY),
            Op::Code(OP_DROP),
            push_bytes_op(vec![ALL_ANYONECANPAY_BIP143]),
            Op::Code(OP_CAT),
            Op::Code(OP_SWAP),
            Op::Code(OP_ELSE),
            push_bytes_op(self.cancel_pk.to_vec()),
            Op::Code(OP_ENDIF),
            Op::Code(OP_CODESEPARATOR),
            Op::Code(OP_CHECKSIG),
        ])
    }

    /// The SLP ad script revealing the offer terms
    pub fn ad_script(&self) -> Script {
        Script::from_ops(&[
            push_bytes_op(self.extra_outputs_ser()),
            Op::Code(OP_DROP),
            push_bytes_op(self.cancel_pk.to_vec()),
            Op::Code(OP_CHECKSIGVERIFY),
            push_bytes_op(ONESHOT_VARIANT.to_vec()),
            Op::Code(OP_EQUALVERIFY),
            push_bytes_op(AGORA_LOKAD_ID.to_vec()),
            Op::Code(OP_EQUAL),
        ])
    }

    /// The sats a taker pays, the total of the enforced outputs
    pub fn asked_sats(&self) -> u64 {
        self.enforced_outputs.iter().map(|output| output.sats).sum()
    }

    /// The data the agora indexer plugin stores for this offer
    pub fn plugin_data(&self) -> Vec<Vec<u8>> {
        vec![ONESHOT_VARIANT.to_vec(), self.extra_outputs_ser()]
    }

    /// The enforced outputs after the token OP_RETURN, serialized
    fn extra_outputs_ser(&self) -> Vec<u8> {
        ser_tx_outputs(self.enforced_outputs.iter().skip(1))
    }

    /// Reconstruct an offer from its ad redeem script and the token it holds
    pub fn from_redeem_script(ad_script: &Script, token: &Token) -> Result<Self, CovenantError> {
        let ops = ad_script.parse_ops()?;
        let [extra_outputs, Op::Code(OP_DROP), cancel_pk, Op::Code(OP_CHECKSIGVERIFY), variant, ..] =
            ops.as_slice()
        else {
            return Err(CovenantError::serialization("malformed oneshot ad script"));
        };
        if variant.push_data() != Some(ONESHOT_VARIANT) {
            return Err(CovenantError::serialization("ad script is not a oneshot ad"));
        }
        let extra_outputs = extra_outputs
            .push_data()
            .ok_or_else(|| CovenantError::serialization("oneshot ad must push its outputs"))?;
        let cancel_pk = cancel_pk
            .push_data()
            .and_then(|pk| Pubkey::try_from(pk).ok())
            .ok_or_else(|| CovenantError::serialization("oneshot ad must push a 33 byte pubkey"))?;

        let oneshot = Self::from_extra_outputs(extra_outputs, cancel_pk, token)?;
        if oneshot.ad_script() != *ad_script {
            return Err(CovenantError::serialization("ad script doesn't match the offer terms"));
        }
        Ok(oneshot)
    }

    /// Reconstruct an offer from its covenant script
    pub fn from_covenant_script(script: &Script) -> Result<Self, CovenantError> {
        let ops = script.parse_ops()?;
        let push_at = |idx: usize| ops.get(idx).and_then(Op::push_data);
        let (Some(enforced_outputs), Some(cancel_pk)) =
            (push_at(ENFORCED_OUTPUTS_OP_IDX), push_at(CANCEL_PK_OP_IDX))
        else {
            return Err(CovenantError::serialization("script is not a oneshot covenant"));
        };
        let cancel_pk = Pubkey::try_from(cancel_pk)
            .map_err(|_| CovenantError::serialization("cancel pubkey must be 33 bytes"))?;

        let oneshot = Self { enforced_outputs: parse_tx_outputs(enforced_outputs)?, cancel_pk };
        if oneshot.script() != *script {
            return Err(CovenantError::serialization("script is not a oneshot covenant"));
        }
        Ok(oneshot)
    }

    /// Reconstruct an offer from the data stored by the indexer plugin
    pub fn from_plugin_data(
        data: &[Vec<u8>],
        cancel_pk: Pubkey,
        token: &Token,
    ) -> Result<Self, CovenantError> {
        match data {
            [variant, extra_outputs, ..] if variant == ONESHOT_VARIANT => {
                Self::from_extra_outputs(extra_outputs, cancel_pk, token)
            },
            _ => Err(CovenantError::serialization("plugin data is not a oneshot offer")),
        }
    }

    /// Build the enforced outputs from the serialized extra outputs and the
    /// offered token
    fn from_extra_outputs(
        extra_outputs: &[u8],
        cancel_pk: Pubkey,
        token: &Token,
    ) -> Result<Self, CovenantError> {
        if token.token_type.protocol != TokenProtocol::Slp {
            return Err(CovenantError::unsupported(format!(
                "oneshot offers of {} tokens",
                token.token_type.protocol
            )));
        }
        let send = slp_send(&token.token_id, token.token_type.number, &[0, token.atoms]);
        let mut enforced_outputs = vec![TxOutput::new(0, send)];
        enforced_outputs.extend(parse_tx_outputs(extra_outputs)?);
        Ok(Self { enforced_outputs, cancel_pk })
    }
}

// ---------------
// | Signatories |
// ---------------

/// Accepts a oneshot offer
#[derive(Clone, Debug)]
pub struct AgoraOneshotSignatory {
    /// The taker's covenant secret key
    pub covenant_sk: SecretKeyBytes,
    /// The taker's covenant pubkey
    pub covenant_pk: Pubkey,
    /// How many outputs the covenant enforces
    pub num_enforced_outputs: usize,
}

impl AgoraOneshotSignatory {
    /// Create a signatory accepting an offer with `num_enforced_outputs`
    pub fn new(
        covenant_sk: SecretKeyBytes,
        covenant_pk: Pubkey,
        num_enforced_outputs: usize,
    ) -> Arc<dyn Signatory> {
        Arc::new(Self { covenant_sk, covenant_pk, num_enforced_outputs })
    }
}

impl Signatory for AgoraOneshotSignatory {
    fn sign(&self, ecc: &dyn Ecc, input: UnsignedTxInput<'_>) -> Result<Script, CovenantError> {
        let redeem_script = input.sign_data()?.script_code().clone();
        let preimage = input.covenant_preimage()?;
        let covenant_sig = ecc.schnorr_sign(&self.covenant_sk, &sha256d(&preimage))?;
        let buyer_outputs = input.tx.outputs.get(self.num_enforced_outputs..).ok_or_else(|| {
            CovenantError::signing("accept tx is missing enforced outputs")
        })?;

        Ok(Script::from_ops(&[
            push_bytes_op(self.covenant_pk.to_vec()),
            push_bytes_op(covenant_sig),
            push_bytes_op(preimage[PREIMAGE_PREFIX_LEN..].to_vec()),
            push_bytes_op(ser_tx_outputs(buyer_outputs)),
            Op::Code(OP_1),
            push_bytes_op(redeem_script.into_bytecode()),
        ]))
    }
}

/// Cancels a oneshot offer with the maker's key
#[derive(Clone, Debug)]
pub struct AgoraOneshotCancelSignatory {
    /// The maker's secret key
    pub cancel_sk: SecretKeyBytes,
}

impl AgoraOneshotCancelSignatory {
    /// Create a signatory cancelling the offer
    pub fn new(cancel_sk: SecretKeyBytes) -> Arc<dyn Signatory> {
        Arc::new(Self { cancel_sk })
    }
}

impl Signatory for AgoraOneshotCancelSignatory {
    fn sign(&self, ecc: &dyn Ecc, input: UnsignedTxInput<'_>) -> Result<Script, CovenantError> {
        let redeem_script = input.sign_data()?.script_code().clone();
        let preimage = input.sighash_preimage(ALL_BIP143, Some(0))?;
        let mut sig = ecc.schnorr_sign(&self.cancel_sk, &sha256d(&preimage))?;
        sig.push(ALL_BIP143);
        Ok(Script::from_ops(&[
            push_bytes_op(sig),
            Op::Push(OP_0, vec![]),
            push_bytes_op(redeem_script.into_bytecode()),
        ]))
    }
}
