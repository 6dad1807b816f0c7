//! An offer sitting on chain, and the transactions accepting or cancelling it

use std::sync::Arc;

use constants::{DEFAULT_DUST_SATS, DEFAULT_FEE_PER_KB};
use serde::{Deserialize, Serialize};

use crate::{
    builder::{Signatory, TxBuilder, TxBuilderInput, TxBuilderOutput, calc_tx_fee},
    ecc::{Ecc, Pubkey, SecretKeyBytes},
    errors::CovenantError,
    hash::hash160,
    oneshot::{AgoraOneshot, AgoraOneshotCancelSignatory, AgoraOneshotSignatory},
    partial::{AgoraPartial, AgoraPartialCancelSignatory, AgoraPartialSignatory},
    script::Script,
    token::{Token, TokenProtocol, alp_send, empp_script, slp_send},
    tx::{OutPoint, SignData, Tx, TxInput, TxOutput},
};

/// The covenant enforcing an offer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgoraOfferVariant {
    /// All-or-nothing offer
    Oneshot(AgoraOneshot),
    /// Offer that can be accepted in parts
    Partial(AgoraPartial),
}

impl AgoraOfferVariant {
    /// The redeem script of the covenant
    pub fn script(&self) -> Script {
        match self {
            Self::Oneshot(oneshot) => oneshot.script(),
            Self::Partial(partial) => partial.script(),
        }
    }

    /// The protocol of the offered token
    pub fn token_protocol(&self) -> TokenProtocol {
        match self {
            Self::Oneshot(_) => TokenProtocol::Slp,
            Self::Partial(partial) => partial.token_protocol,
        }
    }
}

/// Details of a taken offer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakenInfo {
    /// The sats paid to the maker
    pub sats_paid: u64,
    /// The script receiving the tokens
    pub taker_script: Script,
    /// The atoms bought
    pub atoms: u64,
}

/// Where an offer is in its lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgoraOfferStatus {
    /// Unspent and acceptable
    Open,
    /// Accepted, with details if the taker's output could be identified
    Taken(Option<TakenInfo>),
    /// Cancelled by the maker
    Canceled,
}

/// An offer on chain, i.e. one covenant output holding tokens
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgoraOffer {
    /// The covenant of the offer
    pub variant: AgoraOfferVariant,
    /// The output holding the offer
    pub outpoint: OutPoint,
    /// The offer output as an input, with sign data
    pub tx_builder_input: TxInput,
    /// The offered tokens
    pub token: Token,
    /// The offer status
    pub status: AgoraOfferStatus,
}

/// Parameters of `AgoraOffer::accept_tx`
#[derive(Clone, Debug)]
pub struct AcceptTxParams {
    /// A throwaway key signing the covenant, paired with `covenant_pk`
    pub covenant_sk: SecretKeyBytes,
    /// The pubkey of `covenant_sk`
    pub covenant_pk: Pubkey,
    /// Inputs paying asked sats and fees, with signatories
    pub fuel_inputs: Vec<TxBuilderInput>,
    /// Receives the tokens and the change
    pub recipient_script: Script,
    /// For partial offers, the atoms to accept
    pub accepted_atoms: Option<u64>,
    /// Value of the taker's token output
    pub dust_sats: u64,
    /// The fee rate
    pub fee_per_kb: u64,
    /// Allow leaving a remainder that can never be accepted
    pub allow_unspendable: bool,
}

impl Default for AcceptTxParams {
    fn default() -> Self {
        Self {
            covenant_sk: [0; 32],
            covenant_pk: [0; 33],
            fuel_inputs: vec![],
            recipient_script: Script::default(),
            accepted_atoms: None,
            dust_sats: DEFAULT_DUST_SATS,
            fee_per_kb: DEFAULT_FEE_PER_KB,
            allow_unspendable: false,
        }
    }
}

/// Parameters of `AgoraOffer::cancel_tx`
#[derive(Clone, Debug)]
pub struct CancelTxParams {
    /// The maker's secret key
    pub cancel_sk: SecretKeyBytes,
    /// Inputs paying the fee, with signatories
    pub fuel_inputs: Vec<TxBuilderInput>,
    /// Receives the tokens and the change
    pub recipient_script: Script,
    /// Value of the returned token output
    pub dust_sats: u64,
    /// The fee rate
    pub fee_per_kb: u64,
}

impl Default for CancelTxParams {
    fn default() -> Self {
        Self {
            cancel_sk: [0; 32],
            fuel_inputs: vec![],
            recipient_script: Script::default(),
            dust_sats: DEFAULT_DUST_SATS,
            fee_per_kb: DEFAULT_FEE_PER_KB,
        }
    }
}

impl AgoraOffer {
    /// An offer held by the P2SH output at `outpoint` worth `sats`
    pub fn new(
        variant: AgoraOfferVariant,
        outpoint: OutPoint,
        sats: u64,
        token: Token,
        status: AgoraOfferStatus,
    ) -> Self {
        let tx_builder_input = TxInput::new(outpoint, SignData::redeem_script(sats, variant.script()));
        Self { variant, outpoint, tx_builder_input, token, status }
    }

    /// The sats asked to accept the offer, excluding fees
    ///
    /// Partial offers need the accepted atoms
    pub fn asked_sats(&self, accepted_atoms: Option<u64>) -> Result<u64, CovenantError> {
        match &self.variant {
            AgoraOfferVariant::Oneshot(oneshot) => Ok(oneshot.asked_sats()),
            AgoraOfferVariant::Partial(partial) => {
                let accepted_atoms = accepted_atoms.ok_or_else(|| {
                    CovenantError::invalid_accepted("Must provide accepted_atoms for partial offers")
                })?;
                partial.asked_sats(accepted_atoms)
            },
        }
    }

    // ----------
    // | Accept |
    // ----------

    /// Build a tx accepting the offer
    ///
    /// The fuel inputs must cover the asked sats plus `accept_fee_sats`
    pub fn accept_tx(&self, ecc: &dyn Ecc, params: AcceptTxParams) -> Result<Tx, CovenantError> {
        let extra_outputs = vec![
            TxOutput::new(params.dust_sats, params.recipient_script.clone()).into(),
            TxBuilderOutput::Change(params.recipient_script),
        ];
        let builder = self.accept_tx_builder(
            params.covenant_sk,
            params.covenant_pk,
            params.fuel_inputs,
            extra_outputs,
            params.accepted_atoms,
            params.allow_unspendable,
        )?;
        builder.sign(ecc, params.fee_per_kb, params.dust_sats)
    }

    /// The fee of accepting the offer, on top of the asked sats
    pub fn accept_fee_sats(
        &self,
        recipient_script: &Script,
        extra_inputs: &[TxBuilderInput],
        fee_per_kb: u64,
        accepted_atoms: Option<u64>,
    ) -> Result<u64, CovenantError> {
        let builder = self.accept_tx_builder(
            [0; 32],
            [0; 33],
            extra_inputs.to_vec(),
            vec![TxOutput::new(0, recipient_script.clone()).into()],
            accepted_atoms,
            false,
        )?;
        Ok(calc_tx_fee(builder.measure_size()?, fee_per_kb))
    }

    /// Assemble the accept tx before signing
    fn accept_tx_builder(
        &self,
        covenant_sk: SecretKeyBytes,
        covenant_pk: Pubkey,
        fuel_inputs: Vec<TxBuilderInput>,
        extra_outputs: Vec<TxBuilderOutput>,
        accepted_atoms: Option<u64>,
        allow_unspendable: bool,
    ) -> Result<TxBuilder, CovenantError> {
        match &self.variant {
            AgoraOfferVariant::Oneshot(oneshot) => {
                let signatory = AgoraOneshotSignatory::new(
                    covenant_sk,
                    covenant_pk,
                    oneshot.enforced_outputs.len(),
                );
                let mut inputs = fuel_inputs;
                inputs.push(self.covenant_input(signatory));
                let mut outputs: Vec<TxBuilderOutput> =
                    oneshot.enforced_outputs.iter().cloned().map(Into::into).collect();
                outputs.extend(extra_outputs);
                Ok(TxBuilder { inputs, outputs, ..Default::default() })
            },
            AgoraOfferVariant::Partial(partial) => {
                let accepted_atoms = accepted_atoms.ok_or_else(|| {
                    CovenantError::invalid_accepted("Must set accepted_atoms for partial offers")
                })?;
                self.partial_accept_tx_builder(
                    partial,
                    covenant_sk,
                    covenant_pk,
                    fuel_inputs,
                    extra_outputs,
                    accepted_atoms,
                    allow_unspendable,
                )
            },
        }
    }

    /// Assemble the tx accepting `accepted_atoms` of a partial offer
    #[allow(clippy::too_many_arguments)]
    fn partial_accept_tx_builder(
        &self,
        partial: &AgoraPartial,
        covenant_sk: SecretKeyBytes,
        covenant_pk: Pubkey,
        fuel_inputs: Vec<TxBuilderInput>,
        extra_outputs: Vec<TxBuilderOutput>,
        accepted_atoms: u64,
        allow_unspendable: bool,
    ) -> Result<TxBuilder, CovenantError> {
        let trunc_factor = 1u64 << partial.num_atoms_trunc_bits();
        if accepted_atoms % trunc_factor != 0 {
            return Err(CovenantError::invalid_accepted(format!(
                "accepted_atoms must be a multiple of {trunc_factor}, got {accepted_atoms}"
            )));
        }
        if !allow_unspendable {
            partial.prevent_unacceptable_remainder(accepted_atoms)?;
        }
        let offered_atoms = self.token.atoms;
        let leftover_atoms = offered_atoms.checked_sub(accepted_atoms).ok_or_else(|| {
            CovenantError::invalid_accepted(format!(
                "cannot accept {accepted_atoms} atoms, only {offered_atoms} are offered"
            ))
        })?;

        let signatory = AgoraPartialSignatory::new(
            partial.clone(),
            accepted_atoms / trunc_factor,
            covenant_sk,
            covenant_pk,
        );
        let mut inputs = vec![self.covenant_input(signatory)];
        inputs.extend(fuel_inputs);

        let mut send_amounts = vec![0];
        if leftover_atoms > 0 {
            send_amounts.push(leftover_atoms);
        }
        send_amounts.push(accepted_atoms);
        let send_script = match partial.token_protocol {
            TokenProtocol::Slp => slp_send(&self.token.token_id, self.token.token_type.number, &send_amounts),
            TokenProtocol::Alp => empp_script(&[
                partial.ad_pushdata(),
                alp_send(&self.token.token_id, self.token.token_type.number, &send_amounts)?,
            ]),
        };

        let mut outputs: Vec<TxBuilderOutput> = vec![
            TxOutput::new(0, send_script).into(),
            TxOutput::new(
                partial.asked_sats(accepted_atoms)?,
                Script::p2pkh(&hash160(&partial.maker_pk)),
            )
            .into(),
        ];
        if leftover_atoms > 0 {
            let remainder = partial.with_trunc_atoms(leftover_atoms / trunc_factor);
            outputs.push(TxOutput::new(partial.dust_sats, remainder.script().to_p2sh()).into());
        }
        outputs.extend(extra_outputs);

        Ok(TxBuilder { inputs, outputs, locktime: partial.enforced_lock_time, ..Default::default() })
    }

    // ----------
    // | Cancel |
    // ----------

    /// Build a tx cancelling the offer, sending the tokens back
    ///
    /// The fuel inputs must cover `cancel_fee_sats`
    pub fn cancel_tx(&self, ecc: &dyn Ecc, params: CancelTxParams) -> Result<Tx, CovenantError> {
        let extra_outputs = vec![
            TxOutput::new(params.dust_sats, params.recipient_script.clone()).into(),
            TxBuilderOutput::Change(params.recipient_script),
        ];
        let builder = self.cancel_tx_builder(params.cancel_sk, params.fuel_inputs, extra_outputs)?;
        builder.sign(ecc, params.fee_per_kb, params.dust_sats)
    }

    /// The fee of cancelling the offer
    ///
    /// `extra_inputs` allows estimating a cancel combined with other inputs
    pub fn cancel_fee_sats(
        &self,
        recipient_script: &Script,
        extra_inputs: &[TxBuilderInput],
        fee_per_kb: u64,
    ) -> Result<u64, CovenantError> {
        let builder = self.cancel_tx_builder(
            [0; 32],
            extra_inputs.to_vec(),
            vec![TxOutput::new(0, recipient_script.clone()).into()],
        )?;
        Ok(calc_tx_fee(builder.measure_size()?, fee_per_kb))
    }

    /// Assemble the cancel tx before signing
    fn cancel_tx_builder(
        &self,
        cancel_sk: SecretKeyBytes,
        fuel_inputs: Vec<TxBuilderInput>,
        extra_outputs: Vec<TxBuilderOutput>,
    ) -> Result<TxBuilder, CovenantError> {
        let signatory = match &self.variant {
            AgoraOfferVariant::Oneshot(_) => AgoraOneshotCancelSignatory::new(cancel_sk),
            AgoraOfferVariant::Partial(partial) => {
                AgoraPartialCancelSignatory::new(partial.clone(), cancel_sk)
            },
        };
        let token = &self.token;
        let send_script = match self.variant.token_protocol() {
            TokenProtocol::Slp => slp_send(&token.token_id, token.token_type.number, &[token.atoms]),
            TokenProtocol::Alp => empp_script(&[alp_send(
                &token.token_id,
                token.token_type.number,
                &[token.atoms],
            )?]),
        };

        let mut inputs = fuel_inputs;
        inputs.push(self.covenant_input(signatory));
        let mut outputs = vec![TxOutput::new(0, send_script).into()];
        outputs.extend(extra_outputs);
        Ok(TxBuilder { inputs, outputs, ..Default::default() })
    }

    /// The offer output as a builder input
    fn covenant_input(&self, signatory: Arc<dyn Signatory>) -> TxBuilderInput {
        TxBuilderInput::new(self.tx_builder_input.clone(), signatory)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        builder::P2pkhSignatory,
        ecc::K256Ecc,
        token::{TokenId, TokenType},
        tx::TxId,
    };

    /// The CACHET partial offer of 100.00 tokens at 10,000 XEC each
    pub(crate) fn cachet_offer() -> AgoraOffer {
        let token_id: TokenId =
            "aed861a31b96934b88c0252ede135cb9700d7649f69191235087a3030e553cb1".parse().unwrap();
        let partial = AgoraPartial {
            trunc_atoms: 10000,
            num_atoms_trunc_bytes: 0,
            atoms_scale_factor: 214747,
            scaled_trunc_atoms_per_trunc_sat: 5497,
            num_sats_trunc_bytes: 1,
            maker_pk: [2; 33],
            min_accepted_scaled_trunc_atoms: 2147470,
            token_id,
            token_type: 1,
            token_protocol: TokenProtocol::Slp,
            script_len: 214,
            enforced_lock_time: 1040365320,
            dust_sats: 546,
        };
        let txid: TxId =
            "6d9f99d86c869b9ef2ca84c0c3ceb6889da6a0360b75ea0c82b7744dec8cd0bf".parse().unwrap();
        AgoraOffer::new(
            AgoraOfferVariant::Partial(partial),
            OutPoint { txid, out_idx: 1 },
            546,
            Token::new(token_id, TokenType::SLP_FUNGIBLE, 10000),
            AgoraOfferStatus::Open,
        )
    }

    /// The HEISMAN NFT oneshot offer asking 50,000,000 XEC
    pub(crate) fn heisman_offer() -> AgoraOffer {
        let token_id: TokenId =
            "be095430a16a024134bea079f235bcd2f79425c42659f9346416f626671f371c".parse().unwrap();
        let token = Token::new(token_id, TokenType::SLP_NFT1_CHILD, 1);
        let oneshot = AgoraOneshot {
            enforced_outputs: vec![
                TxOutput::new(0, slp_send(&token_id, 0x41, &[0, 1])),
                TxOutput::new(
                    5_000_000_000,
                    Script::from_hex("76a91495e79f51d4260bc0dc3ba7fb77c7be92d0fbdd1d88ac").unwrap(),
                ),
            ],
            cancel_pk: [2; 33],
        };
        let txid: TxId =
            "d30e55d27ec479d5b683be75321fa6fca2a3b10e8527d6828d30e0ddf67b4b40".parse().unwrap();
        AgoraOffer::new(
            AgoraOfferVariant::Oneshot(oneshot),
            OutPoint { txid, out_idx: 1 },
            546,
            token,
            AgoraOfferStatus::Open,
        )
    }

    /// `n` P2PKH fuel inputs
    fn fuel_inputs(n: usize) -> Vec<TxBuilderInput> {
        (0..n)
            .map(|i| {
                let input = TxInput::new(
                    OutPoint { txid: TxId([i as u8; 32]), out_idx: 0 },
                    SignData::output_script(10_000, Script::p2pkh(&[0; 20])),
                );
                TxBuilderInput::new(input, P2pkhSignatory::new([0; 32], [0; 33]))
            })
            .collect()
    }

    /// A P2PKH recipient
    fn recipient() -> Script {
        Script::p2pkh(&[0; 20])
    }

    #[test]
    fn test_partial_fees() {
        let offer = cachet_offer();
        assert_eq!(offer.asked_sats(Some(546)).unwrap(), 5460736);
        assert!(offer.asked_sats(None).is_err());

        let accept_fee = |n, fee_per_kb| {
            offer.accept_fee_sats(&recipient(), &fuel_inputs(n), fee_per_kb, Some(546)).unwrap()
        };
        assert_eq!(accept_fee(1, 1000), 1182);
        assert_eq!(accept_fee(2, 1000), 1323);
        assert_eq!(accept_fee(3, 1000), 1464);
        assert_eq!(accept_fee(1, 2010), 2376);

        let cancel_fee = |n, fee_per_kb| {
            offer.cancel_fee_sats(&recipient(), &fuel_inputs(n), fee_per_kb).unwrap()
        };
        assert_eq!(cancel_fee(1, 1000), 719);
        assert_eq!(cancel_fee(2, 1000), 860);
        assert_eq!(cancel_fee(3, 1000), 1001);
        assert_eq!(cancel_fee(1, 2010), 1446);
    }

    #[test]
    fn test_oneshot_fees() {
        let offer = heisman_offer();
        assert_eq!(offer.variant.script().len(), 176);
        assert_eq!(offer.asked_sats(None).unwrap(), 5_000_000_000);

        let accept_fee = |n, fee_per_kb| {
            offer.accept_fee_sats(&recipient(), &fuel_inputs(n), fee_per_kb, None).unwrap()
        };
        assert_eq!(accept_fee(1, 1000), 740);
        assert_eq!(accept_fee(2, 1000), 881);
        assert_eq!(accept_fee(3, 1000), 1022);
        assert_eq!(accept_fee(1, 2010), 1488);

        let cancel_fee = |n, fee_per_kb| {
            offer.cancel_fee_sats(&recipient(), &fuel_inputs(n), fee_per_kb).unwrap()
        };
        assert_eq!(cancel_fee(1, 1000), 535);
        assert_eq!(cancel_fee(2, 1000), 676);
        assert_eq!(cancel_fee(3, 1000), 817);
        assert_eq!(cancel_fee(1, 2010), 1076);
    }

    #[test]
    fn test_partial_accept_tx_layout() {
        let offer = cachet_offer();
        let AgoraOfferVariant::Partial(partial) = &offer.variant else { unreachable!() };
        let fuel_sk = [3; 32];
        let fuel_pk = K256Ecc.derive_pubkey(&fuel_sk).unwrap();
        let fuel = TxInput::new(
            OutPoint { txid: TxId([8; 32]), out_idx: 0 },
            SignData::output_script(6_000_000, Script::p2pkh(&hash160(&fuel_pk))),
        );
        let covenant_sk = [4; 32];
        let params = AcceptTxParams {
            covenant_sk,
            covenant_pk: K256Ecc.derive_pubkey(&covenant_sk).unwrap(),
            fuel_inputs: vec![TxBuilderInput::new(fuel, P2pkhSignatory::new(fuel_sk, fuel_pk))],
            recipient_script: recipient(),
            accepted_atoms: Some(546),
            ..Default::default()
        };
        let tx = offer.accept_tx(&K256Ecc, params).unwrap();

        assert_eq!(tx.locktime, 1040365320);
        assert_eq!(tx.inputs[0].prev_out, offer.outpoint);
        assert_eq!(tx.outputs[0].script, slp_send(&offer.token.token_id, 1, &[0, 9454, 546]));
        assert_eq!(tx.outputs[1], TxOutput::new(5460736, Script::p2pkh(&hash160(&[2; 33]))));
        assert_eq!(tx.outputs[2].script, partial.with_trunc_atoms(9454).script().to_p2sh());
        assert_eq!(tx.outputs[3], TxOutput::new(546, recipient()));
        assert_eq!(tx.outputs[4].script, recipient());

        let input_sats = 546 + 6_000_000;
        let output_sats: u64 = tx.outputs.iter().map(|output| output.sats).sum();
        let fee = input_sats - output_sats;
        assert!((1182..1200).contains(&fee), "fee {fee}");
    }

    #[test]
    fn test_partial_accept_rejects_bad_amounts() {
        let offer = cachet_offer();
        let params = |accepted_atoms| AcceptTxParams {
            recipient_script: recipient(),
            accepted_atoms,
            ..Default::default()
        };
        assert!(matches!(
            offer.accept_tx(&K256Ecc, params(None)),
            Err(CovenantError::InvalidAcceptedAtoms(_))
        ));
        // Leaves 9 atoms, below the minimum of 10
        assert_eq!(
            offer.accept_tx(&K256Ecc, params(Some(9991))).unwrap_err(),
            CovenantError::UnacceptableRemainder { accepted_atoms: 9991 }
        );
    }

    #[test]
    fn test_allow_unspendable_remainder() {
        let offer = cachet_offer();
        let AgoraOfferVariant::Partial(partial) = &offer.variant else { unreachable!() };
        let params = |allow_unspendable| {
            let fuel_sk = [3; 32];
            let fuel_pk = K256Ecc.derive_pubkey(&fuel_sk).unwrap();
            let fuel = TxInput::new(
                OutPoint { txid: TxId([8; 32]), out_idx: 0 },
                SignData::output_script(200_000_000, Script::p2pkh(&hash160(&fuel_pk))),
            );
            AcceptTxParams {
                covenant_sk: [4; 32],
                covenant_pk: K256Ecc.derive_pubkey(&[4; 32]).unwrap(),
                fuel_inputs: vec![TxBuilderInput::new(fuel, P2pkhSignatory::new(fuel_sk, fuel_pk))],
                recipient_script: recipient(),
                accepted_atoms: Some(9991),
                allow_unspendable,
                ..Default::default()
            }
        };
        assert_eq!(
            offer.accept_tx(&K256Ecc, params(false)).unwrap_err(),
            CovenantError::UnacceptableRemainder { accepted_atoms: 9991 }
        );

        // The 9 atoms left behind go to a covenant nobody can accept
        let tx = offer.accept_tx(&K256Ecc, params(true)).unwrap();
        assert_eq!(tx.outputs[0].script, slp_send(&offer.token.token_id, 1, &[0, 9, 9991]));
        assert_eq!(tx.outputs[2].script, partial.with_trunc_atoms(9).script().to_p2sh());
        assert_eq!(tx.outputs[3], TxOutput::new(546, recipient()));
    }
}
