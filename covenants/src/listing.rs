//! Transactions listing tokens for sale under a covenant
//!
//! ALP offers announce their terms in the eMPP of the tx creating the
//! covenant output. SLP offers cannot carry extra data, so the tokens are
//! first sent to an ad output revealing the terms when spent, and the ad
//! then moves them into the covenant.

use constants::{ONESHOT_VARIANT, PARTIAL_VARIANT};

use crate::{
    builder::{TxBuilder, TxBuilderInput, TxBuilderOutput, calc_tx_fee},
    ecc::{Ecc, SecretKeyBytes},
    errors::CovenantError,
    offer::{AgoraOffer, AgoraOfferStatus, AgoraOfferVariant},
    partial::{AgoraAdSignatory, AgoraPartial},
    script::Script,
    token::{Token, TokenProtocol, alp_send, empp_script, slp_send},
    tx::{OutPoint, SignData, Tx, TxInput, TxOutput},
};

/// Output index of the covenant in listing txs, and of the ad in SLP setups
pub const OFFER_OUTPUT_IDX: u32 = 1;

/// The funding side of a listing tx
#[derive(Clone, Debug)]
pub struct ListingParams {
    /// Inputs holding the offered tokens and the sats paying for the listing
    pub inputs: Vec<TxBuilderInput>,
    /// Atoms held by `inputs` beyond the offered amount
    pub token_change_atoms: u64,
    /// Receives the token change and the sats change
    pub change_script: Script,
    /// Value of token outputs
    pub dust_sats: u64,
    /// The fee rate
    pub fee_per_kb: u64,
}

// -------
// | ALP |
// -------

/// A tx creating an ALP partial offer, announcing its terms in the eMPP
pub fn alp_partial_listing_tx(
    ecc: &dyn Ecc,
    partial: &AgoraPartial,
    params: ListingParams,
) -> Result<Tx, CovenantError> {
    if partial.token_protocol != TokenProtocol::Alp {
        return Err(CovenantError::unsupported("SLP offers are listed through an ad setup tx"));
    }

    let mut send_amounts = vec![partial.offered_atoms()];
    if params.token_change_atoms > 0 {
        send_amounts.push(params.token_change_atoms);
    }
    let send = alp_send(&partial.token_id, partial.token_type, &send_amounts)?;

    let mut outputs: Vec<TxBuilderOutput> = vec![
        TxOutput::new(0, empp_script(&[partial.ad_pushdata(), send])).into(),
        TxOutput::new(params.dust_sats, partial.script().to_p2sh()).into(),
    ];
    push_change_outputs(&mut outputs, &params);

    let builder = TxBuilder { inputs: params.inputs, outputs, ..Default::default() };
    builder.sign(ecc, params.fee_per_kb, params.dust_sats)
}

// -------
// | SLP |
// -------

/// A tx sending the offered tokens to the offer's ad output
///
/// The ad is funded with enough sats to pay for the offer tx spending it
pub fn slp_ad_setup_tx(
    ecc: &dyn Ecc,
    variant: &AgoraOfferVariant,
    token: &Token,
    params: ListingParams,
) -> Result<Tx, CovenantError> {
    let ad_script = slp_ad_script(variant)?;
    let offered_atoms = offered_atoms(variant, token);
    let offer_fee = slp_offer_fee_sats(variant, token, params.dust_sats, params.fee_per_kb)?;

    let mut send_amounts = vec![offered_atoms];
    if params.token_change_atoms > 0 {
        send_amounts.push(params.token_change_atoms);
    }
    let mut outputs: Vec<TxBuilderOutput> = vec![
        TxOutput::new(0, slp_send(&token.token_id, token.token_type.number, &send_amounts)).into(),
        TxOutput::new(params.dust_sats + offer_fee, ad_script.to_p2sh()).into(),
    ];
    push_change_outputs(&mut outputs, &params);

    let builder = TxBuilder { inputs: params.inputs, outputs, ..Default::default() };
    builder.sign(ecc, params.fee_per_kb, params.dust_sats)
}

/// A tx spending the ad output into the covenant
pub fn slp_offer_tx(
    ecc: &dyn Ecc,
    variant: &AgoraOfferVariant,
    token: &Token,
    ad_outpoint: OutPoint,
    ad_sats: u64,
    maker_sk: SecretKeyBytes,
    dust_sats: u64,
) -> Result<Tx, CovenantError> {
    if ad_sats < dust_sats {
        return Err(CovenantError::tx_builder(format!(
            "ad output of {ad_sats} sats cannot fund an offer output of {dust_sats} sats"
        )));
    }
    let builder = slp_offer_tx_builder(variant, token, ad_outpoint, ad_sats, maker_sk, dust_sats)?;
    // No change, the ad's sats beyond dust are the fee
    builder.sign(ecc, 0, dust_sats)
}

/// The fee of the SLP offer tx spending the ad output
pub fn slp_offer_fee_sats(
    variant: &AgoraOfferVariant,
    token: &Token,
    dust_sats: u64,
    fee_per_kb: u64,
) -> Result<u64, CovenantError> {
    let builder =
        slp_offer_tx_builder(variant, token, OutPoint::default(), dust_sats, [0; 32], dust_sats)?;
    Ok(calc_tx_fee(builder.measure_size()?, fee_per_kb))
}

/// Assemble the SLP offer tx before signing
fn slp_offer_tx_builder(
    variant: &AgoraOfferVariant,
    token: &Token,
    ad_outpoint: OutPoint,
    ad_sats: u64,
    maker_sk: SecretKeyBytes,
    dust_sats: u64,
) -> Result<TxBuilder, CovenantError> {
    let ad_script = slp_ad_script(variant)?;
    let variant_name = match variant {
        AgoraOfferVariant::Oneshot(_) => ONESHOT_VARIANT,
        AgoraOfferVariant::Partial(_) => PARTIAL_VARIANT,
    };
    let ad_input = TxInput::new(ad_outpoint, SignData::redeem_script(ad_sats, ad_script));
    let send = slp_send(&token.token_id, token.token_type.number, &[offered_atoms(variant, token)]);

    Ok(TxBuilder {
        inputs: vec![TxBuilderInput::new(ad_input, AgoraAdSignatory::new(maker_sk, variant_name))],
        outputs: vec![
            TxOutput::new(0, send).into(),
            TxOutput::new(dust_sats, variant.script().to_p2sh()).into(),
        ],
        ..Default::default()
    })
}

/// The ad script of an SLP offer
fn slp_ad_script(variant: &AgoraOfferVariant) -> Result<Script, CovenantError> {
    match variant {
        AgoraOfferVariant::Oneshot(oneshot) => Ok(oneshot.ad_script()),
        AgoraOfferVariant::Partial(partial) if partial.token_protocol == TokenProtocol::Slp => {
            Ok(partial.ad_script())
        },
        AgoraOfferVariant::Partial(_) => {
            Err(CovenantError::unsupported("ALP offers are listed without an ad"))
        },
    }
}

// -----------
// | Helpers |
// -----------

/// The open offer created by a listing tx
pub fn listed_offer(
    variant: AgoraOfferVariant,
    token: &Token,
    listing_tx: &Tx,
) -> Result<AgoraOffer, CovenantError> {
    let listing_txid = listing_tx.txid();
    let output = listing_tx.outputs.get(OFFER_OUTPUT_IDX as usize).ok_or_else(|| {
        CovenantError::tx_builder(format!("listing tx {listing_txid} has no offer output"))
    })?;
    let offered = Token::new(token.token_id, token.token_type, offered_atoms(&variant, token));
    Ok(AgoraOffer::new(
        variant,
        OutPoint { txid: listing_txid, out_idx: OFFER_OUTPUT_IDX },
        output.sats,
        offered,
        AgoraOfferStatus::Open,
    ))
}

/// The atoms locked in the covenant
fn offered_atoms(variant: &AgoraOfferVariant, token: &Token) -> u64 {
    match variant {
        AgoraOfferVariant::Oneshot(_) => token.atoms,
        AgoraOfferVariant::Partial(partial) => partial.offered_atoms(),
    }
}

/// Token change at dust, if any, then the sats change
fn push_change_outputs(outputs: &mut Vec<TxBuilderOutput>, params: &ListingParams) {
    if params.token_change_atoms > 0 {
        outputs.push(TxOutput::new(params.dust_sats, params.change_script.clone()).into());
    }
    outputs.push(TxBuilderOutput::Change(params.change_script.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::P2pkhSignatory,
        ecc::K256Ecc,
        hash::hash160,
        offer::tests::{cachet_offer, heisman_offer},
        script::Op,
        token::{TokenType, parse_alp_send, parse_empp, parse_slp_send},
        tx::TxId,
    };

    /// Secret key of the maker
    const MAKER_SK: SecretKeyBytes = [0x33; 32];

    /// Listing params spending one P2PKH output of the maker
    fn listing_params(sats: u64, token_change_atoms: u64) -> ListingParams {
        let pk = K256Ecc.derive_pubkey(&MAKER_SK).unwrap();
        let script = Script::p2pkh(&hash160(&pk));
        let input = TxInput::new(
            OutPoint { txid: TxId([5; 32]), out_idx: 2 },
            SignData::output_script(sats, script.clone()),
        );
        ListingParams {
            inputs: vec![TxBuilderInput::new(input, P2pkhSignatory::new(MAKER_SK, pk))],
            token_change_atoms,
            change_script: script,
            dust_sats: 546,
            fee_per_kb: 1000,
        }
    }

    #[test]
    fn test_alp_listing() {
        let AgoraOfferVariant::Partial(mut partial) = cachet_offer().variant else { unreachable!() };
        partial.token_protocol = TokenProtocol::Alp;
        partial.token_type = TokenType::ALP_STANDARD.number;

        let tx = alp_partial_listing_tx(&K256Ecc, &partial, listing_params(100_000, 7)).unwrap();
        assert_eq!(tx.outputs[1], TxOutput::new(546, partial.script().to_p2sh()));
        assert_eq!(tx.outputs[2], TxOutput::new(546, listing_params(0, 0).change_script));
        assert_eq!(tx.outputs.len(), 4);

        let pushdata = parse_empp(&tx.outputs[0].script).unwrap();
        assert_eq!(pushdata[0], partial.ad_pushdata());
        let send = parse_alp_send(&pushdata[1]).unwrap().unwrap();
        assert_eq!(send.amounts, vec![10000, 7]);

        let slp = cachet_offer();
        let AgoraOfferVariant::Partial(slp_partial) = &slp.variant else { unreachable!() };
        assert!(matches!(
            alp_partial_listing_tx(&K256Ecc, slp_partial, listing_params(100_000, 0)),
            Err(CovenantError::Unsupported(_))
        ));
    }

    #[test]
    fn test_slp_listing() {
        let offer = heisman_offer();
        let params = listing_params(100_000, 0);
        let change_script = params.change_script.clone();
        let setup = slp_ad_setup_tx(&K256Ecc, &offer.variant, &offer.token, params).unwrap();

        let AgoraOfferVariant::Oneshot(oneshot) = &offer.variant else { unreachable!() };
        let offer_fee = slp_offer_fee_sats(&offer.variant, &offer.token, 546, 1000).unwrap();
        assert_eq!(setup.outputs[1], TxOutput::new(546 + offer_fee, oneshot.ad_script().to_p2sh()));
        assert_eq!(setup.outputs[2].script, change_script);
        let send = parse_slp_send(&setup.outputs[0].script).unwrap().unwrap();
        assert_eq!(send.amounts, vec![1]);

        let ad_outpoint = OutPoint { txid: setup.txid(), out_idx: OFFER_OUTPUT_IDX };
        let offer_tx = slp_offer_tx(
            &K256Ecc,
            &offer.variant,
            &offer.token,
            ad_outpoint,
            546 + offer_fee,
            MAKER_SK,
            546,
        )
        .unwrap();
        assert_eq!(offer_tx.inputs[0].prev_out, ad_outpoint);
        assert_eq!(offer_tx.outputs[1], TxOutput::new(546, oneshot.script().to_p2sh()));
        // The ad tx pays exactly the measured fee
        assert_eq!(calc_tx_fee(offer_tx.ser_size(), 1000), offer_fee);

        let ops = offer_tx.inputs[0].script.parse_ops().unwrap();
        assert_eq!(ops[1].push_data(), Some(ONESHOT_VARIANT));
        assert_eq!(ops.last().and_then(Op::push_data), Some(oneshot.ad_script().bytecode()));

        let listed = listed_offer(offer.variant.clone(), &offer.token, &offer_tx).unwrap();
        assert_eq!(listed.outpoint, OutPoint { txid: offer_tx.txid(), out_idx: 1 });
        assert_eq!(listed.token.atoms, 1);
        assert_eq!(
            listed.tx_builder_input.sign_data,
            Some(SignData::redeem_script(546, oneshot.script()))
        );
    }
}
