//! Selection of the utxos that pay for accepting or cancelling an offer
//!
//! Utxos are added one at a time in the given order until they cover the
//! asked sats plus the fee of a tx spending all selected utxos. Fees are
//! measured as if every fuel utxo were a P2PKH input.

use crate::{
    builder::{P2pkhSignatory, TxBuilderInput},
    errors::CovenantError,
    offer::AgoraOffer,
    script::Script,
    tx::{OutPoint, SignData, TxInput},
};

/// Error message when the utxos cannot fuel an accept
const INSUFFICIENT_ACCEPT_FUEL: &str = "Insufficient utxos to accept this offer";
/// Error message when the utxos cannot fuel a cancel
const INSUFFICIENT_CANCEL_FUEL: &str = "Insufficient utxos to cancel this offer";

/// A spendable utxo that can pay for an offer tx
pub trait FuelUtxo {
    /// The output of the utxo
    fn outpoint(&self) -> OutPoint;
    /// The value of the utxo
    fn sats(&self) -> u64;
}

/// The fuel utxos needed to accept `accepted_atoms` of a partial offer
pub fn partial_accept_fuel_inputs<U: FuelUtxo + Clone>(
    offer: &AgoraOffer,
    utxos: &[U],
    accepted_atoms: u64,
    fee_per_kb: u64,
) -> Result<Vec<U>, CovenantError> {
    accept_fuel_inputs(offer, utxos, Some(accepted_atoms), fee_per_kb)
}

/// The fuel utxos needed to accept a oneshot offer
pub fn oneshot_accept_fuel_inputs<U: FuelUtxo + Clone>(
    offer: &AgoraOffer,
    utxos: &[U],
    fee_per_kb: u64,
) -> Result<Vec<U>, CovenantError> {
    accept_fuel_inputs(offer, utxos, None, fee_per_kb)
}

/// The fuel utxos needed to cancel an offer
pub fn cancel_fuel_inputs<U: FuelUtxo + Clone>(
    offer: &AgoraOffer,
    utxos: &[U],
    fee_per_kb: u64,
) -> Result<Vec<U>, CovenantError> {
    let recipient = dummy_recipient();
    select_fuel(utxos, INSUFFICIENT_CANCEL_FUEL, |inputs| {
        offer.cancel_fee_sats(&recipient, inputs, fee_per_kb)
    })
}

/// Select fuel for an accept, `accepted_atoms` is set for partial offers
fn accept_fuel_inputs<U: FuelUtxo + Clone>(
    offer: &AgoraOffer,
    utxos: &[U],
    accepted_atoms: Option<u64>,
    fee_per_kb: u64,
) -> Result<Vec<U>, CovenantError> {
    let asked_sats = offer.asked_sats(accepted_atoms)?;
    let recipient = dummy_recipient();
    select_fuel(utxos, INSUFFICIENT_ACCEPT_FUEL, |inputs| {
        let fee = offer.accept_fee_sats(&recipient, inputs, fee_per_kb, accepted_atoms)?;
        Ok(asked_sats + fee)
    })
}

/// Take utxos in order until they cover `required_sats` of the selection
fn select_fuel<U: FuelUtxo + Clone>(
    utxos: &[U],
    insufficient_msg: &str,
    required_sats: impl Fn(&[TxBuilderInput]) -> Result<u64, CovenantError>,
) -> Result<Vec<U>, CovenantError> {
    let mut selected = Vec::new();
    let mut dummy_inputs = Vec::new();
    let mut total_sats = 0u64;
    for utxo in utxos {
        total_sats += utxo.sats();
        selected.push(utxo.clone());
        dummy_inputs.push(dummy_p2pkh_input(utxo));

        if total_sats >= required_sats(&dummy_inputs)? {
            return Ok(selected);
        }
    }

    Err(CovenantError::InsufficientFuel(insufficient_msg.to_string()))
}

/// A P2PKH input of the size a real fuel input would have
fn dummy_p2pkh_input<U: FuelUtxo>(utxo: &U) -> TxBuilderInput {
    let input = TxInput::new(
        utxo.outpoint(),
        SignData::output_script(utxo.sats(), dummy_recipient()),
    );
    TxBuilderInput::new(input, P2pkhSignatory::new([0; 32], [0; 33]))
}

/// A P2PKH script, the fee only depends on its size
fn dummy_recipient() -> Script {
    Script::p2pkh(&[0; 20])
}
