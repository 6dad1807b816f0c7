//! Assembles and signs transactions from typed inputs and outputs
//!
//! Every input carries an optional `Signatory` callback that produces its
//! unlocking script. Fees are computed by first signing with `EccDummy`, which
//! yields signatures of the final size, and then measuring the transaction.

use std::fmt::Debug;
use std::sync::Arc;

use constants::ALL_BIP143;
use tracing::trace;

use crate::{
    ecc::{Ecc, EccDummy, Pubkey, SecretKeyBytes},
    errors::CovenantError,
    hash::sha256d,
    script::{Script, push_bytes_op},
    tx::{Tx, TxInput, TxOutput, UnsignedTxInput},
};

/// Produces the unlocking script of one input
pub trait Signatory: Debug + Send + Sync {
    /// Sign the given input of a transaction whose outputs are final
    fn sign(&self, ecc: &dyn Ecc, input: UnsignedTxInput<'_>) -> Result<Script, CovenantError>;
}

/// Signs a P2PKH input with Schnorr and SIGHASH_ALL | SIGHASH_FORKID
#[derive(Clone, Debug)]
pub struct P2pkhSignatory {
    /// The secret key of the output
    pub sk: SecretKeyBytes,
    /// The pubkey hashed into the output
    pub pk: Pubkey,
}

impl P2pkhSignatory {
    /// Create a signatory for the given key pair
    pub fn new(sk: SecretKeyBytes, pk: Pubkey) -> Arc<dyn Signatory> {
        Arc::new(Self { sk, pk })
    }
}

impl Signatory for P2pkhSignatory {
    fn sign(&self, ecc: &dyn Ecc, input: UnsignedTxInput<'_>) -> Result<Script, CovenantError> {
        let preimage = input.sighash_preimage(ALL_BIP143, None)?;
        let mut sig = ecc.schnorr_sign(&self.sk, &sha256d(&preimage))?;
        sig.push(ALL_BIP143);
        Ok(Script::from_ops(&[push_bytes_op(sig), push_bytes_op(self.pk.to_vec())]))
    }
}

/// An input together with the signatory that unlocks it
#[derive(Clone, Debug)]
pub struct TxBuilderInput {
    /// The input, which must carry sign data
    pub input: TxInput,
    /// Signs the input, `None` keeps the input's script as is
    pub signatory: Option<Arc<dyn Signatory>>,
}

impl TxBuilderInput {
    /// An input signed by the given signatory
    pub fn new(input: TxInput, signatory: Arc<dyn Signatory>) -> Self {
        Self { input, signatory: Some(signatory) }
    }

    /// The value of the spent output
    pub fn sats(&self) -> Result<u64, CovenantError> {
        self.input
            .sign_data
            .as_ref()
            .map(|sign_data| sign_data.sats)
            .ok_or_else(|| {
                CovenantError::tx_builder(format!("input {} has no sign data", self.input.prev_out))
            })
    }
}

/// An output of a transaction under construction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxBuilderOutput {
    /// An output with a fixed value
    Fixed(TxOutput),
    /// Receives whatever is left after fees, dropped if that is below dust
    Change(Script),
}

impl From<TxOutput> for TxBuilderOutput {
    fn from(output: TxOutput) -> Self {
        Self::Fixed(output)
    }
}

/// Compute the fee for a transaction of `size` bytes, rounding up
pub fn calc_tx_fee(size: usize, fee_per_kb: u64) -> u64 {
    (size as u64 * fee_per_kb).div_ceil(1000)
}

/// Builds and signs a transaction
#[derive(Clone, Debug)]
pub struct TxBuilder {
    /// The tx version
    pub version: i32,
    /// The inputs with their signatories
    pub inputs: Vec<TxBuilderInput>,
    /// The outputs, at most one of which may be a change output
    pub outputs: Vec<TxBuilderOutput>,
    /// The tx lock time
    pub locktime: u32,
}

impl Default for TxBuilder {
    fn default() -> Self {
        Self { version: constants::TX_VERSION, inputs: vec![], outputs: vec![], locktime: 0 }
    }
}

impl TxBuilder {
    /// Sign the transaction, filling in the change output
    ///
    /// The change output receives inputs - outputs - fee and is removed if
    /// that falls below `dust`
    pub fn sign(&self, ecc: &dyn Ecc, fee_per_kb: u64, dust: u64) -> Result<Tx, CovenantError> {
        let input_sats = self.inputs.iter().map(TxBuilderInput::sats).sum::<Result<u64, _>>()?;
        let fixed_sats: u64 = self
            .outputs
            .iter()
            .map(|output| match output {
                TxBuilderOutput::Fixed(output) => output.sats,
                TxBuilderOutput::Change(_) => 0,
            })
            .sum();
        if input_sats < fixed_sats {
            return Err(CovenantError::tx_builder(format!(
                "insufficient input sats: have {input_sats}, outputs need {fixed_sats}"
            )));
        }

        let change_idx = self.change_idx()?;
        let mut outputs = self.resolve_outputs();
        if let Some(change_idx) = change_idx {
            let fee = calc_tx_fee(self.measure_size()?, fee_per_kb);
            let available = input_sats - fixed_sats;
            if available < fee {
                return Err(CovenantError::tx_builder(format!(
                    "insufficient input sats: have {input_sats}, need {} including a fee of {fee}",
                    fixed_sats + fee
                )));
            }

            let change = available - fee;
            if change < dust {
                trace!(change, dust, "dropping change output below dust");
                outputs.remove(change_idx);
            } else {
                outputs[change_idx].sats = change;
            }
        }

        self.sign_outputs(ecc, outputs)
    }

    /// The serialized size of the transaction signed with dummy signatures
    pub fn measure_size(&self) -> Result<usize, CovenantError> {
        self.change_idx()?;
        let tx = self.sign_outputs(&EccDummy, self.resolve_outputs())?;
        Ok(tx.ser_size())
    }

    /// The index of the change output, failing if there are several
    fn change_idx(&self) -> Result<Option<usize>, CovenantError> {
        let mut change_outputs = self
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, output)| matches!(output, TxBuilderOutput::Change(_)))
            .map(|(idx, _)| idx);
        let change_idx = change_outputs.next();
        if change_outputs.next().is_some() {
            return Err(CovenantError::tx_builder("at most one change output is allowed"));
        }
        Ok(change_idx)
    }

    /// The outputs with a zero-valued change output
    fn resolve_outputs(&self) -> Vec<TxOutput> {
        self.outputs
            .iter()
            .map(|output| match output {
                TxBuilderOutput::Fixed(output) => output.clone(),
                TxBuilderOutput::Change(script) => TxOutput::new(0, script.clone()),
            })
            .collect()
    }

    /// Run every signatory against a tx with the given final outputs
    fn sign_outputs(&self, ecc: &dyn Ecc, outputs: Vec<TxOutput>) -> Result<Tx, CovenantError> {
        let mut tx = Tx {
            version: self.version,
            inputs: self.inputs.iter().map(|input| input.input.clone()).collect(),
            outputs,
            locktime: self.locktime,
        };

        let mut scripts = Vec::with_capacity(self.inputs.len());
        for (input_idx, input) in self.inputs.iter().enumerate() {
            let script = match &input.signatory {
                Some(signatory) => signatory.sign(ecc, UnsignedTxInput { tx: &tx, input_idx })?,
                None => input.input.script.clone(),
            };
            scripts.push(script);
        }
        for (input, script) in tx.inputs.iter_mut().zip(scripts) {
            input.script = script;
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ecc::{K256Ecc, verify_schnorr},
        hash::hash160,
        tx::{OutPoint, SignData, TxId},
    };

    /// Secret key of the funding output
    const SK: SecretKeyBytes = [0x22; 32];

    /// A builder spending one P2PKH output of `sats`
    fn builder(sats: u64, outputs: Vec<TxBuilderOutput>) -> TxBuilder {
        let pk = K256Ecc.derive_pubkey(&SK).unwrap();
        let input = TxInput::new(
            OutPoint { txid: TxId([5; 32]), out_idx: 1 },
            SignData::output_script(sats, Script::p2pkh(&hash160(&pk))),
        );
        TxBuilder {
            inputs: vec![TxBuilderInput::new(input, P2pkhSignatory::new(SK, pk))],
            outputs,
            ..Default::default()
        }
    }

    #[test]
    fn test_calc_tx_fee() {
        assert_eq!(calc_tx_fee(1182, 1000), 1182);
        assert_eq!(calc_tx_fee(1182, 2010), 2376);
        assert_eq!(calc_tx_fee(1, 1), 1);
    }

    #[test]
    fn test_p2pkh_input_size() {
        let recipient = Script::p2pkh(&[1; 20]);
        let builder = builder(10_000, vec![TxOutput::new(9_000, recipient).into()]);
        // version + 1 input of 141 bytes + 1 output of 34 bytes + locktime
        assert_eq!(builder.measure_size().unwrap(), 4 + 1 + 141 + 1 + 34 + 4);
    }

    #[test]
    fn test_sign_with_change() {
        let recipient = Script::p2pkh(&[1; 20]);
        let change = Script::p2pkh(&[2; 20]);
        let builder = builder(
            10_000,
            vec![TxOutput::new(5_000, recipient).into(), TxBuilderOutput::Change(change.clone())],
        );
        let size = builder.measure_size().unwrap();
        let tx = builder.sign(&K256Ecc, 1000, 546).unwrap();

        assert_eq!(tx.ser_size(), size);
        assert_eq!(tx.outputs[1], TxOutput::new(10_000 - 5_000 - size as u64, change));

        // The signature commits to the final tx
        let ops = tx.inputs[0].script.parse_ops().unwrap();
        let sig = ops[0].push_data().unwrap();
        let pk = ops[1].push_data().unwrap();
        let preimage = tx.sighash_preimage(0, ALL_BIP143, None).unwrap();
        assert_eq!(sig[64], ALL_BIP143);
        assert!(verify_schnorr(pk, &sha256d(&preimage), &sig[..64]));
    }

    #[test]
    fn test_change_below_dust_is_dropped() {
        let builder = builder(
            5_700,
            vec![
                TxOutput::new(5_000, Script::p2pkh(&[1; 20])).into(),
                TxBuilderOutput::Change(Script::p2pkh(&[2; 20])),
            ],
        );
        let tx = builder.sign(&K256Ecc, 1000, 546).unwrap();
        assert_eq!(tx.outputs.len(), 1);
    }

    #[test]
    fn test_insufficient_sats() {
        let builder = builder(
            5_100,
            vec![
                TxOutput::new(5_000, Script::p2pkh(&[1; 20])).into(),
                TxBuilderOutput::Change(Script::p2pkh(&[2; 20])),
            ],
        );
        assert!(matches!(builder.sign(&K256Ecc, 1000, 546), Err(CovenantError::TxBuilder(_))));

        let builder = builder_with_two_changes();
        assert!(builder.measure_size().is_err());
    }

    /// A builder with two change outputs, which is malformed
    fn builder_with_two_changes() -> TxBuilder {
        builder(
            5_000,
            vec![
                TxBuilderOutput::Change(Script::p2pkh(&[1; 20])),
                TxBuilderOutput::Change(Script::p2pkh(&[2; 20])),
            ],
        )
    }
}
