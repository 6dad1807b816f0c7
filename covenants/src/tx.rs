//! Transactions, their wire format and the BIP143/forkid sighash preimage

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use constants::{ALL_ANYONECANPAY_BIP143, DEFAULT_SEQUENCE, TX_VERSION};

use crate::{
    errors::CovenantError,
    hash::sha256d,
    script::Script,
    ser::{ByteReader, write_compact_size, write_var_bytes},
};

/// The sighash bit committing to only the signed input
const SIGHASH_ANYONECANPAY: u8 = 0x80;
/// The sighash bit enabling the forkid algorithm
const SIGHASH_FORKID: u8 = 0x40;

// -----------
// | Outputs |
// -----------

/// A transaction id in hashing byte order, displayed reversed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub [u8; 32]);

impl Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", util::hex::bytes_to_reversed_hex_string(&self.0))
    }
}

impl FromStr for TxId {
    type Err = CovenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        util::hex::array_from_reversed_hex_string(s).map(Self).map_err(CovenantError::Serialization)
    }
}

impl Serialize for TxId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?.parse().map_err(serde::de::Error::custom)
    }
}

/// A reference to an output of a previous transaction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// The txid of the transaction holding the output
    pub txid: TxId,
    /// The index of the output
    pub out_idx: u32,
}

impl OutPoint {
    /// Serialize as txid followed by the u32 index
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.txid.0);
        out.extend_from_slice(&self.out_idx.to_le_bytes());
    }
}

impl Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.out_idx)
    }
}

/// A transaction output
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TxOutput {
    /// The value in satoshis
    pub sats: u64,
    /// The locking script
    pub script: Script,
}

impl TxOutput {
    /// Construct an output
    pub fn new(sats: u64, script: Script) -> Self {
        Self { sats, script }
    }

    /// The serialized output
    pub fn ser(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.script.len());
        write_tx_output(&mut out, self);
        out
    }
}

/// Append a serialized output: u64 value then the compact-size script
pub fn write_tx_output(out: &mut Vec<u8>, output: &TxOutput) {
    out.extend_from_slice(&output.sats.to_le_bytes());
    write_var_bytes(out, output.script.bytecode());
}

/// Read a serialized output
pub fn read_tx_output(reader: &mut ByteReader<'_>) -> Result<TxOutput, CovenantError> {
    let sats = reader.read_u64()?;
    let script = Script::new(reader.read_var_bytes()?.to_vec());
    Ok(TxOutput { sats, script })
}

/// Serialize a list of outputs back to back, as committed to by hashOutputs
pub fn ser_tx_outputs<'a>(outputs: impl IntoIterator<Item = &'a TxOutput>) -> Vec<u8> {
    let mut out = Vec::new();
    for output in outputs {
        write_tx_output(&mut out, output);
    }
    out
}

/// Parse outputs serialized back to back
pub fn parse_tx_outputs(data: &[u8]) -> Result<Vec<TxOutput>, CovenantError> {
    let mut reader = ByteReader::new(data);
    let mut outputs = Vec::new();
    while reader.remaining() > 0 {
        outputs.push(read_tx_output(&mut reader)?);
    }
    Ok(outputs)
}

// ----------
// | Inputs |
// ----------

/// The script a signature commits to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignScript {
    /// The output script of a non-P2SH output
    OutputScript(Script),
    /// The redeem script of a P2SH output
    RedeemScript(Script),
}

/// What a signer needs to know about the output being spent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignData {
    /// The value of the spent output
    pub sats: u64,
    /// The script of the spent output
    pub script: SignScript,
}

impl SignData {
    /// Sign data for an output locked by `output_script`
    pub fn output_script(sats: u64, output_script: Script) -> Self {
        Self { sats, script: SignScript::OutputScript(output_script) }
    }

    /// Sign data for a P2SH output with the given redeem script
    pub fn redeem_script(sats: u64, redeem_script: Script) -> Self {
        Self { sats, script: SignScript::RedeemScript(redeem_script) }
    }

    /// The script code committed to by a signature without code separators
    pub fn script_code(&self) -> &Script {
        match &self.script {
            SignScript::OutputScript(script) | SignScript::RedeemScript(script) => script,
        }
    }

    /// The locking script of the spent output
    pub fn locking_script(&self) -> Script {
        match &self.script {
            SignScript::OutputScript(script) => script.clone(),
            SignScript::RedeemScript(script) => script.to_p2sh(),
        }
    }
}

/// A transaction input
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    /// The output being spent
    pub prev_out: OutPoint,
    /// The unlocking script
    pub script: Script,
    /// The sequence number
    pub sequence: u32,
    /// Info about the spent output, absent for deserialized transactions
    pub sign_data: Option<SignData>,
}

impl TxInput {
    /// An unsigned input with the default sequence
    pub fn new(prev_out: OutPoint, sign_data: SignData) -> Self {
        Self { prev_out, script: Script::default(), sequence: DEFAULT_SEQUENCE, sign_data: Some(sign_data) }
    }
}

// ---------------
// | Transaction |
// ---------------

/// A transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tx {
    /// The version
    pub version: i32,
    /// The inputs
    pub inputs: Vec<TxInput>,
    /// The outputs
    pub outputs: Vec<TxOutput>,
    /// The lock time
    pub locktime: u32,
}

impl Default for Tx {
    fn default() -> Self {
        Self { version: TX_VERSION, inputs: vec![], outputs: vec![], locktime: 0 }
    }
}

impl Tx {
    /// Serialize to the wire format
    pub fn ser(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        write_compact_size(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.prev_out.write_to(&mut out);
            write_var_bytes(&mut out, input.script.bytecode());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            write_tx_output(&mut out, output);
        }
        out.extend_from_slice(&self.locktime.to_le_bytes());
        out
    }

    /// Deserialize from the wire format, inputs carry no sign data
    pub fn deser(raw: &[u8]) -> Result<Self, CovenantError> {
        let mut reader = ByteReader::new(raw);
        let version = i32::from_le_bytes(reader.read_array()?);

        let num_inputs = reader.read_compact_size()?;
        let mut inputs = Vec::new();
        for _ in 0..num_inputs {
            let txid = TxId(reader.read_array()?);
            let out_idx = reader.read_u32()?;
            let script = Script::new(reader.read_var_bytes()?.to_vec());
            let sequence = reader.read_u32()?;
            inputs.push(TxInput { prev_out: OutPoint { txid, out_idx }, script, sequence, sign_data: None });
        }

        let num_outputs = reader.read_compact_size()?;
        let mut outputs = Vec::new();
        for _ in 0..num_outputs {
            outputs.push(read_tx_output(&mut reader)?);
        }
        let locktime = reader.read_u32()?;
        if reader.remaining() != 0 {
            return Err(CovenantError::serialization("trailing bytes after tx"));
        }
        Ok(Self { version, inputs, outputs, locktime })
    }

    /// The txid, sha256d of the serialized tx
    pub fn txid(&self) -> TxId {
        TxId(sha256d(&self.ser()))
    }

    /// The serialized size in bytes
    pub fn ser_size(&self) -> usize {
        self.ser().len()
    }

    /// Build the BIP143/forkid sighash preimage for an input
    ///
    /// `codesep_idx` selects the OP_CODESEPARATOR after which the script code
    /// starts, `None` commits to the whole script
    pub fn sighash_preimage(
        &self,
        input_idx: usize,
        sighash: u8,
        codesep_idx: Option<usize>,
    ) -> Result<Vec<u8>, CovenantError> {
        if sighash & SIGHASH_FORKID == 0 || sighash & 0x1f != 0x01 {
            return Err(CovenantError::unsupported(format!("sighash type {sighash:#x}")));
        }
        let input = self.inputs.get(input_idx).ok_or_else(|| {
            CovenantError::signing(format!("input {input_idx} out of range"))
        })?;
        let sign_data = input.sign_data.as_ref().ok_or_else(|| {
            CovenantError::signing(format!("input {input_idx} has no sign data"))
        })?;
        let script_code = match codesep_idx {
            Some(n) => sign_data.script_code().cut_out_codesep(n)?,
            None => sign_data.script_code().clone(),
        };

        let (hash_prevouts, hash_sequence) = if sighash & SIGHASH_ANYONECANPAY != 0 {
            ([0u8; 32], [0u8; 32])
        } else {
            let mut prevouts = Vec::with_capacity(36 * self.inputs.len());
            let mut sequences = Vec::with_capacity(4 * self.inputs.len());
            for input in &self.inputs {
                input.prev_out.write_to(&mut prevouts);
                sequences.extend_from_slice(&input.sequence.to_le_bytes());
            }
            (sha256d(&prevouts), sha256d(&sequences))
        };
        let hash_outputs = sha256d(&ser_tx_outputs(&self.outputs));

        let mut preimage = Vec::with_capacity(156 + script_code.len());
        preimage.extend_from_slice(&self.version.to_le_bytes());
        preimage.extend_from_slice(&hash_prevouts);
        preimage.extend_from_slice(&hash_sequence);
        input.prev_out.write_to(&mut preimage);
        write_var_bytes(&mut preimage, script_code.bytecode());
        preimage.extend_from_slice(&sign_data.sats.to_le_bytes());
        preimage.extend_from_slice(&input.sequence.to_le_bytes());
        preimage.extend_from_slice(&hash_outputs);
        preimage.extend_from_slice(&self.locktime.to_le_bytes());
        preimage.extend_from_slice(&(sighash as u32).to_le_bytes());
        Ok(preimage)
    }
}

/// One input of a transaction that is being signed
#[derive(Clone, Copy, Debug)]
pub struct UnsignedTxInput<'a> {
    /// The transaction, with sign data on every input
    pub tx: &'a Tx,
    /// The index of the input being signed
    pub input_idx: usize,
}

impl UnsignedTxInput<'_> {
    /// The input being signed
    pub fn input(&self) -> Result<&TxInput, CovenantError> {
        self.tx
            .inputs
            .get(self.input_idx)
            .ok_or_else(|| CovenantError::signing(format!("input {} out of range", self.input_idx)))
    }

    /// The sign data of the input being signed
    pub fn sign_data(&self) -> Result<&SignData, CovenantError> {
        self.input()?.sign_data.as_ref().ok_or_else(|| {
            CovenantError::signing(format!("input {} has no sign data", self.input_idx))
        })
    }

    /// The sighash preimage of this input
    pub fn sighash_preimage(
        &self,
        sighash: u8,
        codesep_idx: Option<usize>,
    ) -> Result<Vec<u8>, CovenantError> {
        self.tx.sighash_preimage(self.input_idx, sighash, codesep_idx)
    }

    /// The sighash preimage committing to this input only, as required by the
    /// covenants
    pub fn covenant_preimage(&self) -> Result<Vec<u8>, CovenantError> {
        self.sighash_preimage(ALL_ANYONECANPAY_BIP143, Some(0))
    }
}

#[cfg(test)]
mod tests {
    use constants::ALL_BIP143;

    use super::*;
    use crate::script::{OP_1, OP_CHECKSIG, OP_CODESEPARATOR};

    /// A two-input, two-output tx used across tests
    fn sample_tx() -> Tx {
        let redeem = Script::new(vec![OP_1, OP_CODESEPARATOR, OP_CHECKSIG]);
        Tx {
            version: 2,
            inputs: vec![
                TxInput::new(
                    OutPoint { txid: TxId([1; 32]), out_idx: 3 },
                    SignData::redeem_script(5000, redeem),
                ),
                TxInput::new(
                    OutPoint { txid: TxId([2; 32]), out_idx: 0 },
                    SignData::output_script(1000, Script::p2pkh(&[9; 20])),
                ),
            ],
            outputs: vec![
                TxOutput::new(0, Script::new(vec![0x6a])),
                TxOutput::new(4000, Script::p2pkh(&[7; 20])),
            ],
            locktime: 1_040_365_320,
        }
    }

    #[test]
    fn test_ser_deser() {
        let tx = sample_tx();
        let raw = tx.ser();
        assert_eq!(tx.ser_size(), raw.len());
        assert_eq!(raw.len(), 4 + 1 + 2 * (36 + 1 + 4) + 1 + (9 + 1) + (9 + 25) + 4);

        let mut parsed = Tx::deser(&raw).unwrap();
        for (parsed, orig) in parsed.inputs.iter_mut().zip(&tx.inputs) {
            parsed.sign_data = orig.sign_data.clone();
        }
        assert_eq!(parsed, tx);
        assert_eq!(Tx::deser(&raw).unwrap().txid(), tx.txid());

        assert!(Tx::deser(&raw[..raw.len() - 1]).is_err());
    }

    #[test]
    fn test_txid_display_is_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let txid = TxId(bytes);
        assert!(txid.to_string().ends_with("ab"));
        assert_eq!(txid.to_string().parse::<TxId>().unwrap(), txid);
    }

    #[test]
    fn test_sighash_preimage_layout() {
        let tx = sample_tx();

        let preimage = tx.sighash_preimage(0, ALL_ANYONECANPAY_BIP143, Some(0)).unwrap();
        // Script code after the codeseparator is a single OP_CHECKSIG
        assert_eq!(preimage.len(), 4 + 32 + 32 + 36 + 2 + 8 + 4 + 32 + 4 + 4);
        assert_eq!(&preimage[4..68], &[0u8; 64][..]);
        assert_eq!(&preimage[104..106], &[1, OP_CHECKSIG]);
        assert_eq!(&preimage[106..114], &5000u64.to_le_bytes());
        assert_eq!(&preimage[preimage.len() - 8..preimage.len() - 4], &1_040_365_320u32.to_le_bytes());
        assert_eq!(&preimage[preimage.len() - 4..], &[0xc1, 0, 0, 0]);

        let preimage = tx.sighash_preimage(1, ALL_BIP143, None).unwrap();
        assert_ne!(&preimage[4..36], &[0u8; 32][..]);
        assert_eq!(preimage.len(), 4 + 32 + 32 + 36 + 26 + 8 + 4 + 32 + 4 + 4);

        assert!(tx.sighash_preimage(2, ALL_BIP143, None).is_err());
        assert!(tx.sighash_preimage(0, 0x01, None).is_err());
    }

    #[test]
    fn test_outputs_ser() {
        let tx = sample_tx();
        let ser = ser_tx_outputs(&tx.outputs);
        assert_eq!(parse_tx_outputs(&ser).unwrap(), tx.outputs);
        assert_eq!(tx.outputs[1].ser().len(), 34);
    }
}
