//! Script opcodes, push encoding and the `Script` bytecode container
//!
//! Scripts are treated as opaque byte sequences; this module only knows how
//! to emit and split them into ops, it never executes them

use std::fmt::{self, Display};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    errors::CovenantError,
    hash::{HASH160_LEN, hash160},
};

// -----------
// | Opcodes |
// -----------

/// Push an empty byte string
pub const OP_0: u8 = 0x00;
/// The next byte is the push length
pub const OP_PUSHDATA1: u8 = 0x4c;
/// The next two bytes are the push length
pub const OP_PUSHDATA2: u8 = 0x4d;
/// The next four bytes are the push length
pub const OP_PUSHDATA4: u8 = 0x4e;
/// Push the number -1
pub const OP_1NEGATE: u8 = 0x4f;
/// Reserved opcode, marks eMPP OP_RETURNs
pub const OP_RESERVED: u8 = 0x50;
/// Push the number 1
pub const OP_1: u8 = 0x51;
/// Push the number 2
pub const OP_2: u8 = 0x52;
/// Push the number 3
pub const OP_3: u8 = 0x53;
/// Push the number 8
pub const OP_8: u8 = 0x58;
/// Push the number 9
pub const OP_9: u8 = 0x59;
/// Push the number 12
pub const OP_12: u8 = 0x5c;
/// Push the number 16
pub const OP_16: u8 = 0x60;
/// Conditional branch
pub const OP_IF: u8 = 0x63;
/// Negated conditional branch
pub const OP_NOTIF: u8 = 0x64;
/// Alternative branch
pub const OP_ELSE: u8 = 0x67;
/// End of a conditional
pub const OP_ENDIF: u8 = 0x68;
/// Fail unless the top item is truthy
pub const OP_VERIFY: u8 = 0x69;
/// Marks an output as provably unspendable
pub const OP_RETURN: u8 = 0x6a;
/// Move the top item to the alt stack
pub const OP_TOALTSTACK: u8 = 0x6b;
/// Move the top alt stack item back
pub const OP_FROMALTSTACK: u8 = 0x6c;
/// Duplicate the top two items
pub const OP_2DUP: u8 = 0x6e;
/// Duplicate the top three items
pub const OP_3DUP: u8 = 0x6f;
/// Copy the third and fourth items to the top
pub const OP_2OVER: u8 = 0x70;
/// Swap the top two pairs of items
pub const OP_2SWAP: u8 = 0x72;
/// Drop the top item
pub const OP_DROP: u8 = 0x75;
/// Duplicate the top item
pub const OP_DUP: u8 = 0x76;
/// Remove the second item
pub const OP_NIP: u8 = 0x77;
/// Copy the second item to the top
pub const OP_OVER: u8 = 0x78;
/// Copy the n-th item to the top
pub const OP_PICK: u8 = 0x79;
/// Rotate the top three items
pub const OP_ROT: u8 = 0x7b;
/// Swap the top two items
pub const OP_SWAP: u8 = 0x7c;
/// Copy the top item below the second
pub const OP_TUCK: u8 = 0x7d;
/// Concatenate two byte strings
pub const OP_CAT: u8 = 0x7e;
/// Split a byte string at an index
pub const OP_SPLIT: u8 = 0x7f;
/// Serialize a number into a fixed width
pub const OP_NUM2BIN: u8 = 0x80;
/// Minimally encode a byte string as a number
pub const OP_BIN2NUM: u8 = 0x81;
/// Push the size of the top item
pub const OP_SIZE: u8 = 0x82;
/// Byte equality
pub const OP_EQUAL: u8 = 0x87;
/// Byte equality followed by OP_VERIFY
pub const OP_EQUALVERIFY: u8 = 0x88;
/// 1 if the input is not 0
pub const OP_0NOTEQUAL: u8 = 0x92;
/// Addition
pub const OP_ADD: u8 = 0x93;
/// Subtraction
pub const OP_SUB: u8 = 0x94;
/// Integer division
pub const OP_DIV: u8 = 0x96;
/// Integer modulo
pub const OP_MOD: u8 = 0x97;
/// a >= b
pub const OP_GREATERTHANOREQUAL: u8 = 0xa2;
/// sha256 of the top item
pub const OP_SHA256: u8 = 0xa8;
/// hash160 of the top item
pub const OP_HASH160: u8 = 0xa9;
/// sha256d of the top item
pub const OP_HASH256: u8 = 0xaa;
/// Cuts the scriptCode used in signature checks
pub const OP_CODESEPARATOR: u8 = 0xab;
/// Transaction signature check
pub const OP_CHECKSIG: u8 = 0xac;
/// Transaction signature check followed by OP_VERIFY
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
/// Signature check over arbitrary data followed by OP_VERIFY
pub const OP_CHECKDATASIGVERIFY: u8 = 0xbb;
/// Reverse the bytes of the top item
pub const OP_REVERSEBYTES: u8 = 0xbc;

// ------------
// | Push Ops |
// ------------

/// A single script operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// A non-push opcode, including the small number opcodes
    Code(u8),
    /// A push opcode together with the data it pushes
    Push(u8, Vec<u8>),
}

impl Op {
    /// Append the encoding of this op to the given buffer
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Op::Code(opcode) => out.push(*opcode),
            Op::Push(opcode, data) => {
                out.push(*opcode);
                match *opcode {
                    OP_PUSHDATA1 => out.push(data.len() as u8),
                    OP_PUSHDATA2 => out.extend_from_slice(&(data.len() as u16).to_le_bytes()),
                    OP_PUSHDATA4 => out.extend_from_slice(&(data.len() as u32).to_le_bytes()),
                    _ => {},
                }
                out.extend_from_slice(data);
            },
        }
    }

    /// The data pushed by this op, if it is a data push
    pub fn push_data(&self) -> Option<&[u8]> {
        match self {
            Op::Push(_, data) => Some(data),
            Op::Code(_) => None,
        }
    }

    /// Whether the op only pushes onto the stack, which includes the small
    /// number opcodes
    pub fn is_push_only(&self) -> bool {
        match self {
            Op::Push(..) => true,
            Op::Code(opcode) => *opcode == OP_1NEGATE || (OP_1..=OP_16).contains(opcode),
        }
    }
}

/// Build an op pushing the given bytes
///
/// Never converts to OP_1..OP_16, matching the encoding committed to in the
/// covenants
pub fn push_bytes_op(data: impl Into<Vec<u8>>) -> Op {
    let data = data.into();
    let len = data.len();
    let opcode = if len == 0 {
        OP_0
    } else if len < OP_PUSHDATA1 as usize {
        len as u8
    } else if len <= 0xff {
        OP_PUSHDATA1
    } else if len <= 0xffff {
        OP_PUSHDATA2
    } else {
        OP_PUSHDATA4
    };
    Op::Push(opcode, data)
}

/// Build an op pushing the given number, minimally encoded
pub fn push_number_op(num: i64) -> Op {
    match num {
        0 => Op::Push(OP_0, vec![]),
        -1 => Op::Code(OP_1NEGATE),
        1..=16 => Op::Code(OP_1 + (num as u8) - 1),
        _ => push_bytes_op(encode_script_num(num)),
    }
}

/// Encode a number in the sign-magnitude little endian Script format
pub fn encode_script_num(num: i64) -> Vec<u8> {
    if num == 0 {
        return vec![];
    }

    let negative = num < 0;
    let mut abs = num.unsigned_abs();
    let mut bytes = Vec::with_capacity(9);
    while abs > 0 {
        bytes.push((abs & 0xff) as u8);
        abs >>= 8;
    }

    // The sign lives in the top bit of the last byte; add a byte if it's taken
    let last = bytes.len() - 1;
    if bytes[last] & 0x80 != 0 {
        bytes.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        bytes[last] |= 0x80;
    }
    bytes
}

/// Decode a Script number of at most 8 bytes
pub fn decode_script_num(bytes: &[u8]) -> Result<i64, CovenantError> {
    if bytes.len() > 8 {
        return Err(CovenantError::serialization(format!(
            "script number too long: {} bytes",
            bytes.len()
        )));
    }
    let Some((&last, _)) = bytes.split_last() else {
        return Ok(0);
    };

    let mut magnitude: u64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        let byte = if i == bytes.len() - 1 { byte & 0x7f } else { *byte };
        magnitude |= (byte as u64) << (8 * i);
    }
    let magnitude = i64::try_from(magnitude)
        .map_err(|_| CovenantError::serialization("script number out of range"))?;
    Ok(if last & 0x80 != 0 { -magnitude } else { magnitude })
}

// ----------
// | Script |
// ----------

/// A script as raw bytecode
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Script(Vec<u8>);

impl Script {
    /// Wrap raw bytecode
    pub fn new(bytecode: Vec<u8>) -> Self {
        Self(bytecode)
    }

    /// Parse a script from hex
    pub fn from_hex(hex: &str) -> Result<Self, CovenantError> {
        util::hex::bytes_from_hex_string(hex).map(Self).map_err(CovenantError::Serialization)
    }

    /// Serialize a list of ops into a script
    pub fn from_ops(ops: &[Op]) -> Self {
        let mut bytecode = Vec::new();
        for op in ops {
            op.write_to(&mut bytecode);
        }
        Self(bytecode)
    }

    /// The raw bytecode
    pub fn bytecode(&self) -> &[u8] {
        &self.0
    }

    /// Consume the script, returning its bytecode
    pub fn into_bytecode(self) -> Vec<u8> {
        self.0
    }

    /// The length of the bytecode
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the script is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the ops of the script
    pub fn ops(&self) -> ScriptOps<'_> {
        ScriptOps { bytecode: &self.0, idx: 0 }
    }

    /// Parse all ops, failing on a truncated push
    pub fn parse_ops(&self) -> Result<Vec<Op>, CovenantError> {
        self.ops().collect()
    }

    /// Pay-to-pubkey-hash script
    pub fn p2pkh(pkh: &[u8; HASH160_LEN]) -> Self {
        let mut bytecode = vec![OP_DUP, OP_HASH160, HASH160_LEN as u8];
        bytecode.extend_from_slice(pkh);
        bytecode.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Self(bytecode)
    }

    /// Pay-to-script-hash script
    pub fn p2sh(sh: &[u8; HASH160_LEN]) -> Self {
        let mut bytecode = vec![OP_HASH160, HASH160_LEN as u8];
        bytecode.extend_from_slice(sh);
        bytecode.push(OP_EQUAL);
        Self(bytecode)
    }

    /// Pay-to-script-hash script committing to this script
    pub fn to_p2sh(&self) -> Self {
        Self::p2sh(&hash160(&self.0))
    }

    /// The pubkey hash if this is a P2PKH script
    pub fn p2pkh_hash(&self) -> Option<[u8; HASH160_LEN]> {
        let b = &self.0;
        let is_p2pkh = b.len() == 25
            && b[..3] == [OP_DUP, OP_HASH160, HASH160_LEN as u8]
            && b[23..] == [OP_EQUALVERIFY, OP_CHECKSIG];
        is_p2pkh.then(|| b[3..23].try_into().ok()).flatten()
    }

    /// The script hash if this is a P2SH script
    pub fn p2sh_hash(&self) -> Option<[u8; HASH160_LEN]> {
        let b = &self.0;
        let is_p2sh = b.len() == 23
            && b[..2] == [OP_HASH160, HASH160_LEN as u8]
            && b[22] == OP_EQUAL;
        is_p2sh.then(|| b[2..22].try_into().ok()).flatten()
    }

    /// Whether the script starts with OP_RETURN
    pub fn is_op_return(&self) -> bool {
        self.0.first() == Some(&OP_RETURN)
    }

    /// The part of the script after the `n`-th (0-based) OP_CODESEPARATOR,
    /// which is what signature checks executed after it commit to
    pub fn cut_out_codesep(&self, n: usize) -> Result<Script, CovenantError> {
        let mut ops = self.ops();
        let mut seen = 0;
        loop {
            let op = match ops.next() {
                Some(op) => op?,
                None => {
                    return Err(CovenantError::serialization(format!(
                        "script has no OP_CODESEPARATOR #{n}"
                    )))
                },
            };
            if op == Op::Code(OP_CODESEPARATOR) {
                if seen == n {
                    return Ok(Script(self.0[ops.idx..].to_vec()));
                }
                seen += 1;
            }
        }
    }

    /// Hex encoding of the bytecode
    pub fn to_hex(&self) -> String {
        util::hex::bytes_to_hex_string(&self.0)
    }
}

impl Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Script {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Script::from_hex(&String::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }
}

impl From<Vec<u8>> for Script {
    fn from(bytecode: Vec<u8>) -> Self {
        Self(bytecode)
    }
}

/// Iterator over the ops of a script
#[derive(Clone, Debug)]
pub struct ScriptOps<'a> {
    /// The bytecode being iterated
    bytecode: &'a [u8],
    /// The offset of the next op
    idx: usize,
}

impl ScriptOps<'_> {
    /// Read `n` bytes, advancing the cursor
    fn take(&mut self, n: usize) -> Result<&[u8], CovenantError> {
        let end = self.idx.checked_add(n).filter(|end| *end <= self.bytecode.len()).ok_or_else(
            || CovenantError::serialization(format!("push of {n} bytes exceeds script")),
        )?;
        let slice = &self.bytecode[self.idx..end];
        self.idx = end;
        Ok(slice)
    }

    /// Read the op at the cursor
    fn read_op(&mut self) -> Result<Op, CovenantError> {
        let opcode = self.take(1)?[0];
        let len = match opcode {
            OP_0 => 0,
            1..=0x4b => opcode as usize,
            OP_PUSHDATA1 => self.take(1)?[0] as usize,
            OP_PUSHDATA2 => {
                let b = self.take(2)?;
                u16::from_le_bytes([b[0], b[1]]) as usize
            },
            OP_PUSHDATA4 => {
                let b = self.take(4)?;
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
            },
            _ => return Ok(Op::Code(opcode)),
        };
        let data = self.take(len)?.to_vec();
        Ok(Op::Push(opcode, data))
    }
}

impl Iterator for ScriptOps<'_> {
    type Item = Result<Op, CovenantError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.bytecode.len() {
            return None;
        }
        let op = self.read_op();
        if op.is_err() {
            // Stop after the first malformed op
            self.idx = self.bytecode.len();
        }
        Some(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_number_encoding() {
        let enc = |n| Script::from_ops(&[push_number_op(n)]).to_hex();
        assert_eq!(enc(0), "00");
        assert_eq!(enc(1), "51");
        assert_eq!(enc(16), "60");
        assert_eq!(enc(-1), "4f");
        assert_eq!(enc(17), "0111");
        assert_eq!(enc(127), "017f");
        assert_eq!(enc(128), "028000");
        assert_eq!(enc(-128), "028080");
        assert_eq!(enc(546), "022202");
        assert_eq!(enc(0x7fffffff), "04ffffff7f");
    }

    #[test]
    fn test_push_bytes_never_minimal_opcodes() {
        assert_eq!(Script::from_ops(&[push_bytes_op(vec![1])]).to_hex(), "0101");
        assert_eq!(Script::from_ops(&[push_bytes_op(vec![])]).to_hex(), "00");
        let pushdata1 = Script::from_ops(&[push_bytes_op(vec![0xaa; 0x4c])]);
        assert_eq!(&pushdata1.bytecode()[..2], &[OP_PUSHDATA1, 0x4c]);
        let pushdata2 = Script::from_ops(&[push_bytes_op(vec![0xaa; 0x100])]);
        assert_eq!(&pushdata2.bytecode()[..3], &[OP_PUSHDATA2, 0x00, 0x01]);
    }

    #[test]
    fn test_script_num_decode() {
        for n in [0, 1, -1, 127, 128, -255, 0x7fffffff, -0x80000000, i64::MAX] {
            assert_eq!(decode_script_num(&encode_script_num(n)).unwrap(), n);
        }
        assert!(decode_script_num(&[0; 9]).is_err());
    }

    #[test]
    fn test_parse_ops() {
        let script = Script::from_ops(&[
            push_bytes_op(b"AGR0".to_vec()),
            Op::Code(OP_DROP),
            push_bytes_op(vec![7; 300]),
            push_number_op(0),
        ]);
        let ops = script.parse_ops().unwrap();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[0].push_data(), Some(&b"AGR0"[..]));
        assert_eq!(ops[1], Op::Code(OP_DROP));
        assert_eq!(ops[2].push_data().map(<[u8]>::len), Some(300));
        assert_eq!(ops[3], Op::Push(OP_0, vec![]));

        let truncated = Script::new(vec![0x05, 1, 2]);
        assert!(truncated.parse_ops().is_err());
    }

    #[test]
    fn test_cut_out_codesep() {
        let script = Script::new(vec![OP_1, OP_CODESEPARATOR, OP_2, OP_CODESEPARATOR, OP_CHECKSIG]);
        assert_eq!(script.cut_out_codesep(0).unwrap().bytecode(), &[OP_2, OP_CODESEPARATOR, OP_CHECKSIG]);
        assert_eq!(script.cut_out_codesep(1).unwrap().bytecode(), &[OP_CHECKSIG]);
        assert!(script.cut_out_codesep(2).is_err());

        // A codeseparator byte inside a push doesn't count
        let pushed = Script::from_ops(&[push_bytes_op(vec![OP_CODESEPARATOR]), Op::Code(OP_DROP)]);
        assert!(pushed.cut_out_codesep(0).is_err());
    }

    #[test]
    fn test_standard_scripts() {
        let hash = [0x11; 20];
        let p2pkh = Script::p2pkh(&hash);
        assert_eq!(p2pkh.to_hex(), format!("76a914{}88ac", "11".repeat(20)));
        assert_eq!(p2pkh.p2pkh_hash(), Some(hash));
        assert_eq!(p2pkh.p2sh_hash(), None);

        let p2sh = Script::p2sh(&hash);
        assert_eq!(p2sh.to_hex(), format!("a914{}87", "11".repeat(20)));
        assert_eq!(p2sh.p2sh_hash(), Some(hash));
    }
}
