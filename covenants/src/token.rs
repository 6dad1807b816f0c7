//! Token identities and the SLP / ALP / eMPP OP_RETURN encodings
//!
//! SLP encodes amounts as 8-byte big endian pushes directly in the OP_RETURN,
//! ALP encodes them as 6-byte little endian integers inside an eMPP pushdata.
//! In both protocols the n-th amount is assigned to output n, starting at 1.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    errors::CovenantError,
    script::{OP_RESERVED, OP_RETURN, Op, Script, push_bytes_op},
    ser::ByteReader,
};

/// LOKAD id of SLP
pub const SLP_LOKAD_ID: &[u8] = b"SLP\0";
/// LOKAD id of ALP
pub const ALP_LOKAD_ID: &[u8] = b"SLP2";
/// The SEND transaction type, shared by both protocols
pub const SEND_TX_TYPE: &[u8] = b"SEND";
/// The largest amount an ALP output can carry
pub const ALP_MAX_AMOUNT: u64 = 0xffff_ffff_ffff;
/// Byte width of an ALP amount
const ALP_AMOUNT_LEN: usize = 6;
/// Byte width of an SLP amount
const SLP_AMOUNT_LEN: usize = 8;

// ------------
// | Token Id |
// ------------

/// A token id, stored in display (big endian) byte order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub [u8; 32]);

impl TokenId {
    /// The token id in display byte order, as it appears in SLP OP_RETURNs
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The token id in the byte order of a txid hash, as used by ALP
    pub fn to_le_bytes(&self) -> [u8; 32] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    /// Build a token id from ALP's little endian byte order
    pub fn from_le_bytes(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Self(bytes)
    }
}

impl Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", util::hex::bytes_to_hex_string(&self.0))
    }
}

impl FromStr for TokenId {
    type Err = CovenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        util::hex::array_from_hex_string(s).map(Self).map_err(CovenantError::Serialization)
    }
}

impl Serialize for TokenId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        hex.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------
// | Token Types |
// ---------------

/// The token protocol of an offered token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenProtocol {
    /// Simple Ledger Protocol, amounts encoded in the OP_RETURN
    Slp,
    /// Augmented Ledger Protocol, amounts encoded in eMPP pushdata
    Alp,
}

impl TokenProtocol {
    /// The largest amount a single output of this protocol can carry
    pub fn max_atoms(&self) -> u64 {
        match self {
            TokenProtocol::Slp => constants::SLP_MAX_ATOMS,
            TokenProtocol::Alp => constants::ALP_MAX_ATOMS,
        }
    }
}

impl Display for TokenProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenProtocol::Slp => write!(f, "SLP"),
            TokenProtocol::Alp => write!(f, "ALP"),
        }
    }
}

/// A token protocol together with the protocol-specific type number
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenType {
    /// The protocol
    pub protocol: TokenProtocol,
    /// The type number within the protocol
    pub number: u8,
}

impl TokenType {
    /// SLP fungible tokens
    pub const SLP_FUNGIBLE: Self = Self { protocol: TokenProtocol::Slp, number: 1 };
    /// SLP mint vault tokens
    pub const SLP_MINT_VAULT: Self = Self { protocol: TokenProtocol::Slp, number: 2 };
    /// SLP NFT1 children
    pub const SLP_NFT1_CHILD: Self = Self { protocol: TokenProtocol::Slp, number: 0x41 };
    /// SLP NFT1 groups
    pub const SLP_NFT1_GROUP: Self = Self { protocol: TokenProtocol::Slp, number: 0x81 };
    /// ALP standard tokens
    pub const ALP_STANDARD: Self = Self { protocol: TokenProtocol::Alp, number: 0 };

    /// Whether this is an NFT1 child, the only type grouped under a parent
    pub fn is_nft1_child(&self) -> bool {
        *self == Self::SLP_NFT1_CHILD
    }
}

/// A token amount sitting in an output
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The token id
    pub token_id: TokenId,
    /// The token type
    pub token_type: TokenType,
    /// The amount in base units
    pub atoms: u64,
    /// Whether the output is a mint baton rather than an amount
    pub is_mint_baton: bool,
}

impl Token {
    /// A plain token amount
    pub fn new(token_id: TokenId, token_type: TokenType, atoms: u64) -> Self {
        Self { token_id, token_type, atoms, is_mint_baton: false }
    }
}

/// A decoded SEND section, amounts are assigned to outputs 1, 2, ...
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenSend {
    /// The token being sent
    pub token_id: TokenId,
    /// The token type
    pub token_type: TokenType,
    /// Output amounts, starting at output 1
    pub amounts: Vec<u64>,
}

// ------------
// | Encoding |
// ------------

/// Build the ops of an SLP SEND OP_RETURN
fn slp_send_ops(token_id: &TokenId, token_type: u8, amounts: &[u64]) -> Vec<Op> {
    let mut ops = vec![
        Op::Code(OP_RETURN),
        push_bytes_op(SLP_LOKAD_ID.to_vec()),
        push_bytes_op(vec![token_type]),
        push_bytes_op(SEND_TX_TYPE.to_vec()),
        push_bytes_op(token_id.as_bytes().to_vec()),
    ];
    ops.extend(amounts.iter().map(|amount| push_bytes_op(amount.to_be_bytes().to_vec())));
    ops
}

/// An SLP SEND OP_RETURN script
pub fn slp_send(token_id: &TokenId, token_type: u8, amounts: &[u64]) -> Script {
    Script::from_ops(&slp_send_ops(token_id, token_type, amounts))
}

/// The ALP SEND pushdata up to and including the token id
pub fn alp_send_intro(token_id: &TokenId, token_type: u8) -> Vec<u8> {
    let mut data = ALP_LOKAD_ID.to_vec();
    data.push(token_type);
    data.push(SEND_TX_TYPE.len() as u8);
    data.extend_from_slice(SEND_TX_TYPE);
    data.extend_from_slice(&token_id.to_le_bytes());
    data
}

/// An ALP SEND pushdata, to be wrapped in an eMPP script
pub fn alp_send(
    token_id: &TokenId,
    token_type: u8,
    amounts: &[u64],
) -> Result<Vec<u8>, CovenantError> {
    let mut data = alp_send_intro(token_id, token_type);
    let num_amounts = u8::try_from(amounts.len())
        .map_err(|_| CovenantError::serialization("too many ALP amounts"))?;
    data.push(num_amounts);
    for amount in amounts {
        if *amount > ALP_MAX_AMOUNT {
            return Err(CovenantError::serialization(format!(
                "ALP amount {amount} exceeds 0xffffffffffff"
            )));
        }
        data.extend_from_slice(&amount.to_le_bytes()[..ALP_AMOUNT_LEN]);
    }
    Ok(data)
}

/// An eMPP OP_RETURN carrying the given pushdata
pub fn empp_script<T: AsRef<[u8]>>(pushdata: &[T]) -> Script {
    let mut ops = vec![Op::Code(OP_RETURN), Op::Code(OP_RESERVED)];
    ops.extend(pushdata.iter().map(|data| push_bytes_op(data.as_ref().to_vec())));
    Script::from_ops(&ops)
}

// -----------
// | Parsing |
// -----------

/// Parse an SLP SEND OP_RETURN, `None` if the script isn't SLP at all
pub fn parse_slp_send(script: &Script) -> Result<Option<TokenSend>, CovenantError> {
    let Ok(ops) = script.parse_ops() else {
        return Ok(None);
    };
    let is_slp = ops.first() == Some(&Op::Code(OP_RETURN))
        && ops.get(1).and_then(Op::push_data) == Some(SLP_LOKAD_ID);
    if !is_slp {
        return Ok(None);
    }

    let mut pushes = ops[2..].iter().map(|op| {
        op.push_data().ok_or_else(|| CovenantError::serialization("SLP OP_RETURN has non-push op"))
    });
    let mut next = || {
        pushes.next().unwrap_or_else(|| Err(CovenantError::serialization("SLP OP_RETURN too short")))
    };

    let token_type = match next()? {
        [number] => TokenType { protocol: TokenProtocol::Slp, number: *number },
        other => {
            return Err(CovenantError::serialization(format!(
                "SLP token type has {} bytes",
                other.len()
            )))
        },
    };
    if next()? != SEND_TX_TYPE {
        return Err(CovenantError::unsupported("only SLP SEND is supported"));
    }
    let token_id = next()?
        .try_into()
        .map(TokenId)
        .map_err(|_| CovenantError::serialization("SLP token id must be 32 bytes"))?;

    let mut amounts = Vec::new();
    for push in pushes {
        let amount: [u8; SLP_AMOUNT_LEN] = push?
            .try_into()
            .map_err(|_| CovenantError::serialization("SLP amount must be 8 bytes"))?;
        amounts.push(u64::from_be_bytes(amount));
    }
    Ok(Some(TokenSend { token_id, token_type, amounts }))
}

/// Parse the pushdata of an eMPP OP_RETURN, `None` if the script isn't eMPP
pub fn parse_empp(script: &Script) -> Option<Vec<Vec<u8>>> {
    let ops = script.parse_ops().ok()?;
    if ops.get(..2)? != [Op::Code(OP_RETURN), Op::Code(OP_RESERVED)] {
        return None;
    }
    ops[2..].iter().map(|op| op.push_data().map(<[u8]>::to_vec)).collect()
}

/// Parse an ALP SEND pushdata, `None` if it's not an ALP SEND section
pub fn parse_alp_send(pushdata: &[u8]) -> Result<Option<TokenSend>, CovenantError> {
    let mut reader = ByteReader::new(pushdata);
    if !pushdata.starts_with(ALP_LOKAD_ID) {
        return Ok(None);
    }
    reader.read_bytes(ALP_LOKAD_ID.len())?;
    let token_type = TokenType { protocol: TokenProtocol::Alp, number: reader.read_u8()? };
    let tx_type_len = reader.read_u8()? as usize;
    if reader.read_bytes(tx_type_len)? != SEND_TX_TYPE {
        return Ok(None);
    }
    let token_id = TokenId::from_le_bytes(reader.read_array()?);

    let num_amounts = reader.read_u8()?;
    let mut amounts = Vec::with_capacity(num_amounts as usize);
    for _ in 0..num_amounts {
        let mut amount = [0u8; 8];
        amount[..ALP_AMOUNT_LEN].copy_from_slice(reader.read_bytes(ALP_AMOUNT_LEN)?);
        amounts.push(u64::from_le_bytes(amount));
    }
    if reader.remaining() != 0 {
        return Err(CovenantError::serialization("trailing bytes after ALP SEND"));
    }
    Ok(Some(TokenSend { token_id, token_type, amounts }))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A token id with distinct first and last bytes
    fn token_id() -> TokenId {
        "aed861a31b96934b88c0252ede135cb9700d7649f69191235087a3030e553cb1".parse().unwrap()
    }

    #[test]
    fn test_slp_send() {
        let script = slp_send(&token_id(), 1, &[0]);
        assert_eq!(script.len(), 55);
        assert_eq!(
            script.to_hex(),
            "6a04534c500001010453454e4420\
             aed861a31b96934b88c0252ede135cb9700d7649f69191235087a3030e553cb1\
             080000000000000000"
        );

        let parsed = parse_slp_send(&slp_send(&token_id(), 1, &[0, 7, u64::MAX])).unwrap().unwrap();
        assert_eq!(parsed.token_id, token_id());
        assert_eq!(parsed.token_type, TokenType::SLP_FUNGIBLE);
        assert_eq!(parsed.amounts, vec![0, 7, u64::MAX]);

        assert_eq!(parse_slp_send(&Script::p2pkh(&[0; 20])).unwrap(), None);
    }

    #[test]
    fn test_alp_send() {
        let intro = alp_send_intro(&token_id(), 0);
        assert_eq!(intro.len(), 42);
        assert_eq!(intro[10], 0xb1);

        let pushdata = alp_send(&token_id(), 0, &[0, 1, ALP_MAX_AMOUNT]).unwrap();
        let parsed = parse_alp_send(&pushdata).unwrap().unwrap();
        assert_eq!(parsed.token_id, token_id());
        assert_eq!(parsed.amounts, vec![0, 1, ALP_MAX_AMOUNT]);

        assert!(alp_send(&token_id(), 0, &[ALP_MAX_AMOUNT + 1]).is_err());
        assert_eq!(parse_alp_send(b"AGR0\x07PARTIAL").unwrap(), None);
    }

    #[test]
    fn test_empp() {
        let script = empp_script(&[b"AGR0".to_vec(), vec![1, 2, 3]]);
        assert_eq!(script.to_hex(), "6a50044147523003010203");
        let pushdata = parse_empp(&script).unwrap();
        assert_eq!(pushdata, vec![b"AGR0".to_vec(), vec![1, 2, 3]]);
        assert_eq!(parse_empp(&slp_send(&token_id(), 1, &[0])), None);
    }

    #[test]
    fn test_token_id_serde() {
        let json = serde_json::to_string(&token_id()).unwrap();
        assert_eq!(json, format!("\"{}\"", token_id()));
        let rec: TokenId = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, token_id());
    }
}
