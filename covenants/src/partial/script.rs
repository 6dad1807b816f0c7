//! The Script of the partial offer covenant
//!
//! When accepting, the covenant rebuilds the accept transaction's token
//! OP_RETURN, the payment to the maker and the P2SH of the remaining offer
//! from the accepted amount, then checks the spending transaction commits to
//! exactly those outputs through its sighash preimage.
//!
//! The stack on entry when accepting is
//! `cov_pk, cov_sig, buyer_outputs, preimage[68..], accepted_scaled, OP_1`;
//! cancelling pushes `sig, OP_0`.

use constants::{AGORA_LOKAD_ID, ALL_ANYONECANPAY_BIP143, PARTIAL_VARIANT};

use super::AgoraPartial;
use crate::{hash::HASH160_LEN, script::*, token::TokenProtocol};

/// Length of a serialized outpoint, which precedes the script code in the
/// sighash preimage after the first 68 bytes are cut off
const OUTPOINT_LEN: u64 = 36;
/// Length of the sighash preimage prefix committing to version and the
/// prevouts and sequence hashes
const PREIMAGE_PREFIX_LEN: u64 = 68;
/// Length of a compressed pubkey
const PUBKEY_LEN: usize = 33;
/// Byte width of an SLP amount
const SLP_AMOUNT_LEN: u8 = 8;
/// Byte width of an ALP amount
const ALP_AMOUNT_LEN: u8 = 6;

/// A non-push op
fn code(opcode: u8) -> Op {
    Op::Code(opcode)
}

/// A minimally encoded number push
fn num(num: u64) -> Op {
    push_number_op(num as i64)
}

/// A data push
fn data(bytes: impl Into<Vec<u8>>) -> Op {
    push_bytes_op(bytes)
}

impl AgoraPartial {
    /// The covenant's redeem script
    pub fn script(&self) -> Script {
        let (consts, intro_len) = self.covenant_consts();
        let consts_len = consts.len();
        let intro_len = intro_len as u64;
        let scaled_trunc_atoms = self.trunc_atoms.wrapping_mul(self.atoms_scale_factor);
        let price = self.scaled_trunc_atoms_per_trunc_sat;
        let nsats = self.num_sats_trunc_bytes;
        let script_len_push_len = if self.script_len < 0xfd { 1 } else { 3 };
        let consts_push_prefix = if consts_len >= OP_PUSHDATA1 as usize {
            vec![OP_PUSHDATA1, consts_len as u8]
        } else {
            vec![consts_len as u8]
        };

        let mut ops = vec![
            data(consts),
            data(scaled_trunc_atoms.to_le_bytes().to_vec()),
            code(OP_CODESEPARATOR),
            code(OP_ROT),
            code(OP_IF),
            // Check the accepted amount against the offered and minimum amounts
            code(OP_BIN2NUM),
            code(OP_ROT),
            code(OP_2DUP),
            code(OP_GREATERTHANOREQUAL),
            code(OP_VERIFY),
            code(OP_DUP),
            num(self.min_accepted_scaled_trunc_atoms),
            code(OP_GREATERTHANOREQUAL),
            code(OP_VERIFY),
            code(OP_DUP),
            num(self.atoms_scale_factor),
            code(OP_MOD),
            code(OP_0),
            code(OP_EQUALVERIFY),
            code(OP_TUCK),
            code(OP_SUB),
            // Rebuild the token OP_RETURN from its intro
            num(2),
            code(OP_PICK),
            num(intro_len),
            code(OP_SPLIT),
            code(OP_DROP),
            code(OP_OVER),
            code(OP_0NOTEQUAL),
        ];
        ops.extend(self.op_return_ops(intro_len));
        ops.extend([
            // The payment to the maker, rounding the truncated sats up
            data(vec![0; nsats as usize]),
            code(OP_CAT),
            code(OP_ROT),
            num(price - 1),
            code(OP_ADD),
            num(price),
            code(OP_DIV),
            num(8 - nsats as u64),
            code(OP_NUM2BIN),
            code(OP_CAT),
            data(vec![25, OP_DUP, OP_HASH160, HASH160_LEN as u8]),
            code(OP_2OVER),
            code(OP_DROP),
            num((consts_len - PUBKEY_LEN) as u64),
            code(OP_SPLIT),
            code(OP_NIP),
            code(OP_HASH160),
            code(OP_CAT),
            data(vec![OP_EQUALVERIFY, OP_CHECKSIG]),
            code(OP_CAT),
            code(OP_CAT),
            code(OP_TOALTSTACK),
            // The P2SH output of the remaining offer
            code(OP_TUCK),
            num(self.dust_sats),
            code(OP_8),
            code(OP_NUM2BIN),
            data(vec![23, OP_HASH160, HASH160_LEN as u8]),
            code(OP_CAT),
            data(consts_push_prefix),
            code(OP_2SWAP),
            code(OP_8),
            code(OP_TUCK),
            code(OP_NUM2BIN),
            code(OP_CAT),
            code(OP_CAT),
            code(OP_CAT),
            data(vec![OP_CODESEPARATOR]),
            code(OP_CAT),
            // Take the script code and lock time from the preimage
            num(3),
            code(OP_PICK),
            num(OUTPOINT_LEN + script_len_push_len),
            code(OP_SPLIT),
            code(OP_NIP),
            num(self.script_len as u64),
            code(OP_SPLIT),
            code(OP_12),
            code(OP_SPLIT),
            code(OP_NIP),
            num(32),
            code(OP_SPLIT),
            num(4),
            code(OP_SPLIT),
            code(OP_DROP),
            data(self.enforced_lock_time.to_le_bytes().to_vec()),
            code(OP_EQUALVERIFY),
            code(OP_TOALTSTACK),
            code(OP_CAT),
            code(OP_HASH160),
            code(OP_CAT),
            data(vec![OP_EQUAL]),
            code(OP_CAT),
            // No remaining offer output if everything is accepted
            code(OP_SWAP),
            code(OP_0NOTEQUAL),
            code(OP_NOTIF),
            code(OP_DROP),
            data(Vec::new()),
            code(OP_ENDIF),
            code(OP_ROT),
            code(OP_SIZE),
            code(OP_0NOTEQUAL),
            code(OP_VERIFY),
            code(OP_CAT),
            code(OP_FROMALTSTACK),
            code(OP_FROMALTSTACK),
            code(OP_ROT),
            code(OP_CAT),
            code(OP_HASH256),
            code(OP_EQUALVERIFY),
            // Verify the preimage is the one signed by the covenant key
            code(OP_2),
            num(PREIMAGE_PREFIX_LEN),
            code(OP_NUM2BIN),
            code(OP_SWAP),
            code(OP_CAT),
            code(OP_SHA256),
            code(OP_3DUP),
            code(OP_ROT),
            code(OP_CHECKDATASIGVERIFY),
            code(OP_DROP),
            data(vec![ALL_ANYONECANPAY_BIP143]),
            code(OP_CAT),
            code(OP_SWAP),
            code(OP_ELSE),
            // Cancel: the maker's signature
            code(OP_DROP),
            num((consts_len - PUBKEY_LEN) as u64),
            code(OP_SPLIT),
            code(OP_NIP),
            code(OP_ENDIF),
        ]);
        match self.token_protocol {
            TokenProtocol::Slp => ops.extend([
                code(OP_CHECKSIGVERIFY),
                data(PARTIAL_VARIANT.to_vec()),
                code(OP_EQUALVERIFY),
                data(AGORA_LOKAD_ID.to_vec()),
                code(OP_EQUAL),
            ]),
            TokenProtocol::Alp => ops.push(code(OP_CHECKSIG)),
        }
        Script::from_ops(&ops)
    }

    /// Ops building the token OP_RETURN of the accept tx, leaving it
    /// serialized as a 0-sats output
    fn op_return_ops(&self, intro_len: u64) -> Vec<Op> {
        let tsf = self.atoms_scale_factor;
        let ntok = self.num_atoms_trunc_bytes;
        match self.token_protocol {
            TokenProtocol::Slp => {
                let mut ops = vec![
                    // Remaining amount, only if there is a remainder
                    code(OP_IF),
                    code(OP_8),
                    code(OP_CAT),
                    code(OP_OVER),
                    num(tsf),
                    code(OP_DIV),
                ];
                ops.extend(self.ser_trunc_ops(SLP_AMOUNT_LEN));
                ops.extend([
                    code(OP_REVERSEBYTES),
                    data(vec![0; ntok as usize]),
                    code(OP_CAT),
                    code(OP_CAT),
                    code(OP_ENDIF),
                    // Accepted amount
                    code(OP_8),
                    code(OP_CAT),
                    num(2),
                    code(OP_PICK),
                    num(tsf),
                    code(OP_DIV),
                ]);
                ops.extend(self.ser_trunc_ops(SLP_AMOUNT_LEN));
                ops.extend([
                    code(OP_REVERSEBYTES),
                    data(vec![0; ntok as usize]),
                    code(OP_CAT),
                    code(OP_CAT),
                    code(OP_SIZE),
                    code(OP_9),
                    code(OP_NUM2BIN),
                    code(OP_REVERSEBYTES),
                    code(OP_SWAP),
                    code(OP_CAT),
                ]);
                ops
            },
            TokenProtocol::Alp => {
                let mut ops = vec![
                    // Three amounts with a remainder, two without
                    code(OP_IF),
                    code(OP_3),
                    num(7 + ntok as u64),
                    code(OP_NUM2BIN),
                    code(OP_CAT),
                    code(OP_OVER),
                    num(tsf),
                    code(OP_DIV),
                    num(ALP_AMOUNT_LEN as u64),
                    code(OP_ELSE),
                    code(OP_2),
                    num(7 + ntok as u64),
                    code(OP_ENDIF),
                    code(OP_NUM2BIN),
                    code(OP_CAT),
                    num(2),
                    code(OP_PICK),
                    num(tsf),
                    code(OP_DIV),
                ];
                ops.extend(self.ser_trunc_ops(ALP_AMOUNT_LEN));
                ops.extend([
                    code(OP_CAT),
                    code(OP_SIZE),
                    code(OP_SWAP),
                    code(OP_CAT),
                    // Append the ad pushdata, which follows the intro
                    num(3),
                    code(OP_PICK),
                    num(intro_len),
                    code(OP_SPLIT),
                    code(OP_NIP),
                    code(OP_SWAP),
                    code(OP_CAT),
                    code(OP_SIZE),
                    code(OP_9),
                    code(OP_NUM2BIN),
                    code(OP_REVERSEBYTES),
                    code(OP_SWAP),
                    code(OP_CAT),
                ]);
                ops
            },
        }
    }

    /// Ops serializing a truncated amount to `amount_len - ntok` bytes
    ///
    /// Script numbers carry a sign bit, so a 3-byte amount is serialized to 4
    /// bytes and cut down
    fn ser_trunc_ops(&self, amount_len: u8) -> Vec<Op> {
        let ntok = self.num_atoms_trunc_bytes;
        if ntok + 3 == amount_len {
            vec![num(4), code(OP_NUM2BIN), num(3), code(OP_SPLIT), code(OP_DROP)]
        } else {
            vec![num((amount_len - ntok) as u64), code(OP_NUM2BIN)]
        }
    }
}
