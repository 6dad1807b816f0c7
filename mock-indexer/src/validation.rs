//! Native checks standing in for script execution
//!
//! Only the output scripts built by the covenant crate are spendable: P2PKH,
//! the agora covenants and their SLP ads. Each covenant spend is checked for
//! the conditions its Script enforces.

use constants::{
    AGORA_LOKAD_ID, ALL_ANYONECANPAY_BIP143, ONESHOT_VARIANT, PARTIAL_VARIANT, TX_VERSION,
};
use covenants::{
    ecc::{SCHNORR_SIG_LEN, verify_ecdsa, verify_schnorr},
    hash::{hash160, sha256d},
    oneshot::AgoraOneshot,
    partial::AgoraPartial,
    script::{OP_0, OP_1, OP_1NEGATE, OP_16, Op, Script, decode_script_num},
    token::{
        Token, TokenProtocol, alp_send, empp_script, parse_alp_send, parse_empp, parse_slp_send,
        slp_send,
    },
    tx::{SignData, Tx, TxOutput, ser_tx_outputs},
};
use indexer::IndexerError;

/// The preimage prefix the covenants rebuild: version 2 and the two hashes
/// zeroed by ANYONECANPAY
const PREIMAGE_PREFIX_LEN: usize = 68;

/// An output being spent
#[derive(Clone, Debug)]
pub(crate) struct SpentOutput {
    /// Its value
    pub sats: u64,
    /// Its script
    pub script: Script,
    /// Its tokens
    pub token: Option<Token>,
}

/// Attach sign data to the inputs of a deserialized tx
///
/// P2SH inputs commit to the redeem script pushed last by their scriptSig
pub(crate) fn attach_sign_data(tx: &mut Tx, spent: &[SpentOutput]) -> Result<(), IndexerError> {
    for (idx, (input, spent)) in tx.inputs.iter_mut().zip(spent).enumerate() {
        let sign_data = if spent.script.p2sh_hash().is_some() {
            let ops = parse_input_ops(&input.script, idx)?;
            let redeem = ops.last().and_then(Op::push_data).ok_or_else(|| {
                IndexerError::rejected(format!("input {idx} pushes no redeem script"))
            })?;
            SignData::redeem_script(spent.sats, Script::new(redeem.to_vec()))
        } else {
            SignData::output_script(spent.sats, spent.script.clone())
        };
        input.sign_data = Some(sign_data);
    }
    Ok(())
}

/// Check every input of `tx` unlocks the output it spends
pub(crate) fn validate_scripts(
    tx: &Tx,
    spent: &[SpentOutput],
    dust_sats: u64,
) -> Result<(), IndexerError> {
    for (idx, spent) in spent.iter().enumerate() {
        validate_input(tx, idx, spent, dust_sats)?;
    }
    Ok(())
}

/// Check one input against the output it spends
fn validate_input(
    tx: &Tx,
    idx: usize,
    spent: &SpentOutput,
    dust_sats: u64,
) -> Result<(), IndexerError> {
    let ops = parse_input_ops(&tx.inputs[idx].script, idx)?;
    if !ops.iter().all(Op::is_push_only) {
        return Err(IndexerError::rejected(format!("input {idx} scriptSig is not push only")));
    }

    if let Some(pkh) = spent.script.p2pkh_hash() {
        let [sig, pk] = ops.as_slice() else {
            return Err(IndexerError::rejected(format!("input {idx} is not a P2PKH spend")));
        };
        let pk = push_data(pk, idx)?;
        if hash160(pk) != pkh {
            return Err(IndexerError::rejected(format!("input {idx} pubkey doesn't match")));
        }
        return check_sig(tx, idx, pk, push_data(sig, idx)?, None);
    }

    let Some(sh) = spent.script.p2sh_hash() else {
        return Err(IndexerError::rejected(format!(
            "input {idx} spends unsupported script {}",
            spent.script
        )));
    };
    let Some((redeem, args)) = ops.split_last() else {
        return Err(IndexerError::rejected(format!("input {idx} has an empty scriptSig")));
    };
    let redeem = Script::new(push_data(redeem, idx)?.to_vec());
    if hash160(redeem.bytecode()) != sh {
        return Err(IndexerError::rejected(format!("input {idx} redeem script doesn't match")));
    }

    if let Ok(partial) = AgoraPartial::from_covenant_script(&redeem, dust_sats) {
        return validate_partial(tx, idx, &partial, args);
    }
    if let Ok(oneshot) = AgoraOneshot::from_covenant_script(&redeem) {
        return validate_oneshot(tx, idx, &oneshot, args);
    }
    if let Some(token) = &spent.token {
        if let Ok(partial) = AgoraPartial::from_ad_script(&redeem, token, dust_sats) {
            return validate_ad(tx, idx, &partial.maker_pk, PARTIAL_VARIANT, args);
        }
        if let Ok(oneshot) = AgoraOneshot::from_redeem_script(&redeem, token) {
            return validate_ad(tx, idx, &oneshot.cancel_pk, ONESHOT_VARIANT, args);
        }
    }
    Err(IndexerError::rejected(format!("input {idx} spends an unknown redeem script")))
}

// -------------
// | Covenants |
// -------------

/// Check the spend of a partial covenant
fn validate_partial(
    tx: &Tx,
    idx: usize,
    partial: &AgoraPartial,
    args: &[Op],
) -> Result<(), IndexerError> {
    let args = match partial.token_protocol {
        TokenProtocol::Slp => strip_variant_pushes(args, PARTIAL_VARIANT, idx)?,
        TokenProtocol::Alp => args,
    };
    match args {
        [sig, is_accept] if is_op_0(is_accept) => {
            check_sig(tx, idx, &partial.maker_pk, push_data(sig, idx)?, Some(0))
        },
        [covenant_pk, covenant_sig, buyer_outputs, preimage_tail, accepted_scaled, is_accept]
            if is_accept == &Op::Code(OP_1) =>
        {
            let accepted_scaled = op_number(accepted_scaled, idx)?;
            let accepted_scaled = u64::try_from(accepted_scaled)
                .map_err(|_| IndexerError::rejected("negative accepted amount"))?;
            let offered_scaled = partial.trunc_atoms * partial.atoms_scale_factor;
            if accepted_scaled > offered_scaled
                || accepted_scaled < partial.min_accepted_scaled_trunc_atoms
                || accepted_scaled % partial.atoms_scale_factor != 0
            {
                return Err(IndexerError::rejected(format!(
                    "input {idx} accepts an invalid scaled amount {accepted_scaled}"
                )));
            }
            if tx.locktime != partial.enforced_lock_time {
                return Err(IndexerError::rejected(format!(
                    "input {idx} requires lock time {}, tx has {}",
                    partial.enforced_lock_time, tx.locktime
                )));
            }

            let enforced = partial_enforced_outputs(partial, accepted_scaled)
                .map_err(|e| IndexerError::rejected(e.to_string()))?;
            check_outputs(tx, idx, &enforced, push_data(buyer_outputs, idx)?)?;
            check_covenant_sig(
                tx,
                idx,
                push_data(covenant_pk, idx)?,
                push_data(covenant_sig, idx)?,
                push_data(preimage_tail, idx)?,
            )
        },
        _ => Err(IndexerError::rejected(format!("input {idx} is a malformed partial spend"))),
    }
}

/// The outputs a partial covenant requires before the taker's outputs
fn partial_enforced_outputs(
    partial: &AgoraPartial,
    accepted_scaled: u64,
) -> Result<Vec<TxOutput>, covenants::CovenantError> {
    let bits = partial.num_atoms_trunc_bits();
    let accepted_trunc = accepted_scaled / partial.atoms_scale_factor;
    let leftover_trunc = partial.trunc_atoms - accepted_trunc;

    let mut amounts = vec![0];
    if leftover_trunc > 0 {
        amounts.push(leftover_trunc << bits);
    }
    amounts.push(accepted_trunc << bits);
    let op_return = match partial.token_protocol {
        TokenProtocol::Slp => slp_send(&partial.token_id, partial.token_type, &amounts),
        TokenProtocol::Alp => empp_script(&[
            partial.ad_pushdata(),
            alp_send(&partial.token_id, partial.token_type, &amounts)?,
        ]),
    };

    let mut outputs = vec![
        TxOutput::new(0, op_return),
        TxOutput::new(
            partial.asked_sats(accepted_trunc << bits)?,
            Script::p2pkh(&hash160(&partial.maker_pk)),
        ),
    ];
    if leftover_trunc > 0 {
        let remainder = partial.with_trunc_atoms(leftover_trunc);
        outputs.push(TxOutput::new(partial.dust_sats, remainder.script().to_p2sh()));
    }
    Ok(outputs)
}

/// Check the spend of a oneshot covenant
fn validate_oneshot(
    tx: &Tx,
    idx: usize,
    oneshot: &AgoraOneshot,
    args: &[Op],
) -> Result<(), IndexerError> {
    match args {
        [sig, is_accept] if is_op_0(is_accept) => {
            check_sig(tx, idx, &oneshot.cancel_pk, push_data(sig, idx)?, Some(0))
        },
        [covenant_pk, covenant_sig, preimage_tail, buyer_outputs, is_accept]
            if is_accept == &Op::Code(OP_1) =>
        {
            check_outputs(tx, idx, &oneshot.enforced_outputs, push_data(buyer_outputs, idx)?)?;
            check_covenant_sig(
                tx,
                idx,
                push_data(covenant_pk, idx)?,
                push_data(covenant_sig, idx)?,
                push_data(preimage_tail, idx)?,
            )
        },
        _ => Err(IndexerError::rejected(format!("input {idx} is a malformed oneshot spend"))),
    }
}

/// Check the spend of an SLP ad into its covenant
fn validate_ad(
    tx: &Tx,
    idx: usize,
    maker_pk: &[u8],
    variant: &[u8],
    args: &[Op],
) -> Result<(), IndexerError> {
    let [sig] = strip_variant_pushes(args, variant, idx)? else {
        return Err(IndexerError::rejected(format!("input {idx} is a malformed ad spend")));
    };
    check_sig(tx, idx, maker_pk, push_data(sig, idx)?, None)
}

/// Check the tx outputs are the enforced outputs followed by `buyer_outputs`
fn check_outputs(
    tx: &Tx,
    idx: usize,
    enforced: &[TxOutput],
    buyer_outputs: &[u8],
) -> Result<(), IndexerError> {
    let mut expected = ser_tx_outputs(enforced);
    expected.extend_from_slice(buyer_outputs);
    if ser_tx_outputs(&tx.outputs) != expected {
        return Err(IndexerError::rejected(format!(
            "input {idx} covenant outputs don't match the tx outputs"
        )));
    }
    Ok(())
}

/// Check the covenant signature commits to the tx's ANYONECANPAY preimage,
/// whose tail the taker pushed
fn check_covenant_sig(
    tx: &Tx,
    idx: usize,
    covenant_pk: &[u8],
    covenant_sig: &[u8],
    preimage_tail: &[u8],
) -> Result<(), IndexerError> {
    if tx.version != TX_VERSION {
        return Err(IndexerError::rejected("covenants require tx version 2"));
    }
    let preimage = tx
        .sighash_preimage(idx, ALL_ANYONECANPAY_BIP143, Some(0))
        .map_err(|e| IndexerError::rejected(e.to_string()))?;
    if preimage[PREIMAGE_PREFIX_LEN..] != *preimage_tail {
        return Err(IndexerError::rejected(format!("input {idx} pushed a wrong preimage")));
    }
    if covenant_sig.len() != SCHNORR_SIG_LEN
        || !verify_schnorr(covenant_pk, &sha256d(&preimage), covenant_sig)
    {
        return Err(IndexerError::rejected(format!("input {idx} covenant signature invalid")));
    }
    Ok(())
}

// -----------
// | Helpers |
// -----------

/// Verify a signature with its sighash byte appended
fn check_sig(
    tx: &Tx,
    idx: usize,
    pk: &[u8],
    sig: &[u8],
    codesep_idx: Option<usize>,
) -> Result<(), IndexerError> {
    let Some((&sighash, sig)) = sig.split_last() else {
        return Err(IndexerError::rejected(format!("input {idx} has an empty signature")));
    };
    let preimage = tx
        .sighash_preimage(idx, sighash, codesep_idx)
        .map_err(|e| IndexerError::rejected(e.to_string()))?;
    let msg = sha256d(&preimage);
    let valid = if sig.len() == SCHNORR_SIG_LEN {
        verify_schnorr(pk, &msg, sig)
    } else {
        verify_ecdsa(pk, &msg, sig)
    };
    if !valid {
        return Err(IndexerError::rejected(format!("input {idx} signature invalid")));
    }
    Ok(())
}

/// Strip the `AGR0 <variant>` pushes SLP agora scripts check last
fn strip_variant_pushes<'a>(
    args: &'a [Op],
    variant: &[u8],
    idx: usize,
) -> Result<&'a [Op], IndexerError> {
    match args {
        [lokad_id, pushed_variant, rest @ ..]
            if lokad_id.push_data() == Some(AGORA_LOKAD_ID)
                && pushed_variant.push_data() == Some(variant) =>
        {
            Ok(rest)
        },
        _ => Err(IndexerError::rejected(format!("input {idx} is missing the agora variant"))),
    }
}

/// Parse the ops of a scriptSig
fn parse_input_ops(script: &Script, idx: usize) -> Result<Vec<Op>, IndexerError> {
    script
        .parse_ops()
        .map_err(|e| IndexerError::rejected(format!("input {idx} scriptSig unparsable: {e}")))
}

/// The data of a push op
fn push_data(op: &Op, idx: usize) -> Result<&[u8], IndexerError> {
    op.push_data().ok_or_else(|| IndexerError::rejected(format!("input {idx} expected a push")))
}

/// Whether the op pushes an empty byte string
fn is_op_0(op: &Op) -> bool {
    *op == Op::Push(OP_0, vec![])
}

/// The number pushed by an op
fn op_number(op: &Op, idx: usize) -> Result<i64, IndexerError> {
    match op {
        Op::Push(_, data) => {
            decode_script_num(data).map_err(|e| IndexerError::rejected(e.to_string()))
        },
        Op::Code(OP_1NEGATE) => Ok(-1),
        Op::Code(opcode @ OP_1..=OP_16) => Ok(i64::from(opcode - OP_1 + 1)),
        Op::Code(_) => Err(IndexerError::rejected(format!("input {idx} expected a number"))),
    }
}

// ----------
// | Tokens |
// ----------

/// The tokens each output of `tx` receives
///
/// Tokens not sent are burned; sending more than the inputs hold, or mixing
/// token types, rejects the tx
pub(crate) fn output_tokens(
    tx: &Tx,
    spent: &[SpentOutput],
) -> Result<Vec<Option<Token>>, IndexerError> {
    let mut tokens = vec![None; tx.outputs.len()];
    let Some(op_return) = tx.outputs.first() else {
        return Ok(tokens);
    };

    let send = match parse_slp_send(&op_return.script) {
        Ok(Some(send)) => Some(send),
        Ok(None) => parse_empp(&op_return.script)
            .map(|pushdata| {
                pushdata.iter().find_map(|data| parse_alp_send(data).transpose())
            })
            .unwrap_or_default()
            .transpose()
            .map_err(|e| IndexerError::rejected(format!("invalid ALP section: {e}")))?,
        Err(e) => return Err(IndexerError::rejected(format!("invalid SLP OP_RETURN: {e}"))),
    };
    let Some(send) = send else {
        return Ok(tokens);
    };

    let mut available: u128 = 0;
    for token in spent.iter().filter_map(|spent| spent.token.as_ref()) {
        if token.token_id == send.token_id {
            if token.token_type != send.token_type {
                return Err(IndexerError::rejected("token type mismatch"));
            }
            available += u128::from(token.atoms);
        }
    }
    let sent: u128 = send.amounts.iter().map(|amount| u128::from(*amount)).sum();
    if sent > available {
        return Err(IndexerError::rejected(format!(
            "tx sends {sent} atoms of {} but inputs hold {available}",
            send.token_id
        )));
    }

    for (out_idx, amount) in send.amounts.iter().enumerate() {
        let Some(slot) = tokens.get_mut(out_idx + 1) else {
            return Err(IndexerError::rejected("token amounts exceed the outputs"));
        };
        if *amount > 0 {
            *slot = Some(Token::new(send.token_id, send.token_type, *amount));
        }
    }
    Ok(tokens)
}
