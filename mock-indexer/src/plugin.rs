//! The agora indexer plugin
//!
//! Recognizes outputs locking tokens in an agora covenant and indexes them
//! under the maker's pubkey, the token id and either the fungible token id or
//! the NFT group. An output that carries an agora ad but doesn't match the
//! covenant the ad describes is recorded with an `ERROR` entry and no groups.

use std::collections::BTreeMap;

use constants::{AGORA_LOKAD_ID, ONESHOT_VARIANT, PARTIAL_VARIANT, PLUGIN_ERROR_TAG};
use covenants::{
    CovenantError,
    ecc::Pubkey,
    oneshot::AgoraOneshot,
    partial::AgoraPartial,
    script::Script,
    token::{Token, TokenId, parse_empp},
    tx::Tx,
};
use indexer::types::{
    PluginEntry, fungible_token_id_group, group_token_id_group, pubkey_group, token_id_group,
};
use tracing::warn;

/// Output index of a oneshot offer
const ONESHOT_OUTPUT_IDX: usize = 1;
/// Minimum pushes of an agora input: LOKAD id, variant and redeem script
const MIN_AD_INPUT_PUSHES: usize = 3;

/// Plugin entries of a tx by output index
pub(crate) type OutputEntries = BTreeMap<usize, PluginEntry>;

/// Run the plugin over a tx whose outputs received `output_tokens`
///
/// `group_of` resolves the NFT group of a token, if any
pub(crate) fn run_agora_plugin(
    tx: &Tx,
    output_tokens: &[Option<Token>],
    group_of: impl Fn(&TokenId) -> Option<TokenId>,
    dust_sats: u64,
) -> OutputEntries {
    let plugin = AgoraPlugin { tx, output_tokens, group_of: &group_of, dust_sats };
    plugin.run_ad_input().or_else(|| plugin.run_ad_empp()).unwrap_or_default()
}

/// The tx being indexed
struct AgoraPlugin<'a> {
    /// The tx
    tx: &'a Tx,
    /// The tokens of each output
    output_tokens: &'a [Option<Token>],
    /// Resolves NFT groups
    group_of: &'a dyn Fn(&TokenId) -> Option<TokenId>,
    /// Value of token outputs
    dust_sats: u64,
}

/// An offer found in a tx
struct FoundOffer {
    /// Index of the offer output
    out_idx: usize,
    /// The offer's covenant script
    script: Script,
    /// The maker's pubkey
    pubkey: Pubkey,
    /// Data stored for the offer
    data: Vec<Vec<u8>>,
    /// The offered token
    token: Token,
}

impl AgoraPlugin<'_> {
    /// Find an offer advertised by the first input's scriptSig, which spends
    /// an SLP ad or a covenant
    fn run_ad_input(&self) -> Option<OutputEntries> {
        let input = self.tx.inputs.first()?;
        if self.tx.outputs.len() < 2 || self.output_tokens.iter().all(Option::is_none) {
            return None;
        }
        let ops = input.script.parse_ops().ok()?;
        let pushes = ops.iter().map(|op| op.push_data()).collect::<Option<Vec<_>>>()?;
        if pushes.len() < MIN_AD_INPUT_PUSHES || pushes[0] != AGORA_LOKAD_ID {
            return None;
        }
        let variant = pushes[1];
        let redeem_script = Script::new(pushes[pushes.len() - 1].to_vec());

        let found = if variant == ONESHOT_VARIANT {
            let token = self.token_at(ONESHOT_OUTPUT_IDX)?;
            AgoraOneshot::from_redeem_script(&redeem_script, token).map(|oneshot| FoundOffer {
                out_idx: ONESHOT_OUTPUT_IDX,
                script: oneshot.script(),
                pubkey: oneshot.cancel_pk,
                data: oneshot.plugin_data(),
                token: token.clone(),
            })
        } else if variant == PARTIAL_VARIANT {
            let out_idx = self.partial_output_idx()?;
            let token = self.token_at(out_idx)?;
            AgoraPartial::from_redeem_script(&redeem_script, token, self.dust_sats)
                .map(|partial| FoundOffer::partial(out_idx, partial, token))
        } else {
            return None;
        };
        Some(self.index(found))
    }

    /// Find an ALP partial offer advertised in the eMPP OP_RETURN
    fn run_ad_empp(&self) -> Option<OutputEntries> {
        let pushdata = parse_empp(&self.tx.outputs.first()?.script)?;
        let ad_pushdata = pushdata.first().filter(|data| data.starts_with(AGORA_LOKAD_ID))?;
        let out_idx = self.partial_output_idx()?;
        let token = self.token_at(out_idx)?;
        let found = AgoraPartial::parse_ad_pushdata(ad_pushdata, token, self.dust_sats)
            .map(|partial| FoundOffer::partial(out_idx, partial, token));
        Some(self.index(found))
    }

    /// The output a partial offer is at: output 1, or output 2 when output 1
    /// pays the maker of an accepted offer
    fn partial_output_idx(&self) -> Option<usize> {
        if self.tx.outputs.len() >= 3 && self.token_at(1).is_none() {
            Some(2)
        } else if self.tx.outputs.len() >= 2 {
            Some(1)
        } else {
            None
        }
    }

    /// The token of an output
    fn token_at(&self, out_idx: usize) -> Option<&Token> {
        self.output_tokens.get(out_idx)?.as_ref()
    }

    /// Index a found offer, checking its output locks the expected covenant
    fn index(&self, found: Result<FoundOffer, CovenantError>) -> OutputEntries {
        let found = match found {
            Ok(found) => found,
            Err(e) => {
                warn!("agora ad in tx {} unparsable: {e}", self.tx.txid());
                return OutputEntries::new();
            },
        };

        let output_script = &self.tx.outputs[found.out_idx].script;
        let entry = if *output_script != found.script.to_p2sh() {
            PluginEntry {
                groups: vec![],
                data: vec![PLUGIN_ERROR_TAG.to_vec(), output_script.bytecode().to_vec()],
            }
        } else {
            let token_id = found.token.token_id;
            let type_group = match (self.group_of)(&token_id) {
                Some(group_token_id) => group_token_id_group(&group_token_id),
                None => fungible_token_id_group(&token_id),
            };
            PluginEntry {
                groups: vec![pubkey_group(&found.pubkey), token_id_group(&token_id), type_group],
                data: found.data,
            }
        };
        OutputEntries::from([(found.out_idx, entry)])
    }
}

impl FoundOffer {
    /// A found partial offer
    fn partial(out_idx: usize, partial: AgoraPartial, token: &Token) -> Self {
        Self {
            out_idx,
            script: partial.script(),
            pubkey: partial.maker_pk,
            data: partial.plugin_data(),
            token: token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use covenants::{token::TokenType, tx::TxOutput};

    use super::*;

    #[test]
    fn test_ignores_plain_txs() {
        let tx = Tx::default();
        assert!(run_agora_plugin(&tx, &[], |_| None, 546).is_empty());

        let token = Token::new(TokenId([1; 32]), TokenType::SLP_FUNGIBLE, 10);
        let tx = Tx {
            outputs: vec![
                TxOutput::new(0, Script::new(vec![0x6a])),
                TxOutput::new(546, Script::p2pkh(&[3; 20])),
            ],
            ..Default::default()
        };
        assert!(run_agora_plugin(&tx, &[None, Some(token)], |_| None, 546).is_empty());
    }
}
