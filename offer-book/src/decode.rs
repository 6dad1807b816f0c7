//! Decoding offers from the agora plugin's entries

use constants::{ONESHOT_VARIANT, PARTIAL_VARIANT, PLUGIN_NAME};
use covenants::{
    AgoraOffer, AgoraOfferStatus, AgoraOfferVariant, AgoraOneshot, AgoraPartial, CovenantError,
    token::Token, tx::OutPoint,
};
use indexer::types::{PluginEntries, TxInputRecord, UtxoRecord};
use tracing::warn;

/// An output the agora plugin indexed
pub(crate) struct IndexedOutput<'a> {
    /// The output
    pub outpoint: OutPoint,
    /// Its value
    pub sats: u64,
    /// Its tokens
    pub token: Option<&'a Token>,
    /// Its plugin entries
    pub plugins: &'a PluginEntries,
}

impl<'a> From<&'a UtxoRecord> for IndexedOutput<'a> {
    fn from(utxo: &'a UtxoRecord) -> Self {
        Self {
            outpoint: utxo.outpoint,
            sats: utxo.sats,
            token: utxo.token.as_ref(),
            plugins: &utxo.plugins,
        }
    }
}

impl<'a> From<&'a TxInputRecord> for IndexedOutput<'a> {
    fn from(input: &'a TxInputRecord) -> Self {
        Self {
            outpoint: input.prev_out,
            sats: input.sats,
            token: input.token.as_ref(),
            plugins: &input.plugins,
        }
    }
}

/// Decode an indexed output into an offer with the given status
///
/// Outputs the plugin didn't index, flagged as errors, or holding offers this
/// version cannot handle yield `None`
pub(crate) fn decode_offer(
    output: IndexedOutput<'_>,
    status: AgoraOfferStatus,
    dust_sats: u64,
) -> Option<AgoraOffer> {
    let entry = output.plugins.get(PLUGIN_NAME)?;
    if entry.is_error() {
        return None;
    }
    let Some(token) = output.token else {
        warn!(outpoint = %output.outpoint, "agora offer holds no token");
        return None;
    };
    let Some(pubkey) = entry.pubkey() else {
        warn!(outpoint = %output.outpoint, "agora offer has no pubkey group");
        return None;
    };

    let variant = match entry.data.first().map(Vec::as_slice) {
        Some(ONESHOT_VARIANT) => AgoraOneshot::from_plugin_data(&entry.data, pubkey, token)
            .map(AgoraOfferVariant::Oneshot),
        Some(PARTIAL_VARIANT) => AgoraPartial::from_plugin_data(&entry.data, pubkey, token, dust_sats)
            .map(AgoraOfferVariant::Partial),
        _ => Err(CovenantError::unsupported("unknown covenant variant")),
    };

    match variant {
        Ok(variant) => {
            Some(AgoraOffer::new(variant, output.outpoint, output.sats, token.clone(), status))
        },
        Err(e) => {
            warn!(outpoint = %output.outpoint, "skipping agora offer: {e}");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use covenants::{
        AgoraPartialParams,
        ecc::{Ecc, K256Ecc},
        token::{TokenId, TokenType},
        tx::TxId,
    };
    use indexer::types::{PluginEntry, pubkey_group, token_id_group};

    use super::*;

    /// A partial offer of 1000 atoms and its plugin entries
    fn partial_entries() -> (AgoraPartial, Token, PluginEntries) {
        let maker_pk = K256Ecc.derive_pubkey(&[1; 32]).unwrap();
        let params = AgoraPartialParams {
            offered_atoms: 1000,
            price_nanosats_per_atom: 1_000_000_000_000,
            min_accepted_atoms: 1,
            token_id: TokenId([7; 32]),
            maker_pk,
            enforced_lock_time: 500_000_123,
            ..Default::default()
        };
        let partial = AgoraPartial::approximate(&params, 32).unwrap();
        let token = Token::new(params.token_id, TokenType::SLP_FUNGIBLE, partial.offered_atoms());
        let entry = PluginEntry {
            groups: vec![pubkey_group(&maker_pk), token_id_group(&params.token_id)],
            data: partial.plugin_data(),
        };
        (partial, token, PluginEntries::from([(PLUGIN_NAME.to_string(), entry)]))
    }

    /// An indexed output holding the given token and entries
    fn output<'a>(token: Option<&'a Token>, plugins: &'a PluginEntries) -> IndexedOutput<'a> {
        IndexedOutput { outpoint: OutPoint { txid: TxId([3; 32]), out_idx: 1 }, sats: 546, token, plugins }
    }

    #[test]
    fn test_decode_partial() {
        let (partial, token, plugins) = partial_entries();
        let offer = decode_offer(output(Some(&token), &plugins), AgoraOfferStatus::Open, 546).unwrap();
        assert_eq!(offer.variant, AgoraOfferVariant::Partial(partial.clone()));
        assert_eq!(offer.status, AgoraOfferStatus::Open);
        assert_eq!(offer.token, token);
        assert_eq!(offer.tx_builder_input.prev_out, OutPoint { txid: TxId([3; 32]), out_idx: 1 });
    }

    #[test]
    fn test_skip_undecodable() {
        let (_, token, plugins) = partial_entries();
        assert!(decode_offer(output(None, &plugins), AgoraOfferStatus::Open, 546).is_none());
        let none = PluginEntries::new();
        assert!(decode_offer(output(Some(&token), &none), AgoraOfferStatus::Open, 546).is_none());

        // Entries of an older plugin lack the lock time
        let mut outdated = plugins.clone();
        if let Some(entry) = outdated.get_mut(PLUGIN_NAME) {
            entry.data.truncate(6);
        }
        assert!(decode_offer(output(Some(&token), &outdated), AgoraOfferStatus::Open, 546).is_none());

        let mut no_pubkey = plugins;
        if let Some(entry) = no_pubkey.get_mut(PLUGIN_NAME) {
            entry.groups.retain(|group| group[0] != b'P');
        }
        assert!(decode_offer(output(Some(&token), &no_pubkey), AgoraOfferStatus::Open, 546).is_none());

        let error = PluginEntries::from([(
            PLUGIN_NAME.to_string(),
            PluginEntry { groups: vec![], data: vec![b"ERROR".to_vec(), vec![0xa9]] },
        )]);
        assert!(decode_offer(output(Some(&token), &error), AgoraOfferStatus::Open, 546).is_none());
    }

    #[test]
    fn test_skip_unbuildable_terms() {
        let (partial, token, plugins) = partial_entries();
        let cases = [
            AgoraPartial { scaled_trunc_atoms_per_trunc_sat: 0, ..partial.clone() },
            AgoraPartial { atoms_scale_factor: 0, ..partial.clone() },
            AgoraPartial { num_sats_trunc_bytes: 8, ..partial },
        ];
        for terms in cases {
            let mut entries = plugins.clone();
            if let Some(entry) = entries.get_mut(PLUGIN_NAME) {
                entry.data = terms.plugin_data();
            }
            assert!(decode_offer(output(Some(&token), &entries), AgoraOfferStatus::Open, 546).is_none());
        }
    }
}
