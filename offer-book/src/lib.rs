//! Discovers agora offers through an indexer running the agora plugin
//!
//! The book is read-only: it decodes the outputs and txs the indexer reports
//! into `AgoraOffer`s. Accepting, canceling and listing offers happens through
//! the tx builders of the `covenants` crate, broadcast by the caller.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::needless_pass_by_ref_mut)]

mod decode;
pub mod errors;
pub mod history;
pub mod lock_time;

use std::sync::Arc;

use config::AgoraConfig;
use constants::{
    FUNGIBLE_TOKEN_ID_PREFIX, GROUP_TOKEN_ID_PREFIX, PLUGIN_GROUPS_MAX_PAGE_SIZE, PLUGIN_NAME,
    TOKEN_ID_PREFIX,
};
use covenants::{AgoraOffer, AgoraOfferStatus, ecc::Pubkey, token::TokenId};
use indexer::{
    AgoraIndexer,
    types::{group_token_id_group, pubkey_group, token_id_group},
};
use tracing::{instrument, warn};

pub use errors::OfferBookError;
pub use history::{HistoricOffers, HistoryParams, OfferKey};
pub use lock_time::SelectParams;

use crate::decode::{IndexedOutput, decode_offer};

/// How new partial offers are approximated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Tuning {
    /// Width of Script integers, including the sign bit
    script_integer_bits: u32,
    /// Minimum scale factor of truncated atoms
    min_atom_scale_factor: u64,
    /// Truncate sats further while the scaled price is below this
    min_price_integer: u64,
    /// Required ratio of scale factor to scaled price for further truncation
    min_scale_ratio: u64,
}

/// The offers indexed by an `AgoraIndexer`
#[derive(Debug)]
pub struct OfferBook<I> {
    /// The indexer queried for offers
    indexer: Arc<I>,
    /// Value of the token outputs covenants enforce
    dust_sats: u64,
    /// Txs per page of historic offers, unless a query asks otherwise
    history_page_size: usize,
    /// Approximation parameters for `select_params`
    tuning: Tuning,
}

impl<I> Clone for OfferBook<I> {
    fn clone(&self) -> Self {
        Self {
            indexer: self.indexer.clone(),
            dust_sats: self.dust_sats,
            history_page_size: self.history_page_size,
            tuning: self.tuning,
        }
    }
}

impl<I: AgoraIndexer> OfferBook<I> {
    /// A book over `indexer`, configured by `config`
    pub fn new(indexer: Arc<I>, config: &AgoraConfig) -> Self {
        Self {
            indexer,
            dust_sats: config.dust_sats,
            history_page_size: config.history_page_size,
            tuning: Tuning {
                script_integer_bits: config.script_integer_bits,
                min_atom_scale_factor: config.min_atom_scale_factor,
                min_price_integer: config.min_price_integer,
                min_scale_ratio: config.min_scale_ratio,
            },
        }
    }

    /// The indexer behind the book
    pub fn indexer(&self) -> &Arc<I> {
        &self.indexer
    }

    // -------------
    // | Token Ids |
    // -------------

    /// Every token with an open offer, fungible or not
    #[instrument(skip_all, err)]
    pub async fn all_offered_token_ids(&self) -> Result<Vec<TokenId>, OfferBookError> {
        self.offered_token_ids(TOKEN_ID_PREFIX).await
    }

    /// The fungible tokens with an open offer
    #[instrument(skip_all, err)]
    pub async fn offered_fungible_token_ids(&self) -> Result<Vec<TokenId>, OfferBookError> {
        self.offered_token_ids(FUNGIBLE_TOKEN_ID_PREFIX).await
    }

    /// The NFT groups with an open offer for one of their NFTs
    #[instrument(skip_all, err)]
    pub async fn offered_group_token_ids(&self) -> Result<Vec<TokenId>, OfferBookError> {
        self.offered_token_ids(GROUP_TOKEN_ID_PREFIX).await
    }

    /// The token ids of all groups with the given prefix, across all pages
    async fn offered_token_ids(&self, prefix: &[u8]) -> Result<Vec<TokenId>, OfferBookError> {
        let mut token_ids = Vec::new();
        let mut start: Option<Vec<u8>> = None;
        loop {
            let page = self
                .indexer
                .plugin_groups(PLUGIN_NAME, prefix, start.as_deref(), PLUGIN_GROUPS_MAX_PAGE_SIZE)
                .await?;
            token_ids.extend(page.groups.iter().filter_map(|group| group_token_id(group, prefix)));
            match page.next_start {
                Some(next_start) => start = Some(next_start),
                None => return Ok(token_ids),
            }
        }
    }

    // -----------------
    // | Active Offers |
    // -----------------

    /// The open offers of a token
    #[instrument(skip_all, err, fields(token_id = %token_id))]
    pub async fn active_offers_by_token_id(
        &self,
        token_id: &TokenId,
    ) -> Result<Vec<AgoraOffer>, OfferBookError> {
        self.active_offers(&token_id_group(token_id)).await
    }

    /// The open offers of the NFTs in a group
    #[instrument(skip_all, err, fields(group_token_id = %group_token_id))]
    pub async fn active_offers_by_group_token_id(
        &self,
        group_token_id: &TokenId,
    ) -> Result<Vec<AgoraOffer>, OfferBookError> {
        self.active_offers(&group_token_id_group(group_token_id)).await
    }

    /// The open offers made by the owner of `pubkey`
    #[instrument(skip_all, err)]
    pub async fn active_offers_by_pubkey(
        &self,
        pubkey: &Pubkey,
    ) -> Result<Vec<AgoraOffer>, OfferBookError> {
        self.active_offers(&pubkey_group(pubkey)).await
    }

    /// The open offers indexed under a plugin group
    async fn active_offers(&self, group: &[u8]) -> Result<Vec<AgoraOffer>, OfferBookError> {
        let utxos = self.indexer.plugin_utxos(PLUGIN_NAME, group).await?;
        Ok(utxos
            .iter()
            .filter_map(|utxo| {
                decode_offer(IndexedOutput::from(utxo), AgoraOfferStatus::Open, self.dust_sats)
            })
            .collect())
    }
}

/// The token id of a plugin group
fn group_token_id(group: &[u8], prefix: &[u8]) -> Option<TokenId> {
    let parsed = group
        .strip_prefix(prefix)
        .and_then(|token_id| <[u8; 32]>::try_from(token_id).ok())
        .map(TokenId);
    if parsed.is_none() {
        warn!("skipping malformed plugin group {}", util::hex::bytes_to_hex_string(group));
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_token_id() {
        let group = token_id_group(&TokenId([4; 32]));
        assert_eq!(group_token_id(&group, TOKEN_ID_PREFIX), Some(TokenId([4; 32])));
        assert_eq!(group_token_id(&group, FUNGIBLE_TOKEN_ID_PREFIX), None);
        assert_eq!(group_token_id(&group[..20], TOKEN_ID_PREFIX), None);
    }
}
