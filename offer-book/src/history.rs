//! Offers that were taken or canceled, reconstructed from the txs spending
//! them

use constants::PLUGIN_NAME;
use covenants::{
    AgoraOffer, AgoraOfferStatus, TakenInfo,
    ecc::Pubkey,
    script::{OP_0, Op},
    token::TokenId,
};
use indexer::{
    AgoraIndexer,
    types::{
        HistoryTable, TxInputRecord, TxOutputRecord, TxRecord, group_token_id_group, pubkey_group,
        token_id_group,
    },
};
use tracing::instrument;

use crate::{
    OfferBook,
    decode::{IndexedOutput, decode_offer},
    errors::OfferBookError,
};

/// Output of an accept tx paying the maker
const MAKER_OUTPUT_IDX: usize = 1;
/// Output receiving the taker's tokens when the tx leaves no remainder
const TAKER_OUTPUT_IDX: usize = 2;
/// Output receiving the taker's tokens after a remainder offer
const TAKER_OUTPUT_IDX_AFTER_REMAINDER: usize = 3;

/// The plugin group a history query covers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OfferKey {
    /// Offers of one token
    TokenId(TokenId),
    /// Offers of the NFTs in a group
    GroupTokenId(TokenId),
    /// Offers by one maker
    Pubkey(Pubkey),
}

impl OfferKey {
    /// The plugin group of the key
    pub fn group(&self) -> Vec<u8> {
        match self {
            Self::TokenId(token_id) => token_id_group(token_id),
            Self::GroupTokenId(group_token_id) => group_token_id_group(group_token_id),
            Self::Pubkey(pk) => pubkey_group(pk),
        }
    }
}

/// A query of historic offers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryParams {
    /// Which offers to look up
    pub key: OfferKey,
    /// Which txs to scan
    pub table: HistoryTable,
    /// The page of txs, starting at 0
    pub page: usize,
    /// Txs per page, the book's configured size if `None`
    pub page_size: Option<usize>,
}

impl HistoryParams {
    /// The first page of all txs touching `key`
    pub fn new(key: OfferKey) -> Self {
        Self { key, table: HistoryTable::History, page: 0, page_size: None }
    }
}

/// A page of taken and canceled offers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoricOffers {
    /// The offers spent by the txs of the page
    pub offers: Vec<AgoraOffer>,
    /// The number of txs across all pages
    pub num_txs: usize,
    /// The number of pages
    pub num_pages: usize,
}

impl<I: AgoraIndexer> OfferBook<I> {
    /// The offers under `params.key` that txs of the requested page took or
    /// canceled
    #[instrument(skip_all, err, fields(key = ?params.key, page = params.page))]
    pub async fn historic_offers(
        &self,
        params: HistoryParams,
    ) -> Result<HistoricOffers, OfferBookError> {
        let page_size = params.page_size.unwrap_or(self.history_page_size);
        let history = self
            .indexer
            .plugin_history(PLUGIN_NAME, &params.key.group(), params.table, params.page, page_size)
            .await?;

        let offers = history.txs.iter().flat_map(|tx| self.spent_offers(tx)).collect();
        Ok(HistoricOffers { offers, num_txs: history.num_txs, num_pages: history.num_pages })
    }

    /// The offers a tx spends, with what happened to them
    fn spent_offers<'a>(&'a self, tx: &'a TxRecord) -> impl Iterator<Item = AgoraOffer> + 'a {
        tx.inputs
            .iter()
            .filter(|input| input.plugins.contains_key(PLUGIN_NAME))
            .filter_map(|input| {
                let status = spend_status(tx, input);
                decode_offer(IndexedOutput::from(input), status, self.dust_sats)
            })
    }
}

/// Whether an input spending an offer canceled or accepted it
///
/// Cancels end their scriptSig with `OP_0` before the redeem script, accepts
/// end with `OP_1`
fn spend_status(tx: &TxRecord, input: &TxInputRecord) -> AgoraOfferStatus {
    let ops = input.input_script.parse_ops().unwrap_or_default();
    let is_cancel = ops.len() >= 2
        && matches!(&ops[ops.len() - 2], Op::Push(OP_0, data) if data.is_empty());
    if is_cancel {
        return AgoraOfferStatus::Canceled;
    }
    AgoraOfferStatus::Taken(taken_info(&tx.outputs))
}

/// Who received the tokens of an accept tx and what the maker got
fn taken_info(outputs: &[TxOutputRecord]) -> Option<TakenInfo> {
    let sats_paid = outputs.get(MAKER_OUTPUT_IDX)?.sats;
    let taker_idx = match outputs.get(TAKER_OUTPUT_IDX) {
        Some(output) if output.script.p2pkh_hash().is_some() => TAKER_OUTPUT_IDX,
        _ => TAKER_OUTPUT_IDX_AFTER_REMAINDER,
    };
    let taker = outputs.get(taker_idx)?;
    let token = taker.token.as_ref()?;
    Some(TakenInfo { sats_paid, taker_script: taker.script.clone(), atoms: token.atoms })
}
