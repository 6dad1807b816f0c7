//! The indexer interface the offer book is written against

use async_trait::async_trait;
use covenants::{
    script::Script,
    token::TokenId,
    tx::{OutPoint, TxId},
};

use crate::{
    errors::IndexerError,
    types::{HistoryTable, PluginGroupsPage, TokenInfo, TxHistoryPage, TxRecord, UtxoRecord},
};

/// An indexer of the ledger running the agora plugin
///
/// Implementations are shared between tasks, so all methods take `&self`
#[async_trait]
pub trait AgoraIndexer: Send + Sync {
    // ----------
    // | Script |
    // ----------

    /// The unspent outputs locked by `script`
    async fn script_utxos(&self, script: &Script) -> Result<Vec<UtxoRecord>, IndexerError>;

    /// A page of the txs spending from or paying to `script`, newest first
    async fn history_by_script(
        &self,
        script: &Script,
        page: usize,
        page_size: usize,
    ) -> Result<TxHistoryPage, IndexerError>;

    // ------------------
    // | Txs and Tokens |
    // ------------------

    /// The tx with the given txid
    async fn tx(&self, txid: &TxId) -> Result<TxRecord, IndexerError>;

    /// Metadata of the given token
    async fn token(&self, token_id: &TokenId) -> Result<TokenInfo, IndexerError>;

    /// Submit a serialized tx to the ledger
    async fn broadcast_tx(&self, raw_tx: &[u8]) -> Result<TxId, IndexerError>;

    /// Whether the given output exists and is unspent
    async fn is_unspent(&self, outpoint: &OutPoint) -> Result<bool, IndexerError> {
        let tx = match self.tx(&outpoint.txid).await {
            Ok(tx) => tx,
            Err(IndexerError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(tx
            .outputs
            .get(outpoint.out_idx as usize)
            .is_some_and(|output| output.spent_by.is_none()))
    }

    // -----------
    // | Plugins |
    // -----------

    /// The unspent outputs `plugin` indexed under `group`
    async fn plugin_utxos(
        &self,
        plugin: &str,
        group: &[u8],
    ) -> Result<Vec<UtxoRecord>, IndexerError>;

    /// The groups of `plugin` starting with `prefix`, from `start` on
    ///
    /// Only groups with unspent outputs are listed
    async fn plugin_groups(
        &self,
        plugin: &str,
        prefix: &[u8],
        start: Option<&[u8]>,
        page_size: usize,
    ) -> Result<PluginGroupsPage, IndexerError>;

    /// A page of the txs creating or spending outputs `plugin` indexed under
    /// `group`
    async fn plugin_history(
        &self,
        plugin: &str,
        group: &[u8],
        table: HistoryTable,
        page: usize,
        page_size: usize,
    ) -> Result<TxHistoryPage, IndexerError>;
}
