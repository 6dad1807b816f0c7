//! An in-memory indexer running the agora plugin, for tests
//!
//! Broadcast txs are validated natively: signatures are checked and covenant
//! spends must satisfy the conditions their Script enforces, so a tx the mock
//! accepts is one the covenant would accept. Txs stay unconfirmed until
//! `MockIndexer::mine_block` is called.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::needless_pass_by_ref_mut)]

mod ledger;
mod plugin;
mod validation;

use std::sync::Arc;

use async_trait::async_trait;
use constants::DEFAULT_DUST_SATS;
use covenants::{
    script::Script,
    token::{Token, TokenId},
    tx::{OutPoint, TxId, TxOutput},
};
use indexer::{
    AgoraIndexer, IndexerError,
    types::{HistoryTable, PluginGroupsPage, TokenInfo, TxHistoryPage, TxRecord, UtxoRecord},
};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::ledger::Ledger;

/// A type alias for a shared element, wrapped in an async capable readers-writer mutex
pub type AsyncShared<T> = Arc<RwLock<T>>;

/// The index of the token output of a genesis
const GENESIS_TOKEN_OUTPUT_IDX: u32 = 1;

/// An indexer over an in-memory ledger
#[derive(Clone, Debug)]
pub struct MockIndexer {
    /// The ledger, shared between clones
    ledger: AsyncShared<Ledger>,
}

impl Default for MockIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIndexer {
    /// An empty ledger with the default dust limit
    pub fn new() -> Self {
        Self::with_dust(DEFAULT_DUST_SATS)
    }

    /// An empty ledger whose covenants enforce `dust_sats` token outputs
    pub fn with_dust(dust_sats: u64) -> Self {
        Self { ledger: Arc::new(RwLock::new(Ledger::new(dust_sats))) }
    }

    /// Create an output of `sats` locked by `script` out of thin air
    pub async fn fund(&self, script: &Script, sats: u64) -> OutPoint {
        let txid = self.ledger.write().await.mint(vec![(TxOutput::new(sats, script.clone()), None)]);
        OutPoint { txid, out_idx: 1 }
    }

    /// Register a token and create an output holding `atoms` of it
    pub async fn genesis_token(
        &self,
        info: TokenInfo,
        script: &Script,
        atoms: u64,
        sats: u64,
    ) -> OutPoint {
        let token = Token::new(info.token_id, info.token_type, atoms);
        let mut ledger = self.ledger.write().await;
        ledger.add_token(info);
        let txid = ledger.mint(vec![(TxOutput::new(sats, script.clone()), Some(token))]);
        OutPoint { txid, out_idx: GENESIS_TOKEN_OUTPUT_IDX }
    }

    /// Confirm all unconfirmed txs, returning the new block height
    pub async fn mine_block(&self) -> u32 {
        self.ledger.write().await.mine_block()
    }
}

#[async_trait]
impl AgoraIndexer for MockIndexer {
    async fn script_utxos(&self, script: &Script) -> Result<Vec<UtxoRecord>, IndexerError> {
        Ok(self.ledger.read().await.script_utxos(script))
    }

    async fn history_by_script(
        &self,
        script: &Script,
        page: usize,
        page_size: usize,
    ) -> Result<TxHistoryPage, IndexerError> {
        Ok(self.ledger.read().await.history_by_script(script, page, page_size))
    }

    async fn tx(&self, txid: &TxId) -> Result<TxRecord, IndexerError> {
        self.ledger.read().await.tx(txid)
    }

    async fn token(&self, token_id: &TokenId) -> Result<TokenInfo, IndexerError> {
        self.ledger.read().await.token(token_id)
    }

    #[instrument(skip_all, err)]
    async fn broadcast_tx(&self, raw_tx: &[u8]) -> Result<TxId, IndexerError> {
        self.ledger.write().await.accept_tx(raw_tx)
    }

    async fn plugin_utxos(
        &self,
        plugin: &str,
        group: &[u8],
    ) -> Result<Vec<UtxoRecord>, IndexerError> {
        Ok(self.ledger.read().await.plugin_utxos(plugin, group))
    }

    async fn plugin_groups(
        &self,
        plugin: &str,
        prefix: &[u8],
        start: Option<&[u8]>,
        page_size: usize,
    ) -> Result<PluginGroupsPage, IndexerError> {
        Ok(self.ledger.read().await.plugin_groups(plugin, prefix, start, page_size))
    }

    #[instrument(skip(self, group), err)]
    async fn plugin_history(
        &self,
        plugin: &str,
        group: &[u8],
        table: HistoryTable,
        page: usize,
        page_size: usize,
    ) -> Result<TxHistoryPage, IndexerError> {
        Ok(self.ledger.read().await.plugin_history(plugin, group, table, page, page_size))
    }
}

#[cfg(test)]
mod tests {
    use constants::{ALL_BIP143, PLUGIN_NAME};
    use covenants::{
        builder::{P2pkhSignatory, TxBuilder, TxBuilderInput, TxBuilderOutput},
        ecc::{Ecc, K256Ecc},
        hash::{hash160, sha256d},
        script::push_bytes_op,
        token::{TokenType, slp_send},
        tx::{SignData, TxInput},
    };
    use indexer::types::token_id_group;

    use super::*;

    /// The wallet key used by the tests
    const SK: [u8; 32] = [1; 32];

    /// The wallet's P2PKH script
    fn wallet_script() -> Script {
        let pk = K256Ecc.derive_pubkey(&SK).unwrap();
        Script::p2pkh(&hash160(&pk))
    }

    /// A builder input spending a wallet output
    fn wallet_input(outpoint: OutPoint, sats: u64) -> TxBuilderInput {
        let pk = K256Ecc.derive_pubkey(&SK).unwrap();
        let input = TxInput::new(outpoint, SignData::output_script(sats, wallet_script()));
        TxBuilderInput::new(input, P2pkhSignatory::new(SK, pk))
    }

    /// A fungible token owned by the wallet
    fn token_info() -> TokenInfo {
        TokenInfo {
            token_id: TokenId([4; 32]),
            token_type: TokenType::SLP_FUNGIBLE,
            ticker: "MOCK".to_string(),
            name: "Mock token".to_string(),
            decimals: 0,
            group_token_id: None,
        }
    }

    #[tokio::test]
    async fn test_spend_p2pkh() {
        let indexer = MockIndexer::new();
        let outpoint = indexer.fund(&wallet_script(), 10_000).await;
        assert!(indexer.is_unspent(&outpoint).await.unwrap());

        let builder = TxBuilder {
            inputs: vec![wallet_input(outpoint, 10_000)],
            outputs: vec![TxBuilderOutput::Change(Script::p2pkh(&[5; 20]))],
            ..Default::default()
        };
        let tx = builder.sign(&K256Ecc, 1000, 546).unwrap();
        let txid = indexer.broadcast_tx(&tx.ser()).await.unwrap();
        assert_eq!(txid, tx.txid());
        assert!(!indexer.is_unspent(&outpoint).await.unwrap());
        assert!(indexer.script_utxos(&wallet_script()).await.unwrap().is_empty());
        assert_eq!(indexer.script_utxos(&Script::p2pkh(&[5; 20])).await.unwrap().len(), 1);

        // Double spends are rejected
        let err = indexer.broadcast_tx(&tx.ser()).await.unwrap_err();
        assert!(matches!(err, IndexerError::BroadcastRejected(_)));

        assert_eq!(indexer.tx(&txid).await.unwrap().block_height, None);
        assert_eq!(indexer.mine_block().await, 1);
        assert_eq!(indexer.tx(&txid).await.unwrap().block_height, Some(1));
    }

    #[tokio::test]
    async fn test_rejects_bad_signature() {
        let indexer = MockIndexer::new();
        let outpoint = indexer.fund(&wallet_script(), 10_000).await;
        let builder = TxBuilder {
            inputs: vec![wallet_input(outpoint, 10_000)],
            outputs: vec![TxBuilderOutput::Change(wallet_script())],
            ..Default::default()
        };
        let mut tx = builder.sign(&K256Ecc, 1000, 546).unwrap();

        // Sign with a different key for the same pubkey
        let pk = K256Ecc.derive_pubkey(&SK).unwrap();
        let preimage = tx.sighash_preimage(0, ALL_BIP143, None).unwrap();
        let mut sig = K256Ecc.schnorr_sign(&[2; 32], &sha256d(&preimage)).unwrap();
        sig.push(ALL_BIP143);
        tx.inputs[0].script = Script::from_ops(&[push_bytes_op(sig), push_bytes_op(pk.to_vec())]);

        let err = indexer.broadcast_tx(&tx.ser()).await.unwrap_err();
        assert!(matches!(err, IndexerError::BroadcastRejected(_)));
        assert!(indexer.is_unspent(&outpoint).await.unwrap());
    }

    #[tokio::test]
    async fn test_token_send_limits() {
        let indexer = MockIndexer::new();
        let info = token_info();
        let token_out = indexer.genesis_token(info.clone(), &wallet_script(), 100, 546).await;
        let fuel = indexer.fund(&wallet_script(), 10_000).await;
        assert_eq!(indexer.token(&info.token_id).await.unwrap(), info);

        let send = |amounts: &[u64]| TxBuilder {
            inputs: vec![wallet_input(token_out, 546), wallet_input(fuel, 10_000)],
            outputs: vec![
                TxOutput::new(0, slp_send(&info.token_id, 1, amounts)).into(),
                TxOutput::new(546, Script::p2pkh(&[6; 20])).into(),
                TxBuilderOutput::Change(wallet_script()),
            ],
            ..Default::default()
        };

        let overspend = send(&[101]).sign(&K256Ecc, 1000, 546).unwrap();
        assert!(indexer.broadcast_tx(&overspend.ser()).await.is_err());

        let tx = send(&[60]).sign(&K256Ecc, 1000, 546).unwrap();
        let txid = indexer.broadcast_tx(&tx.ser()).await.unwrap();
        let record = indexer.tx(&txid).await.unwrap();
        assert_eq!(record.outputs[1].token.as_ref().map(|token| token.atoms), Some(60));
        assert_eq!(record.outputs[2].token, None);
        assert_eq!(record.inputs[0].token.as_ref().map(|token| token.atoms), Some(100));

        // Plain token sends aren't offers
        let group = token_id_group(&info.token_id);
        assert!(indexer.plugin_utxos(PLUGIN_NAME, &group).await.unwrap().is_empty());
        let history = indexer.history_by_script(&wallet_script(), 0, 25).await.unwrap();
        assert_eq!(history.num_txs, 3);
        assert_eq!(history.txs[0].txid, txid);
    }
}
