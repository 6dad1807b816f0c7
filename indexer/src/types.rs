//! Records returned by the indexer

use std::collections::BTreeMap;

use constants::{
    FUNGIBLE_TOKEN_ID_PREFIX, GROUP_TOKEN_ID_PREFIX, PLUGIN_ERROR_TAG, PUBKEY_PREFIX,
    TOKEN_ID_PREFIX,
};
use covenants::{
    ecc::Pubkey,
    inputs::FuelUtxo,
    script::Script,
    token::{Token, TokenId, TokenType},
    tx::{OutPoint, TxId},
};
use serde::{Deserialize, Serialize};

// -----------
// | Plugins |
// -----------

/// What a plugin stored for one output
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEntry {
    /// The groups the output is indexed under, each prefixed by its kind
    pub groups: Vec<Vec<u8>>,
    /// Data items describing the output
    pub data: Vec<Vec<u8>>,
}

impl PluginEntry {
    /// Whether the plugin flagged the output as not matching its ad
    pub fn is_error(&self) -> bool {
        self.data.first().map(Vec::as_slice) == Some(PLUGIN_ERROR_TAG)
    }

    /// The maker pubkey group of the entry, if any
    pub fn pubkey(&self) -> Option<Pubkey> {
        self.groups
            .iter()
            .find_map(|group| group.strip_prefix(PUBKEY_PREFIX))
            .and_then(|pk| Pubkey::try_from(pk).ok())
    }
}

/// Plugin entries of an output by plugin name
pub type PluginEntries = BTreeMap<String, PluginEntry>;

/// The group of offers by a maker
pub fn pubkey_group(pk: &Pubkey) -> Vec<u8> {
    [PUBKEY_PREFIX, pk.as_slice()].concat()
}

/// The group of offers of a token
pub fn token_id_group(token_id: &TokenId) -> Vec<u8> {
    [TOKEN_ID_PREFIX, token_id.as_bytes().as_slice()].concat()
}

/// The group of offers of a fungible token
pub fn fungible_token_id_group(token_id: &TokenId) -> Vec<u8> {
    [FUNGIBLE_TOKEN_ID_PREFIX, token_id.as_bytes().as_slice()].concat()
}

/// The group of offers of NFTs in a group
pub fn group_token_id_group(group_token_id: &TokenId) -> Vec<u8> {
    [GROUP_TOKEN_ID_PREFIX, group_token_id.as_bytes().as_slice()].concat()
}

/// A page of plugin groups
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginGroupsPage {
    /// The groups, in ascending byte order
    pub groups: Vec<Vec<u8>>,
    /// The group to start the next page at, `None` on the last page
    pub next_start: Option<Vec<u8>>,
}

// ----------------
// | Transactions |
// ----------------

/// An unspent output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRecord {
    /// The output
    pub outpoint: OutPoint,
    /// The value of the output
    pub sats: u64,
    /// The output script
    pub script: Script,
    /// The tokens held by the output
    pub token: Option<Token>,
    /// What plugins indexed about the output
    pub plugins: PluginEntries,
    /// The height of the block confirming the output, `None` if unconfirmed
    pub block_height: Option<u32>,
}

impl FuelUtxo for UtxoRecord {
    fn outpoint(&self) -> OutPoint {
        self.outpoint
    }

    fn sats(&self) -> u64 {
        self.sats
    }
}

/// An input of an indexed tx, with the output it spends
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInputRecord {
    /// The spent output
    pub prev_out: OutPoint,
    /// The unlocking script
    pub input_script: Script,
    /// The script of the spent output
    pub output_script: Script,
    /// The value of the spent output
    pub sats: u64,
    /// The sequence number
    pub sequence: u32,
    /// The tokens held by the spent output
    pub token: Option<Token>,
    /// What plugins indexed about the spent output
    pub plugins: PluginEntries,
}

/// An output of an indexed tx
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutputRecord {
    /// The value
    pub sats: u64,
    /// The output script
    pub script: Script,
    /// The tokens held
    pub token: Option<Token>,
    /// The input spending this output, if spent
    pub spent_by: Option<OutPoint>,
    /// What plugins indexed about the output
    pub plugins: PluginEntries,
}

/// An indexed tx
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    /// The txid
    pub txid: TxId,
    /// The tx version
    pub version: i32,
    /// The inputs
    pub inputs: Vec<TxInputRecord>,
    /// The outputs
    pub outputs: Vec<TxOutputRecord>,
    /// The lock time
    pub locktime: u32,
    /// The height of the confirming block, `None` if unconfirmed
    pub block_height: Option<u32>,
    /// When the indexer first saw the tx, in unix seconds
    pub time_first_seen: u64,
}

/// Metadata of a token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// The token id
    pub token_id: TokenId,
    /// The token type
    pub token_type: TokenType,
    /// The ticker
    pub ticker: String,
    /// The name
    pub name: String,
    /// Number of decimals of the display amount
    pub decimals: u8,
    /// The NFT group the token belongs to, for NFT children
    pub group_token_id: Option<TokenId>,
}

// -----------
// | History |
// -----------

/// Which txs a history query covers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryTable {
    /// Confirmed txs, oldest first
    Confirmed,
    /// Unconfirmed txs, oldest first
    Unconfirmed,
    /// All txs, newest first
    #[default]
    History,
}

/// A page of txs
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHistoryPage {
    /// The txs on the page
    pub txs: Vec<TxRecord>,
    /// The number of txs across all pages
    pub num_txs: usize,
    /// The number of pages
    pub num_pages: usize,
}

impl TxHistoryPage {
    /// Cut page `page` of `page_size` txs out of the full history
    pub fn paginate(txs: Vec<TxRecord>, page: usize, page_size: usize) -> Self {
        let num_txs = txs.len();
        let page_size = page_size.max(1);
        let num_pages = num_txs.div_ceil(page_size);
        let txs = txs.into_iter().skip(page.saturating_mul(page_size)).take(page_size).collect();
        Self { txs, num_txs, num_pages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A tx record with the given id byte
    fn tx(id: u8) -> TxRecord {
        TxRecord {
            txid: TxId([id; 32]),
            version: 2,
            inputs: vec![],
            outputs: vec![],
            locktime: 0,
            block_height: None,
            time_first_seen: 0,
        }
    }

    #[test]
    fn test_paginate() {
        let txs: Vec<_> = (0..7).map(tx).collect();
        let page = TxHistoryPage::paginate(txs.clone(), 1, 3);
        assert_eq!(page.num_txs, 7);
        assert_eq!(page.num_pages, 3);
        assert_eq!(page.txs, txs[3..6].to_vec());

        let last = TxHistoryPage::paginate(txs.clone(), 2, 3);
        assert_eq!(last.txs, vec![tx(6)]);
        assert!(TxHistoryPage::paginate(txs, 5, 3).txs.is_empty());
        assert_eq!(TxHistoryPage::paginate(vec![], 0, 25).num_pages, 0);
    }

    #[test]
    fn test_plugin_entry() {
        let pk = [2; 33];
        let token_id = TokenId([9; 32]);
        let entry = PluginEntry {
            groups: vec![token_id_group(&token_id), pubkey_group(&pk)],
            data: vec![b"PARTIAL".to_vec()],
        };
        assert_eq!(entry.pubkey(), Some(pk));
        assert!(!entry.is_error());
        assert_eq!(token_id_group(&token_id)[0], b'T');

        let error = PluginEntry { groups: vec![], data: vec![b"ERROR".to_vec(), vec![1]] };
        assert!(error.is_error());
        assert_eq!(error.pubkey(), None);

        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(serde_json::from_str::<PluginEntry>(&json).unwrap(), entry);
    }
}
