//! The in-memory ledger behind the mock indexer

use std::collections::{BTreeSet, HashMap, HashSet};

use constants::{PLUGIN_NAME, TX_VERSION};
use covenants::{
    script::{OP_RETURN, Script},
    token::{Token, TokenId},
    tx::{OutPoint, Tx, TxId, TxOutput},
};
use indexer::{
    IndexerError,
    types::{
        HistoryTable, PluginEntries, PluginGroupsPage, TokenInfo, TxHistoryPage, TxInputRecord,
        TxOutputRecord, TxRecord, UtxoRecord,
    },
};
use tracing::debug;
use util::get_current_time_seconds;

use crate::{
    plugin::run_agora_plugin,
    validation::{SpentOutput, attach_sign_data, output_tokens, validate_scripts},
};

/// Every tx the mock has seen, with its tokens and plugin entries
#[derive(Debug)]
pub(crate) struct Ledger {
    /// Indexed txs by txid
    txs: HashMap<TxId, TxRecord>,
    /// Txids in the order they were added
    order: Vec<TxId>,
    /// Known tokens
    tokens: HashMap<TokenId, TokenInfo>,
    /// The height of the next mined block
    next_block_height: u32,
    /// Number of txs minted out of thin air, keeps their txids distinct
    num_mints: u32,
    /// Value of token outputs the covenants enforce
    dust_sats: u64,
}

impl Ledger {
    /// An empty ledger
    pub fn new(dust_sats: u64) -> Self {
        Self {
            txs: HashMap::new(),
            order: Vec::new(),
            tokens: HashMap::new(),
            next_block_height: 1,
            num_mints: 0,
            dust_sats,
        }
    }

    // ------------
    // | Mutation |
    // ------------

    /// Add a tx without inputs creating the given outputs
    ///
    /// Output 0 is always an empty OP_RETURN so tokens can sit at output 1
    pub fn mint(&mut self, outputs: Vec<(TxOutput, Option<Token>)>) -> TxId {
        self.num_mints += 1;
        let (outputs, tokens): (Vec<_>, Vec<_>) =
            std::iter::once((TxOutput::new(0, Script::new(vec![OP_RETURN])), None))
                .chain(outputs)
                .unzip();
        let tx = Tx { version: TX_VERSION, inputs: vec![], outputs, locktime: self.num_mints };
        self.record(&tx, &[], &tokens, HashMap::new())
    }

    /// Register the metadata of a token
    pub fn add_token(&mut self, info: TokenInfo) {
        self.tokens.insert(info.token_id, info);
    }

    /// Validate a serialized tx and add it to the ledger
    pub fn accept_tx(&mut self, raw_tx: &[u8]) -> Result<TxId, IndexerError> {
        let mut tx = Tx::deser(raw_tx).map_err(|e| IndexerError::rejected(e.to_string()))?;
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(IndexerError::rejected("tx needs inputs and outputs"));
        }
        let txid = tx.txid();
        if self.txs.contains_key(&txid) {
            return Err(IndexerError::rejected(format!("tx {txid} already in the ledger")));
        }

        let mut seen = HashSet::new();
        let mut spent = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            if !seen.insert(input.prev_out) {
                return Err(IndexerError::rejected(format!("{} spent twice", input.prev_out)));
            }
            spent.push(self.unspent_output(&input.prev_out)?);
        }

        let sats_in: u64 = spent.iter().map(|output| output.sats).sum();
        let sats_out: u64 = tx.outputs.iter().map(|output| output.sats).sum();
        if sats_out > sats_in {
            return Err(IndexerError::rejected(format!(
                "tx spends {sats_out} sats but its inputs hold {sats_in}"
            )));
        }

        attach_sign_data(&mut tx, &spent)?;
        validate_scripts(&tx, &spent, self.dust_sats)?;
        let tokens = output_tokens(&tx, &spent)?;
        let plugins = run_agora_plugin(
            &tx,
            &tokens,
            |token_id| self.tokens.get(token_id).and_then(|info| info.group_token_id),
            self.dust_sats,
        );

        let plugins = plugins
            .into_iter()
            .map(|(out_idx, entry)| (out_idx, PluginEntries::from([(PLUGIN_NAME.to_string(), entry)])))
            .collect();
        debug!("accepted tx {txid}, sats in {sats_in} out {sats_out}");
        Ok(self.record(&tx, &spent, &tokens, plugins))
    }

    /// Confirm all unconfirmed txs in a new block, returning its height
    pub fn mine_block(&mut self) -> u32 {
        let height = self.next_block_height;
        self.next_block_height += 1;
        for tx in self.txs.values_mut().filter(|tx| tx.block_height.is_none()) {
            tx.block_height = Some(height);
        }
        height
    }

    /// Index a tx and mark the outputs it spends
    fn record(
        &mut self,
        tx: &Tx,
        spent: &[SpentOutput],
        tokens: &[Option<Token>],
        mut plugins: HashMap<usize, PluginEntries>,
    ) -> TxId {
        let txid = tx.txid();
        let inputs = tx
            .inputs
            .iter()
            .zip(spent)
            .enumerate()
            .map(|(input_idx, (input, spent))| {
                let plugins = match self.output_mut(&input.prev_out) {
                    Some(output) => {
                        output.spent_by = Some(OutPoint { txid, out_idx: input_idx as u32 });
                        output.plugins.clone()
                    },
                    None => PluginEntries::new(),
                };
                TxInputRecord {
                    prev_out: input.prev_out,
                    input_script: input.script.clone(),
                    output_script: spent.script.clone(),
                    sats: spent.sats,
                    sequence: input.sequence,
                    token: spent.token.clone(),
                    plugins,
                }
            })
            .collect();
        let outputs = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(out_idx, output)| TxOutputRecord {
                sats: output.sats,
                script: output.script.clone(),
                token: tokens.get(out_idx).cloned().flatten(),
                spent_by: None,
                plugins: plugins.remove(&out_idx).unwrap_or_default(),
            })
            .collect();

        self.txs.insert(txid, TxRecord {
            txid,
            version: tx.version,
            inputs,
            outputs,
            locktime: tx.locktime,
            block_height: None,
            time_first_seen: get_current_time_seconds(),
        });
        self.order.push(txid);
        txid
    }

    /// An output that can be spent
    fn unspent_output(&self, outpoint: &OutPoint) -> Result<SpentOutput, IndexerError> {
        let output = self
            .txs
            .get(&outpoint.txid)
            .and_then(|tx| tx.outputs.get(outpoint.out_idx as usize))
            .ok_or_else(|| IndexerError::rejected(format!("{outpoint} doesn't exist")))?;
        if let Some(spent_by) = output.spent_by {
            return Err(IndexerError::rejected(format!("{outpoint} already spent by {spent_by}")));
        }
        Ok(SpentOutput { sats: output.sats, script: output.script.clone(), token: output.token.clone() })
    }

    /// A mutable indexed output
    fn output_mut(&mut self, outpoint: &OutPoint) -> Option<&mut TxOutputRecord> {
        self.txs.get_mut(&outpoint.txid)?.outputs.get_mut(outpoint.out_idx as usize)
    }

    // -----------
    // | Queries |
    // -----------

    /// A tx by txid
    pub fn tx(&self, txid: &TxId) -> Result<TxRecord, IndexerError> {
        self.txs.get(txid).cloned().ok_or_else(|| IndexerError::not_found(format!("tx {txid}")))
    }

    /// A token by id
    pub fn token(&self, token_id: &TokenId) -> Result<TokenInfo, IndexerError> {
        self.tokens
            .get(token_id)
            .cloned()
            .ok_or_else(|| IndexerError::not_found(format!("token {token_id}")))
    }

    /// Unspent outputs matching `pred`, in ledger order
    pub fn utxos(&self, pred: impl Fn(&TxOutputRecord) -> bool) -> Vec<UtxoRecord> {
        self.ordered_txs()
            .flat_map(|tx| {
                tx.outputs.iter().enumerate().map(move |(out_idx, output)| (tx, out_idx, output))
            })
            .filter(|(_, _, output)| output.spent_by.is_none() && pred(output))
            .map(|(tx, out_idx, output)| UtxoRecord {
                outpoint: OutPoint { txid: tx.txid, out_idx: out_idx as u32 },
                sats: output.sats,
                script: output.script.clone(),
                token: output.token.clone(),
                plugins: output.plugins.clone(),
                block_height: tx.block_height,
            })
            .collect()
    }

    /// The unspent outputs locked by `script`
    pub fn script_utxos(&self, script: &Script) -> Vec<UtxoRecord> {
        self.utxos(|output| output.script == *script)
    }

    /// The unspent outputs indexed by `plugin` under `group`
    pub fn plugin_utxos(&self, plugin: &str, group: &[u8]) -> Vec<UtxoRecord> {
        self.utxos(|output| has_group(&output.plugins, plugin, group))
    }

    /// A page of the plugin groups with unspent outputs
    pub fn plugin_groups(
        &self,
        plugin: &str,
        prefix: &[u8],
        start: Option<&[u8]>,
        page_size: usize,
    ) -> PluginGroupsPage {
        let groups: BTreeSet<Vec<u8>> = self
            .utxos(|_| true)
            .into_iter()
            .filter_map(|utxo| utxo.plugins.get(plugin).map(|entry| entry.groups.clone()))
            .flatten()
            .filter(|group| group.starts_with(prefix))
            .filter(|group| start.is_none_or(|start| group.as_slice() >= start))
            .collect();

        let mut groups = groups.into_iter();
        let page = groups.by_ref().take(page_size.max(1)).collect();
        PluginGroupsPage { groups: page, next_start: groups.next() }
    }

    /// A page of the txs touching `script`
    pub fn history_by_script(&self, script: &Script, page: usize, page_size: usize) -> TxHistoryPage {
        let txs = self
            .ordered_txs()
            .rev()
            .filter(|tx| {
                tx.inputs.iter().any(|input| input.output_script == *script)
                    || tx.outputs.iter().any(|output| output.script == *script)
            })
            .cloned()
            .collect();
        TxHistoryPage::paginate(txs, page, page_size)
    }

    /// A page of the txs creating or spending outputs indexed under `group`
    pub fn plugin_history(
        &self,
        plugin: &str,
        group: &[u8],
        table: HistoryTable,
        page: usize,
        page_size: usize,
    ) -> TxHistoryPage {
        let touches_group = |tx: &&TxRecord| {
            tx.inputs.iter().any(|input| has_group(&input.plugins, plugin, group))
                || tx.outputs.iter().any(|output| has_group(&output.plugins, plugin, group))
        };
        let txs: Vec<TxRecord> = match table {
            HistoryTable::Confirmed => self
                .ordered_txs()
                .filter(|tx| tx.block_height.is_some())
                .filter(touches_group)
                .cloned()
                .collect(),
            HistoryTable::Unconfirmed => self
                .ordered_txs()
                .filter(|tx| tx.block_height.is_none())
                .filter(touches_group)
                .cloned()
                .collect(),
            HistoryTable::History => self.ordered_txs().rev().filter(touches_group).cloned().collect(),
        };
        TxHistoryPage::paginate(txs, page, page_size)
    }

    /// Txs in the order they entered the ledger
    fn ordered_txs(&self) -> impl DoubleEndedIterator<Item = &TxRecord> {
        self.order.iter().filter_map(|txid| self.txs.get(txid))
    }
}

/// Whether `plugin` indexed an output under `group`
fn has_group(plugins: &PluginEntries, plugin: &str, group: &[u8]) -> bool {
    plugins.get(plugin).is_some_and(|entry| entry.groups.iter().any(|g| g == group))
}
