//! Keys, wallets and tokens shared by the integration tests

use covenants::{
    builder::{P2pkhSignatory, TxBuilderInput},
    ecc::{Ecc, K256Ecc, Pubkey, SecretKeyBytes},
    hash::hash160,
    script::Script,
    token::{TokenId, TokenType},
    tx::{OutPoint, SignData, TxInput},
};
use eyre::Result;
use indexer::{
    AgoraIndexer,
    types::{TokenInfo, UtxoRecord},
};

/// The seed of the maker's key
pub const MAKER_SEED: u8 = 0x01;
/// The seed of the taker's key
pub const TAKER_SEED: u8 = 0x02;

/// A P2PKH wallet
#[derive(Clone, Debug)]
pub struct TestWallet {
    /// The secret key
    pub sk: SecretKeyBytes,
    /// The pubkey
    pub pk: Pubkey,
    /// The P2PKH script of the pubkey
    pub script: Script,
}

impl TestWallet {
    /// A wallet whose secret key is `seed` repeated
    pub fn new(seed: u8) -> Result<Self> {
        let sk = [seed; 32];
        let pk = K256Ecc.derive_pubkey(&sk)?;
        Ok(Self { sk, pk, script: Script::p2pkh(&hash160(&pk)) })
    }

    /// A builder input spending a wallet output
    pub fn input(&self, outpoint: OutPoint, sats: u64) -> TxBuilderInput {
        let input = TxInput::new(outpoint, SignData::output_script(sats, self.script.clone()));
        TxBuilderInput::new(input, P2pkhSignatory::new(self.sk, self.pk))
    }

    /// Builder inputs spending the given wallet utxos
    pub fn inputs(&self, utxos: &[UtxoRecord]) -> Vec<TxBuilderInput> {
        utxos.iter().map(|utxo| self.input(utxo.outpoint, utxo.sats)).collect()
    }

    /// The wallet's utxos without tokens
    pub async fn sats_utxos(&self, indexer: &impl AgoraIndexer) -> Result<Vec<UtxoRecord>> {
        let utxos = indexer.script_utxos(&self.script).await?;
        Ok(utxos.into_iter().filter(|utxo| utxo.token.is_none()).collect())
    }

    /// The wallet's utxos holding the given token
    pub async fn token_utxos(
        &self,
        indexer: &impl AgoraIndexer,
        token_id: &TokenId,
    ) -> Result<Vec<UtxoRecord>> {
        let utxos = indexer.script_utxos(&self.script).await?;
        Ok(utxos
            .into_iter()
            .filter(|utxo| utxo.token.as_ref().is_some_and(|token| token.token_id == *token_id))
            .collect())
    }

    /// The total atoms of a token the wallet holds
    pub async fn token_balance(
        &self,
        indexer: &impl AgoraIndexer,
        token_id: &TokenId,
    ) -> Result<u64> {
        let utxos = self.token_utxos(indexer, token_id).await?;
        Ok(utxos.iter().filter_map(|utxo| utxo.token.as_ref()).map(|token| token.atoms).sum())
    }
}

/// A fungible token whose id is `id_byte` repeated
pub fn fungible_token(id_byte: u8, token_type: TokenType) -> TokenInfo {
    TokenInfo {
        token_id: TokenId([id_byte; 32]),
        token_type,
        ticker: format!("TK{id_byte}"),
        name: format!("Test token {id_byte}"),
        decimals: 0,
        group_token_id: None,
    }
}

/// An NFT whose id is `id_byte` repeated in the group `group_byte` repeated
pub fn nft_child(id_byte: u8, group_byte: u8) -> TokenInfo {
    TokenInfo {
        token_id: TokenId([id_byte; 32]),
        token_type: TokenType::SLP_NFT1_CHILD,
        ticker: format!("NFT{id_byte}"),
        name: format!("Test NFT {id_byte}"),
        decimals: 0,
        group_token_id: Some(TokenId([group_byte; 32])),
    }
}
