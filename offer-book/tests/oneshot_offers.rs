//! Lists, discovers, accepts and cancels SLP oneshot offers of NFTs against
//! the mock indexer

use std::sync::Arc;

use config::AgoraConfig;
use covenants::{
    AgoraOffer, AgoraOfferStatus, AgoraOfferVariant, AgoraOneshot, TakenInfo,
    builder::{TxBuilder, TxBuilderInput, TxBuilderOutput},
    ecc::{Ecc, K256Ecc},
    inputs::{cancel_fuel_inputs, oneshot_accept_fuel_inputs},
    listing::{ListingParams, OFFER_OUTPUT_IDX, slp_ad_setup_tx, slp_offer_tx},
    offer::{AcceptTxParams, CancelTxParams},
    oneshot::AgoraOneshotSignatory,
    token::{Token, TokenId, slp_send},
    tx::{OutPoint, TxOutput},
};
use eyre::Result;
use indexer::{AgoraIndexer, IndexerError};
use mock_indexer::MockIndexer;
use offer_book::{HistoryParams, OfferBook, OfferKey};
use test_helpers::{
    assert_eq_result, assert_matches_result, assert_true_result,
    fixtures::{MAKER_SEED, TAKER_SEED, TestWallet, nft_child},
};
use util::logging::setup_env_logger;

/// The id byte of the NFT
const NFT_BYTE: u8 = 0x30;
/// The id byte of the NFT's group
const GROUP_BYTE: u8 = 0x31;
/// Fee rate of all txs
const FEE_PER_KB: u64 = 1000;

/// A ledger with a maker holding an NFT and a funded taker
struct TestSetup {
    /// The indexer
    indexer: Arc<MockIndexer>,
    /// The book over the indexer
    book: OfferBook<MockIndexer>,
    /// Sells the NFT
    maker: TestWallet,
    /// Buys the NFT
    taker: TestWallet,
    /// The NFT
    token: Token,
}

impl TestSetup {
    /// Create the ledger and fund both sides
    async fn new() -> Result<Self> {
        setup_env_logger();
        let indexer = Arc::new(MockIndexer::new());
        let book = OfferBook::new(indexer.clone(), &AgoraConfig::default());
        let maker = TestWallet::new(MAKER_SEED)?;
        let taker = TestWallet::new(TAKER_SEED)?;

        let info = nft_child(NFT_BYTE, GROUP_BYTE);
        let token = Token::new(info.token_id, info.token_type, 1);
        indexer.genesis_token(info, &maker.script, 1, 546).await;
        indexer.fund(&maker.script, 100_000).await;
        indexer.fund(&taker.script, 200_000).await;

        Ok(Self { indexer, book, maker, taker, token })
    }

    /// A oneshot offer of the NFT for `asked_sats`
    fn oneshot(&self, asked_sats: u64) -> AgoraOneshot {
        let send = slp_send(&self.token.token_id, self.token.token_type.number, &[0, 1]);
        AgoraOneshot {
            enforced_outputs: vec![
                TxOutput::new(0, send),
                TxOutput::new(asked_sats, self.maker.script.clone()),
            ],
            cancel_pk: self.maker.pk,
        }
    }

    /// List the NFT through an ad setup tx and the offer tx spending the ad
    async fn list(&self, asked_sats: u64) -> Result<OutPoint> {
        let variant = AgoraOfferVariant::Oneshot(self.oneshot(asked_sats));
        let token_utxos = self.maker.token_utxos(&*self.indexer, &self.token.token_id).await?;
        let mut inputs = self.maker.inputs(&token_utxos);
        inputs.extend(self.maker.inputs(&self.maker.sats_utxos(&*self.indexer).await?));
        let listing = ListingParams {
            inputs,
            token_change_atoms: 0,
            change_script: self.maker.script.clone(),
            dust_sats: 546,
            fee_per_kb: FEE_PER_KB,
        };
        let setup = slp_ad_setup_tx(&K256Ecc, &variant, &self.token, listing)?;
        self.indexer.broadcast_tx(&setup.ser()).await?;

        let ad_outpoint = OutPoint { txid: setup.txid(), out_idx: OFFER_OUTPUT_IDX };
        let ad_sats = setup.outputs[OFFER_OUTPUT_IDX as usize].sats;
        let offer_tx =
            slp_offer_tx(&K256Ecc, &variant, &self.token, ad_outpoint, ad_sats, self.maker.sk, 546)?;
        self.indexer.broadcast_tx(&offer_tx.ser()).await?;
        Ok(OutPoint { txid: offer_tx.txid(), out_idx: OFFER_OUTPUT_IDX })
    }

    /// Accept `offer` with the taker's coins
    async fn accept(&self, offer: &AgoraOffer) -> Result<Result<(), IndexerError>> {
        let utxos = self.taker.sats_utxos(&*self.indexer).await?;
        let fuel = oneshot_accept_fuel_inputs(offer, &utxos, FEE_PER_KB)?;
        let covenant_sk = [0x55; 32];
        let tx = offer.accept_tx(&K256Ecc, AcceptTxParams {
            covenant_sk,
            covenant_pk: K256Ecc.derive_pubkey(&covenant_sk)?,
            fuel_inputs: self.taker.inputs(&fuel),
            recipient_script: self.taker.script.clone(),
            fee_per_kb: FEE_PER_KB,
            ..Default::default()
        })?;
        Ok(self.indexer.broadcast_tx(&tx.ser()).await.map(|_| ()))
    }

    /// Accept `offer` through its own covenant while paying the maker
    /// `maker_sats` instead of what the offer enforces
    async fn accept_paying(
        &self,
        offer: &AgoraOffer,
        maker_sats: u64,
    ) -> Result<Result<(), IndexerError>> {
        let AgoraOfferVariant::Oneshot(oneshot) = &offer.variant else {
            eyre::bail!("not a oneshot offer");
        };
        let utxos = self.taker.sats_utxos(&*self.indexer).await?;
        let fuel = oneshot_accept_fuel_inputs(offer, &utxos, FEE_PER_KB)?;
        let covenant_sk = [0x55; 32];
        let signatory = AgoraOneshotSignatory::new(
            covenant_sk,
            K256Ecc.derive_pubkey(&covenant_sk)?,
            oneshot.enforced_outputs.len(),
        );

        let mut inputs = self.taker.inputs(&fuel);
        inputs.push(TxBuilderInput::new(offer.tx_builder_input.clone(), signatory));
        let outputs = vec![
            oneshot.enforced_outputs[0].clone().into(),
            TxOutput::new(maker_sats, self.maker.script.clone()).into(),
            TxOutput::new(546, self.taker.script.clone()).into(),
            TxBuilderOutput::Change(self.taker.script.clone()),
        ];
        let tx = TxBuilder { inputs, outputs, ..Default::default() }.sign(&K256Ecc, FEE_PER_KB, 546)?;
        Ok(self.indexer.broadcast_tx(&tx.ser()).await.map(|_| ()))
    }

    /// Cancel `offer` with the maker's coins
    async fn cancel(&self, offer: &AgoraOffer) -> Result<()> {
        let utxos = self.maker.sats_utxos(&*self.indexer).await?;
        let fuel = cancel_fuel_inputs(offer, &utxos, FEE_PER_KB)?;
        let tx = offer.cancel_tx(&K256Ecc, CancelTxParams {
            cancel_sk: self.maker.sk,
            fuel_inputs: self.maker.inputs(&fuel),
            recipient_script: self.maker.script.clone(),
            fee_per_kb: FEE_PER_KB,
            ..Default::default()
        })?;
        self.indexer.broadcast_tx(&tx.ser()).await?;
        Ok(())
    }

    /// The group of the NFT
    fn group_token_id(&self) -> TokenId {
        TokenId([GROUP_BYTE; 32])
    }
}

#[tokio::test]
async fn test_accept_pays_the_asked_sats() -> Result<()> {
    let setup = TestSetup::new().await?;
    let outpoint = setup.list(80_000).await?;

    let offers = setup.book.active_offers_by_group_token_id(&setup.group_token_id()).await?;
    assert_eq_result!(offers.len(), 1)?;
    let offer = &offers[0];
    assert_eq_result!(offer.outpoint, outpoint)?;
    assert_eq_result!(offer.variant, AgoraOfferVariant::Oneshot(setup.oneshot(80_000)))?;
    assert_eq_result!(offer.asked_sats(None)?, 80_000)?;

    let group_ids = setup.book.offered_group_token_ids().await?;
    assert_eq_result!(group_ids, vec![setup.group_token_id()])?;
    let token_ids = setup.book.all_offered_token_ids().await?;
    assert_eq_result!(token_ids, vec![setup.token.token_id])?;
    assert_true_result!(setup.book.offered_fungible_token_ids().await?.is_empty())?;

    // The genuine covenant refuses a tx paying the maker one sat less
    let rejected = setup.accept_paying(offer, 79_999).await?;
    let mismatch = matches!(
        &rejected,
        Err(IndexerError::BroadcastRejected(msg)) if msg.contains("covenant outputs don't match")
    );
    assert_true_result!(mismatch)?;
    assert_true_result!(setup.indexer.is_unspent(&outpoint).await?)?;

    setup.accept(offer).await??;
    let taker_atoms = setup.taker.token_balance(&*setup.indexer, &setup.token.token_id).await?;
    assert_eq_result!(taker_atoms, 1)?;
    let maker_utxos = setup.maker.sats_utxos(&*setup.indexer).await?;
    assert_true_result!(maker_utxos.iter().any(|utxo| utxo.sats == 80_000))?;
    assert_true_result!(setup.book.all_offered_token_ids().await?.is_empty())?;

    let key = OfferKey::GroupTokenId(setup.group_token_id());
    let history = setup.book.historic_offers(HistoryParams::new(key)).await?;
    assert_eq_result!(history.offers.len(), 1)?;
    let expected =
        TakenInfo { sats_paid: 80_000, taker_script: setup.taker.script.clone(), atoms: 1 };
    assert_eq_result!(history.offers[0].status, AgoraOfferStatus::Taken(Some(expected.clone())))
}

#[tokio::test]
async fn test_cancel_and_relist() -> Result<()> {
    let setup = TestSetup::new().await?;
    setup.list(80_000).await?;
    let old = setup.book.active_offers_by_token_id(&setup.token.token_id).await?.remove(0);

    setup.cancel(&old).await?;
    assert_true_result!(setup.book.active_offers_by_pubkey(&setup.maker.pk).await?.is_empty())?;
    let maker_atoms = setup.maker.token_balance(&*setup.indexer, &setup.token.token_id).await?;
    assert_eq_result!(maker_atoms, 1)?;

    setup.list(70_000).await?;
    let offers = setup.book.active_offers_by_pubkey(&setup.maker.pk).await?;
    assert_eq_result!(offers.len(), 1)?;
    let new = &offers[0];
    assert_eq_result!(new.asked_sats(None)?, 70_000)?;

    // The canceled offer's output is gone
    let rejected = setup.accept(&old).await?;
    assert_matches_result!(rejected, Err(IndexerError::BroadcastRejected(_)))?;

    setup.accept(new).await??;
    setup.indexer.mine_block().await;

    let key = OfferKey::TokenId(setup.token.token_id);
    let history = setup.book.historic_offers(HistoryParams::new(key)).await?;
    let statuses: Vec<_> = history.offers.iter().map(|offer| offer.status.clone()).collect();
    let taken =
        TakenInfo { sats_paid: 70_000, taker_script: setup.taker.script.clone(), atoms: 1 };
    let expected = vec![AgoraOfferStatus::Taken(Some(taken)), AgoraOfferStatus::Canceled];
    assert_eq_result!(statuses, expected)?;
    assert_eq_result!(history.offers[1].outpoint, old.outpoint)
}
