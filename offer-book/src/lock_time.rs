//! Picks an enforced lock time that gives a partial offer a fresh address
//!
//! The lock time is part of the covenant script, so two offers with otherwise
//! identical terms get different P2SH addresses once their lock times differ.
//! Lock times are drawn from the window of past timestamps that any median
//! time past can satisfy, so accept txs are never delayed.

use constants::{MAX_MTP_LAG_SECS, MIN_LOCK_TIME};
use covenants::{AgoraPartial, AgoraPartialParams};
use indexer::AgoraIndexer;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, instrument};
use util::get_current_time_seconds;

use crate::{OfferBook, errors::OfferBookError};

/// What `OfferBook::select_params` picks a lock time for
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectParams {
    /// Approximate new covenant parameters from the requested terms
    Approximate(AgoraPartialParams),
    /// Keep the parameters of an existing offer, only moving its lock time
    Relock(AgoraPartial),
}

/// The range lock times are drawn from, at time `now`
pub(crate) fn lock_time_window(now: u64) -> Result<std::ops::Range<u32>, OfferBookError> {
    let max = u32::try_from(now.saturating_sub(MAX_MTP_LAG_SECS)).unwrap_or(u32::MAX);
    if max <= MIN_LOCK_TIME {
        return Err(OfferBookError::lock_time_window(format!(
            "clock at {now} leaves no lock times above {MIN_LOCK_TIME}"
        )));
    }
    Ok(MIN_LOCK_TIME..max)
}

impl<I: AgoraIndexer> OfferBook<I> {
    /// Choose covenant parameters whose P2SH address holds no outputs yet
    ///
    /// New offers are approximated with the book's tuning; relocked offers keep
    /// their terms and script length since the lock time is always pushed as
    /// four bytes
    #[instrument(skip_all, err)]
    pub async fn select_params(&self, params: SelectParams) -> Result<AgoraPartial, OfferBookError> {
        let now = get_current_time_seconds();
        self.select_params_at(params, now, &mut StdRng::from_entropy()).await
    }

    /// `select_params` with an explicit clock and source of randomness
    pub(crate) async fn select_params_at<R: Rng + Send>(
        &self,
        params: SelectParams,
        now: u64,
        rng: &mut R,
    ) -> Result<AgoraPartial, OfferBookError> {
        let window = lock_time_window(now)?;
        loop {
            let enforced_lock_time = rng.gen_range(window.clone());
            let partial = self.with_lock_time(&params, enforced_lock_time)?;
            let address = partial.script().to_p2sh();
            if self.indexer.script_utxos(&address).await?.is_empty() {
                return Ok(partial);
            }
            debug!(enforced_lock_time, "address already in use, drawing another lock time");
        }
    }

    /// The covenant for `params` with the given lock time
    fn with_lock_time(
        &self,
        params: &SelectParams,
        enforced_lock_time: u32,
    ) -> Result<AgoraPartial, OfferBookError> {
        match params {
            SelectParams::Approximate(params) => {
                let params = AgoraPartialParams {
                    enforced_lock_time,
                    min_atom_scale_factor: self.tuning.min_atom_scale_factor,
                    min_price_integer: self.tuning.min_price_integer,
                    min_scale_ratio: self.tuning.min_scale_ratio,
                    ..params.clone()
                };
                Ok(AgoraPartial::approximate(&params, self.tuning.script_integer_bits)?)
            },
            SelectParams::Relock(partial) => {
                Ok(AgoraPartial { enforced_lock_time, ..partial.clone() })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use config::AgoraConfig;
    use covenants::token::TokenId;
    use mock_indexer::MockIndexer;

    use super::*;

    /// A clock comfortably past the minimum lock time
    const NOW: u64 = 1_700_000_000;

    /// Terms of a 1000 atom offer
    fn params() -> AgoraPartialParams {
        AgoraPartialParams {
            offered_atoms: 1000,
            price_nanosats_per_atom: 1_000_000_000_000,
            min_accepted_atoms: 1,
            token_id: TokenId([9; 32]),
            maker_pk: [2; 33],
            ..Default::default()
        }
    }

    #[test]
    fn test_lock_time_window() {
        let window = lock_time_window(NOW).unwrap();
        assert_eq!(window.start, MIN_LOCK_TIME);
        assert_eq!(u64::from(window.end), NOW - MAX_MTP_LAG_SECS);

        let too_early = u64::from(MIN_LOCK_TIME) + MAX_MTP_LAG_SECS;
        assert!(matches!(lock_time_window(too_early), Err(OfferBookError::LockTimeWindow(_))));
        assert!(lock_time_window(0).is_err());
    }

    #[tokio::test]
    async fn test_select_approximate() {
        let book = OfferBook::new(Arc::new(MockIndexer::new()), &AgoraConfig::default());
        let mut rng = StdRng::seed_from_u64(42);
        let partial = book
            .select_params_at(SelectParams::Approximate(params()), NOW, &mut rng)
            .await
            .unwrap();
        assert!(lock_time_window(NOW).unwrap().contains(&partial.enforced_lock_time));
        assert_eq!(partial.offered_atoms(), 1000);
        assert_eq!(partial.maker_pk, [2; 33]);
    }

    #[tokio::test]
    async fn test_relock_keeps_terms() {
        let book = OfferBook::new(Arc::new(MockIndexer::new()), &AgoraConfig::default());
        let original = AgoraPartial::approximate(
            &AgoraPartialParams { enforced_lock_time: MIN_LOCK_TIME, ..params() },
            32,
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let relocked = book
            .select_params_at(SelectParams::Relock(original.clone()), NOW, &mut rng)
            .await
            .unwrap();
        assert_ne!(relocked.enforced_lock_time, original.enforced_lock_time);
        assert_eq!(AgoraPartial { enforced_lock_time: MIN_LOCK_TIME, ..relocked.clone() }, original);
        assert_eq!(relocked.script().bytecode().len(), original.script().bytecode().len());
    }

    #[tokio::test]
    async fn test_skips_used_addresses() {
        let indexer = Arc::new(MockIndexer::new());
        let book = OfferBook::new(indexer.clone(), &AgoraConfig::default());

        // The first draw of the seed lands on an address that already holds coins
        let first = book
            .select_params_at(SelectParams::Approximate(params()), NOW, &mut StdRng::seed_from_u64(3))
            .await
            .unwrap();
        indexer.fund(&first.script().to_p2sh(), 1000).await;

        let second = book
            .select_params_at(SelectParams::Approximate(params()), NOW, &mut StdRng::seed_from_u64(3))
            .await
            .unwrap();
        assert_ne!(second.enforced_lock_time, first.enforced_lock_time);
        assert!(indexer.script_utxos(&second.script().to_p2sh()).await.unwrap().is_empty());
    }
}
