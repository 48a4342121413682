use std::sync::Arc;

use async_trait::async_trait;
use pairfeed_core::bucket::Span;
use pairfeed_core::candle::Candle;
use pairfeed_core::chain::ChainId;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SourceError;

/// One page of candles for a single time bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandlePage {
    pub candles: Vec<Candle>,
    /// Earliest timestamp (ms) the source holds data for, if reported.
    pub oldest_ts: Option<i64>,
}

/// Parameters of a bucket fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleRequest {
    pub chain: ChainId,
    pub pair_address: String,
    pub api_version: String,
    /// Bucket-aligned start timestamp (ms).
    pub bucket_ts: i64,
    pub span: Span,
    /// Upstream resolution string, e.g. `15m`.
    pub resolution: String,
}

/// A pair found by address search.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PairHit {
    pub id: String,
}

/// Trait for fetching bucketed pair candles from a remote source.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Source name (for logging/display).
    fn name(&self) -> &str;

    /// Fetch the candles of one bucket. Candles are not required to be sorted.
    async fn fetch_candles(&self, request: &CandleRequest) -> Result<CandlePage, SourceError>;

    /// Find the pairs indexed for a token or pair address.
    async fn search_pair(&self, address: &str, chain: ChainId)
    -> Result<Vec<PairHit>, SourceError>;

    /// API version token for a pair's candle history, if the source has one.
    async fn history_status(
        &self,
        pair_address: &str,
        chain: ChainId,
    ) -> Result<Option<String>, SourceError>;

    /// Map an address to the pair id the candle endpoints are keyed by.
    async fn resolve_pair_handle(
        &self,
        address: &str,
        chain: ChainId,
    ) -> Result<Option<String>, SourceError> {
        let hits = self.search_pair(address, chain).await?;
        Ok(hits.into_iter().next().map(|hit| hit.id))
    }

    /// Return the pair's API version only if the current week actually has
    /// candles. Any failure is logged and reported as no history.
    async fn check_has_history(
        &self,
        pair_address: &str,
        chain: ChainId,
        now_ms: i64,
    ) -> Option<String> {
        let version = match self.history_status(pair_address, chain).await {
            Ok(Some(version)) => version,
            Ok(None) => return None,
            Err(e) => {
                warn!("{pair_address}: history status failed: {e}");
                return None;
            }
        };

        let probe = CandleRequest {
            chain,
            pair_address: pair_address.to_string(),
            api_version: version.clone(),
            bucket_ts: Span::Week.floor(now_ms),
            span: Span::Week,
            resolution: "15m".to_string(),
        };
        match self.fetch_candles(&probe).await {
            Ok(page) if !page.candles.is_empty() => Some(version),
            Ok(_) => {
                debug!("{pair_address}: version {version} has no candles this week");
                None
            }
            Err(e) => {
                warn!("{pair_address}: history probe failed: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl<T: CandleSource + ?Sized> CandleSource for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn fetch_candles(&self, request: &CandleRequest) -> Result<CandlePage, SourceError> {
        (**self).fetch_candles(request).await
    }

    async fn search_pair(
        &self,
        address: &str,
        chain: ChainId,
    ) -> Result<Vec<PairHit>, SourceError> {
        (**self).search_pair(address, chain).await
    }

    async fn history_status(
        &self,
        pair_address: &str,
        chain: ChainId,
    ) -> Result<Option<String>, SourceError> {
        (**self).history_status(pair_address, chain).await
    }
}
