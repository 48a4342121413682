//! Chart datafeed for a single DEX pair.
//!
//! [`Datafeed`] answers a charting host's pull requests from an in-memory
//! series that only ever grows backward in time. The series is seeded from
//! the current month bucket and extended one month bucket at a time when the
//! host scrolls past its earliest bar. Only one fetch section runs at a time.
//! A request arriving while one is in flight is dropped, and the host is
//! expected to poll again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use pairfeed_core::bucket::{Span, plan_backfill};
use pairfeed_core::candle::Candle;
use pairfeed_core::chain::ChainId;
use pairfeed_core::merge::{invert, merge_sorted, select_range, smooth_discontinuities};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::DatafeedError;
use crate::source::{CandlePage, CandleRequest, CandleSource};

/// Resolutions offered to the chart host.
pub const SUPPORTED_RESOLUTIONS: [&str; 8] = ["1", "3", "5", "15", "30", "1H", "2H", "4H"];

const DEFAULT_RESOLUTION: &str = "15";
const DEFAULT_PRICE_SCALE: u64 = 100;

/// Static configuration handed to the host from `on_ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatafeedConfiguration {
    pub supported_resolutions: Vec<String>,
}

impl Default for DatafeedConfiguration {
    fn default() -> Self {
        Self {
            supported_resolutions: SUPPORTED_RESOLUTIONS.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Which upstream candle resolution to request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionPolicy {
    /// Always request this upstream resolution, whatever the host asks for.
    Fixed(String),
    /// Map the host's resolution onto the matching upstream one.
    FollowRequested,
}

impl ResolutionPolicy {
    pub fn upstream(&self, requested: &str) -> String {
        match self {
            ResolutionPolicy::Fixed(res) => res.clone(),
            ResolutionPolicy::FollowRequested => upstream_resolution(requested).to_string(),
        }
    }
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        ResolutionPolicy::Fixed("15m".to_string())
    }
}

/// Upstream resolution string for a host resolution. Unknown values fall
/// back to 15 minutes.
pub fn upstream_resolution(requested: &str) -> &'static str {
    match requested.to_uppercase().as_str() {
        "1" => "1m",
        "3" => "3m",
        "5" => "5m",
        "15" => "15m",
        "30" => "30m",
        "60" | "1H" => "1h",
        "120" | "2H" => "2h",
        "240" | "4H" => "4h",
        _ => "15m",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatafeedConfig {
    pub resolution: ResolutionPolicy,
    /// Upper bound on month buckets fetched by one backfill. Zero is read as one.
    pub max_backfill_buckets: usize,
}

impl Default for DatafeedConfig {
    fn default() -> Self {
        Self {
            resolution: ResolutionPolicy::default(),
            max_backfill_buckets: 24,
        }
    }
}

/// The pair a chart is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairSelection {
    pub chain: ChainId,
    pub pair_address: String,
    pub api_version: String,
    /// Symbol of the non-native token in the pair.
    pub token_symbol: String,
    /// The source indexes the pair in the opposite direction to the one displayed.
    pub is_reverse: bool,
}

impl PairSelection {
    /// Ticker label, e.g. `KNC/ETH`, or `ETH/KNC` for a reverse pair.
    pub fn label(&self) -> String {
        let native = self.chain.native_symbol();
        if self.is_reverse {
            format!("{native}/{}", self.token_symbol)
        } else {
            format!("{}/{native}", self.token_symbol)
        }
    }
}

/// Symbol descriptor in the shape chart hosts expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolInfo {
    pub ticker: String,
    pub name: String,
    pub full_name: String,
    pub listed_exchange: String,
    pub format: String,
    pub description: String,
    #[serde(rename = "type")]
    pub symbol_type: String,
    pub session: String,
    pub timezone: String,
    pub exchange: String,
    pub minmov: u32,
    pub pricescale: u64,
    pub has_intraday: bool,
    pub has_empty_bars: bool,
    pub has_weekly_and_monthly: bool,
    pub supported_resolutions: Vec<String>,
    pub data_status: String,
}

impl SymbolInfo {
    fn for_label(label: String, pricescale: u64) -> Self {
        Self {
            ticker: label.clone(),
            name: label.clone(),
            full_name: label.clone(),
            listed_exchange: String::new(),
            format: "price".to_string(),
            description: label,
            symbol_type: "crypto".to_string(),
            session: "24x7".to_string(),
            timezone: "Etc/UTC".to_string(),
            exchange: String::new(),
            minmov: 1,
            pricescale,
            has_intraday: true,
            has_empty_bars: true,
            has_weekly_and_monthly: true,
            supported_resolutions: DatafeedConfiguration::default().supported_resolutions,
            data_status: "streaming".to_string(),
        }
    }
}

/// Requested bar range, in seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeriodParams {
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HistoryMetadata {
    /// No older history exists upstream.
    #[serde(rename = "noData")]
    pub no_data: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryBatch {
    pub bars: Vec<Candle>,
    pub meta: HistoryMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesState {
    /// Nothing fetched yet.
    Empty,
    /// A fetch section is in flight.
    Backfilling,
    /// Bars cached and no fetch in flight.
    Ready,
}

/// Source of "now" in milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Default)]
struct SeriesCache {
    series: Vec<Candle>,
    /// Earliest timestamp the source has data for; 0 if unknown.
    oldest_known_time: i64,
    upstream_resolution: Option<String>,
}

/// Holds the in-flight flag for as long as it lives.
struct FetchGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FetchGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Candle series adapter for one pair on one chain.
pub struct Datafeed {
    source: Box<dyn CandleSource>,
    pair: PairSelection,
    config: DatafeedConfig,
    clock: Box<dyn Clock>,
    cache: Mutex<SeriesCache>,
    fetch_in_progress: AtomicBool,
}

impl Datafeed {
    pub fn new(source: impl CandleSource + 'static, pair: PairSelection) -> Self {
        Self {
            source: Box::new(source),
            pair,
            config: DatafeedConfig::default(),
            clock: Box::new(SystemClock),
            cache: Mutex::new(SeriesCache::default()),
            fetch_in_progress: AtomicBool::new(false),
        }
    }

    pub fn with_config(mut self, config: DatafeedConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn pair(&self) -> &PairSelection {
        &self.pair
    }

    pub fn series_state(&self) -> SeriesState {
        if self.fetch_in_progress.load(Ordering::Acquire) {
            return SeriesState::Backfilling;
        }
        if self.lock_cache().series.is_empty() {
            SeriesState::Empty
        } else {
            SeriesState::Ready
        }
    }

    /// Copy of the cached series, unsmoothed and in source direction.
    pub fn cached_series(&self) -> Vec<Candle> {
        self.lock_cache().series.clone()
    }

    pub fn oldest_known_time(&self) -> i64 {
        self.lock_cache().oldest_known_time
    }

    pub fn configuration(&self) -> DatafeedConfiguration {
        DatafeedConfiguration::default()
    }

    /// Hand the static configuration to the host on the next scheduler tick.
    pub async fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce(DatafeedConfiguration),
    {
        tokio::task::yield_now().await;
        callback(self.configuration());
    }

    /// Resolve the chart symbol, reporting failures through `on_error`.
    pub async fn resolve_symbol<R, E>(&self, symbol_name: &str, on_resolved: R, on_error: E)
    where
        R: FnOnce(SymbolInfo),
        E: FnOnce(DatafeedError),
    {
        match self.try_resolve_symbol(symbol_name).await {
            Ok(info) => on_resolved(info),
            Err(e) => {
                error!("[resolveSymbol] {symbol_name}: {e}");
                on_error(e);
            }
        }
    }

    /// Build the symbol descriptor, seeding the price scale from the current
    /// week's first candle.
    pub async fn try_resolve_symbol(&self, symbol_name: &str) -> Result<SymbolInfo, DatafeedError> {
        if self.pair.pair_address.is_empty() {
            return Err(DatafeedError::MissingPair);
        }

        let label = self.pair.label();
        if !symbol_name.is_empty() && symbol_name != label {
            debug!("host asked for {symbol_name}, resolving as {label}");
        }

        let resolution = self.config.resolution.upstream(DEFAULT_RESOLUTION);
        let bucket_ts = Span::Week.floor(self.clock.now_ms());
        let reference = self
            .fetch_page(bucket_ts, Span::Week, &resolution)
            .await
            .and_then(|page| page.candles.iter().min_by_key(|c| c.time).map(|c| c.open));

        let pricescale = price_scale(reference, self.pair.is_reverse)?;
        Ok(SymbolInfo::for_label(label, pricescale))
    }

    /// Answer a host bar request through its callbacks. A request dropped
    /// because a fetch is in flight invokes neither callback.
    pub async fn get_bars<H, E>(
        &self,
        symbol_info: &SymbolInfo,
        resolution: &str,
        period: PeriodParams,
        on_history: H,
        on_error: E,
    ) where
        H: FnOnce(Vec<Candle>, HistoryMetadata),
        E: FnOnce(DatafeedError),
    {
        match self.fetch_bars(resolution, period).await {
            Ok(Some(batch)) => on_history(batch.bars, batch.meta),
            Ok(None) => {}
            Err(e) => {
                error!("[getBars] {}: {e}", symbol_info.ticker);
                on_error(e);
            }
        }
    }

    /// Bars strictly inside `period`, backfilling the cache as needed.
    ///
    /// Returns `Ok(None)` if another fetch is in flight.
    pub async fn fetch_bars(
        &self,
        resolution: &str,
        period: PeriodParams,
    ) -> Result<Option<HistoryBatch>, DatafeedError> {
        let Some(guard) = FetchGuard::try_acquire(&self.fetch_in_progress) else {
            debug!("fetch in progress, dropping request {period:?}");
            return Ok(None);
        };

        if self.pair.pair_address.is_empty() {
            return Err(DatafeedError::MissingPair);
        }
        let invalid = || DatafeedError::InvalidPeriod {
            from: period.from,
            to: period.to,
        };
        let from_ms = period.from.checked_mul(1000).ok_or_else(invalid)?;
        let to_ms = period.to.checked_mul(1000).ok_or_else(invalid)?;

        let upstream = self.config.resolution.upstream(resolution);
        let (existing, oldest_known) = self.prepare_cache(&upstream);

        let mut no_data = false;
        let series = match existing.first().map(|c| c.time) {
            None => {
                let bucket_ts = Span::Month.floor(self.clock.now_ms());
                let page = self
                    .fetch_page(bucket_ts, Span::Month, &upstream)
                    .await
                    .unwrap_or_default();
                if page.candles.is_empty() {
                    no_data = true;
                }
                debug!(
                    "seeded {} candle(s) from bucket {bucket_ts}, oldest {:?}",
                    page.candles.len(),
                    page.oldest_ts
                );
                let merged = merge_sorted(vec![page.candles], &[]);
                self.commit(merged.clone(), page.oldest_ts);
                merged
            }
            Some(earliest) if earliest > from_ms => {
                let plan = plan_backfill(
                    earliest,
                    from_ms,
                    oldest_known,
                    self.config.max_backfill_buckets.max(1),
                );
                no_data = plan.reached_oldest;
                debug!(
                    "backfilling {} bucket(s) before {earliest} (reached oldest: {})",
                    plan.buckets.len(),
                    plan.reached_oldest
                );

                let fetches = plan
                    .buckets
                    .iter()
                    .map(|&ts| self.fetch_page(ts, Span::Month, &upstream));
                let pages: Vec<CandlePage> = join_all(fetches)
                    .await
                    .into_iter()
                    .flatten()
                    .collect();
                let oldest = pages.iter().find_map(|p| p.oldest_ts);
                let pages = pages.into_iter().map(|p| p.candles).collect();
                let merged = merge_sorted(pages, &existing);
                self.commit(merged.clone(), oldest);
                merged
            }
            Some(_) => existing,
        };
        drop(guard);

        let mut bars = select_range(&smooth_discontinuities(series), from_ms, to_ms);
        if self.pair.is_reverse {
            bars = invert(&bars);
        }
        Ok(Some(HistoryBatch {
            bars,
            meta: HistoryMetadata { no_data },
        }))
    }

    /// Live symbol search is not offered.
    pub fn search_symbols(&self, user_input: &str) {
        debug!("searchSymbols({user_input}) ignored");
    }

    /// Live bar updates are not offered; only historical pulls.
    pub fn subscribe_bars(&self, symbol_info: &SymbolInfo, resolution: &str, listener_guid: &str) {
        debug!(
            "subscribeBars({}, {resolution}, {listener_guid}) ignored",
            symbol_info.ticker
        );
    }

    pub fn unsubscribe_bars(&self, listener_guid: &str) {
        debug!("unsubscribeBars({listener_guid}) ignored");
    }

    /// Snapshot the cache, clearing it first if the upstream resolution changed.
    fn prepare_cache(&self, upstream: &str) -> (Vec<Candle>, i64) {
        let mut cache = self.lock_cache();
        if cache.upstream_resolution.as_deref() != Some(upstream) {
            if !cache.series.is_empty() {
                debug!(
                    "upstream resolution changed {:?} -> {upstream}, clearing cache",
                    cache.upstream_resolution
                );
            }
            *cache = SeriesCache {
                upstream_resolution: Some(upstream.to_string()),
                ..SeriesCache::default()
            };
        }
        (cache.series.clone(), cache.oldest_known_time)
    }

    fn commit(&self, series: Vec<Candle>, oldest: Option<i64>) {
        let mut cache = self.lock_cache();
        cache.series = series;
        if let Some(ts) = oldest {
            cache.oldest_known_time = ts;
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, SeriesCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch one bucket; failures are logged and read as "no candles".
    async fn fetch_page(&self, bucket_ts: i64, span: Span, resolution: &str) -> Option<CandlePage> {
        let request = CandleRequest {
            chain: self.pair.chain,
            pair_address: self.pair.pair_address.clone(),
            api_version: self.pair.api_version.clone(),
            bucket_ts,
            span,
            resolution: resolution.to_string(),
        };
        match self.source.fetch_candles(&request).await {
            Ok(page) => Some(page),
            Err(e) => {
                warn!(
                    "{}: {span} bucket {bucket_ts} fetch from {} failed: {e}",
                    self.pair.pair_address,
                    self.source.name()
                );
                None
            }
        }
    }
}

/// `10^(ceil(log10(reference)) + 5)`, where the reference price is the
/// first open for reverse pairs and its reciprocal otherwise.
fn price_scale(first_open: Option<Decimal>, is_reverse: bool) -> Result<u64, DatafeedError> {
    let Some(open) = first_open.and_then(|o| o.to_f64()) else {
        return Ok(DEFAULT_PRICE_SCALE);
    };
    let reference = if is_reverse { open } else { 1.0 / open };
    if !reference.is_finite() || reference <= 0.0 {
        return Ok(DEFAULT_PRICE_SCALE);
    }

    let exponent = (reference.log10().ceil() as i64 + 5).max(0);
    u32::try_from(exponent)
        .ok()
        .and_then(|e| 10u64.checked_pow(e))
        .ok_or(DatafeedError::PriceScale(reference))
}
