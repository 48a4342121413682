use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use pairfeed_core::bucket::LiveTimeframe;
use pairfeed_core::candle::Candle;
use pairfeed_core::chain::ChainId;
use pairfeed_core::schema;
use pairfeed_datafeed::datafeed::{
    Datafeed, DatafeedConfig, HistoryMetadata, PairSelection, PeriodParams, ResolutionPolicy,
    SymbolInfo,
};
use pairfeed_datafeed::dextools::DextoolsSource;
use pairfeed_datafeed::error::DatafeedError;
use pairfeed_datafeed::source::CandleSource;
use tracing::{debug, info, warn};

/// Bar requests issued per `bars` run before giving up on reaching `start`.
const MAX_PULLS: usize = 4;

#[derive(Parser)]
#[command(name = "pairfeed", about = "Inspect candle history of DEX pairs")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the pair id for an address and check it has candle history
    Pair {
        /// Network name or numeric chain id
        #[arg(long)]
        chain: ChainId,

        /// Token or pair address
        #[arg(long)]
        address: String,
    },

    /// Resolve the chart symbol for a pair
    Symbol {
        #[command(flatten)]
        pair: PairArgs,
    },

    /// Pull bars for a pair the way a chart host would
    Bars {
        #[command(flatten)]
        pair: PairArgs,

        /// Look-back window ending now: 1h, 4h, 1d, 1w, 1m, 6m
        #[arg(long, default_value = "1w")]
        window: LiveTimeframe,

        /// Start date (YYYY-MM-DD), overrides --window
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Chart resolution: 1, 3, 5, 15, 30, 1H, 2H, 4H
        #[arg(long, default_value = "15")]
        resolution: String,

        /// Request the chart resolution upstream instead of fixed 15m candles
        #[arg(long)]
        follow_resolution: bool,

        /// Maximum month buckets fetched per backfill
        #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(u32).range(1..))]
        max_buckets: u32,

        /// Print bars as JSON
        #[arg(long)]
        json: bool,

        /// Write the returned bars to a Parquet file
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

#[derive(Args)]
struct PairArgs {
    /// Network name or numeric chain id
    #[arg(long)]
    chain: ChainId,

    /// Pair address as indexed by the candle source
    #[arg(long)]
    pair: String,

    /// Candle API version (probed from the source if omitted)
    #[arg(long)]
    api_version: Option<String>,

    /// Symbol of the non-native token
    #[arg(long)]
    token: String,

    /// Display native/token instead of token/native
    #[arg(long)]
    reverse: bool,
}

async fn pair_selection(source: &Arc<DextoolsSource>, args: &PairArgs) -> Result<PairSelection> {
    let api_version = match &args.api_version {
        Some(v) => v.clone(),
        None => source
            .check_has_history(&args.pair, args.chain, Utc::now().timestamp_millis())
            .await
            .with_context(|| format!("{}: no candle history on {}", args.pair, args.chain))?,
    };
    debug!("{}: using api version {api_version}", args.pair);

    Ok(PairSelection {
        chain: args.chain,
        pair_address: args.pair.clone(),
        api_version,
        token_symbol: args.token.clone(),
        is_reverse: args.reverse,
    })
}

async fn resolve(feed: &Datafeed) -> Result<SymbolInfo> {
    let outcome = Cell::new(None);
    feed.resolve_symbol(
        &feed.pair().label(),
        |info| outcome.set(Some(Ok(info))),
        |e| outcome.set(Some(Err(e))),
    )
    .await;
    match outcome.into_inner() {
        Some(result) => Ok(result?),
        None => anyhow::bail!("symbol resolution did not complete"),
    }
}

async fn get_bars(
    feed: &Datafeed,
    info: &SymbolInfo,
    resolution: &str,
    period: PeriodParams,
) -> Result<Option<(Vec<Candle>, HistoryMetadata)>> {
    let outcome: Cell<Option<Result<_, DatafeedError>>> = Cell::new(None);
    feed.get_bars(
        info,
        resolution,
        period,
        |bars, meta| outcome.set(Some(Ok((bars, meta)))),
        |e| outcome.set(Some(Err(e))),
    )
    .await;
    Ok(outcome.into_inner().transpose()?)
}

async fn cmd_pair(source: &Arc<DextoolsSource>, chain: ChainId, address: &str) -> Result<()> {
    if !chain.is_supported() {
        warn!("chain {chain} has no candle network segment, requests will likely fail");
    }

    let Some(pair) = source
        .resolve_pair_handle(address, chain)
        .await
        .with_context(|| format!("pair search failed for {address}"))?
    else {
        println!("{address}: no pair found on {chain}");
        return Ok(());
    };

    match source
        .check_has_history(&pair, chain, Utc::now().timestamp_millis())
        .await
    {
        Some(version) => println!("{address}: pair {pair}, candle api version {version}"),
        None => println!("{address}: pair {pair}, no candle history"),
    }
    Ok(())
}

async fn cmd_symbol(source: Arc<DextoolsSource>, args: &PairArgs) -> Result<()> {
    let selection = pair_selection(&source, args).await?;
    let feed = Datafeed::new(source, selection);
    let info = resolve(&feed).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_bars(
    source: Arc<DextoolsSource>,
    args: &PairArgs,
    window: LiveTimeframe,
    start: Option<NaiveDate>,
    resolution: &str,
    config: DatafeedConfig,
    json: bool,
    export: Option<&Path>,
) -> Result<()> {
    let selection = pair_selection(&source, args).await?;
    let feed = Datafeed::new(source, selection).with_config(config);

    let mut supported = Vec::new();
    feed.on_ready(|c| supported = c.supported_resolutions).await;
    if !supported.iter().any(|r| r.eq_ignore_ascii_case(resolution)) {
        anyhow::bail!(
            "unsupported resolution {resolution}. Expected one of: {}",
            supported.join(", ")
        );
    }

    let info = resolve(&feed).await?;
    info!("{}: pricescale {}", info.ticker, info.pricescale);

    let now = Utc::now().timestamp();
    let from = match start {
        Some(date) => date
            .and_hms_opt(0, 0, 0)
            .context("invalid start date")?
            .and_utc()
            .timestamp(),
        None => now - window.millis() / 1000,
    };
    let period = PeriodParams { from, to: now };

    // A chart host keeps asking for the same range while older history is
    // still being backfilled.
    let mut result = None;
    for pull in 1..=MAX_PULLS {
        let Some((bars, meta)) = get_bars(&feed, &info, resolution, period).await? else {
            continue;
        };
        let covered = feed
            .cached_series()
            .first()
            .is_some_and(|c| c.time <= from * 1000);
        info!(
            "{}: pull {pull}: {} bar(s), noData={}",
            info.ticker,
            bars.len(),
            meta.no_data
        );
        let done = meta.no_data || covered;
        result = Some(bars);
        if done {
            break;
        }
    }
    let bars = result.unwrap_or_default();

    if json {
        println!("{}", serde_json::to_string_pretty(&bars)?);
    } else {
        for c in &bars {
            let ts = c
                .timestamp()
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| c.time.to_string());
            println!("{ts}  o={} h={} l={} c={}", c.open, c.high, c.low, c.close);
        }
        println!("{}: {} bar(s)", info.ticker, bars.len());
    }

    if let Some(path) = export {
        schema::write_parquet(path, &bars)
            .with_context(|| format!("failed to export bars to {}", path.display()))?;
        info!("wrote {} bar(s) to {}", bars.len(), path.display());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let source = Arc::new(DextoolsSource::from_env().context("failed to create candle source")?);
    info!("Using candle source {} at {}", source.name(), source.base_url());

    match &cli.command {
        Commands::Pair { chain, address } => {
            cmd_pair(&source, *chain, address).await?;
        }
        Commands::Symbol { pair } => {
            cmd_symbol(source, pair).await?;
        }
        Commands::Bars {
            pair,
            window,
            start,
            resolution,
            follow_resolution,
            max_buckets,
            json,
            export,
        } => {
            let config = DatafeedConfig {
                resolution: if *follow_resolution {
                    ResolutionPolicy::FollowRequested
                } else {
                    ResolutionPolicy::default()
                },
                max_backfill_buckets: *max_buckets as usize,
            };
            cmd_bars(
                source,
                pair,
                *window,
                *start,
                resolution,
                config,
                *json,
                export.as_deref(),
            )
            .await?;
        }
    }

    Ok(())
}
