use std::collections::HashMap;

use async_trait::async_trait;
use pairfeed_core::candle::Candle;
use pairfeed_core::chain::ChainId;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::SourceError;
use crate::source::{CandlePage, CandleRequest, CandleSource, PairHit};

const DEXTOOLS_API_URL: &str = "https://pancake-subgraph-proxy.kyberswap.com/dextools";

/// Addresses whose pair id is known up front, so search is skipped.
/// Keys are stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairAliases {
    entries: HashMap<String, String>,
}

impl PairAliases {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, address: &str, pair_id: &str) {
        self.entries
            .insert(address.to_lowercase(), pair_id.to_string());
    }

    /// Case-insensitive lookup.
    pub fn get(&self, address: &str) -> Option<&str> {
        self.entries
            .get(&address.to_lowercase())
            .map(String::as_str)
    }
}

impl Default for PairAliases {
    fn default() -> Self {
        let mut aliases = Self::empty();
        aliases.insert(
            "0x7fc66500c84a76ad7e9c93437bfc5ac33e2ddae9",
            "0xd75ea151a61d06868e31f8988d28dfe5e9df57b4",
        );
        aliases
    }
}

/// Candle source backed by the DEXTools proxy used by the exchange front end.
/// No authentication required. Candles are served in month or week buckets.
pub struct DextoolsSource {
    client: Client,
    base_url: String,
    aliases: PairAliases,
}

impl DextoolsSource {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(DEXTOOLS_API_URL.to_string())
    }

    /// Create with a custom base URL (for testing or a self-hosted proxy).
    pub fn with_base_url(base_url: String) -> Result<Self, SourceError> {
        let client = Client::builder().user_agent("Mozilla/5.0").build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            aliases: PairAliases::default(),
        })
    }

    /// Create from the optional `DEXTOOLS_API_URL` environment variable,
    /// falling back to the public proxy.
    pub fn from_env() -> Result<Self, SourceError> {
        match std::env::var("DEXTOOLS_API_URL") {
            Ok(url) if url.trim().is_empty() => Err(SourceError::Config(
                "DEXTOOLS_API_URL is set but empty".into(),
            )),
            Ok(url) => Self::with_base_url(url),
            Err(_) => Self::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: PairAliases) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_url(&self, chain: ChainId, endpoint: &str) -> String {
        format!(
            "{}/{}/api/{}",
            self.base_url,
            chain.network_segment(),
            endpoint
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        debug!("GET {url} {query:?}");
        let response = self.client.get(url).query(query).send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(SourceError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status,
                message: body,
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| SourceError::Parse(format!("failed to parse response: {e}")))
    }
}

fn candles_query(request: &CandleRequest) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("sym", "eth".to_string()),
        ("span", request.span.as_str().to_string()),
        ("pair", request.pair_address.clone()),
        ("ts", request.bucket_ts.to_string()),
        ("v", request.api_version.clone()),
    ];
    if !request.resolution.is_empty() {
        query.push(("res", request.resolution.clone()));
    }
    query
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    #[serde(default)]
    data: Option<CandlesData>,
}

#[derive(Debug, Deserialize)]
struct CandlesData {
    #[serde(default)]
    candles: Vec<Candle>,
    #[serde(default, rename = "oldestTs")]
    oldest_ts: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// `oldestTs` arrives as a numeric string; a plain number is accepted too.
fn parse_timestamp(value: &serde_json::Value) -> Option<i64> {
    let ts = match value {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        serde_json::Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    ts.is_finite().then_some(ts as i64)
}

fn parse_version(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn into_page(response: CandlesResponse) -> CandlePage {
    match response.data {
        Some(data) => CandlePage {
            oldest_ts: data.oldest_ts.as_ref().and_then(parse_timestamp),
            candles: data.candles,
        },
        None => CandlePage::default(),
    }
}

#[async_trait]
impl CandleSource for DextoolsSource {
    fn name(&self) -> &str {
        "dextools"
    }

    async fn fetch_candles(&self, request: &CandleRequest) -> Result<CandlePage, SourceError> {
        let url = self.endpoint_url(request.chain, "Pancakeswap/history/candles");
        let response: CandlesResponse = self.get_json(&url, &candles_query(request)).await?;
        Ok(into_page(response))
    }

    async fn search_pair(
        &self,
        address: &str,
        chain: ChainId,
    ) -> Result<Vec<PairHit>, SourceError> {
        if let Some(pair_id) = self.aliases.get(address) {
            debug!("{address}: using aliased pair {pair_id}");
            return Ok(vec![PairHit {
                id: pair_id.to_string(),
            }]);
        }

        let url = self.endpoint_url(chain, "pair/search");
        self.get_json(&url, &[("s", address.to_string())]).await
    }

    async fn history_status(
        &self,
        pair_address: &str,
        chain: ChainId,
    ) -> Result<Option<String>, SourceError> {
        let url = self.endpoint_url(chain, "Uniswap/1/history-candle-status");
        let response: StatusResponse = self
            .get_json(&url, &[("pair", pair_address.to_string())])
            .await?;
        Ok(response.data.as_ref().and_then(parse_version))
    }
}
