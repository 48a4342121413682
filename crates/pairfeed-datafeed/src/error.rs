use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Source configuration error: {0}")]
    Config(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Errors reported to the chart host through its error callback.
#[derive(Debug, Error)]
pub enum DatafeedError {
    #[error("no pair address selected")]
    MissingPair,

    #[error("invalid period: from {from} to {to}")]
    InvalidPeriod { from: i64, to: i64 },

    #[error("cannot derive a price scale from reference price {0}")]
    PriceScale(f64),
}
