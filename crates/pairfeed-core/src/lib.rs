pub mod bucket;
pub mod candle;
pub mod chain;
pub mod error;
pub mod merge;
pub mod schema;
