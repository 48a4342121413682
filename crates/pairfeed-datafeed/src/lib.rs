pub mod datafeed;
pub mod dextools;
pub mod error;
pub mod source;
