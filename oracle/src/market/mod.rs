pub mod client;
pub mod errors;
pub mod source;
pub mod types;

pub use client::PriceFetcher;
pub use errors::FetchError;
pub use source::{FetchMode, MarketDataSource, PriceSource};
