//! Price feed, latest-price cache and scheduled refresh

pub mod cache;
pub mod feed;

pub use cache::{PriceCache, RefreshReport};
pub use feed::SyntheticPriceFeed;
