//! Stand-in market data feed
//!
//! Produces a price around a per-symbol base, perturbed by a bounded random
//! factor. The random source is injected so tests can fix the seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::common::errors::{LedgerError, Result};
use crate::common::traits::PriceFeed;
use crate::common::types::round_money;
use crate::config::types::PricingConfig;

/// Basis points in one unit
const BPS_PER_UNIT: i64 = 10_000;

/// Synthetic price generator
pub struct SyntheticPriceFeed {
    base_prices: BTreeMap<String, Decimal>,
    default_base: Decimal,
    /// Maximum deviation either side of the base, in basis points
    max_variation_bps: i64,
    rng: Mutex<StdRng>,
}

impl SyntheticPriceFeed {
    /// Create a feed seeded from system entropy
    pub fn new(config: &PricingConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a feed with a fixed seed for reproducible prices
    pub fn with_seed(config: &PricingConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    /// Create a feed around an explicit random source
    pub fn with_rng(config: &PricingConfig, rng: StdRng) -> Self {
        let max_variation_bps = (config.max_variation_percent.abs() * dec!(100))
            .round()
            .to_i64()
            .unwrap_or(0)
            .min(BPS_PER_UNIT);

        Self {
            base_prices: config
                .base_prices
                .iter()
                .map(|(symbol, price)| (symbol.to_uppercase(), *price))
                .collect(),
            default_base: config.default_base_price,
            max_variation_bps,
            rng: Mutex::new(rng),
        }
    }

    /// Base price a symbol's quotes vary around
    pub fn base_price(&self, symbol: &str) -> Decimal {
        self.base_prices
            .get(&symbol.to_uppercase())
            .copied()
            .unwrap_or(self.default_base)
    }

    /// Inclusive range every quote for a symbol falls into
    pub fn price_bounds(&self, symbol: &str) -> (Decimal, Decimal) {
        let base = self.base_price(symbol);
        let spread = Decimal::new(self.max_variation_bps, 4);
        (
            round_money(base * (Decimal::ONE - spread)),
            round_money(base * (Decimal::ONE + spread)),
        )
    }
}

impl PriceFeed for SyntheticPriceFeed {
    fn quote(&self, symbol: &str) -> Result<Decimal> {
        let variation_bps = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| LedgerError::Internal("price feed rng lock poisoned".to_string()))?;
            rng.gen_range(-self.max_variation_bps..=self.max_variation_bps)
        };

        let base = self.base_price(symbol);
        let factor = Decimal::ONE + Decimal::new(variation_bps, 4);
        Ok(round_money(base * factor))
    }
}
