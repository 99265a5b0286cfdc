use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::common::errors::{LedgerError, Result};
use crate::common::types::round_money;
use crate::config::types::FeeRates;

/// Fees charged on one reward, in INR
///
/// Each component is rounded to paise on its own; `total` is the exact sum
/// of the rounded components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub brokerage: Decimal,
    pub stt: Decimal,
    /// GST on the brokerage component only
    pub gst: Decimal,
    pub sebi: Decimal,
    pub stamp_duty: Decimal,
    pub total: Decimal,
}

impl FeeBreakdown {
    /// Itemized text used on the fee ledger entry
    pub fn describe(&self) -> String {
        format!(
            "Brokerage: {:.2}, STT: {:.2}, GST: {:.2}, SEBI: {:.2}, Stamp duty: {:.2}",
            self.brokerage, self.stt, self.gst, self.sebi, self.stamp_duty
        )
    }
}

/// Fee calculation from a configured rate table
///
/// No side effects and no I/O.
#[derive(Debug, Clone)]
pub struct FeeCalculator {
    rates: FeeRates,
}

impl FeeCalculator {
    pub fn new(rates: FeeRates) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> &FeeRates {
        &self.rates
    }

    /// Compute the fee breakdown for a stock value
    ///
    /// # Arguments
    /// * `stock_value` - INR value of the granted shares (quantity × price)
    ///
    /// # Errors
    /// `Validation` when a component or the total does not fit in a `Decimal`.
    pub fn compute_fees(&self, stock_value: Decimal) -> Result<FeeBreakdown> {
        let brokerage_raw = percent_of(stock_value, self.rates.brokerage_percent)?;

        let brokerage = round_money(brokerage_raw);
        let stt = round_money(percent_of(stock_value, self.rates.stt_percent)?);
        // GST is levied on brokerage, not on the stock value
        let gst = round_money(percent_of(brokerage_raw, self.rates.gst_on_brokerage_percent)?);
        let sebi = round_money(percent_of(stock_value, self.rates.sebi_charges_percent)?);
        let stamp_duty = round_money(percent_of(stock_value, self.rates.stamp_duty_percent)?);

        let total = [stt, gst, sebi, stamp_duty]
            .into_iter()
            .try_fold(brokerage, |sum, fee| sum.checked_add(fee))
            .ok_or_else(|| too_large(stock_value))?;

        Ok(FeeBreakdown {
            brokerage,
            stt,
            gst,
            sebi,
            stamp_duty,
            total,
        })
    }
}

fn percent_of(value: Decimal, percent: Decimal) -> Result<Decimal> {
    value
        .checked_mul(percent)
        .and_then(|v| v.checked_div(dec!(100)))
        .ok_or_else(|| too_large(value))
}

fn too_large(value: Decimal) -> LedgerError {
    LedgerError::Validation(format!("fees on stock value {} are out of range", value))
}
