//! Day-ahead energy prices per timeslot.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Price series construction failure.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("energy price history must contain at least one price")]
pub struct EmptyPrices;

/// Energy prices (€/kWh), one per timeslot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyPriceHistory {
    pub date: Option<String>,
    prices: Vec<f64>,
}

impl EnergyPriceHistory {
    /// # Errors
    ///
    /// Returns [`EmptyPrices`] if `prices` is empty.
    pub fn new(prices: Vec<f64>, date: Option<String>) -> Result<Self, EmptyPrices> {
        if prices.is_empty() {
            return Err(EmptyPrices);
        }
        Ok(Self { date, prices })
    }

    /// Same price in every one of `timeslots` slots.
    pub fn flat(price: f64, timeslots: usize) -> Self {
        Self {
            date: None,
            prices: vec![price; timeslots.max(1)],
        }
    }

    /// Price at timeslot `k`. Slots past the end repeat the last price.
    pub fn price(&self, k: usize) -> f64 {
        self.prices
            .get(k)
            .or_else(|| self.prices.last())
            .copied()
            .unwrap_or(0.0)
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn highest(&self) -> f64 {
        self.prices.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Prices of timeslots `start..=end`, clamped to the series.
    pub fn trim(&self, start: usize, end: usize) -> Result<Self, EmptyPrices> {
        let end = end.min(self.prices.len().saturating_sub(1));
        let prices = self.prices.get(start..=end).map(<[f64]>::to_vec).unwrap_or_default();
        Self::new(prices, self.date.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert_eq!(EnergyPriceHistory::new(Vec::new(), None), Err(EmptyPrices));
    }

    #[test]
    fn lookup_and_trim() {
        let h = EnergyPriceHistory::new(vec![0.3, 0.1, 0.5, 0.2], None).expect("non-empty");
        assert_eq!(h.price(2), 0.5);
        assert_eq!(h.price(10), 0.2);
        assert_eq!(h.highest(), 0.5);
        let trimmed = h.trim(1, 2).ok();
        assert_eq!(trimmed.map(|t| t.prices().to_vec()), Some(vec![0.1, 0.5]));
        assert!(h.trim(5, 6).is_err());
    }
}
