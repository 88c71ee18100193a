use serde::{Deserialize, Serialize};

/// A single long-term position from `GET /portfolio/holdings`.
///
/// Only the fields the snapshot needs are kept; prices can come back as
/// `null` for freshly credited holdings, so they are optional here and
/// read through the accessors below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    #[serde(default)]
    pub tradingsymbol: Option<String>,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub average_price: Option<f64>,
    #[serde(default)]
    pub last_price: Option<f64>,
}

impl Holding {
    pub fn new(symbol: &str, quantity: i64, average_price: f64, last_price: f64) -> Self {
        Self {
            tradingsymbol: Some(symbol.to_string()),
            quantity,
            average_price: Some(average_price),
            last_price: Some(last_price),
        }
    }

    pub fn symbol(&self) -> &str {
        self.tradingsymbol.as_deref().unwrap_or("N/A")
    }

    pub fn average_price(&self) -> f64 {
        self.average_price.unwrap_or(0.0)
    }

    pub fn last_price(&self) -> f64 {
        self.last_price.unwrap_or(0.0)
    }

    /// Unrealised profit/loss: `(ltp - avg) * qty`.
    pub fn pnl(&self) -> f64 {
        (self.last_price() - self.average_price()) * self.quantity as f64
    }
}
