use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// OHLCV candlestick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Direction of an exposure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side that opens an exposure in this direction
    pub fn entry_order_side(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that flattens an exposure in this direction
    pub fn exit_order_side(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "long" => Some(Side::Long),
            "short" => Some(Side::Short),
            _ => None,
        }
    }

    /// Realized P&L of a round trip, positive when the move favoured the side
    pub fn pnl(self, entry_price: f64, exit_price: f64, quantity: f64) -> f64 {
        match self {
            Side::Long => (exit_price - entry_price) * quantity,
            Side::Short => (entry_price - exit_price) * quantity,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(OrderSide::Buy),
            "SELL" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy output for one pair
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Decision {
    EnterLong(f64),
    EnterShort(f64),
    Exit,
    Hold,
}

impl Decision {
    /// Side and quantity when the decision opens a position
    pub fn entry(&self) -> Option<(Side, f64)> {
        match *self {
            Decision::EnterLong(quantity) => Some((Side::Long, quantity)),
            Decision::EnterShort(quantity) => Some((Side::Short, quantity)),
            _ => None,
        }
    }
}

/// Free and locked amount of one asset
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct AssetBalance {
    pub available: f64,
    pub locked: f64,
}

impl AssetBalance {
    pub fn total(&self) -> f64 {
        self.available + self.locked
    }
}

/// Exchange balances keyed by asset
pub type Balance = BTreeMap<String, AssetBalance>;

/// Convert a `BASE/QUOTE` pair to the exchange symbol (`BTC/USDT` -> `BTCUSDT`)
pub fn exchange_symbol(pair: &str) -> String {
    pair.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Quote asset of a `BASE/QUOTE` pair
pub fn quote_asset(pair: &str) -> Option<&str> {
    pair.split_once('/').map(|(_, quote)| quote)
}
