//! Position and order records owned by the executor/monitor pair.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    /// Order side that opens a position on this side.
    pub fn opening_order(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position on this side.
    pub fn closing_order(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

impl FromStr for PositionSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            other => Err(format!("unknown position side: {}", other)),
        }
    }
}

/// OPEN -> CLOSED, once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSED" => Ok(PositionStatus::Closed),
            other => Err(format!("unknown position status: {}", other)),
        }
    }
}

/// A holding opened from an admitted signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Store id; zero until persisted
    pub id: i64,
    pub instrument: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,

    /// Owning strategy name
    pub strategy: String,
    pub signal_id: Option<i64>,
}

impl Position {
    pub fn open(
        instrument: impl Into<String>,
        side: PositionSide,
        entry_price: Decimal,
        quantity: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            instrument: instrument.into(),
            side,
            entry_price,
            quantity,
            current_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            stop_loss,
            take_profit,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            strategy: strategy.into(),
            signal_id: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Realized/unrealized P&L at `price`.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => (price - self.entry_price) * self.quantity,
            PositionSide::Short => (self.entry_price - price) * self.quantity,
        }
    }

    /// Update mark price and unrealized P&L.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = self.pnl_at(price);
    }

    pub fn cost_basis(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    pub fn market_value(&self) -> Decimal {
        self.current_price * self.quantity
    }

    /// Unrealized P&L in percent of cost basis.
    pub fn pnl_pct(&self) -> Decimal {
        let basis = self.cost_basis();
        if basis.is_zero() {
            return Decimal::ZERO;
        }
        self.unrealized_pnl / basis * Decimal::ONE_HUNDRED
    }

    pub fn holding_duration(&self, now: DateTime<Utc>) -> Duration {
        now - self.opened_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
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
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderRole {
    Open,
    Close,
}

impl OrderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderRole::Open => "OPEN",
            OrderRole::Close => "CLOSE",
        }
    }
}

impl FromStr for OrderRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(OrderRole::Open),
            "CLOSE" => Ok(OrderRole::Close),
            other => Err(format!("unknown order role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Filled,
    /// Closed locally without a venue order (reconciliation)
    Reconciled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Filled => "FILLED",
            OrderStatus::Reconciled => "RECONCILED",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FILLED" => Ok(OrderStatus::Filled),
            "RECONCILED" => Ok(OrderStatus::Reconciled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// Venue order attached to a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub position_id: i64,
    pub role: OrderRole,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
