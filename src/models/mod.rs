//! Data models for market state, signals, positions, orders and trades.

mod indicators;
mod market;
mod position;
mod signal;
mod strategy;
mod trade;

pub use indicators::{IndicatorSnapshot, Timeframe};
pub use market::{BookLevel, BookSide, MarketState, OrderBookState, Wall};
pub use position::{Order, OrderRole, OrderSide, OrderStatus, Position, PositionSide, PositionStatus};
pub use signal::{Direction, InvalidSignal, Levels, Signal};
pub use strategy::{StrategyKind, StrategyRecord};
pub use trade::{calculate_pnl, AccountBalanceSnapshot, DailyPerformance, ExitReason, Trade};
