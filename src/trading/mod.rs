//! Trading logic: selection, admission, execution and exit supervision.

mod config;
mod executor;
mod ledger;
mod monitor;
mod position_sizer;
mod risk;
mod selector;

pub use config::{
    ExecutionConfig, MarketDataConfig, MonitorConfig, RiskConfig, ScheduleConfig, TradeMode,
};
pub use executor::Executor;
pub use ledger::{Ledger, LedgerState};
pub use monitor::PositionMonitor;
pub use position_sizer::PositionSizer;
pub use risk::{DailyLossTracker, RiskGate};
pub use selector::SignalSelector;
