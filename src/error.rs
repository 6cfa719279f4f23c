//! Engine error taxonomy.
//!
//! Per-instrument failures are values, not panics: the decision loop and the
//! monitor inspect them, log, and move on to the next instrument.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Network or exchange API failure.
    #[error("venue error: {0}")]
    Venue(String),

    #[error("{op} timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },

    #[error("insufficient data for {instrument}: {bars}/{required} bars")]
    InsufficientData {
        instrument: String,
        bars: usize,
        required: usize,
    },

    #[error("rejected: {0}")]
    Rejected(RejectReason),

    /// Duplicate write on a natural key. Callers treat this as a no-op.
    #[error("data conflict: {0}")]
    DataConflict(String),

    #[error("fatal configuration: {0}")]
    FatalConfiguration(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl EngineError {
    /// Whether the next cycle may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Venue(_) | EngineError::Timeout { .. } | EngineError::Store(_)
        )
    }

    pub fn venue(e: impl fmt::Display) -> Self {
        EngineError::Venue(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Venue(e.to_string())
    }
}

/// Why the admission policy or executor refused a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    DailyLossLimit,
    MaxOpenPositions,
    RiskRewardBelowMinimum,
    ConfidenceBelowMinimum,
    PositionTooSmall,
    PositionTooLarge,
    BelowMinNotional,
    InsufficientCapital,
    InvalidLevels,
}

impl RejectReason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DailyLossLimit => "daily_loss_limit",
            Self::MaxOpenPositions => "max_open_positions",
            Self::RiskRewardBelowMinimum => "risk_reward_below_minimum",
            Self::ConfidenceBelowMinimum => "confidence_below_minimum",
            Self::PositionTooSmall => "position_too_small",
            Self::PositionTooLarge => "position_too_large",
            Self::BelowMinNotional => "below_min_notional",
            Self::InsufficientCapital => "insufficient_capital",
            Self::InvalidLevels => "invalid_levels",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::DailyLossLimit => "daily loss limit reached",
            Self::MaxOpenPositions => "open position ceiling reached",
            Self::RiskRewardBelowMinimum => "risk/reward below minimum",
            Self::ConfidenceBelowMinimum => "confidence below minimum",
            Self::PositionTooSmall => "position size below minimum fraction",
            Self::PositionTooLarge => "position size above maximum fraction",
            Self::BelowMinNotional => "order notional below minimum",
            Self::InsufficientCapital => "available capital below minimum",
            Self::InvalidLevels => "stop/target levels invalid for direction",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Bound a venue or store call. Elapsed time becomes a retryable `Timeout`.
pub async fn with_timeout<T, F>(op: &'static str, limit: Duration, fut: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout {
            op,
            secs: limit.as_secs(),
        }),
    }
}
