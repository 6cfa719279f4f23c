//! Position sizing: a fraction of available capital scaled by signal
//! confidence and shrunk by stop depth.

use rust_decimal::Decimal;

use super::RiskConfig;
use crate::error::RejectReason;
use crate::models::Signal;

/// Calculator for position notional.
pub struct PositionSizer {
    config: RiskConfig,
}

impl PositionSizer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Unclamped size.
    ///
    /// base = available * risk_fraction
    /// adjusted = base * confidence
    /// risk_adjusted = adjusted / (1 + factor * loss_distance_pct)
    pub fn raw_size(&self, available: Decimal, confidence: f64, loss_distance_pct: Decimal) -> Decimal {
        let base = available * self.config.risk_fraction;
        let confidence = Decimal::try_from(confidence.clamp(0.0, 1.0)).unwrap_or(Decimal::ZERO);
        let adjusted = base * confidence;

        let divisor = Decimal::ONE + self.config.stop_distance_factor * loss_distance_pct.abs();
        adjusted / divisor
    }

    /// `[min, max]` notional for the given available capital.
    pub fn bounds(&self, available: Decimal) -> (Decimal, Decimal) {
        (
            available * self.config.min_position_pct,
            available * self.config.max_position_pct,
        )
    }

    /// Size clamped into bounds. Never outside `[1%, 30%]` of available.
    pub fn size(&self, available: Decimal, signal: &Signal) -> Decimal {
        let (min, max) = self.bounds(available.max(Decimal::ZERO));
        self.raw_size(available, signal.confidence, signal.loss_distance_pct())
            .clamp(min, max)
    }

    /// Bounds check on the raw size, then clamp and re-validate.
    pub fn check(&self, available: Decimal, signal: &Signal) -> Result<Decimal, RejectReason> {
        if available <= Decimal::ZERO {
            return Err(RejectReason::PositionTooSmall);
        }
        let (min, max) = self.bounds(available);
        let raw = self.raw_size(available, signal.confidence, signal.loss_distance_pct());

        if raw < min {
            return Err(RejectReason::PositionTooSmall);
        }
        if raw > max {
            return Err(RejectReason::PositionTooLarge);
        }

        let sized = raw.clamp(min, max);
        if sized < min || sized > max || sized.is_zero() {
            return Err(RejectReason::PositionTooSmall);
        }
        Ok(sized)
    }
}
