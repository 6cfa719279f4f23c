//! Fire-and-forget engine events.
//!
//! `notify` never returns an error and never blocks on delivery, so a broken
//! sink cannot affect trading.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::RejectReason;
use crate::models::{ExitReason, Position, Trade};
use crate::trading::TradeMode;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    EngineStarted {
        mode: TradeMode,
        instruments: Vec<String>,
    },
    EngineStopped {
        cycles: u64,
    },
    PositionOpened {
        position_id: i64,
        instrument: String,
        strategy: String,
        entry_price: Decimal,
        quantity: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    },
    PositionClosed {
        position_id: i64,
        instrument: String,
        strategy: String,
        exit_reason: ExitReason,
        exit_price: Decimal,
        pnl: Decimal,
        pnl_pct: Decimal,
    },
    PhantomCleaned {
        position_id: i64,
        instrument: String,
        recorded_quantity: Decimal,
        venue_quantity: Decimal,
    },
    RiskPaused {
        date: NaiveDate,
        realized_pnl: Decimal,
        pnl_pct: Decimal,
    },
    SignalRejected {
        instrument: String,
        strategy: String,
        reason: RejectReason,
    },
}

impl EngineEvent {
    pub fn opened(position: &Position) -> Self {
        EngineEvent::PositionOpened {
            position_id: position.id,
            instrument: position.instrument.clone(),
            strategy: position.strategy.clone(),
            entry_price: position.entry_price,
            quantity: position.quantity,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
        }
    }

    pub fn closed(trade: &Trade) -> Self {
        EngineEvent::PositionClosed {
            position_id: trade.position_id,
            instrument: trade.instrument.clone(),
            strategy: trade.strategy.clone(),
            exit_reason: trade.exit_reason,
            exit_price: trade.exit_price,
            pnl: trade.pnl,
            pnl_pct: trade.pnl_pct,
        }
    }
}

/// An event with its emission time, as delivered to sinks.
#[derive(Debug, Clone, Serialize)]
struct Envelope<'a> {
    #[serde(flatten)]
    event: &'a EngineEvent,
    at: DateTime<Utc>,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: EngineEvent);
}

/// Writes every event to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: EngineEvent) {
        match &event {
            EngineEvent::PositionOpened {
                instrument,
                strategy,
                entry_price,
                quantity,
                ..
            } => info!(
                instrument = %instrument,
                strategy = %strategy,
                entry = %entry_price,
                quantity = %quantity,
                "Position opened"
            ),
            EngineEvent::PositionClosed {
                instrument,
                exit_reason,
                pnl,
                ..
            } => info!(
                instrument = %instrument,
                reason = %exit_reason,
                pnl = %pnl,
                "Position closed"
            ),
            EngineEvent::PhantomCleaned { instrument, .. } => {
                warn!(instrument = %instrument, "Phantom position cleaned up")
            }
            EngineEvent::RiskPaused { date, pnl_pct, .. } => {
                warn!(date = %date, pnl_pct = %pnl_pct, "Trading paused for the day")
            }
            other => info!(event = ?other, "Engine event"),
        }
    }
}

/// POSTs each event as JSON. Delivery runs on its own task; failures are logged.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, event: EngineEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime for webhook delivery, event dropped");
            return;
        };
        let client = self.client.clone();
        let url = self.url.clone();

        handle.spawn(async move {
            let body = Envelope {
                event: &event,
                at: Utc::now(),
            };
            let result = client
                .post(&url)
                .json(&body)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = result {
                warn!(error = %e, "Webhook delivery failed");
            }
        });
    }
}

/// Fan-out to several sinks.
#[derive(Default)]
pub struct Notifiers {
    sinks: Vec<Box<dyn Notifier>>,
}

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl Notifier + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl Notifier for Notifiers {
    fn notify(&self, event: EngineEvent) {
        for sink in &self.sinks {
            sink.notify(event.clone());
        }
    }
}

impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    fn notify(&self, event: EngineEvent) {
        (**self).notify(event);
    }
}

/// Keeps every event.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    events: std::sync::Mutex<Vec<EngineEvent>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = EngineEvent::SignalRejected {
            instrument: "BTC".into(),
            strategy: "trend_following".into(),
            reason: RejectReason::RiskRewardBelowMinimum,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "signal_rejected");
        assert_eq!(json["reason"], "risk_reward_below_minimum");
    }

    #[test]
    fn test_fan_out() {
        let recorder = Arc::new(RecordingNotifier::default());
        let notifiers = Notifiers::new().with(recorder.clone()).with(LogNotifier);

        notifiers.notify(EngineEvent::EngineStopped { cycles: 3 });
        assert_eq!(recorder.events(), vec![EngineEvent::EngineStopped { cycles: 3 }]);
    }

    #[test]
    fn test_webhook_without_runtime_drops_quietly() {
        let webhook = WebhookNotifier::new("http://127.0.0.1:9/hook").unwrap();
        webhook.notify(EngineEvent::EngineStopped { cycles: 0 });
    }
}
