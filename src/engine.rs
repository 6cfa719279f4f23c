//! Engine runner: wires producers, the decision loop, the position monitor
//! and the background maintenance tasks.
//!
//! Handles:
//! - Restoring positions, today's P&L and capital from the store
//! - One bounded decision sweep per cycle over every instrument
//! - Exit supervision, venue reconciliation and weight recomputation
//! - Graceful shutdown on Ctrl+C or an explicit stop

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::error::{EngineError, EngineResult, RejectReason};
use crate::indicators::{BarIndicatorProvider, BarStore, IndicatorAccess};
use crate::market::{spawn_producers, wait_tick, warm_up, MarketCache, ProducerContext};
use crate::models::{Direction, ExitReason, PositionSide, Signal, Trade};
use crate::notify::{EngineEvent, Notifier};
use crate::strategies::{MarketView, StrategyParams, StrategySet};
use crate::trading::{
    DailyLossTracker, ExecutionConfig, Executor, Ledger, LedgerState, MarketDataConfig,
    MonitorConfig, PositionMonitor, RiskConfig, RiskGate, ScheduleConfig, SignalSelector,
    TradeMode,
};
use crate::venue::{Credentials, TimedVenue, Venue};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Instruments swept every cycle, e.g. `BTC`
    pub instruments: Vec<String>,

    pub database_url: String,

    /// Optional JSON webhook for engine events
    pub webhook_url: Option<String>,

    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub monitor: MonitorConfig,
    pub market: MarketDataConfig,
    pub schedule: ScheduleConfig,
    pub strategies: StrategyParams,

    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instruments: vec!["BTC".into(), "ETH".into(), "XRP".into()],
            database_url: "sqlite:./spotbot.db?mode=rwc".to_string(),
            webhook_url: None,
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            monitor: MonitorConfig::default(),
            market: MarketDataConfig::default(),
            schedule: ScheduleConfig::default(),
            strategies: StrategyParams::default(),
            credentials: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `SPOTBOT_*` environment variables.
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EngineResult<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(mode) = get("SPOTBOT_TRADE_MODE") {
            config.execution.mode = mode.parse().map_err(EngineError::FatalConfiguration)?;
        }
        if let Some(list) = get("SPOTBOT_INSTRUMENTS") {
            config.instruments = list
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(url) = get("SPOTBOT_DATABASE_URL") {
            config.database_url = url;
        }
        config.webhook_url = get("SPOTBOT_WEBHOOK_URL");

        if let Some(v) = parse_var(&get, "SPOTBOT_INITIAL_CAPITAL")? {
            config.risk.initial_capital = v;
        }
        if let Some(v) = parse_var(&get, "SPOTBOT_RISK_FRACTION")? {
            config.risk.risk_fraction = v;
        }
        if let Some(v) = parse_var(&get, "SPOTBOT_MAX_DAILY_LOSS")? {
            config.risk.max_daily_loss_pct = v;
        }
        if let Some(v) = parse_var(&get, "SPOTBOT_MAX_OPEN_POSITIONS")? {
            config.risk.max_open_positions = v;
        }
        if let Some(v) = parse_var(&get, "SPOTBOT_MIN_CONFIDENCE")? {
            config.risk.min_confidence = v;
        }
        if let Some(v) = parse_var(&get, "SPOTBOT_CYCLE_SECS")? {
            config.schedule.cycle_secs = v;
        }

        config.credentials = match (get("SPOTBOT_API_KEY"), get("SPOTBOT_API_SECRET")) {
            (Some(api_key), Some(api_secret)) => Some(Credentials { api_key, api_secret }),
            _ => None,
        };

        Ok(config)
    }

    /// Reject configurations that must never start trading.
    pub fn validate(&self) -> EngineResult<()> {
        if self.instruments.is_empty() {
            return Err(EngineError::FatalConfiguration("no instruments configured".into()));
        }
        if self.execution.mode == TradeMode::Live && self.credentials.is_none() {
            return Err(EngineError::FatalConfiguration(
                "live mode requires SPOTBOT_API_KEY and SPOTBOT_API_SECRET".into(),
            ));
        }
        if self.risk.min_position_pct > self.risk.max_position_pct {
            return Err(EngineError::FatalConfiguration(format!(
                "min_position_pct {} exceeds max_position_pct {}",
                self.risk.min_position_pct, self.risk.max_position_pct
            )));
        }
        if self.risk.initial_capital <= Decimal::ZERO {
            return Err(EngineError::FatalConfiguration("initial capital must be positive".into()));
        }
        if self.schedule.cycle_secs == 0 || self.schedule.monitor_secs == 0 {
            return Err(EngineError::FatalConfiguration("cadences must be at least one second".into()));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> EngineResult<Option<T>>
where
    T::Err: fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| EngineError::FatalConfiguration(format!("{}={}: {}", key, raw, e))),
        None => Ok(None),
    }
}

/// What happened to one instrument in one sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentOutcome {
    NoData,
    InsufficientData { bars: usize, required: usize },
    NoSignal,
    /// SELL with nothing to exit, or an open position kept
    Held,
    ExitedOnSignal { position_id: i64 },
    Rejected(RejectReason),
    Opened { position_id: i64 },
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcomes: Vec<(String, InstrumentOutcome)>,
}

impl SweepReport {
    pub fn count(&self, pred: impl Fn(&InstrumentOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn outcome(&self, instrument: &str) -> Option<&InstrumentOutcome> {
        self.outcomes.iter().find(|(i, _)| i == instrument).map(|(_, o)| o)
    }
}

/// Running totals across sweeps.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub cycles: u64,
    pub opened: u64,
    pub exited_on_signal: u64,
    pub rejected: u64,
    pub failed: u64,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub last_sweep_ms: u128,
}

impl EngineStats {
    fn record(&mut self, report: &SweepReport) {
        self.cycles += 1;
        self.opened += report.count(|o| matches!(o, InstrumentOutcome::Opened { .. })) as u64;
        self.exited_on_signal += report.count(|o| matches!(o, InstrumentOutcome::ExitedOnSignal { .. })) as u64;
        self.rejected += report.count(|o| matches!(o, InstrumentOutcome::Rejected(_))) as u64;
        self.failed += report.count(|o| matches!(o, InstrumentOutcome::Failed(_))) as u64;
        self.last_sweep_at = Some(report.started_at);
        self.last_sweep_ms = report.elapsed.as_millis();
    }
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Engine Statistics ===")?;
        writeln!(f, "Cycles:           {}", self.cycles)?;
        writeln!(f, "Opened:           {}", self.opened)?;
        writeln!(f, "Signal exits:     {}", self.exited_on_signal)?;
        writeln!(f, "Rejected:         {}", self.rejected)?;
        writeln!(f, "Failed:           {}", self.failed)?;
        match self.last_sweep_at {
            Some(at) => writeln!(f, "Last sweep:       {} ({} ms)", at.format("%Y-%m-%d %H:%M:%S"), self.last_sweep_ms)?,
            None => writeln!(f, "Last sweep:       never")?,
        }
        Ok(())
    }
}

pub struct Engine {
    config: EngineConfig,
    venue: Arc<dyn Venue>,
    db: Arc<Database>,
    cache: Arc<MarketCache>,
    bars: Arc<BarStore>,
    indicators: IndicatorAccess,
    strategies: StrategySet,
    selector: Arc<SignalSelector>,
    gate: RiskGate,
    executor: Arc<Executor>,
    ledger: Arc<Ledger>,
    monitor: Arc<PositionMonitor>,
    notifier: Arc<dyn Notifier>,
    stats: RwLock<EngineStats>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Engine {
    /// Engine with the built-in strategy set.
    pub fn new(
        config: EngineConfig,
        venue: Arc<dyn Venue>,
        db: Arc<Database>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let strategies = StrategySet::with_defaults(&config.strategies);
        Self::with_strategies(config, venue, db, notifier, strategies)
    }

    pub fn with_strategies(
        config: EngineConfig,
        venue: Arc<dyn Venue>,
        db: Arc<Database>,
        notifier: Arc<dyn Notifier>,
        strategies: StrategySet,
    ) -> Self {
        let venue: Arc<dyn Venue> = Arc::new(TimedVenue::new(venue, config.schedule.call_timeout()));
        let cache = Arc::new(MarketCache::new());
        let bars = Arc::new(BarStore::new(config.market.bar_capacity));
        let indicators = IndicatorAccess::new(cache.clone(), config.market.min_bars);
        let ledger = Arc::new(Ledger::new(LedgerState::new(config.risk.initial_capital, Utc::now())));
        let executor = Arc::new(Executor::new(venue.clone(), db.clone(), config.execution.clone()));
        let monitor = Arc::new(PositionMonitor::new(
            cache.clone(),
            executor.clone(),
            ledger.clone(),
            db.clone(),
            notifier.clone(),
            config.monitor.clone(),
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            gate: RiskGate::new(config.risk.clone()),
            config,
            venue,
            db,
            cache,
            bars,
            indicators,
            strategies,
            selector: Arc::new(SignalSelector::new()),
            executor,
            ledger,
            monitor,
            notifier,
            stats: RwLock::new(EngineStats::default()),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// One reconciliation pass against the venue's holdings.
    pub async fn reconcile(&self) -> EngineResult<Vec<Trade>> {
        self.monitor.reconcile(self.venue.as_ref(), Utc::now()).await
    }

    /// Recompute strategy weights from the trailing window of trades.
    pub async fn recompute_weights(&self) -> EngineResult<BTreeMap<String, f64>> {
        self.selector
            .recompute(&self.db, &self.strategies.active_names(), Utc::now())
            .await
    }

    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Ask every loop to stop at its next wait boundary.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Register strategies and restore account state from the store.
    pub async fn initialize(&self) -> EngineResult<()> {
        info!(mode = %self.config.execution.mode, "Initializing engine...");

        for entry in self.strategies.entries() {
            let s = &entry.strategy;
            self.db.upsert_strategy(s.name(), s.kind(), &s.params(), entry.order).await?;
        }

        let active = self.strategies.active_names();
        let weights: HashMap<String, f64> = self
            .db
            .get_strategies()
            .await?
            .into_iter()
            .filter(|r| r.active && active.contains(&r.name))
            .map(|r| (r.name, r.weight))
            .collect();
        for (name, weight) in &weights {
            debug!(strategy = %name, weight, "Restored strategy weight");
        }
        self.selector.set_weights(weights);

        let now = Utc::now();
        let available = match self.db.get_latest_balance().await? {
            Some(snapshot) => snapshot.available_capital,
            None => self.config.risk.initial_capital,
        };
        let positions = self.db.get_open_positions().await?;

        let mut state = self.ledger.lock().await;
        *state = LedgerState::new(available, now);
        for position in positions {
            state.open.insert(position.instrument.clone(), position);
        }
        state.daily = match self.db.get_daily_performance(now.date_naive()).await? {
            Some(perf) => DailyLossTracker::from_performance(&perf),
            None => DailyLossTracker::new(now.date_naive(), state.total_capital()),
        };

        info!(
            available = %state.available_capital,
            open_positions = state.open_count(),
            realized_today = %state.daily.realized_pnl,
            paused = state.daily.paused,
            "Engine initialized"
        );
        Ok(())
    }

    /// Main run loop. Returns after shutdown once every task has stopped.
    pub async fn run(&self) -> anyhow::Result<()> {
        let schedule = self.config.schedule.clone();
        info!(
            mode = %self.config.execution.mode,
            instruments = ?self.config.instruments,
            cycle_secs = schedule.cycle_secs,
            "Starting engine run loop"
        );

        let ctx = ProducerContext {
            venue: self.venue.clone(),
            cache: self.cache.clone(),
            bars: self.bars.clone(),
            provider: Arc::new(BarIndicatorProvider::new(self.bars.clone())),
            instruments: self.config.instruments.clone(),
            market: self.config.market.clone(),
        };
        warm_up(&ctx).await;

        let mut handles = spawn_producers(ctx, &schedule, self.shutdown.subscribe());
        handles.extend(self.spawn_maintenance(&schedule));

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown.send_replace(true);
            }
        });

        self.notifier.notify(EngineEvent::EngineStarted {
            mode: self.config.execution.mode,
            instruments: self.config.instruments.clone(),
        });

        let mut ticker = interval(Duration::from_secs(schedule.cycle_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop = self.shutdown.subscribe();

        while wait_tick(&mut ticker, &mut stop).await {
            let report = self.run_cycle().await;
            info!(
                opened = report.count(|o| matches!(o, InstrumentOutcome::Opened { .. })),
                rejected = report.count(|o| matches!(o, InstrumentOutcome::Rejected(_))),
                failed = report.count(|o| matches!(o, InstrumentOutcome::Failed(_))),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Sweep complete"
            );
            self.stats.write().await.record(&report);
        }

        // Graceful shutdown
        info!("Shutting down engine...");
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Background task ended abnormally");
            }
        }
        {
            let mut state = self.ledger.lock().await;
            self.executor.record_account(&mut state, Utc::now()).await;
        }
        let cycles = self.stats.read().await.cycles;
        self.notifier.notify(EngineEvent::EngineStopped { cycles });
        info!(cycles, "Engine shutdown complete");
        Ok(())
    }

    fn spawn_maintenance(&self, schedule: &ScheduleConfig) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let monitor = self.monitor.clone();
        let mut stop = self.shutdown.subscribe();
        let every = Duration::from_secs(schedule.monitor_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            while wait_tick(&mut ticker, &mut stop).await {
                let report = monitor.tick(Utc::now()).await;
                if !report.closed.is_empty() || report.errors > 0 {
                    debug!(checked = report.checked, closed = report.closed.len(), errors = report.errors, "Monitor tick");
                }
            }
            info!("Position monitor stopped");
        }));

        if self.config.execution.mode == TradeMode::Live {
            let monitor = self.monitor.clone();
            let venue = self.venue.clone();
            let mut stop = self.shutdown.subscribe();
            let every = Duration::from_secs(schedule.reconcile_secs);
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                while wait_tick(&mut ticker, &mut stop).await {
                    if let Err(e) = monitor.reconcile(venue.as_ref(), Utc::now()).await {
                        warn!(error = %e, "Reconciliation failed, retrying next pass");
                    }
                }
                info!("Reconciliation stopped");
            }));
        }

        let selector = self.selector.clone();
        let db = self.db.clone();
        let active = self.strategies.active_names();
        let mut stop = self.shutdown.subscribe();
        let every = Duration::from_secs(schedule.weight_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            while wait_tick(&mut ticker, &mut stop).await {
                if let Err(e) = selector.recompute(&db, &active, Utc::now()).await {
                    warn!(error = %e, "Weight recomputation failed");
                }
            }
            info!("Weight recomputation stopped");
        }));

        handles
    }

    /// One decision sweep over every instrument. Per-instrument failures are
    /// reported in the outcome and never cut the sweep short.
    pub async fn run_cycle(&self) -> SweepReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut outcomes = Vec::with_capacity(self.config.instruments.len());

        for instrument in &self.config.instruments {
            if *self.shutdown.borrow() {
                break;
            }
            let outcome = self.process_instrument(instrument, started_at).await;
            if let InstrumentOutcome::Failed(reason) = &outcome {
                warn!(instrument = %instrument, error = %reason, "Instrument failed this cycle");
                self.log_event("ERROR", &format!("{}: {}", instrument, reason)).await;
            }
            outcomes.push((instrument.clone(), outcome));
        }

        {
            let mut state = self.ledger.lock().await;
            self.executor.record_account(&mut state, Utc::now()).await;
        }

        SweepReport {
            started_at,
            elapsed: clock.elapsed(),
            outcomes,
        }
    }

    async fn process_instrument(&self, instrument: &str, now: DateTime<Utc>) -> InstrumentOutcome {
        let Some(state) = self.cache.get(instrument) else {
            debug!(instrument = %instrument, "No market data yet");
            return InstrumentOutcome::NoData;
        };

        let indicators = match self.indicators.get_indicators(instrument, self.config.market.timeframe) {
            Ok(snapshot) => snapshot,
            Err(EngineError::InsufficientData { bars, required, .. }) => {
                debug!(instrument = %instrument, bars, required, "Insufficient indicator history");
                return InstrumentOutcome::InsufficientData { bars, required };
            }
            Err(e) => return InstrumentOutcome::Failed(e.to_string()),
        };

        let view = MarketView {
            orderbook: self.cache.get_orderbook(instrument),
            state,
        };
        let candidates = self.strategies.evaluate(instrument, &view, &indicators);
        let Some(winner) = self.selector.select(candidates) else {
            return InstrumentOutcome::NoSignal;
        };

        match winner.signal.direction {
            Direction::Sell => self.exit_on_signal(&winner.signal, view.state.price, now).await,
            Direction::Buy => self.enter(winner.signal, now).await,
        }
    }

    /// SELL only ever closes an existing long.
    async fn exit_on_signal(&self, signal: &Signal, price: Decimal, now: DateTime<Utc>) -> InstrumentOutcome {
        let mut state = self.ledger.lock().await;
        let holds_long = state
            .open
            .get(&signal.instrument)
            .is_some_and(|p| p.side == PositionSide::Long);
        if !holds_long {
            return InstrumentOutcome::Held;
        }

        match self
            .executor
            .close(&mut state, &signal.instrument, price, ExitReason::SignalExit, now)
            .await
        {
            Ok(Some(trade)) => {
                self.notifier.notify(EngineEvent::closed(&trade));
                InstrumentOutcome::ExitedOnSignal {
                    position_id: trade.position_id,
                }
            }
            Ok(None) => InstrumentOutcome::Held,
            Err(e) => InstrumentOutcome::Failed(e.to_string()),
        }
    }

    async fn enter(&self, signal: Signal, now: DateTime<Utc>) -> InstrumentOutcome {
        let mut state = self.ledger.lock().await;
        if state.has_position(&signal.instrument) {
            return InstrumentOutcome::Held;
        }
        if state.available_capital < self.config.risk.min_available_capital {
            return self.rejected(&signal, RejectReason::InsufficientCapital).await;
        }

        let was_paused = state.daily.paused;
        let account = state.account_view();
        let sized = match self.gate.admit(&signal, &mut state.daily, account, now) {
            Ok(sized) => sized,
            Err(reason) => {
                if !was_paused && state.daily.paused {
                    self.notifier.notify(EngineEvent::RiskPaused {
                        date: state.daily.date,
                        realized_pnl: state.daily.realized_pnl,
                        pnl_pct: state.daily.pnl_pct(),
                    });
                    self.executor.record_account(&mut state, now).await;
                }
                return self.rejected(&signal, reason).await;
            }
        };

        let signal_id = match self.db.insert_signal(&signal).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(instrument = %signal.instrument, error = %e, "Failed to store signal");
                None
            }
        };

        match self.executor.open(&mut state, &signal, signal_id, sized).await {
            Ok(position) => {
                self.notifier.notify(EngineEvent::opened(&position));
                InstrumentOutcome::Opened {
                    position_id: position.id,
                }
            }
            Err(EngineError::Rejected(reason)) => self.rejected(&signal, reason).await,
            Err(EngineError::DataConflict(msg)) => {
                debug!(instrument = %signal.instrument, conflict = %msg, "Position already open in store");
                InstrumentOutcome::Held
            }
            Err(e) => InstrumentOutcome::Failed(e.to_string()),
        }
    }

    async fn rejected(&self, signal: &Signal, reason: RejectReason) -> InstrumentOutcome {
        info!(
            instrument = %signal.instrument,
            strategy = %signal.strategy,
            reason = reason.code(),
            "Signal rejected: {}",
            reason
        );
        self.log_event(
            "INFO",
            &format!("{} {} rejected: {}", signal.instrument, signal.strategy, reason.code()),
        )
        .await;
        self.notifier.notify(EngineEvent::SignalRejected {
            instrument: signal.instrument.clone(),
            strategy: signal.strategy.clone(),
            reason,
        });
        InstrumentOutcome::Rejected(reason)
    }

    async fn log_event(&self, level: &str, message: &str) {
        if let Err(e) = self.db.log_event(level, "engine", message).await {
            warn!(error = %e, "Failed to write event log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IndicatorSnapshot, Levels, MarketState, StrategyKind, Timeframe};
    use crate::notify::RecordingNotifier;
    use crate::strategies::{MarketConditions, Strategy};
    use crate::venue::mock::ScriptedVenue;
    use rust_decimal_macros::dec;

    /// Emits the same opinion for every instrument.
    struct FixedStrategy {
        direction: Direction,
        levels: Levels,
    }

    impl Strategy for FixedStrategy {
        fn name(&self) -> &str {
            "fixed"
        }

        fn kind(&self) -> StrategyKind {
            StrategyKind::TrendFollowing
        }

        fn params(&self) -> serde_json::Value {
            serde_json::json!({})
        }

        fn generate_signal(&self, instrument: &str, _: &MarketView, _: &IndicatorSnapshot) -> Option<Signal> {
            Signal::new("fixed", instrument, self.direction, 90.0, 0.9, self.levels, "test").ok()
        }

        fn validate_signal(&self, _: &Signal, _: &MarketConditions) -> bool {
            true
        }
    }

    fn buy_levels() -> Levels {
        Levels {
            entry: dec!(100),
            stop: dec!(98),
            target: dec!(106),
        }
    }

    fn make_config(mode: TradeMode) -> EngineConfig {
        let mut config = EngineConfig {
            instruments: vec!["BTC".into(), "ETH".into()],
            ..Default::default()
        };
        config.execution.mode = mode;
        config
    }

    async fn make_engine(
        mode: TradeMode,
        direction: Direction,
        levels: Levels,
    ) -> (Arc<ScriptedVenue>, Arc<Database>, Arc<RecordingNotifier>, Engine) {
        let venue = Arc::new(ScriptedVenue::new());
        let db = Arc::new(Database::in_memory().await.unwrap());
        let recorder = Arc::new(RecordingNotifier::default());
        let mut strategies = StrategySet::new();
        strategies.register(Box::new(FixedStrategy { direction, levels }));

        let engine = Engine::with_strategies(make_config(mode), venue.clone(), db.clone(), recorder.clone(), strategies);
        engine.initialize().await.unwrap();
        (venue, db, recorder, engine)
    }

    fn feed(engine: &Engine, instrument: &str, price: Decimal) {
        engine.cache.put(MarketState::new(instrument, price, dec!(1000)));
        engine.cache.put_indicators(
            instrument,
            Timeframe::M1,
            IndicatorSnapshot {
                bars: 60,
                ..Default::default()
            },
        );
    }

    #[test]
    fn test_config_validation() {
        let config = make_config(TradeMode::Live);
        assert!(matches!(config.validate(), Err(EngineError::FatalConfiguration(_))));

        let config = EngineConfig {
            instruments: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.risk.min_position_pct = dec!(0.5);
        assert!(config.validate().is_err());

        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_from_lookup() {
        let vars = HashMap::from([
            ("SPOTBOT_TRADE_MODE", "live"),
            ("SPOTBOT_INSTRUMENTS", "btc, eth ,"),
            ("SPOTBOT_MAX_OPEN_POSITIONS", "5"),
            ("SPOTBOT_API_KEY", "k"),
            ("SPOTBOT_API_SECRET", "s"),
        ]);
        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.execution.mode, TradeMode::Live);
        assert_eq!(config.instruments, vec!["BTC".to_string(), "ETH".to_string()]);
        assert_eq!(config.risk.max_open_positions, 5);
        assert!(config.validate().is_ok());

        let bad = EngineConfig::from_lookup(|k| (k == "SPOTBOT_MAX_DAILY_LOSS").then(|| "lots".to_string()));
        assert!(matches!(bad, Err(EngineError::FatalConfiguration(_))));
    }

    #[tokio::test]
    async fn test_sweep_reports_missing_data() {
        let (_venue, _db, _recorder, engine) = make_engine(TradeMode::Paper, Direction::Buy, buy_levels()).await;
        engine.cache.put(MarketState::new("ETH", dec!(100), dec!(1)));

        let report = engine.run_cycle().await;
        assert_eq!(report.outcome("BTC"), Some(&InstrumentOutcome::NoData));
        assert_eq!(
            report.outcome("ETH"),
            Some(&InstrumentOutcome::InsufficientData { bars: 0, required: 50 })
        );
    }

    #[tokio::test]
    async fn test_buy_opens_once_per_instrument() {
        let (_venue, db, recorder, engine) = make_engine(TradeMode::Paper, Direction::Buy, buy_levels()).await;
        feed(&engine, "BTC", dec!(100));

        let first = engine.run_cycle().await;
        assert!(matches!(first.outcome("BTC"), Some(InstrumentOutcome::Opened { .. })));
        assert_eq!(db.count_signals("BTC").await.unwrap(), 1);

        let second = engine.run_cycle().await;
        assert_eq!(second.outcome("BTC"), Some(&InstrumentOutcome::Held));
        assert_eq!(db.get_open_positions().await.unwrap().len(), 1);
        assert!(matches!(recorder.events()[0], EngineEvent::PositionOpened { .. }));
        assert!(db.get_latest_balance().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_poor_reward_risk_is_rejected_and_logged() {
        let levels = Levels {
            entry: dec!(100),
            stop: dec!(99),
            target: dec!(100.5),
        };
        let (_venue, db, recorder, engine) = make_engine(TradeMode::Paper, Direction::Buy, levels).await;
        feed(&engine, "BTC", dec!(100));

        let report = engine.run_cycle().await;
        assert_eq!(
            report.outcome("BTC"),
            Some(&InstrumentOutcome::Rejected(RejectReason::RiskRewardBelowMinimum))
        );

        let events = db.get_recent_events(10).await.unwrap();
        assert!(events[0].message.contains("risk_reward_below_minimum"));
        assert!(matches!(recorder.events()[0], EngineEvent::SignalRejected { .. }));
        assert_eq!(db.count_signals("BTC").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_losing_day_pauses_once() {
        let (_venue, db, recorder, engine) = make_engine(TradeMode::Paper, Direction::Buy, buy_levels()).await;
        {
            let mut state = engine.ledger().lock().await;
            state.daily.realized_pnl = dec!(-60000);
            state.daily.total_trades = 2;
            state.daily.losing_trades = 2;
        }
        feed(&engine, "BTC", dec!(100));
        feed(&engine, "ETH", dec!(100));

        for _ in 0..2 {
            let report = engine.run_cycle().await;
            for instrument in ["BTC", "ETH"] {
                assert_eq!(
                    report.outcome(instrument),
                    Some(&InstrumentOutcome::Rejected(RejectReason::DailyLossLimit))
                );
            }
        }

        let paused = recorder
            .events()
            .iter()
            .filter(|e| matches!(e, EngineEvent::RiskPaused { .. }))
            .count();
        assert_eq!(paused, 1);
        assert!(db.get_open_positions().await.unwrap().is_empty());

        let today = engine.ledger().lock().await.daily.date;
        assert!(db.get_daily_performance(today).await.unwrap().unwrap().paused);
    }

    #[tokio::test]
    async fn test_sell_only_exits() {
        let sell = Levels {
            entry: dec!(100),
            stop: dec!(102),
            target: dec!(94),
        };
        let (_venue, db, _recorder, engine) = make_engine(TradeMode::Paper, Direction::Sell, sell).await;
        feed(&engine, "BTC", dec!(101));

        let report = engine.run_cycle().await;
        assert_eq!(report.outcome("BTC"), Some(&InstrumentOutcome::Held));
        assert!(db.get_open_positions().await.unwrap().is_empty());

        let signal = Signal::new("fixed", "BTC", Direction::Buy, 90.0, 0.9, buy_levels(), "").unwrap();
        {
            let mut state = engine.ledger().lock().await;
            engine.executor.open(&mut state, &signal, None, dec!(50000)).await.unwrap();
        }

        let report = engine.run_cycle().await;
        assert!(matches!(report.outcome("BTC"), Some(InstrumentOutcome::ExitedOnSignal { .. })));
        assert!(db.get_open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_venue_failure_does_not_abort_sweep() {
        let mut config = make_config(TradeMode::Live);
        config.credentials = Some(Credentials {
            api_key: "k".into(),
            api_secret: "s".into(),
        });
        let venue = Arc::new(ScriptedVenue::new());
        venue.set_failing(true);
        let db = Arc::new(Database::in_memory().await.unwrap());
        let mut strategies = StrategySet::new();
        strategies.register(Box::new(FixedStrategy {
            direction: Direction::Buy,
            levels: buy_levels(),
        }));
        let engine = Engine::with_strategies(config, venue, db.clone(), Arc::new(RecordingNotifier::default()), strategies);
        engine.initialize().await.unwrap();
        feed(&engine, "BTC", dec!(100));
        feed(&engine, "ETH", dec!(100));

        let report = engine.run_cycle().await;
        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(report.outcome("BTC"), Some(InstrumentOutcome::Failed(_))));
        assert!(matches!(report.outcome("ETH"), Some(InstrumentOutcome::Failed(_))));
        assert_eq!(engine.ledger().lock().await.open_count(), 0);
        assert!(!db.get_recent_events(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_restores_state() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let venue = Arc::new(ScriptedVenue::new());
        {
            let engine = Engine::new(make_config(TradeMode::Paper), venue.clone(), db.clone(), Arc::new(RecordingNotifier::default()));
            engine.initialize().await.unwrap();
            let signal = Signal::new("trend_following", "BTC", Direction::Buy, 90.0, 0.9, buy_levels(), "").unwrap();
            let mut state = engine.ledger().lock().await;
            engine.executor.open(&mut state, &signal, None, dec!(50000)).await.unwrap();
            engine.executor.record_account(&mut state, Utc::now()).await;
        }

        let restarted = Engine::new(make_config(TradeMode::Paper), venue, db, Arc::new(RecordingNotifier::default()));
        restarted.initialize().await.unwrap();
        let state = restarted.ledger().lock().await;
        assert!(state.has_position("BTC"));
        assert_eq!(state.available_capital, dec!(950000));
    }

    #[tokio::test]
    async fn test_stats_display() {
        let mut stats = EngineStats::default();
        stats.record(&SweepReport {
            started_at: Utc::now(),
            elapsed: Duration::from_millis(12),
            outcomes: vec![("BTC".into(), InstrumentOutcome::Opened { position_id: 1 })],
        });
        let text = stats.to_string();
        assert!(text.contains("Cycles:           1"));
        assert!(text.contains("Opened:           1"));
    }
}
