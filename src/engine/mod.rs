//! Trading engine: the run loop, its state machine and the control API.
//!
//! `TradingEngine` is a cheap handle; the tick loop task and every command
//! handler hold clones of it. Control calls only take a short synchronous lock
//! and never wait for the loop or for the network.

mod runner;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::db::TradeStore;
use crate::error::ControlError;
use crate::execution::{ExchangeClient, MarketDataGateway, Position, PositionLedger, RetryPolicy};
use crate::strategy::Evaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Stopped,
    Running,
    Stopping,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Stopped => "STOPPED",
            EngineState::Running => "RUNNING",
            EngineState::Stopping => "STOPPING",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub pairs: Vec<String>,
    pub candle_interval: String,
    pub tick_interval: Duration,
    pub retry: RetryPolicy,
    /// Working exit orders older than this are cancelled
    pub pending_order_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pairs: vec!["RUNE/USDT".to_string()],
            candle_interval: "1m".to_string(),
            tick_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            pending_order_timeout: Duration::from_secs(300),
        }
    }
}

/// Snapshot returned by `status()`
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub open_positions: Vec<Position>,
    /// Last tick failure per pair, cleared by the next clean tick
    pub last_errors: BTreeMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
    /// Completed cycles over all pairs since the last start
    pub cycles: u64,
    pub strategy: String,
    pub exchange: String,
}

#[derive(Debug)]
struct Control {
    state: EngineState,
    /// A stop was accepted and no further stop has been answered since
    stop_acknowledged: bool,
    started_at: Option<DateTime<Utc>>,
    cycles: u64,
    last_errors: BTreeMap<String, String>,
}

struct Shared {
    config: EngineConfig,
    gateway: Arc<dyn MarketDataGateway>,
    exchange: Arc<dyn ExchangeClient>,
    evaluator: Arc<dyn Evaluator>,
    ledger: PositionLedger,
    store: Option<TradeStore>,
    control: Mutex<Control>,
    /// Published on every transition; wakes the sleeping loop on stop
    state_tx: watch::Sender<EngineState>,
}

#[derive(Clone)]
pub struct TradingEngine {
    shared: Arc<Shared>,
}

impl TradingEngine {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn MarketDataGateway>,
        exchange: Arc<dyn ExchangeClient>,
        evaluator: Arc<dyn Evaluator>,
        ledger: PositionLedger,
        store: Option<TradeStore>,
    ) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Stopped);
        Self {
            shared: Arc::new(Shared {
                config,
                gateway,
                exchange,
                evaluator,
                ledger,
                store,
                control: Mutex::new(Control {
                    state: EngineState::Stopped,
                    stop_acknowledged: false,
                    started_at: None,
                    cycles: 0,
                    last_errors: BTreeMap::new(),
                }),
                state_tx,
            }),
        }
    }

    /// Begin ticking. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), ControlError> {
        {
            let mut control = self.shared.control.lock();
            if control.state != EngineState::Stopped {
                return Err(ControlError::AlreadyRunning);
            }
            control.state = EngineState::Running;
            control.stop_acknowledged = false;
            control.started_at = Some(Utc::now());
            control.cycles = 0;
            control.last_errors.clear();
            self.shared.state_tx.send_replace(EngineState::Running);
        }

        tracing::info!(
            "🚀 Trading engine started ({} on {}, {} pairs)",
            self.shared.evaluator.name(),
            self.shared.exchange.name(),
            self.shared.config.pairs.len()
        );

        tokio::spawn(runner::run(self.clone()));
        Ok(())
    }

    /// Ask the loop to stop after the tick in progress
    ///
    /// Repeating the call while stopping, or once right after the loop has
    /// stopped, is a no-op.
    pub fn stop(&self) -> Result<(), ControlError> {
        let mut control = self.shared.control.lock();
        match control.state {
            EngineState::Running => {
                control.state = EngineState::Stopping;
                control.stop_acknowledged = true;
                self.shared.state_tx.send_replace(EngineState::Stopping);
                tracing::info!("🛑 Stop requested, finishing current tick");
                Ok(())
            }
            EngineState::Stopping => Ok(()),
            EngineState::Stopped if control.stop_acknowledged => {
                control.stop_acknowledged = false;
                Ok(())
            }
            EngineState::Stopped => Err(ControlError::NotRunning),
        }
    }

    pub fn state(&self) -> EngineState {
        self.shared.control.lock().state
    }

    /// Current state and open positions, read from memory only
    pub fn status(&self) -> EngineStatus {
        let control = self.shared.control.lock();
        EngineStatus {
            state: control.state,
            open_positions: self.shared.ledger.open_positions(),
            last_errors: control.last_errors.clone(),
            started_at: control.started_at,
            cycles: control.cycles,
            strategy: self.shared.evaluator.name().to_string(),
            exchange: self.shared.exchange.name().to_string(),
        }
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.shared.ledger
    }

    pub fn exchange(&self) -> Arc<dyn ExchangeClient> {
        self.shared.exchange.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Resolve once the loop has fully stopped
    pub async fn wait_stopped(&self) {
        let mut rx = self.shared.state_tx.subscribe();
        loop {
            let stopped = *rx.borrow_and_update() == EngineState::Stopped;
            if stopped || rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    fn record_tick_result(&self, pair: &str, error: Option<String>) {
        let mut control = self.shared.control.lock();
        match error {
            Some(message) => {
                control.last_errors.insert(pair.to_string(), message);
            }
            None => {
                control.last_errors.remove(pair);
            }
        }
    }

    fn finish_cycle(&self) {
        self.shared.control.lock().cycles += 1;
    }

    /// Final transition of the loop task
    fn mark_stopped(&self) {
        let mut control = self.shared.control.lock();
        if control.state == EngineState::Running {
            tracing::error!("Trading loop exited while running");
        }
        control.state = EngineState::Stopped;
        self.shared.state_tx.send_replace(EngineState::Stopped);
        tracing::info!("👋 Trading engine stopped");
    }
}
