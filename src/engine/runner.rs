use chrono::Utc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::TradingEngine;
use crate::error::{ExchangeError, MarketDataError, TickError};
use crate::execution::{
    submit_with_retry, with_timeout, Order, OrderAck, OrderPurpose, OrderRequest, OrderStatus,
    Position,
};
use crate::models::{Decision, Side};
use crate::strategy::MarketSnapshot;

/// Sets the engine to `Stopped` when the loop task ends, however it ends
struct StopGuard(TradingEngine);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.mark_stopped();
    }
}

/// Trading loop: reconcile once, then tick every pair on each interval
pub(super) async fn run(engine: TradingEngine) {
    let guard = StopGuard(engine);
    let engine = &guard.0;
    let mut state_rx = engine.shared.state_tx.subscribe();

    engine.reconcile().await;

    let mut ticker = interval_at(Instant::now(), engine.shared.config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = state_rx.changed() => {}
        }

        if !engine.is_running() {
            break;
        }

        tracing::info!("💹 [TRADING] Tick at {}", Utc::now().format("%H:%M:%S"));
        engine.run_cycle().await;
    }
}

impl TradingEngine {
    /// One tick for every pair; a stop request skips the remaining pairs
    pub(super) async fn run_cycle(&self) {
        for pair in &self.shared.config.pairs {
            if !self.is_running() {
                tracing::info!("Stop pending, skipping remaining pairs");
                return;
            }

            match self.tick_pair(pair).await {
                Ok(()) => self.record_tick_result(pair, None),
                Err(TickError::DataUnavailable(e)) => {
                    tracing::warn!("  ✗ {} - skipping tick: {}", pair, e);
                    self.record_tick_result(pair, Some(e.to_string()));
                }
                Err(e) => {
                    tracing::error!("  ✗ {} - tick aborted: {}", pair, e);
                    self.record_tick_result(pair, Some(e.to_string()));
                }
            }
        }

        self.finish_cycle();
    }

    async fn tick_pair(&self, pair: &str) -> Result<(), TickError> {
        let config = &self.shared.config;
        let evaluator = &self.shared.evaluator;

        let candles = match tokio::time::timeout(
            config.retry.call_timeout,
            self.shared
                .gateway
                .fetch_candles(pair, &config.candle_interval, evaluator.lookback()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(MarketDataError::DataUnavailable(format!(
                    "candle fetch timed out after {:?}",
                    config.retry.call_timeout
                ))
                .into())
            }
        };

        let Some(last_close) = candles.last().map(|c| c.close) else {
            return Err(MarketDataError::DataUnavailable("no candles returned".to_string()).into());
        };

        tracing::debug!("  {} @ ${:.4} ({} candles)", pair, last_close, candles.len());

        if let Some(position) = self.shared.ledger.open_position(pair) {
            if self.settle_position(&position, Some(last_close)).await? {
                tracing::info!("    → {} exit order still working, waiting", pair);
                return Ok(());
            }
        }

        let snapshot = MarketSnapshot::build(pair, candles, &evaluator.indicator_config());
        let position = self.shared.ledger.open_position(pair);
        let decision = evaluator.evaluate(&snapshot, position.as_ref());

        match (decision, position) {
            (Decision::Hold, _) => Ok(()),
            (Decision::EnterLong(_) | Decision::EnterShort(_), Some(position)) => {
                tracing::debug!(
                    "    → {} entry ignored, position {} already open",
                    pair,
                    position.id
                );
                Ok(())
            }
            (Decision::EnterLong(quantity), None) => {
                self.enter(pair, Side::Long, quantity, last_close).await
            }
            (Decision::EnterShort(quantity), None) => {
                self.enter(pair, Side::Short, quantity, last_close).await
            }
            (Decision::Exit, None) => Ok(()),
            (Decision::Exit, Some(position)) => self.exit(&position, last_close).await,
        }
    }

    async fn enter(
        &self,
        pair: &str,
        side: Side,
        quantity: f64,
        last_close: f64,
    ) -> Result<(), TickError> {
        let request = OrderRequest::market(pair, side.entry_order_side(), quantity);
        tracing::info!(
            pair = %pair,
            key = %request.idempotency_key,
            "    → ENTER {} {:.6} @ ~${:.4}",
            side,
            quantity,
            last_close
        );

        let ack = submit_with_retry(
            self.shared.exchange.as_ref(),
            &request,
            &self.shared.config.retry,
        )
        .await?;

        if matches!(ack.status, OrderStatus::Cancelled | OrderStatus::Failed)
            && ack.filled_quantity <= 0.0
        {
            return Err(TickError::Rejected {
                pair: pair.to_string(),
                key: request.idempotency_key,
                status: ack.status.as_str().to_string(),
            });
        }

        let mut order = Order::acknowledged(&request, OrderPurpose::Entry, &ack);
        if ack.filled_quantity > 0.0 {
            order.quantity = ack.filled_quantity;
        }
        let entry_price = ack.avg_price.unwrap_or(last_close);

        let position = self
            .shared
            .ledger
            .record_entry(pair, side, order, entry_price)?;

        tracing::info!(
            "    ✓ Opened {} {} position {}: {:.6} @ ${:.4}",
            pair,
            side,
            position.id,
            position.quantity,
            position.entry_price
        );
        self.persist(&position).await;
        Ok(())
    }

    async fn exit(&self, position: &Position, last_close: f64) -> Result<(), TickError> {
        let request = OrderRequest::market(
            &position.pair,
            position.side.exit_order_side(),
            position.quantity,
        )
        .reduce_only();
        tracing::info!(
            pair = %position.pair,
            key = %request.idempotency_key,
            "    → EXIT {} position {} @ ~${:.4}",
            position.side,
            position.id,
            last_close
        );

        let ack = submit_with_retry(
            self.shared.exchange.as_ref(),
            &request,
            &self.shared.config.retry,
        )
        .await?;
        let order = Order::acknowledged(&request, OrderPurpose::Exit, &ack);

        let updated = match order.status {
            OrderStatus::Filled => {
                let exit_price = ack.avg_price.unwrap_or(last_close);
                let closed = self.shared.ledger.record_exit(position.id, order, exit_price)?;
                log_closed(&closed);
                closed
            }
            OrderStatus::Cancelled | OrderStatus::Failed => {
                tracing::warn!(
                    "    ✗ Exit order for {} ended {}, position stays open",
                    position.pair,
                    order.status.as_str()
                );
                self.shared.ledger.attach_order(position.id, order)?
            }
            _ => {
                tracing::info!(
                    "    … Exit order {} for {} acknowledged, awaiting fill",
                    ack.exchange_order_id,
                    position.pair
                );
                self.shared.ledger.attach_order(position.id, order)?
            }
        };

        self.persist(&updated).await;
        Ok(())
    }

    /// Refresh the unsettled orders of an open position from the exchange
    ///
    /// Returns `true` while an exit order is still working on the exchange.
    async fn settle_position(
        &self,
        position: &Position,
        fallback_price: Option<f64>,
    ) -> Result<bool, TickError> {
        let unsettled: Vec<Order> = position.unsettled_orders().cloned().collect();
        let mut exit_working = false;

        for mut order in unsettled {
            let Some(ack) = self.refresh_order(&order).await? else {
                tracing::warn!(
                    "Order {} for {} is unknown to the exchange, marking failed",
                    order.idempotency_key,
                    order.pair
                );
                order.mark(OrderStatus::Failed);
                if order.purpose == OrderPurpose::Entry {
                    self.void_entry(position, order).await?;
                    return Ok(false);
                }
                let updated = self.shared.ledger.update_order(position.id, order)?;
                self.persist(&updated).await;
                continue;
            };
            order.apply_ack(&ack);

            match (order.purpose, order.status) {
                (OrderPurpose::Entry, OrderStatus::Cancelled | OrderStatus::Failed)
                    if ack.filled_quantity <= 0.0 =>
                {
                    self.void_entry(position, order).await?;
                    return Ok(false);
                }
                (OrderPurpose::Entry, _) => {
                    let filled = ack.filled_quantity;
                    let updated = self.shared.ledger.confirm_entry(position.id, order, filled)?;
                    self.persist(&updated).await;
                }
                (OrderPurpose::Exit, OrderStatus::Filled) => {
                    let exit_price = ack
                        .avg_price
                        .or(fallback_price)
                        .unwrap_or(position.entry_price);
                    let closed = self.shared.ledger.record_exit(position.id, order, exit_price)?;
                    log_closed(&closed);
                    self.persist(&closed).await;
                    return Ok(false);
                }
                (OrderPurpose::Exit, status) if status.is_terminal() => {
                    tracing::warn!(
                        "Exit order {} for {} ended {}",
                        order.idempotency_key,
                        order.pair,
                        status.as_str()
                    );
                    let updated = self.shared.ledger.update_order(position.id, order)?;
                    self.persist(&updated).await;
                }
                (OrderPurpose::Exit, _) => {
                    exit_working = !self.cancel_if_stale(position, &mut order).await;
                    let updated = self.shared.ledger.update_order(position.id, order)?;
                    self.persist(&updated).await;
                }
            }
        }

        Ok(exit_working)
    }

    /// Forget a position whose entry order ended without filling anything
    async fn void_entry(&self, position: &Position, order: Order) -> Result<(), TickError> {
        tracing::warn!(
            "    ✗ Entry order {} for {} ended {} without a fill, dropping position {}",
            order.idempotency_key,
            position.pair,
            order.status.as_str(),
            position.id
        );
        let voided = self.shared.ledger.void_entry(position.id, order)?;

        if let Some(store) = &self.shared.store {
            if let Err(e) = store.delete_position(voided.id).await {
                tracing::error!("Failed to delete position {}: {}", voided.id, e);
            }
        }
        Ok(())
    }

    async fn refresh_order(&self, order: &Order) -> Result<Option<OrderAck>, TickError> {
        let exchange = &self.shared.exchange;
        let timeout = self.shared.config.retry.call_timeout;

        let result = match &order.exchange_order_id {
            Some(id) => with_timeout(timeout, exchange.query_order(&order.pair, id))
                .await
                .map(Some),
            None => {
                with_timeout(
                    timeout,
                    exchange.find_order(&order.pair, &order.idempotency_key),
                )
                .await
            }
        };

        result.map_err(TickError::Query)
    }

    /// Cancel a working order that outlived the pending timeout; true once cancelled
    async fn cancel_if_stale(&self, position: &Position, order: &mut Order) -> bool {
        let age = (Utc::now() - order.created_at).to_std().unwrap_or_default();
        if age < self.shared.config.pending_order_timeout {
            return false;
        }
        let Some(id) = order.exchange_order_id.clone() else {
            return false;
        };

        let cancelled: Result<(), ExchangeError> = with_timeout(
            self.shared.config.retry.call_timeout,
            self.shared.exchange.cancel_order(&position.pair, &id),
        )
        .await;

        match cancelled {
            Ok(()) => {
                tracing::warn!(
                    "Cancelled exit order {} for {} after {:?} without a fill",
                    id,
                    position.pair,
                    age
                );
                order.mark(OrderStatus::Cancelled);
                true
            }
            Err(e) => {
                tracing::error!("Failed to cancel stale order {}: {}", id, e);
                false
            }
        }
    }

    /// Bring orders left working by a previous run up to date
    ///
    /// Runs once before the first tick after every start. Failures are logged
    /// and retried by the regular ticks.
    pub(super) async fn reconcile(&self) {
        let positions: Vec<Position> = self
            .shared
            .ledger
            .open_positions()
            .into_iter()
            .filter(|p| p.unsettled_orders().next().is_some())
            .collect();

        if positions.is_empty() {
            return;
        }

        tracing::info!("🔄 Reconciling {} open positions with the exchange", positions.len());
        for position in positions {
            match self.settle_position(&position, None).await {
                Ok(true) => tracing::info!("  {} exit order still working", position.pair),
                Ok(false) => {}
                Err(e) => tracing::warn!("  ✗ Reconcile failed for {}: {}", position.pair, e),
            }
        }
    }

    /// Write the committed position to the store, if any
    async fn persist(&self, position: &Position) {
        if let Some(store) = &self.shared.store {
            if let Err(e) = store.save_position(position).await {
                tracing::error!("Failed to persist position {}: {}", position.id, e);
            }
        }
    }
}

fn log_closed(position: &Position) {
    tracing::info!(
        "    ✓ Closed {} {} position {} @ ${:.4}, P&L: ${:.2}",
        position.pair,
        position.side,
        position.id,
        position.exit_price.unwrap_or_default(),
        position.realized_pnl.unwrap_or_default()
    );
}
