mod common;

use autotrader::commands::{Command, CommandQueue, CommandReply, CommandRouter};
use autotrader::db::TradeStore;
use autotrader::engine::{EngineConfig, EngineState, TradingEngine};
use autotrader::error::{ControlError, ExchangeError};
use autotrader::execution::{
    ExchangeClient, Order, OrderPurpose, OrderRequest, OrderStatus, PositionLedger,
    PositionStatus, TradeStats,
};
use autotrader::{Decision, OrderSide, Side};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn config(pairs: &[&str], tick_interval: Duration) -> EngineConfig {
    EngineConfig {
        pairs: pairs.iter().map(|p| p.to_string()).collect(),
        tick_interval,
        retry: fast_retry(),
        ..Default::default()
    }
}

fn engine(
    config: EngineConfig,
    gateway: &Arc<FakeGateway>,
    exchange: &Arc<FakeExchange>,
    evaluator: &Arc<ScriptedEvaluator>,
    ledger: PositionLedger,
    store: Option<TradeStore>,
) -> TradingEngine {
    TradingEngine::new(
        config,
        gateway.clone(),
        exchange.clone(),
        evaluator.clone(),
        ledger,
        store,
    )
}

async fn stop_and_wait(engine: &TradingEngine) {
    engine.stop().unwrap();
    engine.wait_stopped().await;
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn test_start_stop_lifecycle_finishes_current_tick() {
    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 100.0)]).slow(Duration::from_millis(100)));
    let exchange = Arc::new(FakeExchange::new(100.0));
    let evaluator = Arc::new(ScriptedEvaluator::default());
    let engine = engine(
        config(&["BTC/USDT"], Duration::from_secs(3600)),
        &gateway,
        &exchange,
        &evaluator,
        PositionLedger::new(),
        None,
    );

    assert_eq!(engine.state(), EngineState::Stopped);
    assert_ok!(engine.start());
    assert_eq!(engine.state(), EngineState::Running);
    assert_eq!(assert_err!(engine.start()), ControlError::AlreadyRunning);

    // Stop while the first tick is inside the slow candle fetch
    wait_for("first fetch", || gateway.fetch_count() == 1).await;
    assert_ok!(engine.stop());
    assert_eq!(engine.state(), EngineState::Stopping);
    assert_ok!(engine.stop());

    engine.wait_stopped().await;
    assert_eq!(engine.state(), EngineState::Stopped);
    // The in-flight tick ran to completion, no further tick started
    assert_eq!(evaluator.calls_for("BTC/USDT"), 1);
    assert_eq!(gateway.fetch_count(), 1);
}

#[tokio::test]
async fn test_duplicate_entry_guard() {
    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 100.0)]));
    let exchange = Arc::new(FakeExchange::new(100.0));
    let evaluator = Arc::new(ScriptedEvaluator::always("BTC/USDT", Decision::EnterLong(1.0)));
    let engine = engine(
        config(&["BTC/USDT"], Duration::from_millis(10)),
        &gateway,
        &exchange,
        &evaluator,
        PositionLedger::new(),
        None,
    );

    engine.start().unwrap();
    wait_for("several ticks", || evaluator.calls_for("BTC/USDT") >= 3).await;
    stop_and_wait(&engine).await;

    let open = engine.ledger().open_positions();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].quantity, 1.0);
    assert_eq!(open[0].side, Side::Long);
    assert_eq!(open[0].orders.len(), 1);
    assert_eq!(exchange.submission_count(), 1);
}

#[tokio::test]
async fn test_retryable_failures_surface_and_other_pairs_continue() {
    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 100.0), ("ETH/USDT", 50.0)]));
    let exchange = Arc::new(FakeExchange::new(100.0));
    exchange.script(vec![
        Err(ExchangeError::retryable(-1001, "disconnected")),
        Err(ExchangeError::retryable(-1001, "disconnected")),
        Err(ExchangeError::retryable(-1001, "disconnected")),
    ]);
    let evaluator = Arc::new(ScriptedEvaluator::with_script(
        "BTC/USDT",
        vec![Decision::EnterLong(1.0)],
    ));
    let engine = engine(
        config(&["BTC/USDT", "ETH/USDT"], Duration::from_secs(3600)),
        &gateway,
        &exchange,
        &evaluator,
        PositionLedger::new(),
        None,
    );

    engine.start().unwrap();
    wait_for("first cycle", || engine.status().cycles >= 1).await;
    let status = engine.status();
    stop_and_wait(&engine).await;

    // Three attempts, all with the same key
    let submissions = exchange.submissions.lock().clone();
    assert_eq!(submissions.len(), 3);
    assert!(submissions
        .iter()
        .all(|r| r.idempotency_key == submissions[0].idempotency_key));

    assert!(engine.ledger().open_positions().is_empty());
    assert!(status.last_errors["BTC/USDT"].contains("3 attempt(s)"));
    assert!(!status.last_errors.contains_key("ETH/USDT"));
    assert_eq!(evaluator.calls_for("ETH/USDT"), 1);
}

#[tokio::test]
async fn test_non_retryable_failure_is_not_retried() {
    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 100.0)]));
    let exchange = Arc::new(FakeExchange::new(100.0));
    exchange.script(vec![Err(ExchangeError::fatal(-2019, "Margin is insufficient."))]);
    let evaluator = Arc::new(ScriptedEvaluator::with_script(
        "BTC/USDT",
        vec![Decision::EnterShort(2.0)],
    ));
    let engine = engine(
        config(&["BTC/USDT"], Duration::from_secs(3600)),
        &gateway,
        &exchange,
        &evaluator,
        PositionLedger::new(),
        None,
    );

    engine.start().unwrap();
    wait_for("first cycle", || engine.status().cycles >= 1).await;
    let status = engine.status();
    stop_and_wait(&engine).await;

    assert_eq!(exchange.submission_count(), 1);
    assert!(status.last_errors["BTC/USDT"].contains("Margin is insufficient"));
    assert!(engine.ledger().open_positions().is_empty());
}

#[tokio::test]
async fn test_data_outage_skips_pair_only() {
    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 100.0), ("ETH/USDT", 50.0)]));
    gateway.failing.lock().push("BTC/USDT".to_string());
    let exchange = Arc::new(FakeExchange::new(50.0));
    let evaluator = Arc::new(ScriptedEvaluator::with_script(
        "ETH/USDT",
        vec![Decision::EnterLong(1.0)],
    ));
    let engine = engine(
        config(&["BTC/USDT", "ETH/USDT"], Duration::from_secs(3600)),
        &gateway,
        &exchange,
        &evaluator,
        PositionLedger::new(),
        None,
    );

    engine.start().unwrap();
    wait_for("first cycle", || engine.status().cycles >= 1).await;
    let status = engine.status();
    stop_and_wait(&engine).await;

    assert!(status.last_errors["BTC/USDT"].contains("feed down"));
    assert_eq!(evaluator.calls_for("BTC/USDT"), 0);
    assert!(engine.ledger().open_position("ETH/USDT").is_some());
}

#[tokio::test]
async fn test_round_trip_lands_in_history_once() {
    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 100.0)]));
    let exchange = Arc::new(FakeExchange::new(100.0));
    exchange.script(vec![
        Ok(ack("entry-1", OrderStatus::Filled, 2.0, Some(100.0))),
        Ok(ack("exit-1", OrderStatus::Filled, 2.0, Some(110.0))),
    ]);
    let evaluator = Arc::new(ScriptedEvaluator::with_script(
        "BTC/USDT",
        vec![Decision::EnterLong(2.0), Decision::Exit],
    ));
    let engine = engine(
        config(&["BTC/USDT"], Duration::from_millis(10)),
        &gateway,
        &exchange,
        &evaluator,
        PositionLedger::new(),
        None,
    );

    engine.start().unwrap();
    wait_for("exit", || !engine.ledger().history().is_empty()).await;
    wait_for("a few more ticks", || evaluator.calls_for("BTC/USDT") >= 4).await;
    stop_and_wait(&engine).await;

    let history = engine.ledger().history();
    assert_eq!(history.len(), 1);
    let closed = &history[0];
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.entry_price, 100.0);
    assert_eq!(closed.exit_price, Some(110.0));
    assert_eq!(closed.realized_pnl, Some(20.0));
    assert!(engine.ledger().open_positions().is_empty());

    let exit = &exchange.submissions.lock()[1];
    assert_eq!(exit.side, OrderSide::Sell);
    assert!(exit.reduce_only);

    let stats = TradeStats::from_history(&history);
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.winning_trades, 1);
}

#[tokio::test]
async fn test_pending_exit_is_resolved_on_later_tick() {
    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 100.0)]));
    let exchange = Arc::new(FakeExchange::new(100.0));
    exchange.script(vec![
        Ok(ack("entry-1", OrderStatus::Filled, 1.0, Some(100.0))),
        Ok(ack("exit-1", OrderStatus::Acknowledged, 0.0, None)),
    ]);
    let evaluator = Arc::new(ScriptedEvaluator::with_script(
        "BTC/USDT",
        vec![Decision::EnterShort(1.0), Decision::Exit],
    ));
    let engine = engine(
        config(&["BTC/USDT"], Duration::from_millis(10)),
        &gateway,
        &exchange,
        &evaluator,
        PositionLedger::new(),
        None,
    );

    engine.start().unwrap();
    wait_for("pending exit", || {
        engine
            .ledger()
            .open_position("BTC/USDT")
            .map_or(false, |p| p.pending_exit().is_some())
    })
    .await;

    // While the exit works the pair is skipped, so no new decisions are taken
    let calls = evaluator.calls_for("BTC/USDT");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(evaluator.calls_for("BTC/USDT"), calls);

    exchange.set_order(ack("exit-1", OrderStatus::Filled, 1.0, Some(90.0)));
    wait_for("exit fill", || !engine.ledger().history().is_empty()).await;
    stop_and_wait(&engine).await;

    let closed = &engine.ledger().history()[0];
    assert_eq!(closed.side, Side::Short);
    assert_eq!(closed.exit_price, Some(90.0));
    assert_eq!(closed.realized_pnl, Some(10.0));
    assert_eq!(exchange.submission_count(), 2);
}

#[tokio::test]
async fn test_reconcile_closes_exit_filled_while_stopped() {
    let ledger = PositionLedger::new();
    let entry = OrderRequest::market("BTC/USDT", OrderSide::Buy, 1.0);
    let position = ledger
        .record_entry(
            "BTC/USDT",
            Side::Long,
            Order::acknowledged(
                &entry,
                OrderPurpose::Entry,
                &ack("entry-1", OrderStatus::Filled, 1.0, Some(100.0)),
            ),
            100.0,
        )
        .unwrap();
    let exit = OrderRequest::market("BTC/USDT", OrderSide::Sell, 1.0).reduce_only();
    ledger
        .attach_order(
            position.id,
            Order::acknowledged(
                &exit,
                OrderPurpose::Exit,
                &ack("exit-1", OrderStatus::Acknowledged, 0.0, None),
            ),
        )
        .unwrap();

    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 130.0)]));
    let exchange = Arc::new(FakeExchange::new(130.0));
    exchange.set_order(ack("exit-1", OrderStatus::Filled, 1.0, Some(120.0)));
    let evaluator = Arc::new(ScriptedEvaluator::default());

    let engine = engine(
        config(&["BTC/USDT"], Duration::from_secs(3600)),
        &gateway,
        &exchange,
        &evaluator,
        ledger,
        None,
    );

    engine.start().unwrap();
    wait_for("reconciled exit", || !engine.ledger().history().is_empty()).await;
    stop_and_wait(&engine).await;

    let closed = &engine.ledger().history()[0];
    assert_eq!(closed.id, position.id);
    assert_eq!(closed.exit_price, Some(120.0));
    assert_eq!(closed.realized_pnl, Some(20.0));
    assert_eq!(exchange.submission_count(), 0);
}

#[tokio::test]
async fn test_partial_entry_grows_to_full_fill_before_exit() {
    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 100.0)]));
    let exchange = Arc::new(FakeExchange::new(100.0));
    exchange.script(vec![
        Ok(ack("entry-1", OrderStatus::PartiallyFilled, 0.4, Some(100.0))),
        Ok(ack("exit-1", OrderStatus::Filled, 1.0, Some(111.0))),
    ]);
    let evaluator = Arc::new(ScriptedEvaluator::with_script(
        "BTC/USDT",
        vec![Decision::EnterLong(1.0)],
    ));
    let engine = engine(
        config(&["BTC/USDT"], Duration::from_millis(10)),
        &gateway,
        &exchange,
        &evaluator,
        PositionLedger::new(),
        None,
    );

    engine.start().unwrap();
    wait_for("partial entry", || engine.ledger().has_open_position("BTC/USDT")).await;
    assert_eq!(
        engine.ledger().open_position("BTC/USDT").unwrap().quantity,
        0.4
    );

    exchange.set_order(ack("entry-1", OrderStatus::Filled, 1.0, Some(101.0)));
    wait_for("full entry fill", || {
        engine
            .ledger()
            .open_position("BTC/USDT")
            .map_or(false, |p| p.quantity == 1.0)
    })
    .await;

    evaluator.push("BTC/USDT", vec![Decision::Exit]);
    wait_for("exit", || !engine.ledger().history().is_empty()).await;
    stop_and_wait(&engine).await;

    let submissions = exchange.submissions.lock().clone();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[1].quantity, 1.0);
    assert!(submissions[1].reduce_only);

    let closed = &engine.ledger().history()[0];
    assert_eq!(closed.quantity, 1.0);
    assert_eq!(closed.entry_price, 101.0);
    assert_eq!(closed.realized_pnl, Some(10.0));
    assert_eq!(closed.orders[0].status, OrderStatus::Filled);
}

#[tokio::test]
async fn test_entry_cancelled_without_fill_drops_position() {
    let store = TradeStore::new("sqlite::memory:").await.unwrap();
    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 100.0)]));
    let exchange = Arc::new(FakeExchange::new(100.0));
    exchange.script(vec![Ok(ack("entry-1", OrderStatus::Acknowledged, 0.0, None))]);
    let evaluator = Arc::new(ScriptedEvaluator::with_script(
        "BTC/USDT",
        vec![Decision::EnterLong(1.0)],
    ));
    let engine = engine(
        config(&["BTC/USDT"], Duration::from_millis(10)),
        &gateway,
        &exchange,
        &evaluator,
        PositionLedger::new(),
        Some(store.clone()),
    );

    engine.start().unwrap();
    wait_for("acknowledged entry", || engine.ledger().has_open_position("BTC/USDT")).await;
    let pending = engine.ledger().open_position("BTC/USDT").unwrap();
    assert_eq!(pending.orders[0].status, OrderStatus::Acknowledged);

    exchange.set_order(ack("entry-1", OrderStatus::Cancelled, 0.0, None));
    wait_for("voided entry", || !engine.ledger().has_open_position("BTC/USDT")).await;
    assert!(engine.ledger().position(pending.id).is_none());
    assert!(engine.ledger().history().is_empty());

    // The pair is free again for a fresh entry
    evaluator.push("BTC/USDT", vec![Decision::EnterLong(2.0)]);
    wait_for("second entry", || engine.ledger().has_open_position("BTC/USDT")).await;
    stop_and_wait(&engine).await;

    assert_eq!(exchange.submission_count(), 2);
    let reopened = engine.ledger().open_position("BTC/USDT").unwrap();
    assert_ne!(reopened.id, pending.id);
    assert_eq!(reopened.quantity, 2.0);

    let stored = assert_ok!(store.load_positions().await);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, reopened.id);
}

#[tokio::test]
async fn test_reconcile_drops_entry_the_exchange_never_saw() {
    let ledger = PositionLedger::new();
    let entry = OrderRequest::market("BTC/USDT", OrderSide::Sell, 1.0);
    let position = ledger
        .record_entry(
            "BTC/USDT",
            Side::Short,
            Order::pending(&entry, OrderPurpose::Entry),
            100.0,
        )
        .unwrap();

    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 100.0)]));
    let exchange = Arc::new(FakeExchange::new(100.0));
    let evaluator = Arc::new(ScriptedEvaluator::default());
    let engine = engine(
        config(&["BTC/USDT"], Duration::from_secs(3600)),
        &gateway,
        &exchange,
        &evaluator,
        ledger,
        None,
    );

    engine.start().unwrap();
    wait_for("dropped entry", || !engine.ledger().has_open_position("BTC/USDT")).await;
    stop_and_wait(&engine).await;

    assert!(engine.ledger().position(position.id).is_none());
    assert!(engine.ledger().history().is_empty());
    assert_eq!(exchange.submission_count(), 0);
}

#[tokio::test]
async fn test_trades_are_persisted_and_restored() {
    let store = TradeStore::new("sqlite::memory:").await.unwrap();
    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 100.0)]));
    let exchange = Arc::new(FakeExchange::new(100.0));
    let evaluator = Arc::new(ScriptedEvaluator::with_script(
        "BTC/USDT",
        vec![Decision::EnterLong(1.0), Decision::Exit, Decision::EnterLong(3.0)],
    ));
    let engine = engine(
        config(&["BTC/USDT"], Duration::from_millis(10)),
        &gateway,
        &exchange,
        &evaluator,
        PositionLedger::new(),
        Some(store.clone()),
    );

    engine.start().unwrap();
    wait_for("second entry", || {
        engine.ledger().history().len() == 1 && engine.ledger().open_position("BTC/USDT").is_some()
    })
    .await;
    stop_and_wait(&engine).await;

    let history = store.load_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].orders.len(), 2);

    let restored = PositionLedger::with_positions(store.load_positions().await.unwrap());
    assert_eq!(restored.history().len(), 1);
    let open = restored.open_position("BTC/USDT").unwrap();
    assert_eq!(open.quantity, 3.0);
}

#[tokio::test]
async fn test_commands_through_queue_while_stopped() {
    let gateway = Arc::new(FakeGateway::new(&[("BTC/USDT", 100.0)]));
    let exchange = Arc::new(FakeExchange::new(100.0));
    let evaluator = Arc::new(ScriptedEvaluator::default());
    let engine = engine(
        config(&["BTC/USDT"], Duration::from_secs(3600)),
        &gateway,
        &exchange,
        &evaluator,
        PositionLedger::new(),
        None,
    );
    let client: Arc<dyn ExchangeClient> = exchange.clone();

    let (queue, handle) = CommandQueue::new(CommandRouter::new(engine.clone(), client), 8);
    tokio::spawn(queue.run());

    match handle.submit(Command::Balance).await {
        CommandReply::Balance(balance) => {
            assert_eq!(balance["USDT"].available, 5_000.0);
            assert_eq!(balance["USDT"].locked, 250.0);
        }
        other => panic!("unexpected reply: {:?}", other),
    }
    assert!(matches!(
        handle.submit(Command::StopBot).await,
        CommandReply::Control(ControlError::NotRunning)
    ));
    assert!(matches!(handle.submit(Command::RunBot).await, CommandReply::Started));
    assert!(matches!(handle.submit(Command::StopBot).await, CommandReply::Stopped));
    engine.wait_stopped().await;
    // Repeating stop right after the loop stopped is a no-op
    assert!(matches!(handle.submit(Command::StopBot).await, CommandReply::Stopped));
}
