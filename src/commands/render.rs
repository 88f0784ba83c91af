use std::fmt::Write;

use super::CommandReply;
use crate::engine::EngineStatus;
use crate::execution::{Position, TradeStats};
use crate::models::Balance;

/// Plain-text chat message for a reply
pub fn render(reply: &CommandReply) -> String {
    match reply {
        CommandReply::Welcome => "Welcome To AutoTrader".to_string(),
        CommandReply::Started => "Trading bot started!".to_string(),
        CommandReply::Stopped => "Trading bot stopped!".to_string(),
        CommandReply::Status(status) => render_status(status),
        CommandReply::Balance(balance) => render_balance(balance),
        CommandReply::Positions(positions) => render_positions(positions),
        CommandReply::Stats { stats, history } => render_stats(stats, history),
        CommandReply::Control(e) => e.to_string(),
        CommandReply::ExchangeFailure(e) => format!("Unable to fetch balance: {}", e.message),
        CommandReply::Busy => "Busy, try again in a moment.".to_string(),
    }
}

fn render_status(status: &EngineStatus) -> String {
    let mut out = format!("Status: {}\n", status.state);
    let _ = writeln!(out, "Strategy: {} on {}", status.strategy, status.exchange);
    if let Some(started) = status.started_at {
        let _ = writeln!(out, "Started: {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    let _ = writeln!(out, "Cycles: {}", status.cycles);
    let _ = writeln!(out, "Open positions: {}", status.open_positions.len());
    for position in &status.open_positions {
        let _ = writeln!(out, "  {}", position_line(position));
    }
    if !status.last_errors.is_empty() {
        out.push_str("Last errors:\n");
        for (pair, error) in &status.last_errors {
            let _ = writeln!(out, "  {}: {}", pair, error);
        }
    }
    out.trim_end().to_string()
}

fn render_balance(balance: &Balance) -> String {
    let assets: Vec<_> = balance.iter().filter(|(_, b)| b.total() > 0.0).collect();
    if assets.is_empty() {
        return "Balance: empty".to_string();
    }

    let mut out = String::from("Balance:");
    for (asset, amount) in assets {
        let _ = write!(
            out,
            "\n  {}: {:.4} available, {:.4} locked",
            asset, amount.available, amount.locked
        );
    }
    out
}

fn render_positions(positions: &[Position]) -> String {
    if positions.is_empty() {
        return "No open positions.".to_string();
    }

    let mut out = String::from("Open positions:");
    for position in positions {
        let _ = write!(out, "\n  {}", position_line(position));
    }
    out
}

fn render_stats(stats: &TradeStats, history: &[Position]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total Trades: {}", stats.total_trades);
    let _ = writeln!(out, "Total Profit: {:.2}", stats.total_pnl);
    let _ = writeln!(out, "Win Rate: {:.2}%", stats.win_rate);
    let _ = writeln!(out, "Average Win: {:.2}", stats.avg_win);
    let _ = writeln!(out, "Average Loss: {:.2}", stats.avg_loss);
    let _ = write!(out, "Profit Factor: {:.2}", stats.profit_factor);

    if let Some(last) = history.last() {
        let _ = write!(
            out,
            "\nLast trade: {} {} {:.2}",
            last.pair,
            last.side,
            last.realized_pnl.unwrap_or_default()
        );
    }
    out
}

fn position_line(position: &Position) -> String {
    let mut line = format!(
        "{} {} {:.6} @ {:.4} since {}",
        position.pair,
        position.side,
        position.quantity,
        position.entry_price,
        position.entry_time.format("%Y-%m-%d %H:%M")
    );
    if position.pending_exit().is_some() {
        line.push_str(" (exit pending)");
    }
    line
}
