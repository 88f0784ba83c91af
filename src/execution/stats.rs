use serde::{Deserialize, Serialize};

use super::ledger::Position;

/// Performance summary of closed trades
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    pub total_pnl: f64,
    pub avg_win: f64,
    /// Reported as a positive amount
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64, // Total wins / Total losses
}

impl TradeStats {
    /// Calculate statistics from closed positions; open positions are ignored
    pub fn from_history(positions: &[Position]) -> Self {
        let pnls: Vec<f64> = positions
            .iter()
            .filter(|p| !p.is_open())
            .filter_map(|p| p.realized_pnl)
            .collect();

        let total_trades = pnls.len();
        if total_trades == 0 {
            return Self::empty();
        }

        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p <= 0.0).collect();

        let total_wins: f64 = wins.iter().sum();
        let total_losses: f64 = losses.iter().map(|p| p.abs()).sum();

        let avg_win = if wins.is_empty() {
            0.0
        } else {
            total_wins / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            total_losses / losses.len() as f64
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Self {
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: wins.len() as f64 / total_trades as f64 * 100.0,
            total_pnl: pnls.iter().sum(),
            avg_win,
            avg_loss,
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            profit_factor,
        }
    }

    fn empty() -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            total_pnl: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
            profit_factor: 0.0,
        }
    }

    /// Print formatted statistics
    pub fn print(&self) {
        println!("\n=== Trade Statistics ===");
        println!("Total Trades:   {}", self.total_trades);
        println!(
            "Wins / Losses:  {} / {}",
            self.winning_trades, self.losing_trades
        );
        println!("Win Rate:       {:.2}%", self.win_rate);
        println!("Total Profit:   ${:.2}", self.total_pnl);
        println!("Average Win:    ${:.2}", self.avg_win);
        println!("Average Loss:   ${:.2}", self.avg_loss);
        println!("Largest Win:    ${:.2}", self.largest_win);
        println!("Largest Loss:   ${:.2}", self.largest_loss);
        println!("Profit Factor:  {:.2}", self.profit_factor);
    }
}
