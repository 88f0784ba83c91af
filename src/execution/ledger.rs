use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::order::{Order, OrderPurpose};
use crate::error::LedgerError;
use crate::models::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(PositionStatus::Open),
            "CLOSED" => Some(PositionStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub pair: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub realized_pnl: Option<f64>,
    pub status: PositionStatus,
    pub orders: Vec<Order>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Exit order that was sent but has not reached a terminal state
    pub fn pending_exit(&self) -> Option<&Order> {
        self.orders
            .iter()
            .find(|o| o.purpose == OrderPurpose::Exit && !o.status.is_terminal())
    }

    /// Orders the exchange may still be working on
    pub fn unsettled_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| !o.status.is_terminal())
    }

    /// Unrealized P&L at the given price
    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        self.side.pnl(self.entry_price, current_price, self.quantity)
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    open: Vec<Position>,
    /// Closed positions in the order they were closed
    closed: Vec<Position>,
    total_pnl: f64,
}

impl LedgerState {
    fn find_open(&self, pair: &str) -> Option<&Position> {
        self.open.iter().find(|p| p.pair == pair)
    }

    fn open_index(&self, position_id: Uuid) -> Result<usize, LedgerError> {
        match self.open.iter().position(|p| p.id == position_id) {
            Some(index) => Ok(index),
            None if self.closed.iter().any(|p| p.id == position_id) => {
                Err(LedgerError::PositionClosed(position_id))
            }
            None => Err(LedgerError::PositionNotFound(position_id)),
        }
    }

    fn get_mut(&mut self, position_id: Uuid) -> Result<&mut Position, LedgerError> {
        self.open
            .iter_mut()
            .chain(self.closed.iter_mut())
            .find(|p| p.id == position_id)
            .ok_or(LedgerError::PositionNotFound(position_id))
    }

    fn get_open_mut(&mut self, position_id: Uuid) -> Result<&mut Position, LedgerError> {
        let index = self.open_index(position_id)?;
        Ok(&mut self.open[index])
    }
}

fn replace_order(position: &mut Position, order: Order) -> Result<(), LedgerError> {
    let slot = position
        .orders
        .iter_mut()
        .find(|o| o.idempotency_key == order.idempotency_key)
        .ok_or_else(|| LedgerError::OrderNotFound(order.idempotency_key.clone()))?;
    *slot = order;
    Ok(())
}

/// In-memory record of every position and its orders
///
/// The single source of truth for what is currently held. Clones share the
/// same state. Writers are serialized by the write lock, and every mutation
/// is applied in full before the lock is released, so readers only ever see
/// committed positions.
#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger and restore previously persisted positions
    ///
    /// Recalculates total P&L from closed positions. If more than one open
    /// position is found for a pair, only the oldest is kept open.
    pub fn with_positions(mut positions: Vec<Position>) -> Self {
        positions.sort_by_key(|p| p.entry_time);

        let mut state = LedgerState::default();
        for position in positions {
            if !position.is_open() {
                state.closed.push(position);
            } else if state.find_open(&position.pair).is_some() {
                tracing::warn!(
                    "Ignoring restored position {}: {} already has an open position",
                    position.id,
                    position.pair
                );
            } else {
                state.open.push(position);
            }
        }

        state.closed.sort_by_key(|p| p.exit_time);
        state.total_pnl = state.closed.iter().filter_map(|p| p.realized_pnl).sum();

        tracing::info!(
            "Restored {} positions ({} closed, total P&L: ${:.2})",
            state.open.len() + state.closed.len(),
            state.closed.len(),
            state.total_pnl
        );

        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// The open position for a pair, if any
    pub fn open_position(&self, pair: &str) -> Option<Position> {
        self.state.read().find_open(pair).cloned()
    }

    pub fn has_open_position(&self, pair: &str) -> bool {
        self.state.read().find_open(pair).is_some()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.state.read().open.clone()
    }

    pub fn position(&self, position_id: Uuid) -> Option<Position> {
        let state = self.state.read();
        state
            .open
            .iter()
            .chain(state.closed.iter())
            .find(|p| p.id == position_id)
            .cloned()
    }

    /// Closed positions, oldest close first
    pub fn history(&self) -> Vec<Position> {
        self.state.read().closed.clone()
    }

    /// Total realized P&L across closed positions
    pub fn total_pnl(&self) -> f64 {
        self.state.read().total_pnl
    }

    /// Open a position from an acknowledged entry order
    pub fn record_entry(
        &self,
        pair: &str,
        side: Side,
        order: Order,
        entry_price: f64,
    ) -> Result<Position, LedgerError> {
        let mut state = self.state.write();

        if state.find_open(pair).is_some() {
            return Err(LedgerError::DuplicateOpenPosition(pair.to_string()));
        }

        let position = Position {
            id: Uuid::new_v4(),
            pair: pair.to_string(),
            side,
            entry_price,
            quantity: order.quantity,
            entry_time: Utc::now(),
            exit_price: None,
            exit_time: None,
            realized_pnl: None,
            status: PositionStatus::Open,
            orders: vec![order],
        };

        state.open.push(position.clone());
        Ok(position)
    }

    /// Attach an additional order (e.g. an exit still working) to an open position
    pub fn attach_order(&self, position_id: Uuid, order: Order) -> Result<Position, LedgerError> {
        let mut state = self.state.write();
        let position = state.get_open_mut(position_id)?;
        position.orders.push(order);
        Ok(position.clone())
    }

    /// Replace an order (matched by idempotency key) with its latest state
    pub fn update_order(&self, position_id: Uuid, order: Order) -> Result<Position, LedgerError> {
        let mut state = self.state.write();
        let position = state.get_mut(position_id)?;
        replace_order(position, order)?;
        Ok(position.clone())
    }

    /// Fold a later report on the entry order into the position
    ///
    /// A non-zero `filled_quantity` becomes the position size, and the
    /// reported average price becomes the entry price.
    pub fn confirm_entry(
        &self,
        position_id: Uuid,
        mut order: Order,
        filled_quantity: f64,
    ) -> Result<Position, LedgerError> {
        let mut state = self.state.write();
        let position = state.get_open_mut(position_id)?;

        if filled_quantity > 0.0 {
            order.quantity = filled_quantity;
        }
        let fill_price = order.fill_price;
        replace_order(position, order)?;

        if filled_quantity > 0.0 {
            position.quantity = filled_quantity;
        }
        if let Some(price) = fill_price {
            position.entry_price = price;
        }
        Ok(position.clone())
    }

    /// Drop an open position whose entry order ended without any fill
    ///
    /// The position leaves the ledger entirely: it is neither open nor part
    /// of the history. Returns the removed position with the final order.
    pub fn void_entry(&self, position_id: Uuid, order: Order) -> Result<Position, LedgerError> {
        let mut state = self.state.write();
        let index = state.open_index(position_id)?;
        replace_order(&mut state.open[index], order)?;
        Ok(state.open.remove(index))
    }

    /// Close a position with its filled exit order
    pub fn record_exit(
        &self,
        position_id: Uuid,
        order: Order,
        exit_price: f64,
    ) -> Result<Position, LedgerError> {
        self.record_exit_at(position_id, order, exit_price, Utc::now())
    }

    pub fn record_exit_at(
        &self,
        position_id: Uuid,
        order: Order,
        exit_price: f64,
        exit_time: DateTime<Utc>,
    ) -> Result<Position, LedgerError> {
        let mut state = self.state.write();
        let index = state.open_index(position_id)?;
        let mut position = state.open.remove(index);

        let pnl = position
            .side
            .pnl(position.entry_price, exit_price, position.quantity);

        match position
            .orders
            .iter_mut()
            .find(|o| o.idempotency_key == order.idempotency_key)
        {
            Some(slot) => *slot = order,
            None => position.orders.push(order),
        }
        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.exit_time = Some(exit_time);
        position.realized_pnl = Some(pnl);

        state.closed.push(position.clone());
        state.total_pnl += pnl;

        Ok(position)
    }
}
