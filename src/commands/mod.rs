//! Command interface between the chat transport and the engine.
//!
//! Commands are parsed from chat text, queued on a bounded channel and served
//! one at a time by a dispatcher task. The router only forwards to the engine
//! control API, the ledger and the exchange balance query.

mod queue;
mod render;

pub use queue::{CommandQueue, QueueHandle};
pub use render::render;

use std::sync::Arc;

use crate::engine::{EngineStatus, TradingEngine};
use crate::error::{ControlError, ExchangeError};
use crate::execution::{with_timeout, ExchangeClient, Position, TradeStats};
use crate::models::Balance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Welcome,
    RunBot,
    StopBot,
    Status,
    Balance,
    Positions,
    Stats,
}

impl Command {
    /// Parse `/verb` chat text; a `@botname` suffix and trailing arguments are ignored
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let verb = word.strip_prefix('/')?;
        let verb = verb.split('@').next().unwrap_or(verb);

        match verb.to_ascii_lowercase().as_str() {
            "start" => Some(Command::Welcome),
            "runbot" => Some(Command::RunBot),
            "stopbot" | "stop" => Some(Command::StopBot),
            "status" => Some(Command::Status),
            "balance" => Some(Command::Balance),
            "positions" => Some(Command::Positions),
            "stats" => Some(Command::Stats),
            _ => None,
        }
    }
}

/// Result of one command, rendered for chat by `render`
#[derive(Debug, Clone)]
pub enum CommandReply {
    Welcome,
    Started,
    Stopped,
    Status(EngineStatus),
    Balance(Balance),
    Positions(Vec<Position>),
    Stats {
        stats: TradeStats,
        history: Vec<Position>,
    },
    Control(ControlError),
    ExchangeFailure(ExchangeError),
    Busy,
}

/// Maps commands to engine and ledger queries
#[derive(Clone)]
pub struct CommandRouter {
    engine: TradingEngine,
    exchange: Arc<dyn ExchangeClient>,
}

impl CommandRouter {
    pub fn new(engine: TradingEngine, exchange: Arc<dyn ExchangeClient>) -> Self {
        Self { engine, exchange }
    }

    pub async fn handle(&self, command: Command) -> CommandReply {
        tracing::debug!("Handling command {:?}", command);

        match command {
            Command::Welcome => CommandReply::Welcome,
            Command::RunBot => match self.engine.start() {
                Ok(()) => CommandReply::Started,
                Err(e) => CommandReply::Control(e),
            },
            Command::StopBot => match self.engine.stop() {
                Ok(()) => CommandReply::Stopped,
                Err(e) => CommandReply::Control(e),
            },
            Command::Status => CommandReply::Status(self.engine.status()),
            Command::Balance => {
                let timeout = self.engine.config().retry.call_timeout;
                match with_timeout(timeout, self.exchange.get_balance()).await {
                    Ok(balance) => CommandReply::Balance(balance),
                    Err(e) => {
                        tracing::warn!("Balance query failed: {}", e);
                        CommandReply::ExchangeFailure(e)
                    }
                }
            }
            Command::Positions => CommandReply::Positions(self.engine.ledger().open_positions()),
            Command::Stats => {
                let history = self.engine.ledger().history();
                CommandReply::Stats {
                    stats: TradeStats::from_history(&history),
                    history,
                }
            }
        }
    }
}
