// Order execution, position bookkeeping and exchange boundary
pub mod exchange;
pub mod ledger;
pub mod order;
pub mod paper;
pub mod retry;
pub mod stats;

#[cfg(test)]
pub(crate) mod mock;

pub use exchange::{ExchangeClient, MarketDataGateway};
pub use ledger::{Position, PositionLedger, PositionStatus};
pub use order::{generate_idempotency_key, Order, OrderAck, OrderPurpose, OrderRequest, OrderStatus};
pub use paper::PaperExchange;
pub use retry::{submit_with_retry, with_timeout, ExponentialBackoff, RetryPolicy};
pub use stats::TradeStats;
