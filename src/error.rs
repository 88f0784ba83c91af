use thiserror::Error;
use uuid::Uuid;

/// Market data could not be fetched for a pair
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MarketDataError {
    #[error("market data unavailable: {0}")]
    DataUnavailable(String),
}

/// Error reported by the exchange (or the transport in front of it)
///
/// `retryable` decides whether the same logical order may be attempted again.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("exchange error {code}: {message}")]
pub struct ExchangeError {
    pub code: i64,
    pub message: String,
    pub retryable: bool,
}

impl ExchangeError {
    pub fn retryable(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
        }
    }

    /// A call that did not answer within its deadline
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::retryable(-1, format!("timed out after {:?}", after))
    }

    /// Network-level failure before any exchange response
    pub fn transport(message: impl Into<String>) -> Self {
        Self::retryable(-2, message)
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::fatal(-3, format!("invalid response: {}", err))
        } else {
            Self::transport(err.to_string())
        }
    }
}

/// Violations of the ledger invariants
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("an open position already exists for {0}")]
    DuplicateOpenPosition(String),

    #[error("position {0} not found")]
    PositionNotFound(Uuid),

    #[error("position {0} is already closed")]
    PositionClosed(Uuid),

    #[error("order {0} not found")]
    OrderNotFound(String),
}

/// Control errors surfaced verbatim to the command interface
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("Trading bot is already running.")]
    AlreadyRunning,

    #[error("Trading bot is not running.")]
    NotRunning,
}

/// Why a single pair's tick was aborted
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TickError {
    #[error(transparent)]
    DataUnavailable(#[from] MarketDataError),

    #[error("submission failed for {pair} (key {key}) after {attempts} attempt(s): {source}")]
    SubmissionFailed {
        pair: String,
        key: String,
        attempts: u32,
        #[source]
        source: ExchangeError,
    },

    #[error("order {key} for {pair} ended {status} without a fill")]
    Rejected {
        pair: String,
        key: String,
        status: String,
    },

    #[error("order query failed: {0}")]
    Query(#[source] ExchangeError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
