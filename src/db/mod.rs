// Trade history persistence
pub mod sqlite;

pub use sqlite::TradeStore;
