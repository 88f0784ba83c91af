pub mod binance;
pub mod telegram;

pub use binance::{BinanceClient, BinanceConfig};
pub use telegram::{run_bot, TelegramClient};
