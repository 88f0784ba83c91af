use autotrader::config::Settings;
use autotrader::db::TradeStore;
use autotrader::execution::TradeStats;
use autotrader::Result;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("autotrader=warn")
        .init();

    let path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let settings = Settings::load(path.as_deref())?;
    let Some(url) = settings.database.url.as_deref() else {
        eprintln!("No database configured (database.url)");
        return Ok(());
    };

    let store = TradeStore::new(url).await?;
    let history = store.load_history().await?;

    if history.is_empty() {
        println!("No closed trades in {}", url);
        return Ok(());
    }

    println!("\n{:<12} {:<6} {:>12} {:>12} {:>12}  Closed", "Pair", "Side", "Entry", "Exit", "P&L");
    for position in &history {
        println!(
            "{:<12} {:<6} {:>12.4} {:>12.4} {:>12.2}  {}",
            position.pair,
            position.side.as_str(),
            position.entry_price,
            position.exit_price.unwrap_or_default(),
            position.realized_pnl.unwrap_or_default(),
            position
                .exit_time
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default()
        );
    }

    TradeStats::from_history(&history).print();
    Ok(())
}
