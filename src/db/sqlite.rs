use crate::execution::{Order, OrderPurpose, OrderStatus, Position, PositionStatus};
use crate::models::{OrderSide, Side};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// SQLite persistence for positions and their orders
///
/// Positions are upserted by id and orders by idempotency key, so saving the
/// same position repeatedly only ever moves it forward. Closed positions are
/// never deleted; only positions whose entry never filled are removed.
#[derive(Debug, Clone)]
pub struct TradeStore {
    pool: SqlitePool,
}

impl TradeStore {
    /// Open (or create) the database and run migrations
    ///
    /// # Arguments
    /// * `database_url` - e.g. `sqlite://autotrader.db` or `sqlite::memory:`
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to an in-memory database is a separate database
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        }
        .connect_with(options)
        .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to SQLite at {}", database_url);

        Ok(Self { pool })
    }

    /// Save a position and all of its orders
    pub async fn save_position(&self, position: &Position) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO positions (
                id, pair, side, entry_price, quantity, entry_time,
                exit_price, exit_time, realized_pnl, status
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (id) DO UPDATE SET
                entry_price = excluded.entry_price,
                quantity = excluded.quantity,
                exit_price = excluded.exit_price,
                exit_time = excluded.exit_time,
                realized_pnl = excluded.realized_pnl,
                status = excluded.status,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(position.id.to_string())
        .bind(&position.pair)
        .bind(position.side.as_str())
        .bind(position.entry_price)
        .bind(position.quantity)
        .bind(position.entry_time)
        .bind(position.exit_price)
        .bind(position.exit_time)
        .bind(position.realized_pnl)
        .bind(position.status.as_str())
        .execute(&mut *tx)
        .await?;

        for order in &position.orders {
            sqlx::query(
                r#"
                INSERT INTO orders (
                    idempotency_key, position_id, exchange_order_id, pair, side, purpose,
                    quantity, requested_price, fill_price, status, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT (idempotency_key) DO UPDATE SET
                    exchange_order_id = excluded.exchange_order_id,
                    quantity = excluded.quantity,
                    fill_price = excluded.fill_price,
                    status = excluded.status,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&order.idempotency_key)
            .bind(position.id.to_string())
            .bind(&order.exchange_order_id)
            .bind(&order.pair)
            .bind(order.side.as_str())
            .bind(order.purpose.as_str())
            .bind(order.quantity)
            .bind(order.requested_price)
            .bind(order.fill_price)
            .bind(order.status.as_str())
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            "Saved position {} for {} ({} orders)",
            position.id,
            position.pair,
            position.orders.len()
        );

        Ok(())
    }

    /// Remove a position that never held anything, together with its orders
    pub async fn delete_position(&self, position_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM orders WHERE position_id = ?1")
            .bind(position_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM positions WHERE id = ?1")
            .bind(position_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!("Deleted position {}", position_id);
        Ok(())
    }

    /// Load every position, oldest entry first, with its orders attached
    pub async fn load_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pair, side, entry_price, quantity, entry_time,
                   exit_price, exit_time, realized_pnl, status
            FROM positions
            ORDER BY entry_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let positions = self.hydrate(rows).await?;
        tracing::info!("Loaded {} positions from SQLite", positions.len());
        Ok(positions)
    }

    /// Closed positions in the order they were closed
    pub async fn load_history(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pair, side, entry_price, quantity, entry_time,
                   exit_price, exit_time, realized_pnl, status
            FROM positions
            WHERE status = 'CLOSED'
            ORDER BY exit_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn hydrate(&self, rows: Vec<SqliteRow>) -> Result<Vec<Position>> {
        let mut orders = self.load_orders().await?;

        rows.iter()
            .map(|row| {
                let mut position = position_from_row(row)?;
                position.orders = orders.remove(&position.id).unwrap_or_default();
                Ok(position)
            })
            .collect()
    }

    async fn load_orders(&self) -> Result<HashMap<Uuid, Vec<Order>>> {
        let rows = sqlx::query(
            r#"
            SELECT idempotency_key, position_id, exchange_order_id, pair, side, purpose,
                   quantity, requested_price, fill_price, status, created_at, updated_at
            FROM orders
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut orders: HashMap<Uuid, Vec<Order>> = HashMap::new();
        for row in rows {
            let position_id = Uuid::parse_str(row.try_get::<&str, _>("position_id")?)?;
            orders
                .entry(position_id)
                .or_default()
                .push(order_from_row(&row)?);
        }

        Ok(orders)
    }

    /// Remove everything (tests and manual resets)
    pub async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM orders").execute(&self.pool).await?;
        sqlx::query("DELETE FROM positions")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn position_from_row(row: &SqliteRow) -> Result<Position> {
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;

    Ok(Position {
        id: Uuid::parse_str(row.try_get::<&str, _>("id")?)?,
        pair: row.try_get("pair")?,
        side: Side::parse(&side).ok_or_else(|| format!("Invalid side: {}", side))?,
        entry_price: row.try_get("entry_price")?,
        quantity: row.try_get("quantity")?,
        entry_time: row.try_get::<DateTime<Utc>, _>("entry_time")?,
        exit_price: row.try_get("exit_price")?,
        exit_time: row.try_get::<Option<DateTime<Utc>>, _>("exit_time")?,
        realized_pnl: row.try_get("realized_pnl")?,
        status: PositionStatus::parse(&status)
            .ok_or_else(|| format!("Invalid position status: {}", status))?,
        orders: Vec::new(),
    })
}

fn order_from_row(row: &SqliteRow) -> Result<Order> {
    let side: String = row.try_get("side")?;
    let purpose: String = row.try_get("purpose")?;
    let status: String = row.try_get("status")?;

    Ok(Order {
        idempotency_key: row.try_get("idempotency_key")?,
        exchange_order_id: row.try_get("exchange_order_id")?,
        pair: row.try_get("pair")?,
        side: OrderSide::parse(&side).ok_or_else(|| format!("Invalid order side: {}", side))?,
        purpose: OrderPurpose::parse(&purpose)
            .ok_or_else(|| format!("Invalid order purpose: {}", purpose))?,
        quantity: row.try_get("quantity")?,
        requested_price: row.try_get("requested_price")?,
        fill_price: row.try_get("fill_price")?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| format!("Invalid order status: {}", status))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
