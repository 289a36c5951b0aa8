use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    DecrementOutcome, FulfillmentReport, Item, ItemId, ItemPatch, LineOutcome, LineStatus,
    NewItem, OrderRequest, Result, StoreError, store::ItemStore,
};

const ITEM_COLUMNS: &str = "id, name, available_units, attributes, created_at, updated_at";

/// PostgreSQL-backed item store implementation.
///
/// Stock decrements are single conditional `UPDATE` statements, so the
/// database serializes concurrent decrements on the same row and the
/// `available_units >= n` guard is evaluated against the committed value.
#[derive(Clone)]
pub struct PostgresItemStore {
    pool: PgPool,
}

impl PostgresItemStore {
    /// Creates a new PostgreSQL item store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_item(row: PgRow) -> Result<Item> {
        let units: i64 = row.try_get("available_units")?;
        let available_units = u32::try_from(units)
            .map_err(|_| StoreError::InvalidRow(format!("available_units out of range: {units}")))?;

        let attributes = match row.try_get::<Value, _>("attributes")? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(StoreError::InvalidRow(format!(
                    "attributes must be an object, got {other}"
                )));
            }
        };

        Ok(Item {
            id: ItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            available_units,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            attributes,
        })
    }

    /// Maps a unique-name violation to `DuplicateName`.
    fn map_write_error(err: sqlx::Error, name: &str) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.constraint() == Some("unique_item_name")
        {
            return StoreError::DuplicateName(name.to_string());
        }
        StoreError::Database(err)
    }

    /// Conditional decrement shared by `decrement` and `fulfill_order`.
    ///
    /// One statement locks the row, applies the guarded update and reports
    /// the stock it was checked against, so an `Insufficient` result always
    /// carries the value the guard actually saw.
    async fn decrement_on(
        conn: &mut PgConnection,
        name: &str,
        quantity: u32,
    ) -> Result<DecrementOutcome> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            WITH target AS (
                SELECT id, available_units FROM items WHERE name = $1 FOR UPDATE
            ),
            applied AS (
                UPDATE items
                SET available_units = items.available_units - $2, updated_at = NOW()
                FROM target
                WHERE items.id = target.id AND target.available_units >= $2
                RETURNING items.id, items.name, items.available_units, items.attributes,
                          items.created_at, items.updated_at
            )
            SELECT target.available_units AS checked_units,
                   applied.id, applied.name, applied.available_units, applied.attributes,
                   applied.created_at, applied.updated_at
            FROM target LEFT JOIN applied ON applied.id = target.id
            "#,
        )
        .bind(name)
        .bind(i64::from(quantity))
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(DecrementOutcome::NotFound);
        };

        if row.try_get::<Option<Uuid>, _>("id")?.is_some() {
            return Ok(DecrementOutcome::Applied(Self::row_to_item(row)?));
        }

        let checked: i64 = row.try_get("checked_units")?;
        Ok(DecrementOutcome::Insufficient {
            available: u32::try_from(checked).unwrap_or(0),
        })
    }

    /// Locks every item named by the order in name order, so concurrent
    /// orders touching the same items cannot deadlock on each other.
    async fn lock_order_items(conn: &mut PgConnection, order: &OrderRequest) -> Result<()> {
        let mut names: Vec<String> = order.lines.iter().map(|l| l.name.clone()).collect();
        names.sort();
        names.dedup();

        sqlx::query("SELECT id FROM items WHERE name = ANY($1) ORDER BY name FOR UPDATE")
            .bind(names)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ItemStore for PostgresItemStore {
    async fn insert(&self, item: NewItem) -> Result<Item> {
        let item = item.sanitized();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO items (id, name, available_units, attributes)
            VALUES ($1, $2, $3, $4)
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(ItemId::new().as_uuid())
        .bind(&item.name)
        .bind(i64::from(item.available_units))
        .bind(Value::Object(item.attributes))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::map_write_error(e, &item.name))?;

        Self::row_to_item(row)
    }

    async fn list(&self) -> Result<Vec<Item>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM items ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn get(&self, id: ItemId) -> Result<Option<Item>> {
        let row: Option<PgRow> =
            sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Self::row_to_item).transpose()
    }

    async fn update(&self, id: ItemId, patch: ItemPatch) -> Result<Option<Item>> {
        let patch = patch.sanitized();
        let name = patch.name.clone().unwrap_or_default();

        let row: Option<PgRow> = sqlx::query(&format!(
            r#"
            UPDATE items
            SET name = COALESCE($2, name),
                available_units = COALESCE($3, available_units),
                attributes = attributes || $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(patch.name)
        .bind(patch.available_units.map(i64::from))
        .bind(Value::Object(patch.attributes))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Self::map_write_error(e, &name))?;

        row.map(Self::row_to_item).transpose()
    }

    async fn delete(&self, id: ItemId) -> Result<Option<Item>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "DELETE FROM items WHERE id = $1 RETURNING {ITEM_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_item).transpose()
    }

    async fn decrement(&self, name: &str, quantity: u32) -> Result<DecrementOutcome> {
        let mut conn = self.pool.acquire().await?;
        Self::decrement_on(&mut *conn, name, quantity).await
    }

    async fn fulfill_order(&self, order: &OrderRequest) -> Result<FulfillmentReport> {
        let mut tx = self.pool.begin().await?;

        // A concurrent delivery of the same order blocks here until the first
        // transaction commits, then sees the conflict.
        let claimed = sqlx::query(
            r#"
            INSERT INTO processed_orders (order_id)
            VALUES ($1)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order.order_id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            let outcome: Value =
                sqlx::query_scalar("SELECT outcome FROM processed_orders WHERE order_id = $1")
                    .bind(order.order_id.as_str())
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return Ok(FulfillmentReport {
                order_id: order.order_id.clone(),
                duplicate: true,
                lines: serde_json::from_value(outcome)?,
            });
        }

        Self::lock_order_items(&mut *tx, order).await?;

        // Lines are applied and reported in message order.
        let mut lines = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            let outcome = Self::decrement_on(&mut *tx, &line.name, line.quantity).await?;
            lines.push(LineOutcome {
                name: line.name.clone(),
                quantity: line.quantity,
                status: LineStatus::from(&outcome),
            });
        }

        sqlx::query("UPDATE processed_orders SET outcome = $2 WHERE order_id = $1")
            .bind(order.order_id.as_str())
            .bind(serde_json::to_value(&lines)?)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(FulfillmentReport {
            order_id: order.order_id.clone(),
            duplicate: false,
            lines,
        })
    }
}
