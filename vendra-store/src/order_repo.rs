use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use vendra_core::repository::{DispatchUpdate, OrderRepository};
use vendra_core::{ExternalStatus, FxSnapshot, NewOrder, Order};

pub struct StoreOrderRepository {
    pool: PgPool,
}

impl StoreOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ORDER_COLUMNS: &str = "id, tenant_id, requester_id, package_id, quantity, fields, order_uuid, \
     external_order_id, external_status, attempts, last_message, sent_at, completed_at, \
     next_attempt_at, base_cost, base_sell, fx_rate, cost_amount, sell_amount, profit_amount, \
     fx_locked, created_at, updated_at";

fn row_to_order(row: &PgRow) -> Result<Order, Box<dyn std::error::Error + Send + Sync>> {
    let status_raw: String = row.try_get("external_status")?;
    let external_status = ExternalStatus::parse(&status_raw)
        .ok_or_else(|| format!("unrecognized external_status '{}'", status_raw))?;
    let fields_raw: String = row.try_get("fields")?;

    Ok(Order {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        requester_id: row.try_get("requester_id")?,
        package_id: row.try_get("package_id")?,
        quantity: row.try_get("quantity")?,
        fields: serde_json::from_str(&fields_raw)?,
        idempotency_key: row.try_get("order_uuid")?,
        external_order_id: row.try_get("external_order_id")?,
        external_status,
        attempts: row.try_get("attempts")?,
        last_message: row.try_get("last_message")?,
        sent_at: row.try_get("sent_at")?,
        completed_at: row.try_get("completed_at")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        base_cost: row.try_get("base_cost")?,
        base_sell: row.try_get("base_sell")?,
        fx_rate: row.try_get("fx_rate")?,
        cost_amount: row.try_get("cost_amount")?,
        sell_amount: row.try_get("sell_amount")?,
        profit_amount: row.try_get("profit_amount")?,
        fx_locked: row.try_get("fx_locked")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl OrderRepository for StoreOrderRepository {
    async fn create_order(
        &self,
        new: &NewOrder,
    ) -> Result<Order, Box<dyn std::error::Error + Send + Sync>> {
        let order = Order::from_new(new);
        let fields = serde_json::to_string(&order.fields)?;

        // The partial unique index on (tenant, requester, order_uuid) turns a
        // replayed creation into a no-op; the original row is returned.
        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (id, tenant_id, requester_id, package_id, quantity, fields,
                                order_uuid, external_status, base_cost, base_sell)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (tenant_id, requester_id, order_uuid) WHERE order_uuid IS NOT NULL
            DO NOTHING
            "#,
        )
        .bind(order.id)
        .bind(order.tenant_id)
        .bind(order.requester_id)
        .bind(order.package_id)
        .bind(order.quantity)
        .bind(&fields)
        .bind(order.idempotency_key)
        .bind(order.external_status.as_str())
        .bind(order.base_cost)
        .bind(order.base_sell)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            if let Some(key) = new.idempotency_key {
                if let Some(existing) = self
                    .find_by_idempotency_key(new.tenant_id, new.requester_id, key)
                    .await?
                {
                    return Ok(existing);
                }
            }
            return Err("order insert conflicted but no existing row was found".into());
        }

        self.get_order(order.id)
            .await?
            .ok_or_else(|| "order vanished after insert".into())
    }

    async fn get_order(
        &self,
        id: Uuid,
    ) -> Result<Option<Order>, Box<dyn std::error::Error + Send + Sync>> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: Uuid,
        requester_id: Uuid,
        key: Uuid,
    ) -> Result<Option<Order>, Box<dyn std::error::Error + Send + Sync>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE tenant_id = $1 AND requester_id = $2 AND order_uuid = $3",
            ORDER_COLUMNS
        ))
        .bind(tenant_id)
        .bind(requester_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn record_attempt(
        &self,
        id: Uuid,
        message: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        sqlx::query(
            "UPDATE orders SET attempts = attempts + 1, last_message = $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_dispatch_state(
        &self,
        id: Uuid,
        update: DispatchUpdate,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        sqlx::query(
            r#"
            UPDATE orders SET
                external_status = COALESCE($2, external_status),
                external_order_id = COALESCE($3, external_order_id),
                last_message = COALESCE($4, last_message),
                sent_at = COALESCE($5, sent_at),
                completed_at = COALESCE($6, completed_at),
                next_attempt_at = $7,
                attempts = CASE WHEN $8 THEN 0 ELSE attempts END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.external_status.map(|s| s.as_str()))
        .bind(update.external_order_id)
        .bind(update.message)
        .bind(update.sent_at)
        .bind(update.completed_at)
        .bind(update.next_attempt_at)
        .bind(update.reset_attempts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn freeze_fx(
        &self,
        id: Uuid,
        snapshot: &FxSnapshot,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        // The guard in the WHERE clause is the invariant: a locked row is
        // never rewritten.
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                fx_rate = $2, cost_amount = $3, sell_amount = $4, profit_amount = $5,
                fx_locked = TRUE, updated_at = NOW()
            WHERE id = $1 AND NOT fx_locked
            "#,
        )
        .bind(id)
        .bind(snapshot.fx_rate)
        .bind(snapshot.cost_amount)
        .bind(snapshot.sell_amount)
        .bind(snapshot.profit_amount)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_due_for_dispatch(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, Box<dyn std::error::Error + Send + Sync>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders \
             WHERE next_attempt_at IS NOT NULL AND next_attempt_at <= $1 \
               AND external_status NOT IN ('DELIVERED', 'FAILED') \
             ORDER BY next_attempt_at ASC LIMIT $2",
            ORDER_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }
}
