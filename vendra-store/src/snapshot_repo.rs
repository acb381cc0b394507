use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use vendra_catalog::{BalanceSnapshot, CatalogSnapshot, SnapshotStore};

pub struct StoreSnapshotRepository {
    pool: PgPool,
}

impl StoreSnapshotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_balance(row: &PgRow) -> Result<BalanceSnapshot, Box<dyn std::error::Error + Send + Sync>> {
    Ok(BalanceSnapshot {
        integration_id: row.try_get("integration_id")?,
        balance: row.try_get("balance")?,
        error: row.try_get("error")?,
        message: row.try_get("message")?,
        refreshed_at: row.try_get("refreshed_at")?,
    })
}

fn row_to_catalog(row: &PgRow) -> Result<CatalogSnapshot, Box<dyn std::error::Error + Send + Sync>> {
    let products_raw: String = row.try_get("products")?;
    Ok(CatalogSnapshot {
        integration_id: row.try_get("integration_id")?,
        products: serde_json::from_str(&products_raw)?,
        error: row.try_get("error")?,
        refreshed_at: row.try_get("refreshed_at")?,
    })
}

#[async_trait]
impl SnapshotStore for StoreSnapshotRepository {
    async fn put_balance(
        &self,
        snapshot: &BalanceSnapshot,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        sqlx::query(
            r#"
            INSERT INTO balance_snapshots (integration_id, balance, error, message, refreshed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (integration_id) DO UPDATE SET
                balance = EXCLUDED.balance,
                error = EXCLUDED.error,
                message = EXCLUDED.message,
                refreshed_at = EXCLUDED.refreshed_at
            "#,
        )
        .bind(snapshot.integration_id)
        .bind(snapshot.balance)
        .bind(&snapshot.error)
        .bind(&snapshot.message)
        .bind(snapshot.refreshed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_catalog(
        &self,
        snapshot: &CatalogSnapshot,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let products = serde_json::to_string(&snapshot.products)?;
        sqlx::query(
            r#"
            INSERT INTO catalog_snapshots (integration_id, products, error, refreshed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (integration_id) DO UPDATE SET
                products = EXCLUDED.products,
                error = EXCLUDED.error,
                refreshed_at = EXCLUDED.refreshed_at
            "#,
        )
        .bind(snapshot.integration_id)
        .bind(&products)
        .bind(&snapshot.error)
        .bind(snapshot.refreshed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_balance(
        &self,
        integration_id: Uuid,
    ) -> Result<Option<BalanceSnapshot>, Box<dyn std::error::Error + Send + Sync>> {
        let row = sqlx::query(
            "SELECT integration_id, balance, error, message, refreshed_at \
             FROM balance_snapshots WHERE integration_id = $1",
        )
        .bind(integration_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_balance).transpose()
    }

    async fn get_catalog(
        &self,
        integration_id: Uuid,
    ) -> Result<Option<CatalogSnapshot>, Box<dyn std::error::Error + Send + Sync>> {
        let row = sqlx::query(
            "SELECT integration_id, products, error, refreshed_at \
             FROM catalog_snapshots WHERE integration_id = $1",
        )
        .bind(integration_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_catalog).transpose()
    }
}
