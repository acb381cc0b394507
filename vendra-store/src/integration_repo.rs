use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use vendra_core::repository::IntegrationRepository;
use vendra_core::{IntegrationConfig, ProviderKind};

pub struct StoreIntegrationRepository {
    pool: PgPool,
}

impl StoreIntegrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_integration(
    row: &PgRow,
) -> Result<IntegrationConfig, Box<dyn std::error::Error + Send + Sync>> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = ProviderKind::parse(&kind_raw)
        .ok_or_else(|| format!("unrecognized provider kind '{}'", kind_raw))?;
    let credential_raw: String = row.try_get("credential")?;

    Ok(IntegrationConfig {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        kind,
        base_url: row.try_get("base_url")?,
        credential: serde_json::from_str(&credential_raw)?,
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl IntegrationRepository for StoreIntegrationRepository {
    async fn get_integration(
        &self,
        id: Uuid,
    ) -> Result<Option<IntegrationConfig>, Box<dyn std::error::Error + Send + Sync>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, kind, base_url, credential, enabled, created_at, updated_at \
             FROM integrations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_integration).transpose()
    }

    async fn list_enabled(
        &self,
    ) -> Result<Vec<IntegrationConfig>, Box<dyn std::error::Error + Send + Sync>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, kind, base_url, credential, enabled, created_at, updated_at \
             FROM integrations WHERE enabled ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_integration).collect()
    }
}
