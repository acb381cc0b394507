use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use vendra_core::repository::RouteRepository;
use vendra_core::PackageRoute;

pub struct StoreRouteRepository {
    pool: PgPool,
}

impl StoreRouteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_route(row: &PgRow) -> Result<PackageRoute, Box<dyn std::error::Error + Send + Sync>> {
    Ok(PackageRoute {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        package_id: row.try_get("package_id")?,
        integration_id: row.try_get("integration_id")?,
        external_package_id: row.try_get("external_package_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl RouteRepository for StoreRouteRepository {
    async fn find_route(
        &self,
        tenant_id: Uuid,
        package_id: Uuid,
    ) -> Result<Option<PackageRoute>, Box<dyn std::error::Error + Send + Sync>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, package_id, integration_id, external_package_id, created_at, updated_at \
             FROM package_routes WHERE tenant_id = $1 AND package_id = $2",
        )
        .bind(tenant_id)
        .bind(package_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_route).transpose()
    }

    async fn upsert_route(
        &self,
        route: &PackageRoute,
    ) -> Result<PackageRoute, Box<dyn std::error::Error + Send + Sync>> {
        // The (tenant, package) constraint makes a second route a
        // replacement, never a duplicate.
        let row = sqlx::query(
            r#"
            INSERT INTO package_routes (id, tenant_id, package_id, integration_id, external_package_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, package_id) DO UPDATE SET
                integration_id = EXCLUDED.integration_id,
                external_package_id = EXCLUDED.external_package_id,
                updated_at = NOW()
            RETURNING id, tenant_id, package_id, integration_id, external_package_id, created_at, updated_at
            "#,
        )
        .bind(route.id)
        .bind(route.tenant_id)
        .bind(route.package_id)
        .bind(route.integration_id)
        .bind(&route.external_package_id)
        .fetch_one(&self.pool)
        .await?;
        row_to_route(&row)
    }

    async fn delete_route(
        &self,
        tenant_id: Uuid,
        package_id: Uuid,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let result = sqlx::query(
            "DELETE FROM package_routes WHERE tenant_id = $1 AND package_id = $2",
        )
        .bind(tenant_id)
        .bind(package_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
