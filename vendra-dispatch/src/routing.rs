use std::sync::Arc;
use uuid::Uuid;

use vendra_core::repository::RouteRepository;
use vendra_core::PackageRoute;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("No active route for package {package_id} of tenant {tenant_id}")]
    NotRouted { tenant_id: Uuid, package_id: Uuid },

    #[error("Route lookup failed: {0}")]
    LookupFailed(String),
}

/// Resolves an internal (tenant, package) pair to the provider integration
/// and external package that fulfills it.
pub struct RoutingResolver {
    routes: Arc<dyn RouteRepository>,
}

impl RoutingResolver {
    pub fn new(routes: Arc<dyn RouteRepository>) -> Self {
        Self { routes }
    }

    /// Pure lookup, no side effects. Hits storage on every call: operators
    /// may repoint a package between attempts of the same order, and a stale
    /// route must never send a retry to the provider that lost the package.
    pub async fn resolve(
        &self,
        tenant_id: Uuid,
        package_id: Uuid,
    ) -> Result<PackageRoute, RoutingError> {
        let route = self
            .routes
            .find_route(tenant_id, package_id)
            .await
            .map_err(|err| RoutingError::LookupFailed(err.to_string()))?;
        route.ok_or(RoutingError::NotRouted {
            tenant_id,
            package_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemRoutes {
        routes: Mutex<HashMap<(Uuid, Uuid), PackageRoute>>,
    }

    #[async_trait]
    impl RouteRepository for MemRoutes {
        async fn find_route(
            &self,
            tenant_id: Uuid,
            package_id: Uuid,
        ) -> Result<Option<PackageRoute>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self
                .routes
                .lock()
                .unwrap()
                .get(&(tenant_id, package_id))
                .cloned())
        }

        async fn upsert_route(
            &self,
            route: &PackageRoute,
        ) -> Result<PackageRoute, Box<dyn std::error::Error + Send + Sync>> {
            self.routes
                .lock()
                .unwrap()
                .insert((route.tenant_id, route.package_id), route.clone());
            Ok(route.clone())
        }

        async fn delete_route(
            &self,
            tenant_id: Uuid,
            package_id: Uuid,
        ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self
                .routes
                .lock()
                .unwrap()
                .remove(&(tenant_id, package_id))
                .is_some())
        }
    }

    #[tokio::test]
    async fn test_resolver_returns_the_single_active_route() {
        let repo = Arc::new(MemRoutes::default());
        let tenant = Uuid::new_v4();
        let package = Uuid::new_v4();
        let integration_a = Uuid::new_v4();
        let integration_b = Uuid::new_v4();

        repo.upsert_route(&PackageRoute::new(
            tenant,
            package,
            integration_a,
            "A-100".to_string(),
        ))
        .await
        .unwrap();

        let resolver = RoutingResolver::new(repo.clone());
        let route = resolver.resolve(tenant, package).await.unwrap();
        assert_eq!(route.integration_id, integration_a);

        // A second route for the same pair replaces the first.
        repo.upsert_route(&PackageRoute::new(
            tenant,
            package,
            integration_b,
            "B-7".to_string(),
        ))
        .await
        .unwrap();

        let route = resolver.resolve(tenant, package).await.unwrap();
        assert_eq!(route.integration_id, integration_b);
        assert_eq!(route.external_package_id, "B-7");
    }

    #[tokio::test]
    async fn test_unrouted_package_is_not_routed() {
        let resolver = RoutingResolver::new(Arc::new(MemRoutes::default()));
        let result = resolver.resolve(Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(matches!(result, Err(RoutingError::NotRouted { .. })));
    }
}
