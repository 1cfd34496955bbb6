//! The boundary to a live catalog, and the concurrent observe phase.
//!
//! The core never talks to a real metastore. An external collaborator
//! implements [`CatalogInspector`]; [`observe`] drives it to assemble the
//! observed-state tree the differ compares against.
//!
//! Absence and failure are kept strictly apart: `Ok(None)` means the entity
//! does not exist (and will inform a CREATE), while an [`InspectError`] aborts
//! the whole observation. An unreachable catalog must never be mistaken for a
//! missing one, or the plan would try to recreate the world.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use thiserror::Error;

use stratum_model::{Catalog, Schema};

/// Failure while fetching observed state.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("catalog endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied inspecting {0}")]
    Denied(String),
    #[error("{0}")]
    Other(String),
}

/// Catalog-level attributes plus the names of the schemas it holds.
///
/// The `catalog` field carries no schemas; those are fetched individually so
/// the observe phase can parallelize.
#[derive(Debug, Clone)]
pub struct CatalogSummary {
    pub catalog: Catalog,
    pub schema_names: Vec<String>,
}

/// Read-only view of a live catalog.
#[async_trait]
pub trait CatalogInspector: Send + Sync {
    /// Catalog attributes and schema listing. `Ok(None)` if the catalog does
    /// not exist.
    async fn fetch_catalog(&self, name: &str) -> Result<Option<CatalogSummary>, InspectError>;

    /// One schema with all its tables and volumes. `Ok(None)` if the schema
    /// does not exist.
    async fn fetch_schema(
        &self,
        catalog: &str,
        schema: &str,
    ) -> Result<Option<Schema>, InspectError>;
}

/// Assemble the observed-state tree for `name`.
///
/// Schemas are fetched through a bounded pool of `concurrency` in-flight
/// requests; results are reassembled in listing order so the observed tree is
/// deterministic regardless of completion order. A schema that vanishes
/// between the listing and its fetch is simply omitted.
pub async fn observe(
    inspector: &dyn CatalogInspector,
    name: &str,
    concurrency: usize,
) -> Result<Option<Catalog>, InspectError> {
    let Some(summary) = inspector.fetch_catalog(name).await? else {
        tracing::debug!(catalog = name, "catalog not found, will be created");
        return Ok(None);
    };

    let mut fetched: Vec<(usize, Option<Schema>)> =
        stream::iter(summary.schema_names.iter().enumerate())
            .map(|(index, schema_name)| async move {
                inspector
                    .fetch_schema(name, schema_name)
                    .await
                    .map(|schema| (index, schema))
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await?;
    fetched.sort_by_key(|(index, _)| *index);

    let mut catalog = summary.catalog;
    catalog.schemas = fetched.into_iter().filter_map(|(_, s)| s).collect();
    tracing::debug!(
        catalog = name,
        schemas = catalog.schemas.len(),
        "observed catalog"
    );
    Ok(Some(catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeInspector {
        catalog: Option<Catalog>,
        fail_schema: Option<String>,
        schema_fetches: AtomicUsize,
    }

    impl FakeInspector {
        fn holding(catalog: Catalog) -> Self {
            FakeInspector {
                catalog: Some(catalog),
                fail_schema: None,
                schema_fetches: AtomicUsize::new(0),
            }
        }

        fn empty() -> Self {
            FakeInspector {
                catalog: None,
                fail_schema: None,
                schema_fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CatalogInspector for FakeInspector {
        async fn fetch_catalog(&self, name: &str) -> Result<Option<CatalogSummary>, InspectError> {
            let Some(catalog) = &self.catalog else {
                return Ok(None);
            };
            if catalog.name != name {
                return Ok(None);
            }
            let mut shell = catalog.clone();
            let schema_names = shell.schemas.iter().map(|s| s.name.clone()).collect();
            shell.schemas = Vec::new();
            Ok(Some(CatalogSummary {
                catalog: shell,
                schema_names,
            }))
        }

        async fn fetch_schema(
            &self,
            _catalog: &str,
            schema: &str,
        ) -> Result<Option<Schema>, InspectError> {
            self.schema_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_schema.as_deref() == Some(schema) {
                return Err(InspectError::Denied(schema.to_string()));
            }
            Ok(self
                .catalog
                .as_ref()
                .and_then(|c| c.schema(schema))
                .cloned())
        }
    }

    fn two_schema_catalog() -> Catalog {
        let mut catalog = Catalog::new("prod");
        catalog.schemas.push(Schema::new("sales"));
        catalog.schemas.push(Schema::new("finance"));
        catalog
    }

    #[tokio::test]
    async fn test_missing_catalog_is_none_not_error() {
        let inspector = FakeInspector::empty();
        let observed = observe(&inspector, "prod", 4).await.unwrap();
        assert!(observed.is_none());
        assert_eq!(inspector.schema_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_observed_tree_keeps_listing_order() {
        let inspector = FakeInspector::holding(two_schema_catalog());
        let observed = observe(&inspector, "prod", 4).await.unwrap().unwrap();
        let names: Vec<&str> = observed.schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["sales", "finance"]);
        assert_eq!(inspector.schema_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_schema_fetch_error_aborts_observation() {
        let mut inspector = FakeInspector::holding(two_schema_catalog());
        inspector.fail_schema = Some("finance".to_string());
        let err = observe(&inspector, "prod", 4).await.unwrap_err();
        assert!(matches!(err, InspectError::Denied(_)));
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_clamped() {
        let inspector = FakeInspector::holding(two_schema_catalog());
        let observed = observe(&inspector, "prod", 0).await.unwrap().unwrap();
        assert_eq!(observed.schemas.len(), 2);
    }
}
