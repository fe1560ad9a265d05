//! Dataset catalog using SQLite.
//!
//! Resolves logical dataset names to backend kind, data format, category
//! and license group. The engine consumes this read-only; rows are seeded
//! by the (out of scope) admin tooling.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use extract_common::{ExtractionError, ExtractionResult};

pub use extract_common::dataset::{BackendKind, DataCategory, DataFormat, Dataset};

/// Catalog connection and lookup operations.
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open or create the catalog database at the given path.
    pub async fn open(path: &Path) -> ExtractionResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| ExtractionError::Database(format!("Catalog open failed: {}", e)))?;

        let catalog = Self { pool };
        catalog.migrate().await?;
        Ok(catalog)
    }

    /// Open an in-memory catalog (for testing).
    pub async fn open_memory() -> ExtractionResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| ExtractionError::Database(format!("Catalog open failed: {}", e)))?;

        let catalog = Self { pool };
        catalog.migrate().await?;
        Ok(catalog)
    }

    async fn migrate(&self) -> ExtractionResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&self.pool).await.map_err(|e| {
                    ExtractionError::Database(format!("Catalog migration failed: {}", e))
                })?;
            }
        }

        Ok(())
    }

    /// Resolve a logical dataset name.
    pub async fn get_dataset(&self, name: &str) -> ExtractionResult<Option<Dataset>> {
        let row: Option<(String, String, String, String, String, bool)> = sqlx::query_as(
            "SELECT id, backend, format, category, license_group_id, multi_model \
             FROM datasets WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Catalog query failed: {}", e)))?;

        Ok(row.map(|(id, backend, format, category, group, multi_model)| Dataset {
            id: parse_uuid(&id),
            name: name.to_string(),
            backend: BackendKind::from_str(&backend),
            format: DataFormat::from_str(&format),
            category: DataCategory::from_str(&category),
            license_group_id: parse_uuid(&group),
            multi_model,
        }))
    }

    /// Resolve a dataset, failing when the name is unknown.
    pub async fn require_dataset(&self, name: &str) -> ExtractionResult<Dataset> {
        self.get_dataset(name)
            .await?
            .ok_or_else(|| ExtractionError::InvalidFilters(format!("Unknown dataset: {}", name)))
    }

    /// Whether the user may read a dataset: the license group is open, or
    /// the user holds an explicit grant.
    pub async fn user_allowed(&self, user_id: Uuid, dataset: &Dataset) -> ExtractionResult<bool> {
        let open: Option<(bool,)> =
            sqlx::query_as("SELECT open_access FROM license_groups WHERE id = ?")
                .bind(dataset.license_group_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ExtractionError::Database(format!("Catalog query failed: {}", e)))?;

        if matches!(open, Some((true,))) {
            return Ok(true);
        }

        let granted: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM license_grants WHERE user_id = ? AND license_group_id = ?",
        )
        .bind(user_id.to_string())
        .bind(dataset.license_group_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Catalog query failed: {}", e)))?;

        Ok(granted.0 > 0)
    }

    /// List all catalogued dataset names.
    pub async fn list_datasets(&self) -> ExtractionResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM datasets ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ExtractionError::Database(format!("Catalog query failed: {}", e)))?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Register a dataset. Seeding surface for admin tooling and tests.
    pub async fn insert_dataset(&self, dataset: &Dataset) -> ExtractionResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO datasets \
             (id, name, backend, format, category, license_group_id, multi_model) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(dataset.id.to_string())
        .bind(&dataset.name)
        .bind(dataset.backend.as_str())
        .bind(dataset.format.as_str())
        .bind(dataset.category.as_str())
        .bind(dataset.license_group_id.to_string())
        .bind(dataset.multi_model)
        .execute(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Catalog insert failed: {}", e)))?;

        Ok(())
    }

    /// Register a license group.
    pub async fn insert_license_group(
        &self,
        id: Uuid,
        name: &str,
        open_access: bool,
    ) -> ExtractionResult<()> {
        sqlx::query("INSERT OR REPLACE INTO license_groups (id, name, open_access) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(name)
            .bind(open_access)
            .execute(&self.pool)
            .await
            .map_err(|e| ExtractionError::Database(format!("Catalog insert failed: {}", e)))?;

        Ok(())
    }

    /// Grant a user access to a restricted license group.
    pub async fn grant_license(
        &self,
        user_id: Uuid,
        license_group_id: Uuid,
    ) -> ExtractionResult<()> {
        sqlx::query("INSERT OR IGNORE INTO license_grants (user_id, license_group_id) VALUES (?, ?)")
            .bind(user_id.to_string())
            .bind(license_group_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ExtractionError::Database(format!("Catalog insert failed: {}", e)))?;

        Ok(())
    }
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS datasets (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    backend TEXT NOT NULL,
    format TEXT NOT NULL,
    category TEXT NOT NULL,
    license_group_id TEXT NOT NULL,
    multi_model INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_datasets_name ON datasets(name);

CREATE TABLE IF NOT EXISTS license_groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    open_access INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS license_grants (
    user_id TEXT NOT NULL,
    license_group_id TEXT NOT NULL,
    PRIMARY KEY (user_id, license_group_id)
)
"#;

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (Catalog, Uuid, Uuid) {
        let catalog = Catalog::open_memory().await.unwrap();
        let open_group = Uuid::new_v4();
        let closed_group = Uuid::new_v4();

        catalog
            .insert_license_group(open_group, "open-data", true)
            .await
            .unwrap();
        catalog
            .insert_license_group(closed_group, "restricted", false)
            .await
            .unwrap();

        catalog
            .insert_dataset(&Dataset {
                id: Uuid::new_v4(),
                name: "icon-eu".to_string(),
                backend: BackendKind::Archive,
                format: DataFormat::Grib,
                category: DataCategory::Forecast,
                license_group_id: open_group,
                multi_model: false,
            })
            .await
            .unwrap();

        catalog
            .insert_dataset(&Dataset {
                id: Uuid::new_v4(),
                name: "synop".to_string(),
                backend: BackendKind::Observation,
                format: DataFormat::Bufr,
                category: DataCategory::Observed,
                license_group_id: closed_group,
                multi_model: false,
            })
            .await
            .unwrap();

        (catalog, open_group, closed_group)
    }

    #[tokio::test]
    async fn test_lookup_by_name() {
        let (catalog, _, _) = seeded().await;

        let ds = catalog.get_dataset("icon-eu").await.unwrap().unwrap();
        assert_eq!(ds.backend, BackendKind::Archive);
        assert_eq!(ds.format, DataFormat::Grib);

        assert!(catalog.get_dataset("nope").await.unwrap().is_none());
        assert!(matches!(
            catalog.require_dataset("nope").await,
            Err(ExtractionError::InvalidFilters(_))
        ));
    }

    #[tokio::test]
    async fn test_license_access() {
        let (catalog, _, closed_group) = seeded().await;
        let user = Uuid::new_v4();

        let open = catalog.get_dataset("icon-eu").await.unwrap().unwrap();
        let restricted = catalog.get_dataset("synop").await.unwrap().unwrap();

        assert!(catalog.user_allowed(user, &open).await.unwrap());
        assert!(!catalog.user_allowed(user, &restricted).await.unwrap());

        catalog.grant_license(user, closed_group).await.unwrap();
        assert!(catalog.user_allowed(user, &restricted).await.unwrap());
    }
}
