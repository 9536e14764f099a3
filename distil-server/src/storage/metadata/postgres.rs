//! Primary catalogue backing over Postgres

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use distil_common::model::types::normalize_storage_name;
use distil_common::model::variable::{Dataset, DatasetSource, Variable, VariableRole};
use distil_common::{Error, Result};

use crate::storage::MetadataStorage;

const PROVENANCE: &str = "catalogue";

/// Creates the catalogue tables when absent.
pub async fn init_tables(pool: &PgPool) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS datasets (
            id TEXT PRIMARY KEY,
            storage_name TEXT NOT NULL,
            folder TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT 'seed',
            num_rows BIGINT NOT NULL DEFAULT 0,
            num_bytes BIGINT NOT NULL DEFAULT 0
        );",
        "CREATE TABLE IF NOT EXISTS dataset_variables (
            dataset_id TEXT NOT NULL,
            key TEXT NOT NULL,
            label TEXT NOT NULL,
            ty TEXT NOT NULL,
            original_type TEXT NOT NULL,
            importance DOUBLE PRECISION NOT NULL DEFAULT 0,
            role TEXT NOT NULL DEFAULT 'data',
            ordering INTEGER NOT NULL,
            PRIMARY KEY (dataset_id, key)
        );",
    ];
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Metadata gateway over the primary Postgres catalogue.
#[derive(Clone)]
pub struct PostgresMetadataStorage {
    pool: PgPool,
}

impl PostgresMetadataStorage {
    pub fn new(pool: PgPool) -> Self {
        PostgresMetadataStorage { pool }
    }

    fn parse_role(raw: &str) -> VariableRole {
        match raw {
            "index" => VariableRole::Index,
            "metadata" => VariableRole::Metadata,
            _ => VariableRole::Data,
        }
    }

    fn parse_source(raw: &str) -> DatasetSource {
        match raw {
            "contrib" => DatasetSource::Contrib,
            "augmented" => DatasetSource::Augmented,
            _ => DatasetSource::Seed,
        }
    }

    async fn dataset_from_row(&self, row: &sqlx::postgres::PgRow) -> Result<Dataset> {
        let id: String = row.try_get("id")?;
        let variables = self.fetch_variables(&id, true, true).await?;
        Ok(Dataset {
            storage_name: row.try_get("storage_name")?,
            folder: row.try_get("folder")?,
            source: Self::parse_source(row.try_get::<String, _>("source")?.as_str()),
            num_rows: row.try_get("num_rows")?,
            num_bytes: row.try_get("num_bytes")?,
            variables,
            provenance: PROVENANCE.to_string(),
            id,
        })
    }
}

#[async_trait]
impl MetadataStorage for PostgresMetadataStorage {
    async fn fetch_dataset(&self, dataset_id: &str) -> Result<Dataset> {
        let row = sqlx::query(
            "SELECT id, storage_name, folder, source, num_rows, num_bytes \
             FROM datasets WHERE id = $1;",
        )
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NoData(format!("dataset `{dataset_id}` not found")))?;
        self.dataset_from_row(&row).await
    }

    async fn fetch_datasets(&self) -> Result<Vec<Dataset>> {
        let rows = sqlx::query(
            "SELECT id, storage_name, folder, source, num_rows, num_bytes \
             FROM datasets ORDER BY id;",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut datasets = Vec::with_capacity(rows.len());
        for row in &rows {
            datasets.push(self.dataset_from_row(row).await?);
        }
        Ok(datasets)
    }

    async fn search_datasets(&self, terms: &str) -> Result<Vec<Dataset>> {
        let pattern = format!("%{}%", normalize_storage_name(terms));
        let rows = sqlx::query(
            "SELECT id, storage_name, folder, source, num_rows, num_bytes \
             FROM datasets WHERE id ILIKE $1 OR storage_name ILIKE $1 ORDER BY id;",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        let mut datasets = Vec::with_capacity(rows.len());
        for row in &rows {
            datasets.push(self.dataset_from_row(row).await?);
        }
        Ok(datasets)
    }

    async fn fetch_variables(
        &self,
        dataset_id: &str,
        include_index: bool,
        include_meta: bool,
    ) -> Result<Vec<Variable>> {
        let rows = sqlx::query(
            "SELECT key, label, ty, original_type, importance, role \
             FROM dataset_variables WHERE dataset_id = $1 ORDER BY ordering;",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;

        let mut variables = Vec::with_capacity(rows.len());
        for row in &rows {
            let role = Self::parse_role(row.try_get::<String, _>("role")?.as_str());
            if role == VariableRole::Index && !include_index {
                continue;
            }
            if role == VariableRole::Metadata && !include_meta {
                continue;
            }
            variables.push(Variable {
                key: row.try_get("key")?,
                display_label: row.try_get("label")?,
                ty: row.try_get("ty")?,
                original_type: row.try_get("original_type")?,
                importance: row.try_get("importance")?,
                role,
            });
        }
        Ok(variables)
    }

    async fn fetch_variable(&self, dataset_id: &str, key: &str) -> Result<Variable> {
        let variables = self.fetch_variables(dataset_id, true, true).await?;
        variables
            .into_iter()
            .find(|v| v.key == key)
            .ok_or_else(|| {
                Error::NoData(format!("variable `{key}` not found in `{dataset_id}`"))
            })
    }

    async fn set_data_type(&self, dataset_id: &str, key: &str, ty: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE dataset_variables SET ty = $1 WHERE dataset_id = $2 AND key = $3;",
        )
        .bind(ty)
        .bind(dataset_id)
        .bind(key)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::NoData(format!(
                "variable `{key}` not found in `{dataset_id}`"
            )));
        }
        Ok(())
    }

    fn provenance(&self) -> &str {
        PROVENANCE
    }
}
