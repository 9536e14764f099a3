//! Postgres-backed storage gateways

mod categorical;
pub mod filter;
mod numerical;
mod request;
mod result;
mod variable;

pub use request::{init_tables, PostgresSolutionStorage};

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use distil_common::model::types::{
    is_numerical_type, BOOL_TYPE, INTEGER_TYPE, ROW_INDEX_KEY,
};
use distil_common::model::{
    Column, Extrema, FilterParams, FilteredData, HighlightRoot, Histogram, Variable,
};
use distil_common::{Error, Result};

use crate::storage::{DataStorage, MetadataStorage};

use filter::{
    build_filtered_query_field, build_filtered_query_where, quote_column, SqlParam, WhereBuilder,
};

/// Opens a connection pool against the store.
pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new().max_connections(16).connect(url).await?;
    Ok(pool)
}

/// Binds a compiled parameter list onto a query in order.
pub(crate) fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    params: &[SqlParam],
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Text(v) => query.bind(v.clone()),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Int(v) => query.bind(*v),
        };
    }
    query
}

/// Data store gateway over Postgres. Data tables store cells as text; all
/// numeric comparisons cast through double precision.
#[derive(Clone)]
pub struct PostgresDataStorage {
    pool: PgPool,
    metadata: Arc<dyn MetadataStorage>,
}

impl PostgresDataStorage {
    pub fn new(pool: PgPool, metadata: Arc<dyn MetadataStorage>) -> Self {
        PostgresDataStorage { pool, metadata }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn metadata(&self) -> &Arc<dyn MetadataStorage> {
        &self.metadata
    }

    pub(crate) fn result_table(&self, storage_name: &str) -> String {
        format!("{storage_name}_result")
    }

    async fn fetch_data_inner(
        &self,
        dataset: &str,
        storage_name: &str,
        filter_params: &FilterParams,
        invert: bool,
    ) -> Result<FilteredData> {
        let variables = self.metadata.fetch_variables(dataset, true, true).await?;
        let num_rows = self.num_rows(storage_name, &[]).await?;

        let fields = build_filtered_query_field(&variables, &filter_params.variables);
        let mut builder = WhereBuilder::new();
        build_filtered_query_where(&mut builder, &filter_params.filters);

        let mut query = format!("SELECT {fields} FROM {storage_name}");
        match builder.conjunction() {
            Some(wheres) => {
                if invert {
                    query.push_str(&format!(" WHERE NOT({wheres})"));
                } else {
                    query.push_str(&format!(" WHERE {wheres}"));
                }
            }
            None => {
                // inverting an unfiltered universe selects nothing
                if invert {
                    return Ok(FilteredData::empty(num_rows));
                }
            }
        }

        query.push_str(&format!(
            " ORDER BY cast({} as bigint)",
            quote_column(ROW_INDEX_KEY)
        ));
        if filter_params.size > 0 {
            query.push_str(&format!(" LIMIT {}", filter_params.size));
        }
        query.push(';');

        let rows = bind_params(sqlx::query(&query), &builder.params)
            .fetch_all(&self.pool)
            .await?;

        parse_filtered_data(&variables, num_rows, &rows)
    }

    pub(crate) async fn num_rows(
        &self,
        table: &str,
        filters: &[(String, String)],
    ) -> Result<i64> {
        let mut query = format!("SELECT count(*) FROM {table}");
        let mut params = Vec::new();
        if !filters.is_empty() {
            let clauses: Vec<String> = filters
                .iter()
                .enumerate()
                .map(|(i, (field, value))| {
                    params.push(SqlParam::Text(value.clone()));
                    format!("{} = ${}", quote_column(field), i + 1)
                })
                .collect();
            query.push_str(&format!(" WHERE {}", clauses.join(" AND ")));
        }
        let row = bind_params(sqlx::query(&query), &params)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count)
    }
}

/// Decodes a text cell into a typed value per the variable's semantic type,
/// falling back to the raw text on parse failure.
pub(crate) fn parse_variable_value(value: Option<&str>, ty: &str) -> serde_json::Value {
    let Some(raw) = value else {
        return serde_json::Value::Null;
    };
    if ty == INTEGER_TYPE {
        if let Ok(v) = raw.parse::<i64>() {
            return serde_json::Value::from(v);
        }
    }
    if is_numerical_type(ty) {
        if let Ok(v) = raw.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(v) {
                return serde_json::Value::Number(n);
            }
        }
    }
    if ty == BOOL_TYPE {
        if let Ok(v) = raw.parse::<bool>() {
            return serde_json::Value::Bool(v);
        }
    }
    serde_json::Value::String(raw.to_string())
}

fn parse_filtered_data(
    variables: &[Variable],
    num_rows: i64,
    rows: &[PgRow],
) -> Result<FilteredData> {
    let mut columns = Vec::new();
    if let Some(first) = rows.first() {
        use sqlx::Column as _;
        for column in first.columns() {
            let key = column.name();
            let variable = variables
                .iter()
                .find(|v| v.key == key)
                .ok_or_else(|| Error::Storage(format!("unable to lookup variable for {key}")))?;
            columns.push(Column {
                key: key.to_string(),
                label: variable.display_label.clone(),
                ty: variable.ty.clone(),
            });
        }
    }

    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let mut record = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            let raw: Option<String> = row.try_get(i)?;
            record.push(parse_variable_value(raw.as_deref(), &column.ty));
        }
        values.push(record);
    }

    Ok(FilteredData {
        num_rows,
        columns,
        values,
    })
}

#[async_trait]
impl DataStorage for PostgresDataStorage {
    async fn fetch_data(
        &self,
        dataset: &str,
        storage_name: &str,
        filter_params: &FilterParams,
        invert: bool,
    ) -> Result<FilteredData> {
        self.fetch_data_inner(dataset, storage_name, filter_params, invert)
            .await
    }

    async fn fetch_num_rows(
        &self,
        storage_name: &str,
        filters: &[(String, String)],
    ) -> Result<i64> {
        self.num_rows(storage_name, filters).await
    }

    async fn fetch_summary(
        &self,
        dataset: &str,
        storage_name: &str,
        variable_key: &str,
        filter_params: &FilterParams,
        highlight: Option<&HighlightRoot>,
    ) -> Result<Histogram> {
        self.summary(dataset, storage_name, variable_key, filter_params, highlight)
            .await
    }

    async fn fetch_summary_by_result(
        &self,
        dataset: &str,
        storage_name: &str,
        variable_key: &str,
        result_uri: &str,
        filter_params: &FilterParams,
    ) -> Result<Histogram> {
        self.summary_by_result(dataset, storage_name, variable_key, result_uri, filter_params)
            .await
    }

    async fn fetch_extrema(
        &self,
        dataset: &str,
        storage_name: &str,
        variable_key: &str,
    ) -> Result<Extrema> {
        let variable = self.metadata.fetch_variable(dataset, variable_key).await?;
        self.variable_extrema(storage_name, &variable).await
    }

    async fn fetch_predicted_summary(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        filter_params: &FilterParams,
        extrema: Option<Extrema>,
    ) -> Result<Histogram> {
        self.predicted_summary(dataset, storage_name, result_uri, filter_params, extrema)
            .await
    }

    async fn fetch_predicted_extrema(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
    ) -> Result<Extrema> {
        self.predicted_extrema(dataset, storage_name, result_uri).await
    }

    async fn fetch_residuals_summary(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        filter_params: &FilterParams,
        extrema: Option<Extrema>,
    ) -> Result<Histogram> {
        self.residuals_summary(dataset, storage_name, result_uri, filter_params, extrema)
            .await
    }

    async fn fetch_residuals_extrema(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
    ) -> Result<Extrema> {
        self.residuals_extrema(dataset, storage_name, result_uri).await
    }

    async fn fetch_correctness_summary(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        filter_params: &FilterParams,
    ) -> Result<Histogram> {
        self.correctness_summary(dataset, storage_name, result_uri, filter_params)
            .await
    }

    async fn persist_result(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        target: &str,
    ) -> Result<()> {
        self.persist_result_rows(dataset, storage_name, result_uri, target)
            .await
    }

    async fn fetch_results(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        filter_params: &FilterParams,
    ) -> Result<FilteredData> {
        self.filtered_results(dataset, storage_name, result_uri, filter_params)
            .await
    }

    async fn set_data_type(
        &self,
        _dataset: &str,
        storage_name: &str,
        variable_key: &str,
        ty: &str,
    ) -> Result<()> {
        // store-side column inference hint, consulted by later ingests
        sqlx::query(
            "INSERT INTO column_hints (storage_name, key, ty) VALUES ($1, $2, $3) \
             ON CONFLICT (storage_name, key) DO UPDATE SET ty = excluded.ty;",
        )
        .bind(storage_name)
        .bind(variable_key)
        .bind(ty)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distil_common::model::types::{CATEGORICAL_TYPE, FLOAT_TYPE};

    #[test]
    fn text_cells_decode_by_semantic_type() {
        assert_eq!(
            parse_variable_value(Some("4.5"), FLOAT_TYPE),
            serde_json::json!(4.5)
        );
        assert_eq!(
            parse_variable_value(Some("12"), INTEGER_TYPE),
            serde_json::json!(12)
        );
        assert_eq!(
            parse_variable_value(Some("true"), BOOL_TYPE),
            serde_json::json!(true)
        );
        assert_eq!(
            parse_variable_value(Some("setosa"), CATEGORICAL_TYPE),
            serde_json::json!("setosa")
        );
        // unparseable numbers fall back to their text form
        assert_eq!(
            parse_variable_value(Some("n/a"), FLOAT_TYPE),
            serde_json::json!("n/a")
        );
        assert_eq!(parse_variable_value(None, FLOAT_TYPE), serde_json::Value::Null);
    }
}
