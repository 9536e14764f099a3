//! Result persistence and joined result queries
//!
//! Produced predictions land in `<storage_name>_result`, keyed by
//! `(result_id, row_index)`; re-ingesting the same file is a no-op.
//! Joined queries synthesise `<target>:predicted`, `<target>:target` and,
//! depending on the target type, `<target>:error` or
//! `<target>:correctness` columns on demand.

use std::path::Path;

use sqlx::Row;
use tracing::debug;

use distil_common::model::filter::FilterParams;
use distil_common::model::histogram::{Bucket, Histogram, CORRECT_CATEGORY, INCORRECT_CATEGORY};
use distil_common::model::request::result_id_for_uri;
use distil_common::model::types::{
    is_categorical_type, is_numerical_type, CATEGORICAL_SUMMARY, CATEGORICAL_TYPE, FLOAT_TYPE,
    ROW_INDEX_KEY,
};
use distil_common::model::{Column, Extrema, FilteredData, Variable};
use distil_common::{Error, Result};

use distil_compute::result::ResultReader;

use super::filter::{
    build_filtered_result_query_field, build_result_query_filters, error_expr, quote_column,
    SqlParam, WhereBuilder,
};
use super::{bind_params, parse_variable_value, PostgresDataStorage};

const INSERT_BATCH_SIZE: usize = 500;

impl PostgresDataStorage {
    /// Resolves the target recorded for a result set and its variable.
    pub(crate) async fn result_target_variable(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
    ) -> Result<(String, Variable)> {
        let result_table = self.result_table(storage_name);
        let query =
            format!("SELECT target FROM {result_table} WHERE result_id = $1 LIMIT 1;");
        let row = sqlx::query(&query)
            .bind(result_id_for_uri(result_uri))
            .fetch_optional(self.pool())
            .await?;
        let target: String = row
            .ok_or_else(|| {
                Error::NoData(format!("target for result `{result_uri}` not found"))
            })?
            .try_get("target")?;
        let variable = self.metadata().fetch_variable(dataset, &target).await?;
        Ok((target, variable))
    }

    /// Parses the produced CSV and streams its rows into the result table.
    /// Duplicate `(result_id, row_index)` pairs are dropped, making the
    /// operation idempotent per result id.
    pub(crate) async fn persist_result_rows(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        target: &str,
    ) -> Result<()> {
        let mut reader = ResultReader::open(Path::new(result_uri))?;

        // the header may carry the display label; translate to the key
        let mut target_name = reader.target_name().to_string();
        let variables = self.metadata().fetch_variables(dataset, false, false).await?;
        for variable in &variables {
            if variable.display_label == target_name {
                target_name = variable.key.clone();
            }
        }
        if target_name.is_empty() {
            target_name = target.to_string();
        }

        let result_table = self.result_table(storage_name);
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {result_table} (\
             result_id TEXT NOT NULL, \
             row_index BIGINT NOT NULL, \
             target TEXT NOT NULL, \
             value TEXT, \
             PRIMARY KEY (result_id, row_index));"
        ))
        .execute(self.pool())
        .await?;

        let result_id = result_id_for_uri(result_uri);
        let mut inserted = 0usize;
        while let Some(batch) = reader.next_batch(INSERT_BATCH_SIZE)? {
            let mut params: Vec<SqlParam> = Vec::with_capacity(batch.len() * 4);
            let mut rows_sql: Vec<String> = Vec::with_capacity(batch.len());
            for row in &batch {
                let base = params.len();
                params.push(SqlParam::Text(result_id.clone()));
                params.push(SqlParam::Int(row.row_index));
                params.push(SqlParam::Text(target_name.clone()));
                params.push(SqlParam::Text(row.value.clone()));
                rows_sql.push(format!(
                    "(${}, ${}, ${}, ${})",
                    base + 1,
                    base + 2,
                    base + 3,
                    base + 4
                ));
            }
            let query = format!(
                "INSERT INTO {result_table} (result_id, row_index, target, value) VALUES {} \
                 ON CONFLICT (result_id, row_index) DO NOTHING;",
                rows_sql.join(", ")
            );
            bind_params(sqlx::query(&query), &params)
                .execute(self.pool())
                .await?;
            inserted += batch.len();
        }

        debug!(
            dataset,
            result_id = %result_id,
            rows = inserted,
            "result rows persisted"
        );
        Ok(())
    }

    /// Joined fetch of data rows with their predictions and, per target
    /// type, residual or correctness columns.
    pub(crate) async fn filtered_results(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        filter_params: &FilterParams,
    ) -> Result<FilteredData> {
        let (target, variable) = self
            .result_target_variable(dataset, storage_name, result_uri)
            .await?;
        let variables = self.metadata().fetch_variables(dataset, true, true).await?;

        let mut builder = WhereBuilder::new();
        build_result_query_filters(&mut builder, &target, filter_params)?;
        let result_id_param = {
            builder
                .params
                .push(SqlParam::Text(result_id_for_uri(result_uri)));
            format!("${}", builder.params.len())
        };
        let target_param = {
            builder.params.push(SqlParam::Text(target.clone()));
            format!("${}", builder.params.len())
        };

        let predicted_col = format!("{target}:predicted");
        let target_col = format!("{target}:target");
        let error_col = format!("{target}:error");
        let correctness_col = format!("{target}:correctness");

        let mut projections = vec![
            format!("result.value::text AS {}", quote_column(&predicted_col)),
            format!(
                "data.{}::text AS {}",
                quote_column(&target),
                quote_column(&target_col)
            ),
        ];
        if is_numerical_type(&variable.ty) {
            projections.push(format!(
                "{}::text AS {}",
                error_expr(&target),
                quote_column(&error_col)
            ));
        }
        if is_categorical_type(&variable.ty) {
            projections.push(format!(
                "(CASE WHEN result.value = data.{} THEN '{CORRECT_CATEGORY}' \
                 ELSE '{INCORRECT_CATEGORY}' END) AS {}",
                quote_column(&target),
                quote_column(&correctness_col)
            ));
        }
        let fields =
            build_filtered_result_query_field(&variables, &filter_params.variables, &target);
        if !fields.is_empty() {
            projections.push(fields);
        }

        let mut query = format!(
            "SELECT {} FROM {} WHERE result.result_id = {result_id_param} \
             AND result.target = {target_param}",
            projections.join(", "),
            self.result_join(storage_name)
        );
        if let Some(wheres) = builder.conjunction() {
            query.push_str(&format!(" AND {wheres}"));
        }
        query.push_str(&format!(
            " ORDER BY cast(data.{} as bigint)",
            quote_column(ROW_INDEX_KEY)
        ));
        if filter_params.size > 0 {
            query.push_str(&format!(" LIMIT {}", filter_params.size));
        }
        query.push(';');

        let rows = bind_params(sqlx::query(&query), &builder.params)
            .fetch_all(self.pool())
            .await?;

        let num_rows = self
            .num_rows(
                &self.result_table(storage_name),
                &[("result_id".to_string(), result_id_for_uri(result_uri))],
            )
            .await?;

        // resolve column types: synthesised columns first, then catalogue
        let resolve_type = |key: &str| -> String {
            if key == predicted_col || key == target_col {
                variable.ty.clone()
            } else if key == error_col {
                FLOAT_TYPE.to_string()
            } else if key == correctness_col {
                CATEGORICAL_TYPE.to_string()
            } else {
                variables
                    .iter()
                    .find(|v| v.key == key)
                    .map(|v| v.ty.clone())
                    .unwrap_or_default()
            }
        };

        let mut columns: Vec<Column> = Vec::new();
        if let Some(first) = rows.first() {
            use sqlx::Column as _;
            for column in first.columns() {
                let key = column.name().to_string();
                let ty = resolve_type(&key);
                columns.push(Column {
                    label: key.clone(),
                    key,
                    ty,
                });
            }
        }

        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
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

    /// Histogram over the predicted values of a result set.
    pub(crate) async fn predicted_summary(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        filter_params: &FilterParams,
        extrema: Option<Extrema>,
    ) -> Result<Histogram> {
        let (target, variable) = self
            .result_target_variable(dataset, storage_name, result_uri)
            .await?;

        let mut builder = WhereBuilder::new();
        build_result_query_filters(&mut builder, &target, filter_params)?;
        push_result_restriction(&mut builder, result_uri, &target);

        let histogram = if is_numerical_type(&variable.ty) {
            self.numerical_histogram(
                storage_name,
                &variable,
                builder,
                Some(self.result_join(storage_name)),
                Some("cast(result.value as double precision)".to_string()),
                extrema,
            )
            .await?
        } else if is_categorical_type(&variable.ty) {
            self.predicted_terms_histogram(storage_name, &variable, builder)
                .await?
        } else {
            return Err(Error::Storage(format!(
                "variable {} of type {} does not support summary",
                variable.key, variable.ty
            )));
        };

        let count_filter = [("result_id".to_string(), result_id_for_uri(result_uri))];
        self.stamp(histogram, dataset, &self.result_table(storage_name), &count_filter)
            .await
    }

    /// Histogram over `predicted - truth` for a numeric target.
    pub(crate) async fn residuals_summary(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        filter_params: &FilterParams,
        extrema: Option<Extrema>,
    ) -> Result<Histogram> {
        let (target, variable) = self
            .result_target_variable(dataset, storage_name, result_uri)
            .await?;
        if !is_numerical_type(&variable.ty) {
            return Err(Error::Storage(format!(
                "residuals require a numeric target, `{target}` is {}",
                variable.ty
            )));
        }

        let mut builder = WhereBuilder::new();
        build_result_query_filters(&mut builder, &target, filter_params)?;
        push_result_restriction(&mut builder, result_uri, &target);

        let residual_variable = Variable {
            key: variable.key.clone(),
            display_label: variable.display_label.clone(),
            ty: FLOAT_TYPE.to_string(),
            original_type: FLOAT_TYPE.to_string(),
            importance: variable.importance,
            role: variable.role,
        };
        let histogram = self
            .numerical_histogram(
                storage_name,
                &residual_variable,
                builder,
                Some(self.result_join(storage_name)),
                Some(error_expr(&target)),
                extrema,
            )
            .await?;

        let count_filter = [("result_id".to_string(), result_id_for_uri(result_uri))];
        self.stamp(histogram, dataset, &self.result_table(storage_name), &count_filter)
            .await
    }

    /// Exactly two buckets, correct and incorrect, for a categorical
    /// target; no intermediate column is materialised.
    pub(crate) async fn correctness_summary(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        filter_params: &FilterParams,
    ) -> Result<Histogram> {
        let (target, variable) = self
            .result_target_variable(dataset, storage_name, result_uri)
            .await?;
        if !is_categorical_type(&variable.ty) {
            return Err(Error::Storage(format!(
                "correctness requires a categorical target, `{target}` is {}",
                variable.ty
            )));
        }

        let mut builder = WhereBuilder::new();
        build_result_query_filters(&mut builder, &target, filter_params)?;
        push_result_restriction(&mut builder, result_uri, &target);

        let truth = format!("data.{}", quote_column(&target));
        let query = format!(
            "SELECT \
             COALESCE(SUM(CASE WHEN result.value = {truth} THEN 1 ELSE 0 END), 0) AS correct, \
             COALESCE(SUM(CASE WHEN result.value != {truth} THEN 1 ELSE 0 END), 0) AS incorrect \
             FROM {} WHERE {};",
            self.result_join(storage_name),
            builder.conjunction().unwrap_or_else(|| "TRUE".to_string())
        );
        let row = bind_params(sqlx::query(&query), &builder.params)
            .fetch_one(self.pool())
            .await?;
        let correct: i64 = row.try_get("correct")?;
        let incorrect: i64 = row.try_get("incorrect")?;

        let histogram = Histogram {
            label: variable.display_label.clone(),
            key: variable.key.clone(),
            ty: CATEGORICAL_SUMMARY.to_string(),
            var_type: variable.ty.clone(),
            dataset: String::new(),
            buckets: vec![
                Bucket {
                    key: CORRECT_CATEGORY.to_string(),
                    count: correct,
                },
                Bucket {
                    key: INCORRECT_CATEGORY.to_string(),
                    count: incorrect,
                },
            ],
            extrema: None,
            num_rows: 0,
        };

        let count_filter = [("result_id".to_string(), result_id_for_uri(result_uri))];
        self.stamp(histogram, dataset, &self.result_table(storage_name), &count_filter)
            .await
    }
}

fn push_result_restriction(builder: &mut WhereBuilder, result_uri: &str, target: &str) {
    builder
        .params
        .push(SqlParam::Text(result_id_for_uri(result_uri)));
    let result_id_param = format!("${}", builder.params.len());
    builder.params.push(SqlParam::Text(target.to_string()));
    let target_param = format!("${}", builder.params.len());
    builder.wheres.push(format!(
        "result.result_id = {result_id_param} AND result.target = {target_param}"
    ));
}
