//! Categorical (terms) histograms

use sqlx::Row;

use distil_common::model::histogram::{Bucket, Histogram};
use distil_common::model::types::CATEGORICAL_SUMMARY;
use distil_common::model::Variable;
use distil_common::Result;

use super::filter::{quote_column, SqlParam, WhereBuilder};
use super::{bind_params, PostgresDataStorage};

/// Top-N cap on terms histograms.
pub(crate) const CAT_RESULT_LIMIT: i64 = 10;

impl PostgresDataStorage {
    /// Count-by-category histogram of a variable, most frequent first,
    /// ties broken by key.
    pub(crate) async fn categorical_histogram(
        &self,
        storage_name: &str,
        variable: &Variable,
        builder: WhereBuilder,
        joined: bool,
    ) -> Result<Histogram> {
        let column = if joined {
            format!("data.{}", quote_column(&variable.key))
        } else {
            quote_column(&variable.key)
        };
        let from_clause = if joined {
            self.result_join(storage_name)
        } else {
            storage_name.to_string()
        };

        let mut query = format!("SELECT {column} AS term, COUNT(*) AS count FROM {from_clause}");
        if let Some(wheres) = builder.conjunction() {
            query.push_str(&format!(" WHERE {wheres}"));
        }
        query.push_str(&format!(
            " GROUP BY {column} ORDER BY count DESC, {column} ASC LIMIT {CAT_RESULT_LIMIT};"
        ));

        let rows = bind_params(sqlx::query(&query), &builder.params)
            .fetch_all(self.pool())
            .await?;

        let mut buckets = Vec::with_capacity(rows.len());
        for row in &rows {
            let term: Option<String> = row.try_get("term")?;
            let count: i64 = row.try_get("count")?;
            buckets.push(Bucket {
                key: term.unwrap_or_default(),
                count,
            });
        }

        Ok(Histogram {
            label: variable.display_label.clone(),
            key: variable.key.clone(),
            ty: CATEGORICAL_SUMMARY.to_string(),
            var_type: variable.ty.clone(),
            dataset: String::new(),
            buckets,
            extrema: None,
            num_rows: 0,
        })
    }

    /// Count-by-predicted-value histogram over a result set. The caller's
    /// predicate set (including the `result_id`/`target` restriction) is
    /// already compiled into `builder`.
    pub(crate) async fn predicted_terms_histogram(
        &self,
        storage_name: &str,
        variable: &Variable,
        builder: WhereBuilder,
    ) -> Result<Histogram> {
        let from_clause = self.result_join(storage_name);
        let mut query =
            format!("SELECT result.value AS term, COUNT(*) AS count FROM {from_clause}");
        if let Some(wheres) = builder.conjunction() {
            query.push_str(&format!(" WHERE {wheres}"));
        }
        query.push_str(" GROUP BY result.value ORDER BY count DESC, result.value ASC;");

        let rows = bind_params(sqlx::query(&query), &builder.params)
            .fetch_all(self.pool())
            .await?;

        let mut buckets = Vec::with_capacity(rows.len());
        for row in &rows {
            let term: Option<String> = row.try_get("term")?;
            let count: i64 = row.try_get("count")?;
            buckets.push(Bucket {
                key: term.unwrap_or_default(),
                count,
            });
        }

        Ok(Histogram {
            label: variable.display_label.clone(),
            key: variable.key.clone(),
            ty: CATEGORICAL_SUMMARY.to_string(),
            var_type: variable.ty.clone(),
            dataset: String::new(),
            buckets,
            extrema: None,
            num_rows: 0,
        })
    }
}
