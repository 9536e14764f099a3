//! Numeric histograms, extrema and residuals
//!
//! Numeric summaries are two-pass: min/max aggregation first, then a
//! `width_bucket` histogram over the snapped bucket domain. Residual
//! summaries run the same passes over the derived `predicted - truth`
//! expression.

use sqlx::Row;

use distil_common::model::extrema::Extrema;
use distil_common::model::filter::strip_key_suffix;
use distil_common::model::histogram::{Bucket, Histogram};
use distil_common::model::types::{FLOAT_TYPE, NUMERICAL_SUMMARY, ROW_INDEX_KEY};
use distil_common::model::Variable;
use distil_common::{Error, Result};

use super::filter::{error_expr, quote_column, SqlParam, WhereBuilder};
use super::{bind_params, PostgresDataStorage};

impl PostgresDataStorage {
    /// join clause between a data table and its result table
    pub(crate) fn result_join(&self, storage_name: &str) -> String {
        format!(
            "{} AS result INNER JOIN {} AS data ON cast(data.{} as bigint) = result.row_index",
            self.result_table(storage_name),
            storage_name,
            quote_column(ROW_INDEX_KEY)
        )
    }

    async fn min_max(
        &self,
        expr: &str,
        from_clause: &str,
        where_clause: Option<&str>,
        params: &[SqlParam],
    ) -> Result<(Option<f64>, Option<f64>)> {
        let mut query = format!("SELECT MIN({expr}) AS min, MAX({expr}) AS max FROM {from_clause}");
        if let Some(wheres) = where_clause {
            query.push_str(&format!(" WHERE {wheres}"));
        }
        query.push(';');
        let row = bind_params(sqlx::query(&query), params)
            .fetch_one(self.pool())
            .await?;
        let min: Option<f64> = row.try_get("min")?;
        let max: Option<f64> = row.try_get("max")?;
        Ok((min, max))
    }

    fn parse_extrema(
        key: &str,
        ty: &str,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<Extrema> {
        match (min, max) {
            (Some(min), Some(max)) => Ok(Extrema::new(key, ty, min, max)),
            _ => Err(Error::NoData(format!(
                "no min/max aggregation values found for {key}"
            ))),
        }
    }

    /// Unfiltered min/max of a numeric variable.
    pub(crate) async fn variable_extrema(
        &self,
        storage_name: &str,
        variable: &Variable,
    ) -> Result<Extrema> {
        let expr = format!("cast({} as double precision)", quote_column(&variable.key));
        let (min, max) = self.min_max(&expr, storage_name, None, &[]).await?;
        Self::parse_extrema(&variable.key, &variable.ty, min, max)
    }

    /// Histogram of a numeric variable over the snapped bucket domain,
    /// restricted by the caller's predicate set.
    pub(crate) async fn numerical_histogram(
        &self,
        storage_name: &str,
        variable: &Variable,
        mut builder: WhereBuilder,
        from_clause: Option<String>,
        value_expr: Option<String>,
        extrema: Option<Extrema>,
    ) -> Result<Histogram> {
        let expr = value_expr
            .unwrap_or_else(|| format!("cast({} as double precision)", quote_column(&variable.key)));
        let from_clause = from_clause.unwrap_or_else(|| storage_name.to_string());

        let extrema = match extrema {
            Some(mut e) => {
                e.key = variable.key.clone();
                e.ty = variable.ty.clone();
                e
            }
            None => {
                let (min, max) = self
                    .min_max(&expr, &from_clause, builder.conjunction().as_deref(), &builder.params)
                    .await?;
                Self::parse_extrema(&variable.key, &variable.ty, min, max)?
            }
        };

        let rounded = extrema.bucket_min_max();
        let interval = extrema.bucket_interval();
        let bucket_count = extrema.bucket_count().max(1);

        let min_param = {
            builder.params.push(SqlParam::Float(rounded.min));
            format!("${}", builder.params.len())
        };
        let max_param = {
            builder.params.push(SqlParam::Float(rounded.max));
            format!("${}", builder.params.len())
        };

        let mut query = format!(
            "SELECT width_bucket({expr}, {min_param}, {max_param}, {bucket_count}) - 1 AS bucket, \
             COUNT(*) AS count FROM {from_clause}"
        );
        if let Some(wheres) = builder.conjunction() {
            query.push_str(&format!(" WHERE {wheres}"));
        }
        query.push_str(" GROUP BY bucket ORDER BY bucket;");

        let rows = bind_params(sqlx::query(&query), &builder.params)
            .fetch_all(self.pool())
            .await?;

        // every bucket is materialised, absent groups count zero
        let mut buckets: Vec<Bucket> = (0..bucket_count)
            .map(|i| Bucket {
                key: format_bucket_key(rounded.min + i as f64 * interval),
                count: 0,
            })
            .collect();
        for row in &rows {
            let index: i32 = row.try_get("bucket")?;
            let count: i64 = row.try_get("count")?;
            let clamped = (index.max(0) as usize).min(buckets.len() - 1);
            buckets[clamped].count += count;
        }

        Ok(Histogram {
            label: variable.display_label.clone(),
            key: variable.key.clone(),
            ty: NUMERICAL_SUMMARY.to_string(),
            var_type: variable.ty.clone(),
            dataset: String::new(),
            buckets,
            extrema: Some(rounded),
            num_rows: 0,
        })
    }

    /// Min/max over the predicted values of a result set.
    pub(crate) async fn predicted_extrema(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
    ) -> Result<Extrema> {
        let (target, variable) = self.result_target_variable(dataset, storage_name, result_uri).await?;
        let result_table = self.result_table(storage_name);
        let expr = "cast(result.value as double precision)";
        let params = vec![
            SqlParam::Text(distil_common::model::request::result_id_for_uri(result_uri)),
            SqlParam::Text(target),
        ];
        let (min, max) = self
            .min_max(
                expr,
                &format!("{result_table} AS result"),
                Some("result.result_id = $1 AND result.target = $2"),
                &params,
            )
            .await?;
        Self::parse_extrema(&variable.key, &variable.ty, min, max)
    }

    /// Min/max of `predicted - truth` for a numeric target.
    pub(crate) async fn residuals_extrema(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
    ) -> Result<Extrema> {
        let (target, variable) = self.result_target_variable(dataset, storage_name, result_uri).await?;
        let expr = error_expr(&target);
        let params = vec![
            SqlParam::Text(distil_common::model::request::result_id_for_uri(result_uri)),
            SqlParam::Text(target.clone()),
        ];
        let (min, max) = self
            .min_max(
                &expr,
                &self.result_join(storage_name),
                Some("result.result_id = $1 AND result.target = $2"),
                &params,
            )
            .await?;
        let residual_key = strip_key_suffix(&variable.key).to_string();
        Self::parse_extrema(&residual_key, FLOAT_TYPE, min, max)
    }
}

/// Renders a bucket edge compactly (no trailing `.0` on whole numbers).
pub(crate) fn format_bucket_key(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_keys_render_compactly() {
        assert_eq!(format_bucket_key(0.0), "0");
        assert_eq!(format_bucket_key(2.5), "2.5");
        assert_eq!(format_bucket_key(-10.0), "-10");
    }
}
