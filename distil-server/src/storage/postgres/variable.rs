//! Variable summary dispatch
//!
//! Branches on the variable's semantic type: numeric variables bucket via
//! `width_bucket`, categorical variables group by term. Variables of other
//! types do not support summaries.

use distil_common::model::filter::FilterParams;
use distil_common::model::histogram::Histogram;
use distil_common::model::request::result_id_for_uri;
use distil_common::model::types::{is_categorical_type, is_numerical_type};
use distil_common::model::HighlightRoot;
use distil_common::{Error, Result};

use super::filter::{
    build_filtered_query_where, build_result_query_filters, quote_column, SqlParam, WhereBuilder,
};
use super::PostgresDataStorage;

impl PostgresDataStorage {
    pub(crate) async fn summary(
        &self,
        dataset: &str,
        storage_name: &str,
        variable_key: &str,
        filter_params: &FilterParams,
        highlight: Option<&HighlightRoot>,
    ) -> Result<Histogram> {
        let variable = self.metadata().fetch_variable(dataset, variable_key).await?;

        // the highlight root becomes a virtual include filter
        let mut filters = filter_params.filters.clone();
        if let Some(highlight) = highlight {
            filters.push(highlight.to_filter());
        }
        let mut builder = WhereBuilder::new();
        build_filtered_query_where(&mut builder, &filters);

        let histogram = if is_numerical_type(&variable.ty) {
            match self
                .numerical_histogram(storage_name, &variable, builder, None, None, None)
                .await
            {
                Err(Error::NoData(_)) => {
                    let empty = Histogram::empty(
                        &variable.display_label,
                        &variable.key,
                        distil_common::model::types::NUMERICAL_SUMMARY,
                        &variable.ty,
                        dataset,
                    );
                    return Ok(empty);
                }
                other => other?,
            }
        } else if is_categorical_type(&variable.ty) {
            self.categorical_histogram(storage_name, &variable, builder, false)
                .await?
        } else {
            return Err(Error::Storage(format!(
                "variable {} of type {} does not support summary",
                variable.key, variable.ty
            )));
        };

        self.stamp(histogram, dataset, storage_name, &[]).await
    }

    /// Summary of a data variable restricted to rows present in a result
    /// set.
    pub(crate) async fn summary_by_result(
        &self,
        dataset: &str,
        storage_name: &str,
        variable_key: &str,
        result_uri: &str,
        filter_params: &FilterParams,
    ) -> Result<Histogram> {
        let variable = self.metadata().fetch_variable(dataset, variable_key).await?;
        let (target, _) = self
            .result_target_variable(dataset, storage_name, result_uri)
            .await?;

        let mut builder = WhereBuilder::new();
        build_result_query_filters(&mut builder, &target, filter_params)?;
        let result_id = {
            builder.params.push(SqlParam::Text(result_id_for_uri(result_uri)));
            format!("${}", builder.params.len())
        };
        builder
            .wheres
            .push(format!("result.result_id = {result_id}"));

        let histogram = if is_numerical_type(&variable.ty) {
            let expr = format!(
                "cast(data.{} as double precision)",
                quote_column(&variable.key)
            );
            match self
                .numerical_histogram(
                    storage_name,
                    &variable,
                    builder,
                    Some(self.result_join(storage_name)),
                    Some(expr),
                    None,
                )
                .await
            {
                Err(Error::NoData(_)) => {
                    return Ok(Histogram::empty(
                        &variable.display_label,
                        &variable.key,
                        distil_common::model::types::NUMERICAL_SUMMARY,
                        &variable.ty,
                        dataset,
                    ))
                }
                other => other?,
            }
        } else if is_categorical_type(&variable.ty) {
            self.categorical_histogram(storage_name, &variable, builder, true)
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

    /// Fills in the row count and owning dataset on a built histogram.
    pub(crate) async fn stamp(
        &self,
        mut histogram: Histogram,
        dataset: &str,
        count_table: &str,
        count_filters: &[(String, String)],
    ) -> Result<Histogram> {
        histogram.num_rows = self.num_rows(count_table, count_filters).await?;
        histogram.dataset = dataset.to_string();
        Ok(histogram)
    }
}
