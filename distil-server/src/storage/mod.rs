//! Storage gateways
//!
//! The orchestration core reaches storage only through these narrow
//! capability interfaces; the backing (Postgres, staging folder, in-memory
//! test doubles) is selected at runtime.

pub mod metadata;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use distil_common::model::{
    Dataset, Extrema, FilterParams, FilteredData, Histogram, HighlightRoot, Progress, Request,
    Solution, SolutionResult, Variable,
};
use distil_common::Result;

/// Typed access to the relational row store for a dataset and its result
/// tables.
#[async_trait]
pub trait DataStorage: Send + Sync {
    /// Fetches the filtered row set, deterministically ordered by the index
    /// column. With `invert` and no predicates the result is empty, not the
    /// complement of the universe.
    async fn fetch_data(
        &self,
        dataset: &str,
        storage_name: &str,
        filter_params: &FilterParams,
        invert: bool,
    ) -> Result<FilteredData>;

    /// Row count, optionally restricted by column equality filters.
    async fn fetch_num_rows(
        &self,
        storage_name: &str,
        filters: &[(String, String)],
    ) -> Result<i64>;

    /// Histogram summary of a variable; branches on the semantic type.
    async fn fetch_summary(
        &self,
        dataset: &str,
        storage_name: &str,
        variable_key: &str,
        filter_params: &FilterParams,
        highlight: Option<&HighlightRoot>,
    ) -> Result<Histogram>;

    /// Histogram summary restricted to rows present in a result set.
    async fn fetch_summary_by_result(
        &self,
        dataset: &str,
        storage_name: &str,
        variable_key: &str,
        result_uri: &str,
        filter_params: &FilterParams,
    ) -> Result<Histogram>;

    /// Min/max of a numeric variable; `NoData` when both aggregates are
    /// null.
    async fn fetch_extrema(
        &self,
        dataset: &str,
        storage_name: &str,
        variable_key: &str,
    ) -> Result<Extrema>;

    /// Histogram over the predicted values of a result set.
    async fn fetch_predicted_summary(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        filter_params: &FilterParams,
        extrema: Option<Extrema>,
    ) -> Result<Histogram>;

    /// Min/max over the predicted values of a result set.
    async fn fetch_predicted_extrema(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
    ) -> Result<Extrema>;

    /// Histogram over `predicted - truth` for a numeric target.
    async fn fetch_residuals_summary(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        filter_params: &FilterParams,
        extrema: Option<Extrema>,
    ) -> Result<Histogram>;

    /// Min/max over `predicted - truth` for a numeric target.
    async fn fetch_residuals_extrema(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
    ) -> Result<Extrema>;

    /// Two-bucket correct/incorrect histogram for a categorical target.
    async fn fetch_correctness_summary(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        filter_params: &FilterParams,
    ) -> Result<Histogram>;

    /// Parses the produced CSV at `result_uri` and persists its rows into
    /// the dataset's result table. Idempotent per result id.
    async fn persist_result(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        target: &str,
    ) -> Result<()>;

    /// Joined fetch of data rows with their predictions, residual and
    /// correctness columns synthesised on demand.
    async fn fetch_results(
        &self,
        dataset: &str,
        storage_name: &str,
        result_uri: &str,
        filter_params: &FilterParams,
    ) -> Result<FilteredData>;

    /// Updates the store-side column inference hint after a type change.
    async fn set_data_type(
        &self,
        dataset: &str,
        storage_name: &str,
        variable_key: &str,
        ty: &str,
    ) -> Result<()>;
}

/// Persistence for requests, solutions, scores and results.
#[async_trait]
pub trait SolutionStorage: Send + Sync {
    async fn persist_request(
        &self,
        request: &Request,
        created: DateTime<Utc>,
    ) -> Result<()>;

    async fn update_request(
        &self,
        request_id: &str,
        progress: Progress,
        updated: DateTime<Utc>,
    ) -> Result<()>;

    async fn persist_request_feature(
        &self,
        request_id: &str,
        feature_name: &str,
        feature_type: &str,
    ) -> Result<()>;

    async fn persist_request_filters(
        &self,
        request_id: &str,
        filters: &FilterParams,
    ) -> Result<()>;

    async fn persist_solution(
        &self,
        request_id: &str,
        solution_id: &str,
        progress: Progress,
        updated: DateTime<Utc>,
    ) -> Result<()>;

    async fn persist_solution_score(
        &self,
        solution_id: &str,
        metric: &str,
        score: f64,
    ) -> Result<()>;

    async fn persist_solution_result(&self, result: &SolutionResult) -> Result<()>;

    async fn fetch_request(&self, request_id: &str) -> Result<Option<Request>>;

    async fn fetch_request_ids(&self, dataset: &str) -> Result<Vec<String>>;

    async fn fetch_solutions(&self, request_id: &str) -> Result<Vec<Solution>>;

    async fn fetch_solution(&self, solution_id: &str) -> Result<Option<Solution>>;

    async fn fetch_solution_result(&self, solution_id: &str) -> Result<Option<SolutionResult>>;

    /// Whether any request referencing the dataset is still pending or
    /// running; guards dataset deletion and type changes.
    async fn has_active_request(&self, dataset: &str) -> Result<bool>;
}

/// Dataset/variable catalogue access. Implementations are polymorphic over
/// the backing and tag every dataset with their provenance.
#[async_trait]
pub trait MetadataStorage: Send + Sync {
    async fn fetch_dataset(&self, dataset_id: &str) -> Result<Dataset>;

    async fn fetch_datasets(&self) -> Result<Vec<Dataset>>;

    async fn search_datasets(&self, terms: &str) -> Result<Vec<Dataset>>;

    /// Variables in catalogue insertion order (the canonical column order).
    async fn fetch_variables(
        &self,
        dataset_id: &str,
        include_index: bool,
        include_meta: bool,
    ) -> Result<Vec<Variable>>;

    async fn fetch_variable(&self, dataset_id: &str, key: &str) -> Result<Variable>;

    /// Flips a variable's inferred semantic type in the catalogue.
    async fn set_data_type(&self, dataset_id: &str, key: &str, ty: &str) -> Result<()>;

    /// Which backing produced this gateway's records.
    fn provenance(&self) -> &str;
}
