//! REST handlers over the storage gateways

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use distil_common::model::filter::FilterParams;
use distil_common::model::HighlightRoot;
use distil_common::Error;

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::storage::metadata::set_variable_type;

#[derive(Debug, Deserialize)]
pub struct DatasetSearch {
    pub search: Option<String>,
}

/// GET /distil/datasets
pub async fn datasets(
    State(state): State<AppState>,
    Query(params): Query<DatasetSearch>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut datasets = Vec::new();
    for backing in state.runtime.catalogues() {
        let mut found = match &params.search {
            Some(terms) => backing.search_datasets(terms).await?,
            None => backing.fetch_datasets().await?,
        };
        datasets.append(&mut found);
    }
    Ok(Json(serde_json::json!({ "datasets": datasets })))
}

/// GET /distil/datasets/:dataset
pub async fn dataset(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let dataset = state.runtime.engine.metadata.fetch_dataset(&dataset).await?;
    Ok(Json(serde_json::json!({ "dataset": dataset })))
}

/// GET /distil/variables/:dataset
pub async fn variables(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let variables = state
        .runtime
        .engine
        .metadata
        .fetch_variables(&dataset, true, true)
        .await?;
    Ok(Json(serde_json::json!({ "variables": variables })))
}

#[derive(Debug, Deserialize)]
pub struct TypeChange {
    pub field: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// POST /distil/variables/:dataset
pub async fn set_variable_type_handler(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Json(change): Json<TypeChange>,
) -> ApiResult<Json<serde_json::Value>> {
    let engine = &state.runtime.engine;
    let meta = engine.metadata.fetch_dataset(&dataset).await?;
    set_variable_type(
        &engine.metadata,
        &engine.data,
        &engine.solutions,
        &dataset,
        &meta.storage_name,
        &change.field,
        &change.ty,
    )
    .await?;
    info!(dataset = %dataset, field = %change.field, ty = %change.ty, "variable type changed");
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Filter body shared by the summary and data endpoints: filter params
/// plus an optional highlight root.
#[derive(Debug, Default, Deserialize)]
pub struct FilterBody {
    #[serde(flatten)]
    pub filters: FilterParams,
    pub highlight: Option<HighlightRoot>,
}

/// POST /distil/variable-summary/:dataset/:variable
pub async fn variable_summary(
    State(state): State<AppState>,
    Path((dataset, variable)): Path<(String, String)>,
    Json(body): Json<FilterBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let engine = &state.runtime.engine;
    let meta = engine.metadata.fetch_dataset(&dataset).await?;
    let histogram = engine
        .data
        .fetch_summary(
            &dataset,
            &meta.storage_name,
            &variable,
            &body.filters,
            body.highlight.as_ref(),
        )
        .await?;
    Ok(Json(serde_json::json!({ "histogram": histogram })))
}

/// POST /distil/data/:dataset/:invert
pub async fn data(
    State(state): State<AppState>,
    Path((dataset, invert)): Path<(String, String)>,
    Json(body): Json<FilterBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let engine = &state.runtime.engine;
    let meta = engine.metadata.fetch_dataset(&dataset).await?;
    let invert = invert == "true";
    let data = engine
        .data
        .fetch_data(&dataset, &meta.storage_name, &body.filters, invert)
        .await?;
    Ok(Json(serde_json::json!({ "data": data })))
}

async fn result_uri_for_solution(state: &AppState, solution_id: &str) -> Result<String, ApiError> {
    let result = state
        .runtime
        .engine
        .solutions
        .fetch_solution_result(solution_id)
        .await?
        .ok_or_else(|| Error::NoData(format!("no result for solution `{solution_id}`")))?;
    Ok(result.result_uri)
}

/// POST /distil/results/:dataset/:solution-id
pub async fn results(
    State(state): State<AppState>,
    Path((dataset, solution_id)): Path<(String, String)>,
    Json(body): Json<FilterBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let engine = &state.runtime.engine;
    let meta = engine.metadata.fetch_dataset(&dataset).await?;
    let result_uri = result_uri_for_solution(&state, &solution_id).await?;
    let data = engine
        .data
        .fetch_results(&dataset, &meta.storage_name, &result_uri, &body.filters)
        .await?;
    Ok(Json(serde_json::json!({ "data": data })))
}

/// POST /distil/predicted-summary/:dataset/:target/:solution-id
///
/// Extrema are precomputed so dependent summary fans share one domain.
pub async fn predicted_summary(
    State(state): State<AppState>,
    Path((dataset, _target, solution_id)): Path<(String, String, String)>,
    Json(body): Json<FilterBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let engine = &state.runtime.engine;
    let meta = engine.metadata.fetch_dataset(&dataset).await?;
    let result_uri = result_uri_for_solution(&state, &solution_id).await?;
    let extrema = match engine
        .data
        .fetch_predicted_extrema(&dataset, &meta.storage_name, &result_uri)
        .await
    {
        Ok(extrema) => Some(extrema),
        Err(Error::NoData(_)) => None,
        Err(e) => return Err(e.into()),
    };
    let histogram = engine
        .data
        .fetch_predicted_summary(&dataset, &meta.storage_name, &result_uri, &body.filters, extrema)
        .await?;
    Ok(Json(serde_json::json!({ "histogram": histogram })))
}

/// POST /distil/residuals-summary/:dataset/:target/:solution-id
pub async fn residuals_summary(
    State(state): State<AppState>,
    Path((dataset, _target, solution_id)): Path<(String, String, String)>,
    Json(body): Json<FilterBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let engine = &state.runtime.engine;
    let meta = engine.metadata.fetch_dataset(&dataset).await?;
    let result_uri = result_uri_for_solution(&state, &solution_id).await?;
    let extrema = match engine
        .data
        .fetch_residuals_extrema(&dataset, &meta.storage_name, &result_uri)
        .await
    {
        Ok(extrema) => Some(extrema),
        Err(Error::NoData(_)) => None,
        Err(e) => return Err(e.into()),
    };
    let histogram = engine
        .data
        .fetch_residuals_summary(&dataset, &meta.storage_name, &result_uri, &body.filters, extrema)
        .await?;
    Ok(Json(serde_json::json!({ "histogram": histogram })))
}

/// POST /distil/correctness-summary/:dataset/:solution-id
pub async fn correctness_summary(
    State(state): State<AppState>,
    Path((dataset, solution_id)): Path<(String, String)>,
    Json(body): Json<FilterBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let engine = &state.runtime.engine;
    let meta = engine.metadata.fetch_dataset(&dataset).await?;
    let result_uri = result_uri_for_solution(&state, &solution_id).await?;
    let histogram = engine
        .data
        .fetch_correctness_summary(&dataset, &meta.storage_name, &result_uri, &body.filters)
        .await?;
    Ok(Json(serde_json::json!({ "histogram": histogram })))
}

/// GET /distil/variable-extrema/:dataset/:variable
pub async fn variable_extrema(
    State(state): State<AppState>,
    Path((dataset, variable)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let engine = &state.runtime.engine;
    let meta = engine.metadata.fetch_dataset(&dataset).await?;
    let extrema = engine
        .data
        .fetch_extrema(&dataset, &meta.storage_name, &variable)
        .await?;
    Ok(Json(serde_json::json!({ "extrema": extrema })))
}

/// POST /distil/training-summary/:dataset/:variable/:solution-id
///
/// Summary of a training variable restricted to the rows of a result set.
pub async fn training_summary(
    State(state): State<AppState>,
    Path((dataset, variable, solution_id)): Path<(String, String, String)>,
    Json(body): Json<FilterBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let engine = &state.runtime.engine;
    let meta = engine.metadata.fetch_dataset(&dataset).await?;
    let result_uri = result_uri_for_solution(&state, &solution_id).await?;
    let histogram = engine
        .data
        .fetch_summary_by_result(&dataset, &meta.storage_name, &variable, &result_uri, &body.filters)
        .await?;
    Ok(Json(serde_json::json!({ "histogram": histogram })))
}

/// GET /distil/abort
pub async fn abort(State(state): State<AppState>) -> Json<serde_json::Value> {
    info!("abort requested, draining");
    state.runtime.shutdown.cancel();
    Json(serde_json::json!({ "success": true }))
}

/// GET /distil/export/:solution-id
///
/// Writes the fitted solution identifier to disk, then drains the process.
pub async fn export(
    State(state): State<AppState>,
    Path(solution_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let result = state
        .runtime
        .engine
        .solutions
        .fetch_solution_result(&solution_id)
        .await?
        .ok_or_else(|| Error::NoData(format!("no result for solution `{solution_id}`")))?;

    let export_dir = state.runtime.engine.scratch_path.join("export");
    std::fs::create_dir_all(&export_dir).map_err(Error::from)?;
    let marker = export_dir.join(format!("{solution_id}.txt"));
    std::fs::write(&marker, &result.fitted_solution_id).map_err(Error::from)?;
    info!(solution_id = %solution_id, path = %marker.display(), "fitted solution exported");

    state.runtime.shutdown.cancel();
    Ok(Json(serde_json::json!({
        "success": true,
        "fittedSolutionId": result.fitted_solution_id,
    })))
}
