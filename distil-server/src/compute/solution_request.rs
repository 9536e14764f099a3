//! Solution request engine
//!
//! One background task per request drives the runtime search; one task per
//! emitted solution runs score → fit → produce → persist. Status writes
//! always hit storage before the matching event is published, a solution
//! is dispatched at most once per emitted id, and request-level state is
//! only ever mutated by the request task.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use distil_common::events::{EventBus, SolutionStatus};
use distil_common::model::filter::{error_key, predicted_key, FilterParams};
use distil_common::model::request::{
    result_id_for_uri, Progress, Request, FEATURE_TYPE_TARGET, FEATURE_TYPE_TRAIN,
};
use distil_common::model::types::ROW_INDEX_KEY;
use distil_common::model::variable::Variable;
use distil_common::model::SolutionResult;
use distil_common::{Error, Result};

use distil_compute::api::{
    runtime_metrics, runtime_task_subtype, runtime_task_type, GetSearchSolutionsResultsResponse,
    PipelineDescription, Problem, ProblemDescription, ProblemInput, ProblemTarget,
    ProduceSolutionRequest, ProgressState, SearchSolutionsRequest, Value, ValueType,
    API_VERSION, DEFAULT_EXPOSED_OUTPUT_KEY,
};
use distil_compute::description::user_dataset_pipeline;
use distil_compute::Client;

use crate::storage::{DataStorage, MetadataStorage, SolutionStorage};

use super::progress::{spawn_status_channel, RequestHandle, RequestRegistry, StatusChannel};
use super::split;

/// Everything a request needs to run; injected once at startup.
pub struct EngineContext {
    pub client: Client,
    pub data: Arc<dyn DataStorage>,
    pub solutions: Arc<dyn SolutionStorage>,
    pub metadata: Arc<dyn MetadataStorage>,
    pub bus: EventBus,
    pub registry: RequestRegistry,
    pub scratch_path: PathBuf,
}

/// A submitted model-discovery request.
#[derive(Debug, Clone, Deserialize)]
pub struct SolutionRequest {
    pub dataset: String,
    pub target: String,
    pub task: String,
    #[serde(rename = "subTask", default)]
    pub sub_task: String,
    #[serde(rename = "maxSolutions", default)]
    pub max_solutions: i32,
    #[serde(rename = "maxTime", default)]
    pub max_time: i64,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub filters: FilterParams,
}

impl SolutionRequest {
    /// Decodes a ws command payload; schema failures surface as
    /// `InvalidRequest` with no state created.
    pub fn from_json(payload: serde_json::Value) -> Result<SolutionRequest> {
        serde_json::from_value(payload)
            .map_err(|e| Error::InvalidRequest(format!("malformed solution request: {e}")))
    }

    fn validate(&self) -> Result<()> {
        if self.dataset.is_empty() {
            return Err(Error::InvalidRequest("request is missing a dataset".into()));
        }
        if self.target.is_empty() {
            return Err(Error::InvalidRequest("request is missing a target".into()));
        }
        if self.task.is_empty() {
            return Err(Error::InvalidRequest("request is missing a task".into()));
        }
        if self.metrics.is_empty() {
            return Err(Error::InvalidRequest(
                "request must name at least one metric".into(),
            ));
        }
        Ok(())
    }

    /// Persists the request, opens the runtime search and spawns the
    /// dispatch task. Returns the new request id once the request is
    /// pending.
    pub async fn dispatch(mut self, ctx: Arc<EngineContext>) -> Result<String> {
        self.validate()?;

        // the index column is always part of the persisted selection
        if !self.filters.variables.iter().any(|v| v == ROW_INDEX_KEY) {
            self.filters.variables.push(ROW_INDEX_KEY.to_string());
        }

        let variables = ctx
            .metadata
            .fetch_variables(&self.dataset, true, true)
            .await?;
        self.filters.validate(&variables)?;

        // generated cluster/feature columns stay out of the training set
        let data_variables: Vec<Variable> = variables
            .iter()
            .filter(|v| !v.is_generated())
            .cloned()
            .collect();
        let target_variable = data_variables
            .iter()
            .find(|v| v.key == self.target)
            .ok_or_else(|| {
                Error::InvalidRequest(format!("target `{}` is not in the dataset", self.target))
            })?
            .clone();

        // persist every user-visible variable; the preprocessing step marks
        // deselected columns for removal on the runtime side
        let mut all_var_filters = self.filters.clone();
        all_var_filters.variables = data_variables.iter().map(|v| v.key.clone()).collect();
        let column_index = all_var_filters
            .variables
            .iter()
            .position(|v| v == &self.target)
            .unwrap_or(0);

        let dataset_meta = ctx.metadata.fetch_dataset(&self.dataset).await?;
        let filtered = ctx
            .data
            .fetch_data(&self.dataset, &dataset_meta.storage_name, &all_var_filters, false)
            .await?;

        let request_id = Uuid::new_v4().to_string();
        let uris = split::persist_train_test(&ctx.scratch_path, &request_id, &filtered)?;

        let preprocessing = if ctx.client.skip_preprocessing() {
            None
        } else {
            Some(user_dataset_pipeline(
                &self.dataset,
                &data_variables,
                &self.target,
                &self.filters.variables,
                &self.filters.filters,
            )?)
        };

        let search_request = self.search_request(column_index, preprocessing, &uris.train, &ctx);
        let search_id = ctx.client.start_search(&search_request).await?;
        info!(request_id = %request_id, search_id = %search_id, "search opened");

        let request_channel = spawn_status_channel(ctx.bus.clone());
        persist_request_status(&ctx, &request_channel, &self, &request_id, Progress::Pending)
            .await?;

        // record the per-variable roles and the filter set for replay
        for key in &self.filters.variables {
            if key == ROW_INDEX_KEY {
                continue;
            }
            let feature_type = if key == &self.target {
                FEATURE_TYPE_TARGET
            } else {
                FEATURE_TYPE_TRAIN
            };
            ctx.solutions
                .persist_request_feature(&request_id, key, feature_type)
                .await?;
        }
        ctx.solutions
            .persist_request_filters(&request_id, &self.filters)
            .await?;

        let cancel = CancellationToken::new();
        ctx.registry.register(
            &request_id,
            RequestHandle {
                search_id: search_id.clone(),
                cancel: cancel.clone(),
            },
        );

        let dispatch_ctx = ctx.clone();
        let request = self.clone();
        let dispatch_request_id = request_id.clone();
        tokio::spawn(async move {
            dispatch_request(
                dispatch_ctx,
                request,
                dispatch_request_id,
                search_id,
                uris.train,
                uris.test,
                request_channel,
                cancel,
                target_variable,
            )
            .await;
        });

        Ok(request_id)
    }

    fn search_request(
        &self,
        column_index: usize,
        preprocessing: Option<PipelineDescription>,
        train_uri: &str,
        ctx: &EngineContext,
    ) -> SearchSolutionsRequest {
        SearchSolutionsRequest {
            problem: ProblemDescription {
                problem: Problem {
                    task_type: runtime_task_type(&self.task),
                    task_subtype: runtime_task_subtype(&self.sub_task),
                    performance_metrics: runtime_metrics(&self.metrics),
                },
                inputs: vec![ProblemInput {
                    dataset_id: self.dataset.clone(),
                    targets: vec![ProblemTarget {
                        target_name: self.target.clone(),
                        column_index,
                    }],
                }],
            },
            user_agent: ctx.client.user_agent().to_string(),
            version: API_VERSION.to_string(),
            time_bound: self.max_time as f64,
            allowed_value_types: vec![ValueType::DatasetUri, ValueType::CsvUri],
            inputs: vec![Value::DatasetUri(train_uri.to_string())],
            template: preprocessing,
        }
    }

    fn record(&self, request_id: &str, progress: Progress) -> Request {
        let now = Utc::now();
        Request {
            request_id: request_id.to_string(),
            dataset: self.dataset.clone(),
            target: self.target.clone(),
            task: self.task.clone(),
            sub_task: self.sub_task.clone(),
            metrics: self.metrics.clone(),
            max_solutions: self.max_solutions,
            max_time: self.max_time,
            progress,
            created_time: now,
            last_updated_time: now,
            features: Vec::new(),
            filters: self.filters.clone(),
        }
    }
}

async fn persist_request_status(
    ctx: &EngineContext,
    channel: &StatusChannel,
    request: &SolutionRequest,
    request_id: &str,
    progress: Progress,
) -> Result<()> {
    let persisted = match progress {
        Progress::Pending => {
            ctx.solutions
                .persist_request(&request.record(request_id, progress), Utc::now())
                .await
        }
        _ => ctx.solutions.update_request(request_id, progress, Utc::now()).await,
    };
    if let Err(e) = persisted {
        persist_request_error(ctx, channel, request_id, &e).await;
        return Err(e);
    }
    let _ = channel
        .send(SolutionStatus::request(request_id, progress))
        .await;
    Ok(())
}

async fn persist_request_error(
    ctx: &EngineContext,
    channel: &StatusChannel,
    request_id: &str,
    error: &Error,
) {
    // best effort: the event carries the cause even when the write fails
    if let Err(persist_err) = ctx
        .solutions
        .update_request(request_id, Progress::Errored, Utc::now())
        .await
    {
        warn!(request_id, error = %persist_err, "failed to persist request error state");
    }
    let _ = channel
        .send(SolutionStatus::request(request_id, Progress::Errored).with_error(error))
        .await;
}

async fn persist_solution_status(
    ctx: &EngineContext,
    channel: &StatusChannel,
    request_id: &str,
    solution_id: &str,
    progress: Progress,
) -> Result<()> {
    if let Err(e) = ctx
        .solutions
        .persist_solution(request_id, solution_id, progress, Utc::now())
        .await
    {
        persist_solution_error(ctx, channel, request_id, solution_id, &e).await;
        return Err(e);
    }
    let _ = channel
        .send(SolutionStatus::solution(request_id, solution_id, progress))
        .await;
    Ok(())
}

async fn persist_solution_error(
    ctx: &EngineContext,
    channel: &StatusChannel,
    request_id: &str,
    solution_id: &str,
    error: &Error,
) {
    if let Err(persist_err) = ctx
        .solutions
        .persist_solution(request_id, solution_id, Progress::Errored, Utc::now())
        .await
    {
        warn!(
            request_id,
            solution_id,
            error = %persist_err,
            "failed to persist solution error state"
        );
    }
    let _ = channel
        .send(SolutionStatus::solution(request_id, solution_id, Progress::Errored).with_error(error))
        .await;
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_request(
    ctx: Arc<EngineContext>,
    request: SolutionRequest,
    request_id: String,
    search_id: String,
    train_uri: String,
    test_uri: String,
    request_channel: StatusChannel,
    cancel: CancellationToken,
    target_variable: Variable,
) {
    if persist_request_status(&ctx, &request_channel, &request, &request_id, Progress::Running)
        .await
        .is_err()
    {
        ctx.registry.remove(&request_id);
        return;
    }

    // at-most-once dispatch per emitted solution id
    let seen: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    let handler_ctx = ctx.clone();
    let handler_request = request.clone();
    let handler_request_id = request_id.clone();
    let handler_cancel = cancel.clone();
    let handler_train = train_uri.clone();
    let handler_test = test_uri.clone();
    let handler_target = target_variable.clone();
    let handler = move |response: GetSearchSolutionsResultsResponse| {
        let ctx = handler_ctx.clone();
        let request = handler_request.clone();
        let request_id = handler_request_id.clone();
        let cancel = handler_cancel.clone();
        let train_uri = handler_train.clone();
        let test_uri = handler_test.clone();
        let target_variable = handler_target.clone();
        let seen = seen.clone();
        async move {
            let solution_id = response.solution_id;
            if cancel.is_cancelled() {
                info!(
                    request_id = %request_id,
                    solution_id = %solution_id,
                    "ignoring solution after stop"
                );
                return;
            }
            if !seen.lock().expect("seen set poisoned").insert(solution_id.clone()) {
                warn!(
                    request_id = %request_id,
                    solution_id = %solution_id,
                    "duplicate solution emit ignored"
                );
                return;
            }
            dispatch_solution(
                ctx,
                request,
                request_id,
                solution_id,
                train_uri,
                test_uri,
                target_variable,
                cancel,
            )
            .await;
        }
    };

    let searched = ctx.client.search_solutions(&search_id, handler).await;
    let ended = ctx.client.end_search(&search_id).await;

    // all solution tasks have quiesced here; settle the terminal state
    if cancel.is_cancelled() {
        persist_request_error(&ctx, &request_channel, &request_id, &Error::Cancelled).await;
    } else if let Err(e) = searched {
        persist_request_error(&ctx, &request_channel, &request_id, &e).await;
    } else if let Err(e) = ended {
        persist_request_error(&ctx, &request_channel, &request_id, &e).await;
    } else {
        let _ = persist_request_status(
            &ctx,
            &request_channel,
            &request,
            &request_id,
            Progress::Completed,
        )
        .await;
    }
    ctx.registry.remove(&request_id);
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_solution(
    ctx: Arc<EngineContext>,
    request: SolutionRequest,
    request_id: String,
    solution_id: String,
    train_uri: String,
    test_uri: String,
    target_variable: Variable,
    cancel: CancellationToken,
) {
    let channel = spawn_status_channel(ctx.bus.clone());
    if persist_solution_status(&ctx, &channel, &request_id, &solution_id, Progress::Pending)
        .await
        .is_err()
    {
        return;
    }

    // a cancelled request grants in-flight solutions one pull timeout of
    // grace before they are forced errored
    let grace = {
        let cancel = cancel.clone();
        let timeout = ctx.client.pull_timeout();
        async move {
            cancel.cancelled().await;
            tokio::time::sleep(timeout).await;
        }
    };

    tokio::select! {
        _ = grace => {
            persist_solution_error(&ctx, &channel, &request_id, &solution_id, &Error::Cancelled)
                .await;
        }
        outcome = run_solution(
            &ctx,
            &channel,
            &request,
            &request_id,
            &solution_id,
            &train_uri,
            &test_uri,
            &target_variable,
        ) => {
            if let Err(e) = outcome {
                persist_solution_error(&ctx, &channel, &request_id, &solution_id, &e).await;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_solution(
    ctx: &EngineContext,
    channel: &StatusChannel,
    request: &SolutionRequest,
    request_id: &str,
    solution_id: &str,
    train_uri: &str,
    test_uri: &str,
    target_variable: &Variable,
) -> Result<()> {
    // score against the test split
    let score_responses = ctx
        .client
        .generate_solution_scores(solution_id, test_uri, &request.metrics)
        .await?;
    for response in &score_responses {
        if response.progress.state != ProgressState::Completed {
            continue;
        }
        for score in &response.scores {
            // a response without an explicit metric is attributed to the
            // first requested one
            let metric = score
                .metric
                .clone()
                .unwrap_or_else(|| request.metrics[0].clone());
            ctx.solutions
                .persist_solution_score(solution_id, &metric, score.value)
                .await?;
        }
    }

    // fit on the train split
    let fit_responses = ctx
        .client
        .generate_solution_fit(solution_id, train_uri)
        .await?;
    let fitted_solution_id = fit_responses
        .iter()
        .map(|r| r.fitted_solution_id.as_str())
        .find(|id| !id.is_empty())
        .ok_or_else(|| {
            Error::Transport(format!("no fitted solution ID for solution `{solution_id}`"))
        })?
        .to_string();

    persist_solution_status(ctx, channel, request_id, solution_id, Progress::Running).await?;

    // produce predictions over the test split
    let produce_request = ProduceSolutionRequest {
        fitted_solution_id: fitted_solution_id.clone(),
        inputs: vec![Value::DatasetUri(test_uri.to_string())],
        expose_outputs: vec![DEFAULT_EXPOSED_OUTPUT_KEY.to_string()],
        expose_value_types: vec![ValueType::CsvUri],
    };
    let produce_responses = ctx.client.generate_predictions(&produce_request).await?;

    let dataset_meta = ctx.metadata.fetch_dataset(&request.dataset).await?;
    for response in produce_responses {
        if response.progress.state != ProgressState::Completed {
            continue;
        }
        let output = response
            .exposed_outputs
            .get(DEFAULT_EXPOSED_OUTPUT_KEY)
            .ok_or_else(|| Error::Transport("output is missing from response".into()))?;
        let Value::CsvUri(uri) = output else {
            return Err(Error::Transport("output is not of correct format".into()));
        };

        // canonical path: scheme stripped before hashing and storage
        let result_uri = uri
            .strip_prefix("file://")
            .unwrap_or(uri.as_str())
            .to_string();
        let result_id = result_id_for_uri(&result_uri);

        // result rows land before the solution is marked completed
        ctx.data
            .persist_result(
                &request.dataset,
                &dataset_meta.storage_name,
                &result_uri,
                &request.target,
            )
            .await?;
        ctx.solutions
            .persist_solution_result(&SolutionResult {
                result_id: result_id.clone(),
                solution_id: solution_id.to_string(),
                fitted_solution_id: fitted_solution_id.clone(),
                result_uri: result_uri.clone(),
                progress: Progress::Completed,
                created_time: Utc::now(),
                predicted_key: predicted_key(&target_variable.key, solution_id),
                error_key: error_key(&target_variable.key, solution_id),
            })
            .await?;
        ctx.solutions
            .persist_solution(request_id, solution_id, Progress::Completed, Utc::now())
            .await?;
        let _ = channel
            .send(
                SolutionStatus::solution(request_id, solution_id, Progress::Completed)
                    .with_result(&result_id),
            )
            .await;
    }

    Ok(())
}

/// Stops an in-flight request: halts the search on the runtime and cancels
/// the request's token. Running solution tasks finish on their own; no new
/// ones are spawned.
pub async fn stop_solution_request(ctx: &EngineContext, request_id: &str) -> Result<()> {
    let handle = ctx
        .registry
        .get(request_id)
        .ok_or_else(|| Error::InvalidRequest(format!("unknown request `{request_id}`")))?;
    handle.cancel.cancel();
    ctx.client.stop_search(&handle.search_id).await
}
