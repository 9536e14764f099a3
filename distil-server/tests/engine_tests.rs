//! Engine scenario tests
//!
//! Drive the solution request engine against in-memory storage gateways
//! and a scripted compute transport: the classification happy path, stop
//! semantics, duplicate-emit suppression, monotonic progress and the
//! persist-before-publish guarantee.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use distil_common::events::EventBus;
use distil_common::model::filter::FilterParams;
use distil_common::model::request::{Progress, Request, Solution, SolutionResult};
use distil_common::model::types::{
    CATEGORICAL_TYPE, FLOAT_TYPE, INTEGER_TYPE, ROW_INDEX_KEY,
};
use distil_common::model::variable::{Dataset, DatasetSource, Variable, VariableRole};
use distil_common::model::{
    Column, Extrema, FilteredData, HighlightRoot, Histogram,
};
use distil_common::{Error, Result};

use distil_compute::api::*;
use distil_compute::transport::{ComputeTransport, ResponseStream};
use distil_compute::{Client, ClientConfig};
use distil_compute::result::parse_result_file;

use distil_server::compute::{
    stop_solution_request, EngineContext, RequestRegistry, SolutionRequest,
};
use distil_server::storage::{DataStorage, MetadataStorage, SolutionStorage};

// --- in-memory metadata ---------------------------------------------------

struct MemoryMetadata;

fn var(key: &str, ty: &str, role: VariableRole) -> Variable {
    Variable {
        key: key.to_string(),
        display_label: key.to_string(),
        ty: ty.to_string(),
        original_type: ty.to_string(),
        importance: 0.5,
        role,
    }
}

fn iris_variables() -> Vec<Variable> {
    vec![
        var("sepal_length", FLOAT_TYPE, VariableRole::Data),
        var("sepal_width", FLOAT_TYPE, VariableRole::Data),
        var("species", CATEGORICAL_TYPE, VariableRole::Data),
        var(ROW_INDEX_KEY, INTEGER_TYPE, VariableRole::Index),
    ]
}

#[async_trait]
impl MetadataStorage for MemoryMetadata {
    async fn fetch_dataset(&self, dataset_id: &str) -> Result<Dataset> {
        Ok(Dataset {
            id: dataset_id.to_string(),
            storage_name: dataset_id.to_string(),
            folder: String::new(),
            source: DatasetSource::Seed,
            num_rows: 10,
            num_bytes: 1024,
            variables: iris_variables(),
            provenance: "memory".into(),
        })
    }

    async fn fetch_datasets(&self) -> Result<Vec<Dataset>> {
        Ok(vec![self.fetch_dataset("iris").await?])
    }

    async fn search_datasets(&self, _terms: &str) -> Result<Vec<Dataset>> {
        self.fetch_datasets().await
    }

    async fn fetch_variables(
        &self,
        _dataset_id: &str,
        _include_index: bool,
        _include_meta: bool,
    ) -> Result<Vec<Variable>> {
        Ok(iris_variables())
    }

    async fn fetch_variable(&self, _dataset_id: &str, key: &str) -> Result<Variable> {
        iris_variables()
            .into_iter()
            .find(|v| v.key == key)
            .ok_or_else(|| Error::NoData(format!("no variable {key}")))
    }

    async fn set_data_type(&self, _dataset_id: &str, _key: &str, _ty: &str) -> Result<()> {
        Ok(())
    }

    fn provenance(&self) -> &str {
        "memory"
    }
}

// --- in-memory data store -------------------------------------------------

#[derive(Default)]
struct MemoryData {
    results: Mutex<HashMap<String, Vec<(i64, String)>>>,
}

impl MemoryData {
    fn persisted_rows(&self, result_id: &str) -> Vec<(i64, String)> {
        self.results
            .lock()
            .unwrap()
            .get(result_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DataStorage for MemoryData {
    async fn fetch_data(
        &self,
        _dataset: &str,
        _storage_name: &str,
        filter_params: &FilterParams,
        _invert: bool,
    ) -> Result<FilteredData> {
        let columns: Vec<Column> = iris_variables()
            .into_iter()
            .filter(|v| filter_params.variables.iter().any(|k| k == &v.key))
            .map(|v| Column {
                label: v.display_label.clone(),
                key: v.key.clone(),
                ty: v.ty.clone(),
            })
            .collect();
        let values = (0..10)
            .map(|i| {
                columns
                    .iter()
                    .map(|c| match c.key.as_str() {
                        ROW_INDEX_KEY => serde_json::json!(i),
                        "species" => serde_json::json!("setosa"),
                        _ => serde_json::json!(4.2),
                    })
                    .collect()
            })
            .collect();
        Ok(FilteredData {
            num_rows: 10,
            columns,
            values,
        })
    }

    async fn fetch_num_rows(
        &self,
        _storage_name: &str,
        _filters: &[(String, String)],
    ) -> Result<i64> {
        Ok(10)
    }

    async fn fetch_summary(
        &self,
        _dataset: &str,
        _storage_name: &str,
        _variable_key: &str,
        _filter_params: &FilterParams,
        _highlight: Option<&HighlightRoot>,
    ) -> Result<Histogram> {
        Err(Error::Storage("not exercised".into()))
    }

    async fn fetch_summary_by_result(
        &self,
        _dataset: &str,
        _storage_name: &str,
        _variable_key: &str,
        _result_uri: &str,
        _filter_params: &FilterParams,
    ) -> Result<Histogram> {
        Err(Error::Storage("not exercised".into()))
    }

    async fn fetch_extrema(
        &self,
        _dataset: &str,
        _storage_name: &str,
        _variable_key: &str,
    ) -> Result<Extrema> {
        Err(Error::NoData("not exercised".into()))
    }

    async fn fetch_predicted_summary(
        &self,
        _dataset: &str,
        _storage_name: &str,
        _result_uri: &str,
        _filter_params: &FilterParams,
        _extrema: Option<Extrema>,
    ) -> Result<Histogram> {
        Err(Error::Storage("not exercised".into()))
    }

    async fn fetch_predicted_extrema(
        &self,
        _dataset: &str,
        _storage_name: &str,
        _result_uri: &str,
    ) -> Result<Extrema> {
        Err(Error::NoData("not exercised".into()))
    }

    async fn fetch_residuals_summary(
        &self,
        _dataset: &str,
        _storage_name: &str,
        _result_uri: &str,
        _filter_params: &FilterParams,
        _extrema: Option<Extrema>,
    ) -> Result<Histogram> {
        Err(Error::Storage("not exercised".into()))
    }

    async fn fetch_residuals_extrema(
        &self,
        _dataset: &str,
        _storage_name: &str,
        _result_uri: &str,
    ) -> Result<Extrema> {
        Err(Error::NoData("not exercised".into()))
    }

    async fn fetch_correctness_summary(
        &self,
        _dataset: &str,
        _storage_name: &str,
        _result_uri: &str,
        _filter_params: &FilterParams,
    ) -> Result<Histogram> {
        Err(Error::Storage("not exercised".into()))
    }

    async fn persist_result(
        &self,
        _dataset: &str,
        _storage_name: &str,
        result_uri: &str,
        _target: &str,
    ) -> Result<()> {
        let parsed = parse_result_file(std::path::Path::new(result_uri))?;
        let result_id = distil_common::model::request::result_id_for_uri(result_uri);
        let mut results = self.results.lock().unwrap();
        let entry = results.entry(result_id).or_default();
        // idempotent per (result_id, row_index)
        for row in parsed.rows {
            if !entry.iter().any(|(index, _)| *index == row.row_index) {
                entry.push((row.row_index, row.value));
            }
        }
        Ok(())
    }

    async fn fetch_results(
        &self,
        _dataset: &str,
        _storage_name: &str,
        _result_uri: &str,
        _filter_params: &FilterParams,
    ) -> Result<FilteredData> {
        Err(Error::Storage("not exercised".into()))
    }

    async fn set_data_type(
        &self,
        _dataset: &str,
        _storage_name: &str,
        _variable_key: &str,
        _ty: &str,
    ) -> Result<()> {
        Ok(())
    }
}

// --- in-memory solution storage -------------------------------------------

#[derive(Default)]
struct SolutionState {
    requests: HashMap<String, Request>,
    solutions: HashMap<String, (String, Progress)>,
    solution_log: Vec<(String, Progress)>,
    scores: Vec<(String, String, f64)>,
    results: HashMap<String, SolutionResult>,
}

#[derive(Default)]
struct MemorySolutions {
    state: Mutex<SolutionState>,
}

impl MemorySolutions {
    fn request_progress(&self, request_id: &str) -> Option<Progress> {
        self.state
            .lock()
            .unwrap()
            .requests
            .get(request_id)
            .map(|r| r.progress)
    }

    fn solution_progress(&self, solution_id: &str) -> Option<Progress> {
        self.state
            .lock()
            .unwrap()
            .solutions
            .get(solution_id)
            .map(|(_, p)| *p)
    }

    fn solution_log(&self, solution_id: &str) -> Vec<Progress> {
        self.state
            .lock()
            .unwrap()
            .solution_log
            .iter()
            .filter(|(id, _)| id == solution_id)
            .map(|(_, p)| *p)
            .collect()
    }

    fn scores(&self) -> Vec<(String, String, f64)> {
        self.state.lock().unwrap().scores.clone()
    }

    fn result_count(&self) -> usize {
        self.state.lock().unwrap().results.len()
    }
}

#[async_trait]
impl SolutionStorage for MemorySolutions {
    async fn persist_request(&self, request: &Request, _created: DateTime<Utc>) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .requests
            .insert(request.request_id.clone(), request.clone());
        Ok(())
    }

    async fn update_request(
        &self,
        request_id: &str,
        progress: Progress,
        updated: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let request = state
            .requests
            .get_mut(request_id)
            .ok_or_else(|| Error::Storage(format!("unknown request {request_id}")))?;
        request.progress = progress;
        request.last_updated_time = updated;
        Ok(())
    }

    async fn persist_request_feature(
        &self,
        _request_id: &str,
        _feature_name: &str,
        _feature_type: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn persist_request_filters(
        &self,
        _request_id: &str,
        _filters: &FilterParams,
    ) -> Result<()> {
        Ok(())
    }

    async fn persist_solution(
        &self,
        request_id: &str,
        solution_id: &str,
        progress: Progress,
        _updated: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .solutions
            .insert(solution_id.to_string(), (request_id.to_string(), progress));
        state
            .solution_log
            .push((solution_id.to_string(), progress));
        Ok(())
    }

    async fn persist_solution_score(
        &self,
        solution_id: &str,
        metric: &str,
        score: f64,
    ) -> Result<()> {
        self.state.lock().unwrap().scores.push((
            solution_id.to_string(),
            metric.to_string(),
            score,
        ));
        Ok(())
    }

    async fn persist_solution_result(&self, result: &SolutionResult) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .results
            .insert(result.result_id.clone(), result.clone());
        Ok(())
    }

    async fn fetch_request(&self, request_id: &str) -> Result<Option<Request>> {
        Ok(self.state.lock().unwrap().requests.get(request_id).cloned())
    }

    async fn fetch_request_ids(&self, _dataset: &str) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().requests.keys().cloned().collect())
    }

    async fn fetch_solutions(&self, request_id: &str) -> Result<Vec<Solution>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .solutions
            .iter()
            .filter(|(_, (owner, _))| owner == request_id)
            .map(|(id, (owner, progress))| Solution {
                solution_id: id.clone(),
                request_id: owner.clone(),
                progress: *progress,
                created_time: Utc::now(),
                scores: Vec::new(),
                result: None,
            })
            .collect())
    }

    async fn fetch_solution(&self, solution_id: &str) -> Result<Option<Solution>> {
        let state = self.state.lock().unwrap();
        Ok(state.solutions.get(solution_id).map(|(owner, progress)| Solution {
            solution_id: solution_id.to_string(),
            request_id: owner.clone(),
            progress: *progress,
            created_time: Utc::now(),
            scores: Vec::new(),
            result: None,
        }))
    }

    async fn fetch_solution_result(&self, solution_id: &str) -> Result<Option<SolutionResult>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .results
            .values()
            .find(|r| r.solution_id == solution_id)
            .cloned())
    }

    async fn has_active_request(&self, _dataset: &str) -> Result<bool> {
        Ok(false)
    }
}

// --- scripted transport ---------------------------------------------------

/// Scripts a search session: emits the configured solution ids, then either
/// closes the stream or holds it open until `stop_search` arrives.
struct ScriptedTransport {
    solutions: Vec<String>,
    hold_search_open: bool,
    produce_uri: String,
    search_tx: Mutex<Option<mpsc::Sender<Result<GetSearchSolutionsResultsResponse>>>>,
    stop_called: AtomicBool,
    end_called: AtomicBool,
}

impl ScriptedTransport {
    fn new(solutions: Vec<String>, hold_search_open: bool, produce_uri: String) -> Self {
        ScriptedTransport {
            solutions,
            hold_search_open,
            produce_uri,
            search_tx: Mutex::new(None),
            stop_called: AtomicBool::new(false),
            end_called: AtomicBool::new(false),
        }
    }
}

fn completed() -> ResponseProgress {
    ResponseProgress {
        state: ProgressState::Completed,
        status: None,
    }
}

fn boxed<T: Send + 'static>(items: Vec<Result<T>>) -> BoxStream<'static, Result<T>> {
    futures::stream::iter(items).boxed()
}

#[async_trait]
impl ComputeTransport for ScriptedTransport {
    async fn hello(&self) -> Result<HelloResponse> {
        Ok(HelloResponse {
            user_agent: "scripted".into(),
            version: API_VERSION.into(),
            allowed_value_types: vec!["CSV_URI".into()],
            supported_extensions: vec![],
        })
    }

    async fn start_search(
        &self,
        _request: &SearchSolutionsRequest,
    ) -> Result<SearchSolutionsResponse> {
        Ok(SearchSolutionsResponse {
            search_id: "search-1".into(),
        })
    }

    async fn open_search_results(
        &self,
        _search_id: &str,
    ) -> Result<ResponseStream<GetSearchSolutionsResultsResponse>> {
        let (tx, rx) = mpsc::channel(16);
        for solution_id in &self.solutions {
            let _ = tx
                .send(Ok(GetSearchSolutionsResultsResponse {
                    solution_id: solution_id.clone(),
                    progress: completed(),
                }))
                .await;
        }
        if self.hold_search_open {
            *self.search_tx.lock().unwrap() = Some(tx);
        }
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn score_solution(&self, request: &ScoreSolutionRequest) -> Result<ScoreSolutionResponse> {
        Ok(ScoreSolutionResponse {
            request_id: format!("score-{}", request.solution_id),
        })
    }

    async fn open_score_results(
        &self,
        _request_id: &str,
    ) -> Result<ResponseStream<GetScoreSolutionResultsResponse>> {
        Ok(boxed(vec![Ok(GetScoreSolutionResultsResponse {
            progress: completed(),
            scores: vec![SolutionScoreValue {
                metric: None,
                value: 0.93,
            }],
        })]))
    }

    async fn fit_solution(&self, request: &FitSolutionRequest) -> Result<FitSolutionResponse> {
        Ok(FitSolutionResponse {
            request_id: format!("fit-{}", request.solution_id),
        })
    }

    async fn open_fit_results(
        &self,
        request_id: &str,
    ) -> Result<ResponseStream<GetFitSolutionResultsResponse>> {
        Ok(boxed(vec![Ok(GetFitSolutionResultsResponse {
            progress: completed(),
            fitted_solution_id: format!("fitted-{request_id}"),
        })]))
    }

    async fn produce_solution(
        &self,
        _request: &ProduceSolutionRequest,
    ) -> Result<ProduceSolutionResponse> {
        Ok(ProduceSolutionResponse {
            request_id: "produce-1".into(),
        })
    }

    async fn open_produce_results(
        &self,
        _request_id: &str,
    ) -> Result<ResponseStream<GetProduceSolutionResultsResponse>> {
        let mut outputs = HashMap::new();
        outputs.insert(
            DEFAULT_EXPOSED_OUTPUT_KEY.to_string(),
            Value::CsvUri(self.produce_uri.clone()),
        );
        Ok(boxed(vec![Ok(GetProduceSolutionResultsResponse {
            progress: completed(),
            exposed_outputs: outputs,
        })]))
    }

    async fn stop_search(&self, _search_id: &str) -> Result<()> {
        self.stop_called.store(true, Ordering::SeqCst);
        // closing the sender ends the search stream
        *self.search_tx.lock().unwrap() = None;
        Ok(())
    }

    async fn end_search(&self, _search_id: &str) -> Result<()> {
        self.end_called.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// --- harness ----------------------------------------------------------------

struct Harness {
    ctx: Arc<EngineContext>,
    data: Arc<MemoryData>,
    solutions: Arc<MemorySolutions>,
    transport: Arc<ScriptedTransport>,
    _produce_file: tempfile::NamedTempFile,
    _scratch: tempfile::TempDir,
}

async fn harness(solutions: Vec<&str>, hold_search_open: bool) -> Harness {
    let mut produce_file = tempfile::NamedTempFile::new().unwrap();
    produce_file
        .write_all(b"index,species\n0,setosa\n1,virginica\n")
        .unwrap();
    let produce_uri = format!("file://{}", produce_file.path().display());

    let transport = Arc::new(ScriptedTransport::new(
        solutions.into_iter().map(String::from).collect(),
        hold_search_open,
        produce_uri,
    ));
    let client = Client::connect(
        transport.clone(),
        ClientConfig {
            pull_timeout: Duration::from_secs(5),
            pull_max: 10,
            ..ClientConfig::default()
        },
    )
    .await
    .unwrap();

    let data = Arc::new(MemoryData::default());
    let solution_storage = Arc::new(MemorySolutions::default());
    let scratch = tempfile::tempdir().unwrap();

    let ctx = Arc::new(EngineContext {
        client,
        data: data.clone(),
        solutions: solution_storage.clone(),
        metadata: Arc::new(MemoryMetadata),
        bus: EventBus::new(64),
        registry: RequestRegistry::new(),
        scratch_path: scratch.path().to_path_buf(),
    });

    Harness {
        ctx,
        data,
        solutions: solution_storage,
        transport,
        _produce_file: produce_file,
        _scratch: scratch,
    }
}

fn iris_request() -> SolutionRequest {
    SolutionRequest::from_json(serde_json::json!({
        "dataset": "iris",
        "target": "species",
        "task": "classification",
        "subTask": "multiclass",
        "metrics": ["f1Macro"],
        "maxSolutions": 2,
        "maxTime": 60,
        "filters": {
            "size": 1000,
            "variables": ["sepal_length", "sepal_width", "species"],
            "filters": [],
        },
    }))
    .unwrap()
}

/// Waits for a terminal request-level event and returns its progress.
async fn await_request_terminal(
    rx: &mut tokio::sync::broadcast::Receiver<distil_common::events::SolutionStatus>,
    request_id: &str,
) -> Progress {
    loop {
        let status = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for terminal request event")
            .expect("bus closed");
        if status.request_id == request_id
            && status.solution_id.is_none()
            && status.progress.is_terminal()
        {
            return status.progress;
        }
    }
}

// --- scenarios --------------------------------------------------------------

#[tokio::test]
async fn classification_happy_path_completes_both_solutions() {
    let harness = harness(vec!["sol-1", "sol-2"], false).await;
    let mut rx = harness.ctx.bus.subscribe();

    let request_id = iris_request().dispatch(harness.ctx.clone()).await.unwrap();
    let terminal = await_request_terminal(&mut rx, &request_id).await;
    assert_eq!(terminal, Progress::Completed);

    for solution_id in ["sol-1", "sol-2"] {
        assert_eq!(
            harness.solutions.solution_progress(solution_id),
            Some(Progress::Completed),
            "{solution_id} should complete"
        );
        assert_eq!(
            harness.solutions.solution_log(solution_id),
            vec![Progress::Pending, Progress::Running, Progress::Completed]
        );
    }

    // score responses without an explicit metric fall back to the first
    // requested metric
    let scores = harness.solutions.scores();
    assert_eq!(scores.len(), 2);
    assert!(scores.iter().all(|(_, metric, score)| metric == "f1Macro" && *score == 0.93));

    // one produced file, two result rows per solution dispatch
    assert_eq!(harness.solutions.result_count(), 1);
    let result_id = {
        let results = harness.data.results.lock().unwrap();
        results.keys().next().unwrap().clone()
    };
    let rows = harness.data.persisted_rows(&result_id);
    assert_eq!(rows.len(), 2);
    assert!(rows.contains(&(0, "setosa".to_string())));
    assert!(rows.contains(&(1, "virginica".to_string())));

    assert!(harness.transport.end_called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn stop_cancels_request_after_inflight_solutions_finish() {
    let harness = harness(vec!["sol-1"], true).await;
    let mut rx = harness.ctx.bus.subscribe();

    let request_id = iris_request().dispatch(harness.ctx.clone()).await.unwrap();

    // wait for the in-flight solution to reach its terminal state
    loop {
        let status = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for solution completion")
            .unwrap();
        if status.solution_id.as_deref() == Some("sol-1") && status.progress.is_terminal() {
            assert_eq!(status.progress, Progress::Completed);
            break;
        }
    }

    stop_solution_request(&harness.ctx, &request_id).await.unwrap();
    assert!(harness.transport.stop_called.load(Ordering::SeqCst));

    let terminal = await_request_terminal(&mut rx, &request_id).await;
    assert_eq!(terminal, Progress::Errored);
    assert_eq!(
        harness.solutions.request_progress(&request_id),
        Some(Progress::Errored)
    );
    // the already-dispatched solution ran to completion
    assert_eq!(
        harness.solutions.solution_progress("sol-1"),
        Some(Progress::Completed)
    );
}

#[tokio::test]
async fn duplicate_solution_emit_is_dispatched_once() {
    let harness = harness(vec!["sol-1", "sol-1"], false).await;
    let mut rx = harness.ctx.bus.subscribe();

    let request_id = iris_request().dispatch(harness.ctx.clone()).await.unwrap();
    let terminal = await_request_terminal(&mut rx, &request_id).await;
    assert_eq!(terminal, Progress::Completed);

    // a second dispatch would double every transition
    assert_eq!(
        harness.solutions.solution_log("sol-1"),
        vec![Progress::Pending, Progress::Running, Progress::Completed]
    );
}

#[tokio::test]
async fn solution_progress_never_regresses() {
    let harness = harness(vec!["sol-1", "sol-2", "sol-3"], false).await;
    let mut rx = harness.ctx.bus.subscribe();

    let request_id = iris_request().dispatch(harness.ctx.clone()).await.unwrap();
    let mut observed: HashMap<String, Vec<Progress>> = HashMap::new();
    loop {
        let status = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out")
            .unwrap();
        if status.request_id != request_id {
            continue;
        }
        if let Some(solution_id) = &status.solution_id {
            observed
                .entry(solution_id.clone())
                .or_default()
                .push(status.progress);
        } else if status.progress.is_terminal() {
            break;
        }
    }

    let expected = [Progress::Pending, Progress::Running, Progress::Completed];
    for (solution_id, sequence) in observed {
        assert_eq!(
            sequence.as_slice(),
            &expected[..sequence.len()],
            "solution {solution_id} regressed: {sequence:?}"
        );
    }
}

#[tokio::test]
async fn state_is_persisted_before_events_publish() {
    let harness = harness(vec!["sol-1", "sol-2"], false).await;
    let mut rx = harness.ctx.bus.subscribe();

    let request_id = iris_request().dispatch(harness.ctx.clone()).await.unwrap();

    // at every delivered event the store must already hold the new state
    loop {
        let status = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out")
            .unwrap();
        if status.request_id != request_id {
            continue;
        }
        match &status.solution_id {
            Some(solution_id) => {
                assert_eq!(
                    harness.solutions.solution_progress(solution_id),
                    Some(status.progress),
                    "event for {solution_id} outran persistence"
                );
            }
            None => {
                assert_eq!(
                    harness.solutions.request_progress(&request_id),
                    Some(status.progress),
                    "request event outran persistence"
                );
                if status.progress.is_terminal() {
                    break;
                }
            }
        }
    }
}

#[tokio::test]
async fn reingesting_the_same_result_is_idempotent() {
    let harness = harness(vec![], false).await;
    let uri = harness._produce_file.path().display().to_string();

    harness
        .data
        .persist_result("iris", "iris", &uri, "species")
        .await
        .unwrap();
    harness
        .data
        .persist_result("iris", "iris", &uri, "species")
        .await
        .unwrap();

    let result_id = distil_common::model::request::result_id_for_uri(&uri);
    assert_eq!(harness.data.persisted_rows(&result_id).len(), 2);
}

#[tokio::test]
async fn request_without_target_is_rejected_before_any_state() {
    let harness = harness(vec![], false).await;
    let request = SolutionRequest::from_json(serde_json::json!({
        "dataset": "iris",
        "target": "",
        "task": "classification",
        "metrics": ["f1Macro"],
    }))
    .unwrap();
    let err = request.dispatch(harness.ctx.clone()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    assert!(harness
        .solutions
        .fetch_request_ids("")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn persisted_solution_log_never_regresses() {
    let harness = harness(vec!["sol-1"], false).await;
    let mut rx = harness.ctx.bus.subscribe();
    let request_id = iris_request().dispatch(harness.ctx.clone()).await.unwrap();
    let _ = await_request_terminal(&mut rx, &request_id).await;

    let log = harness.solutions.solution_log("sol-1");
    assert!(!log.is_empty());
    for pair in log.windows(2) {
        let order = |p: &Progress| match p {
            Progress::Pending => 0,
            Progress::Running => 1,
            Progress::Completed | Progress::Errored => 2,
        };
        assert!(order(&pair[0]) <= order(&pair[1]), "regressed: {log:?}");
    }
}
