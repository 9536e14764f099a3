//! Wire messages exchanged with the model-discovery runtime
//!
//! The runtime is a black box behind [`crate::transport::ComputeTransport`];
//! these types define the payloads only, not the framing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Protocol version this client speaks. A runtime reporting a different
/// version is logged as a warning, never a fatal error.
pub const API_VERSION: &str = "2024.4.1";

/// Output key under which produced predictions are exposed.
pub const DEFAULT_EXPOSED_OUTPUT_KEY: &str = "outputs.0";

/// Progress state of a streamed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressState {
    Unknown,
    Pending,
    Running,
    Completed,
    Errored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseProgress {
    pub state: ProgressState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A value passed to or returned from the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    DatasetUri(String),
    CsvUri(String),
    Int64(i64),
    Bool(bool),
    String(String),
    Double(f64),
}

/// Allowed return-value types advertised on a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    DatasetUri,
    CsvUri,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub metric: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemTarget {
    #[serde(rename = "targetName")]
    pub target_name: String,
    #[serde(rename = "columnIndex")]
    pub column_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemInput {
    #[serde(rename = "datasetId")]
    pub dataset_id: String,
    pub targets: Vec<ProblemTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "taskType")]
    pub task_type: String,
    #[serde(rename = "taskSubtype")]
    pub task_subtype: String,
    #[serde(rename = "performanceMetrics")]
    pub performance_metrics: Vec<PerformanceMetric>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDescription {
    pub problem: Problem,
    pub inputs: Vec<ProblemInput>,
}

// --- pipeline description -------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    pub id: String,
    pub version: String,
    pub name: String,
    /// Symbolic path the runtime resolves the implementation from.
    pub path: String,
}

/// A step argument bound to the pipeline input or an upstream step output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerArgument {
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterArgument {
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDescriptionStep {
    pub primitive: Primitive,
    pub arguments: HashMap<String, ContainerArgument>,
    pub hyperparams: HashMap<String, HyperparameterArgument>,
    pub outputs: Vec<StepOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDescriptionOutput {
    pub data: String,
}

/// A compiled primitive-step DAG submitted as the search template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDescription {
    pub name: String,
    pub description: String,
    pub steps: Vec<PipelineDescriptionStep>,
    pub outputs: Vec<PipelineDescriptionOutput>,
}

// --- hello ----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResponse {
    #[serde(rename = "userAgent")]
    pub user_agent: String,
    pub version: String,
    #[serde(rename = "allowedValueTypes", default)]
    pub allowed_value_types: Vec<String>,
    #[serde(rename = "supportedExtensions", default)]
    pub supported_extensions: Vec<String>,
}

// --- search ---------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSolutionsRequest {
    pub problem: ProblemDescription,
    #[serde(rename = "userAgent")]
    pub user_agent: String,
    pub version: String,
    /// Requested max search time in seconds; not guaranteed to be honoured.
    #[serde(rename = "timeBound")]
    pub time_bound: f64,
    #[serde(rename = "allowedValueTypes")]
    pub allowed_value_types: Vec<ValueType>,
    pub inputs: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<PipelineDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSolutionsResponse {
    #[serde(rename = "searchId")]
    pub search_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSearchSolutionsResultsResponse {
    #[serde(rename = "solutionId", default)]
    pub solution_id: String,
    pub progress: ResponseProgress,
}

// --- score ----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSolutionRequest {
    #[serde(rename = "solutionId")]
    pub solution_id: String,
    pub inputs: Vec<Value>,
    #[serde(rename = "performanceMetrics")]
    pub performance_metrics: Vec<PerformanceMetric>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSolutionResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionScoreValue {
    /// Metric the score was computed under; absent when the runtime did not
    /// echo it back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetScoreSolutionResultsResponse {
    pub progress: ResponseProgress,
    #[serde(default)]
    pub scores: Vec<SolutionScoreValue>,
}

// --- fit ------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitSolutionRequest {
    #[serde(rename = "solutionId")]
    pub solution_id: String,
    pub inputs: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitSolutionResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFitSolutionResultsResponse {
    pub progress: ResponseProgress,
    #[serde(rename = "fittedSolutionId", default)]
    pub fitted_solution_id: String,
}

// --- produce --------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceSolutionRequest {
    #[serde(rename = "fittedSolutionId")]
    pub fitted_solution_id: String,
    pub inputs: Vec<Value>,
    #[serde(rename = "exposeOutputs")]
    pub expose_outputs: Vec<String>,
    #[serde(rename = "exposeValueTypes")]
    pub expose_value_types: Vec<ValueType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceSolutionResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProduceSolutionResultsResponse {
    pub progress: ResponseProgress,
    #[serde(rename = "exposedOutputs", default)]
    pub exposed_outputs: HashMap<String, Value>,
}

// --- task & metric vocabulary --------------------------------------------

/// Maps the user-facing task name onto the runtime's vocabulary.
pub fn runtime_task_type(task: &str) -> String {
    task.to_uppercase()
}

pub fn runtime_task_subtype(sub_task: &str) -> String {
    if sub_task.is_empty() {
        "NONE".to_string()
    } else {
        sub_task.to_uppercase()
    }
}

pub fn runtime_metrics(metrics: &[String]) -> Vec<PerformanceMetric> {
    metrics
        .iter()
        .map(|m| PerformanceMetric { metric: m.clone() })
        .collect()
}
