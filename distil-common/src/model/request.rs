//! Request, solution and result records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::model::filter::FilterParams;

/// Derives the result id for a produced file: the sha1 hex digest of its
/// canonical (scheme-stripped) path.
pub fn result_id_for_uri(result_uri: &str) -> String {
    format!("{:x}", Sha1::digest(result_uri.as_bytes()))
}

/// Lifecycle state shared by requests and solutions.
///
/// Transitions are strictly ordered per owner: pending < running <
/// completed/errored; the persisted state never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Progress {
    Pending,
    Running,
    Errored,
    Completed,
}

impl Progress {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Progress::Errored | Progress::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Progress::Pending => "PENDING",
            Progress::Running => "RUNNING",
            Progress::Errored => "ERRORED",
            Progress::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Progress> {
        match s {
            "PENDING" => Some(Progress::Pending),
            "RUNNING" => Some(Progress::Running),
            "ERRORED" => Some(Progress::Errored),
            "COMPLETED" => Some(Progress::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a variable within a persisted request.
pub const FEATURE_TYPE_TRAIN: &str = "train";
pub const FEATURE_TYPE_TARGET: &str = "target";

/// A feature recorded against a request: the variable and its role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFeature {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "featureName")]
    pub feature_name: String,
    #[serde(rename = "featureType")]
    pub feature_type: String,
}

/// A persisted model-discovery request. Owns its solutions exclusively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub dataset: String,
    pub target: String,
    pub task: String,
    #[serde(rename = "subTask")]
    pub sub_task: String,
    pub metrics: Vec<String>,
    #[serde(rename = "maxSolutions")]
    pub max_solutions: i32,
    /// Requested search budget in seconds, handed to the runtime.
    #[serde(rename = "maxTime")]
    pub max_time: i64,
    pub progress: Progress,
    #[serde(rename = "createdTime")]
    pub created_time: DateTime<Utc>,
    #[serde(rename = "lastUpdatedTime")]
    pub last_updated_time: DateTime<Utc>,
    pub features: Vec<RequestFeature>,
    pub filters: FilterParams,
}

/// One candidate solution emitted by the runtime for a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    #[serde(rename = "solutionId")]
    pub solution_id: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub progress: Progress,
    #[serde(rename = "createdTime")]
    pub created_time: DateTime<Utc>,
    pub scores: Vec<SolutionScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SolutionResult>,
}

/// A score persisted from a completed score response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionScore {
    #[serde(rename = "solutionId")]
    pub solution_id: String,
    pub metric: String,
    pub score: f64,
}

/// One materialised prediction run for a solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionResult {
    /// sha1 hex digest of the produced file path.
    #[serde(rename = "resultId")]
    pub result_id: String,
    #[serde(rename = "solutionId")]
    pub solution_id: String,
    #[serde(rename = "fittedSolutionId")]
    pub fitted_solution_id: String,
    #[serde(rename = "resultUri")]
    pub result_uri: String,
    pub progress: Progress,
    #[serde(rename = "createdTime")]
    pub created_time: DateTime<Utc>,
    #[serde(rename = "predictedKey")]
    pub predicted_key: String,
    #[serde(rename = "errorKey")]
    pub error_key: String,
}
