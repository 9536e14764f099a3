//! Progress events and the process-wide event bus
//!
//! Status transitions are persisted to storage *before* they are published
//! here, so a subscriber that reads storage inside its handler always
//! observes the transition it was notified about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::request::Progress;

/// A request- or solution-level status transition.
///
/// `solution_id` is absent for request-level events; `result_id` is present
/// only on the completion event of a produced solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionStatus {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "solutionId", skip_serializing_if = "Option::is_none")]
    pub solution_id: Option<String>,
    #[serde(rename = "resultId", skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    pub progress: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SolutionStatus {
    pub fn request(request_id: &str, progress: Progress) -> Self {
        SolutionStatus {
            request_id: request_id.to_string(),
            solution_id: None,
            result_id: None,
            progress,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn solution(request_id: &str, solution_id: &str, progress: Progress) -> Self {
        SolutionStatus {
            request_id: request_id.to_string(),
            solution_id: Some(solution_id.to_string()),
            result_id: None,
            progress,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_result(mut self, result_id: &str) -> Self {
        self.result_id = Some(result_id.to_string());
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Central fan-out bus for status events.
///
/// Backed by `tokio::sync::broadcast`: publishing never blocks on slow
/// subscribers, who instead observe a lag and resynchronise from persisted
/// state. Cloning is cheap; all clones share the channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SolutionStatus>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    /// Subscribe to all events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SolutionStatus> {
        self.tx.subscribe()
    }

    /// Publish an event, ignoring the no-subscriber case.
    pub fn publish(&self, status: SolutionStatus) {
        let _ = self.tx.send(status);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(SolutionStatus::request("req-1", Progress::Pending));
        let status = rx.recv().await.unwrap();
        assert_eq!(status.request_id, "req-1");
        assert_eq!(status.progress, Progress::Pending);
        assert!(status.solution_id.is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new(8);
        bus.publish(SolutionStatus::request("req-1", Progress::Running));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
