//! Streaming client for the model-discovery runtime
//!
//! One `Client` is shared by every request engine in the process; the
//! transport connection is long lived and safe for concurrent use, the
//! individual result streams are not. All streaming pulls go through
//! [`Client::pull`], which applies the timeout/stall policy uniformly.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{info, warn};

use distil_common::{Error, Result};

use crate::api::*;
use crate::transport::{ComputeTransport, ResponseStream};

/// Pull policy and identity for a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    /// Per-receive wall clock bound.
    pub pull_timeout: Duration,
    /// Maximum consecutive empty/transient responses before a stream is
    /// considered stalled.
    pub pull_max: u32,
    /// When set, searches are submitted without a preprocessing template.
    pub skip_preprocessing: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            user_agent: format!("distil-{}", env!("CARGO_PKG_VERSION")),
            pull_timeout: Duration::from_secs(60),
            pull_max: 10,
            skip_preprocessing: false,
        }
    }
}

/// Shared handle to the model-discovery runtime.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn ComputeTransport>,
    config: ClientConfig,
}

impl Client {
    /// Connects and validates the runtime with a `hello` round trip. A
    /// version mismatch is logged as a warning, never a failure.
    pub async fn connect(transport: Arc<dyn ComputeTransport>, config: ClientConfig) -> Result<Self> {
        let hello = transport.hello().await?;
        info!(user_agent = %hello.user_agent, "runtime user agent");
        info!(version = %hello.version, "runtime API version");
        info!(value_types = ?hello.allowed_value_types, "runtime allowed value types");
        info!(extensions = ?hello.supported_extensions, "runtime extensions");
        if !hello.version.eq_ignore_ascii_case(API_VERSION) {
            warn!(
                runtime = %hello.version,
                expected = API_VERSION,
                "runtime API version does not match expected version"
            );
        }
        Ok(Client { transport, config })
    }

    pub fn user_agent(&self) -> &str {
        &self.config.user_agent
    }

    pub fn skip_preprocessing(&self) -> bool {
        self.config.skip_preprocessing
    }

    pub fn pull_timeout(&self) -> Duration {
        self.config.pull_timeout
    }

    /// Common pull loop: applies the per-receive timeout, counts consecutive
    /// unproductive responses against `pull_max`, and treats end of stream
    /// as normal completion. `handle` reports whether a response advanced
    /// the pull.
    async fn pull<T, F>(&self, stream: &mut ResponseStream<T>, mut handle: F) -> Result<()>
    where
        F: FnMut(T) -> Result<bool>,
    {
        let mut empties = 0u32;
        loop {
            let received = timeout(self.config.pull_timeout, stream.next())
                .await
                .map_err(|_| Error::Timeout(self.config.pull_timeout))?;
            match received {
                None => return Ok(()),
                Some(Err(e)) => return Err(e),
                Some(Ok(item)) => {
                    if handle(item)? {
                        empties = 0;
                    } else {
                        empties += 1;
                        if empties >= self.config.pull_max {
                            return Err(Error::Stalled(empties));
                        }
                    }
                }
            }
        }
    }

    /// Starts a solution search session, returning the search id.
    pub async fn start_search(&self, request: &SearchSolutionsRequest) -> Result<String> {
        let response = self
            .transport
            .start_search(request)
            .await
            .map_err(|e| Error::Transport(format!("failed to start search: {e}")))?;
        Ok(response.search_id)
    }

    /// Pulls candidate solutions for a search, running `handler` in its own
    /// task per received solution. Does not return until the stream has
    /// ended and every spawned handler has quiesced.
    pub async fn search_solutions<F, Fut>(&self, search_id: &str, handler: F) -> Result<()>
    where
        F: Fn(GetSearchSolutionsResultsResponse) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut stream = self
            .transport
            .open_search_results(search_id)
            .await
            .map_err(|e| Error::Transport(format!("failed to open search results stream: {e}")))?;

        let mut handlers = JoinSet::new();
        let pulled = self
            .pull(&mut stream, |response| {
                // ignore empty heartbeat responses
                if response.solution_id.is_empty() {
                    return Ok(false);
                }
                handlers.spawn(handler(response));
                Ok(true)
            })
            .await;

        // handlers run to completion even when the pull failed
        while handlers.join_next().await.is_some() {}
        pulled
    }

    /// Scores a candidate solution against the test split, returning every
    /// streamed response.
    pub async fn generate_solution_scores(
        &self,
        solution_id: &str,
        dataset_uri: &str,
        metrics: &[String],
    ) -> Result<Vec<GetScoreSolutionResultsResponse>> {
        let request = ScoreSolutionRequest {
            solution_id: solution_id.to_string(),
            inputs: vec![Value::DatasetUri(dataset_uri.to_string())],
            performance_metrics: runtime_metrics(metrics),
        };
        let response = self
            .transport
            .score_solution(&request)
            .await
            .map_err(|e| Error::Transport(format!("failed to start solution scoring: {e}")))?;

        let mut stream = self
            .transport
            .open_score_results(&response.request_id)
            .await
            .map_err(|e| {
                Error::Transport(format!("failed to open solution scoring results stream: {e}"))
            })?;

        let mut responses = Vec::new();
        self.pull(&mut stream, |item: GetScoreSolutionResultsResponse| {
            let productive =
                item.progress.state == ProgressState::Completed || !item.scores.is_empty();
            responses.push(item);
            Ok(productive)
        })
        .await?;
        Ok(responses)
    }

    /// Fits a candidate solution on the train split.
    pub async fn generate_solution_fit(
        &self,
        solution_id: &str,
        dataset_uri: &str,
    ) -> Result<Vec<GetFitSolutionResultsResponse>> {
        let request = FitSolutionRequest {
            solution_id: solution_id.to_string(),
            inputs: vec![Value::DatasetUri(dataset_uri.to_string())],
        };
        let response = self
            .transport
            .fit_solution(&request)
            .await
            .map_err(|e| Error::Transport(format!("failed to start solution fitting: {e}")))?;

        let mut stream = self
            .transport
            .open_fit_results(&response.request_id)
            .await
            .map_err(|e| {
                Error::Transport(format!("failed to open solution fitting results stream: {e}"))
            })?;

        let mut responses = Vec::new();
        self.pull(&mut stream, |item: GetFitSolutionResultsResponse| {
            let productive = !item.fitted_solution_id.is_empty();
            responses.push(item);
            Ok(productive)
        })
        .await?;
        Ok(responses)
    }

    /// Produces predictions from a fitted solution.
    pub async fn generate_predictions(
        &self,
        request: &ProduceSolutionRequest,
    ) -> Result<Vec<GetProduceSolutionResultsResponse>> {
        let response = self
            .transport
            .produce_solution(request)
            .await
            .map_err(|e| Error::Transport(format!("failed to start solution produce: {e}")))?;

        let mut stream = self
            .transport
            .open_produce_results(&response.request_id)
            .await
            .map_err(|e| {
                Error::Transport(format!("failed to open solution produce results stream: {e}"))
            })?;

        let mut responses = Vec::new();
        self.pull(&mut stream, |item: GetProduceSolutionResultsResponse| {
            let productive = item.progress.state == ProgressState::Completed
                || !item.exposed_outputs.is_empty();
            responses.push(item);
            Ok(productive)
        })
        .await?;
        Ok(responses)
    }

    /// Stops an in-flight search; already emitted solutions are unaffected.
    pub async fn stop_search(&self, search_id: &str) -> Result<()> {
        self.transport
            .stop_search(search_id)
            .await
            .map_err(|e| Error::Transport(format!("failed to stop solution search: {e}")))
    }

    /// Releases all runtime resources held by a search.
    pub async fn end_search(&self, search_id: &str) -> Result<()> {
        self.transport
            .end_search(search_id)
            .await
            .map_err(|e| Error::Transport(format!("failed to end solution search: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;

    /// Transport stub scripting a fixed search stream.
    struct ScriptedTransport {
        solutions: Vec<String>,
    }

    #[async_trait]
    impl ComputeTransport for ScriptedTransport {
        async fn hello(&self) -> Result<HelloResponse> {
            Ok(HelloResponse {
                user_agent: "stub".into(),
                version: API_VERSION.into(),
                allowed_value_types: vec![],
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
            let items: Vec<Result<GetSearchSolutionsResultsResponse>> = self
                .solutions
                .iter()
                .map(|id| {
                    Ok(GetSearchSolutionsResultsResponse {
                        solution_id: id.clone(),
                        progress: ResponseProgress {
                            state: ProgressState::Completed,
                            status: None,
                        },
                    })
                })
                .collect();
            Ok(stream::iter(items).boxed())
        }

        async fn score_solution(
            &self,
            _request: &ScoreSolutionRequest,
        ) -> Result<ScoreSolutionResponse> {
            unimplemented!()
        }

        async fn open_score_results(
            &self,
            _request_id: &str,
        ) -> Result<ResponseStream<GetScoreSolutionResultsResponse>> {
            unimplemented!()
        }

        async fn fit_solution(&self, _request: &FitSolutionRequest) -> Result<FitSolutionResponse> {
            unimplemented!()
        }

        async fn open_fit_results(
            &self,
            _request_id: &str,
        ) -> Result<ResponseStream<GetFitSolutionResultsResponse>> {
            unimplemented!()
        }

        async fn produce_solution(
            &self,
            _request: &ProduceSolutionRequest,
        ) -> Result<ProduceSolutionResponse> {
            unimplemented!()
        }

        async fn open_produce_results(
            &self,
            _request_id: &str,
        ) -> Result<ResponseStream<GetProduceSolutionResultsResponse>> {
            unimplemented!()
        }

        async fn stop_search(&self, _search_id: &str) -> Result<()> {
            Ok(())
        }

        async fn end_search(&self, _search_id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn search_handlers_all_quiesce_before_return() {
        let transport = Arc::new(ScriptedTransport {
            solutions: vec!["s1".into(), "s2".into(), "s3".into()],
        });
        let client = Client::connect(transport, ClientConfig::default())
            .await
            .unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in_handler = seen.clone();
        client
            .search_solutions("search-1", move |response| {
                let seen = seen_in_handler.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    seen.lock().unwrap().push(response.solution_id);
                }
            })
            .await
            .unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["s1", "s2", "s3"]);
    }

    #[tokio::test]
    async fn empty_stream_stalls_after_pull_max() {
        struct EmptyTransport;

        #[async_trait]
        impl ComputeTransport for EmptyTransport {
            async fn hello(&self) -> Result<HelloResponse> {
                Ok(HelloResponse {
                    user_agent: "stub".into(),
                    version: "other".into(),
                    allowed_value_types: vec![],
                    supported_extensions: vec![],
                })
            }
            async fn start_search(
                &self,
                _request: &SearchSolutionsRequest,
            ) -> Result<SearchSolutionsResponse> {
                unimplemented!()
            }
            async fn open_search_results(
                &self,
                _search_id: &str,
            ) -> Result<ResponseStream<GetSearchSolutionsResultsResponse>> {
                let empties: Vec<Result<GetSearchSolutionsResultsResponse>> = (0..100)
                    .map(|_| {
                        Ok(GetSearchSolutionsResultsResponse {
                            solution_id: String::new(),
                            progress: ResponseProgress {
                                state: ProgressState::Running,
                                status: None,
                            },
                        })
                    })
                    .collect();
                Ok(stream::iter(empties).boxed())
            }
            async fn score_solution(
                &self,
                _request: &ScoreSolutionRequest,
            ) -> Result<ScoreSolutionResponse> {
                unimplemented!()
            }
            async fn open_score_results(
                &self,
                _request_id: &str,
            ) -> Result<ResponseStream<GetScoreSolutionResultsResponse>> {
                unimplemented!()
            }
            async fn fit_solution(
                &self,
                _request: &FitSolutionRequest,
            ) -> Result<FitSolutionResponse> {
                unimplemented!()
            }
            async fn open_fit_results(
                &self,
                _request_id: &str,
            ) -> Result<ResponseStream<GetFitSolutionResultsResponse>> {
                unimplemented!()
            }
            async fn produce_solution(
                &self,
                _request: &ProduceSolutionRequest,
            ) -> Result<ProduceSolutionResponse> {
                unimplemented!()
            }
            async fn open_produce_results(
                &self,
                _request_id: &str,
            ) -> Result<ResponseStream<GetProduceSolutionResultsResponse>> {
                unimplemented!()
            }
            async fn stop_search(&self, _search_id: &str) -> Result<()> {
                Ok(())
            }
            async fn end_search(&self, _search_id: &str) -> Result<()> {
                Ok(())
            }
        }

        let config = ClientConfig {
            pull_max: 5,
            ..ClientConfig::default()
        };
        let client = Client::connect(Arc::new(EmptyTransport), config)
            .await
            .unwrap();
        let err = client
            .search_solutions("search-1", |_| async {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Stalled(5)));
    }
}
