//! Transport abstraction over the model-discovery runtime
//!
//! The orchestration core treats the runtime as a black box with unary
//! calls and server-streamed result pulls. [`ComputeTransport`] is the
//! narrow capability interface the client drives; the concrete binding is
//! selected at startup. [`HttpTransport`] speaks JSON over HTTP with
//! newline-delimited JSON response streams; tests inject scripted
//! transports instead.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use distil_common::{Error, Result};

use crate::api::*;

/// A server stream of responses; `None` marks a clean end of stream.
pub type ResponseStream<T> = BoxStream<'static, Result<T>>;

/// Capability interface to the model-discovery runtime.
///
/// The connection behind an implementation is long lived and shared across
/// request engines; the streams it opens are not shared.
#[async_trait]
pub trait ComputeTransport: Send + Sync {
    async fn hello(&self) -> Result<HelloResponse>;

    async fn start_search(&self, request: &SearchSolutionsRequest)
        -> Result<SearchSolutionsResponse>;

    async fn open_search_results(
        &self,
        search_id: &str,
    ) -> Result<ResponseStream<GetSearchSolutionsResultsResponse>>;

    async fn score_solution(&self, request: &ScoreSolutionRequest) -> Result<ScoreSolutionResponse>;

    async fn open_score_results(
        &self,
        request_id: &str,
    ) -> Result<ResponseStream<GetScoreSolutionResultsResponse>>;

    async fn fit_solution(&self, request: &FitSolutionRequest) -> Result<FitSolutionResponse>;

    async fn open_fit_results(
        &self,
        request_id: &str,
    ) -> Result<ResponseStream<GetFitSolutionResultsResponse>>;

    async fn produce_solution(
        &self,
        request: &ProduceSolutionRequest,
    ) -> Result<ProduceSolutionResponse>;

    async fn open_produce_results(
        &self,
        request_id: &str,
    ) -> Result<ResponseStream<GetProduceSolutionResultsResponse>>;

    async fn stop_search(&self, search_id: &str) -> Result<()>;

    async fn end_search(&self, search_id: &str) -> Result<()>;
}

/// JSON-over-HTTP binding: unary calls as POST bodies, result pulls as
/// newline-delimited JSON response streams.
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
    trace: bool,
}

impl HttpTransport {
    pub fn new(endpoint: &str, trace: bool) -> Self {
        HttpTransport {
            base_url: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            trace,
        }
    }

    async fn unary<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp>
    where
        Req: serde::Serialize + Sync,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);
        if self.trace {
            debug!(url = %url, "compute unary call");
        }
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{path}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "{path}: runtime returned {}",
                response.status()
            )));
        }
        response
            .json::<Resp>()
            .await
            .map_err(|e| Error::Transport(format!("{path}: bad response body: {e}")))
    }

    /// Opens a streamed pull: the response body is consumed line by line by
    /// a producer task feeding a bounded channel, one channel per stream.
    async fn open_stream<T>(&self, path: &str, request_id: &str) -> Result<ResponseStream<T>>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let url = format!("{}/{}/{}", self.base_url, path, request_id);
        if self.trace {
            debug!(url = %url, "compute stream open");
        }
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{path}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "{path}: runtime returned {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::channel::<Result<T>>(32);
        let path = path.to_string();
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(Err(Error::Transport(format!("{path}: {e}"))))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<T>(line) {
                        Ok(item) => {
                            if tx.send(Ok(item)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(path = %path, error = %e, "dropping undecodable stream line");
                        }
                    }
                }
            }
            // sender drop closes the stream cleanly
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[async_trait]
impl ComputeTransport for HttpTransport {
    async fn hello(&self) -> Result<HelloResponse> {
        self.unary("v1/hello", &serde_json::json!({})).await
    }

    async fn start_search(
        &self,
        request: &SearchSolutionsRequest,
    ) -> Result<SearchSolutionsResponse> {
        self.unary("v1/searchSolutions", request).await
    }

    async fn open_search_results(
        &self,
        search_id: &str,
    ) -> Result<ResponseStream<GetSearchSolutionsResultsResponse>> {
        self.open_stream("v1/searchSolutionsResults", search_id).await
    }

    async fn score_solution(&self, request: &ScoreSolutionRequest) -> Result<ScoreSolutionResponse> {
        self.unary("v1/scoreSolution", request).await
    }

    async fn open_score_results(
        &self,
        request_id: &str,
    ) -> Result<ResponseStream<GetScoreSolutionResultsResponse>> {
        self.open_stream("v1/scoreSolutionResults", request_id).await
    }

    async fn fit_solution(&self, request: &FitSolutionRequest) -> Result<FitSolutionResponse> {
        self.unary("v1/fitSolution", request).await
    }

    async fn open_fit_results(
        &self,
        request_id: &str,
    ) -> Result<ResponseStream<GetFitSolutionResultsResponse>> {
        self.open_stream("v1/fitSolutionResults", request_id).await
    }

    async fn produce_solution(
        &self,
        request: &ProduceSolutionRequest,
    ) -> Result<ProduceSolutionResponse> {
        self.unary("v1/produceSolution", request).await
    }

    async fn open_produce_results(
        &self,
        request_id: &str,
    ) -> Result<ResponseStream<GetProduceSolutionResultsResponse>> {
        self.open_stream("v1/produceSolutionResults", request_id).await
    }

    async fn stop_search(&self, search_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .unary("v1/stopSearchSolutions", &serde_json::json!({ "searchId": search_id }))
            .await?;
        Ok(())
    }

    async fn end_search(&self, search_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .unary("v1/endSearchSolutions", &serde_json::json!({ "searchId": search_id }))
            .await?;
        Ok(())
    }
}
