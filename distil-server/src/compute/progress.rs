//! Per-request and per-solution status plumbing
//!
//! Every request and every solution owns a capacity-1 status channel; a
//! forwarder task drains each channel onto the process event bus in
//! publication order. Producers persist state before sending, so a
//! subscriber reading storage inside its handler always observes the
//! transition it was notified about.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use distil_common::events::{EventBus, SolutionStatus};

/// Sender half of a status channel.
pub type StatusChannel = mpsc::Sender<SolutionStatus>;

/// Creates a capacity-1 status channel and spawns its forwarder onto the
/// bus. The buffer slot keeps the initial persist from blocking before a
/// subscriber exists.
pub fn spawn_status_channel(bus: EventBus) -> StatusChannel {
    let (tx, mut rx) = mpsc::channel::<SolutionStatus>(1);
    tokio::spawn(async move {
        while let Some(status) = rx.recv().await {
            bus.publish(status);
        }
    });
    tx
}

/// A live request's control handle.
#[derive(Clone)]
pub struct RequestHandle {
    /// Search session id assigned by the runtime.
    pub search_id: String,
    pub cancel: CancellationToken,
}

/// Registry of in-flight requests, keyed by request id. Solutions never
/// hold a handle back to their request; cancellation and stop flow through
/// here.
#[derive(Clone, Default)]
pub struct RequestRegistry {
    inner: Arc<Mutex<HashMap<String, RequestHandle>>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        RequestRegistry::default()
    }

    pub fn register(&self, request_id: &str, handle: RequestHandle) {
        self.inner
            .lock()
            .expect("request registry poisoned")
            .insert(request_id.to_string(), handle);
    }

    pub fn get(&self, request_id: &str) -> Option<RequestHandle> {
        self.inner
            .lock()
            .expect("request registry poisoned")
            .get(request_id)
            .cloned()
    }

    pub fn remove(&self, request_id: &str) {
        self.inner
            .lock()
            .expect("request registry poisoned")
            .remove(request_id);
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .expect("request registry poisoned")
            .is_empty()
    }

    /// Cancels every live request; used on process shutdown.
    pub fn cancel_all(&self) {
        for handle in self
            .inner
            .lock()
            .expect("request registry poisoned")
            .values()
        {
            handle.cancel.cancel();
        }
    }
}
