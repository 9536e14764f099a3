//! Process runtime assembly
//!
//! All shared service handles live on one `Runtime` value built at startup
//! and injected into the API layer; nothing is process-global. Startup
//! waits on required dependencies with a bounded retry budget, the only
//! retries anywhere in the system.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use distil_common::events::EventBus;
use distil_common::{Error, Result};

use distil_compute::transport::HttpTransport;
use distil_compute::{Client, ClientConfig};

use crate::compute::{EngineContext, RequestRegistry};
use crate::config::Config;
use crate::storage::metadata::{FileMetadataStorage, PostgresMetadataStorage};
use crate::storage::postgres::{self, PostgresDataStorage, PostgresSolutionStorage};
use crate::storage::MetadataStorage;

const EVENT_BUS_CAPACITY: usize = 256;

/// Shared process runtime: config, engine context and shutdown signal.
pub struct Runtime {
    pub config: Config,
    pub engine: Arc<EngineContext>,
    pub shutdown: CancellationToken,
    catalogues: Vec<Arc<dyn MetadataStorage>>,
}

impl Runtime {
    /// Connects every required dependency (with bounded retries) and wires
    /// the component graph.
    pub async fn initialize(config: Config) -> Result<Runtime> {
        let storage_pool = wait_for_service(
            "postgres",
            config.startup_retries,
            config.startup_retry_delay,
            || postgres::connect(&config.storage_url),
        )
        .await?;
        postgres::init_tables(&storage_pool).await?;

        let metadata_pool = if config.metadata_url == config.storage_url {
            storage_pool.clone()
        } else {
            wait_for_service(
                "metadata",
                config.startup_retries,
                config.startup_retry_delay,
                || postgres::connect(&config.metadata_url),
            )
            .await?
        };
        crate::storage::metadata::init_catalogue_tables(&metadata_pool).await?;

        let metadata: Arc<dyn MetadataStorage> =
            Arc::new(PostgresMetadataStorage::new(metadata_pool));
        let mut catalogues: Vec<Arc<dyn MetadataStorage>> = vec![metadata.clone()];
        if let Some(staging) = &config.staging_path {
            catalogues.push(Arc::new(FileMetadataStorage::new(staging.clone())));
        }

        let data = Arc::new(PostgresDataStorage::new(
            storage_pool.clone(),
            metadata.clone(),
        ));
        let solutions = Arc::new(PostgresSolutionStorage::new(storage_pool));

        let transport = Arc::new(HttpTransport::new(&config.compute_endpoint, config.trace_rpc));
        let client_config = ClientConfig {
            user_agent: format!("distil-{}", env!("CARGO_PKG_VERSION")),
            pull_timeout: config.pull_timeout,
            pull_max: config.pull_max,
            skip_preprocessing: config.skip_preprocessing,
        };
        let client = wait_for_service(
            "compute runtime",
            config.startup_retries,
            config.startup_retry_delay,
            || Client::connect(transport.clone(), client_config.clone()),
        )
        .await?;

        std::fs::create_dir_all(&config.scratch_path)?;

        let engine = Arc::new(EngineContext {
            client,
            data,
            solutions,
            metadata,
            bus: EventBus::new(EVENT_BUS_CAPACITY),
            registry: RequestRegistry::new(),
            scratch_path: config.scratch_path.clone().into(),
        });

        Ok(Runtime {
            config,
            engine,
            shutdown: CancellationToken::new(),
            catalogues,
        })
    }

    /// Catalogue backings in lookup order (primary first).
    pub fn catalogues(&self) -> &[Arc<dyn MetadataStorage>] {
        &self.catalogues
    }
}

/// Bounded-retry wait on a required dependency. Exhaustion is a startup
/// failure (process exit code 1).
async fn wait_for_service<T, F, Fut>(
    name: &str,
    retries: u32,
    delay: Duration,
    mut connect: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;
    for attempt in 1..=retries {
        info!(service = name, attempt, "waiting for service");
        match connect().await {
            Ok(value) => {
                info!(service = name, "service is up");
                return Ok(value);
            }
            Err(e) => {
                warn!(service = name, attempt, error = %e, "service not ready");
                last_error = Some(e);
                tokio::time::sleep(delay).await;
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| Error::Config(format!("service `{name}` never became ready"))))
}
