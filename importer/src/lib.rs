pub mod aggregator;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod endpoints;
pub mod lister;
pub mod metrics_defs;
pub mod retry;
pub mod sink;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testutils;

use config::{Config, ValidationError};
use credentials::Credentials;
use dispatcher::EnrichmentDispatcher;
use endpoints::Endpoints;
use lister::{CatalogLister, ListError};
use metrics_defs::RUN_DURATION;
use retry::RetryingFetcher;
use sink::{JsonFileSink, Sink, SinkError};
use std::sync::Arc;
use std::time::Instant;
use transport::{ClientError, HttpTransport, Transport};
use types::CatalogItem;

#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),
    #[error("invalid shop url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("could not build HTTP client: {0}")]
    Client(#[from] ClientError),
    #[error("catalog listing failed: {0}")]
    List(#[from] ListError),
    #[error("could not write output: {0}")]
    Sink(#[from] SinkError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("already inside a tokio runtime, use run_async() directly")]
    NestedRuntime,
}

#[derive(Debug)]
pub struct RunSummary {
    pub items: usize,
    pub degraded: usize,
    pub peak_in_flight: usize,
    pub location: String,
}

/// One full import: list the catalog, enrich every item on the worker pool,
/// merge the scores back in listing order and hand the feed to the sink.
pub struct Importer {
    lister: CatalogLister,
    dispatcher: EnrichmentDispatcher,
    endpoints: Arc<Endpoints>,
    sink: Arc<dyn Sink>,
}

impl Importer {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, ImportError> {
        config.validate()?;

        let endpoints = Arc::new(Endpoints::new(&config.shop)?);
        let fetcher = RetryingFetcher::new(transport, config.retry.policy());

        Ok(Importer {
            lister: CatalogLister::new(fetcher.clone(), endpoints.clone(), config.max_pages),
            dispatcher: EnrichmentDispatcher::new(fetcher, endpoints.clone(), config.pool_size),
            endpoints,
            sink,
        })
    }

    pub async fn run(&self) -> Result<RunSummary, ImportError> {
        let start = Instant::now();

        // A listing failure aborts before anything is written.
        let items: Arc<[CatalogItem]> = self.lister.list().await?.into();

        tracing::info!(
            items = items.len(),
            pool_size = self.dispatcher.pool_size(),
            "Enriching catalog items"
        );
        let aggregated = self
            .dispatcher
            .dispatch(items.clone())
            .await
            .finish(&items, &self.endpoints);

        if aggregated.degraded > 0 {
            tracing::warn!(
                degraded = aggregated.degraded,
                "Some items have no availability data"
            );
        }

        self.sink.write(&aggregated.records)?;

        crate::histogram!(RUN_DURATION).record(start.elapsed().as_secs_f64());

        Ok(RunSummary {
            items: aggregated.records.len(),
            degraded: aggregated.degraded,
            peak_in_flight: self.dispatcher.in_flight().peak(),
            location: self.sink.location(),
        })
    }
}

pub fn run(config: Config, credentials: Credentials) -> Result<RunSummary, ImportError> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(ImportError::NestedRuntime);
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_async(config, credentials))
}

pub async fn run_async(config: Config, credentials: Credentials) -> Result<RunSummary, ImportError> {
    let transport = HttpTransport::new(&credentials, config.request_timeout())?;
    let sink = JsonFileSink::new(config.output.path.clone());

    let importer = Importer::new(&config, Arc::new(transport), Arc::new(sink))?;
    importer.run().await
}
