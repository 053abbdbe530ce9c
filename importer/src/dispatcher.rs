//! Bounded-parallel enrichment of catalog items.
//!
//! A fixed pool of workers claims item positions from a shared cursor, so at
//! most `pool_size` enrichment calls are in flight no matter how many items
//! there are. Each finished result is sent back tagged with its position;
//! the [`Aggregator`] uses that position to restore the listing order.

use crate::aggregator::Aggregator;
use crate::counter;
use crate::endpoints::Endpoints;
use crate::gauge;
use crate::metrics_defs::{ENRICHMENT_DEGRADED, ENRICHMENT_IN_FLIGHT};
use crate::retry::RetryingFetcher;
use crate::types::{CatalogItem, EnrichmentResult, VariantListing, availability_ratio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Counts enrichment calls currently running and remembers the highest count seen.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn enter(self: &Arc<Self>) -> InFlight {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        gauge!(ENRICHMENT_IN_FLIGHT).set(current as f64);
        InFlight {
            gauge: self.clone(),
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Released when the enrichment call finishes, whichever way it finishes.
pub struct InFlight {
    gauge: Arc<ConcurrencyGauge>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let current = self.gauge.current.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!(ENRICHMENT_IN_FLIGHT).set(current as f64);
    }
}

#[derive(Clone)]
pub struct EnrichmentDispatcher {
    fetcher: RetryingFetcher,
    endpoints: Arc<Endpoints>,
    pool_size: usize,
    in_flight: Arc<ConcurrencyGauge>,
}

impl EnrichmentDispatcher {
    pub fn new(fetcher: RetryingFetcher, endpoints: Arc<Endpoints>, pool_size: usize) -> Self {
        EnrichmentDispatcher {
            fetcher,
            endpoints,
            pool_size: pool_size.max(1),
            in_flight: Arc::new(ConcurrencyGauge::default()),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn in_flight(&self) -> &Arc<ConcurrencyGauge> {
        &self.in_flight
    }

    /// Enriches every item and returns once all workers have finished.
    /// Results are slotted by the item's position in `items`.
    pub async fn dispatch(&self, items: Arc<[CatalogItem]>) -> Aggregator {
        let mut aggregator = Aggregator::new(items.len());
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, EnrichmentResult)>();
        let cursor = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();

        for worker in 0..self.pool_size.min(items.len()) {
            let items = items.clone();
            let cursor = cursor.clone();
            let tx = tx.clone();
            let this = self.clone();

            workers.spawn(async move {
                loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(item) = items.get(index) else {
                        break;
                    };

                    let result = this.enrich(item).await;
                    if tx.send((index, result)).is_err() {
                        tracing::error!(worker, "Result channel closed, stopping worker");
                        break;
                    }
                }
            });
        }
        // Only the workers hold senders now, so the channel closes once they are all done.
        drop(tx);

        while let Some((index, result)) = rx.recv().await {
            aggregator.insert(index, result);
        }

        // Drain the pool so no worker outlives the dispatch.
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Enrichment worker failed: {e}");
            }
        }

        aggregator
    }

    /// Computes the availability score for one item. Never fails: any error
    /// after retries is logged and degrades the score to 0.0.
    async fn enrich(&self, item: &CatalogItem) -> EnrichmentResult {
        let _in_flight = self.in_flight.enter();

        let url = match self.endpoints.variants(item.id) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(item_id = item.id, "Invalid variants url: {e}");
                counter!(ENRICHMENT_DEGRADED).increment(1);
                return EnrichmentResult::degraded(item.id);
            }
        };

        match self.fetcher.fetch_json::<VariantListing>(&url).await {
            Ok((listing, _)) => {
                EnrichmentResult::enriched(item.id, availability_ratio(&listing.variants))
            }
            Err(e) => {
                tracing::error!(
                    item_id = item.id,
                    error = %e,
                    "Could not compute availability, using a score of 0.0"
                );
                counter!(ENRICHMENT_DEGRADED).increment(1);
                EnrichmentResult::degraded(item.id)
            }
        }
    }
}
