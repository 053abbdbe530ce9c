//! Ordered fan-in of enrichment results.
//!
//! Results arrive in completion order. Each one lands in a slot reserved for
//! its item's position, and the output is read back slot by slot in listing
//! order once every worker is done.

use crate::counter;
use crate::endpoints::Endpoints;
use crate::metrics_defs::ENRICHMENT_DEGRADED;
use crate::types::{CatalogItem, EnrichmentResult, OutputRecord};

pub struct Aggregator {
    slots: Vec<Option<EnrichmentResult>>,
}

/// Output records in listing order.
#[derive(Debug)]
pub struct Aggregated {
    pub records: Vec<OutputRecord>,
    /// Records whose score fell back to 0.0.
    pub degraded: usize,
}

impl Aggregator {
    pub fn new(len: usize) -> Self {
        Aggregator {
            slots: vec![None; len],
        }
    }

    pub fn insert(&mut self, index: usize, result: EnrichmentResult) {
        let Some(slot) = self.slots.get_mut(index) else {
            tracing::warn!(
                index,
                item_id = result.item_id,
                "Enrichment result has no matching item, ignoring it"
            );
            return;
        };

        if let Some(existing) = slot {
            tracing::warn!(
                index,
                item_id = existing.item_id,
                "Duplicate enrichment result, keeping the first one"
            );
            return;
        }

        *slot = Some(result);
    }

    /// Number of slots that have received a result.
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Merges each item with its result. An item whose result is missing, or
    /// belongs to another item, gets a degraded score instead of being dropped.
    pub fn finish(self, items: &[CatalogItem], endpoints: &Endpoints) -> Aggregated {
        if self.slots.len() != items.len() {
            tracing::warn!(
                slots = self.slots.len(),
                items = items.len(),
                "Aggregator was sized for a different number of items"
            );
        }

        let mut slots = self.slots.into_iter();
        let mut degraded = 0;

        let records = items
            .iter()
            .map(|item| {
                let result = match slots.next().flatten() {
                    Some(result) if result.item_id == item.id => result,
                    Some(result) => {
                        tracing::warn!(
                            item_id = item.id,
                            result_item_id = result.item_id,
                            "Enrichment result belongs to another item, using a score of 0.0"
                        );
                        counter!(ENRICHMENT_DEGRADED).increment(1);
                        EnrichmentResult::degraded(item.id)
                    }
                    None => {
                        tracing::warn!(
                            item_id = item.id,
                            "No enrichment result arrived, using a score of 0.0"
                        );
                        counter!(ENRICHMENT_DEGRADED).increment(1);
                        EnrichmentResult::degraded(item.id)
                    }
                };

                if result.is_degraded() {
                    degraded += 1;
                }

                to_record(item, &result, endpoints)
            })
            .collect();

        Aggregated { records, degraded }
    }
}

fn to_record(item: &CatalogItem, result: &EnrichmentResult, endpoints: &Endpoints) -> OutputRecord {
    OutputRecord {
        title: item.title.clone(),
        link: endpoints.product_link(&item.handle),
        description: item.body_html.clone().unwrap_or_default(),
        brand: item.vendor.clone().unwrap_or_default(),
        tags: item.tags.clone().unwrap_or_default(),
        item_group_id: item.id,
        product_type: item.product_type.clone().unwrap_or_default(),
        availability_score: result.availability_score,
    }
}
