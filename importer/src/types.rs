use serde::{Deserialize, Serialize};

pub type ItemId = u64;

/// A product as returned by the listing endpoint. Only the consumed fields are modeled.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CatalogItem {
    pub id: ItemId,
    pub title: String,
    pub handle: String,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
}

impl CatalogItem {
    pub fn new<T, H>(id: ItemId, title: T, handle: H) -> Self
    where
        T: Into<String>,
        H: Into<String>,
    {
        CatalogItem {
            id,
            title: title.into(),
            handle: handle.into(),
            body_html: None,
            vendor: None,
            tags: None,
            product_type: None,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct CatalogListing {
    pub products: Vec<CatalogItem>,
}

/// A sub-unit of a catalog item.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Variant {
    pub inventory_quantity: i64,
}

impl Variant {
    pub fn is_available(&self) -> bool {
        self.inventory_quantity > 0
    }
}

#[derive(Deserialize)]
pub(crate) struct VariantListing {
    pub variants: Vec<Variant>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Enriched,
    // Retries exhausted, the response was unusable, or the result never arrived.
    Degraded,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnrichmentResult {
    pub item_id: ItemId,
    pub availability_score: f64,
    pub outcome: Outcome,
}

impl EnrichmentResult {
    pub fn enriched(item_id: ItemId, availability_score: f64) -> Self {
        EnrichmentResult {
            item_id,
            availability_score,
            outcome: Outcome::Enriched,
        }
    }

    pub fn degraded(item_id: ItemId) -> Self {
        EnrichmentResult {
            item_id,
            availability_score: 0.0,
            outcome: Outcome::Degraded,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.outcome == Outcome::Degraded
    }
}

/// One entry of the output feed. Field order is the serialized order.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct OutputRecord {
    pub title: String,
    pub link: String,
    pub description: String,
    pub brand: String,
    pub tags: String,
    pub item_group_id: ItemId,
    pub product_type: String,
    pub availability_score: f64,
}

/// Fraction of variants with stock on hand. No variants at all scores 0.0.
pub fn availability_ratio(variants: &[Variant]) -> f64 {
    if variants.is_empty() {
        return 0.0;
    }
    let available = variants.iter().filter(|v| v.is_available()).count();
    available as f64 / variants.len() as f64
}
