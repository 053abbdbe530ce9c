//! Metrics definitions for the importer.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
    ($def:expr, $($label:expr => $value:expr),+ $(,)?) => {
        metrics::counter!($def.name, $($label => $value),+)
    };
}

#[macro_export]
macro_rules! gauge {
    ($def:expr) => {
        metrics::gauge!($def.name)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
}

pub const HTTP_REQUESTS: MetricDef = MetricDef {
    name: "http.requests",
    metric_type: MetricType::Counter,
    description: "Requests sent to the shop API, tagged by outcome",
};

pub const RATE_LIMITED: MetricDef = MetricDef {
    name: "fetch.rate_limited",
    metric_type: MetricType::Counter,
    description: "Number of 429 responses waited out before retrying",
};

pub const TRANSIENT_RETRIES: MetricDef = MetricDef {
    name: "fetch.retries",
    metric_type: MetricType::Counter,
    description: "Number of retries after a network error or server error",
};

pub const ITEMS_LISTED: MetricDef = MetricDef {
    name: "catalog.items_listed",
    metric_type: MetricType::Counter,
    description: "Catalog items returned by the listing endpoint",
};

pub const ENRICHMENT_DEGRADED: MetricDef = MetricDef {
    name: "enrichment.degraded",
    metric_type: MetricType::Counter,
    description: "Items whose availability score fell back to 0.0",
};

pub const ENRICHMENT_IN_FLIGHT: MetricDef = MetricDef {
    name: "enrichment.in_flight",
    metric_type: MetricType::Gauge,
    description: "Enrichment calls currently running",
};

pub const RUN_DURATION: MetricDef = MetricDef {
    name: "run.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a full import in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    HTTP_REQUESTS,
    RATE_LIMITED,
    TRANSIENT_RETRIES,
    ITEMS_LISTED,
    ENRICHMENT_DEGRADED,
    ENRICHMENT_IN_FLIGHT,
    RUN_DURATION,
];

/// Registers a description for every metric with the installed recorder.
pub fn describe_all() {
    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Gauge => metrics::describe_gauge!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}
