use crate::sink::{Sink, SinkError};
use crate::transport::{Fetched, Transport, TransportError};
use crate::types::OutputRecord;
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use http::header::{HeaderMap, HeaderValue, LINK, RETRY_AFTER};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

type Response = Result<Fetched, TransportError>;

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<Response>>,
    fallback: Option<Response>,
    delays: HashMap<String, Duration>,
    calls: HashMap<String, usize>,
}

/// In-memory transport that replays canned responses per url and records
/// how many calls were in progress at once.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next call to `url`.
    pub fn push(&self, url: &Url, response: Response) {
        self.script
            .lock()
            .unwrap()
            .queued
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// Returned whenever a url has nothing queued. Unset means 404.
    pub fn set_fallback(&self, response: Response) {
        self.script.lock().unwrap().fallback = Some(response);
    }

    pub fn set_delay(&self, url: &Url, delay: Duration) {
        self.script
            .lock()
            .unwrap()
            .delays
            .insert(url.to_string(), delay);
    }

    pub fn calls(&self, url: &Url) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .get(url.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.script.lock().unwrap().calls.values().sum()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &Url) -> Result<Fetched, TransportError> {
        let (response, delay) = {
            let mut script = self.script.lock().unwrap();
            *script.calls.entry(url.to_string()).or_default() += 1;

            let queued = script
                .queued
                .get_mut(url.as_str())
                .and_then(|queue| queue.pop_front());
            let response = queued
                .or_else(|| script.fallback.clone())
                .unwrap_or_else(|| status(404));
            let delay = script
                .delays
                .get(url.as_str())
                .copied()
                .unwrap_or_default();
            (response, delay)
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

pub fn ok_json(body: &str) -> Response {
    ok_with_headers(body, HeaderMap::new())
}

pub fn ok_with_headers(body: &str, headers: HeaderMap) -> Response {
    Ok(Fetched {
        body: Bytes::from(body.to_string()),
        headers,
    })
}

/// A page with a `Link` header pointing at `next`.
pub fn ok_with_next(body: &str, next: &Url) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        LINK,
        HeaderValue::from_str(&format!("<{next}>; rel=\"next\"")).unwrap(),
    );
    ok_with_headers(body, headers)
}

pub fn rate_limited(retry_after: Option<&str>) -> Response {
    let mut headers = HeaderMap::new();
    if let Some(value) = retry_after {
        headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
    }
    Err(TransportError::Http {
        status: StatusCode::TOO_MANY_REQUESTS,
        headers,
    })
}

pub fn status(code: u16) -> Response {
    Err(TransportError::Http {
        status: StatusCode::from_u16(code).unwrap(),
        headers: HeaderMap::new(),
    })
}

/// Listing body with one product per id, handles derived from the id.
pub fn products_json(ids: &[u64]) -> String {
    let products: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "title": format!("Product {id}"),
                "handle": format!("product-{id}"),
                "body_html": format!("<p>Product {id}</p>"),
                "vendor": "Acme",
                "tags": "sale, summer",
                "product_type": "Shirts",
            })
        })
        .collect();
    serde_json::json!({ "products": products }).to_string()
}

pub fn variants_json(quantities: &[i64]) -> String {
    let variants: Vec<serde_json::Value> = quantities
        .iter()
        .enumerate()
        .map(|(i, quantity)| serde_json::json!({ "id": i, "inventory_quantity": quantity }))
        .collect();
    serde_json::json!({ "variants": variants }).to_string()
}

/// Sink that keeps the written records in memory.
#[derive(Default)]
pub struct MemorySink {
    pub written: Mutex<Option<Vec<OutputRecord>>>,
}

impl Sink for MemorySink {
    fn write(&self, records: &[OutputRecord]) -> Result<(), SinkError> {
        *self.written.lock().unwrap() = Some(records.to_vec());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".into()
    }
}
