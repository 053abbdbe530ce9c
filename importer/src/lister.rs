use crate::counter;
use crate::endpoints::Endpoints;
use crate::metrics_defs::ITEMS_LISTED;
use crate::retry::{FetchError, RetryingFetcher};
use crate::types::{CatalogItem, CatalogListing};
use http::header::{HeaderMap, LINK};
use std::sync::Arc;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum ListError {
    #[error("could not fetch catalog: {0}")]
    Fetch(#[from] FetchError),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug)]
pub struct CatalogPage {
    pub items: Vec<CatalogItem>,
    /// Cursor url for the following page, if the server advertised one.
    pub next: Option<Url>,
}

/// Fetches the base collection of catalog items.
pub struct CatalogLister {
    fetcher: RetryingFetcher,
    endpoints: Arc<Endpoints>,
    max_pages: usize,
}

impl CatalogLister {
    pub fn new(fetcher: RetryingFetcher, endpoints: Arc<Endpoints>, max_pages: usize) -> Self {
        CatalogLister {
            fetcher,
            endpoints,
            max_pages,
        }
    }

    // No page means the first page of the listing.
    pub async fn list_page(&self, page: Option<&Url>) -> Result<CatalogPage, ListError> {
        let url = match page {
            Some(url) => url.clone(),
            None => self.endpoints.products()?,
        };

        let (listing, headers) = self.fetcher.fetch_json::<CatalogListing>(&url).await?;

        Ok(CatalogPage {
            items: listing.products,
            next: next_page(&headers),
        })
    }

    /// Reads pages in server order until there is no next page, a page comes
    /// back empty, or `max_pages` pages have been read.
    pub async fn list(&self) -> Result<Vec<CatalogItem>, ListError> {
        let mut items = Vec::new();
        let mut next: Option<Url> = None;
        let mut page_fetches = 0;

        loop {
            let page = self.list_page(next.as_ref()).await?;
            page_fetches += 1;

            let empty = page.items.is_empty();
            items.extend(page.items);
            next = page.next;

            if empty || next.is_none() || page_fetches >= self.max_pages {
                break;
            }
        }

        tracing::info!(
            pages = page_fetches,
            items = items.len(),
            "Fetched {page_fetches} pages from the catalog"
        );
        counter!(ITEMS_LISTED).increment(items.len() as u64);

        Ok(items)
    }
}

/// Extracts the `rel="next"` target from a `Link` header.
fn next_page(headers: &HeaderMap) -> Option<Url> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(split_links)
        .find_map(|link| {
            let mut parts = link.split(';');
            let target = parts.next()?.trim();
            let is_next = parts.any(|param| {
                let param = param.trim();
                param == "rel=\"next\"" || param == "rel=next"
            });
            if !is_next {
                return None;
            }
            let target = target.strip_prefix('<')?.strip_suffix('>')?;
            Url::parse(target).ok()
        })
}

/// Splits a `Link` header value into its comma separated links. Commas inside
/// `<...>` belong to the target url.
fn split_links(value: &str) -> Vec<&str> {
    let mut links = Vec::new();
    let mut in_target = false;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            '<' => in_target = true,
            '>' => in_target = false,
            ',' if !in_target => {
                links.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    links.push(&value[start..]);

    links
}
