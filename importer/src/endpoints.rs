use crate::config::Shop;
use crate::types::ItemId;
use url::Url;

/// Builds the admin API urls and public product links for a shop.
#[derive(Clone, Debug)]
pub struct Endpoints {
    storefront: Url,
    admin: Url,
    page_limit: Option<u32>,
}

impl Endpoints {
    pub fn new(shop: &Shop) -> Result<Self, url::ParseError> {
        let mut storefront = shop.url.clone();
        if !storefront.path().ends_with('/') {
            let path = format!("{}/", storefront.path());
            storefront.set_path(&path);
        }

        let admin = storefront.join(&format!(
            "admin/api/{}/",
            shop.api_version.trim_matches('/')
        ))?;

        Ok(Endpoints {
            storefront,
            admin,
            page_limit: shop.page_limit,
        })
    }

    /// First page of the product listing.
    pub fn products(&self) -> Result<Url, url::ParseError> {
        let mut url = self.admin.join("products.json")?;
        if let Some(limit) = self.page_limit {
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string());
        }
        Ok(url)
    }

    pub fn variants(&self, item_id: ItemId) -> Result<Url, url::ParseError> {
        self.admin
            .join(&format!("products/{item_id}/variants.json"))
    }

    pub fn product_link(&self, handle: &str) -> String {
        format!("{}products/{}", self.storefront, handle)
    }
}
