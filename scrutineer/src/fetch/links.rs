//! Resource links and their discovery on listing pages.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{info, warn};

use crate::browser::BrowserSession;
use crate::error::format_error_chain_ref;

/// Absolute locator of one protected document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceLink(String);

impl ResourceLink {
    /// Normalize a possibly-relative href against the portal's base URL
    pub fn new(raw: &str, base_url: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") || base_url.is_empty() {
            return Self(raw.to_string());
        }
        Self(format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            raw.trim_start_matches('/')
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Crawl listing pages and collect the resource links they reference.
///
/// Links are returned in first-seen order without duplicates. A listing page
/// that fails is logged and skipped.
pub async fn discover_links<S: BrowserSession>(
    session: &mut S,
    listing_pages: &[String],
    base_url: &str,
    suffix: &str,
    settle: Duration,
) -> Vec<ResourceLink> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for page in listing_pages {
        let hrefs = match crawl_page(session, page, settle).await {
            Ok(hrefs) => hrefs,
            Err(e) => {
                warn!(page = %page, error = %format_error_chain_ref(&e), "Listing page skipped");
                continue;
            }
        };

        let before = links.len();
        for href in hrefs {
            if !suffix.is_empty() && !href.trim().ends_with(suffix) {
                continue;
            }
            let link = ResourceLink::new(&href, base_url);
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
        info!(page = %page, found = links.len() - before, "Listing page crawled");
    }

    links
}

async fn crawl_page<S: BrowserSession>(
    session: &mut S,
    page: &str,
    settle: Duration,
) -> Result<Vec<String>, crate::error::FetchError> {
    session.navigate(page).await?;
    tokio::time::sleep(settle).await;
    session.collect_links().await
}
