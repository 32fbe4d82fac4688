//! Metadata auto-fill boundary.
//!
//! Given a shop link, a fetcher returns whatever it could find about the
//! product. Scraping itself lives outside the engine; failures never block
//! the owner, who can always type the fields by hand.

use crate::items::ItemDraft;
use crate::remote::RemoteError;
use crate::types::Money;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// What a fetcher found for a link
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataOutcome {
    /// Product name
    pub name: Option<String>,
    /// Product picture
    pub image_url: Option<String>,
    /// Product price
    pub price: Option<Money>,
    /// Human-readable explanation, usually why nothing was found
    pub message: Option<String>,
}

impl MetadataOutcome {
    /// Whether no field was found
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.image_url.is_none() && self.price.is_none()
    }
}

/// Future returned by [`MetadataFetcher::fetch`]
pub type MetadataFuture<'a> =
    Pin<Box<dyn Future<Output = Result<MetadataOutcome, RemoteError>> + Send + 'a>>;

/// Looks up product details for a link
pub trait MetadataFetcher: Send + Sync {
    /// Best-effort lookup of `url`
    fn fetch<'a>(&'a self, url: &'a str) -> MetadataFuture<'a>;
}

/// Fetcher answering from a fixed table of pages
#[derive(Debug, Default, Clone)]
pub struct CannedMetadata {
    pages: HashMap<String, MetadataOutcome>,
}

impl CannedMetadata {
    /// Register the outcome for `url`
    #[must_use]
    pub fn with_page(mut self, url: &str, outcome: MetadataOutcome) -> Self {
        self.pages.insert(url.to_string(), outcome);
        self
    }
}

impl MetadataFetcher for CannedMetadata {
    fn fetch<'a>(&'a self, url: &'a str) -> MetadataFuture<'a> {
        Box::pin(async move {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| RemoteError::Transport(format!("no response for {url}")))
        })
    }
}

const NOTHING_FOUND: &str = "Nothing found, please fill in the details manually";
const LOOKUP_FAILED: &str = "Could not load the page, please fill in the details manually";
const LINK_REQUIRED: &str = "Enter a link first";

impl ItemDraft {
    /// Fill blank fields from the draft's link
    ///
    /// Fields the owner already typed are kept. Returns the message to show,
    /// if any.
    pub async fn autofill(&mut self, fetcher: &dyn MetadataFetcher) -> Option<String> {
        let url = self.url.trim().to_string();
        if url.is_empty() {
            return Some(LINK_REQUIRED.to_string());
        }

        let outcome = match fetcher.fetch(&url).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Metadata lookup failed");
                return Some(LOOKUP_FAILED.to_string());
            },
        };

        let fill = |field: &mut String, value: Option<String>| {
            if field.trim().is_empty() {
                if let Some(value) = value {
                    *field = value;
                }
            }
        };
        let nothing_found = outcome.is_empty();
        fill(&mut self.name, outcome.name);
        fill(&mut self.image_url, outcome.image_url);
        fill(&mut self.price, outcome.price.map(|p| p.to_string()));

        match outcome.message {
            Some(message) => Some(message),
            None if nothing_found => Some(NOTHING_FOUND.to_string()),
            None => None,
        }
    }
}
