//! Client for the edge key-value store that holds each site's published HTML.
//!
//! The store is keyed by subdomain and serves whatever sits at the key; the
//! publication controller is the only component that writes to it. There is
//! no transaction spanning the content store and the ledger; the
//! reconciliation job heals any divergence left by a crash between writes.

mod client;

pub use client::EdgeContentClient;

use crate::error::Result;
use async_trait::async_trait;

/// Marker embedded in the placeholder page so it is never mistaken for
/// customer content.
pub(crate) const PLACEHOLDER_MARKER: &str = "<!-- siteward:placeholder -->";

/// The three logical content-store operations.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch the HTML currently published at a subdomain, if any.
    async fn read(&self, subdomain: &str) -> Result<Option<String>>;

    /// Publish HTML at a subdomain, overwriting whatever is there.
    async fn write(&self, subdomain: &str, html: &str) -> Result<()>;

    /// Overwrite a subdomain with the "currently unavailable" page.
    async fn write_placeholder(&self, subdomain: &str, label: &str) -> Result<()> {
        self.write(subdomain, &placeholder_page(label)).await
    }
}

/// Synthesize the placeholder served while a site is deactivated.
#[must_use]
pub fn placeholder_page(label: &str) -> String {
    format!(
        "<!DOCTYPE html>\n{marker}\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{label} | currently unavailable</title>\n</head>\n<body>\n\
         <h1>{label}</h1>\n<p>This site is currently unavailable.</p>\n</body>\n</html>\n",
        marker = PLACEHOLDER_MARKER,
        label = label,
    )
}

/// Whether a page is the synthesized placeholder rather than real content.
#[must_use]
pub fn is_placeholder(html: &str) -> bool {
    html.contains(PLACEHOLDER_MARKER)
}
