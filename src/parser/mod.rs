pub mod identifier;
pub mod resources;
pub mod tags;

use chrono::Utc;
use scraper::Html;
use tracing::{debug, info};

use crate::record::ImageRecord;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no /images/<id> segment in page address {address}")]
    MissingIdentifier { address: String },
}

/// A parsed snapshot of a host page together with the address it was shown at.
pub struct Page {
    address: String,
    document: Html,
}

impl Page {
    #[cfg(test)]
    pub fn parse(address: impl Into<String>, html: &str) -> Self {
        Self {
            address: address.into(),
            document: Html::parse_document(html),
        }
    }

    /// Parse a snapshot whose address may not be known up front.
    ///
    /// Preference order: `explicit`, then the canonical address embedded in
    /// the document, then `source` (the file path or URL it was loaded from).
    pub fn resolve(explicit: Option<&str>, source: &str, html: &str) -> Self {
        let document = Html::parse_document(html);
        let address = explicit
            .map(str::to_string)
            .or_else(|| identifier::canonical_address(&document))
            .unwrap_or_else(|| source.to_string());
        Self { address, document }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn document(&self) -> &Html {
        &self.document
    }
}

/// Turns a page snapshot into a record. Everything that knows about the
/// host site's markup lives behind this trait.
pub trait Extractor {
    fn extract(&self, page: &Page) -> Result<ImageRecord, ExtractError>;
}

/// Extractor for civitai.com image detail pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct CivitaiExtractor;

impl Extractor for CivitaiExtractor {
    fn extract(&self, page: &Page) -> Result<ImageRecord, ExtractError> {
        let image_id = identifier::image_id(page.address()).ok_or_else(|| {
            ExtractError::MissingIdentifier {
                address: page.address().to_string(),
            }
        })?;
        debug!(image_id, "extracting generation data");

        let record = ImageRecord {
            image_id,
            url: page.address().to_string(),
            resources_used: resources::extract(page.document()),
            tags: tags::extract(page.document()),
            collected_at: Utc::now(),
        };
        info!(
            "Collected image {} ({} resources, {} tags)",
            record.image_id,
            record.resources_used.len(),
            record.tags.len()
        );
        Ok(record)
    }
}

// ── Tests ──
