//! Provider Adapter capability: product search and archive download

use crate::types::{GeoPoint, Platform, PipelineResult, ProviderFilters};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Search parameters forwarded to a provider
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub point: GeoPoint,
    /// Inclusive on both ends
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub platform: Platform,
    pub filters: ProviderFilters,
    pub limit: Option<usize>,
}

/// Provider-side description of one product
#[derive(Debug, Clone, PartialEq)]
pub struct ProductMetadata {
    /// Provider's opaque product identifier (used for download)
    pub product_id: String,
    /// Human-readable product name, without container suffixes such as `.SAFE`
    pub title: String,
    pub platform: Platform,
    pub sensing_start: Option<DateTime<Utc>>,
    pub size_bytes: Option<u64>,
    pub attributes: BTreeMap<String, String>,
}

impl ProductMetadata {
    pub fn new(product_id: impl Into<String>, title: impl Into<String>, platform: Platform) -> Self {
        Self {
            product_id: product_id.into(),
            title: title.into(),
            platform,
            sensing_start: None,
            size_bytes: None,
            attributes: BTreeMap::new(),
        }
    }
}

/// An imagery source able to search for and download products.
///
/// Retry and partial-download resume are the adapter's concern. `fetch` must
/// only leave a file under the final `archive_name` once it is complete.
pub trait Provider {
    fn name(&self) -> &str;

    /// Candidate products in provider order
    fn search(&self, request: &SearchRequest) -> PipelineResult<Vec<ProductMetadata>>;

    /// Download the product archive as `download_dir/archive_name`, returning its path
    fn fetch(&self, product: &ProductMetadata, download_dir: &Path, archive_name: &str) -> PipelineResult<PathBuf>;
}
