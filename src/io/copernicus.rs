//! Provider Adapter for the Copernicus Data Space Ecosystem (OData catalogue)

use crate::config::CopernicusConfig;
use crate::io::provider::{ProductMetadata, Provider, SearchRequest};
use crate::types::{Platform, PipelineError, PipelineResult, ProviderFilters};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Upper bound on results when the request carries no tile limit
const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct ODataResponse {
    value: Vec<ODataProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ODataProduct {
    id: String,
    name: String,
    content_length: Option<u64>,
    content_date: Option<ContentDate>,
    online: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContentDate {
    start: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

fn collection_name(platform: Platform) -> &'static str {
    match platform {
        Platform::Sentinel1 => "SENTINEL-1",
        Platform::Sentinel2 => "SENTINEL-2",
        Platform::Landsat8 => "LANDSAT-8",
    }
}

fn quote(value: &str) -> String {
    value.replace('\'', "''")
}

fn string_attribute(name: &str, value: &str) -> String {
    format!(
        "Attributes/OData.CSC.StringAttribute/any(att:att/Name eq '{}' and att/OData.CSC.StringAttribute/Value eq '{}')",
        name,
        quote(value)
    )
}

fn max_double_attribute(name: &str, value: f64) -> String {
    format!(
        "Attributes/OData.CSC.DoubleAttribute/any(att:att/Name eq '{}' and att/OData.CSC.DoubleAttribute/Value le {:.2})",
        name, value
    )
}

/// OData `$filter` expression for a search request; the date range is inclusive
pub fn build_filter(request: &SearchRequest) -> String {
    let mut clauses = vec![
        format!("Collection/Name eq '{}'", collection_name(request.platform)),
        format!(
            "OData.CSC.Intersects(area=geography'SRID=4326;POINT({} {})')",
            request.point.lon, request.point.lat
        ),
        format!("ContentDate/Start ge {}T00:00:00.000Z", request.date_from.format("%Y-%m-%d")),
        format!("ContentDate/Start le {}T23:59:59.999Z", request.date_to.format("%Y-%m-%d")),
    ];

    match &request.filters {
        ProviderFilters::None => {}
        ProviderFilters::Sentinel1 { product_type, sensor_mode, polarisation } => {
            if let Some(value) = product_type {
                clauses.push(string_attribute("productType", value));
            }
            if let Some(value) = sensor_mode {
                clauses.push(string_attribute("operationalMode", value));
            }
            if let Some(value) = polarisation {
                clauses.push(string_attribute("polarisationChannels", value));
            }
        }
        ProviderFilters::Sentinel2 { product_type, max_cloud_cover }
        | ProviderFilters::Landsat8 { product_type, max_cloud_cover } => {
            if let Some(value) = product_type {
                clauses.push(string_attribute("productType", value));
            }
            if let Some(value) = max_cloud_cover {
                clauses.push(max_double_attribute("cloudCover", *value));
            }
        }
    }

    clauses.join(" and ")
}

/// Convert a catalogue response body into product metadata, preserving order
pub fn parse_search_response(body: &str, platform: Platform) -> PipelineResult<Vec<ProductMetadata>> {
    let response: ODataResponse =
        serde_json::from_str(body).map_err(|e| PipelineError::Serialization(format!("Catalogue response: {}", e)))?;

    Ok(response
        .value
        .into_iter()
        .map(|product| {
            let title = product.name.strip_suffix(".SAFE").unwrap_or(&product.name).to_string();
            let mut metadata = ProductMetadata::new(product.id, title, platform);
            metadata.sensing_start = product.content_date.and_then(|d| d.start);
            metadata.size_bytes = product.content_length;
            if let Some(online) = product.online {
                metadata.attributes.insert("online".to_string(), online.to_string());
            }
            metadata.attributes.insert("name".to_string(), product.name);
            metadata
        })
        .collect())
}

/// Copernicus Data Space search and download client
pub struct CopernicusProvider {
    config: CopernicusConfig,
    client: reqwest::blocking::Client,
}

impl CopernicusProvider {
    pub fn new(config: CopernicusConfig) -> PipelineResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("satcrop/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Fresh bearer token by password grant; tokens are short-lived so one is requested per download
    fn access_token(&self) -> PipelineResult<String> {
        let (Some(username), Some(password)) = (&self.config.username, &self.config.password) else {
            return Err(PipelineError::Config(
                "Copernicus credentials missing (set SATCROP_COPERNICUS_USERNAME and SATCROP_COPERNICUS_PASSWORD)"
                    .to_string(),
            ));
        };

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", self.config.client_id.as_str()),
                ("username", username.as_str()),
                ("password", password.as_str()),
            ])
            .send()
            .map_err(|e| PipelineError::Http(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::Http(format!("Token request failed with status: {}", response.status())));
        }

        let body = response
            .text()
            .map_err(|e| PipelineError::Http(format!("Failed to read token response: {}", e)))?;
        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| PipelineError::Serialization(format!("Token response: {}", e)))?;
        Ok(token.access_token)
    }

    fn download_to(&self, product: &ProductMetadata, partial: &Path) -> PipelineResult<()> {
        let fail = |message: String| PipelineError::Download {
            product_id: product.product_id.clone(),
            message,
        };

        let token = self.access_token()?;
        let offset = fs::metadata(partial).map(|m| m.len()).unwrap_or(0);
        let url = format!("{}/Products({})/$value", self.config.download_url, product.product_id);

        let mut request = self.client.get(&url).bearer_auth(token);
        if offset > 0 {
            log::info!("Resuming {} from byte {}", product.title, offset);
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
        }

        let mut response = request.send().map_err(|e| fail(format!("HTTP request failed: {}", e)))?;
        let append = match response.status() {
            StatusCode::PARTIAL_CONTENT => true,
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => return Ok(()),
            status if status.is_success() => false,
            status => return Err(fail(format!("HTTP request failed with status: {}", status))),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(partial)?;
        let written = response
            .copy_to(&mut file)
            .map_err(|e| fail(format!("Transfer interrupted: {}", e)))?;
        file.sync_all()?;

        log::debug!("Wrote {} bytes of {}", written, product.title);
        Ok(())
    }
}

impl Provider for CopernicusProvider {
    fn name(&self) -> &str {
        "copernicus"
    }

    fn search(&self, request: &SearchRequest) -> PipelineResult<Vec<ProductMetadata>> {
        let filter = build_filter(request);
        let top = request.limit.unwrap_or(DEFAULT_PAGE_SIZE).to_string();
        log::info!("Searching {} products at ({}, {})", request.platform, request.point.lat, request.point.lon);
        log::debug!("OData filter: {}", filter);

        let response = self
            .client
            .get(format!("{}/Products", self.config.catalogue_url))
            .query(&[
                ("$filter", filter.as_str()),
                ("$orderby", "ContentDate/Start asc"),
                ("$top", top.as_str()),
            ])
            .send()
            .map_err(|e| PipelineError::Http(format!("Catalogue request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::Http(format!("Catalogue request failed with status: {}", response.status())));
        }

        let body = response
            .text()
            .map_err(|e| PipelineError::Http(format!("Failed to read catalogue response: {}", e)))?;
        let products = parse_search_response(&body, request.platform)?;
        log::info!("Catalogue returned {} products", products.len());
        Ok(products)
    }

    fn fetch(&self, product: &ProductMetadata, download_dir: &Path, archive_name: &str) -> PipelineResult<PathBuf> {
        let archive = download_dir.join(archive_name);
        if archive.is_file() {
            return Ok(archive);
        }
        fs::create_dir_all(download_dir)?;

        let partial = download_dir.join(format!("{}.part", archive_name));
        log::info!("Downloading {} ({}) to {}", product.title, product.product_id, archive.display());
        self.download_to(product, &partial)?;

        let size = fs::metadata(&partial)?.len();
        if let Some(expected) = product.size_bytes {
            if size != expected {
                return Err(PipelineError::Download {
                    product_id: product.product_id.clone(),
                    message: format!("Incomplete archive: {} of {} bytes, will resume", size, expected),
                });
            }
        }

        fs::rename(&partial, &archive)?;
        log::info!("Downloaded {} ({} bytes)", archive.display(), size);
        Ok(archive)
    }
}
