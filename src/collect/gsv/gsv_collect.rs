use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use url::Url;

use crate::collect::global_variables::{
    IMAGE_ENDPOINT, IMAGE_FOV, IMAGE_PITCH, IMAGE_SIZE, METADATA_ENDPOINT,
};

/// Metadata for one panorama as reported by the remote endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PanoMetadata {
    pub pano_id: String,
    pub date: String,
    pub lat: f64,
    pub lng: f64,
}

/// Outcome of a metadata lookup. A non-"OK" status is absence of data at
/// the location, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PanoLookup {
    Found(PanoMetadata),
    NoData,
}

/// Remote panorama service seam. The production implementation is
/// [`GsvCollect`]; tests substitute in-memory fakes.
pub trait PanoramaService {
    /// Look up the panorama closest to a WGS84 coordinate.
    fn metadata(&self, lat: f64, lon: f64, key: &str) -> Result<PanoLookup>;

    /// Fetch one directional image of a panorama.
    fn image(&self, pano_id: &str, heading: f64, key: &str) -> Result<Vec<u8>>;
}

/// Wire shape of the metadata endpoint response.
#[derive(Debug, Deserialize)]
struct MetadataResponse {
    status: String,
    #[serde(default)]
    pano_id: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    location: Option<Location>,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

/// Street View static API client.
pub struct GsvCollect {
    client: Client,
    metadata_url: String,
    image_url: String,
}

impl GsvCollect {
    pub fn new() -> Self {
        GsvCollect::with_endpoints(METADATA_ENDPOINT, IMAGE_ENDPOINT)
    }

    /// Client against alternative endpoints (proxies, local mocks).
    pub fn with_endpoints<M: Into<String>, I: Into<String>>(
        metadata_url: M,
        image_url: I,
    ) -> Self {
        GsvCollect {
            client: Client::new(),
            metadata_url: metadata_url.into(),
            image_url: image_url.into(),
        }
    }

    fn metadata_request_url(&self, lat: f64, lon: f64, key: &str) -> Result<Url> {
        Url::parse_with_params(
            &self.metadata_url,
            [
                ("location", format!("{},{}", lat, lon)),
                ("key", key.to_string()),
            ],
        )
        .context("Failed to build metadata request URL")
    }

    fn image_request_url(&self, pano_id: &str, heading: f64, key: &str) -> Result<Url> {
        Url::parse_with_params(
            &self.image_url,
            [
                ("size", IMAGE_SIZE.to_string()),
                ("pano", pano_id.to_string()),
                ("fov", IMAGE_FOV.to_string()),
                ("heading", heading.to_string()),
                ("pitch", IMAGE_PITCH.to_string()),
                ("key", key.to_string()),
            ],
        )
        .context("Failed to build image request URL")
    }
}

impl Default for GsvCollect {
    fn default() -> Self {
        GsvCollect::new()
    }
}

impl PanoramaService for GsvCollect {
    fn metadata(&self, lat: f64, lon: f64, key: &str) -> Result<PanoLookup> {
        let url = self.metadata_request_url(lat, lon, key)?;
        let response = self
            .client
            .get(url)
            .send()
            .context("Failed to send metadata request")?;
        if !response.status().is_success() {
            anyhow::bail!("Metadata endpoint returned {}", response.status());
        }
        let body: MetadataResponse = response
            .json()
            .context("Failed to decode metadata response")?;

        if body.status != "OK" {
            return Ok(PanoLookup::NoData);
        }

        let pano_id = body
            .pano_id
            .context("Metadata response with status OK is missing pano_id")?;
        // The capture date is occasionally absent even on OK responses.
        let date = body.date.unwrap_or_else(|| "None".to_string());
        let (pano_lat, pano_lng) = body
            .location
            .map(|location| (location.lat, location.lng))
            .unwrap_or((lat, lon));

        Ok(PanoLookup::Found(PanoMetadata {
            pano_id,
            date,
            lat: pano_lat,
            lng: pano_lng,
        }))
    }

    fn image(&self, pano_id: &str, heading: f64, key: &str) -> Result<Vec<u8>> {
        let url = self.image_request_url(pano_id, heading, key)?;
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Failed to fetch image for panorama {}", pano_id))?;
        if !response.status().is_success() {
            anyhow::bail!(
                "Image endpoint returned {} for panorama {}",
                response.status(),
                pano_id
            );
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("Failed to read image body for panorama {}", pano_id))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_request_url() {
        let gsv = GsvCollect::new();
        let url = gsv.metadata_request_url(14.442599, 79.974533, "AIzaKey").unwrap();
        assert!(url.as_str().starts_with(METADATA_ENDPOINT));
        assert!(url
            .query_pairs()
            .any(|(k, v)| k == "location" && v == "14.442599,79.974533"));
        assert!(url.query_pairs().any(|(k, v)| k == "key" && v == "AIzaKey"));
    }

    #[test]
    fn test_image_request_url() {
        let gsv = GsvCollect::new();
        let url = gsv.image_request_url("abc123", 120.0, "AIzaKey").unwrap();
        assert!(url.as_str().starts_with(IMAGE_ENDPOINT));
        assert!(url.query_pairs().any(|(k, v)| k == "pano" && v == "abc123"));
        assert!(url.query_pairs().any(|(k, v)| k == "heading" && v == "120"));
        assert!(url.query_pairs().any(|(k, v)| k == "fov" && v == "60"));
        assert!(url.query_pairs().any(|(k, v)| k == "size" && v == "400x400"));
    }

    #[test]
    fn test_metadata_response_decoding() {
        let body = r#"{
            "status": "OK",
            "pano_id": "CAoSLEFGMVFpcE1n",
            "date": "2019-07",
            "location": {"lat": 14.4426, "lng": 79.9745}
        }"#;
        let decoded: MetadataResponse = serde_json::from_str(body).unwrap();
        assert_eq!(decoded.status, "OK");
        assert_eq!(decoded.pano_id.as_deref(), Some("CAoSLEFGMVFpcE1n"));
        assert_eq!(decoded.location.unwrap().lat, 14.4426);
    }

    #[test]
    fn test_metadata_response_without_data() {
        let decoded: MetadataResponse =
            serde_json::from_str(r#"{"status": "ZERO_RESULTS"}"#).unwrap();
        assert_eq!(decoded.status, "ZERO_RESULTS");
        assert!(decoded.pano_id.is_none());
        assert!(decoded.date.is_none());
        assert!(decoded.location.is_none());
    }
}
