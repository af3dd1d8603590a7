use std::time::Duration;

use piggies_core::PiggiesError;
use serde::Deserialize;
use tracing::{debug, warn};

/// Nominatim-compatible forward geocoder.
pub struct Geocoder {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

impl Geocoder {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("piggies/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// First match for `address`, or `None` when nothing matches.
    pub async fn lookup(&self, address: &str) -> Result<Option<(f64, f64)>, PiggiesError> {
        let url = format!("{}/search", self.base_url);
        let places: Vec<Place> = self
            .client
            .get(&url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| PiggiesError::External(format!("geocoder request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| PiggiesError::External(format!("geocoder returned bad JSON: {}", e)))?;

        let Some(place) = places.into_iter().next() else {
            debug!("Geocoder found nothing for {:?}", address);
            return Ok(None);
        };
        match (place.lat.parse::<f64>(), place.lon.parse::<f64>()) {
            (Ok(lat), Ok(lon)) => Ok(Some((lat, lon))),
            _ => {
                warn!("Geocoder returned unparseable coordinates {:?}", place);
                Ok(None)
            }
        }
    }
}
