//! ip-api.com geolocation provider (keyless JSON endpoint).

use super::{fetch_json, non_empty, GeoProvider, ProviderId};
use crate::config::IpApiConfig;
use crate::error::ErrorKind;
use crate::report::Geolocation;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use tracing::debug;

/// Fields requested from the API; keeps the payload small.
const FIELDS: &str = "status,message,country,countryCode,regionName,city,zip,lat,lon,timezone,isp,org";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    zip: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(default)]
    org: Option<String>,
}

/// ip-api.com provider.
pub struct IpApiProvider {
    config: IpApiConfig,
    client: Client,
}

impl IpApiProvider {
    pub fn new(config: IpApiConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl GeoProvider for IpApiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::IpApi
    }

    async fn locate(&self, ip: IpAddr) -> Result<Geolocation, ErrorKind> {
        let url = format!("{}/json/{}", self.config.base_url.trim_end_matches('/'), ip);

        debug!(ip = %ip, "Querying ip-api");

        let request = self.client.get(&url).query(&[("fields", FIELDS)]);
        let body: IpApiResponse = fetch_json(request).await?;

        // The free endpoint answers 200 even for failures.
        if body.status != "success" {
            debug!(ip = %ip, message = ?body.message, "ip-api refused lookup");
            return Err(match body.message.as_deref() {
                Some(m) if m.contains("quota") => ErrorKind::RateLimited,
                _ => ErrorKind::MalformedResponse,
            });
        }

        Ok(Geolocation {
            source: ProviderId::IpApi,
            country_code: non_empty(body.country_code),
            country: non_empty(body.country),
            region: non_empty(body.region_name),
            city: non_empty(body.city),
            postal_code: non_empty(body.zip),
            latitude: body.lat,
            longitude: body.lon,
            timezone: non_empty(body.timezone),
            isp: non_empty(body.isp),
            org: non_empty(body.org),
        })
    }
}
