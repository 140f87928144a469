//! ipinfo.io geolocation provider.

use super::{fetch_json, non_empty, GeoProvider, ProviderId};
use crate::config::IpInfoConfig;
use crate::error::ErrorKind;
use crate::report::Geolocation;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    bogon: bool,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    /// "lat,lon"
    #[serde(default)]
    loc: Option<String>,
    /// "AS15169 Google LLC"
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    postal: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
}

fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lon) = loc.split_once(',')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

/// Strip the leading AS number from an ipinfo `org` value.
fn org_name(org: &str) -> &str {
    match org.split_once(' ') {
        Some((asn, rest)) if asn.starts_with("AS") && asn[2..].parse::<u32>().is_ok() => rest,
        _ => org,
    }
}

/// ipinfo.io provider; requires a token.
pub struct IpInfoProvider {
    config: IpInfoConfig,
    client: Client,
}

impl IpInfoProvider {
    pub fn new(config: IpInfoConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl GeoProvider for IpInfoProvider {
    fn id(&self) -> ProviderId {
        ProviderId::IpInfo
    }

    async fn locate(&self, ip: IpAddr) -> Result<Geolocation, ErrorKind> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), ip);

        debug!(ip = %ip, "Querying ipinfo");

        let request = self.client.get(&url).bearer_auth(&self.config.token);
        let body: IpInfoResponse = fetch_json(request).await?;

        if body.bogon {
            return Err(ErrorKind::MalformedResponse);
        }

        let coords = body.loc.as_deref().and_then(parse_loc);
        let org = non_empty(body.org);

        Ok(Geolocation {
            source: ProviderId::IpInfo,
            country_code: non_empty(body.country),
            // ipinfo only returns country names on paid plans
            country: None,
            region: non_empty(body.region),
            city: non_empty(body.city),
            postal_code: non_empty(body.postal),
            latitude: coords.map(|c| c.0),
            longitude: coords.map(|c| c.1),
            timezone: non_empty(body.timezone),
            isp: org.as_deref().map(|o| org_name(o).to_string()),
            org,
        })
    }
}
