//! RIPEstat Data API provider for ASN lookups.

use super::{fetch_json, non_empty, AsnProvider, ProviderId};
use crate::config::RipeStatConfig;
use crate::error::ErrorKind;
use crate::report::AsnRecord;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::IpAddr;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RipeStatResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct PrefixOverview {
    #[serde(default)]
    resource: Option<String>,
    #[serde(default)]
    asns: Vec<PrefixAsn>,
    #[serde(default)]
    block: Option<Block>,
}

#[derive(Debug, Deserialize)]
struct PrefixAsn {
    asn: u32,
    #[serde(default)]
    holder: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Block {
    #[serde(default)]
    desc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsOverview {
    #[serde(default)]
    holder: Option<String>,
    #[serde(default)]
    block: Option<Block>,
}

/// Split a holder like "GOOGLE - Google LLC" into (network name, org name).
fn split_holder(holder: Option<String>) -> (Option<String>, Option<String>) {
    let Some(holder) = non_empty(holder) else {
        return (None, None);
    };
    match holder.split_once(" - ") {
        Some((network, org)) => (
            non_empty(Some(network.to_string())),
            non_empty(Some(org.to_string())),
        ),
        None => (None, Some(holder)),
    }
}

/// Registry country, from a trailing ", CC" on the org name.
fn country_suffix(org: &str) -> Option<String> {
    let (_, cc) = org.rsplit_once(", ")?;
    (cc.len() == 2 && cc.chars().all(|c| c.is_ascii_uppercase())).then(|| cc.to_string())
}

fn record(asn: u32, holder: Option<String>, block: Option<Block>, prefix: Option<String>) -> AsnRecord {
    let (network_name, org_name) = split_holder(holder);
    let country = org_name.as_deref().and_then(country_suffix);
    AsnRecord {
        asn,
        org_name,
        network_name,
        country,
        description: non_empty(block.and_then(|b| b.desc)),
        prefix: non_empty(prefix),
    }
}

/// RIPEstat provider. Keyless.
pub struct RipeStatProvider {
    config: RipeStatConfig,
    client: Client,
}

impl RipeStatProvider {
    pub fn new(config: RipeStatConfig, client: Client) -> Self {
        Self { config, client }
    }

    async fn call<T: DeserializeOwned>(&self, endpoint: &str, resource: &str) -> Result<T, ErrorKind> {
        let url = format!(
            "{}/data/{}/data.json",
            self.config.base_url.trim_end_matches('/'),
            endpoint
        );
        let request = self.client.get(&url).query(&[("resource", resource)]);
        let response: RipeStatResponse<T> = fetch_json(request).await?;
        Ok(response.data)
    }
}

#[async_trait]
impl AsnProvider for RipeStatProvider {
    fn id(&self) -> ProviderId {
        ProviderId::RipeStat
    }

    async fn lookup_ip(&self, ip: IpAddr) -> Result<AsnRecord, ErrorKind> {
        debug!(ip = %ip, "Querying RIPEstat prefix overview");

        let overview: PrefixOverview = self.call("prefix-overview", &ip.to_string()).await?;

        // Unannounced space has no origin AS.
        let Some(origin) = overview.asns.into_iter().next() else {
            debug!(ip = %ip, "No announcing AS");
            return Err(ErrorKind::MalformedResponse);
        };

        Ok(record(origin.asn, origin.holder, overview.block, overview.resource))
    }

    async fn lookup_asn(&self, asn: u32) -> Result<AsnRecord, ErrorKind> {
        debug!(asn, "Querying RIPEstat AS overview");

        let overview: AsOverview = self.call("as-overview", &format!("AS{}", asn)).await?;
        Ok(record(asn, overview.holder, overview.block, None))
    }
}
