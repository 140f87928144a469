//! AbuseIPDB reputation provider.

use super::{fetch_json, non_empty, ProviderId, ThreatDetail, ThreatFinding, ThreatProvider};
use crate::config::AbuseIpdbConfig;
use crate::error::ErrorKind;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::debug;

/// Confidence in an answer that does not list the address.
const UNLISTED_CONFIDENCE: f64 = 0.95;

/// Lower bound on the confidence of a listing.
const MIN_LISTED_CONFIDENCE: f64 = 0.5;

/// AbuseIPDB API response.
#[derive(Debug, Deserialize)]
struct AbuseIpdbResponse {
    data: AbuseIpdbData,
}

/// AbuseIPDB API response data.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbuseIpdbData {
    /// Abuse confidence score (0-100).
    abuse_confidence_score: u8,

    #[serde(default)]
    total_reports: u32,

    #[serde(default)]
    num_distinct_users: u32,

    /// Whether the IP is a known Tor exit node.
    #[serde(default)]
    is_tor: bool,

    /// Whether the IP is a known public proxy.
    #[serde(default)]
    is_public_proxy: bool,

    #[serde(default)]
    usage_type: Option<String>,

    #[serde(default)]
    isp: Option<String>,

    #[serde(default)]
    last_reported_at: Option<String>,

    /// Individual reports, present when `verbose` is requested.
    #[serde(default)]
    reports: Vec<AbuseIpdbReport>,
}

#[derive(Debug, Deserialize)]
struct AbuseIpdbReport {
    #[serde(default)]
    categories: Vec<u8>,
}

/// Evidence returned by AbuseIPDB.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbuseIpdbDetail {
    pub abuse_confidence_score: u8,
    pub total_reports: u32,
    pub distinct_users: u32,
    pub is_tor: bool,
    pub is_public_proxy: bool,
    pub usage_type: Option<String>,
    pub isp: Option<String>,
    pub last_reported_at: Option<String>,
}

/// Map an AbuseIPDB report category id to a threat tag.
fn category_tag(category: u8) -> Option<&'static str> {
    Some(match category {
        1 | 2 => "dns-abuse",
        3 | 8 => "fraud",
        4 => "ddos",
        6 => "ping-of-death",
        7 => "phishing",
        9 => "proxy",
        10 | 11 => "spam",
        12 => "blog-spam",
        13 => "vpn",
        14 => "port-scan",
        15 => "hacking",
        16 => "sql-injection",
        17 => "spoofing",
        5 | 18 | 22 => "brute-force",
        19 => "bad-bot",
        20 => "compromised",
        21 => "web-attack",
        23 => "iot-attack",
        _ => return None,
    })
}

/// AbuseIPDB reputation provider.
pub struct AbuseIpdbProvider {
    config: AbuseIpdbConfig,
    client: Client,
}

impl AbuseIpdbProvider {
    pub fn new(config: AbuseIpdbConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn normalize(&self, data: AbuseIpdbData) -> ThreatFinding {
        let score = data.abuse_confidence_score.min(100);
        let is_listed = score >= self.config.listing_threshold;

        let mut threat_types: BTreeSet<String> = data
            .reports
            .iter()
            .flat_map(|r| r.categories.iter())
            .filter_map(|c| category_tag(*c))
            .map(str::to_string)
            .collect();
        if data.is_tor {
            threat_types.insert("tor".to_string());
        }
        if data.is_public_proxy {
            threat_types.insert("proxy".to_string());
        }

        let confidence = if is_listed {
            (f64::from(score) / 100.0).max(MIN_LISTED_CONFIDENCE)
        } else {
            UNLISTED_CONFIDENCE
        };

        ThreatFinding {
            is_listed,
            threat_types,
            confidence,
            raw_detail: ThreatDetail::AbuseIpdb(AbuseIpdbDetail {
                abuse_confidence_score: score,
                total_reports: data.total_reports,
                distinct_users: data.num_distinct_users,
                is_tor: data.is_tor,
                is_public_proxy: data.is_public_proxy,
                usage_type: non_empty(data.usage_type),
                isp: non_empty(data.isp),
                last_reported_at: non_empty(data.last_reported_at),
            }),
        }
    }
}

#[async_trait]
impl ThreatProvider for AbuseIpdbProvider {
    fn id(&self) -> ProviderId {
        ProviderId::AbuseIpdb
    }

    async fn check(&self, ip: IpAddr) -> Result<ThreatFinding, ErrorKind> {
        let url = format!("{}/api/v2/check", self.config.base_url.trim_end_matches('/'));
        let max_age = self.config.max_age_days.to_string();

        debug!(ip = %ip, "Querying AbuseIPDB");

        let request = self
            .client
            .get(&url)
            .query(&[
                ("ipAddress", ip.to_string().as_str()),
                ("maxAgeInDays", max_age.as_str()),
                ("verbose", ""),
            ])
            .header("Key", &self.config.api_key);

        let response: AbuseIpdbResponse = fetch_json(request).await?;
        let finding = self.normalize(response.data);

        debug!(
            ip = %ip,
            listed = finding.is_listed,
            confidence = finding.confidence,
            "AbuseIPDB lookup complete"
        );

        Ok(finding)
    }
}
