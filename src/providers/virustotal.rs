//! VirusTotal IP address report provider.

use super::{fetch_json, ProviderId, ThreatDetail, ThreatFinding, ThreatProvider};
use crate::config::VirusTotalConfig;
use crate::error::ErrorKind;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use tracing::debug;

/// Upper bound on confidence, reached when every engine returned a verdict.
const MAX_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Deserialize)]
struct VirusTotalResponse {
    data: VirusTotalData,
}

#[derive(Debug, Deserialize)]
struct VirusTotalData {
    attributes: VirusTotalAttributes,
}

#[derive(Debug, Deserialize)]
struct VirusTotalAttributes {
    last_analysis_stats: AnalysisStats,
    #[serde(default)]
    last_analysis_results: HashMap<String, EngineResult>,
    #[serde(default)]
    reputation: i64,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisStats {
    #[serde(default)]
    harmless: u32,
    #[serde(default)]
    malicious: u32,
    #[serde(default)]
    suspicious: u32,
    #[serde(default)]
    undetected: u32,
    #[serde(default)]
    timeout: u32,
}

#[derive(Debug, Deserialize)]
struct EngineResult {
    category: String,
    #[serde(default)]
    result: Option<String>,
}

/// Evidence returned by VirusTotal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirusTotalDetail {
    pub malicious: u32,
    pub suspicious: u32,
    pub harmless: u32,
    pub undetected: u32,
    /// Community reputation score; negative is bad.
    pub reputation: i64,
}

/// Map an engine verdict string to a threat tag.
fn verdict_tag(category: &str, result: Option<&str>) -> Option<&'static str> {
    let result = result.unwrap_or_default().to_lowercase();
    if result.contains("phish") {
        Some("phishing")
    } else if result.contains("spam") {
        Some("spam")
    } else if result.contains("malware") || result.contains("malicious") {
        Some("malware")
    } else if result.contains("mining") || result.contains("miner") {
        Some("cryptomining")
    } else if category == "suspicious" {
        Some("suspicious")
    } else if category == "malicious" {
        Some("malware")
    } else {
        None
    }
}

/// VirusTotal IP report provider.
pub struct VirusTotalProvider {
    config: VirusTotalConfig,
    client: Client,
}

impl VirusTotalProvider {
    pub fn new(config: VirusTotalConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn normalize(attributes: VirusTotalAttributes) -> ThreatFinding {
        let stats = attributes.last_analysis_stats;
        // Counts are upstream-controlled; sum wide so they cannot overflow.
        let flagged = u64::from(stats.malicious) + u64::from(stats.suspicious);
        let voted = flagged + u64::from(stats.harmless);
        let total = voted + u64::from(stats.undetected) + u64::from(stats.timeout);

        let confidence = if total == 0 {
            0.0
        } else {
            MAX_CONFIDENCE * voted as f64 / total as f64
        };

        let threat_types: BTreeSet<String> = attributes
            .last_analysis_results
            .values()
            .filter(|r| r.category == "malicious" || r.category == "suspicious")
            .filter_map(|r| verdict_tag(&r.category, r.result.as_deref()))
            .map(str::to_string)
            .collect();

        ThreatFinding {
            is_listed: flagged > 0,
            threat_types,
            confidence,
            raw_detail: ThreatDetail::VirusTotal(VirusTotalDetail {
                malicious: stats.malicious,
                suspicious: stats.suspicious,
                harmless: stats.harmless,
                undetected: stats.undetected,
                reputation: attributes.reputation,
            }),
        }
    }
}

#[async_trait]
impl ThreatProvider for VirusTotalProvider {
    fn id(&self) -> ProviderId {
        ProviderId::VirusTotal
    }

    async fn check(&self, ip: IpAddr) -> Result<ThreatFinding, ErrorKind> {
        let url = format!(
            "{}/api/v3/ip_addresses/{}",
            self.config.base_url.trim_end_matches('/'),
            ip
        );

        debug!(ip = %ip, "Querying VirusTotal");

        let request = self.client.get(&url).header("x-apikey", &self.config.api_key);
        let response: VirusTotalResponse = fetch_json(request).await?;
        let finding = Self::normalize(response.data.attributes);

        debug!(
            ip = %ip,
            listed = finding.is_listed,
            confidence = finding.confidence,
            "VirusTotal lookup complete"
        );

        Ok(finding)
    }
}
