//! Upstream data providers.
//!
//! Each adapter performs one bounded call per lookup and normalizes the
//! upstream answer into a common shape. Adapters never retry and never
//! panic past their boundary: every failure comes back as an [`ErrorKind`].

pub mod abuseipdb;
pub mod ipapi;
pub mod ipinfo;
pub mod ripestat;
pub mod spamhaus;
pub mod virustotal;

use crate::error::ErrorKind;
use crate::report::{AsnRecord, Geolocation};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// Every provider this service knows about.
///
/// Declaration order is the provider priority order: it decides which
/// geolocation/ASN answer wins and the order of merged threat tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    IpApi,
    IpInfo,
    RipeStat,
    AbuseIpdb,
    Spamhaus,
    VirusTotal,
}

impl ProviderId {
    /// All providers in priority order.
    pub const ALL: [ProviderId; 6] = [
        ProviderId::IpApi,
        ProviderId::IpInfo,
        ProviderId::RipeStat,
        ProviderId::AbuseIpdb,
        ProviderId::Spamhaus,
        ProviderId::VirusTotal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::IpApi => "ipapi",
            ProviderId::IpInfo => "ipinfo",
            ProviderId::RipeStat => "ripestat",
            ProviderId::AbuseIpdb => "abuseipdb",
            ProviderId::Spamhaus => "spamhaus",
            ProviderId::VirusTotal => "virustotal",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-specific evidence behind a threat finding.
///
/// Closed on purpose: the combiner matches it exhaustively to derive a
/// severity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum ThreatDetail {
    AbuseIpdb(abuseipdb::AbuseIpdbDetail),
    Spamhaus(spamhaus::SpamhausDetail),
    VirusTotal(virustotal::VirusTotalDetail),
}

/// A successful answer from a threat-intelligence provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatFinding {
    pub is_listed: bool,
    /// Normalized, lowercase threat tags.
    pub threat_types: BTreeSet<String>,
    /// How much the provider's answer should be trusted, in `[0, 1]`.
    pub confidence: f64,
    pub raw_detail: ThreatDetail,
}

/// Either a finding or the reason there is none.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProviderOutcome {
    Finding(ThreatFinding),
    Failed { error: ErrorKind },
}

impl From<Result<ThreatFinding, ErrorKind>> for ProviderOutcome {
    fn from(result: Result<ThreatFinding, ErrorKind>) -> Self {
        match result {
            Ok(finding) => ProviderOutcome::Finding(finding),
            Err(error) => ProviderOutcome::Failed { error },
        }
    }
}

/// The result of querying one threat provider for one address.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResult {
    pub provider_id: ProviderId,
    #[serde(flatten)]
    pub outcome: ProviderOutcome,
}

impl ProviderResult {
    pub fn new(provider_id: ProviderId, result: Result<ThreatFinding, ErrorKind>) -> Self {
        Self {
            provider_id,
            outcome: result.into(),
        }
    }

    pub fn failed(provider_id: ProviderId, error: ErrorKind) -> Self {
        Self {
            provider_id,
            outcome: ProviderOutcome::Failed { error },
        }
    }

    pub fn finding(&self) -> Option<&ThreatFinding> {
        match &self.outcome {
            ProviderOutcome::Finding(f) => Some(f),
            ProviderOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<ErrorKind> {
        match &self.outcome {
            ProviderOutcome::Finding(_) => None,
            ProviderOutcome::Failed { error } => Some(*error),
        }
    }
}

/// Source of geolocation data.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn locate(&self, ip: IpAddr) -> Result<Geolocation, ErrorKind>;
}

/// Source of autonomous-system registry data.
#[async_trait]
pub trait AsnProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Resolve the AS announcing an address.
    async fn lookup_ip(&self, ip: IpAddr) -> Result<AsnRecord, ErrorKind>;

    /// Describe an AS by number.
    async fn lookup_asn(&self, asn: u32) -> Result<AsnRecord, ErrorKind>;
}

/// Source of reputation / threat-intelligence data.
#[async_trait]
pub trait ThreatProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn check(&self, ip: IpAddr) -> Result<ThreatFinding, ErrorKind>;
}

/// Send a request and decode a JSON body, classifying every failure.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    request: RequestBuilder,
) -> Result<T, ErrorKind> {
    let response = request.header("Accept", "application/json").send().await?;

    if let Some(kind) = ErrorKind::from_status(response.status()) {
        return Err(kind);
    }

    response
        .json::<T>()
        .await
        .map_err(|_| ErrorKind::MalformedResponse)
}

/// Trim an optional upstream string, dropping empties.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
