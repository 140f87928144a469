//! Report shapes returned to callers.

use crate::address::IpKey;
use crate::combiner::CombinedThreat;
use crate::providers::ProviderId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where an address is, according to the first geolocation provider that
/// answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Geolocation {
    pub source: ProviderId,
    pub country_code: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
}

impl Geolocation {
    /// An empty record attributed to `source`.
    pub fn empty(source: ProviderId) -> Self {
        Self {
            source,
            country_code: None,
            country: None,
            region: None,
            city: None,
            postal_code: None,
            latitude: None,
            longitude: None,
            timezone: None,
            isp: None,
            org: None,
        }
    }
}

/// Autonomous-system identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsnRecord {
    pub asn: u32,
    pub org_name: Option<String>,
    pub network_name: Option<String>,
    pub country: Option<String>,
    pub description: Option<String>,
    /// Announced prefix covering the queried address, when looked up by IP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl AsnRecord {
    /// A record carrying only the AS number.
    pub fn bare(asn: u32) -> Self {
        Self {
            asn,
            org_name: None,
            network_name: None,
            country: None,
            description: None,
            prefix: None,
        }
    }
}

/// Everything known about one address. This is the unit that gets cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedReport {
    pub ip: IpKey,
    /// The address is in a configured skip range and was never sent upstream.
    pub reserved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geolocation: Option<Geolocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asn: Option<AsnRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat: Option<CombinedThreat>,
    pub fetched_at: DateTime<Utc>,
}

impl EnhancedReport {
    /// Report for an address that is never looked up upstream.
    pub fn reserved(ip: IpKey, fetched_at: DateTime<Utc>) -> Self {
        Self {
            ip,
            reserved: true,
            geolocation: None,
            asn: None,
            threat: None,
            fetched_at,
        }
    }

    /// Copy of the report without the sections the caller opted out of.
    pub fn filtered(&self, include_threat: bool, include_asn: bool) -> Self {
        let mut report = self.clone();
        if !include_threat {
            report.threat = None;
        }
        if !include_asn {
            report.asn = None;
        }
        report
    }
}
