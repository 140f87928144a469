//! Combination of per-provider threat findings into one verdict.
//!
//! # Severity weighting table
//!
//! A provider that lists an address contributes a severity in `[0, 1]`,
//! derived from its own evidence:
//!
//! | provider   | severity when listed                                             |
//! |------------|------------------------------------------------------------------|
//! | AbuseIPDB  | `abuseConfidenceScore / 100 × abuseipdb_scale`                   |
//! | Spamhaus   | highest weight among matched zones (DROP, SBL, XBL, CSS, PBL)    |
//! | VirusTotal | `(malicious + suspicious / 2) / virustotal_saturation_engines`   |
//!
//! Unlisted answers contribute severity 0. Each successful answer is
//! weighted by its confidence; failed providers carry no weight at all.
//!
//! ```text
//! threatScore = round(100 × Σ(confidence × severity) / Σ confidence)
//! ```

use crate::error::ErrorKind;
use crate::providers::spamhaus::SpamhausList;
use crate::providers::{ProviderId, ProviderResult, ThreatDetail, ThreatFinding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Per-provider severity weights. See the module docs for the table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SeverityWeights {
    #[serde(default = "one")]
    pub abuseipdb_scale: f64,
    #[serde(default = "one")]
    pub spamhaus_drop: f64,
    #[serde(default = "default_sbl")]
    pub spamhaus_sbl: f64,
    #[serde(default = "default_xbl")]
    pub spamhaus_xbl: f64,
    #[serde(default = "default_css")]
    pub spamhaus_css: f64,
    #[serde(default = "default_pbl")]
    pub spamhaus_pbl: f64,
    /// Number of flagging engines at which VirusTotal severity saturates.
    #[serde(default = "default_saturation")]
    pub virustotal_saturation_engines: u32,
}

fn one() -> f64 {
    1.0
}

fn default_sbl() -> f64 {
    0.9
}

fn default_xbl() -> f64 {
    0.8
}

fn default_css() -> f64 {
    0.7
}

fn default_pbl() -> f64 {
    0.2
}

fn default_saturation() -> u32 {
    5
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            abuseipdb_scale: one(),
            spamhaus_drop: one(),
            spamhaus_sbl: default_sbl(),
            spamhaus_xbl: default_xbl(),
            spamhaus_css: default_css(),
            spamhaus_pbl: default_pbl(),
            virustotal_saturation_engines: default_saturation(),
        }
    }
}

impl SeverityWeights {
    pub fn validate(&self) -> anyhow::Result<()> {
        let weights = [
            ("abuseipdb_scale", self.abuseipdb_scale),
            ("spamhaus_drop", self.spamhaus_drop),
            ("spamhaus_sbl", self.spamhaus_sbl),
            ("spamhaus_xbl", self.spamhaus_xbl),
            ("spamhaus_css", self.spamhaus_css),
            ("spamhaus_pbl", self.spamhaus_pbl),
        ];
        for (name, weight) in weights {
            if !(0.0..=1.0).contains(&weight) {
                anyhow::bail!("severity weight {} ({}) must be within [0, 1]", name, weight);
            }
        }
        if self.virustotal_saturation_engines == 0 {
            anyhow::bail!("virustotal_saturation_engines must be > 0");
        }
        Ok(())
    }

    fn spamhaus(&self, list: SpamhausList) -> f64 {
        match list {
            SpamhausList::Drop => self.spamhaus_drop,
            SpamhausList::Sbl => self.spamhaus_sbl,
            SpamhausList::Xbl => self.spamhaus_xbl,
            SpamhausList::Css => self.spamhaus_css,
            SpamhausList::Pbl => self.spamhaus_pbl,
        }
    }

    /// Severity of a finding, `0` when it is not a listing.
    pub fn severity(&self, finding: &ThreatFinding) -> f64 {
        if !finding.is_listed {
            return 0.0;
        }
        let raw = match &finding.raw_detail {
            ThreatDetail::AbuseIpdb(d) => {
                f64::from(d.abuse_confidence_score) / 100.0 * self.abuseipdb_scale
            }
            ThreatDetail::Spamhaus(d) => d
                .lists
                .iter()
                .map(|list| self.spamhaus(*list))
                .fold(0.0, f64::max),
            ThreatDetail::VirusTotal(d) => {
                (f64::from(d.malicious) + f64::from(d.suspicious) / 2.0)
                    / f64::from(self.virustotal_saturation_engines.max(1))
            }
        };
        raw.clamp(0.0, 1.0)
    }
}

/// Inputs of [`combine`] other than the findings themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinePolicy {
    pub weights: SeverityWeights,
    pub malicious_confidence_floor: f64,
}

impl Default for CombinePolicy {
    fn default() -> Self {
        Self {
            weights: SeverityWeights::default(),
            malicious_confidence_floor: 0.5,
        }
    }
}

/// Discrete threat level, a step function of the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// `[0, 25) low, [25, 50) medium, [50, 75) high, [75, 100] critical`.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=24 => ThreatLevel::Low,
            25..=49 => ThreatLevel::Medium,
            50..=74 => ThreatLevel::High,
            _ => ThreatLevel::Critical,
        }
    }
}

/// How much of the verdict is backed by data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataStatus {
    /// Every queried provider answered.
    Complete,
    /// Some queried providers failed.
    Partial,
    /// No provider answered; a `low` level here means "no data", not
    /// "verified clean".
    Unavailable,
}

/// The combined threat verdict for one address.
///
/// Only [`combine`] builds this, so score, level and flag always agree with
/// `per_provider`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedThreat {
    threat_score: u8,
    confidence: f64,
    threat_level: ThreatLevel,
    is_malicious: bool,
    threat_types: Vec<String>,
    data_status: DataStatus,
    providers_queried: usize,
    providers_succeeded: usize,
    per_provider: BTreeMap<ProviderId, ProviderResult>,
    computed_at: DateTime<Utc>,
}

impl CombinedThreat {
    pub fn threat_score(&self) -> u8 {
        self.threat_score
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn threat_level(&self) -> ThreatLevel {
        self.threat_level
    }

    pub fn is_malicious(&self) -> bool {
        self.is_malicious
    }

    pub fn threat_types(&self) -> &[String] {
        &self.threat_types
    }

    pub fn data_status(&self) -> DataStatus {
        self.data_status
    }

    pub fn per_provider(&self) -> &BTreeMap<ProviderId, ProviderResult> {
        &self.per_provider
    }

    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    /// Error recorded for a provider, if it was queried and failed.
    pub fn provider_error(&self, provider: ProviderId) -> Option<ErrorKind> {
        self.per_provider.get(&provider).and_then(|r| r.error())
    }
}

/// Combine provider results into a verdict.
///
/// Results are keyed by provider, so the output does not depend on the
/// order in which they arrive. If a provider appears twice the later entry
/// wins.
pub fn combine(
    results: impl IntoIterator<Item = ProviderResult>,
    policy: &CombinePolicy,
    computed_at: DateTime<Utc>,
) -> CombinedThreat {
    let per_provider: BTreeMap<ProviderId, ProviderResult> = results
        .into_iter()
        .map(|r| (r.provider_id, r))
        .collect();

    let findings: Vec<&ThreatFinding> =
        per_provider.values().filter_map(|r| r.finding()).collect();

    let mut weighted_severity = 0.0;
    let mut total_weight = 0.0;
    for finding in &findings {
        let weight = finding.confidence.clamp(0.0, 1.0);
        weighted_severity += weight * policy.weights.severity(finding);
        total_weight += weight;
    }

    let threat_score = if total_weight > 0.0 {
        (100.0 * weighted_severity / total_weight).round().clamp(0.0, 100.0) as u8
    } else {
        0
    };

    let confidence = if findings.is_empty() {
        0.0
    } else {
        findings
            .iter()
            .map(|f| f.confidence.clamp(0.0, 1.0))
            .sum::<f64>()
            / findings.len() as f64
    };

    let is_malicious = findings
        .iter()
        .any(|f| f.is_listed && f.confidence > policy.malicious_confidence_floor);

    // BTreeMap iteration is provider priority order.
    let mut seen = HashSet::new();
    let mut threat_types = Vec::new();
    for finding in &findings {
        for tag in &finding.threat_types {
            if seen.insert(tag.to_lowercase()) {
                threat_types.push(tag.clone());
            }
        }
    }

    let providers_queried = per_provider.len();
    let providers_succeeded = findings.len();
    let data_status = if providers_succeeded == 0 {
        DataStatus::Unavailable
    } else if providers_succeeded < providers_queried {
        DataStatus::Partial
    } else {
        DataStatus::Complete
    };

    CombinedThreat {
        threat_score,
        confidence,
        threat_level: ThreatLevel::from_score(threat_score),
        is_malicious,
        threat_types,
        data_status,
        providers_queried,
        providers_succeeded,
        per_provider,
        computed_at,
    }
}
