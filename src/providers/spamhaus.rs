//! Spamhaus ZEN DNSBL provider (Data Query Service).

use super::{ProviderId, ThreatDetail, ThreatFinding, ThreatProvider};
use crate::config::SpamhausConfig;
use crate::error::ErrorKind;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

/// Confidence in any ZEN answer.
const CONFIDENCE: f64 = 0.9;

/// Spamhaus zones folded into ZEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpamhausList {
    /// Hijacked netblocks.
    Drop,
    /// Spam sources.
    Sbl,
    /// Exploited hosts (CBL and friends).
    Xbl,
    /// Snowshoe spam sources.
    Css,
    /// Policy list of end-user ranges. Not a listing.
    Pbl,
}

impl SpamhausList {
    fn tag(&self) -> Option<&'static str> {
        match self {
            SpamhausList::Drop => Some("hijacked"),
            SpamhausList::Sbl | SpamhausList::Css => Some("spam"),
            SpamhausList::Xbl => Some("exploited"),
            SpamhausList::Pbl => None,
        }
    }
}

/// Evidence returned by Spamhaus.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpamhausDetail {
    pub lists: Vec<SpamhausList>,
    pub return_codes: Vec<String>,
}

/// Meaning of a single DNSBL answer.
#[derive(Debug, PartialEq, Eq)]
enum ReturnCode {
    Listed(SpamhausList),
    Failure(ErrorKind),
    Unknown,
}

fn classify(code: Ipv4Addr) -> ReturnCode {
    match code.octets() {
        [127, 0, 0, 2] => ReturnCode::Listed(SpamhausList::Sbl),
        [127, 0, 0, 3] => ReturnCode::Listed(SpamhausList::Css),
        [127, 0, 0, 4..=7] => ReturnCode::Listed(SpamhausList::Xbl),
        [127, 0, 0, 9] => ReturnCode::Listed(SpamhausList::Drop),
        [127, 0, 0, 10 | 11] => ReturnCode::Listed(SpamhausList::Pbl),
        [127, 255, 255, 252] => ReturnCode::Failure(ErrorKind::MalformedResponse),
        [127, 255, 255, 254] => ReturnCode::Failure(ErrorKind::Unauthorized),
        [127, 255, 255, 255] => ReturnCode::Failure(ErrorKind::RateLimited),
        _ => ReturnCode::Unknown,
    }
}

/// Build the DNSBL query name for an address.
fn query_name(ip: IpAddr, key: &str, zone: &str) -> String {
    let mut name = String::new();
    match ip {
        IpAddr::V4(v4) => {
            for octet in v4.octets().iter().rev() {
                let _ = write!(name, "{}.", octet);
            }
        }
        IpAddr::V6(v6) => {
            for byte in v6.octets().iter().rev() {
                let _ = write!(name, "{:x}.{:x}.", byte & 0x0f, byte >> 4);
            }
        }
    }
    if !key.is_empty() {
        name.push_str(key);
        name.push('.');
    }
    name.push_str(zone.trim_matches('.'));
    name.push('.');
    name
}

/// DNS lookups used by the DNSBL provider.
#[async_trait]
pub trait DnsblResolver: Send + Sync {
    /// A records for `name`; empty when the name does not exist.
    async fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, ErrorKind>;
}

/// Resolver backed by trust-dns.
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }
}

#[async_trait]
impl DnsblResolver for SystemResolver {
    async fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, ErrorKind> {
        match self.resolver.ipv4_lookup(name).await {
            Ok(lookup) => Ok(lookup.iter().map(|a| a.0).collect()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                ResolveErrorKind::Timeout => Err(ErrorKind::Timeout),
                _ => {
                    debug!(error = %e, "DNSBL lookup failed");
                    Err(ErrorKind::UpstreamUnavailable)
                }
            },
        }
    }
}

/// Spamhaus ZEN provider.
pub struct SpamhausProvider {
    config: SpamhausConfig,
    resolver: Arc<dyn DnsblResolver>,
}

impl SpamhausProvider {
    pub fn new(config: SpamhausConfig, resolver: Arc<dyn DnsblResolver>) -> Self {
        Self { config, resolver }
    }

    fn normalize(codes: &[Ipv4Addr]) -> Result<ThreatFinding, ErrorKind> {
        let mut lists = BTreeSet::new();
        for code in codes {
            match classify(*code) {
                ReturnCode::Listed(list) => {
                    lists.insert(list);
                }
                ReturnCode::Failure(kind) => return Err(kind),
                ReturnCode::Unknown => warn!(code = %code, "Unknown Spamhaus return code"),
            }
        }

        let threat_types = lists
            .iter()
            .filter_map(|l| l.tag())
            .map(str::to_string)
            .collect();

        Ok(ThreatFinding {
            is_listed: lists.iter().any(|l| *l != SpamhausList::Pbl),
            threat_types,
            confidence: CONFIDENCE,
            raw_detail: ThreatDetail::Spamhaus(SpamhausDetail {
                lists: lists.into_iter().collect(),
                return_codes: codes.iter().map(|c| c.to_string()).collect(),
            }),
        })
    }
}

#[async_trait]
impl ThreatProvider for SpamhausProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Spamhaus
    }

    async fn check(&self, ip: IpAddr) -> Result<ThreatFinding, ErrorKind> {
        let name = query_name(ip, self.config.dqs_key.trim(), &self.config.zone);

        debug!(ip = %ip, "Querying Spamhaus ZEN");

        let mut codes = self.resolver.lookup_a(&name).await?;
        codes.sort();
        let finding = Self::normalize(&codes)?;

        debug!(ip = %ip, listed = finding.is_listed, "Spamhaus lookup complete");

        Ok(finding)
    }
}
