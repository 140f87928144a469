//! Configuration types for the IP intelligence service.

use crate::combiner::SeverityWeights;
use crate::providers::ProviderId;
use crate::status::ServiceStatus;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Report cache bounds.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Per-call and per-request deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Orchestrator retry policy for transient provider failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Threat combination policy.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Addresses and CIDRs that are never sent upstream.
    #[serde(default = "default_skip_ranges")]
    pub skip_ranges: Vec<String>,

    #[serde(default)]
    pub ipapi: IpApiConfig,

    #[serde(default)]
    pub ipinfo: IpInfoConfig,

    #[serde(default)]
    pub ripestat: RipeStatConfig,

    #[serde(default)]
    pub abuseipdb: AbuseIpdbConfig,

    #[serde(default)]
    pub spamhaus: SpamhausConfig,

    #[serde(default)]
    pub virustotal: VirusTotalConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            scoring: ScoringConfig::default(),
            skip_ranges: default_skip_ranges(),
            ipapi: IpApiConfig::default(),
            ipinfo: IpInfoConfig::default(),
            ripestat: RipeStatConfig::default(),
            abuseipdb: AbuseIpdbConfig::default(),
            spamhaus: SpamhausConfig::default(),
            virustotal: VirusTotalConfig::default(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Headers checked for the caller's address, in order of preference.
    #[serde(default = "default_client_ip_headers")]
    pub client_ip_headers: Vec<String>,

    /// Use first IP from X-Forwarded-For (true) or last IP (false).
    #[serde(default = "default_true")]
    pub use_first_ip: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            client_ip_headers: default_client_ip_headers(),
            use_first_ip: true,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_client_ip_headers() -> Vec<String> {
    vec![
        "x-forwarded-for".to_string(),
        "x-real-ip".to_string(),
        "cf-connecting-ip".to_string(),
    ]
}

/// Report cache bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Time-to-live of a cached report.
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,

    /// Maximum number of cached reports.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// How often expired entries are swept in the background.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
            max_entries: default_max_entries(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    10_000
}

fn default_sweep_interval() -> u64 {
    60
}

/// Per-call and per-request deadlines.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Deadline for a single provider call.
    #[serde(default = "default_client_timeout")]
    pub client_timeout_ms: u64,

    /// Deadline for a whole fan-out. Must not be smaller than the client
    /// timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            client_timeout_ms: default_client_timeout(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_client_timeout() -> u64 {
    5000
}

fn default_request_timeout() -> u64 {
    8000
}

/// Retry policy for transient provider failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Extra attempts after the first one. Zero disables retries.
    #[serde(default = "default_retry_attempts")]
    pub attempts: usize,

    /// Pause between attempts.
    #[serde(default = "default_retry_backoff")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            backoff_ms: default_retry_backoff(),
        }
    }
}

fn default_retry_attempts() -> usize {
    1
}

fn default_retry_backoff() -> u64 {
    100
}

/// Threat combination policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    /// A listing only marks an address malicious when the provider's
    /// confidence is strictly above this floor.
    #[serde(default = "default_malicious_floor")]
    pub malicious_confidence_floor: f64,

    /// Severity weighting table.
    #[serde(default)]
    pub severity: SeverityWeights,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            malicious_confidence_floor: default_malicious_floor(),
            severity: SeverityWeights::default(),
        }
    }
}

fn default_malicious_floor() -> f64 {
    0.5
}

/// ip-api.com geolocation. Keyless.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ipapi_url")]
    pub base_url: String,
}

impl Default for IpApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_ipapi_url(),
        }
    }
}

fn default_ipapi_url() -> String {
    "http://ip-api.com".to_string()
}

/// ipinfo.io geolocation. Enabled when a token is set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpInfoConfig {
    /// API token (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub token: String,

    #[serde(default = "default_ipinfo_url")]
    pub base_url: String,
}

impl Default for IpInfoConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: default_ipinfo_url(),
        }
    }
}

fn default_ipinfo_url() -> String {
    "https://ipinfo.io".to_string()
}

/// RIPEstat ASN registry. Keyless.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RipeStatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ripestat_url")]
    pub base_url: String,
}

impl Default for RipeStatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_ripestat_url(),
        }
    }
}

fn default_ripestat_url() -> String {
    "https://stat.ripe.net".to_string()
}

/// AbuseIPDB reputation. Enabled when an API key is set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AbuseIpdbConfig {
    /// API key (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_abuseipdb_url")]
    pub base_url: String,

    /// Only consider reports from the last N days.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// Abuse confidence score at or above which the address counts as listed.
    #[serde(default = "default_listing_threshold")]
    pub listing_threshold: u8,
}

impl Default for AbuseIpdbConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_abuseipdb_url(),
            max_age_days: default_max_age_days(),
            listing_threshold: default_listing_threshold(),
        }
    }
}

fn default_abuseipdb_url() -> String {
    "https://api.abuseipdb.com".to_string()
}

fn default_max_age_days() -> u32 {
    90
}

fn default_listing_threshold() -> u8 {
    25
}

/// Spamhaus ZEN via the Data Query Service. Enabled when a DQS key is set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpamhausConfig {
    /// DQS key (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub dqs_key: String,

    /// Zone suffix appended after the key.
    #[serde(default = "default_spamhaus_zone")]
    pub zone: String,
}

impl Default for SpamhausConfig {
    fn default() -> Self {
        Self {
            dqs_key: String::new(),
            zone: default_spamhaus_zone(),
        }
    }
}

fn default_spamhaus_zone() -> String {
    "zen.dq.spamhaus.net".to_string()
}

/// VirusTotal IP reports. Enabled when an API key is set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VirusTotalConfig {
    /// API key (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_virustotal_url")]
    pub base_url: String,
}

impl Default for VirusTotalConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_virustotal_url(),
        }
    }
}

fn default_virustotal_url() -> String {
    "https://www.virustotal.com".to_string()
}

fn default_skip_ranges() -> Vec<String> {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.0.2.0/24",
        "192.168.0.0/16",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "224.0.0.0/4",
        "240.0.0.0/4",
        "::/128",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
        "ff00::/8",
        "2001:db8::/32",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

fn has_credential(value: &str) -> bool {
    !value.trim().is_empty()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults and environment variables only.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Config::default();

        if let Some(key) = env_string("ABUSEIPDB_API_KEY") {
            config.abuseipdb.api_key = key;
        }
        if let Some(key) = env_string("VIRUSTOTAL_API_KEY") {
            config.virustotal.api_key = key;
        }
        if let Some(key) = env_string("SPAMHAUS_DQS_KEY") {
            config.spamhaus.dqs_key = key;
        }
        if let Some(token) = env_string("IPINFO_TOKEN") {
            config.ipinfo.token = token;
        }
        if let Some(ttl) = env_parse("IPINTEL_CACHE_TTL_SECONDS")? {
            config.cache.ttl_seconds = ttl;
        }
        if let Some(max) = env_parse("IPINTEL_CACHE_MAX_ENTRIES")? {
            config.cache.max_entries = max;
        }
        if let Some(ms) = env_parse("IPINTEL_CLIENT_TIMEOUT_MS")? {
            config.timeouts.client_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("IPINTEL_REQUEST_TIMEOUT_MS")? {
            config.timeouts.request_timeout_ms = ms;
        }
        if let Some(listen) = env_parse("IPINTEL_LISTEN")? {
            config.server.listen = listen;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeouts.client_timeout_ms == 0 {
            anyhow::bail!("client_timeout_ms must be > 0");
        }
        if self.timeouts.request_timeout_ms < self.timeouts.client_timeout_ms {
            anyhow::bail!(
                "request_timeout_ms ({}) must be >= client_timeout_ms ({})",
                self.timeouts.request_timeout_ms,
                self.timeouts.client_timeout_ms
            );
        }

        if self.cache.max_entries == 0 {
            anyhow::bail!("cache max_entries must be > 0");
        }
        if self.cache.ttl_seconds == 0 {
            anyhow::bail!("cache ttl_seconds must be > 0");
        }

        let floor = self.scoring.malicious_confidence_floor;
        if !(0.0..=1.0).contains(&floor) {
            anyhow::bail!("malicious_confidence_floor ({}) must be within [0, 1]", floor);
        }
        self.scoring.severity.validate()?;

        if self.abuseipdb.listing_threshold > 100 {
            anyhow::bail!(
                "abuseipdb listing_threshold ({}) must be <= 100",
                self.abuseipdb.listing_threshold
            );
        }

        for entry in &self.skip_ranges {
            if parse_range(entry).is_none() {
                anyhow::bail!("Invalid skip_ranges entry: {}", entry);
            }
        }

        Ok(())
    }

    /// Provider enablement derived from configured credentials.
    pub fn service_status(&self) -> ServiceStatus {
        ServiceStatus::new([
            (ProviderId::IpApi, self.ipapi.enabled),
            (ProviderId::IpInfo, has_credential(&self.ipinfo.token)),
            (ProviderId::RipeStat, self.ripestat.enabled),
            (ProviderId::AbuseIpdb, has_credential(&self.abuseipdb.api_key)),
            (ProviderId::Spamhaus, has_credential(&self.spamhaus.dqs_key)),
            (ProviderId::VirusTotal, has_credential(&self.virustotal.api_key)),
        ])
    }

    /// Parse skip ranges into networks. Single addresses become host routes.
    pub fn parse_skip_ranges(&self) -> Vec<IpNet> {
        self.skip_ranges
            .iter()
            .filter_map(|s| parse_range(s))
            .collect()
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# IP Intelligence Service Configuration

server:
  listen: "127.0.0.1:8080"
  client_ip_headers:           # Used by /api/v1/ip/enhanced
    - "x-forwarded-for"
    - "x-real-ip"
    - "cf-connecting-ip"
  use_first_ip: true           # Use first IP from X-Forwarded-For

cache:
  ttl_seconds: 3600            # Cache reports for 1 hour
  max_entries: 10000           # Oldest-inserted report evicted beyond this
  sweep_interval_seconds: 60

timeouts:
  client_timeout_ms: 5000      # Per provider call
  request_timeout_ms: 8000     # Whole fan-out, must be >= client timeout

retry:
  attempts: 1                  # Extra attempts on timeout / upstream unavailable
  backoff_ms: 100

scoring:
  malicious_confidence_floor: 0.5
  severity:
    abuseipdb_scale: 1.0
    spamhaus_drop: 1.0
    spamhaus_sbl: 0.9
    spamhaus_xbl: 0.8
    spamhaus_css: 0.7
    spamhaus_pbl: 0.2
    virustotal_saturation_engines: 5

# Never sent upstream (single IPs or CIDR)
skip_ranges:
  - "10.0.0.0/8"
  - "127.0.0.0/8"
  - "172.16.0.0/12"
  - "192.168.0.0/16"
  - "::1/128"
  - "fc00::/7"

# Geolocation
ipapi:
  enabled: true
ipinfo:
  token: "${IPINFO_TOKEN}"

# ASN registry
ripestat:
  enabled: true

# Threat intelligence (enabled when credentials are present)
abuseipdb:
  api_key: "${ABUSEIPDB_API_KEY}"
  max_age_days: 90
  listing_threshold: 25
spamhaus:
  dqs_key: "${SPAMHAUS_DQS_KEY}"
virustotal:
  api_key: "${VIRUSTOTAL_API_KEY}"
"#
        .to_string()
    }
}

fn parse_range(s: &str) -> Option<IpNet> {
    if let Ok(ip) = s.parse::<IpAddr>() {
        Some(IpNet::from(ip))
    } else {
        s.parse::<IpNet>().ok()
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has invalid value {:?}: {}", name, raw, e)),
        None => Ok(None),
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(content, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
