//! IP intelligence aggregation service.
//!
//! Given an IP address, builds one report with geolocation, autonomous
//! system identity and a combined threat verdict by querying several
//! independent upstream providers in parallel.
//!
//! # Features
//!
//! - **Geolocation** - ip-api.com (keyless) and ipinfo.io, first answer in priority order wins
//! - **ASN Registry** - RIPEstat prefix and AS overviews
//! - **Threat Intelligence** - AbuseIPDB, Spamhaus ZEN (DQS) and VirusTotal, combined into a 0-100 score
//! - **Caching** - Reports cached by normalized address with TTL and capacity bounds
//! - **Single-Flight** - Concurrent lookups of one address share a single upstream fan-out
//! - **Deadlines** - Per-call timeouts under an overall request deadline, with retry of transient failures
//!
//! # Example Configuration
//!
//! ```yaml
//! cache:
//!   ttl_seconds: 3600
//!   max_entries: 10000
//!
//! timeouts:
//!   client_timeout_ms: 5000
//!   request_timeout_ms: 8000
//!
//! abuseipdb:
//!   api_key: "${ABUSEIPDB_API_KEY}"
//!
//! spamhaus:
//!   dqs_key: "${SPAMHAUS_DQS_KEY}"
//! ```

pub mod address;
pub mod cache;
pub mod combiner;
pub mod config;
pub mod error;
pub mod guard;
pub mod orchestrator;
pub mod providers;
pub mod report;
pub mod server;
pub mod status;

pub use address::IpKey;
pub use combiner::{combine, CombinedThreat, DataStatus, ThreatLevel};
pub use config::Config;
pub use error::{AddressError, ApiError, ErrorKind};
pub use orchestrator::{IntelService, Providers};
pub use report::{AsnRecord, EnhancedReport, Geolocation};
pub use status::ServiceStatus;
