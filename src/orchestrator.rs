//! Lookup orchestration.
//!
//! A lookup consults the report cache, then either joins a fetch already in
//! flight for the same address or starts one. A fetch fans out to every
//! enabled provider in parallel under the request deadline, merges the
//! answers and stores the report.
//!
//! The in-flight registry maps an address to a weak handle on the shared
//! fetch. Callers hold the strong handles: when every caller goes away the
//! fetch is dropped, which aborts its provider tasks and deregisters it.
//! Storing the finished report and deregistering happen under the registry
//! lock, so a concurrent caller finds one or the other.

use crate::address::IpKey;
use crate::cache::TtlCache;
use crate::combiner::{combine, CombinePolicy, CombinedThreat};
use crate::config::Config;
use crate::error::ErrorKind;
use crate::guard::CallGuard;
use crate::providers::abuseipdb::AbuseIpdbProvider;
use crate::providers::ipapi::IpApiProvider;
use crate::providers::ipinfo::IpInfoProvider;
use crate::providers::ripestat::RipeStatProvider;
use crate::providers::spamhaus::{SpamhausProvider, SystemResolver};
use crate::providers::virustotal::VirusTotalProvider;
use crate::providers::{AsnProvider, GeoProvider, ProviderId, ProviderResult, ThreatProvider};
use crate::report::{AsnRecord, EnhancedReport, Geolocation};
use crate::status::ServiceStatus;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use ipnet::IpNet;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

type ReportFuture = BoxFuture<'static, Arc<EnhancedReport>>;

/// One retryable provider call.
type Call<T> = Box<dyn FnMut() -> BoxFuture<'static, Result<T, ErrorKind>> + Send>;

/// Provider adapters available to the service, by category.
#[derive(Default)]
pub struct Providers {
    pub geo: Vec<Arc<dyn GeoProvider>>,
    pub asn: Vec<Arc<dyn AsnProvider>>,
    pub threat: Vec<Arc<dyn ThreatProvider>>,
}

struct InFlight {
    id: u64,
    fetch: WeakShared<ReportFuture>,
}

struct Inner {
    providers: Providers,
    status: ServiceStatus,
    guard: CallGuard,
    request_timeout: Duration,
    policy: CombinePolicy,
    skip_ranges: Vec<IpNet>,
    reports: TtlCache<IpKey, Arc<EnhancedReport>>,
    asn_records: TtlCache<u32, Arc<AsnRecord>>,
    inflight: Mutex<HashMap<IpKey, InFlight>>,
    next_flight: AtomicU64,
}

/// Deregisters a fetch when it finishes or is dropped unfinished.
struct Registration {
    inner: Arc<Inner>,
    ip: IpKey,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut inflight = lock(&self.inner.inflight);
        if inflight.get(&self.ip).is_some_and(|f| f.id == self.id) {
            inflight.remove(&self.ip);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The IP intelligence service. Cheap to clone.
#[derive(Clone)]
pub struct IntelService {
    inner: Arc<Inner>,
}

impl IntelService {
    /// Build a service from explicit providers. Providers not enabled in
    /// `status` are never called.
    pub fn new(config: &Config, status: ServiceStatus, mut providers: Providers) -> Self {
        providers.geo.sort_by_key(|p| p.id());
        providers.asn.sort_by_key(|p| p.id());
        providers.threat.sort_by_key(|p| p.id());

        let ttl = config.cache.ttl();
        let max_entries = config.cache.max_entries;

        Self {
            inner: Arc::new(Inner {
                providers,
                status,
                guard: CallGuard::from_config(&config.timeouts, &config.retry),
                request_timeout: config.timeouts.request_timeout(),
                policy: CombinePolicy {
                    weights: config.scoring.severity.clone(),
                    malicious_confidence_floor: config.scoring.malicious_confidence_floor,
                },
                skip_ranges: config.parse_skip_ranges(),
                reports: TtlCache::new(ttl, max_entries),
                asn_records: TtlCache::new(ttl, max_entries),
                inflight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
            }),
        }
    }

    /// Build the service and its upstream adapters from configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeouts.client_timeout())
            .user_agent(concat!("ipintel/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let status = config.service_status();
        let mut providers = Providers::default();

        if status.is_enabled(ProviderId::IpApi) {
            providers.geo.push(Arc::new(IpApiProvider::new(
                config.ipapi.clone(),
                client.clone(),
            )));
        }
        if status.is_enabled(ProviderId::IpInfo) {
            providers.geo.push(Arc::new(IpInfoProvider::new(
                config.ipinfo.clone(),
                client.clone(),
            )));
        }
        if status.is_enabled(ProviderId::RipeStat) {
            providers.asn.push(Arc::new(RipeStatProvider::new(
                config.ripestat.clone(),
                client.clone(),
            )));
        }
        if status.is_enabled(ProviderId::AbuseIpdb) {
            providers.threat.push(Arc::new(AbuseIpdbProvider::new(
                config.abuseipdb.clone(),
                client.clone(),
            )));
        }
        if status.is_enabled(ProviderId::Spamhaus) {
            let resolver = Arc::new(SystemResolver::new(config.timeouts.client_timeout()));
            providers.threat.push(Arc::new(SpamhausProvider::new(
                config.spamhaus.clone(),
                resolver,
            )));
        }
        if status.is_enabled(ProviderId::VirusTotal) {
            providers.threat.push(Arc::new(VirusTotalProvider::new(
                config.virustotal.clone(),
                client,
            )));
        }

        for id in ProviderId::ALL {
            info!(provider = %id, enabled = status.is_enabled(id), "Provider configured");
        }

        Ok(Self::new(config, status, providers))
    }

    pub fn status(&self) -> &ServiceStatus {
        &self.inner.status
    }

    /// Full report for an address, from cache when possible.
    pub async fn lookup(&self, ip: IpKey) -> Arc<EnhancedReport> {
        if self.inner.is_skipped(ip) {
            debug!(ip = %ip, "Address in skip range");
            return Arc::new(EnhancedReport::reserved(ip, Utc::now()));
        }

        if let Some(report) = self.inner.reports.get(&ip) {
            debug!(ip = %ip, "Cache hit");
            return report;
        }

        self.join_or_start(ip).await
    }

    /// Combined threat verdict for an address.
    ///
    /// Addresses without threat data (reserved, or no threat provider
    /// enabled) get an empty verdict marked unavailable.
    pub async fn lookup_threats(&self, ip: IpKey) -> CombinedThreat {
        let report = self.lookup(ip).await;
        match &report.threat {
            Some(threat) => threat.clone(),
            None => combine(Vec::new(), &self.inner.policy, report.fetched_at),
        }
    }

    /// Describe an autonomous system. Falls back to a bare record when no
    /// provider answers.
    pub async fn lookup_asn(&self, asn: u32) -> Arc<AsnRecord> {
        if let Some(record) = self.inner.asn_records.get(&asn) {
            debug!(asn, "ASN cache hit");
            return record;
        }

        let deadline = Instant::now() + self.inner.request_timeout;
        let calls = self
            .inner
            .enabled(&self.inner.providers.asn, |p| p.id())
            .map(|p| {
                let id = p.id();
                let call: Call<AsnRecord> = Box::new(move || {
                    let p = p.clone();
                    async move { p.lookup_asn(asn).await }.boxed()
                });
                (id, call)
            })
            .collect();

        let results = self.inner.fan_out(calls, deadline).await;
        match first_success(results) {
            Some(record) => {
                let record = Arc::new(record);
                self.inner.asn_records.put(asn, record.clone());
                record
            }
            None => Arc::new(AsnRecord::bare(asn)),
        }
    }

    /// Periodically purge expired cache entries. Stops once every handle to
    /// the service is gone.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let evicted = inner.reports.evict_expired() + inner.asn_records.evict_expired();
                if evicted > 0 {
                    debug!(evicted, "Swept expired cache entries");
                }
            }
        })
    }

    fn join_or_start(&self, ip: IpKey) -> Shared<ReportFuture> {
        let mut inflight = lock(&self.inner.inflight);

        if let Some(existing) = inflight.get(&ip).and_then(|f| f.fetch.upgrade()) {
            debug!(ip = %ip, "Joining in-flight lookup");
            return existing;
        }

        // A fetch may have settled between the cache miss and taking the lock.
        if let Some(report) = self.inner.reports.get(&ip) {
            return futures::future::ready(report).boxed().shared();
        }

        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        let fetch = async move {
            let _registration = Registration {
                inner: inner.clone(),
                ip,
                id,
            };
            let (report, cacheable) = inner.fetch_report(ip).await;
            let report = Arc::new(report);

            let mut inflight = lock(&inner.inflight);
            if cacheable {
                inner.reports.put(ip, report.clone());
            }
            if inflight.get(&ip).is_some_and(|f| f.id == id) {
                inflight.remove(&ip);
            }
            drop(inflight);

            report
        }
        .boxed()
        .shared();

        if let Some(weak) = fetch.downgrade() {
            inflight.insert(ip, InFlight { id, fetch: weak });
        }
        fetch
    }
}

impl Inner {
    fn is_skipped(&self, ip: IpKey) -> bool {
        let addr = ip.addr();
        self.skip_ranges.iter().any(|net| net.contains(&addr))
    }

    fn enabled<'a, P: ?Sized>(
        &'a self,
        providers: &'a [Arc<P>],
        id: impl Fn(&P) -> ProviderId + 'a,
    ) -> impl Iterator<Item = Arc<P>> + 'a {
        providers
            .iter()
            .filter(move |p| self.status.is_enabled(id(&***p)))
            .cloned()
    }

    /// Query every enabled provider and assemble the report. The flag says
    /// whether the report is worth caching: not when every queried provider
    /// failed.
    async fn fetch_report(&self, ip: IpKey) -> (EnhancedReport, bool) {
        let addr = ip.addr();
        let deadline = Instant::now() + self.request_timeout;

        debug!(ip = %ip, "Starting provider fan-out");

        let (geo, asn, threat) = tokio::join!(
            self.fan_out(self.geo_calls(addr), deadline),
            self.fan_out(self.asn_calls(addr), deadline),
            self.fan_out(self.threat_calls(addr), deadline),
        );

        let queried = geo.len() + asn.len() + threat.len();
        let succeeded = geo.values().filter(|r| r.is_ok()).count()
            + asn.values().filter(|r| r.is_ok()).count()
            + threat.values().filter(|r| r.is_ok()).count();

        let threat = (!threat.is_empty()).then(|| {
            combine(
                threat
                    .into_iter()
                    .map(|(id, result)| ProviderResult::new(id, result)),
                &self.policy,
                Utc::now(),
            )
        });

        let asn = first_success(asn).map(|record| {
            self.asn_records.put(
                record.asn,
                Arc::new(AsnRecord {
                    prefix: None,
                    ..record.clone()
                }),
            );
            record
        });

        let report = EnhancedReport {
            ip,
            reserved: false,
            geolocation: first_success(geo),
            asn,
            threat,
            fetched_at: Utc::now(),
        };

        debug!(ip = %ip, queried, succeeded, "Provider fan-out complete");

        (report, queried == 0 || succeeded > 0)
    }

    fn geo_calls(&self, addr: IpAddr) -> Vec<(ProviderId, Call<Geolocation>)> {
        self.enabled(&self.providers.geo, |p| p.id())
            .map(|p| {
                let id = p.id();
                let call: Call<Geolocation> = Box::new(move || {
                    let p = p.clone();
                    async move { p.locate(addr).await }.boxed()
                });
                (id, call)
            })
            .collect()
    }

    fn asn_calls(&self, addr: IpAddr) -> Vec<(ProviderId, Call<AsnRecord>)> {
        self.enabled(&self.providers.asn, |p| p.id())
            .map(|p| {
                let id = p.id();
                let call: Call<AsnRecord> = Box::new(move || {
                    let p = p.clone();
                    async move { p.lookup_ip(addr).await }.boxed()
                });
                (id, call)
            })
            .collect()
    }

    fn threat_calls(
        &self,
        addr: IpAddr,
    ) -> Vec<(ProviderId, Call<crate::providers::ThreatFinding>)> {
        self.enabled(&self.providers.threat, |p| p.id())
            .map(|p| {
                let id = p.id();
                let call: Call<crate::providers::ThreatFinding> = Box::new(move || {
                    let p = p.clone();
                    async move { p.check(addr).await }.boxed()
                });
                (id, call)
            })
            .collect()
    }

    /// Run calls concurrently, each under the call guard, and collect every
    /// outcome by provider. Calls still pending at the deadline are aborted
    /// and recorded as timeouts.
    async fn fan_out<T: Send + 'static>(
        &self,
        calls: Vec<(ProviderId, Call<T>)>,
        deadline: Instant,
    ) -> BTreeMap<ProviderId, Result<T, ErrorKind>> {
        let ids: Vec<ProviderId> = calls.iter().map(|(id, _)| *id).collect();
        let mut results = BTreeMap::new();
        if ids.is_empty() {
            return results;
        }

        let guard = self.guard;
        let mut tasks = JoinSet::new();
        for (id, mut call) in calls {
            tasks.spawn(async move { (id, guard.run(deadline, || call()).await) });
        }

        let drained = timeout_at(deadline, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((id, result)) => {
                        if let Err(e) = &result {
                            warn!(provider = %id, error = %e, "Provider call failed");
                        }
                        results.insert(id, result);
                    }
                    Err(e) => warn!(error = %e, "Provider task failed"),
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Request deadline reached, abandoning pending provider calls");
            tasks.abort_all();
        }

        let fallback = if Instant::now() >= deadline {
            ErrorKind::Timeout
        } else {
            ErrorKind::UpstreamUnavailable
        };
        for id in ids {
            results.entry(id).or_insert(Err(fallback));
        }
        results
    }
}

/// First successful answer in provider priority order.
fn first_success<T>(results: BTreeMap<ProviderId, Result<T, ErrorKind>>) -> Option<T> {
    results.into_values().find_map(Result::ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combiner::{DataStatus, ThreatLevel};
    use crate::providers::abuseipdb::AbuseIpdbDetail;
    use crate::providers::{ThreatDetail, ThreatFinding};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;

    struct FakeThreat {
        id: ProviderId,
        delay: Duration,
        result: Result<ThreatFinding, ErrorKind>,
        calls: AtomicUsize,
    }

    impl FakeThreat {
        fn new(id: ProviderId, result: Result<ThreatFinding, ErrorKind>) -> Arc<Self> {
            Self::slow(id, Duration::from_millis(10), result)
        }

        fn slow(
            id: ProviderId,
            delay: Duration,
            result: Result<ThreatFinding, ErrorKind>,
        ) -> Arc<Self> {
            Arc::new(Self {
                id,
                delay,
                result,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ThreatProvider for FakeThreat {
        fn id(&self) -> ProviderId {
            self.id
        }

        async fn check(&self, _ip: IpAddr) -> Result<ThreatFinding, ErrorKind> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    struct FakeGeo {
        id: ProviderId,
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeGeo {
        fn new(id: ProviderId, delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                delay,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GeoProvider for FakeGeo {
        fn id(&self) -> ProviderId {
            self.id
        }

        async fn locate(&self, _ip: IpAddr) -> Result<Geolocation, ErrorKind> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ErrorKind::RateLimited);
            }
            let mut geo = Geolocation::empty(self.id);
            geo.country_code = Some("US".to_string());
            Ok(geo)
        }
    }

    struct FakeAsn {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AsnProvider for FakeAsn {
        fn id(&self) -> ProviderId {
            ProviderId::RipeStat
        }

        async fn lookup_ip(&self, _ip: IpAddr) -> Result<AsnRecord, ErrorKind> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ErrorKind::UpstreamUnavailable);
            }
            let mut record = AsnRecord::bare(15169);
            record.org_name = Some("Google LLC".to_string());
            record.prefix = Some("8.8.8.0/24".to_string());
            Ok(record)
        }

        async fn lookup_asn(&self, asn: u32) -> Result<AsnRecord, ErrorKind> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ErrorKind::UpstreamUnavailable);
            }
            let mut record = AsnRecord::bare(asn);
            record.org_name = Some("Example".to_string());
            Ok(record)
        }
    }

    fn finding(listed: bool, confidence: f64, score: u8, tags: &[&str]) -> ThreatFinding {
        ThreatFinding {
            is_listed: listed,
            threat_types: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            confidence,
            raw_detail: ThreatDetail::AbuseIpdb(AbuseIpdbDetail {
                abuse_confidence_score: score,
                ..Default::default()
            }),
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.timeouts.client_timeout_ms = 100;
        config.timeouts.request_timeout_ms = 200;
        config.retry.attempts = 0;
        config.cache.ttl_seconds = 60;
        config
    }

    fn all_enabled() -> ServiceStatus {
        ServiceStatus::new(ProviderId::ALL.map(|id| (id, true)))
    }

    fn status_with(enabled: &[ProviderId]) -> ServiceStatus {
        ServiceStatus::new(ProviderId::ALL.map(|id| (id, enabled.contains(&id))))
    }

    fn threat_only(status: ServiceStatus, threat: Vec<Arc<dyn ThreatProvider>>) -> IntelService {
        IntelService::new(
            &test_config(),
            status,
            Providers {
                threat,
                ..Default::default()
            },
        )
    }

    fn key(s: &str) -> IpKey {
        IpKey::parse(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_share_one_fanout() {
        let abuse = FakeThreat::new(ProviderId::AbuseIpdb, Ok(finding(false, 0.95, 0, &[])));
        let geo = FakeGeo::new(ProviderId::IpApi, Duration::from_millis(20), false);
        let asn = Arc::new(FakeAsn {
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let service = IntelService::new(
            &test_config(),
            all_enabled(),
            Providers {
                geo: vec![geo.clone()],
                asn: vec![asn.clone()],
                threat: vec![abuse.clone()],
            },
        );

        let lookups = (0..16).map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.lookup(key("8.8.8.8")).await })
        });
        let reports: Vec<Arc<EnhancedReport>> = futures::future::join_all(lookups)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(abuse.calls(), 1);
        assert_eq!(geo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(asn.calls.load(Ordering::SeqCst), 1);
        assert!(reports.iter().all(|r| Arc::ptr_eq(r, &reports[0])));
        assert!(lock(&service.inner.inflight).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_lookup_is_served_from_cache() {
        let abuse = FakeThreat::new(ProviderId::AbuseIpdb, Ok(finding(false, 0.95, 0, &[])));
        let service = threat_only(all_enabled(), vec![abuse.clone()]);

        let first = service.lookup(key("8.8.8.8")).await;
        let second = service.lookup(key("8.8.8.8")).await;

        assert_eq!(abuse.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equivalent_addresses_share_cache_slot() {
        let abuse = FakeThreat::new(ProviderId::AbuseIpdb, Ok(finding(false, 0.95, 0, &[])));
        let service = threat_only(all_enabled(), vec![abuse.clone()]);

        service.lookup(key("::ffff:1.1.1.1")).await;
        let report = service.lookup(key("1.1.1.1")).await;

        assert_eq!(abuse.calls(), 1);
        assert_eq!(report.ip.to_string(), "1.1.1.1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let abuse = FakeThreat::new(ProviderId::AbuseIpdb, Ok(finding(false, 0.95, 0, &[])));
        let service = threat_only(all_enabled(), vec![abuse.clone()]);

        service.lookup(key("8.8.8.8")).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        service.lookup(key("8.8.8.8")).await;

        assert_eq!(abuse.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_provider_is_omitted_not_failed() {
        let abuse = FakeThreat::new(ProviderId::AbuseIpdb, Err(ErrorKind::RateLimited));
        let spamhaus = FakeThreat::new(ProviderId::Spamhaus, Ok(finding(true, 0.9, 90, &["spam"])));
        let service = threat_only(
            status_with(&[ProviderId::AbuseIpdb]),
            vec![abuse.clone(), spamhaus.clone()],
        );

        let threat = service.lookup_threats(key("8.8.8.8")).await;

        assert_eq!(spamhaus.calls(), 0);
        assert!(!threat.per_provider().contains_key(&ProviderId::Spamhaus));
        assert_eq!(
            threat.provider_error(ProviderId::AbuseIpdb),
            Some(ErrorKind::RateLimited)
        );
        assert_eq!(threat.data_status(), DataStatus::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_gracefully() {
        let slow = FakeThreat::slow(
            ProviderId::AbuseIpdb,
            Duration::from_secs(5),
            Ok(finding(false, 0.95, 0, &[])),
        );
        let listed = FakeThreat::new(ProviderId::Spamhaus, Ok(finding(true, 0.9, 90, &["spam"])));
        let service = threat_only(all_enabled(), vec![slow, listed]);

        let threat = service.lookup_threats(key("1.2.3.4")).await;

        assert!(threat.threat_score() > 0);
        assert!(threat.is_malicious());
        assert_eq!(threat.provider_error(ProviderId::AbuseIpdb), Some(ErrorKind::Timeout));
        assert_eq!(threat.data_status(), DataStatus::Partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_address_example() {
        let abuse = FakeThreat::new(ProviderId::AbuseIpdb, Ok(finding(false, 0.95, 0, &[])));
        let spamhaus = FakeThreat::new(ProviderId::Spamhaus, Ok(finding(true, 0.9, 90, &["spam"])));
        let service = threat_only(
            status_with(&[ProviderId::AbuseIpdb]),
            vec![abuse, spamhaus],
        );

        let threat = service.lookup_threats(key("8.8.8.8")).await;

        assert_eq!(threat.threat_score(), 0);
        assert_eq!(threat.threat_level(), ThreatLevel::Low);
        assert!(!threat.is_malicious());
        assert!(threat.threat_types().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_range_is_never_queried() {
        let abuse = FakeThreat::new(ProviderId::AbuseIpdb, Ok(finding(false, 0.95, 0, &[])));
        let service = threat_only(all_enabled(), vec![abuse.clone()]);

        let report = service.lookup(key("10.1.2.3")).await;

        assert!(report.reserved);
        assert!(report.threat.is_none());
        assert_eq!(abuse.calls(), 0);
        assert!(service.inner.reports.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_geolocation_prefers_priority_order() {
        let ipapi = FakeGeo::new(ProviderId::IpApi, Duration::from_millis(50), false);
        let ipinfo = FakeGeo::new(ProviderId::IpInfo, Duration::from_millis(1), false);
        let service = IntelService::new(
            &test_config(),
            all_enabled(),
            Providers {
                geo: vec![ipinfo, ipapi],
                ..Default::default()
            },
        );

        let report = service.lookup(key("8.8.8.8")).await;
        assert_eq!(report.geolocation.as_ref().unwrap().source, ProviderId::IpApi);
    }

    #[tokio::test(start_paused = true)]
    async fn test_geolocation_falls_back_on_failure() {
        let ipapi = FakeGeo::new(ProviderId::IpApi, Duration::from_millis(1), true);
        let ipinfo = FakeGeo::new(ProviderId::IpInfo, Duration::from_millis(1), false);
        let service = IntelService::new(
            &test_config(),
            all_enabled(),
            Providers {
                geo: vec![ipapi, ipinfo],
                ..Default::default()
            },
        );

        let report = service.lookup(key("8.8.8.8")).await;
        assert_eq!(report.geolocation.as_ref().unwrap().source, ProviderId::IpInfo);
        assert!(report.asn.is_none());
        assert!(report.threat.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_is_not_cached() {
        let abuse = FakeThreat::new(ProviderId::AbuseIpdb, Err(ErrorKind::Unauthorized));
        let service = threat_only(all_enabled(), vec![abuse.clone()]);

        service.lookup(key("8.8.8.8")).await;
        service.lookup(key("8.8.8.8")).await;

        assert_eq!(abuse.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_lookup_releases_its_slot() {
        let abuse = FakeThreat::slow(
            ProviderId::AbuseIpdb,
            Duration::from_millis(50),
            Ok(finding(false, 0.95, 0, &[])),
        );
        let service = threat_only(all_enabled(), vec![abuse.clone()]);

        let pending = {
            let service = service.clone();
            tokio::spawn(async move { service.lookup(key("8.8.8.8")).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(abuse.calls(), 1);

        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());
        assert!(lock(&service.inner.inflight).is_empty());

        let report = service.lookup(key("8.8.8.8")).await;
        assert!(report.threat.is_some());
        assert_eq!(abuse.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_asn_lookup_is_cached() {
        let asn = Arc::new(FakeAsn {
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let service = IntelService::new(
            &test_config(),
            all_enabled(),
            Providers {
                asn: vec![asn.clone()],
                ..Default::default()
            },
        );

        let first = service.lookup_asn(64500).await;
        let second = service.lookup_asn(64500).await;

        assert_eq!(first.org_name.as_deref(), Some("Example"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(asn.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ip_lookup_warms_asn_cache() {
        let asn = Arc::new(FakeAsn {
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let service = IntelService::new(
            &test_config(),
            all_enabled(),
            Providers {
                asn: vec![asn.clone()],
                ..Default::default()
            },
        );

        let report = service.lookup(key("8.8.8.8")).await;
        assert_eq!(report.asn.as_ref().unwrap().prefix.as_deref(), Some("8.8.8.0/24"));

        let record = service.lookup_asn(15169).await;
        assert_eq!(record.prefix, None);
        assert_eq!(asn.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_asn_failure_returns_bare_record() {
        let asn = Arc::new(FakeAsn {
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let service = IntelService::new(
            &test_config(),
            all_enabled(),
            Providers {
                asn: vec![asn],
                ..Default::default()
            },
        );

        let record = service.lookup_asn(64500).await;
        assert_eq!(*record, AsnRecord::bare(64500));
        assert!(service.inner.asn_records.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_expired_entries() {
        let abuse = FakeThreat::new(ProviderId::AbuseIpdb, Ok(finding(false, 0.95, 0, &[])));
        let service = threat_only(all_enabled(), vec![abuse]);
        let sweeper = service.spawn_sweeper(Duration::from_secs(30));

        service.lookup(key("8.8.8.8")).await;
        assert_eq!(service.inner.reports.len(), 1);

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(service.inner.reports.is_empty());

        sweeper.abort();
    }
}
