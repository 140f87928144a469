//! HTTP API tests against the router with in-process providers.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use ipintel::config::ServerConfig;
use ipintel::providers::abuseipdb::AbuseIpdbDetail;
use ipintel::providers::{
    AsnProvider, GeoProvider, ProviderId, ThreatDetail, ThreatFinding, ThreatProvider,
};
use ipintel::server::{router, AppState};
use ipintel::{AsnRecord, Config, ErrorKind, Geolocation, IntelService, Providers, ServiceStatus};
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

struct StaticGeo;

#[async_trait]
impl GeoProvider for StaticGeo {
    fn id(&self) -> ProviderId {
        ProviderId::IpApi
    }

    async fn locate(&self, _ip: IpAddr) -> Result<Geolocation, ErrorKind> {
        let mut geo = Geolocation::empty(ProviderId::IpApi);
        geo.country_code = Some("US".to_string());
        geo.city = Some("Mountain View".to_string());
        Ok(geo)
    }
}

struct StaticAsn;

#[async_trait]
impl AsnProvider for StaticAsn {
    fn id(&self) -> ProviderId {
        ProviderId::RipeStat
    }

    async fn lookup_ip(&self, _ip: IpAddr) -> Result<AsnRecord, ErrorKind> {
        self.lookup_asn(15169).await
    }

    async fn lookup_asn(&self, asn: u32) -> Result<AsnRecord, ErrorKind> {
        if asn != 15169 {
            return Err(ErrorKind::UpstreamUnavailable);
        }
        let mut record = AsnRecord::bare(asn);
        record.org_name = Some("Google LLC".to_string());
        record.network_name = Some("GOOGLE".to_string());
        Ok(record)
    }
}

/// Lists 1.2.3.4; everything else is clean.
struct CountingThreat {
    calls: AtomicUsize,
}

#[async_trait]
impl ThreatProvider for CountingThreat {
    fn id(&self) -> ProviderId {
        ProviderId::AbuseIpdb
    }

    async fn check(&self, ip: IpAddr) -> Result<ThreatFinding, ErrorKind> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let listed = ip == IpAddr::from([1, 2, 3, 4]);
        let score = if listed { 90 } else { 0 };
        Ok(ThreatFinding {
            is_listed: listed,
            threat_types: if listed {
                ["brute-force".to_string()].into_iter().collect()
            } else {
                Default::default()
            },
            confidence: if listed { 0.9 } else { 0.95 },
            raw_detail: ThreatDetail::AbuseIpdb(AbuseIpdbDetail {
                abuse_confidence_score: score,
                ..Default::default()
            }),
        })
    }
}

fn app() -> (Router, Arc<CountingThreat>) {
    let threat = Arc::new(CountingThreat {
        calls: AtomicUsize::new(0),
    });
    let status = ServiceStatus::new([
        (ProviderId::IpApi, true),
        (ProviderId::RipeStat, true),
        (ProviderId::AbuseIpdb, true),
    ]);
    let providers = Providers {
        geo: vec![Arc::new(StaticGeo)],
        asn: vec![Arc::new(StaticAsn)],
        threat: vec![threat.clone()],
    };
    let service = IntelService::new(&Config::default(), status, providers);
    let state = AppState::new(service, &ServerConfig::default());
    (router(state), threat)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_enhanced_report() {
    let (app, _) = app();
    let (status, json) = get(&app, "/api/v1/ip/8.8.8.8/enhanced").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ip"], "8.8.8.8");
    assert_eq!(json["reserved"], false);
    assert_eq!(json["geolocation"]["countryCode"], "US");
    assert_eq!(json["geolocation"]["source"], "ipapi");
    assert_eq!(json["asn"]["asn"], 15169);
    assert_eq!(json["asn"]["orgName"], "Google LLC");
    assert_eq!(json["threat"]["threatScore"], 0);
    assert_eq!(json["threat"]["threatLevel"], "low");
    assert_eq!(json["threat"]["isMalicious"], false);
    assert_eq!(json["threat"]["dataStatus"], "complete");
    assert!(json["fetchedAt"].is_string());
}

#[tokio::test]
async fn test_query_filters_strip_sections() {
    let (app, threat) = app();
    let (status, json) = get(&app, "/api/v1/ip/8.8.8.8/enhanced?threats=false&asn=false").await;

    assert_eq!(status, StatusCode::OK);
    assert!(json.get("threat").is_none());
    assert!(json.get("asn").is_none());
    assert!(json.get("geolocation").is_some());

    // The cached report still has every section.
    let (_, json) = get(&app, "/api/v1/ip/8.8.8.8/enhanced").await;
    assert!(json.get("threat").is_some());
    assert_eq!(threat.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_query_flags_are_lenient() {
    let (app, _) = app();

    let (status, json) = get(&app, "/api/v1/ip/8.8.8.8/enhanced?threats=0").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("threat").is_none());
    assert!(json.get("asn").is_some());

    let (status, json) = get(&app, "/api/v1/ip/8.8.8.8/enhanced?asn=garbage&threats=1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("asn").is_some());
    assert!(json.get("threat").is_some());

    let request = Request::builder()
        .uri("/api/v1/ip/enhanced?asn=0")
        .header("x-forwarded-for", "8.8.8.8")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("asn").is_none());
}

#[tokio::test]
async fn test_invalid_address_is_rejected() {
    let (app, threat) = app();
    let (status, json) = get(&app, "/api/v1/ip/not-an-ip/enhanced").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_address");
    assert!(json["message"].as_str().unwrap().contains("not-an-ip"));
    assert_eq!(threat.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_mapped_address_shares_cache() {
    let (app, threat) = app();
    let (_, first) = get(&app, "/api/v1/ip/::ffff:8.8.8.8/enhanced").await;
    let (_, second) = get(&app, "/api/v1/ip/8.8.8.8/enhanced").await;

    assert_eq!(first["ip"], "8.8.8.8");
    assert_eq!(first, second);
    assert_eq!(threat.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_own_address_from_forwarded_header() {
    let (app, _) = app();
    let request = Request::builder()
        .uri("/api/v1/ip/enhanced")
        .header("x-forwarded-for", "1.2.3.4, 10.0.0.1")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ip"], "1.2.3.4");
    assert_eq!(json["threat"]["isMalicious"], true);
}

#[tokio::test]
async fn test_own_address_from_peer() {
    let (app, _) = app();
    let peer: SocketAddr = "8.8.4.4:51000".parse().unwrap();
    let request = Request::builder()
        .uri("/api/v1/ip/enhanced")
        .extension(ConnectInfo(peer))
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ip"], "8.8.4.4");
}

#[tokio::test]
async fn test_own_address_unknown() {
    let (app, _) = app();
    let (status, json) = get(&app, "/api/v1/ip/enhanced").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_address");
}

#[tokio::test]
async fn test_reserved_address() {
    let (app, threat) = app();
    let (status, json) = get(&app, "/api/v1/ip/192.168.1.10/enhanced").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reserved"], true);
    assert!(json.get("geolocation").is_none());
    assert_eq!(threat.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_threats_endpoint() {
    let (app, _) = app();
    let (status, json) = get(&app, "/api/v1/threats/1.2.3.4").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["threatScore"], 90);
    assert_eq!(json["threatLevel"], "critical");
    assert_eq!(json["isMalicious"], true);
    assert_eq!(json["threatTypes"], serde_json::json!(["brute-force"]));
    assert_eq!(json["perProvider"]["abuseipdb"]["isListed"], true);
    assert!(json["perProvider"].get("spamhaus").is_none());
}

#[tokio::test]
async fn test_threats_endpoint_invalid_address() {
    let (app, _) = app();
    let (status, json) = get(&app, "/api/v1/threats/300.1.1.1").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_address");
}

#[tokio::test]
async fn test_asn_endpoint() {
    let (app, _) = app();

    let (status, json) = get(&app, "/api/v1/asn/AS15169").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["asn"], 15169);
    assert_eq!(json["networkName"], "GOOGLE");

    let (status, json) = get(&app, "/api/v1/asn/64500").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["asn"], 64500);
    assert!(json["orgName"].is_null());

    let (status, json) = get(&app, "/api/v1/asn/ASX").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_asn");
}

#[tokio::test]
async fn test_services_status() {
    let (app, _) = app();
    let (status, json) = get(&app, "/api/v1/services/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json,
        serde_json::json!({
            "ipapi": true,
            "ipinfo": false,
            "ripestat": true,
            "abuseipdb": true,
            "spamhaus": false,
            "virustotal": false
        })
    );
}
