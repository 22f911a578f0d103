//! API layer -- axum routes, handlers, and middleware.

mod error;
mod routes;
pub mod state;

use self::state::AppState;
use axum::Router;
use tower_http::trace::TraceLayer;

pub use self::error::ApiError;

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> ApiError {
    ApiError::NotFound
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, SocketAddr};
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::NetdashConfig;
    use crate::dns::{
        DnsCache, DnsError, QueryBackend, Record, RecordType, Resolver, SystemClock, CACHE_TTL,
    };
    use crate::probes::{HostLookup, ProbeLauncher};
    use crate::settings::SettingsStore;

    struct FakeBackend;

    #[async_trait]
    impl QueryBackend for FakeBackend {
        async fn query(
            &self,
            name: &str,
            _record_type: RecordType,
            _server: SocketAddr,
        ) -> Result<Vec<Record>, DnsError> {
            match name {
                "missing.example" => Err(DnsError::ResolutionFailure("NXDOMAIN".to_string())),
                "slow.example" => Err(DnsError::TransientQuery("timeout".to_string())),
                _ => Ok(vec![Record::Address {
                    address: "192.0.2.10".to_string(),
                }]),
            }
        }
    }

    struct FakeLookup;

    #[async_trait]
    impl HostLookup for FakeLookup {
        async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
            match host {
                "router.lan" => Ok(vec!["192.0.2.1".parse().unwrap()]),
                _ => Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such host")),
            }
        }
    }

    fn test_state(dir: &tempfile::TempDir, program: Option<String>) -> AppState {
        AppState {
            resolver: Arc::new(Resolver::new(
                Arc::new(FakeBackend),
                DnsCache::new(CACHE_TTL, SystemClock),
                vec!["192.0.2.53:53".parse().unwrap()],
            )),
            launcher: Arc::new(ProbeLauncher::new(program, Some(4))),
            lookup: Arc::new(FakeLookup),
            settings: Arc::new(SettingsStore::new(
                NetdashConfig::default(),
                dir.path().join("netdash.toml"),
            )),
        }
    }

    async fn get(state: AppState, uri: &str, accept: Option<&str>) -> (StatusCode, String) {
        let mut req = Request::builder().uri(uri);
        if let Some(accept) = accept {
            req = req.header(header::ACCEPT, accept);
        }
        let resp = router(state)
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn post(state: AppState, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn json_of(body: &str) -> Value {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(test_state(&dir, None), "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(test_state(&dir, None), "/api/v1/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_of(&body)["error"], "not found");
    }

    #[tokio::test]
    async fn test_dns_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(
            test_state(&dir, None),
            "/api/v1/dns?name=example.com&type=a",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json_of(&body),
            json!({ "server": "192.0.2.53:53", "records": [{ "address": "192.0.2.10" }] })
        );
    }

    #[tokio::test]
    async fn test_dns_server_override_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(
            test_state(&dir, None),
            "/api/v1/dns?name=example.com&server=1.1.1.1",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["server"], "1.1.1.1:53");
    }

    #[tokio::test]
    async fn test_dns_errors() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, None);

        let (status, body) = get(state.clone(), "/api/v1/dns?name=missing.example", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body), json!({ "error": "NXDOMAIN" }));

        let (status, body) =
            get(state.clone(), "/api/v1/dns?name=example.com&type=CNAME", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json_of(&body)["error"]
            .as_str()
            .unwrap()
            .contains("unsupported record type"));

        let (status, _) = get(state.clone(), "/api/v1/dns?name=slow.example", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, _) = get(state.clone(), "/api/v1/dns?type=A", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(state, "/api/v1/dns?name=hello&type=PTR", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ping_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, Some("/nonexistent/netdash-ping".to_string()));

        let cases = [
            ("/api/v1/ping?target=-c1", None, StatusCode::BAD_REQUEST),
            ("/api/v1/ping?target=192.0.2.1&count=0", None, StatusCode::BAD_REQUEST),
            ("/api/v1/ping?target=192.0.2.1&count=abc", None, StatusCode::BAD_REQUEST),
            ("/api/v1/ping?target=192.0.2.1&family=ipx", None, StatusCode::BAD_REQUEST),
            ("/api/v1/ping?target=192.0.2.1&df=maybe", None, StatusCode::BAD_REQUEST),
            ("/api/v1/ping?target=nowhere.invalid", None, StatusCode::NOT_FOUND),
            (
                "/api/v1/ping?target=192.0.2.1",
                Some("application/json"),
                StatusCode::NOT_ACCEPTABLE,
            ),
            (
                "/api/v1/ping?target=192.0.2.1",
                Some("text/event-stream"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (uri, accept, expected) in cases {
            let (status, body) = get(state.clone(), uri, accept).await;
            assert_eq!(status, expected, "{} -> {}", uri, body);
            assert!(json_of(&body)["error"].is_string());
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_ping_streams_events() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-ping");
        std::fs::write(
            &script,
            "#!/bin/sh\nprintf '%s\\n' \
             'PING 192.0.2.1 (192.0.2.1) 56(84) bytes of data.' \
             '64 bytes from 192.0.2.1: icmp_seq=1 ttl=64 time=0.512 ms' \
             'no answer yet for icmp_seq=2' \
             '64 bytes from 192.0.2.1: icmp_seq=3 ttl=64 time=0.400 ms' \
             '3 packets transmitted, 2 received, 33% packet loss, time 2003ms'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let state = test_state(&dir, Some(script.display().to_string()));
        let (status, body) = get(
            state,
            "/api/v1/ping?target=router.lan",
            Some("text/event-stream"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let events: Vec<&str> = body
            .lines()
            .filter_map(|l| l.strip_prefix("event: "))
            .collect();
        assert_eq!(events, ["reply", "reply", "reply", "summary"]);

        let data: Vec<Value> = body
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .map(json_of)
            .collect();
        assert_eq!(data[0]["seq"], 1);
        assert_eq!(data[0]["ip"], "192.0.2.1");
        assert_eq!(data[1]["status"], "timeout");
        assert_eq!(data[1]["time"], -1.0);
        assert_eq!(data[2]["seq"], 3);
        assert_eq!(data[3]["sent"], 3);
        assert_eq!(data[3]["recv"], 2);
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, None);

        let (status, body) = post(
            state.clone(),
            "/api/v1/settings/dns/add",
            json!({ "server": "1.1.1.1" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dns_servers"], json!(["1.1.1.1:53"]));

        let (status, _) = post(
            state.clone(),
            "/api/v1/settings/dns/add",
            json!({ "server": "1.1.1.1:53" }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = post(
            state.clone(),
            "/api/v1/settings/dns/add",
            json!({ "server": "resolver.example" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post(
            state.clone(),
            "/api/v1/settings/ping/add",
            json!({ "target": "router.lan" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ping_targets"], json!(["router.lan"]));

        let (status, _) = post(
            state.clone(),
            "/api/v1/settings/ping/remove",
            json!({ "target": "nas.lan" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = post(
            state.clone(),
            "/api/v1/settings/dns/remove",
            json!({ "server": "1.1.1.1" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dns_servers"], json!([]));

        let (status, body) = get(state, "/api/v1/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json_of(&body),
            json!({ "dns_servers": [], "ping_targets": ["router.lan"] })
        );
    }
}
