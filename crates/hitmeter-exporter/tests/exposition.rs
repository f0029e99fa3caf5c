//! End-to-end: observer lifecycle plus real scrapes over TCP.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use hitmeter_core::{ErrorCode, HitmeterError, ResultRecord};
use hitmeter_exporter::config::{BindAddress, ExporterConfig};
use hitmeter_exporter::server::{ExpositionServer, ServerState};
use hitmeter_exporter::MetricsObserver;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

fn local_cfg() -> ExporterConfig {
    ExporterConfig::with_bind("127.0.0.1:0")
}

async fn scrape(url: &str) -> (u16, String, String) {
    let resp = client().get(url).send().await.unwrap();
    let status = resp.status().as_u16();
    let ctype = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    (status, ctype, resp.text().await.unwrap())
}

fn hit() -> ResultRecord {
    ResultRecord::new("GET", "/x", 200)
        .with_latency(Duration::from_millis(100))
        .with_bytes(1000, 50)
}

#[tokio::test]
async fn scrape_reflects_observed_hits() {
    let obs = MetricsObserver::start(&local_cfg()).await.unwrap();
    for _ in 0..4 {
        obs.observe(&hit());
    }

    let (status, ctype, body) = scrape(&obs.metrics_url()).await;
    assert_eq!(status, 200);
    assert!(ctype.starts_with("text/plain; version=0.0.4"), "{ctype}");
    assert!(body.contains("# TYPE request_bytes_in counter"));
    assert!(body.contains(r#"request_bytes_in{method="GET",url="/x",status="200"} 4000"#));
    assert!(body.contains(r#"request_bytes_out{method="GET",url="/x",status="200"} 200"#));
    assert!(body.contains("# TYPE request_seconds histogram"));
    assert!(body.contains(
        r#"request_seconds_bucket{method="GET",url="/x",status="200",le="0.1"} 4"#
    ));
    assert!(body.contains(
        r#"request_seconds_bucket{method="GET",url="/x",status="200",le="+Inf"} 4"#
    ));
    assert!(body.contains(r#"request_seconds_count{method="GET",url="/x",status="200"} 4"#));
    assert!(!body.contains("request_fail_count"));

    let failed = ResultRecord { code: 500, ..hit() }.with_error("REQUEST FAILED");
    obs.observe(&failed);

    let (status, _, body) = scrape(&obs.metrics_url()).await;
    assert_eq!(status, 200);
    assert!(body.contains(
        r#"request_fail_count{method="GET",url="/x",message="REQUEST FAILED"} 1"#
    ));
    assert!(body.contains(r#"request_bytes_in{method="GET",url="/x",status="500"} 1000"#));

    obs.close().await.unwrap();
}

#[tokio::test]
async fn serves_at_configured_path_only() {
    let mut cfg = local_cfg();
    cfg.exporter.path = Some("/metrics".into());
    let obs = MetricsObserver::start(&cfg).await.unwrap();
    obs.observe(&hit());
    assert!(obs.metrics_url().ends_with("/metrics"));

    let base = format!("http://{}", obs.local_addr());
    let (status, _, body) = scrape(&format!("{base}/metrics")).await;
    assert_eq!(status, 200);
    assert!(body.contains("request_bytes_in"));

    let (status, _, _) = scrape(&format!("{base}/")).await;
    assert_eq!(status, 404);

    let resp = client().post(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 405);

    obs.close().await.unwrap();
}

#[tokio::test]
async fn path_from_bind_string() {
    let obs = MetricsObserver::start(&ExporterConfig::with_bind("127.0.0.1:0/scrape"))
        .await
        .unwrap();
    assert_eq!(obs.path(), "/scrape");
    let (status, _, _) = scrape(&obs.metrics_url()).await;
    assert_eq!(status, 200);
    obs.close().await.unwrap();
}

#[tokio::test]
async fn close_twice_reports_already_closed() {
    let obs = MetricsObserver::start(&local_cfg()).await.unwrap();
    let url = obs.metrics_url();
    obs.close().await.unwrap();

    let err = obs.close().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyClosed);
    assert!(obs.registry().is_closed());

    // Recording after close never fails the producer.
    obs.observe(&hit());

    assert!(client().get(&url).send().await.is_err());
}

#[tokio::test]
async fn second_bind_on_same_address_fails() {
    let first = MetricsObserver::start(&local_cfg()).await.unwrap();
    let addr = first.local_addr().to_string();

    let err = MetricsObserver::start(&ExporterConfig::with_bind(addr.clone()))
        .await
        .err()
        .expect("second bind must fail");
    assert_eq!(err.code(), ErrorCode::Bind);
    assert!(matches!(err, HitmeterError::Bind { .. }));

    // The first endpoint is unaffected.
    first.observe(&hit());
    let (status, _, body) = scrape(&first.metrics_url()).await;
    assert_eq!(status, 200);
    assert!(body.contains("request_bytes_in"));
    first.close().await.unwrap();

    // Nothing from the failed attempt holds the port.
    let again = MetricsObserver::start(&ExporterConfig::with_bind(addr)).await.unwrap();
    again.close().await.unwrap();
}

#[tokio::test]
async fn start_stop_cycles_release_the_socket() {
    let first = MetricsObserver::start(&local_cfg()).await.unwrap();
    let addr = first.local_addr().to_string();
    first.observe(&hit());
    let (status, _, _) = scrape(&first.metrics_url()).await;
    assert_eq!(status, 200);
    first.close().await.unwrap();

    for _ in 0..3 {
        let obs = MetricsObserver::start(&ExporterConfig::with_bind(addr.clone()))
            .await
            .unwrap();
        assert_eq!(obs.local_addr().to_string(), addr);
        let (status, _, body) = scrape(&obs.metrics_url()).await;
        assert_eq!(status, 200);
        // Fresh registry per start.
        assert!(!body.contains("request_bytes_in"));
        obs.close().await.unwrap();
    }
}

#[tokio::test]
async fn malformed_bind_address_is_configuration_error() {
    for bad in ["localhost", "127.0.0.1:notaport", ":8880"] {
        let err = MetricsObserver::start(&ExporterConfig::with_bind(bad))
            .await
            .err()
            .expect(bad);
        assert_eq!(err.code(), ErrorCode::Configuration, "{bad}");
    }
}

#[tokio::test]
async fn unresolvable_host_is_configuration_error() {
    let err = MetricsObserver::start(&ExporterConfig::with_bind("no-such-host.invalid:0"))
        .await
        .err()
        .expect("must fail");
    assert_eq!(err.code(), ErrorCode::Configuration);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_and_scrapes() {
    let obs = Arc::new(MetricsObserver::start(&local_cfg()).await.unwrap());

    let producers: Vec<_> = (0..8)
        .map(|_| {
            let rec = obs.recorder();
            tokio::spawn(async move {
                for _ in 0..500 {
                    rec.observe(&hit());
                }
            })
        })
        .collect();
    let scrapers: Vec<_> = (0..4)
        .map(|_| {
            let url = obs.metrics_url();
            tokio::spawn(async move {
                for _ in 0..5 {
                    let (status, _, _) = scrape(&url).await;
                    assert_eq!(status, 200);
                }
            })
        })
        .collect();
    for t in producers.into_iter().chain(scrapers) {
        t.await.unwrap();
    }

    let (_, _, body) = scrape(&obs.metrics_url()).await;
    assert!(body.contains(r#"request_bytes_in{method="GET",url="/x",status="200"} 4000000"#));
    assert!(body.contains(r#"request_seconds_count{method="GET",url="/x",status="200"} 4000"#));
    obs.close().await.unwrap();
}

#[tokio::test]
async fn server_state_transitions() {
    let addr = BindAddress::parse("127.0.0.1:0").unwrap();
    let router = axum::Router::new();
    let mut server = ExpositionServer::bind(&addr, router, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(server.state(), ServerState::Serving);
    assert_ne!(server.local_addr().port(), 0);

    server.shutdown().await.unwrap();
    assert_eq!(server.state(), ServerState::Closed);
    assert!(matches!(server.shutdown().await, Err(HitmeterError::AlreadyClosed)));
}

#[tokio::test]
async fn shutdown_is_bounded_by_grace() {
    let mut cfg = local_cfg();
    cfg.exporter.shutdown_grace_ms = 200;
    let obs = MetricsObserver::start(&cfg).await.unwrap();
    let addr = obs.local_addr();

    // A client that never finishes its request.
    let mut stuck = tokio::net::TcpStream::connect(addr).await.unwrap();
    stuck.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let closed = obs.close().await;
    assert!(matches!(closed, Err(HitmeterError::ShutdownTimeout(_))), "{closed:?}");
    assert!(started.elapsed() < Duration::from_secs(5));

    // Finishing the request now must not produce a response: the connection
    // was torn down with the listener.
    let _ = stuck.write_all(b"\r\n").await;
    let mut buf = [0u8; 256];
    let read = tokio::time::timeout(Duration::from_secs(2), stuck.read(&mut buf))
        .await
        .expect("stuck connection left open after close");
    match read {
        Ok(0) | Err(_) => {}
        Ok(n) => panic!(
            "got a response after close: {:?}",
            String::from_utf8_lossy(&buf[..n])
        ),
    }

    let again = MetricsObserver::start(&ExporterConfig::with_bind(addr.to_string()))
        .await
        .unwrap();
    again.close().await.unwrap();
}
