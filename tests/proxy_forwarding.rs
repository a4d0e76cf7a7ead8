// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! End-to-end forwarding behavior through a running proxy instance.

mod common;

use common::{get, http_client, send, start_proxy_and_wait, target_config};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn forwarded_request_is_sanitized_for_the_upstream() -> anyhow::Result<()> {
    let mock = MockServer::start().await;
    Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path("/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&mock)
        .await;

    let proxy = start_proxy_and_wait(target_config(*mock.address())).await?;

    // Raw request so hop-by-hop headers reach the proxy unfiltered.
    let mut s = tokio::net::TcpStream::connect(proxy.addr).await?;
    s.write_all(
        b"GET /ping HTTP/1.1\r\n\
          Host: client-facing.example\r\n\
          Proxy-Authorization: Basic abc\r\n\
          TE: trailers\r\n\
          Upgrade: websocket\r\n\
          X-Forwarded-For: 203.0.113.9\r\n\
          X-Custom: kept\r\n\
          Connection: close\r\n\
          \r\n",
    )
    .await?;
    let mut raw = Vec::new();
    s.read_to_end(&mut raw).await?;
    let text = String::from_utf8_lossy(&raw);
    assert!(text.starts_with("HTTP/1.1 200"), "got: {text}");
    assert!(text.contains("pong"));

    let received = mock
        .received_requests()
        .await
        .ok_or_else(|| anyhow::anyhow!("request recording disabled"))?;
    assert_eq!(received.len(), 1);
    let upstream_req = &received[0];

    for name in [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ] {
        assert!(
            upstream_req.headers.get(name).is_none(),
            "hop-by-hop header {name} must not reach the upstream"
        );
    }
    assert_eq!(
        upstream_req
            .headers
            .get("x-custom")
            .and_then(|v| v.to_str().ok()),
        Some("kept")
    );
    // Host is the proxy's advertised address, not the client-facing one.
    assert_eq!(
        upstream_req
            .headers
            .get("host")
            .and_then(|v| v.to_str().ok()),
        Some("127.0.0.1:3000")
    );
    // Existing X-Forwarded-For chains; the client address is appended.
    let xff: Vec<_> = upstream_req
        .headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    assert_eq!(xff, vec!["203.0.113.9", "127.0.0.1"]);

    Ok(())
}

#[tokio::test]
async fn delayed_ping_arrives_no_earlier_than_the_configured_delay() -> anyhow::Result<()> {
    let mock = MockServer::start().await;
    Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path("/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&mock)
        .await;

    let mut cfg = target_config(*mock.address());
    cfg.stages.delay_ms = Some(2000);
    let proxy = start_proxy_and_wait(cfg).await?;

    let client = http_client();
    let started = Instant::now();
    let (status, body) = get(&client, proxy.addr, "/ping").await?;
    let elapsed = started.elapsed();

    assert_eq!(status, hyper::StatusCode::OK);
    assert_eq!(body.as_ref(), b"pong");
    assert!(
        elapsed >= Duration::from_millis(2000),
        "response arrived after {elapsed:?}"
    );

    let snapshot = proxy.store.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot[0].duration_ms >= 2000);
    Ok(())
}

#[tokio::test]
async fn unreachable_upstream_serves_the_fallback_and_records_502() -> anyhow::Result<()> {
    // Port 9 (discard) is almost certainly closed.
    let proxy = start_proxy_and_wait(target_config("127.0.0.1:9".parse()?)).await?;

    let client = http_client();
    let (status, body) = get(&client, proxy.addr, "/anything").await?;
    assert_eq!(status, hyper::StatusCode::OK);
    assert_eq!(body.as_ref(), b"OK");

    let snapshot = proxy.store.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].status, 502);
    assert!(snapshot[0].error.is_some());
    Ok(())
}

#[tokio::test]
async fn replaced_body_reaches_the_upstream_with_matching_length() -> anyhow::Result<()> {
    let mock = MockServer::start().await;
    Mock::given(wiremock::matchers::method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&mock)
        .await;

    let mut cfg = target_config(*mock.address());
    cfg.stages.replace_body = Some("injected".to_string());
    let proxy = start_proxy_and_wait(cfg).await?;

    let client = http_client();
    let (status, _) = send(&client, proxy.addr, "POST", "/submit", b"original payload").await?;
    assert_eq!(status, hyper::StatusCode::CREATED);

    let received = mock
        .received_requests()
        .await
        .ok_or_else(|| anyhow::anyhow!("request recording disabled"))?;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, b"injected");
    assert_eq!(
        received[0]
            .headers
            .get("content-length")
            .and_then(|v| v.to_str().ok()),
        Some("8")
    );
    Ok(())
}

#[tokio::test]
async fn store_keeps_only_the_most_recent_fifty_of_120_requests() -> anyhow::Result<()> {
    let mock = MockServer::start().await;
    Mock::given(wiremock::matchers::method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock)
        .await;

    let mut cfg = target_config(*mock.address());
    cfg.capture.capacity = 50;
    let proxy = start_proxy_and_wait(cfg).await?;

    let client = http_client();
    for i in 0..120 {
        let (status, _) = get(&client, proxy.addr, &format!("/seq/{i}")).await?;
        assert_eq!(status, hyper::StatusCode::OK);
    }

    let snapshot = proxy.store.snapshot();
    assert_eq!(snapshot.len(), 50);
    let ids: Vec<u64> = snapshot.iter().map(|r| r.id).collect();
    assert_eq!(ids, (71..=120).collect::<Vec<u64>>());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_requests_record_unique_increasing_ids() -> anyhow::Result<()> {
    let mock = MockServer::start().await;
    Mock::given(wiremock::matchers::method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock)
        .await;

    let proxy = start_proxy_and_wait(target_config(*mock.address())).await?;

    let mut tasks = Vec::new();
    for worker in 0..10 {
        let addr = proxy.addr;
        tasks.push(tokio::spawn(async move {
            let client = http_client();
            for i in 0..5 {
                let _ = get(&client, addr, &format!("/w{worker}/r{i}")).await;
            }
        }));
    }
    for task in tasks {
        task.await?;
    }

    let snapshot = proxy.store.snapshot();
    assert_eq!(snapshot.len(), 50);
    let ids: Vec<u64> = snapshot.iter().map(|r| r.id).collect();
    let mut deduped = ids.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(deduped.len(), 50, "ids must be unique");
    assert_eq!(ids, deduped, "snapshot order must follow id order");
    Ok(())
}
