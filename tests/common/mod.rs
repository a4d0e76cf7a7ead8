// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::time::sleep;

use devprox::broadcast::Broadcaster;
use devprox::capture::CaptureStore;
use devprox::config::Config;
use devprox::proxy::{run_proxy, run_proxy_until};

pub struct TestProxy {
    pub handle: tokio::task::JoinHandle<()>,
    pub addr: SocketAddr,
    pub store: Arc<CaptureStore>,
    pub broadcaster: Arc<Broadcaster>,
}

/// Config pointed at the given upstream address.
pub fn target_config(upstream: SocketAddr) -> Config {
    let mut cfg = Config::default();
    cfg.target.addr = upstream.ip().to_string();
    cfg.target.port = upstream.port();
    cfg
}

// Minimal helper: start run_proxy in background and wait until it accepts.
pub async fn start_proxy_and_wait(cfg: Config) -> anyhow::Result<TestProxy> {
    let (proxy, shutdown) = spawn_proxy(cfg, false).await?;
    drop(shutdown);
    Ok(proxy)
}

/// Like `start_proxy_and_wait`, but keeps a trigger that shuts the proxy
/// down gracefully when fired.
pub async fn start_proxy_with_shutdown(
    cfg: Config,
) -> anyhow::Result<(TestProxy, oneshot::Sender<()>)> {
    let (proxy, shutdown) = spawn_proxy(cfg, true).await?;
    let trigger = shutdown.ok_or_else(|| anyhow::anyhow!("missing shutdown trigger"))?;
    Ok((proxy, trigger))
}

async fn spawn_proxy(
    cfg: Config,
    with_shutdown: bool,
) -> anyhow::Result<(TestProxy, Option<oneshot::Sender<()>>)> {
    // Choose a free port by binding then dropping
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let store = Arc::new(CaptureStore::new(
        cfg.capture.capacity,
        cfg.capture.max_body_bytes,
    ));
    let broadcaster = Arc::new(Broadcaster::new(cfg.inspector.channel_capacity));
    let cfg = Arc::new(cfg);

    let (trigger, handle) = {
        let store = store.clone();
        let broadcaster = broadcaster.clone();
        let cfg = cfg.clone();
        if with_shutdown {
            let (tx, rx) = oneshot::channel::<()>();
            let handle = tokio::spawn(async move {
                let shutdown = async {
                    let _ = rx.await;
                };
                let _ = run_proxy_until(addr, store, broadcaster, cfg, shutdown).await;
            });
            (Some(tx), handle)
        } else {
            let handle = tokio::spawn(async move {
                let _ = run_proxy(addr, store, broadcaster, cfg).await;
            });
            (None, handle)
        }
    };

    // Wait for the server to accept connections
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if Instant::now() > deadline {
            return Err(anyhow::anyhow!("timeout waiting for proxy to start"));
        }
        if let Ok(mut s) = tokio::net::TcpStream::connect(addr).await {
            let _ = s.shutdown().await;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    Ok((
        TestProxy {
            handle,
            addr,
            store,
            broadcaster,
        },
        trigger,
    ))
}

pub type TestClient = hyper_util::client::legacy::Client<
    hyper_util::client::legacy::connect::HttpConnector,
    Full<Bytes>,
>;

pub fn http_client() -> TestClient {
    hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new()).build_http()
}

pub async fn send(
    client: &TestClient,
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: &[u8],
) -> anyhow::Result<(hyper::StatusCode, Bytes)> {
    let uri: hyper::Uri = format!("http://{addr}{path}").parse()?;
    let req = hyper::Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(Bytes::copy_from_slice(body)))?;
    let resp = client.request(req).await?;
    let status = resp.status();
    let bytes = resp.into_body().collect().await?.to_bytes();
    Ok((status, bytes))
}

pub async fn get(
    client: &TestClient,
    addr: SocketAddr,
    path: &str,
) -> anyhow::Result<(hyper::StatusCode, Bytes)> {
    send(client, addr, "GET", path, b"").await
}
