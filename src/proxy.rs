// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Proxy server: accepts inbound connections, runs each request through the
//! middleware chain, and records the completed exchange.

use crate::broadcast::Broadcaster;
use crate::capture::CaptureStore;
use crate::config::Config;
use crate::exchange::ExchangeBuilder;
use crate::forward::{Forwarder, HttpClient};
use crate::gateway;
use crate::middleware::{self, Handler, ProxyRequest, ProxyResponse};
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::{service::service_fn, Method, Request, Response, StatusCode};
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoConnBuilder;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<BoxBody<Bytes, Infallible>>, Infallible>> + Send>>;

/// Status recorded when the client goes away before the exchange completes.
const CLIENT_DISCONNECTED_STATUS: u16 = 499;

/// How long shutdown waits for in-flight connections before aborting them.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

struct Shared {
    chain: Handler,
    store: Arc<CaptureStore>,
    broadcaster: Arc<Broadcaster>,
}

fn build_shared(
    cfg: &Config,
    store: Arc<CaptureStore>,
    broadcaster: Arc<Broadcaster>,
) -> anyhow::Result<Arc<Shared>> {
    let client: HttpClient = LegacyClient::builder(TokioExecutor::new()).build_http();
    let forwarder = Arc::new(Forwarder::new(
        client,
        &cfg.target_uri()?,
        cfg.proxy.advertised_host(),
        Duration::from_millis(cfg.forward.timeout_ms),
    )?);
    let chain = middleware::chain_from_config(cfg, forwarder);
    Ok(Arc::new(Shared {
        chain,
        store,
        broadcaster,
    }))
}

pub async fn run_proxy(
    listen: SocketAddr,
    store: Arc<CaptureStore>,
    broadcaster: Arc<Broadcaster>,
    cfg: Arc<Config>,
) -> anyhow::Result<()> {
    run_proxy_until(listen, store, broadcaster, cfg, std::future::pending::<()>()).await
}

/// Serve until `shutdown` resolves, then drain: stop accepting, end all
/// inspector subscriptions so their streams close cleanly, and wait for
/// in-flight connections (bounded by a grace period).
pub async fn run_proxy_until<F>(
    listen: SocketAddr,
    store: Arc<CaptureStore>,
    broadcaster: Arc<Broadcaster>,
    cfg: Arc<Config>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let shared = build_shared(&cfg, store, broadcaster)?;

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, target = %cfg.target_uri()?, "listening");

    let server_builder = AutoConnBuilder::new(TokioExecutor::new());
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = accepted?;
                let shared = shared.clone();
                let builder = server_builder.clone();
                connections.spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let shared = shared.clone();
                        let fut: ServiceFuture = Box::pin(async move {
                            handle_request(req, shared, remote_addr).await
                        });
                        fut
                    });

                    let io = TokioIo::new(stream);
                    if let Err(e) = builder.serve_connection(io, service).await {
                        error!(%e, "connection error");
                    }
                });
            }
            _ = &mut shutdown => break,
        }
    }

    drop(listener);
    shared.broadcaster.close_all();
    info!("draining in-flight connections");
    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
        warn!("drain grace elapsed, aborting remaining connections");
        connections.shutdown().await;
    }
    Ok(())
}

async fn handle_request<B>(
    req: Request<B>,
    shared: Arc<Shared>,
    remote_addr: SocketAddr,
) -> Result<Response<BoxBody<Bytes, Infallible>>, Infallible>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    // Reserved inspector path is answered locally, never forwarded.
    if req.method() == Method::GET && req.uri().path() == gateway::EVENTS_PATH {
        return Ok(gateway::serve_events(&shared.store, &shared.broadcaster));
    }

    let started = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let req_headers = req.headers().clone();

    let mut guard = ExchangeGuard::new(
        shared.clone(),
        PendingExchange {
            method: method.as_str().to_string(),
            uri: uri.to_string(),
            request_headers: req_headers.clone(),
            request_body: Bytes::new(),
            started,
        },
    );

    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let boxed: Box<dyn std::error::Error + Send + Sync> = e.into();
            error!("failed to collect request body: {}", boxed);
            guard.fail(500, &format!("request body collect error: {boxed}"));
            return Ok(plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "request body collect error",
            ));
        }
    };
    guard.set_request_body(body_bytes.clone());

    let proxy_req = ProxyRequest {
        method,
        uri,
        headers: req_headers,
        body: body_bytes,
        remote_addr,
    };

    // If the client disconnects here, this future is dropped mid-await and
    // the guard records the partial exchange instead.
    let resp = (shared.chain)(proxy_req).await;
    guard.complete(&resp);

    let mut resp_builder = Response::builder().status(resp.status);
    for (name, value) in resp.headers.iter() {
        resp_builder = resp_builder.header(name, value);
    }
    Ok(resp_builder
        .body(Full::new(resp.body.clone()).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(resp.body.clone()).boxed())))
}

fn plain_response(status: StatusCode, msg: &str) -> Response<BoxBody<Bytes, Infallible>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(msg.to_string())).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from(msg.to_string())).boxed()))
}

/// Append the exchange and notify subscribers. Best-effort observability:
/// neither operation can fail the request path.
fn record_exchange(shared: &Shared, builder: ExchangeBuilder) {
    let record = shared.store.append(builder);
    shared.broadcaster.publish(record);
}

struct PendingExchange {
    method: String,
    uri: String,
    request_headers: hyper::HeaderMap,
    request_body: Bytes,
    started: Instant,
}

/// Ensures every dispatched request reaches a recorded completion, even
/// when the service future is dropped because the client went away.
struct ExchangeGuard {
    shared: Arc<Shared>,
    pending: Option<PendingExchange>,
}

impl ExchangeGuard {
    fn new(shared: Arc<Shared>, pending: PendingExchange) -> Self {
        Self {
            shared,
            pending: Some(pending),
        }
    }

    fn set_request_body(&mut self, body: Bytes) {
        if let Some(p) = self.pending.as_mut() {
            p.request_body = body;
        }
    }

    fn complete(&mut self, resp: &ProxyResponse) {
        if let Some(p) = self.pending.take() {
            let duration = p.started.elapsed().as_millis() as u64;
            let mut builder = ExchangeBuilder::new(&p.method, &p.uri, &p.request_headers)
                .request_body(p.request_body)
                .response_headers(&resp.headers)
                .response_body(resp.body.clone())
                .duration_ms(duration);
            builder = match &resp.forward_error {
                // The client saw the fallback, but the record reports the
                // forward failure itself.
                Some(cause) => builder
                    .status(StatusCode::BAD_GATEWAY.as_u16())
                    .error(cause.clone()),
                None => builder.status(resp.status.as_u16()),
            };
            record_exchange(&self.shared, builder);
        }
    }

    fn fail(&mut self, status: u16, error: &str) {
        if let Some(p) = self.pending.take() {
            let duration = p.started.elapsed().as_millis() as u64;
            let builder = ExchangeBuilder::new(&p.method, &p.uri, &p.request_headers)
                .request_body(p.request_body)
                .status(status)
                .error(error)
                .duration_ms(duration);
            record_exchange(&self.shared, builder);
        }
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        self.fail(CLIENT_DISCONNECTED_STATUS, "client disconnected");
    }
}
