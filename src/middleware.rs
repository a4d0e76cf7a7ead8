// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Composable middleware chain: an ordered list of stages wrapped around a
//! terminal handler.

use crate::config::Config;
use crate::forward::Forwarder;
use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_LENGTH};
use hyper::{HeaderMap, Method, StatusCode, Uri};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub type HandlerFuture = Pin<Box<dyn Future<Output = ProxyResponse> + Send>>;

/// A request handler. The chain builder produces one of these from an
/// ordered stage list; each stage also receives one as its `next`.
pub type Handler = Arc<dyn Fn(ProxyRequest) -> HandlerFuture + Send + Sync>;

/// Owned per-request view of the inbound request. Every request gets its
/// own value; stages never share request state across invocations.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: SocketAddr,
}

/// How the chain produced its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The terminal Forward stage reached the upstream.
    Forwarded,
    /// An earlier stage (or the forward-error fallback) answered without
    /// reaching the upstream.
    ShortCircuited,
}

#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub outcome: Outcome,
    /// Set when the Forward stage failed and the fallback answered instead.
    pub forward_error: Option<String>,
}

impl ProxyResponse {
    pub fn short_circuit(status: StatusCode, body: Bytes) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
            outcome: Outcome::ShortCircuited,
            forward_error: None,
        }
    }
}

/// A transform stage. Either short-circuits by producing a response itself,
/// or delegates to `next` and optionally post-processes the result.
pub trait Stage: Send + Sync {
    fn handle(&self, req: ProxyRequest, next: Handler) -> HandlerFuture;
}

/// Compose stages outer-to-inner in list order: the first stage registered
/// executes first. Order is fixed here, at construction.
pub fn build(stages: Vec<Arc<dyn Stage>>, terminal: Handler) -> Handler {
    stages.into_iter().rev().fold(terminal, |next, stage| {
        Arc::new(move |req: ProxyRequest| stage.handle(req, next.clone())) as Handler
    })
}

/// Fixed `200 OK` answer used when forwarding fails.
pub fn fallback_ok() -> Handler {
    Arc::new(|_req: ProxyRequest| {
        Box::pin(async {
            ProxyResponse::short_circuit(StatusCode::OK, Bytes::from_static(b"OK"))
        }) as HandlerFuture
    })
}

/// Logs method and URI as a side effect; never alters request or response.
pub struct LogStage;

impl Stage for LogStage {
    fn handle(&self, req: ProxyRequest, next: Handler) -> HandlerFuture {
        info!(method = %req.method, uri = %req.uri, remote = %req.remote_addr, "request received");
        next(req)
    }
}

/// Suspends the owning request's task for a fixed duration before
/// delegating. Holds no lock, so concurrent requests are unaffected.
pub struct DelayStage {
    delay: Duration,
}

impl DelayStage {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Stage for DelayStage {
    fn handle(&self, req: ProxyRequest, next: Handler) -> HandlerFuture {
        let delay = self.delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            next(req).await
        })
    }
}

/// Substitutes the inbound request body with a fixed payload and updates
/// the declared length to match.
pub struct ReplaceBodyStage {
    payload: Bytes,
}

impl ReplaceBodyStage {
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }
}

impl Stage for ReplaceBodyStage {
    fn handle(&self, mut req: ProxyRequest, next: Handler) -> HandlerFuture {
        req.body = self.payload.clone();
        req.headers
            .insert(CONTENT_LENGTH, HeaderValue::from(self.payload.len()));
        next(req)
    }
}

/// Terminal stage: forwards to the upstream. On a forwarding error it
/// delegates to `next` (the fallback handler) instead of failing the chain,
/// carrying the error so the exchange record can report it.
pub struct ForwardStage {
    forwarder: Arc<Forwarder>,
}

impl ForwardStage {
    pub fn new(forwarder: Arc<Forwarder>) -> Self {
        Self { forwarder }
    }
}

impl Stage for ForwardStage {
    fn handle(&self, req: ProxyRequest, next: Handler) -> HandlerFuture {
        let forwarder = self.forwarder.clone();
        Box::pin(async move {
            match forwarder.forward(&req).await {
                Ok(out) => ProxyResponse {
                    status: out.status,
                    headers: out.headers,
                    body: out.body,
                    outcome: Outcome::Forwarded,
                    forward_error: None,
                },
                Err(e) => {
                    warn!(error = %e, uri = %req.uri, "forward failed, serving fallback");
                    let mut resp = next(req).await;
                    resp.forward_error = Some(e.to_string());
                    resp
                }
            }
        })
    }
}

/// Assemble the configured chain: log → delay → replace-body → forward,
/// with the fixed fallback as the chain terminal.
pub fn chain_from_config(cfg: &Config, forwarder: Arc<Forwarder>) -> Handler {
    let mut stages: Vec<Arc<dyn Stage>> = Vec::new();
    if cfg.stages.log {
        stages.push(Arc::new(LogStage));
    }
    if let Some(ms) = cfg.stages.delay_ms {
        stages.push(Arc::new(DelayStage::new(Duration::from_millis(ms))));
    }
    if let Some(body) = &cfg.stages.replace_body {
        stages.push(Arc::new(ReplaceBodyStage::new(Bytes::from(body.clone()))));
    }
    stages.push(Arc::new(ForwardStage::new(forwarder)));
    build(stages, fallback_ok())
}
