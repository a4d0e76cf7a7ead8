// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Upstream forwarding: outbound request construction, hop-by-hop header
//! sanitization, and bounded round trips.

use crate::middleware::ProxyRequest;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue, CONNECTION, HOST};
use hyper::http::uri::{Authority, PathAndQuery, Scheme};
use hyper::{HeaderMap, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as LegacyClient;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub type HttpClient = LegacyClient<HttpConnector, Full<Bytes>>;

// RFC 7230 Section 6.1: hop-by-hop headers must not be forwarded by proxies.
static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream request timed out after {limit_ms} ms")]
    Timeout { limit_ms: u64 },

    #[error("upstream unreachable: {0}")]
    Connect(#[from] hyper_util::client::legacy::Error),

    #[error("failed to build upstream request: {0}")]
    InvalidRequest(#[from] hyper::http::Error),

    #[error("failed to read upstream body: {0}")]
    Body(#[source] hyper::Error),
}

/// Result of one successful round trip to the upstream.
#[derive(Debug)]
pub struct ForwardOutput {
    pub status: StatusCode,
    /// Response headers with hop-by-hop entries already removed, safe to
    /// relay to the client verbatim.
    pub headers: HeaderMap,
    pub body: Bytes,
    pub elapsed: Duration,
}

/// Sends sanitized copies of inbound requests to the configured upstream.
pub struct Forwarder {
    client: HttpClient,
    authority: Authority,
    advertised_host: HeaderValue,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(
        client: HttpClient,
        target: &Uri,
        advertised_host: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let authority = target
            .authority()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("target uri {target} has no authority"))?;
        let advertised_host = HeaderValue::from_str(advertised_host)?;
        Ok(Self {
            client,
            authority,
            advertised_host,
            timeout,
        })
    }

    /// Forward the request to the upstream target and collect the full
    /// response, measuring the round-trip duration. The whole round trip
    /// runs under the configured timeout.
    pub async fn forward(&self, req: &ProxyRequest) -> Result<ForwardOutput, ForwardError> {
        let outbound = self.build_upstream_request(req)?;
        let started = Instant::now();

        let round_trip = async {
            let resp = self.client.request(outbound).await?;
            let status = resp.status();
            let headers = strip_hop_by_hop(resp.headers());
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(ForwardError::Body)?
                .to_bytes();
            Ok::<_, ForwardError>((status, headers, body))
        };

        let (status, headers, body) = tokio::time::timeout(self.timeout, round_trip)
            .await
            .map_err(|_| ForwardError::Timeout {
                limit_ms: self.timeout.as_millis() as u64,
            })??;

        Ok(ForwardOutput {
            status,
            headers,
            body,
            elapsed: started.elapsed(),
        })
    }

    /// Build the outbound request: same method and body, path/query aimed at
    /// the target authority, hop-by-hop headers stripped, Host replaced with
    /// the proxy's advertised address, and X-Forwarded-For appended (never
    /// overwriting a value set by an outer proxy).
    pub(crate) fn build_upstream_request(
        &self,
        req: &ProxyRequest,
    ) -> Result<Request<Full<Bytes>>, ForwardError> {
        let path_and_query = req
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        let uri = Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()?;

        let mut builder = Request::builder().method(req.method.clone()).uri(uri);
        for (name, value) in strip_hop_by_hop(&req.headers).iter() {
            if name == HOST {
                continue;
            }
            builder = builder.header(name, value);
        }
        builder = builder.header(HOST, self.advertised_host.clone());

        let client_ip = HeaderValue::from_str(&req.remote_addr.ip().to_string())
            .map_err(hyper::http::Error::from)?;
        builder = builder.header(X_FORWARDED_FOR.clone(), client_ip);

        Ok(builder.body(Full::new(req.body.clone()))?)
    }
}

/// Clone a header map without its hop-by-hop entries, including any tokens
/// the Connection header itself names. The input is never mutated.
pub(crate) fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let connection_tokens = parse_connection_tokens(headers.get(CONNECTION));
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_hop_by_hop_header(name.as_str(), &connection_tokens) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

// Parse a Connection header value into a lowercased set of tokens
fn parse_connection_tokens(
    val: Option<&HeaderValue>,
) -> std::collections::HashSet<String> {
    let mut set = std::collections::HashSet::new();
    if let Some(conn_val) = val {
        if let Ok(conn_str) = conn_val.to_str() {
            for token in conn_str.split(',') {
                let trimmed = token.trim().to_ascii_lowercase();
                if !trimmed.is_empty() {
                    set.insert(trimmed);
                }
            }
        }
    }
    set
}

fn is_hop_by_hop_header(
    name: &str,
    connection_tokens: &std::collections::HashSet<String>,
) -> bool {
    connection_tokens.contains(name) || HOP_BY_HOP_HEADERS.contains(&name)
}
