// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Shared test utilities to reduce duplication across test modules.

use crate::exchange::ExchangeBuilder;
use crate::middleware::ProxyRequest;
use bytes::Bytes;
use hyper::HeaderMap;

/// Create an exchange builder with standard test values.
pub fn make_exchange_builder(uri: &str) -> ExchangeBuilder {
    let mut headers = HeaderMap::new();
    headers.insert("user-agent", "test-agent".parse().expect("valid test header"));
    ExchangeBuilder::new("GET", uri, &headers)
        .status(200)
        .duration_ms(1)
}

/// Create a proxy request with a standard test remote address.
pub fn make_proxy_request(method: &str, uri: &str, body: &[u8]) -> ProxyRequest {
    ProxyRequest {
        method: method.parse().expect("valid test method"),
        uri: uri.parse().expect("valid test uri"),
        headers: HeaderMap::new(),
        body: Bytes::copy_from_slice(body),
        remote_addr: "127.0.0.1:12345".parse().expect("valid test address"),
    }
}
