// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Canonical exchange record: the captured summary of one proxied
//! request/response cycle.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::HeaderMap;
use serde::{Deserialize, Serialize};

/// One completed request/response cycle, immutable once created.
///
/// The sequence id is assigned by the capture store at append time and is
/// unique and strictly increasing for the lifetime of the store, even across
/// evictions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,

    pub method: String,
    pub uri: String,
    pub status: u16,

    /// Failure detail when the exchange did not complete normally, e.g. an
    /// upstream forwarding error or a mid-flight client disconnect.
    pub error: Option<String>,

    pub duration_ms: u64,

    #[serde(
        serialize_with = "crate::serde_helpers::serialize_headers",
        deserialize_with = "crate::serde_helpers::deserialize_headers"
    )]
    pub request_headers: HeaderMap,
    #[serde(
        serialize_with = "crate::serde_helpers::serialize_headers",
        deserialize_with = "crate::serde_helpers::deserialize_headers"
    )]
    pub response_headers: HeaderMap,

    #[serde(
        serialize_with = "crate::serde_helpers::serialize_body",
        deserialize_with = "crate::serde_helpers::deserialize_body"
    )]
    pub request_body: Bytes,
    #[serde(
        serialize_with = "crate::serde_helpers::serialize_body",
        deserialize_with = "crate::serde_helpers::deserialize_body"
    )]
    pub response_body: Bytes,

    /// Set when the stored body was cut at the configured cap.
    #[serde(default)]
    pub request_body_truncated: bool,
    #[serde(default)]
    pub response_body_truncated: bool,
}

/// Builder for exchange records with optional fields.
///
/// The sequence id and timestamp are assigned by
/// [`CaptureStore::append`](crate::capture::CaptureStore::append), which also
/// applies the body cap; the builder only gathers what the proxy observed.
#[derive(Debug, Clone)]
pub struct ExchangeBuilder {
    method: String,
    uri: String,
    status: u16,
    error: Option<String>,
    duration_ms: u64,
    request_headers: HeaderMap,
    response_headers: HeaderMap,
    request_body: Bytes,
    response_body: Bytes,
}

impl ExchangeBuilder {
    pub fn new(method: &str, uri: &str, request_headers: &HeaderMap) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            status: 0,
            error: None,
            duration_ms: 0,
            request_headers: request_headers.clone(),
            response_headers: HeaderMap::new(),
            request_body: Bytes::new(),
            response_body: Bytes::new(),
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn request_body(mut self, body: Bytes) -> Self {
        self.request_body = body;
        self
    }

    pub fn response_headers(mut self, headers: &HeaderMap) -> Self {
        self.response_headers = headers.clone();
        self
    }

    pub fn response_body(mut self, body: Bytes) -> Self {
        self.response_body = body;
        self
    }

    /// Finalize the record. Called by the capture store under its lock.
    pub(crate) fn build(self, id: u64, max_body_bytes: usize) -> ExchangeRecord {
        let (request_body, request_body_truncated) = cap_body(self.request_body, max_body_bytes);
        let (response_body, response_body_truncated) = cap_body(self.response_body, max_body_bytes);
        ExchangeRecord {
            id,
            timestamp: Utc::now(),
            method: self.method,
            uri: self.uri,
            status: self.status,
            error: self.error,
            duration_ms: self.duration_ms,
            request_headers: self.request_headers,
            response_headers: self.response_headers,
            request_body,
            request_body_truncated,
            response_body,
            response_body_truncated,
        }
    }
}

fn cap_body(body: Bytes, max: usize) -> (Bytes, bool) {
    if body.len() > max {
        (body.slice(..max), true)
    } else {
        (body, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn make_builder() -> ExchangeBuilder {
        let mut headers = HeaderMap::new();
        headers.insert("x-test", "1".parse().expect("valid header"));
        ExchangeBuilder::new("GET", "/ping", &headers)
            .status(200)
            .duration_ms(12)
            .response_body(Bytes::from_static(b"pong"))
    }

    #[test]
    fn serde_roundtrip_full_record() -> anyhow::Result<()> {
        let record = make_builder().build(7, 1024);

        let s = serde_json::to_string(&record)?;
        let back: ExchangeRecord = serde_json::from_str(&s)?;

        assert_eq!(back.id, 7);
        assert_eq!(back.method, "GET");
        assert_eq!(back.uri, "/ping");
        assert_eq!(back.status, 200);
        assert_eq!(back.response_body, Bytes::from_static(b"pong"));
        assert_eq!(
            back.request_headers.get("x-test").and_then(|v| v.to_str().ok()),
            Some("1")
        );
        Ok(())
    }

    #[rstest]
    #[case(4, b"pong".as_slice(), false)]
    #[case(3, b"pon".as_slice(), true)]
    #[case(0, b"".as_slice(), true)]
    fn body_cap_applies_at_build(
        #[case] cap: usize,
        #[case] expected: &[u8],
        #[case] truncated: bool,
    ) {
        let record = make_builder().build(1, cap);
        assert_eq!(record.response_body.as_ref(), expected);
        assert_eq!(record.response_body_truncated, truncated);
        // request body is empty, never truncated
        assert!(!record.request_body_truncated);
    }

    #[test]
    fn error_and_status_are_recorded() {
        let record = make_builder()
            .status(502)
            .error("upstream unreachable: connection refused")
            .build(1, 1024);
        assert_eq!(record.status, 502);
        assert!(record
            .error
            .as_deref()
            .is_some_and(|e| e.contains("unreachable")));
    }
}
