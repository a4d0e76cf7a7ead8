// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Inspector gateway: streams captured exchanges to connected inspector
//! clients as Server-Sent Events.
//!
//! On connect the client receives the capture-store backlog as one envelope,
//! then one envelope per subsequently published record, in publish order.

use crate::broadcast::Broadcaster;
use crate::capture::CaptureStore;
use crate::exchange::ExchangeRecord;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::Response;
use serde::{Serialize, Serializer};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::error;

/// Reserved path on the proxy listener for inspector connections.
pub const EVENTS_PATH: &str = "/_devprox/events";

/// Wire-level message kind, serialized as its integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Log = 1,
}

impl Serialize for MessageType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(*self as u8)
    }
}

/// Message envelope pushed to inspector clients.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub message_type: MessageType,
    pub content: Vec<&'a ExchangeRecord>,
}

impl<'a> Envelope<'a> {
    pub fn requests(records: &'a [Arc<ExchangeRecord>]) -> Self {
        Self {
            message_type: MessageType::Request,
            content: records.iter().map(Arc::as_ref).collect(),
        }
    }
}

/// Answer an inspector connection with a live event stream.
///
/// The subscription is taken before the snapshot so no record can fall into
/// the gap between them; live records already present in the snapshot are
/// filtered out by id, which yields the backlog exactly once followed by
/// every later record exactly once. Disconnecting clients are pruned by the
/// broadcaster when their channel closes.
pub fn serve_events(
    store: &CaptureStore,
    broadcaster: &Broadcaster,
) -> Response<BoxBody<Bytes, Infallible>> {
    let subscriber = broadcaster.subscribe();
    let backlog = store.snapshot();
    let last_seen = backlog.last().map(|r| r.id).unwrap_or(0);

    let head = tokio_stream::iter(
        sse_data_frame(&Envelope::requests(&backlog)).map(|b| Ok(Frame::data(b))),
    );

    let live = ReceiverStream::new(subscriber.into_receiver()).filter_map(move |record| {
        if record.id <= last_seen {
            return None;
        }
        sse_data_frame(&Envelope::requests(std::slice::from_ref(&record)))
            .map(|b| Ok(Frame::data(b)))
    });

    let body = StreamBody::new(head.chain(live)).boxed();
    Response::builder()
        .header(hyper::header::CONTENT_TYPE, "text/event-stream")
        .header(hyper::header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|e| {
            error!(%e, "failed to build inspector response");
            Response::new(Full::new(Bytes::new()).boxed())
        })
}

fn sse_data_frame(envelope: &Envelope<'_>) -> Option<Bytes> {
    match serde_json::to_string(envelope) {
        Ok(json) => Some(Bytes::from(format!("data: {json}\n\n"))),
        Err(e) => {
            error!(%e, "failed to serialize inspector event");
            None
        }
    }
}
