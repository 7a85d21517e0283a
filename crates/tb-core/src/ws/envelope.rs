//! Classification of inbound data messages.
//!
//! The relay forwards payloads verbatim, so decoding is shallow: a message is
//! a valid envelope if it is JSON. Objects carrying an `id` or `error` member
//! are responses to our own requests (Binance answers `SUBSCRIBE` with
//! `{"result":null,"id":1}`) and are never forwarded; everything else is a
//! market-data update.

use serde::de::IgnoredAny;

use crate::error::FeedError;

/// What an inbound data message turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Market data, to be forwarded.
    Update,
    /// Reply to a request we sent.
    Response(Response),
}

/// A request/response message from the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    /// Numeric request id, if present and numeric.
    pub id: Option<u64>,
    /// Whether a `result` member was present (Binance sends `"result": null`).
    pub result: bool,
    /// The `error` member rendered as JSON text.
    pub error: Option<String>,
}

impl Response {
    /// True when this response answers request `id`.
    ///
    /// An error without any id is attributed to the outstanding request,
    /// since the upstream omits the id when it cannot parse the request.
    pub fn answers(&self, id: u64) -> bool {
        self.id == Some(id) || (self.id.is_none() && self.error.is_some())
    }
}

/// Classify one data message.
pub fn classify(payload: &[u8]) -> Result<Envelope, FeedError> {
    let first = payload.iter().find(|b| !b.is_ascii_whitespace());
    if first != Some(&b'{') {
        return serde_json::from_slice::<IgnoredAny>(payload)
            .map(|_| Envelope::Update)
            .map_err(|e| FeedError::Decode(e.to_string()));
    }

    let map: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(payload).map_err(|e| FeedError::Decode(e.to_string()))?;
    let id = map.get("id");
    let error = map.get("error").filter(|v| !v.is_null());
    if id.is_none() && error.is_none() {
        return Ok(Envelope::Update);
    }
    Ok(Envelope::Response(Response {
        id: id.and_then(serde_json::Value::as_u64),
        result: map.contains_key("result"),
        error: error.map(serde_json::Value::to_string),
    }))
}
