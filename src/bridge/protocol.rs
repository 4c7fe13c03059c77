//! Remote execution wire format.
//!
//! ```text
//! request:  @@db:<kind>:<query>[@^sep^@<json params array>]
//! response: <payload>@^@end
//! error:    @@error:<message>@^@end
//! ```
//!
//! A request ends when the client half-closes its side of the socket.

use crate::error::{DbError, DbResult};
use crate::models::{CommandKind, QueryParam, Row, params_from_json, sum_field};
use serde_json::Value as JsonValue;
use tracing::warn;

pub const REQUEST_PREFIX: &str = "@@db:";
pub const PARAM_SEPARATOR: &str = "@^sep^@";
pub const TERMINATOR: &str = "@^@end";
pub const ERROR_PREFIX: &str = "@@error:";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("request does not start with '@@db:'")]
    MissingPrefix,

    #[error("unknown command kind '{0}'")]
    UnknownKind(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("failed to encode parameters: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
}

/// Build the request frame for one command.
pub fn encode_request(
    kind: CommandKind,
    query: &str,
    params: &[QueryParam],
) -> Result<String, ProtocolError> {
    let mut request = format!("{}{}:{}", REQUEST_PREFIX, kind.wire_tag(), query);
    if !params.is_empty() {
        request.push_str(PARAM_SEPARATOR);
        request.push_str(&serde_json::to_string(params)?);
    }
    Ok(request)
}

/// A request as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRequest {
    pub kind: CommandKind,
    pub query: String,
    pub params: Vec<QueryParam>,
}

pub fn decode_request(frame: &str) -> Result<DecodedRequest, ProtocolError> {
    let frame = frame.trim();
    let frame = frame.strip_suffix(TERMINATOR).unwrap_or(frame);
    let rest = frame
        .strip_prefix(REQUEST_PREFIX)
        .ok_or(ProtocolError::MissingPrefix)?;
    let (tag, body) = rest.split_once(':').unwrap_or((rest, ""));
    let kind =
        CommandKind::from_wire_tag(tag).ok_or_else(|| ProtocolError::UnknownKind(tag.to_string()))?;

    let (query, params) = match body.split_once(PARAM_SEPARATOR) {
        Some((query, raw)) => {
            let values: Vec<JsonValue> = serde_json::from_str(raw)
                .map_err(|e| ProtocolError::InvalidParams(e.to_string()))?;
            let params =
                params_from_json(&values).map_err(|e| ProtocolError::InvalidParams(e.to_string()))?;
            (query, params)
        }
        None => (body, Vec::new()),
    };

    Ok(DecodedRequest {
        kind,
        query: query.to_string(),
        params,
    })
}

/// Decoded reply from the backend. Exactly one of the two carries content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteResponse {
    pub payload: String,
    pub error_tips: Option<String>,
}

impl RemoteResponse {
    pub fn success(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            error_tips: None,
        }
    }

    pub fn failure(tips: impl Into<String>) -> Self {
        Self {
            payload: String::new(),
            error_tips: Some(tips.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_tips.is_some()
    }

    /// The payload, or the error tips as a database error.
    pub fn into_result(self) -> DbResult<String> {
        match self.error_tips {
            Some(tips) => Err(DbError::remote(tips)),
            None => Ok(self.payload),
        }
    }
}

/// Interpret a raw response: strip the terminator, trim, split off errors.
pub fn parse_response(raw: &str) -> RemoteResponse {
    let body = match raw.find(TERMINATOR) {
        Some(end) => &raw[..end],
        None => raw,
    };
    let body = body.trim();
    match body.strip_prefix(ERROR_PREFIX) {
        Some(message) => RemoteResponse::failure(message),
        None => RemoteResponse::success(body),
    }
}

pub fn encode_response(payload: &str) -> String {
    format!("{}{}", payload, TERMINATOR)
}

pub fn encode_error(message: &str) -> String {
    format!("{}{}{}", ERROR_PREFIX, message, TERMINATOR)
}

// Payload decoders. Malformed payloads decode to empty/zero values.

pub fn decode_rows(payload: &str) -> Vec<Row> {
    if payload.is_empty() {
        return Vec::new();
    }
    serde_json::from_str(payload).unwrap_or_else(|e| {
        warn!(error = %e, "Undecodable rows payload; treating as empty");
        Vec::new()
    })
}

pub fn decode_row(payload: &str) -> Option<Row> {
    match serde_json::from_str::<JsonValue>(payload).ok()? {
        JsonValue::Object(row) => Some(row),
        JsonValue::Array(rows) => rows.into_iter().find_map(|v| match v {
            JsonValue::Object(row) => Some(row),
            _ => None,
        }),
        _ => None,
    }
}

pub fn decode_integer(payload: &str) -> i64 {
    let trimmed = payload.trim().trim_matches('"');
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|v| v as i64))
        .unwrap_or(0)
}

pub fn decode_sum(payload: &str) -> f64 {
    match serde_json::from_str::<JsonValue>(payload) {
        Ok(JsonValue::Object(row)) => sum_field(&row),
        Ok(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        Ok(JsonValue::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Accumulates one frame, enforcing a byte budget and stopping at the terminator.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    limit: usize,
    complete: bool,
}

impl FrameBuffer {
    /// `max_payload` excludes the terminator.
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit: max_payload + TERMINATOR.len(),
            complete: false,
        }
    }

    /// Append a chunk. Returns true once the terminator has been seen; bytes
    /// after it are discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Result<bool, ProtocolError> {
        if self.complete {
            return Ok(true);
        }
        let search_from = self.buf.len().saturating_sub(TERMINATOR.len() - 1);
        self.buf.extend_from_slice(chunk);

        let marker = TERMINATOR.as_bytes();
        if let Some(pos) = self.buf[search_from..]
            .windows(marker.len())
            .position(|w| w == marker)
        {
            let end = search_from + pos + marker.len();
            if end > self.limit {
                return Err(ProtocolError::FrameTooLarge { limit: self.limit });
            }
            self.buf.truncate(end);
            self.complete = true;
            return Ok(true);
        }

        if self.buf.len() > self.limit {
            return Err(ProtocolError::FrameTooLarge { limit: self.limit });
        }
        Ok(false)
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}
