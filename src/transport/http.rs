//! HTTP transport over reqwest.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use crate::transport::{
    CallContext, MessageRequest, Payload, Transport, TransportError, TransportErrorKind,
    TransportResponse,
};

/// Sends each request to `ctx.endpoint()`.
///
/// Empty payloads go out as GET, everything else as POST. Statuses >= 500 are
/// transport errors; every other status is a response.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        ctx: &CallContext,
        request: &MessageRequest,
    ) -> Result<TransportResponse, TransportError> {
        let url = url::Url::parse(ctx.endpoint()).map_err(|e| {
            TransportError::new(
                TransportErrorKind::InvalidRequest,
                format!("invalid endpoint '{}'", ctx.endpoint()),
            )
            .with_source(e)
        })?;

        let payload = request.payload();
        let mut builder = if payload.is_empty() {
            self.client.get(url)
        } else {
            let builder = self.client.post(url);
            match payload {
                Payload::Json(value) => builder.json(value),
                other => builder.body(other.to_bytes()),
            }
        };

        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = builder.header("x-request-id", request.request_id().to_string());

        let response = builder.send().await.map_err(classify)?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let is_json = headers
            .get(CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.contains("json"));
        let body = response.bytes().await.map_err(classify)?;

        if status.is_server_error() {
            return Err(TransportError::status(
                status.as_u16(),
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }

        Ok(TransportResponse {
            status_code: status.as_u16(),
            payload: decode_body(&body, is_json),
            headers,
        })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    let kind = if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_builder() {
        TransportErrorKind::InvalidRequest
    } else {
        TransportErrorKind::Io
    };
    TransportError::new(kind, err.to_string()).with_source(err)
}

fn decode_body(body: &[u8], is_json: bool) -> Payload {
    if body.is_empty() {
        return Payload::Empty;
    }
    if is_json {
        if let Ok(value) = serde_json::from_slice(body) {
            return Payload::Json(value);
        }
    }
    match std::str::from_utf8(body) {
        Ok(text) => Payload::Text(text.to_string()),
        Err(_) => Payload::Bytes(body.to_vec()),
    }
}
