//! Blocking `Transport` backed by ureq.
//!
//! # Design
//! ureq's automatic status-code-as-error behaviour is disabled so 4xx/5xx
//! responses come back as data; the pipeline classifies them only after the
//! body has been emitted. Only connection, timeout and TLS failures become
//! `ApiError::Transport`. No retries.

use std::time::Duration;

use ureq::RequestBuilder;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};

/// Default transport: one ureq agent per request, no connection reuse.
#[derive(Debug, Clone, Default)]
pub struct UreqTransport;

impl UreqTransport {
    pub fn new() -> Self {
        Self
    }
}

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &[(String, String)]) -> RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

impl Transport for UreqTransport {
    fn send(&self, request: &HttpRequest, timeout: Option<Duration>) -> Result<HttpResponse, ApiError> {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build()
            .new_agent();

        let url = request.url.as_str();
        let headers = &request.headers;
        let body = request.body.as_deref();

        tracing::debug!(method = %request.method, url, "sending request");

        let result = match (request.method, body) {
            (HttpMethod::Get, None) => with_headers(agent.get(url), headers).call(),
            (HttpMethod::Get, Some(b)) => with_headers(agent.get(url), headers).force_send_body().send(b),
            (HttpMethod::Head, None) => with_headers(agent.head(url), headers).call(),
            (HttpMethod::Head, Some(b)) => with_headers(agent.head(url), headers).force_send_body().send(b),
            (HttpMethod::Delete, None) => with_headers(agent.delete(url), headers).call(),
            (HttpMethod::Delete, Some(b)) => with_headers(agent.delete(url), headers).force_send_body().send(b),
            (HttpMethod::Post, Some(b)) => with_headers(agent.post(url), headers).send(b),
            (HttpMethod::Post, None) => with_headers(agent.post(url), headers).send_empty(),
            (HttpMethod::Put, Some(b)) => with_headers(agent.put(url), headers).send(b),
            (HttpMethod::Put, None) => with_headers(agent.put(url), headers).send_empty(),
            (HttpMethod::Patch, Some(b)) => with_headers(agent.patch(url), headers).send(b),
            (HttpMethod::Patch, None) => with_headers(agent.patch(url), headers).send_empty(),
        };

        let transport_error = |e: ureq::Error| ApiError::Transport {
            method: request.method,
            url: request.url.clone(),
            source: Box::new(e),
        };

        let mut response = result.map_err(transport_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();
        let body = response
            .body_mut()
            .with_config()
            .limit(u64::MAX)
            .read_to_vec()
            .map_err(transport_error)?;

        tracing::debug!(status, bytes = body.len(), "response received");

        Ok(HttpResponse { status, headers, body })
    }
}
