//! HTTP transport types for the host-does-IO pattern.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data. The
//! builder produces `HttpRequest` values and the pipeline consumes
//! `HttpResponse` values; the only code that touches the network sits behind
//! the `Transport` trait. Tests substitute a scripted transport, the binary
//! uses `UreqTransport`.
//!
//! All fields use owned types so a request can be inspected, logged, or
//! replayed after it has been built.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ApiError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Methods whose structured fields travel in the query string.
    pub fn fields_in_query(&self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Head | HttpMethod::Delete)
    }

    /// Methods whose v2 request bodies are wrapped in a resource envelope.
    pub fn wraps_envelope(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Patch | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ApiError;

    /// Parses a method name case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(ApiError::InvalidMethod(s.to_string())),
        }
    }
}

/// An HTTP request described as plain data.
///
/// Built by `ApiClient::build`. `url` is always absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// First value of the header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Replace every header called `name` with a single `name: value`.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }
}

/// An HTTP response described as plain data.
///
/// Produced by a `Transport`. 4xx/5xx responses are data, not errors; the
/// pipeline decides what a status means.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Every value of the header `name`, in the order received.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Executes one `HttpRequest` and returns the full response.
///
/// Implementations must not retry and must return non-2xx statuses as
/// `Ok`. `timeout` bounds the whole exchange when present.
pub trait Transport {
    fn send(&self, request: &HttpRequest, timeout: Option<Duration>) -> Result<HttpResponse, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert_eq!(" Get ".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let err = "FETCH".parse::<HttpMethod>().unwrap_err();
        assert!(matches!(err, ApiError::InvalidMethod(m) if m == "FETCH"));
    }

    #[test]
    fn set_header_replaces_existing_value_case_insensitively() {
        let mut req = HttpRequest {
            method: HttpMethod::Get,
            url: "http://localhost:3000/1/auth".to_string(),
            headers: vec![("authorization".to_string(), "old".to_string())],
            body: None,
        };
        req.set_header("Authorization", "Bearer new");
        assert_eq!(req.headers, vec![("Authorization".to_string(), "Bearer new".to_string())]);
    }

    #[test]
    fn response_collects_repeated_headers() {
        let resp = HttpResponse {
            status: 200,
            headers: vec![
                ("Link".to_string(), "<a>; rel=\"prev\"".to_string()),
                ("content-type".to_string(), "application/json".to_string()),
                ("link".to_string(), "<b>; rel=\"next\"".to_string()),
            ],
            body: Vec::new(),
        };
        let links: Vec<_> = resp.header_values("LINK").collect();
        assert_eq!(links, vec!["<a>; rel=\"prev\"", "<b>; rel=\"next\""]);
        assert_eq!(resp.header("Content-Type"), Some("application/json"));
    }

    #[test]
    fn failure_boundary_is_400() {
        let mut resp = HttpResponse { status: 399, headers: Vec::new(), body: Vec::new() };
        assert!(!resp.is_failure());
        resp.status = 400;
        assert!(resp.is_failure());
    }
}
