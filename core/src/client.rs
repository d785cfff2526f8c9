//! Stateless HTTP request builder.
//!
//! # Design
//! `ApiClient` holds only a `base_url` and carries no mutable state between
//! calls. `build` turns a method, a path and a `Payload` into a plain-data
//! `HttpRequest`; the caller executes it through a `Transport`.
//!
//! The payload is an enum so that at most one body source exists per
//! request, and structured fields land in exactly one place: the query
//! string for `GET`/`HEAD`/`DELETE`, a JSON body otherwise.

use url::Url;

use crate::envelope::{self, Document, ResourceEnvelope};
use crate::error::ApiError;
use crate::fields::{FieldSet, FieldValue};
use crate::http::{HttpMethod, HttpRequest};

/// What a request carries besides its URL and headers.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    /// Structured fields, placed by method.
    Fields(FieldSet),
    /// Fields already wrapped in a JSON:API document.
    Wrapped(Document<ResourceEnvelope>),
    /// Bytes sent as-is.
    Raw(Vec<u8>),
}

/// Synchronous, stateless request builder for one API base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `path`: absolute URLs are kept verbatim, anything
    /// else is joined onto the base URL.
    pub fn resolve_url(&self, path: &str) -> String {
        if path.contains("://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Build a transport-ready request.
    ///
    /// `headers` are `key:value` overrides. A `content-type` is added only
    /// when a body is present and none was supplied.
    pub fn build(
        &self,
        method: HttpMethod,
        path: &str,
        payload: Payload,
        headers: &[String],
    ) -> Result<HttpRequest, ApiError> {
        let target = self.resolve_url(path);
        let mut url = Url::parse(&target).map_err(|e| ApiError::InvalidUrl { url: target.clone(), source: e })?;

        let mut query_added = false;
        let body = match payload {
            Payload::Empty => None,
            Payload::Fields(fields) if fields.is_empty() => None,
            Payload::Fields(fields) if method.fields_in_query() => {
                append_query(&mut url, &fields);
                query_added = true;
                None
            }
            Payload::Fields(fields) => Some(serde_json::to_vec(&fields)?),
            Payload::Wrapped(doc) => Some(serde_json::to_vec(&doc)?),
            Payload::Raw(bytes) => Some(bytes),
        };

        let mut request_headers = headers
            .iter()
            .map(|h| parse_header(h))
            .collect::<Result<Vec<_>, _>>()?;

        let has_content_type = request_headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
        if body.is_some() && !has_content_type {
            request_headers.push(("content-type".to_string(), envelope::content_type(path).to_string()));
        }

        Ok(HttpRequest {
            method,
            url: if query_added { url.into() } else { target },
            headers: request_headers,
            body,
        })
    }
}

fn append_query(url: &mut Url, fields: &FieldSet) {
    let mut pairs = url.query_pairs_mut();
    for (key, value) in fields {
        match value {
            FieldValue::List(items) => {
                for item in items {
                    pairs.append_pair(key, &item.to_query_value());
                }
            }
            other => {
                pairs.append_pair(key, &other.to_query_value());
            }
        }
    }
}

/// Split a `key:value` header on its first colon.
fn parse_header(raw: &str) -> Result<(String, String), ApiError> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| ApiError::InvalidHeader(raw.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::InvalidHeader(raw.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::wrap;

    fn client() -> ApiClient {
        ApiClient::new("http://localhost:3000")
    }

    fn fields(entries: &[(&str, FieldValue)]) -> FieldSet {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn body_json(req: &HttpRequest) -> serde_json::Value {
        serde_json::from_slice(req.body.as_deref().unwrap()).unwrap()
    }

    #[test]
    fn relative_path_is_joined_onto_base_url() {
        let req = client().build(HttpMethod::Get, "/1/auth", Payload::Empty, &[]).unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:3000/1/auth");
        assert!(req.body.is_none());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn path_without_leading_slash_is_joined() {
        let req = client().build(HttpMethod::Get, "1/auth", Payload::Empty, &[]).unwrap();
        assert_eq!(req.url, "http://localhost:3000/1/auth");
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let client = ApiClient::new("http://localhost:3000/");
        assert_eq!(client.resolve_url("/1/auth"), "http://localhost:3000/1/auth");
    }

    #[test]
    fn absolute_url_is_used_verbatim() {
        let next = "http://other:9000/2/teams/t/environments?page[after]=abc&page[size]=1";
        let req = client().build(HttpMethod::Get, next, Payload::Empty, &[]).unwrap();
        assert_eq!(req.url, next);
    }

    #[test]
    fn get_fields_become_query_parameters() {
        let f = fields(&[("limit", FieldValue::Integer(5)), ("q", FieldValue::from("a b"))]);
        let req = client().build(HttpMethod::Get, "/1/columns/ds", Payload::Fields(f), &[]).unwrap();
        assert_eq!(req.url, "http://localhost:3000/1/columns/ds?limit=5&q=a+b");
        assert!(req.body.is_none());
        assert!(req.header("content-type").is_none());
    }

    #[test]
    fn query_parameters_extend_an_existing_query() {
        let f = fields(&[("b", FieldValue::Bool(true))]);
        let req = client().build(HttpMethod::Delete, "/1/markers/ds?a=1", Payload::Fields(f), &[]).unwrap();
        assert_eq!(req.url, "http://localhost:3000/1/markers/ds?a=1&b=true");
    }

    #[test]
    fn list_fields_repeat_the_query_key() {
        let f = fields(&[("id", FieldValue::List(vec![FieldValue::Integer(1), FieldValue::Integer(2)]))]);
        let req = client().build(HttpMethod::Head, "/1/things", Payload::Fields(f), &[]).unwrap();
        assert_eq!(req.url, "http://localhost:3000/1/things?id=1&id=2");
    }

    #[test]
    fn post_fields_become_json_body() {
        let f = fields(&[("name", FieldValue::from("deploy")), ("count", FieldValue::Integer(2))]);
        let req = client().build(HttpMethod::Post, "/1/markers/ds", Payload::Fields(f), &[]).unwrap();
        assert_eq!(req.url, "http://localhost:3000/1/markers/ds");
        assert_eq!(body_json(&req), serde_json::json!({"name": "deploy", "count": 2}));
        assert_eq!(req.headers, vec![("content-type".to_string(), "application/json".to_string())]);
    }

    #[test]
    fn wrapped_payload_uses_json_api_content_type() {
        let f = fields(&[("name", FieldValue::from("prod"))]);
        let path = "/2/teams/t/environments";
        let req = client()
            .build(HttpMethod::Post, path, Payload::Wrapped(wrap(f, "environments")), &[])
            .unwrap();
        assert_eq!(
            body_json(&req),
            serde_json::json!({"data": {"type": "environments", "attributes": {"name": "prod"}}})
        );
        assert_eq!(req.header("content-type"), Some("application/vnd.api+json"));
    }

    #[test]
    fn raw_body_is_sent_verbatim() {
        let req = client()
            .build(HttpMethod::Put, "/1/things/1", Payload::Raw(b"not json".to_vec()), &[])
            .unwrap();
        assert_eq!(req.body.as_deref(), Some(&b"not json"[..]));
        assert_eq!(req.header("content-type"), Some("application/json"));
    }

    #[test]
    fn explicit_content_type_is_kept() {
        let headers = vec!["Content-Type: text/plain".to_string()];
        let req = client()
            .build(HttpMethod::Post, "/2/teams/t/x", Payload::Raw(b"hi".to_vec()), &headers)
            .unwrap();
        assert_eq!(req.headers, vec![("Content-Type".to_string(), "text/plain".to_string())]);
    }

    #[test]
    fn headers_split_on_first_colon_and_trim() {
        let headers = vec!["  X-Trace :  a:b:c ".to_string()];
        let req = client().build(HttpMethod::Get, "/1/auth", Payload::Empty, &headers).unwrap();
        assert_eq!(req.headers, vec![("X-Trace".to_string(), "a:b:c".to_string())]);
    }

    #[test]
    fn malformed_headers_are_rejected() {
        for bad in ["no-colon", " : value"] {
            let err = client()
                .build(HttpMethod::Get, "/1/auth", Payload::Empty, &[bad.to_string()])
                .unwrap_err();
            assert!(matches!(err, ApiError::InvalidHeader(h) if h == bad));
        }
    }

    #[test]
    fn empty_fields_produce_no_body() {
        let req = client()
            .build(HttpMethod::Post, "/1/markers/ds", Payload::Fields(FieldSet::new()), &[])
            .unwrap();
        assert!(req.body.is_none());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn invalid_base_url_is_reported() {
        let err = ApiClient::new("not a url")
            .build(HttpMethod::Get, "/1/auth", Payload::Empty, &[])
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidUrl { .. }));
    }
}
