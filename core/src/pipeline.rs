//! Request orchestration: from invocation inputs to emitted output.
//!
//! # Design
//! `Pipeline::run` walks one invocation through fixed stages:
//! 1. resolve inputs: encode fields, read the body source, pick the method,
//!    validate pagination, compile the filter, fetch the secret. Every
//!    input error is raised here, before any network call;
//! 2. build and send exactly one request;
//! 3. normalize: optional status/header dump to stderr, envelope unwrap;
//! 4. emit the body (or filter results) to stdout, then classify the status,
//!    so an error response's body is always visible;
//! 5. on success with pagination, follow the `rel="next"` link with the
//!    payload cleared and repeat from 2.
//!
//! The cancel token is checked before each request, never mid-response.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::auth::{self, CredentialStore, KeyClass};
use crate::cancel::CancelToken;
use crate::client::{ApiClient, Payload};
use crate::envelope;
use crate::error::ApiError;
use crate::fields::{self, FieldSet};
use crate::filter::Filter;
use crate::http::{HttpMethod, HttpResponse, Transport};
use crate::pagination;

/// Caller-supplied inputs for one logical request.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// Path relative to the base URL, or an absolute URL.
    pub path: String,
    pub method: Option<String>,
    /// `key=value` entries stored as strings.
    pub string_fields: Vec<String>,
    /// `key=value` entries with typed coercion and `@file` / `@-` sources.
    pub typed_fields: Vec<String>,
    /// `key:value` header overrides.
    pub headers: Vec<String>,
    /// Raw body source: a file path, or `-` for stdin.
    pub input: Option<String>,
    pub paginate: bool,
    /// Write the status line and headers to stderr.
    pub include_headers: bool,
    /// Keep the JSON:API envelope on v2 responses.
    pub raw: bool,
    pub filter: Option<String>,
    /// Explicit key class, overriding path inference.
    pub key_class: Option<String>,
}

/// Standard streams the pipeline reads from and writes to.
pub struct Streams<'a> {
    pub stdin: &'a mut dyn Read,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
}

/// Everything derived from an `Invocation` before the first request.
struct Resolved {
    method: HttpMethod,
    path: String,
    payload: Payload,
    class: KeyClass,
    secret: String,
    filter: Option<Filter>,
}

pub struct Pipeline<'a> {
    client: ApiClient,
    transport: &'a dyn Transport,
    credentials: &'a dyn CredentialStore,
    profile: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        client: ApiClient,
        transport: &'a dyn Transport,
        credentials: &'a dyn CredentialStore,
        profile: &str,
    ) -> Self {
        Self {
            client,
            transport,
            credentials,
            profile: profile.to_string(),
        }
    }

    pub fn run(&self, invocation: &Invocation, streams: &mut Streams<'_>, cancel: &CancelToken) -> Result<(), ApiError> {
        let Resolved { method, path, mut payload, class, secret, filter } = self.resolve(invocation, streams.stdin)?;

        let mut target = path;
        let mut page = 1;
        loop {
            cancel.check()?;

            let mut request = self.client.build(method, &target, payload, &invocation.headers)?;
            auth::apply(&mut request, class, &secret);

            tracing::debug!(%method, url = %request.url, page, %class, "dispatching request");
            let response = self.transport.send(&request, cancel.remaining())?;

            if invocation.include_headers {
                write_head(streams.stderr, &response).map_err(ApiError::Output)?;
            }

            let body = if !invocation.raw && envelope::is_v2_path(&target) {
                envelope::unwrap(&response.body)
            } else {
                response.body.clone()
            };
            emit(&body, filter.as_ref(), streams.stdout)?;

            if response.is_failure() {
                return Err(ApiError::Status {
                    method,
                    path: target,
                    status: response.status,
                });
            }
            if !invocation.paginate {
                return Ok(());
            }
            match pagination::next_link(&response) {
                Some(next) => {
                    tracing::debug!(next = %next, "following next page");
                    target = next;
                    payload = Payload::Empty;
                    page += 1;
                }
                None => return Ok(()),
            }
        }
    }

    fn resolve(&self, invocation: &Invocation, stdin: &mut dyn Read) -> Result<Resolved, ApiError> {
        let path = normalize_path(&invocation.path);

        let fields = fields::encode(&invocation.string_fields, &invocation.typed_fields, stdin)?;
        if !fields.is_empty() && invocation.input.is_some() {
            return Err(ApiError::FieldsWithBody);
        }
        let body = invocation
            .input
            .as_deref()
            .map(|source| read_body(source, stdin))
            .transpose()?;

        let method = match invocation.method.as_deref() {
            Some(explicit) => explicit.parse()?,
            None if !fields.is_empty() || body.is_some() => HttpMethod::Post,
            None => HttpMethod::Get,
        };
        if invocation.paginate && method != HttpMethod::Get {
            return Err(ApiError::PaginateRequiresGet(method));
        }

        let filter = invocation.filter.as_deref().map(Filter::compile).transpose()?;

        let class = auth::resolve(invocation.key_class.as_deref(), &path)?;
        let secret = auth::lookup(self.credentials, &self.profile, class)?;

        let payload = match body {
            Some(bytes) => Payload::Raw(bytes),
            None => structured_payload(method, &path, fields),
        };

        Ok(Resolved { method, path, payload, class, secret, filter })
    }
}

/// Relative paths always start with `/` so path-shape rules apply.
fn normalize_path(path: &str) -> String {
    if path.contains("://") || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn structured_payload(method: HttpMethod, path: &str, fields: FieldSet) -> Payload {
    if fields.is_empty() {
        return Payload::Empty;
    }
    if envelope::is_v2_path(path) && method.wraps_envelope() {
        let resource_type = envelope::infer_resource_type(method, path);
        return Payload::Wrapped(envelope::wrap(fields, resource_type));
    }
    Payload::Fields(fields)
}

fn read_body(source: &str, stdin: &mut dyn Read) -> Result<Vec<u8>, ApiError> {
    let mut buf = Vec::new();
    if source == "-" {
        stdin
            .read_to_end(&mut buf)
            .map_err(|e| ApiError::ReadSource { path: PathBuf::from("<stdin>"), source: e })?;
        return Ok(buf);
    }
    fs::read(source).map_err(|e| ApiError::ReadSource { path: PathBuf::from(source), source: e })
}

fn write_head(err: &mut dyn Write, response: &HttpResponse) -> std::io::Result<()> {
    let reason = ureq::http::StatusCode::from_u16(response.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("");
    writeln!(err, "HTTP/1.1 {} {}", response.status, reason)?;
    for (name, value) in &response.headers {
        writeln!(err, "{name}: {value}")?;
    }
    writeln!(err)
}

/// Write the body, or the filter results when a filter is set. An empty
/// body has nothing to filter and writes nothing.
fn emit(body: &[u8], filter: Option<&Filter>, out: &mut dyn Write) -> Result<(), ApiError> {
    match filter {
        Some(filter) if !body.is_empty() => {
            filter.apply(body, out)?;
        }
        Some(_) => {}
        None => out.write_all(body).map_err(ApiError::Output)?,
    }
    out.flush().map_err(ApiError::Output)
}
