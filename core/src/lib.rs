//! Authenticated HTTP request pipeline for a JSON REST API.
//!
//! # Overview
//! Turns a path plus loosely typed CLI-style inputs (`key=value` fields,
//! header overrides, a raw body source) into an authenticated request,
//! sends it through a `Transport`, normalizes the response and writes it
//! out, optionally following `Link` pagination.
//!
//! # Design
//! - Requests and responses are plain data (`HttpRequest`, `HttpResponse`).
//!   Only `Transport` implementations touch the network, so everything else
//!   is deterministic and testable without a server.
//! - `ApiClient` is stateless apart from `base_url`; `Pipeline` owns the
//!   per-invocation sequencing and nothing outlives one `run`.
//! - Two API generations are told apart by path shape: `/2/...` speaks
//!   JSON:API envelopes and bearer auth, everything else plain JSON with a
//!   team key header.
//! - Secrets come from a `CredentialStore` supplied by the host.

pub mod auth;
pub mod cancel;
pub mod client;
pub mod envelope;
pub mod error;
pub mod fields;
pub mod filter;
pub mod http;
pub mod pagination;
pub mod pipeline;
pub mod transport;

pub use auth::{CredentialStore, KeyClass, StaticCredentialStore};
pub use cancel::CancelToken;
pub use client::{ApiClient, Payload};
pub use error::ApiError;
pub use fields::{FieldSet, FieldValue};
pub use filter::{Filter, FilterError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use pipeline::{Invocation, Pipeline, Streams};
pub use transport::UreqTransport;
