//! Error types for the request pipeline.
//!
//! # Design
//! One enum covers every fatal condition so the orchestrator can propagate
//! errors with `?` without changing their kind. Variants group into:
//! - input errors, raised before any network call;
//! - transport errors, raised when the exchange itself fails;
//! - `Status`, raised after a response with status >= 400 has already been
//!   written to the output;
//! - filter errors, which carry the expression that failed.
//!
//! Response unwrapping has no variant: it degrades to pass-through.

use std::path::PathBuf;

use thiserror::Error;

use crate::auth::KeyClass;
use crate::filter::FilterError;
use crate::http::HttpMethod;

/// Errors returned by the pipeline and its components.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A `key=value` field entry has no `=`.
    #[error("invalid field {0:?}: expected key=value")]
    InvalidField(String),

    /// An `@file`, `@-` or body source could not be read.
    #[error("failed to read {}", path.display())]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An `@file`, `@-` or field source is not valid UTF-8 text.
    #[error("{} is not valid UTF-8 text", path.display())]
    NonUtf8Source { path: PathBuf },

    /// A header override is not of the form `key:value`.
    #[error("invalid header {0:?}: expected key:value")]
    InvalidHeader(String),

    #[error("invalid method {0:?}")]
    InvalidMethod(String),

    #[error("invalid key class {0:?}: expected config, ingest or management")]
    InvalidKeyClass(String),

    /// Pagination was requested for a method other than GET.
    #[error("--paginate is only supported with GET requests, not {0}")]
    PaginateRequiresGet(HttpMethod),

    /// Structured fields and a raw body were both supplied.
    #[error("fields cannot be combined with a raw request body")]
    FieldsWithBody,

    #[error("no {class} key found for profile {profile:?}")]
    MissingCredential { profile: String, class: KeyClass },

    #[error("invalid URL {url:?}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to encode request body")]
    Serialization(#[from] serde_json::Error),

    /// The request could not be completed (connection, timeout, TLS).
    #[error("{method} {url} failed")]
    Transport {
        method: HttpMethod,
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The server answered with a status >= 400.
    #[error("{method} {path} returned HTTP {status}")]
    Status {
        method: HttpMethod,
        path: String,
        status: u16,
    },

    #[error("filter {expression:?} failed")]
    Filter {
        expression: String,
        #[source]
        source: FilterError,
    },

    /// Writing to the output or error stream failed.
    #[error("failed to write output")]
    Output(#[source] std::io::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}
