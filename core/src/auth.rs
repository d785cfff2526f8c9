//! Credential class inference and auth header attachment.
//!
//! # Design
//! Secrets live outside this crate; `CredentialStore` is the seam. The
//! pipeline classifies a path, looks the class up once, and attaches the
//! secret with `apply`, a pure header mutation.
//!
//! Classification rules:
//! - v2 paths always need a management key;
//! - v1 ingestion endpoints (`/1/events`, `/1/batch`, ...) need an ingest key;
//! - everything else needs a config key.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::envelope;
use crate::error::ApiError;
use crate::http::HttpRequest;

/// Header carrying config and ingest keys.
pub const TEAM_KEY_HEADER: &str = "X-Team-Key";

/// v1 endpoints that accept ingest keys, matched on the segment after `/1/`.
const INGEST_ENDPOINTS: &[&str] = &["events", "batch", "kinesis_events"];

/// Kind of credential a request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
    Config,
    Ingest,
    Management,
}

impl KeyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyClass::Config => "config",
            KeyClass::Ingest => "ingest",
            KeyClass::Management => "management",
        }
    }
}

impl fmt::Display for KeyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyClass {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "config" => Ok(KeyClass::Config),
            "ingest" => Ok(KeyClass::Ingest),
            "management" => Ok(KeyClass::Management),
            _ => Err(ApiError::InvalidKeyClass(s.to_string())),
        }
    }
}

/// Key class implied by the shape of `path`.
pub fn classify(path: &str) -> KeyClass {
    if envelope::is_v2_path(path) {
        return KeyClass::Management;
    }
    match envelope::path_of(path).split('/').nth(2) {
        Some(segment) if INGEST_ENDPOINTS.contains(&segment) => KeyClass::Ingest,
        _ => KeyClass::Config,
    }
}

/// Explicit override if given, otherwise `classify(path)`.
pub fn resolve(explicit: Option<&str>, path: &str) -> Result<KeyClass, ApiError> {
    match explicit {
        Some(name) => name.parse(),
        None => Ok(classify(path)),
    }
}

/// Source of secrets keyed by profile and key class.
///
/// Lookups must be free of side effects; the pipeline may call this once
/// per invocation.
pub trait CredentialStore {
    fn secret(&self, profile: &str, class: KeyClass) -> Option<String>;
}

/// In-memory store, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    secrets: HashMap<(String, KeyClass), String>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, profile: &str, class: KeyClass, secret: &str) -> Self {
        self.secrets.insert((profile.to_string(), class), secret.to_string());
        self
    }
}

impl CredentialStore for StaticCredentialStore {
    fn secret(&self, profile: &str, class: KeyClass) -> Option<String> {
        self.secrets.get(&(profile.to_string(), class)).cloned()
    }
}

/// Look up the secret for `class`, failing if the store has none.
pub fn lookup(store: &dyn CredentialStore, profile: &str, class: KeyClass) -> Result<String, ApiError> {
    store.secret(profile, class).ok_or_else(|| ApiError::MissingCredential {
        profile: profile.to_string(),
        class,
    })
}

/// Attach the auth header for `class` to `request`.
pub fn apply(request: &mut HttpRequest, class: KeyClass, secret: &str) {
    match class {
        KeyClass::Config | KeyClass::Ingest => request.set_header(TEAM_KEY_HEADER, secret),
        KeyClass::Management => request.set_header("Authorization", format!("Bearer {secret}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;

    fn request() -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: "http://localhost:3000/1/auth".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[test]
    fn v2_paths_need_management_keys() {
        assert_eq!(classify("/2/teams/t/environments"), KeyClass::Management);
        assert_eq!(classify("https://api.example.com/2/teams/t/environments?page[after]=x"), KeyClass::Management);
    }

    #[test]
    fn ingest_endpoints_need_ingest_keys() {
        assert_eq!(classify("/1/events/my-dataset"), KeyClass::Ingest);
        assert_eq!(classify("/1/batch/my-dataset"), KeyClass::Ingest);
        assert_eq!(classify("/1/kinesis_events/my-dataset"), KeyClass::Ingest);
        assert_eq!(classify("https://api.example.com/1/events/my-dataset"), KeyClass::Ingest);
    }

    #[test]
    fn other_paths_need_config_keys() {
        assert_eq!(classify("/1/columns/my-dataset"), KeyClass::Config);
        assert_eq!(classify("/1/auth"), KeyClass::Config);
        assert_eq!(classify("/"), KeyClass::Config);
        assert_eq!(classify("1/events/ds"), KeyClass::Config);
    }

    #[test]
    fn explicit_class_overrides_inference() {
        assert_eq!(resolve(Some("Ingest"), "/2/teams/t").unwrap(), KeyClass::Ingest);
        assert_eq!(resolve(None, "/1/events/ds").unwrap(), KeyClass::Ingest);
    }

    #[test]
    fn unknown_class_is_rejected() {
        let err = resolve(Some("admin"), "/1/auth").unwrap_err();
        assert!(matches!(err, ApiError::InvalidKeyClass(c) if c == "admin"));
    }

    #[test]
    fn config_and_ingest_use_team_header() {
        for class in [KeyClass::Config, KeyClass::Ingest] {
            let mut req = request();
            apply(&mut req, class, "secret");
            assert_eq!(req.header(TEAM_KEY_HEADER), Some("secret"));
            assert!(req.header("authorization").is_none());
        }
    }

    #[test]
    fn management_uses_bearer_header() {
        let mut req = request();
        apply(&mut req, KeyClass::Management, "kid:secret");
        assert_eq!(req.header("Authorization"), Some("Bearer kid:secret"));
        assert!(req.header(TEAM_KEY_HEADER).is_none());
    }

    #[test]
    fn lookup_reports_missing_secret() {
        let store = StaticCredentialStore::new().with_secret("default", KeyClass::Config, "c");
        assert_eq!(lookup(&store, "default", KeyClass::Config).unwrap(), "c");
        let err = lookup(&store, "staging", KeyClass::Config).unwrap_err();
        assert!(matches!(
            err,
            ApiError::MissingCredential { ref profile, class: KeyClass::Config } if profile == "staging"
        ));
    }
}
