//! Credential lookup from environment variables.
//!
//! A secret for `(profile, class)` is read from
//! `APICALL_<PROFILE>_<CLASS>_KEY`, falling back to `APICALL_<CLASS>_KEY`.
//! Profile names are upper-cased and anything outside `[A-Z0-9]` becomes
//! `_`, so `my-team` reads `APICALL_MY_TEAM_CONFIG_KEY`.

use std::collections::HashMap;
use std::ffi::OsString;

use apicall_core::{CredentialStore, KeyClass};

const PREFIX: &str = "APICALL";

/// Snapshot of the process environment taken at startup.
#[derive(Debug, Default)]
pub struct EnvCredentialStore {
    vars: HashMap<String, String>,
}

impl EnvCredentialStore {
    pub fn from_env() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Entries whose name or value is not valid UTF-8 are skipped.
    pub fn from_os_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        Self::from_vars(
            vars.into_iter()
                .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?))),
        )
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            vars: vars.into_iter().collect(),
        }
    }
}

fn env_segment(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Variable names consulted for `(profile, class)`, most specific first.
pub fn variable_names(profile: &str, class: KeyClass) -> [String; 2] {
    let class = env_segment(class.as_str());
    [
        format!("{PREFIX}_{}_{class}_KEY", env_segment(profile)),
        format!("{PREFIX}_{class}_KEY"),
    ]
}

impl CredentialStore for EnvCredentialStore {
    fn secret(&self, profile: &str, class: KeyClass) -> Option<String> {
        variable_names(profile, class)
            .iter()
            .filter_map(|name| self.vars.get(name))
            .find(|value| !value.is_empty())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(vars: &[(&str, &str)]) -> EnvCredentialStore {
        EnvCredentialStore::from_vars(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    #[test]
    fn names_are_normalized() {
        assert_eq!(
            variable_names("my-team", KeyClass::Management),
            ["APICALL_MY_TEAM_MANAGEMENT_KEY".to_string(), "APICALL_MANAGEMENT_KEY".to_string()]
        );
    }

    #[test]
    fn profile_variable_wins() {
        let store = store(&[("APICALL_STAGING_CONFIG_KEY", "staging"), ("APICALL_CONFIG_KEY", "global")]);
        assert_eq!(store.secret("staging", KeyClass::Config).as_deref(), Some("staging"));
        assert_eq!(store.secret("prod", KeyClass::Config).as_deref(), Some("global"));
    }

    #[test]
    fn empty_values_are_skipped() {
        let store = store(&[("APICALL_DEFAULT_INGEST_KEY", ""), ("APICALL_INGEST_KEY", "fallback")]);
        assert_eq!(store.secret("default", KeyClass::Ingest).as_deref(), Some("fallback"));
        assert_eq!(store.secret("default", KeyClass::Management), None);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_entries_are_ignored() {
        use std::os::unix::ffi::OsStringExt;

        let store = EnvCredentialStore::from_os_vars([
            (OsString::from("APICALL_CONFIG_KEY"), OsString::from_vec(vec![0x66, 0x6f, 0xff])),
            (OsString::from_vec(b"BAD_\xffNAME".to_vec()), OsString::from("x")),
            (OsString::from("APICALL_INGEST_KEY"), OsString::from("ingest")),
        ]);
        assert_eq!(store.secret("default", KeyClass::Config), None);
        assert_eq!(store.secret("default", KeyClass::Ingest).as_deref(), Some("ingest"));
    }
}
