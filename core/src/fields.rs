//! Field encoding: `key=value` command-line entries to a nested `FieldSet`.
//!
//! # Design
//! Values are a closed sum type rather than `serde_json::Value` so typed
//! coercion stays explicit and the query-string renderer can match on
//! scalar kinds. Keys use bracket paths:
//! - `name=v` sets a top-level key;
//! - `name[sub][deeper]=v` creates nested mappings as needed;
//! - `name[]=v` appends to a list at `name`.
//!
//! A key that does not parse as a bracket path is used literally.
//! String fields are applied before typed fields, so for a given resolved
//! key the last entry across both lists wins.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::ApiError;

/// Structured request fields keyed by name.
pub type FieldSet = BTreeMap<String, FieldValue>;

/// A dynamically typed field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
    Map(FieldSet),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Natural string form used for query parameters. Maps have no natural
    /// scalar form and are rendered as compact JSON.
    pub fn to_query_value(&self) -> String {
        match self {
            FieldValue::String(s) => s.clone(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Null => "null".to_string(),
            FieldValue::Map(_) | FieldValue::List(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

/// Build a `FieldSet` from string-only and typed `key=value` entries.
///
/// `stdin` backs `@-` references in typed values.
pub fn encode(
    string_fields: &[String],
    typed_fields: &[String],
    stdin: &mut dyn Read,
) -> Result<FieldSet, ApiError> {
    let mut fields = FieldSet::new();

    for entry in string_fields {
        let (key, raw) = split_entry(entry)?;
        set(&mut fields, key, FieldValue::String(raw.to_string()));
    }
    for entry in typed_fields {
        let (key, raw) = split_entry(entry)?;
        let value = coerce(raw, stdin)?;
        set(&mut fields, key, value);
    }

    Ok(fields)
}

// -2^63 and 2^63, both exact in f64.
const I64_MIN_F64: f64 = -9_223_372_036_854_775_808.0;
const I64_END_F64: f64 = 9_223_372_036_854_775_808.0;

fn split_entry(entry: &str) -> Result<(&str, &str), ApiError> {
    entry
        .split_once('=')
        .ok_or_else(|| ApiError::InvalidField(entry.to_string()))
}

/// Convert a typed value: booleans, null, integers, finite floats, `@`
/// references, then plain text. A float with no fractional part that fits
/// an `i64` (`1e3`, `2.0`) is sent as an integer.
fn coerce(raw: &str, stdin: &mut dyn Read) -> Result<FieldValue, ApiError> {
    if let Some(source) = raw.strip_prefix('@') {
        return read_source(source, stdin).map(FieldValue::String);
    }
    let value = match raw {
        "true" => FieldValue::Bool(true),
        "false" => FieldValue::Bool(false),
        "null" => FieldValue::Null,
        _ => {
            if let Ok(i) = raw.parse::<i64>() {
                FieldValue::Integer(i)
            } else {
                match raw.parse::<f64>() {
                    Ok(f) if f.fract() == 0.0 && (I64_MIN_F64..I64_END_F64).contains(&f) => {
                        FieldValue::Integer(f as i64)
                    }
                    Ok(f) if f.is_finite() => FieldValue::Float(f),
                    _ => FieldValue::String(raw.to_string()),
                }
            }
        }
    };
    Ok(value)
}

/// Read a body or field source: `-` is `stdin`, anything else a file path.
pub(crate) fn read_source(source: &str, stdin: &mut dyn Read) -> Result<String, ApiError> {
    let path = if source == "-" { PathBuf::from("<stdin>") } else { PathBuf::from(source) };
    let bytes = if source == "-" {
        let mut buf = Vec::new();
        stdin.read_to_end(&mut buf).map(|_| buf)
    } else {
        fs::read(source)
    };
    let bytes = bytes.map_err(|e| ApiError::ReadSource { path: path.clone(), source: e })?;
    String::from_utf8(bytes).map_err(|_| ApiError::NonUtf8Source { path })
}

fn set(fields: &mut FieldSet, key: &str, value: FieldValue) {
    match parse_key_path(key) {
        Some((base, path)) => insert(fields, base, &path, value),
        None => {
            fields.insert(key.to_string(), value);
        }
    }
}

/// Split `name[a][b]` into `("name", ["a", "b"])`. Returns `None` for keys
/// without brackets and for malformed bracket syntax.
fn parse_key_path(key: &str) -> Option<(&str, Vec<&str>)> {
    let open = key.find('[')?;
    let (base, mut rest) = key.split_at(open);
    if base.is_empty() {
        return None;
    }
    let mut path = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        path.push(&inner[..close]);
        rest = &inner[close + 1..];
    }
    Some((base, path))
}

fn insert(fields: &mut FieldSet, key: &str, path: &[&str], value: FieldValue) {
    match path.split_first() {
        None => {
            fields.insert(key.to_string(), value);
        }
        Some((&"", rest)) => {
            let mut items = match fields.remove(key) {
                Some(FieldValue::List(items)) => items,
                _ => Vec::new(),
            };
            items.push(nested(rest, value));
            fields.insert(key.to_string(), FieldValue::List(items));
        }
        Some((sub, rest)) => {
            let mut inner = match fields.remove(key) {
                Some(FieldValue::Map(inner)) => inner,
                _ => FieldSet::new(),
            };
            insert(&mut inner, sub, rest, value);
            fields.insert(key.to_string(), FieldValue::Map(inner));
        }
    }
}

/// Fresh value for the remainder of a path below an appended list element.
fn nested(path: &[&str], value: FieldValue) -> FieldValue {
    match path.split_first() {
        None => value,
        Some((&"", rest)) => FieldValue::List(vec![nested(rest, value)]),
        Some((sub, rest)) => {
            let mut inner = FieldSet::new();
            inner.insert(sub.to_string(), nested(rest, value));
            FieldValue::Map(inner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn strings(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    fn typed(entries: &[&str]) -> FieldSet {
        encode(&[], &strings(entries), &mut std::io::empty()).unwrap()
    }

    fn as_json(fields: &FieldSet) -> serde_json::Value {
        serde_json::to_value(fields).unwrap()
    }

    #[test]
    fn typed_boolean_field() {
        let fields = typed(&["active=true"]);
        assert_eq!(as_json(&fields), serde_json::json!({"active": true}));
    }

    #[test]
    fn typed_values_are_coerced_in_order() {
        let fields = typed(&["a=false", "b=null", "c=42", "d=-7", "e=1.5", "f=hello", "g=1e3", "h=NaN"]);
        assert_eq!(fields["a"], FieldValue::Bool(false));
        assert_eq!(fields["b"], FieldValue::Null);
        assert_eq!(fields["c"], FieldValue::Integer(42));
        assert_eq!(fields["d"], FieldValue::Integer(-7));
        assert_eq!(fields["e"], FieldValue::Float(1.5));
        assert_eq!(fields["f"], FieldValue::String("hello".to_string()));
        assert_eq!(fields["g"], FieldValue::Integer(1000));
        assert_eq!(fields["h"], FieldValue::String("NaN".to_string()));
    }

    #[test]
    fn string_fields_are_never_coerced() {
        let fields = encode(&strings(&["n=42", "b=true"]), &[], &mut std::io::empty()).unwrap();
        assert_eq!(fields["n"], FieldValue::String("42".to_string()));
        assert_eq!(fields["b"], FieldValue::String("true".to_string()));
    }

    #[test]
    fn value_may_contain_equals_sign() {
        let fields = typed(&["query=a=b"]);
        assert_eq!(fields["query"], FieldValue::from("a=b"));
    }

    #[test]
    fn missing_separator_names_the_entry() {
        let err = encode(&strings(&["ok=1", "broken"]), &[], &mut std::io::empty()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidField(entry) if entry == "broken"));
    }

    #[test]
    fn nested_brackets_build_nested_maps() {
        let fields = typed(&["a[b][c]=x"]);
        assert_eq!(as_json(&fields), serde_json::json!({"a": {"b": {"c": "x"}}}));
    }

    #[test]
    fn sibling_nested_keys_share_a_map() {
        let fields = typed(&["settings[size]=3", "settings[label]=big"]);
        assert_eq!(as_json(&fields), serde_json::json!({"settings": {"size": 3, "label": "big"}}));
    }

    #[test]
    fn array_notation_appends_in_order() {
        let fields = typed(&["tags[]=a", "tags[]=2", "tags[]=true"]);
        assert_eq!(as_json(&fields), serde_json::json!({"tags": ["a", 2, true]}));
    }

    #[test]
    fn append_below_nested_key() {
        let fields = typed(&["filter[ids][]=1", "filter[ids][]=2"]);
        assert_eq!(as_json(&fields), serde_json::json!({"filter": {"ids": [1, 2]}}));
    }

    #[test]
    fn append_then_nest_creates_map_elements() {
        let fields = typed(&["items[][name]=a", "items[][name]=b"]);
        assert_eq!(as_json(&fields), serde_json::json!({"items": [{"name": "a"}, {"name": "b"}]}));
    }

    #[test]
    fn malformed_brackets_are_literal_keys() {
        let fields = typed(&["a[b=1", "[x]=2", "c[d]e=3"]);
        assert_eq!(fields["a[b"], FieldValue::Integer(1));
        assert_eq!(fields["[x]"], FieldValue::Integer(2));
        assert_eq!(fields["c[d]e"], FieldValue::Integer(3));
    }

    #[test]
    fn scalar_is_replaced_by_nested_map() {
        let fields = typed(&["a=1", "a[b]=2"]);
        assert_eq!(as_json(&fields), serde_json::json!({"a": {"b": 2}}));
    }

    #[test]
    fn typed_fields_override_string_fields() {
        let fields = encode(&strings(&["count=one"]), &strings(&["count=1"]), &mut std::io::empty()).unwrap();
        assert_eq!(fields["count"], FieldValue::Integer(1));
    }

    #[test]
    fn later_entry_wins_for_same_key() {
        let fields = typed(&["name=first", "name=second"]);
        assert_eq!(fields["name"], FieldValue::from("second"));
    }

    #[test]
    fn at_dash_reads_stdin() {
        let mut stdin = std::io::Cursor::new(b"from stdin\n".to_vec());
        let fields = encode(&[], &strings(&["body=@-"]), &mut stdin).unwrap();
        assert_eq!(fields["body"], FieldValue::from("from stdin\n"));
    }

    #[test]
    fn at_path_reads_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"raw\": true}}").unwrap();
        let entry = format!("payload=@{}", file.path().display());
        let fields = encode(&[], &[entry], &mut std::io::empty()).unwrap();
        assert_eq!(fields["payload"], FieldValue::from("{\"raw\": true}"));
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let err = encode(&[], &strings(&["x=@/definitely/not/here.json"]), &mut std::io::empty()).unwrap_err();
        match err {
            ApiError::ReadSource { path, .. } => assert_eq!(path, PathBuf::from("/definitely/not/here.json")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_utf8_file_is_reported_as_such() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x7b, 0xff, 0xfe, 0x7d]).unwrap();
        let entry = format!("blob=@{}", file.path().display());
        match encode(&[], &[entry], &mut std::io::empty()).unwrap_err() {
            ApiError::NonUtf8Source { path } => assert_eq!(path, file.path()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_utf8_stdin_is_reported_as_such() {
        let mut stdin = std::io::Cursor::new(vec![0xc3, 0x28]);
        let err = encode(&[], &strings(&["body=@-"]), &mut stdin).unwrap_err();
        assert_eq!(err.to_string(), "<stdin> is not valid UTF-8 text");
    }

    #[test]
    fn whole_floats_become_integers() {
        let fields = typed(&["a=1e3", "b=2.0", "c=-4E2", "d=2.5e-1", "e=1e19", "f=-9223372036854775808.0"]);
        assert_eq!(fields["a"], FieldValue::Integer(1000));
        assert_eq!(fields["b"], FieldValue::Integer(2));
        assert_eq!(fields["c"], FieldValue::Integer(-400));
        assert_eq!(fields["d"], FieldValue::Float(0.25));
        assert_eq!(fields["e"], FieldValue::Float(1e19));
        assert_eq!(fields["f"], FieldValue::Integer(i64::MIN));
        assert_eq!(as_json(&fields)["a"], serde_json::json!(1000));
    }

    #[test]
    fn string_fields_keep_at_sign_literally() {
        let fields = encode(&strings(&["handle=@someone"]), &[], &mut std::io::empty()).unwrap();
        assert_eq!(fields["handle"], FieldValue::from("@someone"));
    }

    #[test]
    fn query_values_use_natural_form() {
        assert_eq!(FieldValue::Integer(3).to_query_value(), "3");
        assert_eq!(FieldValue::Float(2.5).to_query_value(), "2.5");
        assert_eq!(FieldValue::Bool(true).to_query_value(), "true");
        assert_eq!(FieldValue::from("x y").to_query_value(), "x y");
    }
}
