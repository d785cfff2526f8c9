//! JSON:API envelope translation for v2 paths.
//!
//! # Design
//! Outgoing bodies on v2 paths are wrapped as
//! `{"data": {"type": ..., "attributes": {...}}}`. Incoming bodies are
//! flattened so callers see plain objects: the resource's `attributes`
//! merged with its `id` and `type`, the envelope values winning over any
//! same-named attribute.
//!
//! Unwrapping probes only the fields it needs. `data` is captured as raw
//! JSON and decoded first as a single resource, then as a list. Anything
//! that fits neither shape is passed through untouched; a malformed v2
//! response reaches the caller as the server sent it.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

use crate::fields::FieldSet;
use crate::http::HttpMethod;

/// Path prefix of the v2 (JSON:API style) API.
pub const V2_PREFIX: &str = "/2/";

pub const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A JSON:API resource object as sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub attributes: FieldSet,
}

/// Top-level JSON:API document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document<T> {
    pub data: T,
}

/// Path portion of `target`, with any `scheme://host` removed.
pub(crate) fn path_of(target: &str) -> &str {
    match target.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |i| &rest[i..]),
        None => target,
    }
}

/// Whether `target` addresses the v2 API.
pub fn is_v2_path(target: &str) -> bool {
    path_of(target).starts_with(V2_PREFIX)
}

/// Default content type for a request body sent to `target`.
pub fn content_type(target: &str) -> &'static str {
    if is_v2_path(target) {
        JSON_API_CONTENT_TYPE
    } else {
        JSON_CONTENT_TYPE
    }
}

/// Resource type implied by a request: the collection segment of the path.
///
/// `PATCH`/`PUT` address an item, so the collection is the segment above
/// the id; every other method addresses the collection itself.
pub fn infer_resource_type(method: HttpMethod, target: &str) -> String {
    let path = path_of(target);
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    let path = path.trim_end_matches('/');
    let segments: Vec<&str> = path.split('/').collect();

    let index = match method {
        HttpMethod::Patch | HttpMethod::Put if segments.len() >= 2 => segments.len() - 2,
        _ => segments.len() - 1,
    };
    segments[index].to_string()
}

/// Wrap structured fields into a JSON:API create/update document.
pub fn wrap(fields: FieldSet, resource_type: impl Into<String>) -> Document<ResourceEnvelope> {
    Document {
        data: ResourceEnvelope {
            id: None,
            resource_type: resource_type.into(),
            attributes: fields,
        },
    }
}

#[derive(Deserialize)]
struct Probe<'a> {
    #[serde(borrow)]
    data: Option<&'a RawValue>,
}

#[derive(Deserialize)]
struct Resource {
    id: Option<String>,
    #[serde(rename = "type", default)]
    resource_type: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl Resource {
    fn flatten(self) -> Value {
        let mut flat = self.attributes;
        if let Some(id) = self.id {
            flat.insert("id".to_string(), Value::String(id));
        }
        flat.insert("type".to_string(), Value::String(self.resource_type));
        Value::Object(flat)
    }
}

/// Decoded shape of a response's `data` member.
enum Unwrapped {
    Single(Resource),
    List(Vec<Resource>),
    PassThrough,
}

fn classify(data: &RawValue) -> Unwrapped {
    if let Ok(resource) = serde_json::from_str::<Resource>(data.get()) {
        if !resource.resource_type.is_empty() {
            return Unwrapped::Single(resource);
        }
    }
    match serde_json::from_str::<Vec<Resource>>(data.get()) {
        Ok(list) => Unwrapped::List(list),
        Err(_) => Unwrapped::PassThrough,
    }
}

/// Flatten a JSON:API response body; returns `body` unchanged when it is not
/// a recognisable single-resource or list document.
pub fn unwrap(body: &[u8]) -> Vec<u8> {
    // Derived structs also accept JSON arrays; only objects can carry `data`.
    if body.iter().find(|b| !b.is_ascii_whitespace()) != Some(&b'{') {
        return body.to_vec();
    }
    let probe: Probe<'_> = match serde_json::from_slice(body) {
        Ok(probe) => probe,
        Err(e) => {
            tracing::trace!(error = %e, "response is not a JSON object, passing through");
            return body.to_vec();
        }
    };
    let Some(data) = probe.data else {
        return body.to_vec();
    };

    let flattened = match classify(data) {
        Unwrapped::Single(resource) => resource.flatten(),
        Unwrapped::List(list) => Value::Array(list.into_iter().map(Resource::flatten).collect()),
        Unwrapped::PassThrough => {
            tracing::trace!("data member is not a resource document, passing through");
            return body.to_vec();
        }
    };
    serde_json::to_vec(&flattened).unwrap_or_else(|_| body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldValue;
    use serde_json::json;

    fn unwrap_json(body: Value) -> Value {
        let bytes = serde_json::to_vec(&body).unwrap();
        serde_json::from_slice(&unwrap(&bytes)).unwrap()
    }

    #[test]
    fn detects_v2_paths_with_or_without_host() {
        assert!(is_v2_path("/2/teams/t/environments"));
        assert!(is_v2_path("https://api.example.com/2/teams/t/environments?page[size]=1"));
        assert!(!is_v2_path("/1/columns/ds"));
        assert!(!is_v2_path("https://api.example.com/1/auth"));
        assert!(!is_v2_path("https://api.example.com"));
        assert!(!is_v2_path("2/teams"));
    }

    #[test]
    fn content_type_follows_api_version() {
        assert_eq!(content_type("/2/teams/t/environments"), JSON_API_CONTENT_TYPE);
        assert_eq!(content_type("/1/markers/ds"), JSON_CONTENT_TYPE);
    }

    #[test]
    fn resource_type_for_collection_methods() {
        assert_eq!(infer_resource_type(HttpMethod::Post, "/2/teams/t/environments"), "environments");
        assert_eq!(infer_resource_type(HttpMethod::Get, "/2/teams/t/environments/"), "environments");
        assert_eq!(infer_resource_type(HttpMethod::Post, "/2/teams/t/api-keys?x=1"), "api-keys");
    }

    #[test]
    fn resource_type_for_item_methods() {
        assert_eq!(infer_resource_type(HttpMethod::Patch, "/2/teams/t/environments/abc"), "environments");
        assert_eq!(infer_resource_type(HttpMethod::Put, "/2/teams/t/environments/abc/"), "environments");
        assert_eq!(infer_resource_type(HttpMethod::Patch, "single"), "single");
    }

    #[test]
    fn wrap_produces_json_api_document() {
        let mut fields = FieldSet::new();
        fields.insert("name".to_string(), FieldValue::from("prod"));
        let doc = wrap(fields, "environments");
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({"data": {"type": "environments", "attributes": {"name": "prod"}}})
        );
    }

    #[test]
    fn unwraps_single_resource() {
        let out = unwrap_json(json!({"data": {"id": "abc", "type": "environments", "attributes": {"name": "prod"}}}));
        assert_eq!(out, json!({"id": "abc", "type": "environments", "name": "prod"}));
    }

    #[test]
    fn envelope_id_and_type_win_over_attributes() {
        let out = unwrap_json(json!({"data": {
            "id": "abc",
            "type": "environments",
            "attributes": {"id": "shadow", "type": "shadow", "name": "prod"}
        }}));
        assert_eq!(out, json!({"id": "abc", "type": "environments", "name": "prod"}));
    }

    #[test]
    fn unwraps_list_preserving_order() {
        let out = unwrap_json(json!({"data": [
            {"id": "2", "type": "environments", "attributes": {"name": "b"}},
            {"id": "1", "type": "environments", "attributes": {"name": "a"}}
        ]}));
        assert_eq!(
            out,
            json!([
                {"id": "2", "type": "environments", "name": "b"},
                {"id": "1", "type": "environments", "name": "a"}
            ])
        );
    }

    #[test]
    fn empty_list_unwraps_to_empty_array() {
        assert_eq!(unwrap_json(json!({"data": [], "links": {}})), json!([]));
    }

    #[test]
    fn non_json_passes_through() {
        assert_eq!(unwrap(b"<html>oops</html>"), b"<html>oops</html>".to_vec());
        assert_eq!(unwrap(b""), Vec::<u8>::new());
    }

    #[test]
    fn json_without_data_passes_through_byte_for_byte() {
        let body = br#"{"errors": [{"status": "422", "detail": "name is required"}]}"#;
        assert_eq!(unwrap(body), body.to_vec());
        assert_eq!(unwrap(b"[1, 2]"), b"[1, 2]".to_vec());
        let list = br#"[{"id": "1", "type": "environments"}]"#;
        assert_eq!(unwrap(list), list.to_vec());
    }

    #[test]
    fn unrecognised_data_shapes_pass_through() {
        for body in [r#"{"data": null}"#, r#"{"data": "text"}"#, r#"{"data": {"attributes": {}}}"#, r#"{"data": [1]}"#] {
            assert_eq!(unwrap(body.as_bytes()), body.as_bytes().to_vec(), "{body}");
        }
    }

    #[test]
    fn wrap_then_unwrap_returns_attributes() {
        let mut fields = FieldSet::new();
        fields.insert("name".to_string(), FieldValue::from("prod"));
        fields.insert("size".to_string(), FieldValue::Integer(3));
        let wrapped = serde_json::to_vec(&wrap(fields.clone(), "environments")).unwrap();

        let mut flat: Value = serde_json::from_slice(&unwrap(&wrapped)).unwrap();
        let obj = flat.as_object_mut().unwrap();
        assert_eq!(obj.remove("type"), Some(json!("environments")));
        assert_eq!(Value::Object(obj.clone()), serde_json::to_value(&fields).unwrap());
    }
}
