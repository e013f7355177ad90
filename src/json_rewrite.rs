//! JSON sub-field rewriter.
//!
//! Used when a column holds a JSON document and only selected dotted paths
//! inside it need anonymizing. Reuses `serde_json::Value` as the document
//! tree rather than hand-rolling a parser: duplicating a well-tested
//! ecosystem JSON parser here would buy nothing.

use serde_json::Value;

use crate::config::JsonPathSpec;
use crate::engine::{anonymize, AnonContext};
#[cfg(feature = "scripting")]
use crate::script::ScriptEngine;

/// Parse `document`, rewrite every resolvable path in `paths`, and
/// re-serialize. A parse failure is non-fatal: it is reported to stderr and
/// the original bytes are returned unchanged so the surrounding `INSERT`
/// still emits.
pub fn rewrite(
    document: &[u8],
    paths: &[JsonPathSpec],
    ctx: &mut AnonContext,
    secret: &[u8],
    #[cfg(feature = "scripting")] scripts: Option<&ScriptEngine>,
) -> Vec<u8> {
    let text = match std::str::from_utf8(document) {
        Ok(t) => t,
        Err(_) => {
            eprintln!(
                "{}",
                crate::diagnostics::warning(&format!(
                    "table {}: JSON cell is not valid UTF-8, leaving unchanged",
                    ctx.table_name
                ))
            );
            return document.to_vec();
        }
    };

    let mut value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            eprintln!(
                "{}",
                crate::diagnostics::warning(&format!(
                    "table {}: failed to parse JSON cell: {e}, leaving unchanged",
                    ctx.table_name
                ))
            );
            return document.to_vec();
        }
    };

    for path_spec in paths {
        if let Some(leaf) = resolve_mut(&mut value, &path_spec.path) {
            let leaf_bytes = leaf_as_bytes(leaf);
            let result = anonymize(
                false,
                &path_spec.spec,
                &leaf_bytes,
                ctx,
                secret,
                &path_spec.hits,
                #[cfg(feature = "scripting")]
                scripts,
            );
            let replacement = String::from_utf8_lossy(&result.data).into_owned();
            *leaf = Value::String(replacement);
        }
    }

    serde_json::to_string(&value)
        .unwrap_or_else(|_| text.to_string())
        .into_bytes()
}

/// Resolve a dotted path from the root, returning a mutable reference to the
/// leaf if every segment resolves. A numeric segment indexes an array; any
/// other segment is treated as an object key. Resolution against a
/// non-object/non-array intermediate (wrong shape for the segment) silently
/// fails — no warning, since document shape legitimately varies row to row.
fn resolve_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get_mut(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Stringify a leaf for hashing. Non-string leaves are stringified first;
/// the anonymized result always replaces the leaf as a JSON string, so the
/// original JSON type of an anonymized leaf is not preserved.
fn leaf_as_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.clone().into_bytes(),
        Value::Null => b"null".to_vec(),
        Value::Bool(b) => b.to_string().into_bytes(),
        Value::Number(n) => n.to_string().into_bytes(),
        other => other.to_string().into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnonType;
    use std::cell::Cell;

    fn path(path: &str, spec: AnonType) -> JsonPathSpec {
        JsonPathSpec {
            path: path.to_string(),
            spec,
            hits: Cell::new(0),
        }
    }

    fn ctx() -> AnonContext {
        AnonContext::for_table("orders".to_string())
    }

    #[test]
    fn rewrites_nested_email_leaves_name_unchanged() {
        let doc = br#"{"profile":{"email":"a@b.c","name":"x"}}"#;
        let paths = vec![path(
            "profile.email",
            AnonType::EmailHash {
                length: 5,
                domain: "example.com".to_string(),
            },
        )];
        let out = rewrite(
            doc,
            &paths,
            &mut ctx(),
            b"s",
            #[cfg(feature = "scripting")]
            None,
        );
        let v: Value = serde_json::from_slice(&out).unwrap();
        let email = v["profile"]["email"].as_str().unwrap();
        assert!(email.ends_with("@example.com"));
        assert_eq!(v["profile"]["name"], "x");
    }

    #[test]
    fn unresolved_path_is_left_alone_without_error() {
        let doc = br#"{"a":1}"#;
        let paths = vec![path("b.c", AnonType::TextHash { length: 4 })];
        let out = rewrite(
            doc,
            &paths,
            &mut ctx(),
            b"s",
            #[cfg(feature = "scripting")]
            None,
        );
        let v: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["a"], 1);
        assert_eq!(paths[0].hits.get(), 0);
    }

    #[test]
    fn array_index_segment_resolves() {
        let doc = br#"{"items":["a","b","c"]}"#;
        let paths = vec![path("items.1", AnonType::TextHash { length: 4 })];
        let out = rewrite(
            doc,
            &paths,
            &mut ctx(),
            b"s",
            #[cfg(feature = "scripting")]
            None,
        );
        let v: Value = serde_json::from_slice(&out).unwrap();
        assert_ne!(v["items"][1], "b");
        assert_eq!(v["items"][0], "a");
        assert_eq!(v["items"][2], "c");
    }

    #[test]
    fn invalid_json_is_left_unchanged() {
        let doc = b"{not json";
        let out = rewrite(
            doc,
            &[],
            &mut ctx(),
            b"s",
            #[cfg(feature = "scripting")]
            None,
        );
        assert_eq!(out, doc);
    }

    #[test]
    fn non_string_leaf_is_stringified_then_replaced_as_string() {
        let doc = br#"{"age":30}"#;
        let paths = vec![path("age", AnonType::IntHash { length: 6 })];
        let out = rewrite(
            doc,
            &paths,
            &mut ctx(),
            b"s",
            #[cfg(feature = "scripting")]
            None,
        );
        let v: Value = serde_json::from_slice(&out).unwrap();
        assert!(v["age"].is_string());
    }
}
