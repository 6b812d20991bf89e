//! Dotted-path attribute lookup.

use serde_json::{Map, Value};

use crate::context::Context;

/// Result of resolving a path: the value, or the "missing" sentinel.
///
/// Missing is not an error. `exists` / `not_exists` are defined in terms of
/// it, and every other operator treats it as a non-match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'a> {
    Value(&'a Value),
    Missing,
}

impl<'a> Resolved<'a> {
    pub fn is_missing(&self) -> bool {
        matches!(self, Resolved::Missing)
    }

    pub fn value(&self) -> Option<&'a Value> {
        match self {
            Resolved::Value(v) => Some(v),
            Resolved::Missing => None,
        }
    }
}

/// Look up `path` in `ctx`.
///
/// At every object level the longest run of remaining segments that exists as
/// a literal key wins, so flat contexts such as `{"request.ip": "..."}` and
/// mixed ones such as `{"request.headers": {"host": "..."}}` resolve the same
/// way as fully nested JSON. Any absent segment, a non-object intermediate, or
/// an explicit `null` resolves to [`Resolved::Missing`].
pub fn resolve<'a>(ctx: &'a Context, path: &str) -> Resolved<'a> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Resolved::Missing;
    }
    match lookup(ctx.as_map(), &segments) {
        Some(value) => present(value),
        None => Resolved::Missing,
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, segments: &[&str]) -> Option<&'a Value> {
    for split in (1..=segments.len()).rev() {
        let Some(value) = map.get(&segments[..split].join(".")) else {
            continue;
        };
        if split == segments.len() {
            return Some(value);
        }
        if let Value::Object(inner) = value {
            if let Some(found) = lookup(inner, &segments[split..]) {
                return Some(found);
            }
        }
    }
    None
}

fn present(value: &Value) -> Resolved<'_> {
    if value.is_null() {
        Resolved::Missing
    } else {
        Resolved::Value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        Context::from_json(value).unwrap()
    }

    #[test]
    fn resolves_nested_path() {
        let c = ctx(json!({"request": {"headers": {"host": "example.com"}}}));
        assert_eq!(
            resolve(&c, "request.headers.host").value(),
            Some(&json!("example.com"))
        );
    }

    #[test]
    fn resolves_flat_dotted_key() {
        let c = ctx(json!({"request.ip": "10.1.1.1"}));
        assert_eq!(resolve(&c, "request.ip").value(), Some(&json!("10.1.1.1")));
    }

    #[test]
    fn resolves_mixed_flat_and_nested_keys() {
        let c = ctx(json!({
            "request.headers": {"host": "evil"},
            "user": {"profile.tier": "gold"}
        }));
        assert_eq!(resolve(&c, "request.headers.host").value(), Some(&json!("evil")));
        assert_eq!(resolve(&c, "user.profile.tier").value(), Some(&json!("gold")));
        assert!(resolve(&c, "request.headers.origin").is_missing());
    }

    #[test]
    fn flat_prefix_falls_back_to_nested_branch() {
        let c = ctx(json!({"request.id": "r-1", "request": {"id": {"seq": 7}}}));
        assert_eq!(resolve(&c, "request.id").value(), Some(&json!("r-1")));
        assert_eq!(resolve(&c, "request.id.seq").value(), Some(&json!(7)));
    }

    #[test]
    fn absent_segment_is_missing() {
        let c = ctx(json!({"request": {"ip": "1.1.1.1"}}));
        assert!(resolve(&c, "request.port").is_missing());
        assert!(resolve(&c, "user.role").is_missing());
    }

    #[test]
    fn non_object_intermediate_is_missing() {
        let c = ctx(json!({"request": {"ip": "1.1.1.1"}, "tags": ["a", "b"]}));
        assert!(resolve(&c, "request.ip.octet").is_missing());
        assert!(resolve(&c, "tags.0").is_missing());
    }

    #[test]
    fn null_is_missing() {
        let c = ctx(json!({"user": {"mfa": null}}));
        assert!(resolve(&c, "user.mfa").is_missing());
    }

    #[test]
    fn malformed_paths_are_missing() {
        let c = ctx(json!({"a": {"b": 1}}));
        assert!(resolve(&c, "").is_missing());
        assert!(resolve(&c, "a..b").is_missing());
        assert!(resolve(&c, ".a").is_missing());
    }

    #[test]
    fn resolves_lists_and_scalars() {
        let c = ctx(json!({"user": {"groups": ["eng", "ops"], "age": 41, "active": false}}));
        assert_eq!(resolve(&c, "user.groups").value(), Some(&json!(["eng", "ops"])));
        assert_eq!(resolve(&c, "user.age").value(), Some(&json!(41)));
        assert_eq!(resolve(&c, "user.active").value(), Some(&json!(false)));
    }
}
