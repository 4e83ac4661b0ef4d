//! Remote id resolution for raw entity payloads.

use serde_json::Value;

use super::model::EntityKind;

/// Read a string or integer JSON value as an id.
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Composite key for a submission the remote side returned without an id.
///
/// The user id is length-prefixed, so two different `(user, assignment)`
/// pairs can never produce the same key.
pub fn synthetic_submission_id(user_id: &str, assignment_id: &str) -> String {
    format!("sub:{}:{}:{}", user_id.len(), user_id, assignment_id)
}

/// Parent id for `item`: the explicit scope wins over the payload field.
pub fn resolve_parent_id(
    kind: EntityKind,
    item: &Value,
    explicit_parent: Option<&str>,
) -> Option<String> {
    if let Some(parent) = explicit_parent.filter(|p| !p.trim().is_empty()) {
        return Some(parent.to_string());
    }
    kind.parent_field()
        .and_then(|field| item.get(field))
        .and_then(value_as_id)
}

/// Stable remote id for `item`, or `None` when the payload has no usable key.
pub fn resolve_remote_id(
    kind: EntityKind,
    item: &Value,
    parent_remote_id: Option<&str>,
) -> Option<String> {
    if let Some(id) = item.get("id").and_then(value_as_id) {
        return Some(id);
    }
    if let Some(id) = item
        .get(format!("{}_id", kind.as_str()))
        .and_then(value_as_id)
    {
        return Some(id);
    }
    if kind != EntityKind::Submission {
        return None;
    }

    let user_id = item.get("user_id").and_then(value_as_id)?;
    let assignment_id = item
        .get("assignment_id")
        .and_then(value_as_id)
        .or_else(|| parent_remote_id.map(str::to_string))?;
    Some(synthetic_submission_id(&user_id, &assignment_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_and_string_ids_resolve() {
        assert_eq!(
            resolve_remote_id(EntityKind::Course, &json!({"id": 42}), None),
            Some("42".to_string())
        );
        assert_eq!(
            resolve_remote_id(EntityKind::Course, &json!({"id": " c-9 "}), None),
            Some("c-9".to_string())
        );
        assert_eq!(
            resolve_remote_id(EntityKind::Course, &json!({"name": "x"}), None),
            None
        );
    }

    #[test]
    fn kind_specific_id_field_is_a_fallback() {
        let body = json!({"submission_id": "501", "assignment_id": "7", "user_id": "3"});
        assert_eq!(
            resolve_remote_id(EntityKind::Submission, &body, Some("7")),
            Some("501".to_string())
        );
    }

    #[test]
    fn submissions_without_id_get_distinct_synthetic_keys() {
        let a = resolve_remote_id(EntityKind::Submission, &json!({"user_id": 1}), Some("11"));
        let b = resolve_remote_id(EntityKind::Submission, &json!({"user_id": 11}), Some("1"));
        assert_eq!(a, Some("sub:1:1:11".to_string()));
        assert_eq!(b, Some("sub:2:11:1".to_string()));
        assert_ne!(a, b);
    }

    #[test]
    fn synthetic_key_is_stable_across_ingestions() {
        let item = json!({"user_id": 12345678, "assignment_id": 987654321});
        let first = resolve_remote_id(EntityKind::Submission, &item, None);
        let second = resolve_remote_id(EntityKind::Submission, &item, Some("ignored"));
        assert_eq!(first, second);
    }

    #[test]
    fn parent_prefers_explicit_scope() {
        let item = json!({"course_id": 5});
        assert_eq!(
            resolve_parent_id(EntityKind::Assignment, &item, Some("9")),
            Some("9".to_string())
        );
        assert_eq!(
            resolve_parent_id(EntityKind::Assignment, &item, None),
            Some("5".to_string())
        );
        assert_eq!(resolve_parent_id(EntityKind::Course, &item, None), None);
    }
}
