use crate::meta::ModelInfo;
use serde_json::{Map, Value};

/// Decides whether a create payload is a privileged ("unchecked") write that
/// may set foreign-key scalars directly instead of connecting relations.
pub trait PrivilegedWrite: Send + Sync {
    fn is_privileged_write(&self, model: &ModelInfo, data: &Map<String, Value>) -> bool;
}

impl<F> PrivilegedWrite for F
where
    F: Fn(&ModelInfo, &Map<String, Value>) -> bool + Send + Sync,
{
    fn is_privileged_write(&self, model: &ModelInfo, data: &Map<String, Value>) -> bool {
        self(model, data)
    }
}

/// Reports a payload as privileged when it already sets a foreign-key or
/// auto-increment id field, which the wrapped client only accepts in its
/// unchecked input form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UncheckedInputDetector;

impl PrivilegedWrite for UncheckedInputDetector {
    fn is_privileged_write(&self, model: &ModelInfo, data: &Map<String, Value>) -> bool {
        data.keys().any(|key| {
            model
                .get_field(key)
                .is_some_and(|f| f.is_foreign_key || f.is_auto_increment)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture_meta;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(obj) => obj,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_unchecked_input_detection() {
        let meta = fixture_meta();
        let post = meta.require_model("Post").unwrap();
        let detector = UncheckedInputDetector;

        assert!(!detector.is_privileged_write(post, &payload(json!({"title": "t"}))));
        assert!(detector.is_privileged_write(post, &payload(json!({"authorId": "u2"}))));
        assert!(detector.is_privileged_write(post, &payload(json!({"id": 9, "title": "t"}))));
    }

    #[test]
    fn test_closure_predicate() {
        let meta = fixture_meta();
        let post = meta.require_model("Post").unwrap();
        let always = |_: &ModelInfo, _: &Map<String, Value>| true;
        assert!(always.is_privileged_write(post, &Map::new()));
    }
}
