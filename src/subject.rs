//! Opaque user records handed back by integrator callbacks.

use serde_json::{Map, Value};

/// Anything that can describe an authenticated user.
pub trait Subject: Send + Sync {
    /// Full record, as returned by the "me" endpoint.
    fn to_map(&self) -> Map<String, Value>;

    /// Identifier stored under `key`.
    ///
    /// Strings and integers are accepted; other values are not identifiers.
    fn identifier(&self, key: &str) -> Option<String> {
        identifier_of(&self.to_map(), key)
    }
}

impl Subject for Map<String, Value> {
    fn to_map(&self) -> Map<String, Value> {
        self.clone()
    }

    fn identifier(&self, key: &str) -> Option<String> {
        identifier_of(self, key)
    }
}

impl Subject for Value {
    fn to_map(&self) -> Map<String, Value> {
        match self {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        }
    }

    fn identifier(&self, key: &str) -> Option<String> {
        self.as_object().and_then(|map| identifier_of(map, key))
    }
}

fn identifier_of(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) if id.is_i64() || id.is_u64() => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier() {
        assert_eq!(json!({ "user_id": "alice" }).identifier("user_id"), Some("alice".into()));
        assert_eq!(json!({ "user_id": 12 }).identifier("user_id"), Some("12".into()));
        assert_eq!(json!({ "user_id": 1.5 }).identifier("user_id"), None);
        assert_eq!(json!({ "user_id": "" }).identifier("user_id"), None);
        assert_eq!(json!({ "id": "alice" }).identifier("user_id"), None);
        assert_eq!(json!("alice").identifier("user_id"), None);
    }

    #[test]
    fn test_map_subject() {
        let map = json!({ "user_id": "bob", "name": "Bob" }).as_object().unwrap().clone();
        assert_eq!(map.identifier("user_id"), Some("bob".into()));
        assert_eq!(map.to_map()["name"], "Bob");
    }
}
