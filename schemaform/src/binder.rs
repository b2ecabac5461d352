//! The canonical form data tree.
//!
//! [`DataBinder`] is the single source of truth for form data. Field
//! containers in the rendered tree are a view of it. Field identifiers reach
//! the binder in three shapes (a registered `schema-id`, a dotted canonical
//! path, or a structural name `field-<segment>-<segment>-...`) and are all
//! normalised to a canonical path before use.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::schema::{
    SchemaNode,
    path::{self, Segment},
};
use crate::tree::FieldKind;

const STRUCTURAL_PREFIX: &str = "field-";

/// Owner of the nested form data tree.
#[derive(Debug, Clone)]
pub struct DataBinder {
    data: Value,
    initial: Value,
    schema_ids: HashMap<String, String>,
}

impl Default for DataBinder {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl DataBinder {
    /// Create a binder whose initial (and reset) state is `initial`.
    ///
    /// Anything but an object is replaced by `{}`.
    pub fn new(initial: Value) -> Self {
        let initial = match initial {
            Value::Object(_) => initial,
            _ => Value::Object(Map::new()),
        };
        DataBinder {
            data: initial.clone(),
            initial,
            schema_ids: HashMap::new(),
        }
    }

    /// Map an explicit `schema-id` to a canonical path.
    pub fn register_schema_id(&mut self, schema_id: &str, path: &str) {
        self.schema_ids
            .insert(schema_id.to_string(), path.to_string());
    }

    /// Normalise a field identifier to its canonical path.
    pub fn canonical_path(&self, field_id: &str) -> String {
        if let Some(path) = self.schema_ids.get(field_id) {
            return path.clone();
        }
        if let Some(rest) = field_id.strip_prefix(STRUCTURAL_PREFIX) {
            return rest
                .split('-')
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(".");
        }
        field_id.to_string()
    }

    /// Coerce a raw control value and store it. Returns the canonical path
    /// and the stored value.
    pub fn update_from_field(
        &mut self,
        field_id: &str,
        raw: &Value,
        kind: FieldKind,
    ) -> (String, Value) {
        let path = self.canonical_path(field_id);
        let value = kind.read_value(raw);
        debug!("bind {field_id} -> {path} = {value}");
        self.set(&path, value.clone());
        (path, value)
    }

    /// Value at a canonical path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path::lookup(&self.data, path)
    }

    /// Store `value` at a canonical path, creating intermediate levels.
    ///
    /// An intermediate level holding a scalar is replaced by a fresh object
    /// (or array), and the scalar is lost. An index may overwrite an item or
    /// append one; writes further past the end of an array are ignored.
    pub fn set(&mut self, path: &str, value: Value) {
        let segments = path::segments(path);
        if segments.is_empty() {
            warn!("ignoring write to empty path");
            return;
        }
        if let Some((index, len)) = index_out_of_range(&self.data, &segments) {
            warn!("ignoring write to {path}: index {index} past array of {len} item(s)");
            return;
        }

        let mut current = &mut self.data;
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            current = match *segment {
                Segment::Key(key) => {
                    if !current.is_object() {
                        if !current.is_null() {
                            warn!("overwriting non-object {current} on the way to {path}");
                        }
                        *current = Value::Object(Map::new());
                    }
                    let Value::Object(map) = current else {
                        return;
                    };
                    if last {
                        map.insert(key.to_string(), value);
                        return;
                    }
                    map.entry(key.to_string()).or_insert(Value::Null)
                }
                Segment::Index(index) => {
                    if !current.is_array() {
                        if !current.is_null() {
                            warn!("overwriting non-array {current} on the way to {path}");
                        }
                        *current = Value::Array(Vec::new());
                    }
                    let Value::Array(items) = current else {
                        return;
                    };
                    if items.len() == index {
                        items.push(Value::Null);
                    }
                    if last {
                        items[index] = value;
                        return;
                    }
                    &mut items[index]
                }
            };
        }
    }

    /// Store every `path -> value` entry of `values`.
    pub fn set_many(&mut self, values: &Map<String, Value>) {
        for (path, value) in values {
            self.set(path, value.clone());
        }
    }

    /// Borrow the live tree.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// A deep, independent snapshot of the data tree.
    pub fn to_tree(&self) -> Value {
        self.data.clone()
    }

    /// Restore the initial tree.
    pub fn reset(&mut self) {
        self.data = self.initial.clone();
    }

    /// Fill the tree from schema `default`s and then `content` (values read
    /// from already-rendered fields), and make the result the initial state.
    pub fn seed(&mut self, schema: Option<&SchemaNode>, content: &[(String, Value)]) {
        if let Some(schema) = schema {
            collect_defaults(schema, "", &mut |path: &str, value: &Value| {
                self.set(path, value.clone())
            });
        }
        for (path, value) in content {
            self.set(path, value.clone());
        }
        self.initial = self.data.clone();
    }
}

/// The first index along `segments` that would leave a gap, with the length
/// of the array it addresses. Non-array levels count as empty arrays.
fn index_out_of_range(data: &Value, segments: &[Segment<'_>]) -> Option<(usize, usize)> {
    let mut current = Some(data);
    for segment in segments {
        current = match *segment {
            Segment::Key(key) => current.and_then(|v| v.get(key)),
            Segment::Index(index) => {
                let len = current.and_then(Value::as_array).map_or(0, Vec::len);
                if index > len {
                    return Some((index, len));
                }
                current.and_then(|v| v.get(index))
            }
        };
    }
    None
}

fn collect_defaults(node: &SchemaNode, scope: &str, sink: &mut dyn FnMut(&str, &Value)) {
    for (name, prop) in &node.properties {
        let path = path::join(scope, name);
        if let Some(default) = &prop.default_value {
            sink(&path, default);
        } else if prop.is_object() {
            collect_defaults(prop, &path, sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_path_shapes() {
        let mut binder = DataBinder::default();
        binder.register_schema_id("phone-input", "additionalInfo.phone");

        assert_eq!(binder.canonical_path("field-additionalInfo-phone"), "additionalInfo.phone");
        assert_eq!(binder.canonical_path("additionalInfo.phone"), "additionalInfo.phone");
        assert_eq!(binder.canonical_path("phone-input"), "additionalInfo.phone");
        assert_eq!(binder.canonical_path("email"), "email");
    }

    #[test]
    fn test_structural_name_updates_nested_path() {
        let mut binder = DataBinder::default();
        let (path, value) =
            binder.update_from_field("field-additionalInfo-phone", &json!("555-0100"), FieldKind::Text);
        assert_eq!(path, "additionalInfo.phone");
        assert_eq!(value, json!("555-0100"));
        assert_eq!(binder.to_tree()["additionalInfo"]["phone"], json!("555-0100"));
    }

    #[test]
    fn test_coercion_by_kind() {
        let mut binder = DataBinder::default();
        binder.update_from_field("age", &json!("abc"), FieldKind::Number);
        assert_eq!(binder.get("age"), Some(&Value::Null));
        binder.update_from_field("agree", &json!("on"), FieldKind::Checkbox);
        assert_eq!(binder.get("agree"), Some(&json!(true)));
    }

    #[test]
    fn test_set_get_round_trip() {
        let mut binder = DataBinder::default();
        binder.set("a.b.c", json!(1));
        binder.set("list[0]", json!("first"));
        binder.set("list[1].name", json!("x"));
        assert_eq!(binder.get("a.b.c"), Some(&json!(1)));
        assert_eq!(binder.get("list[1].name"), Some(&json!("x")));
        assert_eq!(binder.get("list[0]"), Some(&json!("first")));
    }

    #[test]
    fn test_set_ignores_index_past_the_end() {
        let mut binder = DataBinder::default();
        binder.set("list[18446744073709551615]", json!(1));
        binder.set("list[4000000000]", json!(1));
        binder.set("deep.list[2].name", json!("x"));
        assert_eq!(binder.to_tree(), json!({}));

        binder.set("list[0]", json!("a"));
        binder.set("list[5]", json!("b"));
        assert_eq!(binder.get("list"), Some(&json!(["a"])));
        binder.set("list[0]", json!("c"));
        binder.set("list[1]", json!("d"));
        assert_eq!(binder.get("list"), Some(&json!(["c", "d"])));
    }

    #[test]
    fn test_set_overwrites_scalar_intermediate() {
        // lossy on purpose: the old scalar is discarded
        let mut binder = DataBinder::new(json!({"a": 5}));
        binder.set("a.b", json!(true));
        assert_eq!(binder.to_tree(), json!({"a": {"b": true}}));
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut binder = DataBinder::default();
        binder.set("x", json!(1));
        let mut snapshot = binder.to_tree();
        snapshot["x"] = json!(2);
        assert_eq!(binder.get("x"), Some(&json!(1)));
    }

    #[test]
    fn test_seed_and_reset() {
        let schema = SchemaNode::from_value(&json!({
            "properties": {
                "country": {"default": "NL"},
                "prefs": {"properties": {"lang": {"default": "nl"}}}
            }
        }))
        .unwrap();
        let mut binder = DataBinder::default();
        binder.seed(Some(&schema), &[("name".to_string(), json!("Ada"))]);
        assert_eq!(binder.get("prefs.lang"), Some(&json!("nl")));

        binder.set("country", json!("DE"));
        binder.reset();
        assert_eq!(
            binder.to_tree(),
            json!({"country": "NL", "prefs": {"lang": "nl"}, "name": "Ada"})
        );
    }
}
