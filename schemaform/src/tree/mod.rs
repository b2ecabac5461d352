//! The rendered field tree, seen through a capability interface.
//!
//! The runtime never touches a rendering surface directly. Everything it needs
//! from the rendered form (finding a field container by schema path, toggling
//! classes and attributes, cloning array templates, reading input values) goes
//! through [`FieldTree`]. [`memory::MemoryTree`] is the in-memory
//! implementation used by the CLI and the tests.
//!
//! ## Markup contract
//!
//! - A field container carries a `schema-path` attribute equal to its
//!   canonical dotted path.
//! - Inputs are `input`, `select` or `textarea` nodes addressed by `name`,
//!   `id` or `schema-id`; their `kind` attribute picks a [`FieldKind`].
//! - An array container (class `array-container`, attribute `array-id`) holds a
//!   live items region (`array-items`), one hidden template (`array-template`)
//!   wrapping an inner `array-item`, and an add affordance (`array-add`).

use serde_json::Value;

/// In-memory field tree.
pub mod memory;

pub use memory::MemoryTree;

pub const ATTR_SCHEMA_PATH: &str = "schema-path";
pub const ATTR_NAME: &str = "name";
pub const ATTR_ID: &str = "id";
pub const ATTR_SCHEMA_ID: &str = "schema-id";
pub const ATTR_FOR: &str = "for";
pub const ATTR_KIND: &str = "kind";
pub const ATTR_REQUIRED: &str = "required";
pub const ATTR_ARRAY_ID: &str = "array-id";
pub const ATTR_ITEM_ID: &str = "item-id";
pub const ATTR_ORDINAL: &str = "item-ordinal";
/// Name of an array item input before its item suffix was appended.
pub const ATTR_LOCAL_NAME: &str = "local-name";

pub const CLASS_HIDDEN: &str = "hidden";
pub const CLASS_ARRAY: &str = "array-container";
pub const CLASS_ITEMS: &str = "array-items";
pub const CLASS_ITEM: &str = "array-item";
pub const CLASS_TEMPLATE: &str = "array-template";
pub const CLASS_ADD: &str = "array-add";
pub const CLASS_REMOVE: &str = "array-remove";
pub const CLASS_REQUIRED_BADGE: &str = "required-badge";

/// Handle to a node of a [`FieldTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

/// How an input's raw value is read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    Checkbox,
    Number,
    MultiSelect,
    #[default]
    Text,
}

impl FieldKind {
    /// Resolve the kind from an input's `kind` attribute.
    pub fn from_attribute(kind: Option<&str>) -> Self {
        match kind.map(str::to_ascii_lowercase).as_deref() {
            Some("checkbox" | "toggle" | "switch") => FieldKind::Checkbox,
            Some("number" | "range" | "integer") => FieldKind::Number,
            Some("select-multiple" | "multiselect") => FieldKind::MultiSelect,
            _ => FieldKind::Text,
        }
    }

    /// The attribute value that resolves back to this kind.
    pub fn as_attribute(self) -> &'static str {
        match self {
            FieldKind::Checkbox => "checkbox",
            FieldKind::Number => "number",
            FieldKind::MultiSelect => "select-multiple",
            FieldKind::Text => "text",
        }
    }

    /// Coerce a raw control value into a form data value.
    ///
    /// Number parsing never fails: unparsable input becomes `null`.
    pub fn read_value(self, raw: &Value) -> Value {
        match self {
            FieldKind::Checkbox => Value::Bool(match raw {
                Value::Bool(b) => *b,
                Value::String(s) => matches!(
                    s.trim().to_ascii_lowercase().as_str(),
                    "true" | "on" | "1" | "checked" | "yes"
                ),
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                _ => false,
            }),
            FieldKind::Number => match raw {
                Value::Number(_) => raw.clone(),
                Value::String(s) => parse_number(s),
                _ => Value::Null,
            },
            FieldKind::MultiSelect => match raw {
                Value::Array(items) => Value::Array(items.clone()),
                Value::Null => Value::Array(Vec::new()),
                Value::String(s) if s.is_empty() => Value::Array(Vec::new()),
                other => Value::Array(vec![other.clone()]),
            },
            FieldKind::Text => match raw {
                Value::String(_) => raw.clone(),
                Value::Null => Value::String(String::new()),
                other => Value::String(other.to_string()),
            },
        }
    }

    /// Render a form data value back into the control's representation.
    pub fn write_value(self, value: &Value) -> Value {
        match (self, value) {
            (FieldKind::Checkbox, v) => Value::Bool(v.as_bool().unwrap_or(false)),
            (FieldKind::Number, Value::Number(_)) => value.clone(),
            (FieldKind::Number, _) => Value::String(String::new()),
            (FieldKind::MultiSelect, Value::Array(_)) => value.clone(),
            (FieldKind::MultiSelect, _) => Value::Array(Vec::new()),
            (FieldKind::Text, Value::String(_)) => value.clone(),
            (FieldKind::Text, Value::Null) => Value::String(String::new()),
            (FieldKind::Text, other) => Value::String(other.to_string()),
        }
    }
}

fn parse_number(s: &str) -> Value {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Value::Number(i.into());
    }
    s.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Capability interface over a rendered form.
///
/// Operations on a node that no longer exists are no-ops.
pub trait FieldTree {
    fn root(&self) -> NodeId;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn children(&self, node: NodeId) -> Vec<NodeId>;
    fn tag(&self, node: NodeId) -> Option<&str>;
    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String>;
    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str);
    fn remove_attribute(&mut self, node: NodeId, name: &str);
    fn has_class(&self, node: NodeId, class: &str) -> bool;
    fn add_class(&mut self, node: NodeId, class: &str);
    fn remove_class(&mut self, node: NodeId, class: &str);
    /// Deep-copy a subtree. The copy is detached until appended.
    fn clone_subtree(&mut self, node: NodeId) -> Option<NodeId>;
    /// Attach `child` as the last child of `parent`, detaching it first.
    fn append_child(&mut self, parent: NodeId, child: NodeId);
    /// Detach and drop a subtree.
    fn remove(&mut self, node: NodeId);
    fn value(&self, node: NodeId) -> Option<Value>;
    fn set_value(&mut self, node: NodeId, value: Value);

    /// All nodes below `node` in document order.
    fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).into_iter().rev().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).into_iter().rev());
        }
        out
    }

    /// Nearest strict ancestor carrying `class`.
    fn ancestor_with_class(&self, node: NodeId, class: &str) -> Option<NodeId> {
        let mut current = self.parent(node);
        while let Some(n) = current {
            if self.has_class(n, class) {
                return Some(n);
            }
            current = self.parent(n);
        }
        None
    }

    /// Returns true if the node sits inside an array template.
    fn in_template(&self, node: NodeId) -> bool {
        self.has_class(node, CLASS_TEMPLATE) || self.ancestor_with_class(node, CLASS_TEMPLATE).is_some()
    }

    /// The field container for a canonical path, ignoring templates.
    fn find_by_path(&self, path: &str) -> Option<NodeId> {
        let root = self.root();
        std::iter::once(root)
            .chain(self.descendants(root))
            .find(|&n| {
                self.get_attribute(n, ATTR_SCHEMA_PATH).as_deref() == Some(path) && !self.in_template(n)
            })
    }

    fn is_input(&self, node: NodeId) -> bool {
        matches!(self.tag(node), Some("input" | "select" | "textarea"))
    }

    /// Inputs inside `node` in document order.
    fn inputs_within(&self, node: NodeId) -> Vec<NodeId> {
        self.descendants(node)
            .into_iter()
            .filter(|&n| self.is_input(n))
            .collect()
    }

    /// Live input addressed by `name`, `schema-id` or `id`.
    fn find_input(&self, key: &str) -> Option<NodeId> {
        self.inputs_within(self.root()).into_iter().find(|&n| {
            [ATTR_NAME, ATTR_SCHEMA_ID, ATTR_ID]
                .iter()
                .any(|attr| self.get_attribute(n, attr).as_deref() == Some(key))
                && !self.in_template(n)
        })
    }

    /// The input's kind, from its `kind` attribute.
    fn field_kind(&self, input: NodeId) -> FieldKind {
        FieldKind::from_attribute(self.get_attribute(input, ATTR_KIND).as_deref())
    }
}
