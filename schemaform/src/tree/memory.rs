//! Arena-backed in-memory field tree and schema scaffolding.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::*;
use crate::schema::{PathResolver, SchemaNode};

#[derive(Debug, Clone, Default)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    classes: BTreeSet<String>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    value: Option<Value>,
}

/// Arena-backed [`FieldTree`].
#[derive(Debug, Clone)]
pub struct MemoryTree {
    nodes: Vec<Option<Node>>,
    root: NodeId,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Nodes created for one array container.
#[derive(Debug, Clone, Copy)]
pub struct ArrayParts {
    pub container: NodeId,
    pub items: NodeId,
    /// The inner `array-item` of the template, to be filled with fields.
    pub template_item: NodeId,
    pub add: NodeId,
}

impl MemoryTree {
    /// An empty tree with a `form` root.
    pub fn new() -> Self {
        MemoryTree {
            nodes: vec![Some(Node {
                tag: "form".to_string(),
                ..Default::default()
            })],
            root: NodeId(0),
        }
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Create a detached node.
    pub fn create(&mut self, tag: &str) -> NodeId {
        self.nodes.push(Some(Node {
            tag: tag.to_string(),
            ..Default::default()
        }));
        NodeId(self.nodes.len() - 1)
    }

    /// Create a node as the last child of `parent`.
    pub fn element(&mut self, parent: NodeId, tag: &str) -> NodeId {
        let id = self.create(tag);
        self.append_child(parent, id);
        id
    }

    /// A field container for `path`.
    pub fn container(&mut self, parent: NodeId, path: &str) -> NodeId {
        let id = self.element(parent, "div");
        self.set_attribute(id, ATTR_SCHEMA_PATH, path);
        id
    }

    /// An input named `name` (also used as its id).
    pub fn input(&mut self, parent: NodeId, name: &str, kind: FieldKind) -> NodeId {
        let id = self.element(parent, "input");
        self.set_attribute(id, ATTR_NAME, name);
        self.set_attribute(id, ATTR_ID, name);
        self.set_attribute(id, ATTR_KIND, kind.as_attribute());
        id
    }

    /// A label bound to the input with id `for_id`.
    pub fn label(&mut self, parent: NodeId, for_id: &str) -> NodeId {
        let id = self.element(parent, "label");
        self.set_attribute(id, ATTR_FOR, for_id);
        id
    }

    /// A hidden "required" badge.
    pub fn required_badge(&mut self, parent: NodeId) -> NodeId {
        let id = self.element(parent, "span");
        self.add_class(id, CLASS_REQUIRED_BADGE);
        self.add_class(id, CLASS_HIDDEN);
        id
    }

    /// An array container for `path` with an empty template item.
    pub fn array_container(&mut self, parent: NodeId, path: &str) -> ArrayParts {
        let container = self.container(parent, path);
        self.add_class(container, CLASS_ARRAY);
        self.set_attribute(container, ATTR_ARRAY_ID, path);

        let items = self.element(container, "div");
        self.add_class(items, CLASS_ITEMS);

        let template = self.element(container, "div");
        self.add_class(template, CLASS_TEMPLATE);
        self.add_class(template, CLASS_HIDDEN);
        let template_item = self.element(template, "div");
        self.add_class(template_item, CLASS_ITEM);
        let remove = self.element(template_item, "button");
        self.add_class(remove, CLASS_REMOVE);

        let add = self.element(container, "button");
        self.add_class(add, CLASS_ADD);

        ArrayParts {
            container,
            items,
            template_item,
            add,
        }
    }

    /// Number of live nodes, detached ones included.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Returns true if only the root exists.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Render a minimal field tree for a schema.
    ///
    /// Every field path the resolver knows gets a container; leaves get a
    /// label, an input named `field-<segment>-...` with the canonical path as
    /// its `schema-id`, and a required badge. Arrays get a container whose
    /// template holds the item fields, addressed by their local names.
    pub fn scaffold(schema: &SchemaNode) -> Self {
        let resolver = PathResolver::build(schema);
        let mut tree = MemoryTree::new();
        let mut arrays: Vec<String> = Vec::new();

        for path in resolver.field_paths() {
            if arrays.iter().any(|a| path.starts_with(&format!("{a}."))) {
                continue;
            }
            let Some(node) = resolver.field_schema(path) else {
                continue;
            };
            let parent = match path.rsplit_once('.') {
                Some((parent, _)) => tree.find_by_path(parent).unwrap_or(tree.root),
                None => tree.root,
            };

            if let Some(items) = node.items.as_deref().filter(|_| !is_multi_select(node)) {
                let parts = tree.array_container(parent, path);
                tree.scaffold_item(parts.template_item, items, path);
                arrays.push(path.to_string());
            } else if node.is_object() {
                tree.container(parent, path);
            } else {
                let container = tree.container(parent, path);
                let name = format!("field-{}", path.replace('.', "-"));
                tree.label(container, &name);
                let input = tree.input(container, &name, leaf_kind(node));
                tree.set_attribute(input, ATTR_SCHEMA_ID, path);
                tree.required_badge(container);
            }
        }
        tree
    }

    fn scaffold_item(&mut self, item: NodeId, items: &SchemaNode, array_path: &str) {
        let base = format!("{array_path}.items");
        if !items.is_object() {
            let input = self.input(item, "value", leaf_kind(items));
            self.label(item, "value");
            self.set_attribute(input, ATTR_LOCAL_NAME, "value");
            return;
        }
        for (name, prop) in &items.properties {
            let path = format!("{base}.{name}");
            match prop.items.as_deref() {
                Some(nested) if !is_multi_select(prop) => {
                    let parts = self.array_container(item, &path);
                    self.scaffold_item(parts.template_item, nested, &path);
                }
                _ => {
                    let container = self.container(item, &path);
                    self.label(container, name);
                    let input = self.input(container, name, leaf_kind(prop));
                    self.set_attribute(input, ATTR_LOCAL_NAME, name);
                }
            }
        }
    }
}

fn is_multi_select(node: &SchemaNode) -> bool {
    node.items
        .as_deref()
        .is_some_and(|items| items.enum_values.is_some())
}

fn leaf_kind(node: &SchemaNode) -> FieldKind {
    if is_multi_select(node) {
        return FieldKind::MultiSelect;
    }
    match node.ty.as_ref().and_then(|t| t.primary()) {
        Some("boolean") => FieldKind::Checkbox,
        Some("number" | "integer") => FieldKind::Number,
        _ => FieldKind::Text,
    }
}

impl FieldTree for MemoryTree {
    fn root(&self) -> NodeId {
        self.root
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node)?.parent
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.node(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn tag(&self, node: NodeId) -> Option<&str> {
        self.node(node).map(|n| n.tag.as_str())
    }

    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.node(node)?.attributes.get(name).cloned()
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(n) = self.node_mut(node) {
            n.attributes.insert(name.to_string(), value.to_string());
        }
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) {
        if let Some(n) = self.node_mut(node) {
            n.attributes.remove(name);
        }
    }

    fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.node(node).is_some_and(|n| n.classes.contains(class))
    }

    fn add_class(&mut self, node: NodeId, class: &str) {
        if let Some(n) = self.node_mut(node) {
            n.classes.insert(class.to_string());
        }
    }

    fn remove_class(&mut self, node: NodeId, class: &str) {
        if let Some(n) = self.node_mut(node) {
            n.classes.remove(class);
        }
    }

    fn clone_subtree(&mut self, node: NodeId) -> Option<NodeId> {
        let source = self.node(node)?.clone();
        let copy = self.create(&source.tag);
        if let Some(n) = self.node_mut(copy) {
            n.attributes = source.attributes;
            n.classes = source.classes;
            n.value = source.value;
        }
        for child in source.children {
            if let Some(child_copy) = self.clone_subtree(child) {
                self.append_child(copy, child_copy);
            }
        }
        Some(copy)
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if self.node(parent).is_none() || self.node(child).is_none() || parent == child {
            return;
        }
        if let Some(old) = self.parent(child)
            && let Some(n) = self.node_mut(old)
        {
            n.children.retain(|&c| c != child);
        }
        if let Some(n) = self.node_mut(child) {
            n.parent = Some(parent);
        }
        if let Some(n) = self.node_mut(parent) {
            n.children.push(child);
        }
    }

    fn remove(&mut self, node: NodeId) {
        if node == self.root {
            return;
        }
        if let Some(parent) = self.parent(node)
            && let Some(n) = self.node_mut(parent)
        {
            n.children.retain(|&c| c != node);
        }
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(n) = self.nodes.get_mut(id.0).and_then(Option::take) {
                stack.extend(n.children);
            }
        }
    }

    fn value(&self, node: NodeId) -> Option<Value> {
        self.node(node)?.value.clone()
    }

    fn set_value(&mut self, node: NodeId, value: Value) {
        if let Some(n) = self.node_mut(node) {
            n.value = Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clone_and_remove() {
        let mut tree = MemoryTree::new();
        let root = tree.root();
        let a = tree.container(root, "a");
        let input = tree.input(a, "a", FieldKind::Text);
        tree.set_value(input, json!("x"));

        let copy = tree.clone_subtree(a).unwrap();
        assert_eq!(tree.parent(copy), None);
        let copied_input = tree.children(copy)[0];
        assert_eq!(tree.value(copied_input), Some(json!("x")));

        tree.append_child(root, copy);
        assert_eq!(tree.children(root), vec![a, copy]);

        tree.remove(a);
        assert_eq!(tree.children(root), vec![copy]);
        assert_eq!(tree.tag(input), None);
        assert_eq!(tree.find_by_path("a"), Some(copy));
    }

    #[test]
    fn test_find_by_path_skips_templates() {
        let mut tree = MemoryTree::new();
        let root = tree.root();
        let parts = tree.array_container(root, "list");
        tree.container(parts.template_item, "list.items.name");
        assert_eq!(tree.find_by_path("list"), Some(parts.container));
        assert_eq!(tree.find_by_path("list.items.name"), None);
    }

    #[test]
    fn test_scaffold() {
        let schema = SchemaNode::from_value(&json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "subscribe": {"type": "boolean"},
                "info": {"type": "object", "properties": {"phone": {"type": "string"}}},
                "tags": {"type": "array", "items": {"enum": ["a", "b"]}},
                "contacts": {
                    "type": "array",
                    "items": {"type": "object", "properties": {"email": {"type": "string"}}}
                }
            }
        }))
        .unwrap();
        let tree = MemoryTree::scaffold(&schema);

        let phone = tree.find_input("field-info-phone").unwrap();
        assert_eq!(tree.get_attribute(phone, ATTR_SCHEMA_ID).as_deref(), Some("info.phone"));
        assert!(tree.find_by_path("info").is_some());

        let subscribe = tree.find_input("subscribe").unwrap();
        assert_eq!(tree.field_kind(subscribe), FieldKind::Checkbox);
        let tags = tree.find_input("tags").unwrap();
        assert_eq!(tree.field_kind(tags), FieldKind::MultiSelect);

        let contacts = tree.find_by_path("contacts").unwrap();
        assert!(tree.has_class(contacts, CLASS_ARRAY));
        // template inputs are not live
        assert!(tree.find_input("email").is_none());
    }
}
