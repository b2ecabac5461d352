//! Canonical dotted paths.
//!
//! Schema nodes are addressed as `a.b.c` for properties, `a.items` for array
//! item schemas and `a.if`, `a.then`, `a.allOf[0]` for conditional keywords.
//! Data is addressed the same way, with `[n]` selecting array elements.
//!
//! [`PathResolver`] builds both maps from a schema: every schema node path,
//! and the subset of paths that name a form field.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::SchemaNode;

/// Kind of schema node a path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// A named property.
    Property,
    /// The item schema of an array.
    Items,
    /// A conditional keyword (`if`, `then`, `else`, `allOf[n]`, ...).
    Keyword,
}

/// One step of a dotted data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Join a scope and a name with a dot, treating an empty scope as the root.
pub fn join(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

/// Split `a.b[0].c` into its segments.
///
/// A bracket suffix that is not a valid index is kept as part of the key.
pub fn segments(path: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    for part in path.split('.').filter(|p| !p.is_empty()) {
        let Some(open) = part.find('[') else {
            out.push(Segment::Key(part));
            continue;
        };
        let mut indices = Vec::new();
        let mut rest = &part[open..];
        while let Some(stripped) = rest.strip_prefix('[') {
            let Some(close) = stripped.find(']') else {
                break;
            };
            match stripped[..close].parse::<usize>() {
                Ok(i) => indices.push(i),
                Err(_) => break,
            }
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            out.push(Segment::Key(part));
            continue;
        }
        if open > 0 {
            out.push(Segment::Key(&part[..open]));
        }
        out.extend(indices.into_iter().map(Segment::Index));
    }
    out
}

/// Read the value at `path`. Missing levels resolve to `None`.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in segments(path) {
        current = match (segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(k)?,
            (Segment::Index(i), Value::Array(items)) => items.get(i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Map from canonical paths to schema nodes and form fields.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    nodes: BTreeMap<String, PathKind>,
    fields: BTreeMap<String, SchemaNode>,
    arrays: BTreeSet<String>,
    required: BTreeSet<String>,
}

impl PathResolver {
    /// Build the path map for a schema.
    pub fn build(root: &SchemaNode) -> Self {
        let mut resolver = PathResolver::default();
        resolver.walk(root, "", Some(""), true);
        resolver
    }

    fn walk(&mut self, node: &SchemaNode, node_path: &str, scope: Option<&str>, plain: bool) {
        for (name, sub) in &node.properties {
            let np = join(node_path, name);
            self.nodes.insert(np.clone(), PathKind::Property);
            let field = scope.map(|s| join(s, name));
            if let Some(field) = &field {
                // the plain declaration wins over one inside a keyword block
                self.fields
                    .entry(field.clone())
                    .or_insert_with(|| sub.clone());
                if plain && node.required.contains(name) {
                    self.required.insert(field.clone());
                }
                if sub.is_array() {
                    self.arrays.insert(field.clone());
                }
            }
            self.walk(sub, &np, field.as_deref(), plain);
        }

        if let Some(items) = &node.items {
            let np = join(node_path, "items");
            self.nodes.insert(np.clone(), PathKind::Items);
            self.walk(items, &np, None, false);
        }

        if let Some(predicate) = &node.if_schema {
            let np = join(node_path, "if");
            self.nodes.insert(np.clone(), PathKind::Keyword);
            // predicates test fields, they do not declare them
            self.walk(predicate, &np, None, false);
        }
        for (keyword, branch) in [("then", &node.then_schema), ("else", &node.else_schema)] {
            if let Some(branch) = branch {
                let np = join(node_path, keyword);
                self.nodes.insert(np.clone(), PathKind::Keyword);
                self.walk(branch, &np, scope, false);
            }
        }
        for (keyword, list) in [
            ("allOf", &node.all_of),
            ("anyOf", &node.any_of),
            ("oneOf", &node.one_of),
        ] {
            for (i, item) in list.iter().enumerate() {
                let np = join(node_path, &format!("{keyword}[{i}]"));
                self.nodes.insert(np.clone(), PathKind::Keyword);
                self.walk(item, &np, scope, false);
            }
        }
        for (key, dependency) in &node.dependencies {
            let np = join(node_path, &format!("dependencies.{key}"));
            self.nodes.insert(np.clone(), PathKind::Keyword);
            self.walk(&dependency.to_schema(), &np, scope, false);
        }
    }

    /// Returns the kind of schema node at `path`, if any.
    pub fn kind(&self, path: &str) -> Option<PathKind> {
        self.nodes.get(path).copied()
    }

    /// Returns true if `path` addresses a schema node.
    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    /// Returns true if `path` names a form field.
    pub fn is_field(&self, path: &str) -> bool {
        self.fields.contains_key(path)
    }

    /// Schema of the field at `path`.
    pub fn field_schema(&self, path: &str) -> Option<&SchemaNode> {
        self.fields.get(path)
    }

    /// All field paths, outside array items.
    pub fn field_paths(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Field paths whose schema is an array.
    pub fn array_paths(&self) -> impl Iterator<Item = &str> {
        self.arrays.iter().map(String::as_str)
    }

    /// Returns true if the field is listed in its parent's `required`,
    /// outside any conditional block.
    pub fn is_declared_required(&self, path: &str) -> bool {
        self.required.contains(path)
    }

    /// Number of schema node paths.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no schema has been resolved.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
