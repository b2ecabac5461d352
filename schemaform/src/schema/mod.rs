//! Schema model and conditional synthesis.
//!
//! The schema document is parsed once into a tree of [`SchemaNode`]s. A
//! pre-processing pass then flattens every conditional construct reachable
//! from the root (`if`/`then`/`else`, `allOf`, `anyOf`, `oneOf` and
//! `dependencies`) into a list of [`Conditional`]s, which is what the
//! conditional applier works from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path resolution and dotted path parsing.
pub mod path;

pub use path::PathResolver;

/// The `type` keyword, either a single type name or a union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    Single(String),
    Union(Vec<String>),
}

impl TypeSpec {
    /// Returns true if `name` is one of the declared types.
    pub fn is(&self, name: &str) -> bool {
        match self {
            TypeSpec::Single(t) => t == name,
            TypeSpec::Union(ts) => ts.iter().any(|t| t == name),
        }
    }

    /// The first non-`null` declared type.
    pub fn primary(&self) -> Option<&str> {
        match self {
            TypeSpec::Single(t) => Some(t.as_str()),
            TypeSpec::Union(ts) => ts.iter().map(String::as_str).find(|t| *t != "null"),
        }
    }
}

/// One node of a JSON-Schema-like document.
///
/// Unknown keywords are ignored on load. The node is immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchemaNode {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, SchemaNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaNode>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(rename = "const", skip_serializing_if = "Option::is_none")]
    pub const_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_schema: Option<Box<SchemaNode>>,
    #[serde(rename = "then", skip_serializing_if = "Option::is_none")]
    pub then_schema: Option<Box<SchemaNode>>,
    #[serde(rename = "else", skip_serializing_if = "Option::is_none")]
    pub else_schema: Option<Box<SchemaNode>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<SchemaNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<SchemaNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<SchemaNode>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, Dependency>,
    /// Extension keyword: when this node is applied as a consequence, form
    /// submission is disabled for the rest of the pass.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disable_submit: bool,
}

impl SchemaNode {
    /// Parse a schema node from a JSON value.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        SchemaNode::deserialize(value)
    }

    /// Returns true if the node describes an object.
    pub fn is_object(&self) -> bool {
        self.ty.as_ref().is_some_and(|t| t.is("object")) || !self.properties.is_empty()
    }

    /// Returns true if the node describes an array.
    pub fn is_array(&self) -> bool {
        self.ty.as_ref().is_some_and(|t| t.is("array")) || self.items.is_some()
    }

    /// Returns true if the node carries one of the keywords a predicate tests
    /// (`minimum`, `maximum`, `enum`, `const`).
    pub fn has_constraint(&self) -> bool {
        self.minimum.is_some()
            || self.maximum.is_some()
            || self.enum_values.is_some()
            || self.const_value.is_some()
    }

    /// Returns true if the node contains any conditional keyword, at this
    /// level or in a nested object property.
    pub fn has_conditionals(&self) -> bool {
        self.if_schema.is_some()
            || !self.all_of.is_empty()
            || !self.any_of.is_empty()
            || !self.one_of.is_empty()
            || !self.dependencies.is_empty()
            || self.properties.values().any(SchemaNode::has_conditionals)
    }
}

/// A `dependencies` entry in either of its JSON Schema forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dependency {
    /// `"a": ["b", "c"]`: when `a` is present, `b` and `c` are required.
    Fields(Vec<String>),
    /// `"a": { ... }`: when `a` is present, the schema applies.
    Schema(SchemaNode),
}

impl Dependency {
    /// The dependency expressed as a consequence schema.
    pub fn to_schema(&self) -> SchemaNode {
        match self {
            Dependency::Fields(fields) => SchemaNode {
                required: fields.clone(),
                ..Default::default()
            },
            Dependency::Schema(node) => node.clone(),
        }
    }
}

/// Where a conditional came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionalKind {
    IfThenElse,
    AllOfItem,
    AnyOfItem,
    OneOfItem,
    Dependency,
}

impl ConditionalKind {
    /// Evaluation order: root `if`, then `allOf`, then the discriminated
    /// choices, then dependencies.
    fn rank(self) -> u8 {
        match self {
            ConditionalKind::IfThenElse => 0,
            ConditionalKind::AllOfItem => 1,
            ConditionalKind::AnyOfItem | ConditionalKind::OneOfItem => 2,
            ConditionalKind::Dependency => 3,
        }
    }

    /// True for branches of a discriminated choice.
    pub fn is_choice(self) -> bool {
        matches!(self, ConditionalKind::AnyOfItem | ConditionalKind::OneOfItem)
    }
}

/// A flattened conditional rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    pub kind: ConditionalKind,
    /// Data path of the object the rule was declared on (empty for the root).
    pub scope: String,
    /// Schema path of the declaring keyword, e.g. `allOf[1]` or `billing.if`.
    pub origin: String,
    /// Branches of one `anyOf`/`oneOf` keyword share a group.
    pub group: Option<usize>,
    /// `None` means the rule applies unconditionally.
    pub predicate: Option<SchemaNode>,
    pub consequence: SchemaNode,
    pub alternative: Option<SchemaNode>,
}

/// Flatten every conditional reachable from `root` into evaluation order.
///
/// Object properties are descended into; array `items` are not, since their
/// fields have no single data path.
pub fn synthesize(root: &SchemaNode) -> Vec<Conditional> {
    let mut out = Vec::new();
    let mut next_group = 0;
    collect(root, "", &mut out, &mut next_group);
    // stable: declaration order is kept within a rank
    out.sort_by_key(|c| c.kind.rank());
    out
}

fn collect(node: &SchemaNode, scope: &str, out: &mut Vec<Conditional>, next_group: &mut usize) {
    if let Some(predicate) = &node.if_schema {
        out.push(Conditional {
            kind: ConditionalKind::IfThenElse,
            scope: scope.to_string(),
            origin: path::join(scope, "if"),
            group: None,
            predicate: Some((**predicate).clone()),
            consequence: node.then_schema.as_deref().cloned().unwrap_or_default(),
            alternative: node.else_schema.as_deref().cloned(),
        });
    }

    for (i, item) in node.all_of.iter().enumerate() {
        let origin = path::join(scope, &format!("allOf[{i}]"));
        let conditional = match &item.if_schema {
            Some(predicate) => Conditional {
                kind: ConditionalKind::AllOfItem,
                scope: scope.to_string(),
                origin,
                group: None,
                predicate: Some((**predicate).clone()),
                consequence: item.then_schema.as_deref().cloned().unwrap_or_default(),
                alternative: item.else_schema.as_deref().cloned(),
            },
            None => Conditional {
                kind: ConditionalKind::AllOfItem,
                scope: scope.to_string(),
                origin,
                group: None,
                predicate: None,
                consequence: item.clone(),
                alternative: None,
            },
        };
        out.push(conditional);
    }

    for (keyword, kind, branches) in [
        ("anyOf", ConditionalKind::AnyOfItem, &node.any_of),
        ("oneOf", ConditionalKind::OneOfItem, &node.one_of),
    ] {
        if branches.is_empty() {
            continue;
        }
        let group = *next_group;
        *next_group += 1;
        for (i, branch) in branches.iter().enumerate() {
            let predicate = discriminators(branch);
            out.push(Conditional {
                kind,
                scope: scope.to_string(),
                origin: path::join(scope, &format!("{keyword}[{i}]")),
                group: Some(group),
                predicate: Some(predicate),
                consequence: branch.clone(),
                alternative: None,
            });
        }
    }

    for (key, dependency) in &node.dependencies {
        out.push(Conditional {
            kind: ConditionalKind::Dependency,
            scope: scope.to_string(),
            origin: path::join(scope, &format!("dependencies.{key}")),
            group: None,
            predicate: Some(SchemaNode {
                required: vec![key.clone()],
                ..Default::default()
            }),
            consequence: dependency.to_schema(),
            alternative: None,
        });
    }

    for (name, prop) in &node.properties {
        if prop.is_object() {
            collect(prop, &path::join(scope, name), out, next_group);
        }
    }
}

/// The predicate of a choice branch: its constrained properties, nested ones
/// included. The branch's `required` lists are consequences, not tests.
fn discriminators(branch: &SchemaNode) -> SchemaNode {
    let properties = branch
        .properties
        .iter()
        .filter_map(|(name, prop)| {
            if prop.has_constraint() {
                return Some((name.clone(), prop.clone()));
            }
            let nested = discriminators(prop);
            (!nested.properties.is_empty()).then(|| (name.clone(), nested))
        })
        .collect();
    SchemaNode {
        properties,
        ..Default::default()
    }
}
