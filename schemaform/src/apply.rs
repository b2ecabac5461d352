//! Turning conditionals into field directives.
//!
//! One pass over the form data works in three steps:
//!
//! 1. Every field is reset to its baseline: visible and required as declared,
//!    except fields that are conditional by convention (referenced by some
//!    conditional's consequence, not required outside conditionals and not a
//!    discriminator), which start hidden and optional.
//! 2. Conditionals are evaluated in order (`if`/`then`/`else`, `allOf`,
//!    `anyOf`/`oneOf`, `dependencies`) into a plan of [`Directive`]s. `allOf`
//!    entries are cumulative. Each `anyOf`/`oneOf` group is a discriminated
//!    choice: the first matching branch applies and every other branch is
//!    explicitly reversed, reversals first.
//! 3. The plan is applied through the [`VisibilityController`].
//!
//! Baseline changes are only applied to paths no directive touches, and only
//! when the container's state actually differs. Directives are always applied,
//! so a `show` of a visible field still records history.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use serde_json::Value;

use crate::{
    condition::{ConditionEvaluator, EmptyPredicate},
    event::EventBus,
    schema::{Conditional, PathResolver, SchemaNode, path, synthesize},
    tree::FieldTree,
    visibility::VisibilityController,
};

const BASELINE_REASON: &str = "baseline";

/// What a directive does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DirectiveAction {
    Show,
    Hide,
    Require,
    Unrequire,
    DisableSubmit,
    EnableSubmit,
}

/// One field-level outcome of evaluating a conditional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Directive {
    pub action: DirectiveAction,
    /// Target field; empty for the submit directives.
    pub path: String,
    pub reason: String,
}

impl Directive {
    fn new(action: DirectiveAction, path: &str, reason: &str) -> Self {
        Directive {
            action,
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct BaselineEntry {
    path: String,
    visible: bool,
    required: bool,
    object: bool,
}

/// Result of one applied pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub submit_enabled: bool,
    pub directives: usize,
}

/// Evaluates all conditionals of a schema and applies the result.
#[derive(Debug, Clone, Default)]
pub struct ConditionalApplier {
    conditionals: Vec<Conditional>,
    baseline: Vec<BaselineEntry>,
    fields: BTreeSet<String>,
    objects: BTreeSet<String>,
    conditional_fields: BTreeSet<String>,
    evaluator: ConditionEvaluator,
}

impl ConditionalApplier {
    pub fn new(schema: &SchemaNode, resolver: &PathResolver) -> Self {
        let conditionals = synthesize(schema);

        let mut referenced = BTreeSet::new();
        let mut discriminators = BTreeSet::new();
        for c in &conditionals {
            let Some(predicate) = &c.predicate else {
                continue;
            };
            collect_discriminators(predicate, &c.scope, &mut discriminators);
            for branch in std::iter::once(&c.consequence).chain(c.alternative.as_ref()) {
                for (p, _) in targets(branch, &c.scope) {
                    referenced.insert(p);
                }
            }
        }
        let conditional_fields: BTreeSet<String> = referenced
            .into_iter()
            .filter(|p| !resolver.is_declared_required(p) && !discriminators.contains(p))
            .collect();

        let mut fields = BTreeSet::new();
        let mut objects = BTreeSet::new();
        let mut baseline = Vec::new();
        for path in resolver.field_paths() {
            let object = resolver.field_schema(path).is_some_and(SchemaNode::is_object);
            let conditional = conditional_fields.contains(path);
            fields.insert(path.to_string());
            if object {
                objects.insert(path.to_string());
            }
            baseline.push(BaselineEntry {
                path: path.to_string(),
                visible: !conditional,
                required: resolver.is_declared_required(path) && !conditional,
                object,
            });
        }

        debug!(
            "{} conditional(s), {} conditional field(s)",
            conditionals.len(),
            conditional_fields.len()
        );

        ConditionalApplier {
            conditionals,
            baseline,
            fields,
            objects,
            conditional_fields,
            evaluator: ConditionEvaluator,
        }
    }

    /// The flattened conditionals, in evaluation order.
    pub fn conditionals(&self) -> &[Conditional] {
        &self.conditionals
    }

    /// Returns true if the field starts hidden until a conditional shows it.
    pub fn is_conditional_field(&self, path: &str) -> bool {
        self.conditional_fields.contains(path)
    }

    /// Evaluate every conditional against `data` into an ordered plan.
    pub fn plan(&self, data: &Value) -> Vec<Directive> {
        let mut plan = vec![Directive::new(DirectiveAction::EnableSubmit, "", BASELINE_REASON)];

        let mut i = 0;
        while i < self.conditionals.len() {
            let c = &self.conditionals[i];
            if c.kind.is_choice() {
                let end = self.conditionals[i..]
                    .iter()
                    .position(|b| b.group != c.group || !b.kind.is_choice())
                    .map_or(self.conditionals.len(), |n| i + n);
                self.plan_choice(&self.conditionals[i..end], data, &mut plan);
                i = end;
                continue;
            }

            let holds = match &c.predicate {
                Some(p) => self.evaluator.evaluate(p, data, &c.scope, EmptyPredicate::Fails),
                None => true,
            };
            debug!("{} ({:?}) -> {holds}", c.origin, c.kind);
            if holds {
                self.emit(&c.consequence, &c.scope, true, &format!("{}: condition met", c.origin), &mut plan);
            } else if let Some(alternative) = &c.alternative {
                self.emit(alternative, &c.scope, true, &format!("{}: condition not met", c.origin), &mut plan);
            }
            i += 1;
        }
        plan
    }

    fn plan_choice(&self, branches: &[Conditional], data: &Value, plan: &mut Vec<Directive>) {
        let selected = branches.iter().position(|b| {
            b.predicate
                .as_ref()
                .is_some_and(|p| self.evaluator.evaluate(p, data, &b.scope, EmptyPredicate::Fails))
        });
        debug!(
            "choice {:?}: selected {:?}",
            branches.first().map(|b| b.origin.as_str()),
            selected.map(|n| branches[n].origin.as_str())
        );

        for (n, b) in branches.iter().enumerate() {
            if Some(n) != selected {
                self.emit(&b.consequence, &b.scope, false, &format!("{}: not selected", b.origin), plan);
            }
        }
        if let Some(n) = selected {
            let b = &branches[n];
            self.emit(&b.consequence, &b.scope, true, &format!("{}: selected", b.origin), plan);
        }
    }

    fn emit(&self, node: &SchemaNode, scope: &str, apply: bool, reason: &str, plan: &mut Vec<Directive>) {
        if apply && node.disable_submit {
            plan.push(Directive::new(DirectiveAction::DisableSubmit, "", reason));
        }
        for (p, required) in targets(node, scope) {
            let leaf = !self.objects.contains(&p);
            if apply {
                plan.push(Directive::new(DirectiveAction::Show, &p, reason));
                if required && leaf {
                    plan.push(Directive::new(DirectiveAction::Require, &p, reason));
                }
            } else {
                plan.push(Directive::new(DirectiveAction::Hide, &p, reason));
                if leaf {
                    plan.push(Directive::new(DirectiveAction::Unrequire, &p, reason));
                }
            }
        }
    }

    /// Reset to baseline, evaluate every conditional and apply the plan.
    pub fn apply_all<T: FieldTree>(
        &self,
        data: &Value,
        tree: &mut T,
        visibility: &mut VisibilityController,
        bus: &EventBus,
    ) -> ApplyOutcome {
        let plan = self.plan(data);

        let shown_or_hidden = touched(&plan, &[DirectiveAction::Show, DirectiveAction::Hide]);
        let required_or_not = touched(&plan, &[DirectiveAction::Require, DirectiveAction::Unrequire]);

        for entry in &self.baseline {
            if !shown_or_hidden.contains(entry.path.as_str())
                && let Some(hidden) = visibility.is_hidden_marker(tree, &entry.path)
                && hidden == entry.visible
            {
                if entry.visible {
                    visibility.show(tree, bus, &entry.path, BASELINE_REASON);
                } else {
                    visibility.hide(tree, bus, &entry.path, BASELINE_REASON);
                }
            }
            if !entry.object && !required_or_not.contains(entry.path.as_str()) {
                if entry.required {
                    visibility.require(tree, &entry.path);
                } else {
                    visibility.unrequire(tree, &entry.path);
                }
            }
        }

        let mut outcome = ApplyOutcome {
            submit_enabled: true,
            directives: 0,
        };
        for d in &plan {
            match d.action {
                DirectiveAction::EnableSubmit => outcome.submit_enabled = true,
                DirectiveAction::DisableSubmit => outcome.submit_enabled = false,
                _ if !self.fields.contains(&d.path) => {
                    warn!("directive {:?} targets unknown field {} ({})", d.action, d.path, d.reason);
                    continue;
                }
                DirectiveAction::Show => visibility.show(tree, bus, &d.path, &d.reason),
                DirectiveAction::Hide => visibility.hide(tree, bus, &d.path, &d.reason),
                DirectiveAction::Require => visibility.require(tree, &d.path),
                DirectiveAction::Unrequire => visibility.unrequire(tree, &d.path),
            }
            outcome.directives += 1;
        }
        outcome
    }
}

fn touched<'a>(plan: &'a [Directive], actions: &[DirectiveAction]) -> HashSet<&'a str> {
    plan.iter()
        .filter(|d| actions.contains(&d.action))
        .map(|d| d.path.as_str())
        .collect()
}

/// Fields a consequence refers to, with whether it requires them. Properties
/// carrying a constraint keyword are discriminators and are skipped.
fn targets(node: &SchemaNode, scope: &str) -> Vec<(String, bool)> {
    let mut out: Vec<(String, bool)> = Vec::new();
    collect_targets(node, scope, &mut out);
    out
}

fn collect_targets(node: &SchemaNode, scope: &str, out: &mut Vec<(String, bool)>) {
    let mut add = |p: String, required: bool| match out.iter_mut().find(|(q, _)| *q == p) {
        Some(existing) => existing.1 |= required,
        None => out.push((p, required)),
    };
    for name in &node.required {
        add(path::join(scope, name), true);
    }
    for (name, sub) in &node.properties {
        if sub.has_constraint() {
            continue;
        }
        add(path::join(scope, name), false);
    }
    for (name, sub) in &node.properties {
        if !sub.has_constraint() {
            collect_targets(sub, &path::join(scope, name), out);
        }
    }
}

fn collect_discriminators(predicate: &SchemaNode, scope: &str, out: &mut BTreeSet<String>) {
    for (name, sub) in &predicate.properties {
        let p = path::join(scope, name);
        if sub.has_constraint() {
            out.insert(p);
        } else {
            collect_discriminators(sub, &p, out);
        }
    }
    for name in &predicate.required {
        out.insert(path::join(scope, name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn applier(schema: Value) -> ConditionalApplier {
        let schema = SchemaNode::from_value(&schema).unwrap();
        ConditionalApplier::new(&schema, &PathResolver::build(&schema))
    }

    fn actions(plan: &[Directive], action: DirectiveAction) -> Vec<&str> {
        plan.iter()
            .filter(|d| d.action == action)
            .map(|d| d.path.as_str())
            .collect()
    }

    #[test]
    fn test_targets_merge_required() {
        let node = SchemaNode::from_value(&json!({
            "required": ["a"],
            "properties": {
                "a": {"type": "string"},
                "kind": {"const": "x"},
                "sub": {"properties": {"b": {}}, "required": ["b"]}
            }
        }))
        .unwrap();
        assert_eq!(
            targets(&node, ""),
            vec![
                ("a".to_string(), true),
                ("sub".to_string(), false),
                ("sub.b".to_string(), true)
            ]
        );
    }

    #[test]
    fn test_conditional_fields_by_convention() {
        let a = applier(json!({
            "required": ["always"],
            "properties": {
                "mode": {"type": "string"},
                "always": {"type": "string"},
                "extra": {"type": "string"}
            },
            "if": {"properties": {"mode": {"const": "on"}}},
            "then": {"required": ["extra", "always"]}
        }));
        assert!(a.is_conditional_field("extra"));
        assert!(!a.is_conditional_field("always"));
        assert!(!a.is_conditional_field("mode"));
    }

    #[test]
    fn test_plan_if_then_else() {
        let a = applier(json!({
            "properties": {
                "t": {"type": "string"},
                "x": {"type": "string"},
                "y": {"type": "string"}
            },
            "if": {"properties": {"t": {"const": "a"}}},
            "then": {"required": ["x"]},
            "else": {"required": ["y"], "disableSubmit": true}
        }));

        let plan = a.plan(&json!({"t": "a"}));
        assert_eq!(actions(&plan, DirectiveAction::Require), vec!["x"]);
        assert!(actions(&plan, DirectiveAction::DisableSubmit).is_empty());

        let plan = a.plan(&json!({"t": "b"}));
        assert_eq!(actions(&plan, DirectiveAction::Require), vec!["y"]);
        assert_eq!(plan[0].action, DirectiveAction::EnableSubmit);
        assert_eq!(actions(&plan, DirectiveAction::DisableSubmit).len(), 1);
        assert_eq!(plan[1].reason, "if: condition not met");
    }

    #[test]
    fn test_plan_choice_reverses_first() {
        let a = applier(json!({
            "properties": {
                "k": {"type": "string"},
                "one": {"type": "string"},
                "two": {"type": "string"}
            },
            "oneOf": [
                {"properties": {"k": {"const": 1}}, "required": ["one"]},
                {"properties": {"k": {"const": 2}}, "required": ["two"]}
            ]
        }));

        let plan = a.plan(&json!({"k": 2}));
        let hides = actions(&plan, DirectiveAction::Hide);
        let shows = actions(&plan, DirectiveAction::Show);
        assert_eq!(hides, vec!["one"]);
        assert_eq!(shows, vec!["two"]);
        let hide_at = plan.iter().position(|d| d.action == DirectiveAction::Hide).unwrap();
        let show_at = plan.iter().position(|d| d.action == DirectiveAction::Show).unwrap();
        assert!(hide_at < show_at);

        // nothing selected: every branch reversed
        let plan = a.plan(&json!({}));
        assert_eq!(actions(&plan, DirectiveAction::Hide), vec!["one", "two"]);
    }

    #[test]
    fn test_plan_dependency() {
        let a = applier(json!({
            "properties": {
                "creditCard": {"type": "string"},
                "billingAddress": {"type": "string"}
            },
            "dependencies": {"creditCard": ["billingAddress"]}
        }));
        assert!(a.is_conditional_field("billingAddress"));
        assert!(!a.is_conditional_field("creditCard"));
        assert!(actions(&a.plan(&json!({})), DirectiveAction::Show).is_empty());
        assert_eq!(
            actions(&a.plan(&json!({"creditCard": "4111"})), DirectiveAction::Require),
            vec!["billingAddress"]
        );
    }

    #[test]
    fn test_object_fields_are_not_required_directly() {
        let a = applier(json!({
            "properties": {
                "k": {"type": "string"},
                "section": {"type": "object", "properties": {"inner": {"type": "string"}}}
            },
            "if": {"properties": {"k": {"const": "y"}}},
            "then": {"required": ["section"]}
        }));
        let plan = a.plan(&json!({"k": "y"}));
        assert_eq!(actions(&plan, DirectiveAction::Show), vec!["section"]);
        assert!(actions(&plan, DirectiveAction::Require).is_empty());
    }
}
