//! Predicate evaluation.
//!
//! A predicate is a schema node whose `properties` map lists constraints on
//! the current form data. The result is the logical AND over every listed
//! property. Each property tests only one of its constraint keywords, picked
//! in the priority order `minimum`, `maximum`, `enum`, `const`: a property
//! declaring both `enum` and `const` is judged by `enum` alone.

use serde_json::Value;

use crate::schema::{SchemaNode, path};

/// Result of evaluating a predicate that has nothing to test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyPredicate {
    /// `if`-style checks fail when there is nothing to test.
    Fails,
    /// Prerequisite-less nodes apply unconditionally.
    Holds,
}

/// Pure predicate evaluator over form data.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Evaluate `predicate` against `data`.
    ///
    /// Property keys are resolved relative to `scope`, the data path of the
    /// object the predicate was declared on.
    pub fn evaluate(
        &self,
        predicate: &SchemaNode,
        data: &Value,
        scope: &str,
        empty: EmptyPredicate,
    ) -> bool {
        if predicate.properties.is_empty() && predicate.required.is_empty() {
            return empty == EmptyPredicate::Holds;
        }

        let required_present = predicate
            .required
            .iter()
            .all(|name| is_present(path::lookup(data, &path::join(scope, name))));

        required_present
            && predicate.properties.iter().all(|(name, constraint)| {
                let field = path::join(scope, name);
                self.test_property(constraint, data, &field)
            })
    }

    fn test_property(&self, constraint: &SchemaNode, data: &Value, field: &str) -> bool {
        let value = path::lookup(data, field);

        if let Some(min) = constraint.minimum {
            return as_number(value).is_some_and(|n| n >= min);
        }
        if let Some(max) = constraint.maximum {
            return as_number(value).is_some_and(|n| n <= max);
        }
        if let Some(allowed) = &constraint.enum_values {
            return value.is_some_and(|v| allowed.iter().any(|a| same_value(v, a)));
        }
        if let Some(expected) = &constraint.const_value {
            return same_value(value.unwrap_or(&Value::Null), expected);
        }
        if !constraint.properties.is_empty() || !constraint.required.is_empty() {
            return self.evaluate(constraint, data, field, EmptyPredicate::Holds);
        }
        // nothing to test on this property
        true
    }
}

/// JSON equality, except that numbers compare by value (`2 == 2.0`).
pub(crate) fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Numeric view of a value: numbers, and strings that parse as numbers.
pub(crate) fn as_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// A value counts as present unless it is missing, null, an empty string or
/// an empty array.
pub(crate) fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn predicate(value: Value) -> SchemaNode {
        SchemaNode::from_value(&value).unwrap()
    }

    fn eval(p: &SchemaNode, data: Value) -> bool {
        ConditionEvaluator.evaluate(p, &data, "", EmptyPredicate::Fails)
    }

    #[test]
    fn test_const_and_enum() {
        let p = predicate(json!({"properties": {"userType": {"const": "individual"}}}));
        assert!(eval(&p, json!({"userType": "individual"})));
        assert!(!eval(&p, json!({"userType": "company"})));
        assert!(!eval(&p, json!({})));

        let p = predicate(json!({"properties": {"plan": {"enum": ["pro", "team"]}}}));
        assert!(eval(&p, json!({"plan": "team"})));
        assert!(!eval(&p, json!({"plan": "free"})));
        assert!(!eval(&p, json!({})));
    }

    #[test]
    fn test_const_and_enum_compare_numbers_by_value() {
        let p = predicate(json!({"properties": {"n": {"const": 2}}}));
        assert!(eval(&p, json!({"n": 2.0})));
        assert!(eval(&p, json!({"n": 2})));
        assert!(!eval(&p, json!({"n": 2.5})));
        assert!(!eval(&p, json!({"n": "2"})));

        let p = predicate(json!({"properties": {"n": {"enum": [1.0, 3]}}}));
        assert!(eval(&p, json!({"n": 1})));
        assert!(eval(&p, json!({"n": 3.0})));
        assert!(!eval(&p, json!({"n": 2})));
    }

    #[test]
    fn test_numeric_bounds() {
        let p = predicate(json!({"properties": {"age": {"minimum": 18}}}));
        assert!(eval(&p, json!({"age": 18})));
        assert!(eval(&p, json!({"age": "21"})));
        assert!(!eval(&p, json!({"age": 17})));
        assert!(!eval(&p, json!({"age": "abc"})));
        assert!(!eval(&p, json!({})));

        let p = predicate(json!({"properties": {"qty": {"maximum": 5}}}));
        assert!(eval(&p, json!({"qty": 5})));
        assert!(!eval(&p, json!({"qty": 6})));
    }

    #[test]
    fn test_and_across_properties() {
        let p = predicate(json!({"properties": {
            "a": {"const": 1},
            "b": {"const": 2}
        }}));
        assert!(eval(&p, json!({"a": 1, "b": 2})));
        assert!(!eval(&p, json!({"a": 1, "b": 3})));
    }

    #[test]
    fn test_only_first_constraint_in_priority_is_checked() {
        // `enum` outranks `const`; the `const` is never consulted
        let p = predicate(json!({"properties": {"tier": {"const": "gold", "enum": ["silver", "gold"]}}}));
        assert!(eval(&p, json!({"tier": "silver"})));

        // `minimum` outranks `maximum`
        let p = predicate(json!({"properties": {"n": {"minimum": 1, "maximum": 3}}}));
        assert!(eval(&p, json!({"n": 10})));
    }

    #[test]
    fn test_empty_predicate_depends_on_context() {
        let p = SchemaNode::default();
        let data = json!({});
        assert!(!ConditionEvaluator.evaluate(&p, &data, "", EmptyPredicate::Fails));
        assert!(ConditionEvaluator.evaluate(&p, &data, "", EmptyPredicate::Holds));
    }

    #[test]
    fn test_required_presence() {
        let p = predicate(json!({"required": ["creditCard"]}));
        assert!(!eval(&p, json!({})));
        assert!(!eval(&p, json!({"creditCard": ""})));
        assert!(eval(&p, json!({"creditCard": "4111"})));
    }

    #[test]
    fn test_scoped_and_nested_properties() {
        let p = predicate(json!({"properties": {"country": {"const": "US"}}}));
        let data = json!({"address": {"country": "US"}});
        assert!(ConditionEvaluator.evaluate(&p, &data, "address", EmptyPredicate::Fails));

        let p = predicate(json!({"properties": {"address": {"properties": {"country": {"const": "US"}}}}}));
        assert!(eval(&p, data));
        assert!(!eval(&p, json!({"address": "flat"})));
    }
}
