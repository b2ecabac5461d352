//! Light validation of visible fields.
//!
//! This is not a JSON Schema validator. Only leaf fields that are currently
//! visible are checked, against the handful of keywords a form can enforce.
//! Problems are returned as data.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::{
    condition::{as_number, is_present, same_value},
    schema::{PathResolver, SchemaNode},
    tree::FieldTree,
    visibility::VisibilityController,
};

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// A validation problem on one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validates form data against the leaf fields of a schema.
#[derive(Debug, Default)]
pub struct Validator {
    patterns: HashMap<String, Option<Regex>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check every visible leaf field.
    ///
    /// Requiredness comes from the rendered tree, so conditionally required
    /// fields are honoured. A field without a container falls back to its
    /// declared requiredness.
    pub fn validate<T: FieldTree>(
        &mut self,
        resolver: &PathResolver,
        data: &Value,
        tree: &T,
        visibility: &VisibilityController,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for path in resolver.field_paths() {
            let Some(schema) = resolver.field_schema(path) else {
                continue;
            };
            if schema.is_object() || schema.is_array() {
                continue;
            }
            if visibility.is_visible(tree, path) == Some(false) {
                continue;
            }

            let value = crate::schema::path::lookup(data, path);
            let required = visibility
                .is_required(tree, path)
                .unwrap_or_else(|| resolver.is_declared_required(path));
            if !is_present(value) {
                if required {
                    errors.push(ValidationError::new(path, "is required"));
                }
                continue;
            }
            if let Some(value) = value {
                self.check(path, schema, value, &mut errors);
            }
        }
        debug!("validation found {} error(s)", errors.len());
        errors
    }

    fn check(&mut self, path: &str, schema: &SchemaNode, value: &Value, errors: &mut Vec<ValidationError>) {
        let ty = schema.ty.as_ref().and_then(|t| t.primary());
        match ty {
            Some("number") if as_number(Some(value)).is_none() => {
                errors.push(ValidationError::new(path, "must be a number"));
                return;
            }
            Some("integer") if as_number(Some(value)).is_none_or(|n| n.fract() != 0.0) => {
                errors.push(ValidationError::new(path, "must be an integer"));
                return;
            }
            Some("boolean") if !value.is_boolean() => {
                errors.push(ValidationError::new(path, "must be true or false"));
                return;
            }
            _ => {}
        }

        if let Some(text) = value.as_str() {
            let len = text.chars().count();
            if let Some(min) = schema.min_length
                && len < min
            {
                errors.push(ValidationError::new(path, format!("must be at least {min} characters")));
            }
            if let Some(max) = schema.max_length
                && len > max
            {
                errors.push(ValidationError::new(path, format!("must be at most {max} characters")));
            }
            if let Some(pattern) = &schema.pattern {
                match self.pattern(pattern) {
                    Some(re) if !re.is_match(text) => {
                        errors.push(ValidationError::new(path, format!("must match {pattern}")));
                    }
                    Some(_) => {}
                    None => warn!("{path}: ignoring invalid pattern {pattern:?}"),
                }
            }
            if schema.format.as_deref() == Some("email")
                && EMAIL.as_ref().is_some_and(|re| !re.is_match(text))
            {
                errors.push(ValidationError::new(path, "must be a valid email address"));
            }
        }

        if let Some(n) = as_number(Some(value)).filter(|_| matches!(ty, Some("number" | "integer"))) {
            if let Some(min) = schema.minimum
                && n < min
            {
                errors.push(ValidationError::new(path, format!("must be at least {min}")));
            }
            if let Some(max) = schema.maximum
                && n > max
            {
                errors.push(ValidationError::new(path, format!("must be at most {max}")));
            }
        }

        if let Some(allowed) = &schema.enum_values
            && !allowed.iter().any(|a| same_value(value, a))
        {
            errors.push(ValidationError::new(path, "is not one of the allowed values"));
        }
    }

    fn pattern(&mut self, pattern: &str) -> Option<&Regex> {
        self.patterns
            .entry(pattern.to_string())
            .or_insert_with(|| Regex::new(pattern).ok())
            .as_ref()
    }
}
