//! # schemaform
//!
//! Conditional field-state runtime for JSON Schema driven forms.
//!
//! `schemaform` keeps a rendered form in step with the conditional rules of
//! its schema. It evaluates `if`/`then`/`else`, `allOf`, `anyOf`, `oneOf` and
//! `dependencies` against the live form data, shows, hides, requires and
//! un-requires fields accordingly, records why each field changed state, binds
//! dotted field paths to one nested data tree and manages repeatable array
//! sections.
//!
//! ## Features
//!
//! - Discriminated `anyOf`/`oneOf` choices that cleanly toggle on switch
//! - Cumulative `allOf` rules and both `dependencies` forms
//! - Append-only visibility history per field
//! - Rendering-agnostic: everything goes through the [`FieldTree`] trait
//! - Array sections with collision-free item ids and a one-item minimum
//! - Typed event bus with per-handler failure isolation
//!
//! ## Quick Start
//!
//! ```rust
//! use schemaform::{FormRuntime, MemoryTree, RuntimeConfig, SchemaNode};
//! use serde_json::json;
//!
//! let schema = json!({
//!     "properties": {
//!         "userType": {"type": "string"},
//!         "firstName": {"type": "string"},
//!         "companyName": {"type": "string"}
//!     },
//!     "if": {"properties": {"userType": {"const": "individual"}}},
//!     "then": {"required": ["firstName"]},
//!     "else": {"required": ["companyName"]}
//! });
//! let node = SchemaNode::from_value(&schema).unwrap();
//!
//! let mut form = FormRuntime::new(MemoryTree::scaffold(&node), json!({}), RuntimeConfig::default());
//! form.initialize(Some(schema)).unwrap();
//!
//! form.update_field("field-userType", json!("individual")).unwrap();
//! assert_eq!(form.is_visible("firstName"), Some(true));
//! assert_eq!(form.is_visible("companyName"), Some(false));
//! ```
//!
//! ## Modules
//!
//! - [`schema`] - Schema model, path resolution and conditional synthesis
//! - [`condition`] - Predicate evaluation
//! - [`apply`] - Conditional directives and baseline state
//! - [`visibility`] - Show/hide/require with history
//! - [`binder`] - The canonical data tree
//! - [`array`] - Repeatable array sections
//! - [`event`] - Event bus
//! - [`runtime`] - The orchestrating [`FormRuntime`]

#[macro_use]
extern crate log;

/// Conditional directives and baseline field state.
pub mod apply;

/// Repeatable array sections.
pub mod array;

/// The canonical form data tree.
pub mod binder;

/// Predicate evaluation against form data.
pub mod condition;

/// Runtime configuration and initial data files.
pub mod config;

/// Error types.
pub mod error;

/// Typed publish/subscribe.
pub mod event;

/// The form runtime.
///
/// Owns every component and runs one evaluation pass per external stimulus.
pub mod runtime;

/// Schema model, path resolution and conditional synthesis.
pub mod schema;

/// The rendered field tree.
pub mod tree;

/// Light validation of visible fields.
pub mod validate;

/// Field visibility and requiredness with history.
pub mod visibility;

pub use config::RuntimeConfig;
pub use error::{FormError, Result};
pub use event::{EventBus, EventKind, FormEvent, Subscription};
pub use runtime::{FormRuntime, Mutation, MutationQueue, SchemaSource};
pub use schema::{PathResolver, SchemaNode};
pub use tree::{FieldKind, FieldTree, MemoryTree, NodeId};
