//! The form runtime: one schema, one field tree, one data tree.
//!
//! Every external stimulus (a field change, an array add/remove, `set_data`,
//! `reset` or the initial load) runs one synchronous evaluation pass:
//! the data tree is updated, every conditional is re-evaluated and applied,
//! and events are emitted. Event handlers that want to mutate the form push a
//! [`Mutation`] onto the [`MutationQueue`]; queued mutations run as follow-up
//! passes once the current one is complete, at most
//! [`RuntimeConfig::max_cascade_depth`] of them per stimulus.

use std::{cell::RefCell, collections::HashMap, collections::VecDeque, path::PathBuf, rc::Rc};

use serde_json::Value;

use crate::{
    apply::{ConditionalApplier, Directive},
    array::{ArrayController, ArrayItem, SCALAR_ITEM_KEY},
    binder::DataBinder,
    config::RuntimeConfig,
    error::{FormError, Result},
    event::{EventBus, FormEvent},
    schema::{PathResolver, SchemaNode, path},
    tree::{
        ATTR_ID, ATTR_NAME, ATTR_SCHEMA_ID, ATTR_SCHEMA_PATH, CLASS_ARRAY, CLASS_ITEM, FieldKind,
        FieldTree, NodeId,
    },
    validate::{ValidationError, Validator},
    visibility::{FieldVisibilityRecord, VisibilityController, VisibilityEntry},
};

/// Where the schema comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSource {
    /// An already parsed JSON document.
    Inline(Value),
    /// A JSON file.
    Path(PathBuf),
    /// An HTTP(S) URL. Needs the `remote` feature.
    Url(String),
}

impl SchemaSource {
    async fn fetch(self) -> Result<Value> {
        match self {
            SchemaSource::Inline(value) => Ok(value),
            SchemaSource::Path(path) => {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|source| FormError::Io { path, source })?;
                Ok(serde_json::from_str(&content)?)
            }
            SchemaSource::Url(url) => fetch_url(url).await,
        }
    }
}

#[cfg(feature = "remote")]
async fn fetch_url(url: String) -> Result<Value> {
    let response = reqwest::get(&url)
        .await
        .and_then(|r| r.error_for_status());
    let body = match response {
        Ok(r) => r.text().await,
        Err(e) => Err(e),
    }
    .map_err(|source| FormError::Fetch {
        url: url.clone(),
        source,
    })?;
    Ok(serde_json::from_str(&body)?)
}

#[cfg(not(feature = "remote"))]
async fn fetch_url(url: String) -> Result<Value> {
    Err(FormError::RemoteDisabled(url))
}

/// A deferred mutation, queued by an event handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    UpdateField { field: String, raw: Value },
    SetData(Value),
    AddArrayItem { array_id: String },
    RemoveArrayItem { array_id: String, item_id: String },
    Reset,
}

/// Shared handle for queueing mutations from inside event handlers.
#[derive(Debug, Clone, Default)]
pub struct MutationQueue(Rc<RefCell<VecDeque<Mutation>>>);

impl MutationQueue {
    pub fn push(&self, mutation: Mutation) {
        self.0.borrow_mut().push_back(mutation);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    fn pop(&self) -> Option<Mutation> {
        self.0.borrow_mut().pop_front()
    }

    fn clear(&self) -> usize {
        let mut queue = self.0.borrow_mut();
        let n = queue.len();
        queue.clear();
        n
    }
}

/// An input outside array items, bound to a canonical path.
#[derive(Debug, Clone)]
struct BoundInput {
    node: NodeId,
    path: String,
    kind: FieldKind,
}

/// Conditional form runtime over a [`FieldTree`].
pub struct FormRuntime<T: FieldTree> {
    tree: T,
    config: RuntimeConfig,
    initial_data: Value,
    schema: Option<SchemaNode>,
    schema_value: Value,
    resolver: PathResolver,
    applier: ConditionalApplier,
    binder: DataBinder,
    visibility: VisibilityController,
    arrays: ArrayController,
    bus: EventBus,
    validator: Validator,
    errors: Vec<ValidationError>,
    bound: Vec<BoundInput>,
    kinds: HashMap<NodeId, FieldKind>,
    queue: MutationQueue,
    submit_enabled: bool,
}

impl<T: FieldTree> FormRuntime<T> {
    /// Create a runtime over a rendered tree. Nothing is evaluated until
    /// [`initialize`](Self::initialize) or [`load`](Self::load) runs, so event
    /// handlers registered in between see the `ready` event.
    pub fn new(tree: T, initial_data: Value, config: RuntimeConfig) -> Self {
        FormRuntime {
            tree,
            config,
            initial_data,
            schema: None,
            schema_value: Value::Null,
            resolver: PathResolver::default(),
            applier: ConditionalApplier::default(),
            binder: DataBinder::default(),
            visibility: VisibilityController::new(),
            arrays: ArrayController::new(),
            bus: EventBus::new(),
            validator: Validator::new(),
            errors: Vec::new(),
            bound: Vec::new(),
            kinds: HashMap::new(),
            queue: MutationQueue::default(),
            submit_enabled: true,
        }
    }

    /// Fetch the schema and initialise.
    ///
    /// A schema that cannot be read or parsed is reported as an `error` event
    /// and the runtime initialises without one. Only a malformed array
    /// container is returned as an error.
    pub async fn load(&mut self, source: SchemaSource) -> Result<()> {
        let schema = match source.fetch().await {
            Ok(value) => Some(value),
            Err(e) => {
                self.report_load_error(&e.to_string());
                None
            }
        };
        self.initialize(schema)
    }

    fn report_load_error(&self, reason: &str) {
        let message = format!("schema load failed: {reason}");
        warn!("{message}, continuing without a schema");
        self.bus.emit(&FormEvent::Error { message });
    }

    /// Bind the tree, seed the data and run the first evaluation pass.
    pub fn initialize(&mut self, schema: Option<Value>) -> Result<()> {
        self.schema = None;
        self.schema_value = Value::Null;
        if let Some(value) = schema {
            match SchemaNode::from_value(&value) {
                Ok(node) => {
                    self.schema = Some(node);
                    self.schema_value = value;
                }
                Err(e) => self.report_load_error(&e.to_string()),
            }
        }

        match &self.schema {
            Some(schema) => {
                self.resolver = PathResolver::build(schema);
                self.applier = ConditionalApplier::new(schema, &self.resolver);
            }
            None => {
                self.resolver = PathResolver::default();
                self.applier = ConditionalApplier::default();
            }
        }
        self.visibility = VisibilityController::new();
        self.arrays = ArrayController::new();
        self.binder = DataBinder::default();
        self.errors.clear();

        self.bind_inputs();
        for container in ArrayController::containers(&self.tree) {
            self.arrays.init_container(&mut self.tree, container)?;
        }
        self.arrays.take_changes();

        let mut content: Vec<(String, Value)> = self
            .bound
            .iter()
            .filter_map(|b| {
                let raw = self.tree.value(b.node)?;
                match raw {
                    Value::Null => None,
                    Value::String(ref s) if s.is_empty() => None,
                    raw => Some((b.path.clone(), b.kind.read_value(&raw))),
                }
            })
            .collect();
        if let Value::Object(map) = &self.initial_data {
            for (key, value) in map {
                flatten(value, key, &mut content);
            }
        }
        self.binder.seed(self.schema.as_ref(), &content);

        self.sync_view()?;
        self.evaluate_all_conditions();
        info!(
            "form ready: {} field(s), {} conditional(s){}",
            self.resolver.field_paths().count(),
            self.applier.conditionals().len(),
            if self.schema.is_none() { ", no schema" } else { "" }
        );
        self.bus.emit(&FormEvent::Ready {
            schema: self.schema_value.clone(),
        });
        self.drain_queue()
    }

    fn bind_inputs(&mut self) {
        self.bound.clear();
        self.kinds.clear();
        let tree = &self.tree;
        for node in tree.inputs_within(tree.root()) {
            if tree.in_template(node) || tree.ancestor_with_class(node, CLASS_ARRAY).is_some() {
                continue;
            }
            let kind = tree.field_kind(node);
            self.kinds.insert(node, kind);

            let keys: Vec<String> = [ATTR_SCHEMA_ID, ATTR_NAME, ATTR_ID]
                .iter()
                .filter_map(|attr| tree.get_attribute(node, attr))
                .collect();
            let path = match container_path(tree, node) {
                Some(path) => path,
                None => match keys.first() {
                    Some(key) => self.binder.canonical_path(key),
                    None => continue,
                },
            };
            for key in &keys {
                if *key != path {
                    self.binder.register_schema_id(key, &path);
                }
            }
            debug!("bound {keys:?} -> {path} ({kind:?})");
            self.bound.push(BoundInput { node, path, kind });
        }
    }

    /// Write the data tree into the bound inputs and array containers.
    fn sync_view(&mut self) -> Result<()> {
        for b in &self.bound {
            let value = self.binder.get(&b.path).cloned().unwrap_or(Value::Null);
            self.tree.set_value(b.node, b.kind.write_value(&value));
        }
        for container in self.top_level_arrays() {
            let id = ArrayController::array_id(&self.tree, container);
            if let Some(Value::Array(values)) = self.binder.get(&id) {
                let values = values.clone();
                self.arrays.sync_from_data(&mut self.tree, container, &values)?;
            }
        }
        Ok(())
    }

    fn top_level_arrays(&self) -> Vec<NodeId> {
        ArrayController::containers(&self.tree)
            .into_iter()
            .filter(|&c| self.tree.ancestor_with_class(c, CLASS_ITEM).is_none())
            .collect()
    }

    /// The data slice of a top-level array, read from its live items.
    fn array_slice(&self, container: NodeId) -> (String, Value) {
        let id = ArrayController::array_id(&self.tree, container);
        let scalar = self
            .resolver
            .field_schema(&id)
            .and_then(|s| s.items.as_deref())
            .is_some_and(|items| !items.is_object());
        let items = ArrayController::get_items_data(&self.tree, container)
            .into_iter()
            .map(|item| match item {
                Value::Object(mut map) if scalar => map.remove(SCALAR_ITEM_KEY).unwrap_or(Value::Null),
                other => other,
            })
            .collect();
        (id, Value::Array(items))
    }

    fn outermost_array(&self, node: NodeId) -> Option<NodeId> {
        let mut top = self.tree.has_class(node, CLASS_ARRAY).then_some(node);
        let mut current = node;
        while let Some(container) = self.tree.ancestor_with_class(current, CLASS_ARRAY) {
            top = Some(container);
            current = container;
        }
        top
    }

    /// Refresh the data slices of arrays that reported changes.
    fn flush_array_changes(&mut self) -> Vec<(String, Value)> {
        let mut refreshed: Vec<(String, Value)> = Vec::new();
        for change in self.arrays.take_changes() {
            let Some(top) = self.outermost_array(change.container) else {
                continue;
            };
            let (id, slice) = self.array_slice(top);
            self.binder.set(&id, slice.clone());
            refreshed.retain(|(other, _)| *other != id);
            refreshed.push((id, slice));
        }
        refreshed
    }

    fn emit_change(&self, field: String, value: Value) {
        self.bus.emit(&FormEvent::Change {
            field,
            value,
            form_data: self.binder.to_tree(),
        });
    }

    fn kind_of(&mut self, node: NodeId) -> FieldKind {
        let tree = &self.tree;
        *self.kinds.entry(node).or_insert_with(|| tree.field_kind(node))
    }

    fn process(&mut self, mutation: Mutation) -> Result<()> {
        debug!("process {mutation:?}");
        match mutation {
            Mutation::UpdateField { field, raw } => self.apply_update(&field, raw),
            Mutation::SetData(values) => self.apply_set_data(values),
            Mutation::AddArrayItem { array_id } => self.apply_add(&array_id).map(|_| ()),
            Mutation::RemoveArrayItem { array_id, item_id } => {
                self.apply_remove(&array_id, &item_id).map(|_| ())
            }
            Mutation::Reset => self.apply_reset(),
        }
    }

    fn drain_queue(&mut self) -> Result<()> {
        let mut depth = 0;
        while let Some(next) = self.queue.pop() {
            if depth >= self.config.max_cascade_depth {
                let dropped = 1 + self.queue.clear();
                warn!(
                    "cascade depth {} reached, dropping {dropped} queued mutation(s)",
                    self.config.max_cascade_depth
                );
                break;
            }
            depth += 1;
            if let Err(e) = self.process(next) {
                let dropped = self.queue.clear();
                if dropped > 0 {
                    warn!("queued mutation failed, dropping {dropped} pending mutation(s)");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// The input addressed by `field`, either directly or through the
    /// canonical path it was bound to.
    fn input_for(&self, field: &str) -> Option<NodeId> {
        self.tree.find_input(field).or_else(|| {
            let path = self.binder.canonical_path(field);
            self.bound.iter().find(|b| b.path == path).map(|b| b.node)
        })
    }

    fn apply_update(&mut self, field: &str, raw: Value) -> Result<()> {
        let (path, value) = match self.input_for(field) {
            Some(node) => {
                let kind = self.kind_of(node);
                self.tree.set_value(node, raw.clone());
                match self.outermost_array(node) {
                    Some(container) => {
                        let (id, slice) = self.array_slice(container);
                        self.binder.set(&id, slice.clone());
                        (id, slice)
                    }
                    None => {
                        let (path, value) = self.binder.update_from_field(field, &raw, kind);
                        self.tree.set_value(node, kind.write_value(&value));
                        (path, value)
                    }
                }
            }
            None => {
                debug!("no input for {field}, storing raw value");
                let path = self.binder.canonical_path(field);
                self.binder.set(&path, raw.clone());
                (path, raw)
            }
        };
        self.evaluate_all_conditions();
        self.emit_change(path, value);
        Ok(())
    }

    fn apply_set_data(&mut self, values: Value) -> Result<()> {
        let Value::Object(values) = values else {
            warn!("set_data expects an object, got {values}");
            return Ok(());
        };
        self.binder.set_many(&values);
        self.sync_view()?;
        self.evaluate_all_conditions();
        for path in values.keys() {
            let value = self.binder.get(path).cloned().unwrap_or(Value::Null);
            self.emit_change(path.clone(), value);
        }
        Ok(())
    }

    fn apply_add(&mut self, array_id: &str) -> Result<Option<ArrayItem>> {
        let Some(container) = ArrayController::find_container(&self.tree, array_id) else {
            warn!("no array container {array_id}");
            return Ok(None);
        };
        let item = self.arrays.add_item(&mut self.tree, container)?;
        self.after_array_change();
        Ok(Some(item))
    }

    fn apply_remove(&mut self, array_id: &str, item_id: &str) -> Result<bool> {
        let Some(container) = ArrayController::find_container(&self.tree, array_id) else {
            warn!("no array container {array_id}");
            return Ok(false);
        };
        let removed = self
            .arrays
            .remove_item_by_id(&mut self.tree, container, item_id);
        self.after_array_change();
        Ok(removed)
    }

    fn after_array_change(&mut self) {
        let refreshed = self.flush_array_changes();
        if refreshed.is_empty() {
            return;
        }
        self.evaluate_all_conditions();
        for (id, slice) in refreshed {
            self.emit_change(id, slice);
        }
    }

    fn apply_reset(&mut self) -> Result<()> {
        self.binder.reset();
        self.sync_view()?;
        self.errors.clear();
        self.evaluate_all_conditions();
        info!("form reset");
        self.bus.emit(&FormEvent::Reset {
            form_data: self.binder.to_tree(),
        });
        Ok(())
    }

    /// A field changed. `field` is an input name, `schema-id`, id or
    /// canonical path.
    pub fn update_field(&mut self, field: &str, raw: Value) -> Result<()> {
        self.apply_update(field, raw)?;
        self.drain_queue()
    }

    /// Store several `path -> value` entries in one pass.
    pub fn set_data(&mut self, values: Value) -> Result<()> {
        self.apply_set_data(values)?;
        self.drain_queue()
    }

    /// Add an item to the array container `array_id`. Returns `None` if
    /// there is no such container.
    pub fn add_array_item(&mut self, array_id: &str) -> Result<Option<ArrayItem>> {
        let item = self.apply_add(array_id)?;
        self.drain_queue()?;
        Ok(item)
    }

    /// Remove an item. Returns false if the item is unknown or is the last one.
    pub fn remove_array_item(&mut self, array_id: &str, item_id: &str) -> Result<bool> {
        let removed = self.apply_remove(array_id, item_id)?;
        self.drain_queue()?;
        Ok(removed)
    }

    /// Restore the initial data and baseline visibility.
    pub fn reset(&mut self) -> Result<()> {
        self.apply_reset()?;
        self.drain_queue()
    }

    /// Re-evaluate and apply every conditional against the current data.
    pub fn evaluate_all_conditions(&mut self) {
        let outcome = self.applier.apply_all(
            self.binder.data(),
            &mut self.tree,
            &mut self.visibility,
            &self.bus,
        );
        debug!(
            "pass applied {} directive(s), submit {}",
            outcome.directives,
            if outcome.submit_enabled { "enabled" } else { "disabled" }
        );
        self.submit_enabled = outcome.submit_enabled;
    }

    /// The directives the current data produces, without applying them.
    pub fn directives(&self) -> Vec<Directive> {
        self.applier.plan(self.binder.data())
    }

    /// Validate the visible fields. The result is also kept in
    /// [`errors`](Self::errors).
    pub fn validate(&mut self) -> &[ValidationError] {
        self.errors = self.validator.validate(
            &self.resolver,
            self.binder.data(),
            &self.tree,
            &self.visibility,
        );
        &self.errors
    }

    /// Errors found by the last validation.
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Emit `submit` unless submission is disabled or validation fails.
    pub fn submit(&mut self) -> bool {
        if !self.submit_enabled {
            debug!("submit is disabled by a conditional");
            return false;
        }
        if self.config.validate_on_submit && !self.validate().is_empty() {
            info!("submit blocked by {} validation error(s)", self.errors.len());
            return false;
        }
        self.bus.emit(&FormEvent::Submit {
            form_data: self.binder.to_tree(),
        });
        true
    }

    /// A snapshot of the form data.
    pub fn get_data(&self) -> Value {
        self.binder.to_tree()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.binder.get(path)
    }

    pub fn is_visible(&self, path: &str) -> Option<bool> {
        self.visibility.is_visible(&self.tree, path)
    }

    pub fn is_required(&self, path: &str) -> Option<bool> {
        self.visibility.is_required(&self.tree, path)
    }

    pub fn submit_enabled(&self) -> bool {
        self.submit_enabled
    }

    /// Full visibility history of a field.
    pub fn history(&self, path: &str) -> Option<&FieldVisibilityRecord> {
        self.visibility.history(path)
    }

    /// The most recent history entries of a field, bounded by
    /// [`RuntimeConfig::history_view_limit`].
    pub fn recent_history(&self, path: &str) -> &[VisibilityEntry] {
        self.visibility
            .history(path)
            .map(|r| r.recent(self.config.history_view_limit))
            .unwrap_or_default()
    }

    /// Every field's visibility history.
    pub fn visibility(&self) -> &VisibilityController {
        &self.visibility
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    /// Handle for queueing mutations from event handlers.
    pub fn mutation_queue(&self) -> MutationQueue {
        self.queue.clone()
    }

    pub fn schema(&self) -> Option<&SchemaNode> {
        self.schema.as_ref()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut T {
        &mut self.tree
    }
}

/// Schema path of the nearest field container above `node`.
fn container_path<T: FieldTree>(tree: &T, node: NodeId) -> Option<String> {
    let mut current = tree.parent(node);
    while let Some(n) = current {
        if let Some(path) = tree.get_attribute(n, ATTR_SCHEMA_PATH) {
            return Some(path);
        }
        current = tree.parent(n);
    }
    None
}

/// Flatten nested objects into dotted `(path, leaf)` pairs. Arrays and empty
/// objects are leaves.
fn flatten(value: &Value, prefix: &str, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, v) in map {
                flatten(v, &path::join(prefix, key), out);
            }
        }
        leaf => out.push((prefix.to_string(), leaf.clone())),
    }
}
