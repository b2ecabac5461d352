//! Repeatable array sections.
//!
//! An array container keeps at least one live item once initialised. New
//! items are cloned from the container's hidden template; every input of the
//! clone gets an `_<id>` suffix on its `name`, `id` and `schema-id`, and
//! labels pointing at a renamed input are relinked.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    error::{FormError, Result},
    tree::{
        ATTR_ARRAY_ID, ATTR_FOR, ATTR_ID, ATTR_ITEM_ID, ATTR_LOCAL_NAME, ATTR_NAME, ATTR_ORDINAL,
        ATTR_SCHEMA_ID, ATTR_SCHEMA_PATH, CLASS_ADD, CLASS_ARRAY, CLASS_HIDDEN, CLASS_ITEM,
        CLASS_ITEMS, CLASS_TEMPLATE, FieldTree, NodeId,
    },
};

/// Key used for the value of a scalar array item.
pub const SCALAR_ITEM_KEY: &str = "value";

static ITEM_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A live array item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrayItem {
    pub id: String,
    pub ordinal: usize,
    #[serde(skip)]
    pub node: NodeId,
    pub data: Map<String, Value>,
}

/// Notification that an array's items changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayChange {
    pub array_id: String,
    pub container: NodeId,
}

struct Parts {
    items: NodeId,
    template: NodeId,
}

/// Manages the array containers of a field tree.
#[derive(Debug, Default)]
pub struct ArrayController {
    changes: Vec<ArrayChange>,
}

impl ArrayController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The container's `array-id`, falling back to its schema path.
    pub fn array_id<T: FieldTree>(tree: &T, container: NodeId) -> String {
        tree.get_attribute(container, ATTR_ARRAY_ID)
            .or_else(|| tree.get_attribute(container, ATTR_SCHEMA_PATH))
            .unwrap_or_default()
    }

    fn parts<T: FieldTree>(tree: &T, container: NodeId) -> Result<Parts> {
        let children = tree.children(container);
        let find = |class: &str| children.iter().copied().find(|&c| tree.has_class(c, class));
        let id = || Self::array_id(tree, container);

        let items = find(CLASS_ITEMS)
            .ok_or_else(|| FormError::structural(id(), "missing live items region"))?;
        let template =
            find(CLASS_TEMPLATE).ok_or_else(|| FormError::structural(id(), "missing template"))?;
        if find(CLASS_ADD).is_none() {
            return Err(FormError::structural(id(), "missing add affordance"));
        }
        Ok(Parts { items, template })
    }

    /// Live (non-template, non-hidden) items in document order.
    pub fn live_items<T: FieldTree>(tree: &T, container: NodeId) -> Vec<NodeId> {
        let Ok(parts) = Self::parts(tree, container) else {
            return Vec::new();
        };
        tree.children(parts.items)
            .into_iter()
            .filter(|&n| tree.has_class(n, CLASS_ITEM) && !tree.has_class(n, CLASS_HIDDEN))
            .collect()
    }

    /// Check the markup contract and make sure the container has a live item.
    pub fn init_container<T: FieldTree>(&mut self, tree: &mut T, container: NodeId) -> Result<()> {
        Self::parts(tree, container)?;
        if Self::live_items(tree, container).is_empty() {
            let before = self.changes.len();
            self.add_item(tree, container)?;
            self.changes.truncate(before);
        }
        Ok(())
    }

    /// Every array container of the tree outside templates, outermost first.
    pub fn containers<T: FieldTree>(tree: &T) -> Vec<NodeId> {
        tree.descendants(tree.root())
            .into_iter()
            .filter(|&n| tree.has_class(n, CLASS_ARRAY) && !tree.in_template(n))
            .collect()
    }

    /// Container whose `array-id` is `array_id`.
    pub fn find_container<T: FieldTree>(tree: &T, array_id: &str) -> Option<NodeId> {
        Self::containers(tree)
            .into_iter()
            .find(|&n| Self::array_id(tree, n) == array_id)
    }

    fn next_id() -> String {
        let millis = Utc::now().timestamp_millis();
        let sequence = ITEM_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        format!("{millis:x}{sequence:04x}")
    }

    /// Clone the template into a new live item.
    pub fn add_item<T: FieldTree>(&mut self, tree: &mut T, container: NodeId) -> Result<ArrayItem> {
        let parts = Self::parts(tree, container)?;
        let array_id = Self::array_id(tree, container);

        let wrapper = tree
            .clone_subtree(parts.template)
            .ok_or_else(|| FormError::structural(&array_id, "template could not be cloned"))?;
        let Some(item) = tree
            .children(wrapper)
            .into_iter()
            .find(|&n| tree.has_class(n, CLASS_ITEM))
        else {
            tree.remove(wrapper);
            return Err(FormError::structural(&array_id, "template has no inner item"));
        };
        tree.append_child(parts.items, item);
        tree.remove(wrapper);
        tree.remove_class(item, CLASS_TEMPLATE);
        tree.remove_class(item, CLASS_HIDDEN);

        let id = Self::next_id();
        tree.set_attribute(item, ATTR_ITEM_ID, &id);
        rename_inputs(tree, item, &id);

        let nested: Vec<NodeId> = tree
            .descendants(item)
            .into_iter()
            .filter(|&n| tree.has_class(n, CLASS_ARRAY) && !tree.in_template(n))
            .collect();
        for n in nested {
            self.init_container(tree, n)?;
        }

        reindex(tree, container);
        let ordinal = Self::live_items(tree, container)
            .iter()
            .position(|&n| n == item)
            .unwrap_or_default();
        debug!("added item {id} to {array_id} at {ordinal}");
        self.changes.push(ArrayChange {
            array_id,
            container,
        });

        Ok(ArrayItem {
            data: item_data(tree, item),
            id,
            ordinal,
            node: item,
        })
    }

    /// Remove a live item. Refuses (returns false) when it is the last one.
    pub fn remove_item<T: FieldTree>(&mut self, tree: &mut T, container: NodeId, item: NodeId) -> bool {
        let live = Self::live_items(tree, container);
        if !live.contains(&item) {
            warn!("{item:?} is not a live item of {}", Self::array_id(tree, container));
            return false;
        }
        if live.len() <= 1 {
            debug!("refusing to remove the last item of {}", Self::array_id(tree, container));
            return false;
        }
        tree.remove(item);
        reindex(tree, container);
        self.changes.push(ArrayChange {
            array_id: Self::array_id(tree, container),
            container,
        });
        true
    }

    /// Remove the live item whose generated id is `item_id`.
    pub fn remove_item_by_id<T: FieldTree>(
        &mut self,
        tree: &mut T,
        container: NodeId,
        item_id: &str,
    ) -> bool {
        let found = Self::live_items(tree, container)
            .into_iter()
            .find(|&n| tree.get_attribute(n, ATTR_ITEM_ID).as_deref() == Some(item_id));
        match found {
            Some(item) => self.remove_item(tree, container, item),
            None => false,
        }
    }

    /// Live items of a container as `ArrayItem`s.
    pub fn items<T: FieldTree>(tree: &T, container: NodeId) -> Vec<ArrayItem> {
        Self::live_items(tree, container)
            .into_iter()
            .enumerate()
            .map(|(ordinal, node)| ArrayItem {
                id: tree.get_attribute(node, ATTR_ITEM_ID).unwrap_or_default(),
                ordinal,
                node,
                data: item_data(tree, node),
            })
            .collect()
    }

    /// One value map per live item, keyed by local field names.
    pub fn get_items_data<T: FieldTree>(tree: &T, container: NodeId) -> Vec<Value> {
        Self::live_items(tree, container)
            .into_iter()
            .map(|item| Value::Object(item_data(tree, item)))
            .collect()
    }

    /// Resize the live items to `values.len()` (at least one) and write the
    /// values into their inputs. Produces no change notifications.
    pub fn sync_from_data<T: FieldTree>(
        &mut self,
        tree: &mut T,
        container: NodeId,
        values: &[Value],
    ) -> Result<()> {
        let before = self.changes.len();
        let target = values.len().max(1);
        while Self::live_items(tree, container).len() < target {
            self.add_item(tree, container)?;
        }
        while let Some(&last) = Self::live_items(tree, container).get(target) {
            tree.remove(last);
        }
        reindex(tree, container);

        for (i, item) in Self::live_items(tree, container).into_iter().enumerate() {
            let value = values.get(i).cloned().unwrap_or(Value::Null);
            self.write_item(tree, item, &value)?;
        }
        self.changes.truncate(before);
        Ok(())
    }

    fn write_item<T: FieldTree>(&mut self, tree: &mut T, item: NodeId, value: &Value) -> Result<()> {
        let (inputs, nested) = item_members(tree, item);
        for input in inputs {
            let key = local_name(tree, input);
            let v = match value {
                Value::Object(map) => map.get(&key).cloned().unwrap_or(Value::Null),
                scalar if key == SCALAR_ITEM_KEY => scalar.clone(),
                _ => Value::Null,
            };
            let kind = tree.field_kind(input);
            tree.set_value(input, kind.write_value(&v));
        }
        for container in nested {
            let key = local_array_name(tree, container);
            let values = value
                .get(&key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            self.sync_from_data(tree, container, &values)?;
        }
        Ok(())
    }

    /// Drain pending change notifications.
    pub fn take_changes(&mut self) -> Vec<ArrayChange> {
        std::mem::take(&mut self.changes)
    }
}

fn rename_inputs<T: FieldTree>(tree: &mut T, item: NodeId, id: &str) {
    let mut renamed = Vec::new();
    for n in tree.inputs_within(item) {
        if let Some(name) = tree.get_attribute(n, ATTR_NAME) {
            if tree.get_attribute(n, ATTR_LOCAL_NAME).is_none() {
                tree.set_attribute(n, ATTR_LOCAL_NAME, &name);
            }
            tree.set_attribute(n, ATTR_NAME, &format!("{name}_{id}"));
        }
        if let Some(old) = tree.get_attribute(n, ATTR_ID) {
            let new = format!("{old}_{id}");
            tree.set_attribute(n, ATTR_ID, &new);
            renamed.push((old, new));
        }
        if let Some(schema_id) = tree.get_attribute(n, ATTR_SCHEMA_ID) {
            tree.set_attribute(n, ATTR_SCHEMA_ID, &format!("{schema_id}_{id}"));
        }
    }

    for n in tree.descendants(item) {
        if tree.tag(n) != Some("label") {
            continue;
        }
        let Some(target) = tree.get_attribute(n, ATTR_FOR) else {
            continue;
        };
        if let Some((_, new)) = renamed.iter().find(|(old, _)| *old == target) {
            tree.set_attribute(n, ATTR_FOR, new);
        }
    }
}

fn reindex<T: FieldTree>(tree: &mut T, container: NodeId) {
    for (i, item) in ArrayController::live_items(tree, container).into_iter().enumerate() {
        tree.set_attribute(item, ATTR_ORDINAL, &i.to_string());
    }
}

/// Direct inputs of an item and its nested array containers, skipping
/// everything inside the nested containers.
fn item_members<T: FieldTree>(tree: &T, item: NodeId) -> (Vec<NodeId>, Vec<NodeId>) {
    let mut inputs = Vec::new();
    let mut nested = Vec::new();
    let mut stack: Vec<NodeId> = tree.children(item).into_iter().rev().collect();
    while let Some(n) = stack.pop() {
        if tree.has_class(n, CLASS_ARRAY) {
            nested.push(n);
            continue;
        }
        if tree.has_class(n, CLASS_TEMPLATE) {
            continue;
        }
        if tree.is_input(n) {
            inputs.push(n);
        }
        stack.extend(tree.children(n).into_iter().rev());
    }
    (inputs, nested)
}

fn item_data<T: FieldTree>(tree: &T, item: NodeId) -> Map<String, Value> {
    let (inputs, nested) = item_members(tree, item);
    let mut data = Map::new();
    for input in inputs {
        let kind = tree.field_kind(input);
        let raw = tree.value(input).unwrap_or(Value::Null);
        data.insert(local_name(tree, input), kind.read_value(&raw));
    }
    for container in nested {
        data.insert(
            local_array_name(tree, container),
            Value::Array(ArrayController::get_items_data(tree, container)),
        );
    }
    data
}

fn last_segment(name: &str) -> String {
    name.rsplit(['.', '-']).next().unwrap_or(name).to_string()
}

fn local_name<T: FieldTree>(tree: &T, input: NodeId) -> String {
    let name = tree
        .get_attribute(input, ATTR_LOCAL_NAME)
        .or_else(|| tree.get_attribute(input, ATTR_NAME))
        .unwrap_or_default();
    last_segment(&name)
}

fn local_array_name<T: FieldTree>(tree: &T, container: NodeId) -> String {
    last_segment(&ArrayController::array_id(tree, container))
}
