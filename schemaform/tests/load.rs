use std::{cell::RefCell, io::Write, rc::Rc};

use schemaform::{
    EventKind, FormEvent, FormRuntime, MemoryTree, RuntimeConfig, SchemaSource, config::load_data,
};
use serde_json::json;

fn recorder(form: &mut FormRuntime<MemoryTree>) -> Rc<RefCell<Vec<FormEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let e = events.clone();
    form.bus_mut().on_any(move |event| {
        e.borrow_mut().push(event.clone());
        Ok(())
    });
    events
}

#[test]
fn test_load_schema_from_file() {
    let schema = json!({
        "properties": {"plan": {"type": "string"}, "seats": {"type": "integer"}},
        "if": {"properties": {"plan": {"const": "team"}}},
        "then": {"required": ["seats"]}
    });
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, "{schema}").unwrap();

    let node = schemaform::SchemaNode::from_value(&schema).unwrap();
    let mut form = FormRuntime::new(MemoryTree::scaffold(&node), json!({}), RuntimeConfig::default());
    let events = recorder(&mut form);
    tokio_test::block_on(form.load(SchemaSource::Path(file.path().to_path_buf()))).unwrap();

    assert!(form.schema().is_some());
    assert_eq!(
        events.borrow().last(),
        Some(&FormEvent::Ready {
            schema: schema.clone()
        })
    );
    assert_eq!(form.is_visible("seats"), Some(false));
    form.update_field("plan", json!("team")).unwrap();
    assert_eq!(form.is_visible("seats"), Some(true));
}

#[test]
fn test_failed_load_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let mut form = FormRuntime::new(MemoryTree::new(), json!({"a": 1}), RuntimeConfig::default());
    let events = recorder(&mut form);

    tokio_test::block_on(form.load(SchemaSource::Path(dir.path().join("missing.json")))).unwrap();

    let kinds: Vec<EventKind> = events.borrow().iter().map(FormEvent::kind).collect();
    assert_eq!(kinds, vec![EventKind::Error, EventKind::Ready]);
    assert!(form.schema().is_none());

    // binding still works against raw field names
    form.update_field("b", json!(2)).unwrap();
    assert_eq!(form.get_data(), json!({"a": 1, "b": 2}));
    assert!(form.submit());
}

#[test]
fn test_invalid_schema_json_degrades() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, "{{ not json").unwrap();
    let mut form = FormRuntime::new(MemoryTree::new(), json!({}), RuntimeConfig::default());
    let events = recorder(&mut form);

    tokio_test::block_on(form.load(SchemaSource::Path(file.path().to_path_buf()))).unwrap();
    let FormEvent::Error { message } = &events.borrow()[0] else {
        panic!("expected an error event first");
    };
    assert!(message.starts_with("schema load failed"), "{message}");
}

#[cfg(not(feature = "remote"))]
#[test]
fn test_url_without_remote_feature() {
    let mut form = FormRuntime::new(MemoryTree::new(), json!({}), RuntimeConfig::default());
    let events = recorder(&mut form);
    tokio_test::block_on(form.load(SchemaSource::Url("https://example.invalid/schema.json".into())))
        .unwrap();
    assert_eq!(events.borrow()[0].kind(), EventKind::Error);
}

#[test]
fn test_initial_data_file_feeds_the_form() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "plan = \"team\"\nseats = 3").unwrap();
    let data = load_data(file.path()).unwrap();

    let schema = json!({"properties": {"plan": {"type": "string"}, "seats": {"type": "integer"}}});
    let node = schemaform::SchemaNode::from_value(&schema).unwrap();
    let mut form = FormRuntime::new(MemoryTree::scaffold(&node), data, RuntimeConfig::default());
    tokio_test::block_on(form.load(SchemaSource::Inline(schema))).unwrap();
    assert_eq!(form.get("seats"), Some(&json!(3)));
}
