use std::{cell::RefCell, rc::Rc};

use schemaform::{
    EventKind, FormEvent, FormRuntime, MemoryTree, RuntimeConfig, SchemaNode, apply::DirectiveAction,
};
use serde_json::{Value, json};

fn form(schema: Value, data: Value) -> FormRuntime<MemoryTree> {
    let _ = env_logger::builder().is_test(true).try_init();
    let node = SchemaNode::from_value(&schema).unwrap();
    let mut form = FormRuntime::new(MemoryTree::scaffold(&node), data, RuntimeConfig::default());
    form.initialize(Some(schema)).unwrap();
    form
}

fn user_type_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "userType": {"type": "string", "enum": ["individual", "company"]},
            "firstName": {"type": "string"},
            "lastName": {"type": "string"},
            "companyName": {"type": "string"},
            "vatNumber": {"type": "string"}
        },
        "if": {"properties": {"userType": {"const": "individual"}}},
        "then": {"required": ["firstName", "lastName"]},
        "else": {"required": ["companyName", "vatNumber"]}
    })
}

#[test]
fn test_if_then_else_toggles_exactly() {
    let mut form = form(user_type_schema(), json!({}));

    form.update_field("field-userType", json!("individual")).unwrap();
    for field in ["firstName", "lastName"] {
        assert_eq!(form.is_visible(field), Some(true), "{field}");
        assert_eq!(form.is_required(field), Some(true), "{field}");
    }
    for field in ["companyName", "vatNumber"] {
        assert_eq!(form.is_visible(field), Some(false), "{field}");
        assert_eq!(form.is_required(field), Some(false), "{field}");
    }

    form.update_field("field-userType", json!("company")).unwrap();
    for field in ["firstName", "lastName"] {
        assert_eq!(form.is_visible(field), Some(false), "{field}");
        assert_eq!(form.is_required(field), Some(false), "{field}");
    }
    for field in ["companyName", "vatNumber"] {
        assert_eq!(form.is_visible(field), Some(true), "{field}");
        assert_eq!(form.is_required(field), Some(true), "{field}");
    }
    // the discriminator itself is never hidden
    assert_eq!(form.is_visible("userType"), Some(true));
}

fn account_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "accountType": {"type": "string"},
            "businessSection": {
                "type": "object",
                "properties": {
                    "companyName": {"type": "string"},
                    "taxId": {"type": "string"},
                    "website": {"type": "string"}
                }
            },
            "personalSection": {
                "type": "object",
                "properties": {"fullName": {"type": "string"}}
            },
            "nonprofitSection": {
                "type": "object",
                "properties": {"charityNumber": {"type": "string"}}
            }
        },
        "anyOf": [
            {
                "properties": {
                    "accountType": {"const": "business"},
                    "businessSection": {"required": ["companyName", "taxId"]}
                },
                "required": ["businessSection"]
            },
            {
                "properties": {
                    "accountType": {"const": "personal"},
                    "personalSection": {"required": ["fullName"]}
                },
                "required": ["personalSection"]
            }
        ],
        "if": {"properties": {"accountType": {"const": "nonprofit"}}},
        "then": {"required": ["nonprofitSection"]}
    })
}

#[test]
fn test_any_of_discriminator_switches_cleanly() {
    let mut form = form(account_schema(), json!({}));

    form.update_field("accountType", json!("business")).unwrap();
    assert_eq!(form.is_visible("businessSection"), Some(true));
    assert_eq!(form.is_visible("personalSection"), Some(false));
    assert_eq!(form.is_visible("nonprofitSection"), Some(false));
    assert_eq!(form.is_required("businessSection.companyName"), Some(true));
    assert_eq!(form.is_required("businessSection.taxId"), Some(true));
    assert_eq!(form.is_required("businessSection.website"), Some(false));

    form.update_field("accountType", json!("personal")).unwrap();
    assert_eq!(form.is_visible("businessSection"), Some(false));
    assert_eq!(form.is_visible("personalSection"), Some(true));
    assert_eq!(form.is_visible("nonprofitSection"), Some(false));
    assert_eq!(form.is_required("businessSection.companyName"), Some(false));
    assert_eq!(form.is_required("businessSection.taxId"), Some(false));
    assert_eq!(form.is_required("personalSection.fullName"), Some(true));

    let last = form.history("businessSection").unwrap().last().unwrap();
    assert_eq!(last.reason, "anyOf[0]: not selected");
}

#[test]
fn test_all_of_is_cumulative() {
    let mut form = form(
        json!({
            "properties": {
                "age": {"type": "integer"},
                "member": {"type": "boolean"},
                "guardian": {"type": "string"},
                "memberId": {"type": "string"}
            },
            "allOf": [
                {"if": {"properties": {"age": {"maximum": 17}}}, "then": {"required": ["guardian"]}},
                {"if": {"properties": {"member": {"const": true}}}, "then": {"required": ["memberId"]}}
            ]
        }),
        json!({}),
    );

    form.set_data(json!({"age": 12, "member": true})).unwrap();
    let required: Vec<String> = form
        .directives()
        .into_iter()
        .filter(|d| d.action == DirectiveAction::Require)
        .map(|d| d.path)
        .collect();
    assert_eq!(required, vec!["guardian", "memberId"]);
    assert_eq!(form.is_required("guardian"), Some(true));
    assert_eq!(form.is_required("memberId"), Some(true));

    form.update_field("field-member", json!(false)).unwrap();
    assert_eq!(form.is_required("guardian"), Some(true));
    assert_eq!(form.is_visible("memberId"), Some(false));
}

#[test]
fn test_dependencies_show_dependents() {
    let mut form = form(
        json!({
            "properties": {
                "creditCard": {"type": "string"},
                "billingAddress": {"type": "string"}
            },
            "dependencies": {"creditCard": ["billingAddress"]}
        }),
        json!({}),
    );
    assert_eq!(form.is_visible("billingAddress"), Some(false));
    form.update_field("creditCard", json!("4111")).unwrap();
    assert_eq!(form.is_visible("billingAddress"), Some(true));
    assert_eq!(form.is_required("billingAddress"), Some(true));
    form.update_field("creditCard", json!("")).unwrap();
    assert_eq!(form.is_visible("billingAddress"), Some(false));
}

#[test]
fn test_nested_conditional_uses_its_scope() {
    let mut form = form(
        json!({
            "properties": {
                "shipping": {
                    "type": "object",
                    "properties": {
                        "method": {"type": "string"},
                        "locker": {"type": "string"}
                    },
                    "if": {"properties": {"method": {"const": "locker"}}},
                    "then": {"required": ["locker"]}
                }
            }
        }),
        json!({}),
    );
    assert_eq!(form.is_visible("shipping.locker"), Some(false));
    form.update_field("field-shipping-method", json!("locker")).unwrap();
    assert_eq!(form.is_visible("shipping.locker"), Some(true));
    assert_eq!(form.is_required("shipping.locker"), Some(true));
}

#[test]
fn test_nested_path_binding() {
    let mut form = form(
        json!({
            "properties": {
                "additionalInfo": {
                    "type": "object",
                    "properties": {"phone": {"type": "string"}}
                }
            }
        }),
        json!({}),
    );
    form.update_field("field-additionalInfo-phone", json!("555-0100")).unwrap();
    assert_eq!(form.get_data()["additionalInfo"]["phone"], json!("555-0100"));
}

#[test]
fn test_evaluation_is_idempotent_without_conditionals() {
    let mut form = form(
        json!({
            "required": ["name"],
            "properties": {
                "name": {"type": "string"},
                "address": {"type": "object", "properties": {"city": {"type": "string"}}}
            }
        }),
        json!({}),
    );
    form.evaluate_all_conditions();
    let before = form.visibility().total_entries();
    form.evaluate_all_conditions();
    assert_eq!(form.visibility().total_entries(), before);
    assert_eq!(form.is_required("name"), Some(true));
}

#[test]
fn test_set_data_round_trip() {
    let mut form = form(user_type_schema(), json!({}));
    for (path, value) in [
        ("firstName", json!("Ada")),
        ("profile.age", json!(36)),
        ("flags.beta", json!(true)),
        ("tags[0]", json!("x")),
    ] {
        let mut entry = serde_json::Map::new();
        entry.insert(path.to_string(), value.clone());
        form.set_data(Value::Object(entry)).unwrap();
        assert_eq!(form.get(path), Some(&value), "{path}");
    }
}

#[test]
fn test_history_records_show_on_repeat() {
    let mut form = form(user_type_schema(), json!({}));
    form.update_field("userType", json!("individual")).unwrap();
    let before = form.history("firstName").unwrap().len();
    form.update_field("lastName", json!("Lovelace")).unwrap();
    let record = form.history("firstName").unwrap();
    assert_eq!(record.len(), before + 1);
    assert_eq!(record.last().unwrap().reason, "if: condition met");
    assert!(form.recent_history("firstName").len() <= 10);
}

#[test]
fn test_events_and_reset() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let node = SchemaNode::from_value(&user_type_schema()).unwrap();
    let mut form = FormRuntime::new(
        MemoryTree::scaffold(&node),
        json!({"userType": "company"}),
        RuntimeConfig::default(),
    );
    let e = events.clone();
    form.bus_mut().on_any(move |event| {
        e.borrow_mut().push(event.kind());
        Ok(())
    });
    form.initialize(Some(user_type_schema())).unwrap();
    assert_eq!(events.borrow().last(), Some(&EventKind::Ready));
    assert!(events.borrow().contains(&EventKind::FieldHide));

    form.update_field("userType", json!("individual")).unwrap();
    assert_eq!(form.is_visible("companyName"), Some(false));

    let reset = Rc::new(RefCell::new(None));
    let r = reset.clone();
    form.bus_mut().on(EventKind::Reset, move |event| {
        if let FormEvent::Reset { form_data } = event {
            *r.borrow_mut() = Some(form_data.clone());
        }
        Ok(())
    });
    form.reset().unwrap();
    assert_eq!(form.get_data(), json!({"userType": "company"}));
    assert_eq!(*reset.borrow(), Some(json!({"userType": "company"})));
    assert_eq!(form.is_visible("companyName"), Some(true));
    assert_eq!(form.is_visible("firstName"), Some(false));
}

#[test]
fn test_const_matches_float_typed_number() {
    let mut form = form(
        json!({
            "properties": {"n": {"type": "number"}, "x": {"type": "string"}},
            "if": {"properties": {"n": {"const": 2}}},
            "then": {"required": ["x"]}
        }),
        json!({}),
    );
    form.update_field("field-n", json!("2.0")).unwrap();
    assert_eq!(form.get("n"), Some(&json!(2.0)));
    assert_eq!(form.is_visible("x"), Some(true));
    assert_eq!(form.is_required("x"), Some(true));
}
