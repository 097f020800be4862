use serde_json::json;

use crate::core::device::{field_delta, project};

#[test]
fn delta_contains_only_differing_fields() {
    let current = json!({"dns": ["8.8.8.8"], "vlan": 10, "mtu": 1500});
    let desired = json!({"dns": ["1.1.1.1", "1.0.0.1"], "vlan": 10});
    let delta = field_delta(&current, &desired);
    assert_eq!(delta, json!({"dns": ["1.1.1.1", "1.0.0.1"]}));
}

#[test]
fn delta_is_empty_when_desired_state_already_in_effect() {
    let current = json!({"dns": ["1.1.1.1"], "vlan": 10});
    let desired = json!({"dns": ["1.1.1.1"]});
    let delta = field_delta(&current, &desired);
    assert!(delta.as_object().unwrap().is_empty());
}

#[test]
fn delta_includes_fields_missing_from_current() {
    let current = json!({"vlan": 10});
    let desired = json!({"dns": ["1.1.1.1"]});
    assert_eq!(field_delta(&current, &desired), json!({"dns": ["1.1.1.1"]}));
}

#[test]
fn projection_tracks_desired_keys_only() {
    let state = json!({"dns": ["8.8.8.8"], "vlan": 10, "mtu": 1500});
    let shape = json!({"dns": [], "upstream": "x"});
    assert_eq!(
        project(&state, &shape),
        json!({"dns": ["8.8.8.8"], "upstream": null})
    );
}
