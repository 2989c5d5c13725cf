use std::collections::BTreeMap;
use std::collections::HashMap;

use serde_json::json;

use super::*;
use crate::Error;

#[test]
fn test_primitives_stringify_directly() {
    assert_eq!(simple_hash(&42).unwrap(), "42");
    assert_eq!(simple_hash(&-7i64).unwrap(), "-7");
    assert_eq!(simple_hash(&1.5f64).unwrap(), "1.5");
    assert_eq!(simple_hash(&2.0f64).unwrap(), "2");
    assert_eq!(simple_hash(&true).unwrap(), "true");
    assert_eq!(simple_hash("main/doc").unwrap(), "main/doc");
}

#[test]
fn test_strings_are_escaped() {
    assert_eq!(simple_hash("a b").unwrap(), "a%20b");
    assert_eq!(simple_hash("x:y|z").unwrap(), "x%3Ay%7Cz");
    assert_eq!(simple_hash("é").unwrap(), "%E9");
    assert_eq!(simple_hash("€").unwrap(), "%u20AC");
    assert_eq!(simple_hash("@*_+-./").unwrap(), "@*_+-./");
}

#[test]
fn test_objects_hash_with_sorted_keys() {
    let key = json!({"document": "x/1", "headers": {"id": "7", "ack": "auto"}});
    assert_eq!(simple_hash(&key).unwrap(), "{document:x/1|headers:{ack:auto|id:7}}");
}

#[test]
fn test_property_order_does_not_matter() {
    let a = json!({"b": 1, "a": {"y": true, "x": "s"}});
    let b = json!({"a": {"x": "s", "y": true}, "b": 1});
    assert_eq!(simple_hash(&a).unwrap(), simple_hash(&b).unwrap());

    let mut first = HashMap::new();
    first.insert("one", 1);
    first.insert("two", 2);
    let second: BTreeMap<&str, i32> = [("two", 2), ("one", 1)].into_iter().collect();
    assert_eq!(simple_hash(&first).unwrap(), simple_hash(&second).unwrap());
}

#[test]
fn test_null_entries_are_omitted() {
    let with_null = json!({"document": "x", "headers": null});
    let without = json!({"document": "x"});
    assert_eq!(simple_hash(&with_null).unwrap(), simple_hash(&without).unwrap());
}

#[test]
fn test_empty_and_null_keys_hash_to_empty_string() {
    assert_eq!(simple_hash(&json!({})).unwrap(), "");
    assert_eq!(simple_hash(&json!(null)).unwrap(), "");
    assert_eq!(simple_hash(&()).unwrap(), "");
}

#[test]
fn test_distinct_values_hash_differently() {
    assert_ne!(
        simple_hash(&json!({"a": "1"})).unwrap(),
        simple_hash(&json!({"a": 1.5})).unwrap()
    );
    assert_ne!(
        simple_hash(&json!({"a": {"b": 1}})).unwrap(),
        simple_hash(&json!({"a": {"b": 2}})).unwrap()
    );
}

#[test]
fn test_arrays_are_unhashable() {
    let result = simple_hash(&json!({"list": [1, 2]}));
    assert!(matches!(result, Err(Error::UnhashableKey(_))));
    assert_eq!(simple_hash_safe(&json!([1])), None);
}

#[test]
fn test_unserializable_values_are_unhashable() {
    let mut map = HashMap::new();
    map.insert((1, 2), "tuple keys cannot become JSON object keys");

    assert!(matches!(simple_hash(&map), Err(Error::UnhashableKey(_))));
    assert_eq!(simple_hash_safe(&map), None);
}

#[test]
fn test_safe_variant_matches_on_simple_values() {
    let key = json!({"document": "x/1"});
    assert_eq!(simple_hash_safe(&key), Some(simple_hash(&key).unwrap()));
}
