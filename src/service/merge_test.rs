use futures::stream;
use futures::StreamExt;
use serde_json::json;
use serde_json::Value;

use super::merge::merged;
use super::*;
use crate::Error;
use crate::Result;

fn keep_max() -> MergeStrategy {
    MergeStrategy::new(|previous: &Value, current: Value| {
        let previous_v = previous["v"].as_i64().unwrap_or_default();
        let current_v = current["v"].as_i64().unwrap_or_default();
        if current_v >= previous_v {
            current
        } else {
            previous.clone()
        }
    })
}

#[test]
fn test_strategies_compare_by_identity() {
    let a = keep_max();
    let b = keep_max();

    assert_eq!(a, a.clone());
    assert_ne!(a, b);
    assert_ne!(a.id(), b.id());
}

#[tokio::test]
async fn test_first_document_seeds_the_fold() {
    let documents: Vec<Result<Value>> = vec![Ok(json!({"v": 2})), Ok(json!({"v": 1})), Ok(json!({"v": 5}))];

    let outputs: Vec<Value> = merged(stream::iter(documents), keep_max())
        .map(|item| item.unwrap())
        .collect()
        .await;

    assert_eq!(outputs, vec![json!({"v": 2}), json!({"v": 2}), json!({"v": 5})]);
}

#[tokio::test]
async fn test_merge_receives_previous_output() {
    let concat = MergeStrategy::new(|previous: &Value, current: Value| {
        let mut items = previous.as_array().cloned().unwrap_or_default();
        items.extend(current.as_array().cloned().unwrap_or_default());
        Value::Array(items)
    });
    let documents: Vec<Result<Value>> = vec![Ok(json!([1])), Ok(json!([2])), Ok(json!([3]))];

    let mut outputs: Vec<Result<Value>> = merged(stream::iter(documents), concat).collect().await;

    assert_eq!(outputs.pop().unwrap().unwrap(), json!([1, 2, 3]));
}

#[tokio::test]
async fn test_errors_pass_through() {
    let documents: Vec<Result<Value>> = vec![Ok(json!({"v": 1})), Err(Error::ConfigLoad("gone".to_string()))];

    let outputs: Vec<Result<Value>> = merged(stream::iter(documents), keep_max()).collect().await;

    assert!(outputs[0].is_ok());
    assert!(matches!(outputs[1], Err(Error::ConfigLoad(_))));
}
