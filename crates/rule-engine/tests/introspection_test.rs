//! 内省集成测试
//!
//! 重点验证：按内省得到的取值组合构造数据，再求值必须命中对应结果。

use rule_engine::{
    IntrospectOptions, IntrospectionResult, Outcome, Rule, RuleEngine, RuleError,
};
use serde_json::{Map, Value, json};

fn tiered_rule() -> Rule {
    Rule::from_json(
        r#"
        {
            "conditions": [
                {
                    "and": [
                        { "field": "tier", "operator": "Equals", "value": "gold" },
                        {
                            "or": [
                                { "field": "region", "operator": "Equals", "value": "eu" },
                                { "field": "region", "operator": "Equals", "value": "us" }
                            ],
                            "result": { "value": "gold-region" }
                        }
                    ],
                    "result": { "value": "gold" }
                },
                {
                    "and": [
                        { "field": "tier", "operator": "Equals", "value": "silver" },
                        {
                            "none": [
                                { "field": "status", "operator": "Equals", "value": "banned" }
                            ],
                            "result": { "value": "not-banned" }
                        }
                    ],
                    "result": { "value": "silver" }
                }
            ],
            "default": { "value": "basic" }
        }
        "#,
    )
    .unwrap()
}

/// 根据一个选项构造满足它的数据
fn satisfying(option: &Map<String, Value>) -> Value {
    let mut criteria = Map::new();
    for (field, requirement) in option {
        let value = match requirement {
            Value::Object(bound) if bound.get("operator") == Some(&json!("NotEquals")) => {
                json!(format!("not-{}", bound["value"]))
            }
            Value::Array(values) => values[0].clone(),
            scalar => scalar.clone(),
        };
        criteria.insert(field.clone(), value);
    }
    Value::Object(criteria)
}

fn introspect(rule: &Rule) -> IntrospectionResult {
    RuleEngine::new()
        .introspect(rule, IntrospectOptions::default())
        .unwrap()
}

#[tokio::test]
async fn test_round_trip_every_option() {
    let engine = RuleEngine::new();
    let rule = tiered_rule();
    let result = introspect(&rule);

    assert_eq!(result.results.len(), 2);
    for range in &result.results {
        assert!(!range.options.is_empty());
        for option in &range.options {
            let criteria = satisfying(option);
            let outcome = engine.evaluate(&rule, &criteria).await.unwrap();
            let evaluated = outcome.single().unwrap();
            assert!(evaluated.is_passed, "option {:?} should pass", option);
            assert_eq!(evaluated.value, range.result.value);
        }
    }
}

#[test]
fn test_simple_and_round_trip_shape() {
    let rule = Rule::from_value(json!({
        "conditions": [{
            "and": [
                { "field": "age", "operator": "Equals", "value": 18 },
                { "field": "status", "operator": "Equals", "value": "active" }
            ],
            "result": { "value": "R" }
        }]
    }))
    .unwrap();

    let result = introspect(&rule);
    let range = result.range_for(&json!("R")).unwrap();
    assert_eq!(
        Value::Object(range.options[0].clone()),
        json!({ "age": 18, "status": "active" })
    );
}

#[test]
fn test_none_block_is_negated() {
    let result = introspect(&tiered_rule());
    let silver = result.range_for(&json!("silver")).unwrap();

    assert_eq!(
        silver.options.iter().cloned().map(Value::Object).collect::<Vec<_>>(),
        vec![json!({
            "tier": "silver",
            "status": { "operator": "NotEquals", "value": "banned" }
        })]
    );
}

#[test]
fn test_or_branches_do_not_leak() {
    let result = introspect(&tiered_rule());
    let gold = result.range_for(&json!("gold")).unwrap();

    assert_eq!(
        gold.options.iter().cloned().map(Value::Object).collect::<Vec<_>>(),
        vec![
            json!({ "tier": "gold", "region": "eu" }),
            json!({ "tier": "gold", "region": "us" })
        ]
    );
}

#[test]
fn test_non_granular_rule_is_fatal() {
    let rule = Rule::from_value(json!({
        "conditions": [{
            "and": [
                { "or": [ { "field": "a", "operator": "Equals", "value": 1 } ] }
            ],
            "result": { "value": "R" }
        }]
    }))
    .unwrap();

    let err = RuleEngine::new()
        .introspect(&rule, IntrospectOptions::default())
        .unwrap_err();
    assert!(matches!(err, RuleError::NotGranular));
}

#[test]
fn test_metadata_serialization() {
    let result = RuleEngine::new()
        .introspect(&tiered_rule(), IntrospectOptions::all())
        .unwrap();
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(
        value["complexity"],
        json!({
            "maxDepth": 2,
            "totalConditions": 4,
            "totalConstraints": 5,
            "uniqueFields": 3
        })
    );
    assert_eq!(value["metadata"]["usedOperators"]["comparison"], json!(["Equals"]));
    assert_eq!(value["metadata"]["fieldTypes"]["tier"].as_array().unwrap().len(), 6);
    assert_eq!(value["warnings"], json!([]));
}

#[tokio::test]
async fn test_batch_over_introspected_options() {
    let engine = RuleEngine::new();
    let rule = tiered_rule();
    let result = introspect(&rule);

    let mut expected = Vec::new();
    let mut batch = Vec::new();
    for range in &result.results {
        for option in &range.options {
            batch.push(satisfying(option));
            expected.push(range.result.value.clone());
        }
    }
    batch.push(json!({ "tier": "bronze" }));
    expected.push(json!("basic"));

    let values = engine.get_evaluate_result(&rule, &Value::Array(batch)).await.unwrap();
    assert_eq!(values, Outcome::Batch(expected));
}
