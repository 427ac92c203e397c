//! 规则引擎门面
//!
//! 编排 校验 → 数据变换 → 求值，并提供内省与操作符元数据查询。
//! 引擎本身不持有任何按调用变化的状态，可在多个任务间共享。

use crate::config::EngineConfig;
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::introspector::{IntrospectOptions, IntrospectionResult, Introspector, OperatorValidation};
use crate::models::{EvaluationResult, Outcome, Rule};
use crate::mutator::Mutator;
use crate::registry::{OperatorMetadata, OperatorRegistry};
use crate::validator::{RuleValidator, ValidationResult};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// 规则引擎
#[derive(Debug, Clone)]
pub struct RuleEngine {
    config: EngineConfig,
    registry: Arc<OperatorRegistry>,
    evaluator: Evaluator,
    introspector: Introspector,
    validator: RuleValidator,
    mutator: Mutator,
}

impl RuleEngine {
    /// 使用默认配置和内置操作符创建引擎
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_registry(config, OperatorRegistry::with_builtins())
    }

    /// 使用自定义操作符注册表创建引擎
    pub fn with_registry(config: EngineConfig, registry: OperatorRegistry) -> Self {
        let registry = Arc::new(registry);
        let mutator = Mutator::new(config.mutation_cache, config.mutation_cache_capacity);

        Self {
            evaluator: Evaluator::new(registry.clone()),
            introspector: Introspector::new(registry.clone()),
            validator: RuleValidator::new(),
            mutator,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// 求值规则
    ///
    /// `criteria` 为数组时逐项求值，结果顺序与输入一致。
    /// 开启 `validate_rules` 时，结构非法的规则返回 `RuleError::InvalidRule`。
    #[instrument(skip(self, rule, criteria), fields(batch = criteria.is_array()))]
    pub async fn evaluate(&self, rule: &Rule, criteria: &Value) -> Result<Outcome<EvaluationResult>> {
        self.ensure_valid(rule)?;

        let criteria = self.mutator.mutate(criteria);
        let outcome = self.evaluator.evaluate(rule, &criteria);
        debug!(batch = outcome.is_batch(), "求值完成");
        Ok(outcome)
    }

    /// 只返回是否通过
    pub async fn check_is_passed(&self, rule: &Rule, criteria: &Value) -> Result<Outcome<bool>> {
        Ok(self.evaluate(rule, criteria).await?.map(|r| r.is_passed))
    }

    /// 只返回结果值
    pub async fn get_evaluate_result(&self, rule: &Rule, criteria: &Value) -> Result<Outcome<Value>> {
        Ok(self.evaluate(rule, criteria).await?.map(|r| r.value))
    }

    /// 内省规则，推导每个结果对应的字段取值范围
    #[instrument(skip(self, rule))]
    pub fn introspect(&self, rule: &Rule, options: IntrospectOptions) -> Result<IntrospectionResult> {
        self.ensure_valid(rule)?;
        self.introspector.introspect(rule, options)
    }

    /// 结构校验
    pub fn validate(&self, rule: &Rule) -> ValidationResult {
        self.validator.validate(rule)
    }

    /// 找出规则中未注册的操作符
    pub fn validate_operators(&self, rule: &Rule) -> OperatorValidation {
        self.introspector.validate_operators(rule)
    }

    /// 规则中使用的操作符
    pub fn used_operators(&self, rule: &Rule) -> Vec<String> {
        self.introspector.used_operators(rule)
    }

    /// 注册字段变换，求值前作用在数据上
    pub fn register_mutation<F>(&self, field: &str, mutation: F)
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.mutator.add(field, Arc::new(mutation));
    }

    pub fn remove_mutation(&self, field: &str) -> bool {
        self.mutator.remove(field)
    }

    pub fn clear_mutation_cache(&self) {
        self.mutator.clear_cache();
    }

    pub fn has_operator(&self, name: &str) -> bool {
        self.registry.has(name)
    }

    pub fn operator_metadata(&self, name: &str) -> Option<&OperatorMetadata> {
        self.registry.get(name).map(|descriptor| &descriptor.metadata)
    }

    pub fn operators_by_category(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.registry.by_category()
    }

    fn ensure_valid(&self, rule: &Rule) -> Result<()> {
        if !self.config.validate_rules {
            return Ok(());
        }

        self.validator
            .validate(rule)
            .into_result()
            .inspect_err(|e| warn!(error = %e, "规则结构非法"))
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleError;
    use serde_json::json;

    fn rule() -> Rule {
        Rule::from_value(json!({
            "conditions": [{
                "and": [ { "field": "age", "operator": "GreaterThanOrEquals", "value": 18 } ],
                "result": { "value": "adult" }
            }],
            "default": { "value": "minor" }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_evaluate_single_and_batch() {
        let engine = RuleEngine::new();

        let single = engine.get_evaluate_result(&rule(), &json!({ "age": 20 })).await.unwrap();
        assert_eq!(single, Outcome::Single(json!("adult")));

        let batch = engine
            .check_is_passed(&rule(), &json!([{ "age": 20 }, { "age": 3 }]))
            .await
            .unwrap();
        assert_eq!(batch, Outcome::Batch(vec![true, false]));
    }

    #[tokio::test]
    async fn test_invalid_rule_rejected() {
        let engine = RuleEngine::new();
        let invalid = Rule::from_value(json!({ "conditions": { "and": [] } })).unwrap();

        let err = engine.evaluate(&invalid, &json!({})).await.unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule { .. }));
    }

    #[tokio::test]
    async fn test_validation_can_be_disabled() {
        let config = EngineConfig {
            validate_rules: false,
            ..Default::default()
        };
        let engine = RuleEngine::with_config(config);
        let invalid = Rule::from_value(json!({ "conditions": { "and": [] } })).unwrap();

        // 空 AND 组在求值时视为通过
        let outcome = engine.check_is_passed(&invalid, &json!({})).await.unwrap();
        assert_eq!(outcome, Outcome::Single(true));
    }

    #[tokio::test]
    async fn test_mutation_applied_before_evaluation() {
        let engine = RuleEngine::new();
        engine.register_mutation("age", |v: &Value| json!(v.as_str().and_then(|s| s.parse::<i64>().ok())));

        let passed = engine.check_is_passed(&rule(), &json!({ "age": "42" })).await.unwrap();
        assert_eq!(passed, Outcome::Single(true));

        assert!(engine.remove_mutation("age"));
        let passed = engine.check_is_passed(&rule(), &json!({ "age": "x" })).await.unwrap();
        assert_eq!(passed, Outcome::Single(false));
    }

    #[test]
    fn test_operator_metadata_queries() {
        let engine = RuleEngine::new();
        assert!(engine.has_operator("IsEmail"));
        assert_eq!(engine.operator_metadata("IsEmail").unwrap().category, "string");
        assert!(engine.operator_metadata("Nope").is_none());
        assert!(engine.operators_by_category()["date"].contains("DateIsWeekend"));
    }
}
