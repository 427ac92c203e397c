//! 操作符注册表
//!
//! 注册表在引擎构建时一次性生成，之后以 `Arc` 共享、只读使用。
//! 求值器和内省器都只通过名称查找操作符，因此自定义操作符与内置操作符没有区别。

use crate::operators::{NEGATION_PAIRS, Operator, OperatorCategory};
use crate::predicates;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// 操作符判定函数
pub type OperatorFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// 操作符元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorMetadata {
    pub category: String,
    pub accepted_field_types: BTreeSet<String>,
}

impl OperatorMetadata {
    pub fn new<I, S>(category: impl Into<String>, accepted_field_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            category: category.into(),
            accepted_field_types: accepted_field_types.into_iter().map(Into::into).collect(),
        }
    }
}

/// 操作符描述：判定函数 + 元数据
#[derive(Clone)]
pub struct OperatorDescriptor {
    evaluate: OperatorFn,
    pub metadata: OperatorMetadata,
}

impl OperatorDescriptor {
    pub fn new(evaluate: OperatorFn, metadata: OperatorMetadata) -> Self {
        Self { evaluate, metadata }
    }

    /// 执行判定
    pub fn evaluate(&self, input: &Value, value: &Value) -> bool {
        (self.evaluate)(input, value)
    }
}

impl fmt::Debug for OperatorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorDescriptor")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// 操作符注册表
#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    operators: HashMap<String, OperatorDescriptor>,
    negations: HashMap<String, String>,
}

impl OperatorRegistry {
    /// 创建空注册表
    pub fn empty() -> Self {
        Self::default()
    }

    /// 创建包含全部内置操作符及其取反关系的注册表
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        for op in Operator::ALL {
            let predicate = predicates::builtin(*op);
            registry.register(
                op.as_str(),
                Arc::new(predicate),
                OperatorMetadata::new(
                    op.category().as_str(),
                    op.accepted_field_types().iter().copied(),
                ),
            );
        }

        for (a, b) in NEGATION_PAIRS {
            registry.register_negation(a.as_str(), b.as_str());
        }

        registry
    }

    /// 注册（或覆盖）一个操作符
    pub fn register(
        &mut self,
        name: impl Into<String>,
        evaluate: OperatorFn,
        metadata: OperatorMetadata,
    ) {
        self.operators
            .insert(name.into(), OperatorDescriptor::new(evaluate, metadata));
    }

    /// 登记一对互为逻辑逆的操作符（双向）
    pub fn register_negation(&mut self, a: impl Into<String>, b: impl Into<String>) {
        let (a, b) = (a.into(), b.into());
        self.negations.insert(a.clone(), b.clone());
        self.negations.insert(b, a);
    }

    pub fn has(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&OperatorDescriptor> {
        self.operators.get(name)
    }

    pub fn get_negated_operator(&self, name: &str) -> Option<&str> {
        self.negations.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// 所有已注册的操作符名称（排序后）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// 按分类分组的操作符名称
    pub fn by_category(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, descriptor) in &self.operators {
            grouped
                .entry(descriptor.metadata.category.clone())
                .or_default()
                .insert(name.clone());
        }
        grouped
    }

    /// 某一分类下的操作符名称
    pub fn in_category(&self, category: OperatorCategory) -> BTreeSet<String> {
        self.by_category()
            .remove(category.as_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_registered() {
        let registry = OperatorRegistry::with_builtins();
        assert_eq!(registry.len(), Operator::ALL.len());
        assert!(registry.has("Equals"));
        assert!(registry.has("DateBetween"));
        assert!(!registry.has("DoesNotExist"));
    }

    #[test]
    fn test_get_and_evaluate() {
        let registry = OperatorRegistry::with_builtins();
        let equals = registry.get("Equals").unwrap();
        assert!(equals.evaluate(&json!("a"), &json!("a")));
        assert_eq!(equals.metadata.category, "comparison");
        assert!(equals.metadata.accepted_field_types.contains("string"));
        assert!(registry.get("DoesNotExist").is_none());
    }

    #[test]
    fn test_negated_operator_lookup() {
        let registry = OperatorRegistry::with_builtins();
        assert_eq!(registry.get_negated_operator("Equals"), Some("NotEquals"));
        assert_eq!(registry.get_negated_operator("NotEquals"), Some("Equals"));
        assert_eq!(
            registry.get_negated_operator("DateBefore"),
            Some("DateAfterOrEquals")
        );
        assert_eq!(registry.get_negated_operator("IsEven"), None);
    }

    #[test]
    fn test_register_custom_operator() {
        let mut registry = OperatorRegistry::empty();
        registry.register(
            "IsAnswer",
            Arc::new(|input: &Value, _: &Value| input.as_i64() == Some(42)),
            OperatorMetadata::new("custom", ["number"]),
        );
        registry.register(
            "IsNotAnswer",
            Arc::new(|input: &Value, _: &Value| input.as_i64() != Some(42)),
            OperatorMetadata::new("custom", ["number"]),
        );
        registry.register_negation("IsAnswer", "IsNotAnswer");

        assert!(registry.get("IsAnswer").unwrap().evaluate(&json!(42), &Value::Null));
        assert_eq!(registry.get_negated_operator("IsNotAnswer"), Some("IsAnswer"));
        assert_eq!(registry.names(), vec!["IsAnswer", "IsNotAnswer"]);
    }

    #[test]
    fn test_by_category() {
        let registry = OperatorRegistry::with_builtins();
        let grouped = registry.by_category();
        assert_eq!(grouped.len(), OperatorCategory::ALL.len());
        assert!(grouped["time"].contains("TimeBetween"));
        assert!(registry.in_category(OperatorCategory::Boolean).contains("IsTruthy"));
    }
}
