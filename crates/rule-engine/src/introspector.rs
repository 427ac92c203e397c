//! 规则内省
//!
//! 反向分析规则：对每个声明的结果，推导出能得到该结果的字段取值组合
//! （`options` 中每一项是一种可选组合，整体相当于投影到字段上的析取范式）。
//!
//! 组合策略：AND 把约束合并进当前窗口内的每个选项；OR / NONE 为每个子节点
//! 分叉出独立的选项。分叉时先克隆窗口内的选项，再按步骤历史撤销第一个
//! 子节点写入的字段，保证兄弟分支互不泄漏。所有可变状态都在
//! [`IntrospectionContext`] 中，每次调用新建。

use crate::discovery::{TEXT_PATH_PREFIX, is_granular};
use crate::error::{Result, RuleError};
use crate::models::{Condition, ConditionResult, Constraint, Node, Rule};
use crate::operators::{ConditionType, Operator};
use crate::registry::OperatorRegistry;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// 内省选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntrospectOptions {
    /// 输出使用到的操作符与字段类型
    pub include_metadata: bool,
    /// 输出复杂度指标
    pub include_complexity: bool,
}

impl IntrospectOptions {
    pub fn all() -> Self {
        Self {
            include_metadata: true,
            include_complexity: true,
        }
    }
}

/// 某个结果对应的取值范围
#[derive(Debug, Clone, Serialize)]
pub struct CriteriaRange {
    pub result: Arc<ConditionResult>,
    pub options: Vec<Map<String, Value>>,
}

/// 元数据：按分类的已用操作符、每个字段可接受的类型
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectionMetadata {
    pub used_operators: BTreeMap<String, BTreeSet<String>>,
    pub field_types: BTreeMap<String, BTreeSet<String>>,
}

/// 复杂度指标
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityMetrics {
    pub max_depth: usize,
    pub total_conditions: usize,
    pub total_constraints: usize,
    pub unique_fields: usize,
}

/// 内省结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectionResult {
    pub results: Vec<CriteriaRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IntrospectionMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<ComplexityMetrics>,
    pub warnings: Vec<String>,
}

impl IntrospectionResult {
    /// 按结果值查找取值范围
    pub fn range_for(&self, value: &Value) -> Option<&CriteriaRange> {
        self.results.iter().find(|range| &range.result.value == value)
    }
}

/// 规则中使用的未知操作符
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnknownOperator {
    pub field: String,
    pub operator: String,
}

/// 操作符校验结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorValidation {
    pub is_valid: bool,
    pub unknown: Vec<UnknownOperator>,
}

/// 单个字段的一次写入，`previous` 为写入前的值（`None` 表示原先不存在）
#[derive(Debug, Clone)]
struct FieldChange {
    field: String,
    previous: Option<Value>,
}

/// 步骤历史：哪一层、哪个选项、改了哪些字段
#[derive(Debug, Clone)]
struct IntrospectionStep {
    parent_type: Option<ConditionType>,
    curr_type: ConditionType,
    depth: usize,
    option: usize,
    changes: Vec<FieldChange>,
}

/// 单次内省调用的全部可变状态
#[derive(Debug, Default)]
struct IntrospectionContext {
    options: Vec<Map<String, Value>>,
    steps: Vec<IntrospectionStep>,
    max_depth: usize,
    total_conditions: usize,
    total_constraints: usize,
    unique_fields: BTreeSet<String>,
    used_operators: BTreeMap<String, BTreeSet<String>>,
    field_types: BTreeMap<String, BTreeSet<String>>,
    warnings: Vec<String>,
}

impl IntrospectionContext {
    fn warn(&mut self, message: String) {
        if !self.warnings.contains(&message) {
            warn!(%message, "内省警告");
            self.warnings.push(message);
        }
    }

    /// 克隆窗口内的选项，并撤销 `mark` 之后写入这些选项的字段
    fn fork(&mut self, window: Range<usize>, mark: usize) -> Range<usize> {
        let start = self.options.len();
        for index in window {
            let mut option = self.options[index].clone();
            for step in self.steps[mark..].iter().rev().filter(|s| s.option == index) {
                trace!(
                    parent = ?step.parent_type,
                    current = %step.curr_type,
                    depth = step.depth,
                    option = index,
                    "撤销兄弟分支的字段"
                );
                for change in step.changes.iter().rev() {
                    match &change.previous {
                        Some(previous) => {
                            option.insert(change.field.clone(), previous.clone());
                        }
                        None => {
                            option.remove(&change.field);
                        }
                    }
                }
            }
            self.options.push(option);
        }
        start..self.options.len()
    }

    /// 取出已完成的选项：去掉空选项并去重
    fn take_options(&mut self) -> Vec<Map<String, Value>> {
        let mut options: Vec<Map<String, Value>> = Vec::new();
        for option in self.options.drain(..) {
            if !option.is_empty() && !options.contains(&option) {
                options.push(option);
            }
        }
        options
    }
}

/// 规则内省器
#[derive(Debug, Clone)]
pub struct Introspector {
    registry: Arc<OperatorRegistry>,
}

impl Introspector {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self { registry }
    }

    /// 内省规则
    ///
    /// 规则必须是细粒度的（每个条件都有 `result`），否则返回
    /// [`RuleError::NotGranular`]。
    pub fn introspect(&self, rule: &Rule, options: IntrospectOptions) -> Result<IntrospectionResult> {
        if !is_granular(rule) {
            return Err(RuleError::NotGranular);
        }

        let mut ctx = IntrospectionContext::default();
        let mut results = Vec::new();

        for (result, conditions) in group_by_result(rule) {
            for condition in conditions {
                ctx.steps.clear();
                let start = ctx.options.len();
                ctx.options.push(Map::new());
                self.walk(&mut ctx, condition, None, 1, start..start + 1, false);
            }
            results.push(CriteriaRange {
                result,
                options: ctx.take_options(),
            });
        }

        debug!(
            results = results.len(),
            max_depth = ctx.max_depth,
            constraints = ctx.total_constraints,
            "内省完成"
        );

        let metadata = options.include_metadata.then(|| IntrospectionMetadata {
            used_operators: std::mem::take(&mut ctx.used_operators),
            field_types: std::mem::take(&mut ctx.field_types),
        });
        let complexity = options.include_complexity.then(|| ComplexityMetrics {
            max_depth: ctx.max_depth,
            total_conditions: ctx.total_conditions,
            total_constraints: ctx.total_constraints,
            unique_fields: ctx.unique_fields.len(),
        });

        Ok(IntrospectionResult {
            results,
            metadata,
            complexity,
            warnings: ctx.warnings,
        })
    }

    /// 遍历条件，返回处理后的窗口（窗口总是 `options` 的尾部）
    fn walk(
        &self,
        ctx: &mut IntrospectionContext,
        condition: &Condition,
        parent: Option<ConditionType>,
        depth: usize,
        window: Range<usize>,
        negated: bool,
    ) -> Range<usize> {
        ctx.total_conditions += 1;
        ctx.max_depth = ctx.max_depth.max(depth);

        let Some(kind) = condition.condition_type() else {
            ctx.warn(format!("Invalid condition type at depth {}", depth));
            return window;
        };
        // NONE 之下的约束一律取反；嵌套的 NONE 不会再翻转回来
        let negated = negated || kind == ConditionType::None;
        let nodes = condition.nodes();

        match kind {
            ConditionType::And => nodes.iter().fold(window, |window, node| {
                self.visit(ctx, node, parent, kind, depth, window, negated)
            }),
            ConditionType::Or | ConditionType::None => {
                let Some((first, rest)) = nodes.split_first() else {
                    return window;
                };
                let mark = ctx.steps.len();
                self.visit(ctx, first, parent, kind, depth, window.clone(), negated);
                for node in rest {
                    let forked = ctx.fork(window.clone(), mark);
                    self.visit(ctx, node, parent, kind, depth, forked, negated);
                }
                window.start..ctx.options.len()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        ctx: &mut IntrospectionContext,
        node: &Node,
        parent: Option<ConditionType>,
        kind: ConditionType,
        depth: usize,
        window: Range<usize>,
        negated: bool,
    ) -> Range<usize> {
        match node {
            Node::Condition(sub) => self.walk(ctx, sub, Some(kind), depth + 1, window, negated),
            Node::Constraint(constraint) => {
                self.apply_constraint(ctx, constraint, parent, kind, depth, window.clone(), negated);
                window
            }
        }
    }

    /// 把约束写入窗口内的每个选项，并记录步骤
    #[allow(clippy::too_many_arguments)]
    fn apply_constraint(
        &self,
        ctx: &mut IntrospectionContext,
        constraint: &Constraint,
        parent: Option<ConditionType>,
        kind: ConditionType,
        depth: usize,
        window: Range<usize>,
        negated: bool,
    ) {
        let field = constraint
            .field
            .strip_prefix(TEXT_PATH_PREFIX)
            .unwrap_or(&constraint.field)
            .to_string();

        ctx.total_constraints += 1;
        ctx.unique_fields.insert(field.clone());
        self.record_operator(ctx, &field, &constraint.operator);

        let operator = if negated {
            match self.registry.get_negated_operator(&constraint.operator) {
                Some(negation) => negation.to_string(),
                None => {
                    ctx.warn(format!(
                        "No negation registered for operator {} on field {}",
                        constraint.operator, field
                    ));
                    constraint.operator.clone()
                }
            }
        } else {
            constraint.operator.clone()
        };

        let value = constraint.value.clone().unwrap_or(Value::Null);
        let contribution = if operator == Operator::Equals.as_str() || operator == Operator::In.as_str() {
            value
        } else {
            json!({ "operator": operator, "value": value })
        };

        for index in window {
            let option = &mut ctx.options[index];
            let previous = option.get(&field).cloned();
            let merged = merge_values(previous.as_ref(), contribution.clone());
            option.insert(field.clone(), merged);
            ctx.steps.push(IntrospectionStep {
                parent_type: parent,
                curr_type: kind,
                depth,
                option: index,
                changes: vec![FieldChange {
                    field: field.clone(),
                    previous,
                }],
            });
        }
    }

    fn record_operator(&self, ctx: &mut IntrospectionContext, field: &str, operator: &str) {
        let Some(descriptor) = self.registry.get(operator) else {
            ctx.warn(format!("Unknown operator: {}", operator));
            return;
        };

        ctx.used_operators
            .entry(descriptor.metadata.category.clone())
            .or_default()
            .insert(operator.to_string());

        let accepted = &descriptor.metadata.accepted_field_types;
        ctx.field_types
            .entry(field.to_string())
            .and_modify(|types| types.retain(|t| accepted.contains(t)))
            .or_insert_with(|| accepted.clone());
    }

    /// 找出规则中未注册的操作符（不要求细粒度）
    pub fn validate_operators(&self, rule: &Rule) -> OperatorValidation {
        let mut unknown = Vec::new();
        visit_constraints(rule.conditions(), &mut |constraint| {
            if !self.registry.has(&constraint.operator) {
                unknown.push(UnknownOperator {
                    field: constraint.field.clone(),
                    operator: constraint.operator.clone(),
                });
            }
        });

        OperatorValidation {
            is_valid: unknown.is_empty(),
            unknown,
        }
    }

    /// 规则中使用的全部操作符名称（排序、去重，不要求细粒度）
    pub fn used_operators(&self, rule: &Rule) -> Vec<String> {
        let mut used = BTreeSet::new();
        visit_constraints(rule.conditions(), &mut |constraint| {
            used.insert(constraint.operator.clone());
        });
        used.into_iter().collect()
    }
}

/// 按结果的引用身份分组，保持首次出现的顺序
fn group_by_result(rule: &Rule) -> Vec<(Arc<ConditionResult>, Vec<&Condition>)> {
    let mut groups: Vec<(Arc<ConditionResult>, Vec<&Condition>)> = Vec::new();
    for condition in rule.conditions() {
        let Some(result) = &condition.result else {
            continue;
        };
        match groups.iter_mut().find(|(key, _)| Arc::ptr_eq(key, result)) {
            Some((_, members)) => members.push(condition),
            None => groups.push((result.clone(), vec![condition])),
        }
    }
    groups
}

/// 同一字段的多次写入累积为去重数组，只有一个值时保持标量
fn merge_values(existing: Option<&Value>, incoming: Value) -> Value {
    let Some(existing) = existing else {
        return incoming;
    };

    let mut items = match existing {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    let incoming = match incoming {
        Value::Array(values) => values,
        other => vec![other],
    };
    for value in incoming {
        if !items.contains(&value) {
            items.push(value);
        }
    }

    if items.len() == 1 {
        items.remove(0)
    } else {
        Value::Array(items)
    }
}

fn visit_constraints<'a>(conditions: &'a [Condition], f: &mut impl FnMut(&'a Constraint)) {
    for condition in conditions {
        for node in condition.nodes() {
            match node {
                Node::Condition(sub) => visit_constraints(std::slice::from_ref(sub), f),
                Node::Constraint(constraint) => f(constraint),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn introspector() -> Introspector {
        Introspector::new(Arc::new(OperatorRegistry::with_builtins()))
    }

    fn eq(field: &str, value: impl Into<Value>) -> Node {
        Constraint::new(field, Operator::Equals, value).into()
    }

    fn options_of(result: &IntrospectionResult, index: usize) -> Vec<Value> {
        result.results[index]
            .options
            .iter()
            .map(|o| Value::Object(o.clone()))
            .collect()
    }

    #[test]
    fn test_non_granular_rule_rejected() {
        let rule = Rule::new(vec![Condition::and(vec![eq("a", 1)])]);
        let err = introspector()
            .introspect(&rule, IntrospectOptions::default())
            .unwrap_err();
        assert!(matches!(err, RuleError::NotGranular));
    }

    #[test]
    fn test_and_folds_into_single_option() {
        let rule = Rule::new(vec![
            Condition::and(vec![
                eq("age", 18),
                eq("status", "active"),
                Constraint::new("score", Operator::GreaterThan, 50).into(),
            ])
            .with_result(ConditionResult::new("R")),
        ]);

        let result = introspector()
            .introspect(&rule, IntrospectOptions::default())
            .unwrap();

        assert_eq!(
            options_of(&result, 0),
            vec![json!({
                "age": 18,
                "status": "active",
                "score": { "operator": "GreaterThan", "value": 50 }
            })]
        );
    }

    #[test]
    fn test_or_forks_options() {
        let rule = Rule::new(vec![
            Condition::or(vec![eq("a", 1), eq("b", 2)]).with_result(ConditionResult::new("R")),
        ]);

        let result = introspector()
            .introspect(&rule, IntrospectOptions::default())
            .unwrap();

        assert_eq!(options_of(&result, 0), vec![json!({ "a": 1 }), json!({ "b": 2 })]);
    }

    #[test]
    fn test_sibling_or_branches_stay_independent() {
        let rule = Rule::new(vec![
            Condition::and(vec![
                eq("x", 1),
                Condition::or(vec![eq("a", 1), eq("b", 2)])
                    .with_result(ConditionResult::new("inner"))
                    .into(),
            ])
            .with_result(ConditionResult::new("R")),
        ]);

        let result = introspector()
            .introspect(&rule, IntrospectOptions::default())
            .unwrap();

        assert_eq!(
            options_of(&result, 0),
            vec![json!({ "x": 1, "a": 1 }), json!({ "x": 1, "b": 2 })]
        );
    }

    #[test]
    fn test_nested_and_inside_or_does_not_leak() {
        let inner = |field: &str, other: &str| -> Node {
            Condition::and(vec![eq(field, 1), eq(other, 2)])
                .with_result(ConditionResult::new("inner"))
                .into()
        };
        let rule = Rule::new(vec![
            Condition::or(vec![inner("a", "b"), inner("c", "d")])
                .with_result(ConditionResult::new("R")),
        ]);

        let result = introspector()
            .introspect(&rule, IntrospectOptions::default())
            .unwrap();

        assert_eq!(
            options_of(&result, 0),
            vec![json!({ "a": 1, "b": 2 }), json!({ "c": 1, "d": 2 })]
        );
    }

    #[test]
    fn test_cross_product_of_two_ors() {
        let or = |a: &str, b: &str| -> Node {
            Condition::or(vec![eq(a, 1), eq(b, 1)])
                .with_result(ConditionResult::new("inner"))
                .into()
        };
        let rule = Rule::new(vec![
            Condition::and(vec![or("a", "b"), or("c", "d")]).with_result(ConditionResult::new("R")),
        ]);

        let result = introspector()
            .introspect(&rule, IntrospectOptions::default())
            .unwrap();

        assert_eq!(
            options_of(&result, 0),
            vec![
                json!({ "a": 1, "c": 1 }),
                json!({ "b": 1, "c": 1 }),
                json!({ "a": 1, "d": 1 }),
                json!({ "b": 1, "d": 1 }),
            ]
        );
    }

    #[test]
    fn test_none_negates_operators() {
        let rule = Rule::new(vec![
            Condition::none(vec![eq("status", "banned")]).with_result(ConditionResult::new("ok")),
        ]);

        let result = introspector()
            .introspect(&rule, IntrospectOptions::default())
            .unwrap();

        assert_eq!(
            options_of(&result, 0),
            vec![json!({ "status": { "operator": "NotEquals", "value": "banned" } })]
        );
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_negation_warns() {
        let rule = Rule::new(vec![
            Condition::none(vec![Constraint::unary("n", Operator::IsEven).into()])
                .with_result(ConditionResult::new("ok")),
        ]);

        let result = introspector()
            .introspect(&rule, IntrospectOptions::default())
            .unwrap();

        assert_eq!(
            options_of(&result, 0),
            vec![json!({ "n": { "operator": "IsEven", "value": null } })]
        );
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("IsEven"));
    }

    #[test]
    fn test_same_field_values_accumulate() {
        let rule = Rule::new(vec![
            Condition::and(vec![eq("tag", "a"), eq("tag", "b"), eq("tag", "a")])
                .with_result(ConditionResult::new("R")),
        ]);

        let result = introspector()
            .introspect(&rule, IntrospectOptions::default())
            .unwrap();

        assert_eq!(options_of(&result, 0), vec![json!({ "tag": ["a", "b"] })]);
    }

    #[test]
    fn test_grouping_by_result_identity() {
        let shared = ConditionResult::new("gold").shared();
        let rule = Rule::new(vec![
            Condition::and(vec![eq("tier", "vip")]).with_shared_result(shared.clone()),
            Condition::and(vec![eq("spend", 1000)]).with_shared_result(shared),
            // 内容相同但不是同一个对象，必须单独成组
            Condition::and(vec![eq("referrals", 10)]).with_result(ConditionResult::new("gold")),
        ]);

        let result = introspector()
            .introspect(&rule, IntrospectOptions::default())
            .unwrap();

        assert_eq!(result.results.len(), 2);
        assert_eq!(
            options_of(&result, 0),
            vec![json!({ "tier": "vip" }), json!({ "spend": 1000 })]
        );
        assert_eq!(options_of(&result, 1), vec![json!({ "referrals": 10 })]);
    }

    #[test]
    fn test_metadata_and_complexity() {
        let rule = Rule::new(vec![
            Condition::and(vec![
                Constraint::new("$.age", Operator::GreaterThan, 17).into(),
                Constraint::new("age", Operator::IsInteger, Value::Null).into(),
                Condition::or(vec![
                    Constraint::new("email", Operator::IsEmail, Value::Null).into(),
                    Constraint::named("phone", "Telepathy", 1).into(),
                ])
                .with_result(ConditionResult::new("inner"))
                .into(),
            ])
            .with_result(ConditionResult::new("R")),
        ]);

        let result = introspector()
            .introspect(&rule, IntrospectOptions::all())
            .unwrap();

        let complexity = result.complexity.unwrap();
        assert_eq!(complexity.max_depth, 2);
        assert_eq!(complexity.total_conditions, 2);
        assert_eq!(complexity.total_constraints, 4);
        assert_eq!(complexity.unique_fields, 3);

        let metadata = result.metadata.unwrap();
        assert!(metadata.used_operators["comparison"].contains("GreaterThan"));
        assert!(metadata.used_operators["number"].contains("IsInteger"));
        assert!(metadata.used_operators["string"].contains("IsEmail"));
        assert!(metadata.field_types["age"].contains("number"));
        assert!(!metadata.field_types["age"].contains("string"));
        assert_eq!(result.warnings, vec!["Unknown operator: Telepathy".to_string()]);
    }

    #[test]
    fn test_optional_sections_omitted() {
        let rule = Rule::new(vec![
            Condition::and(vec![eq("a", 1)]).with_result(ConditionResult::new(true)),
        ]);
        let result = introspector()
            .introspect(&rule, IntrospectOptions::default())
            .unwrap();

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "results": [{ "result": { "value": true }, "options": [{ "a": 1 }] }],
                "warnings": []
            })
        );
    }

    #[test]
    fn test_validate_and_collect_operators() {
        let rule = Rule::new(vec![Condition::or(vec![
            eq("a", 1),
            Condition::none(vec![Constraint::named("b", "Nope", 2).into(), eq("c", 3)]).into(),
        ])]);

        let introspector = introspector();
        let validation = introspector.validate_operators(&rule);
        assert!(!validation.is_valid);
        assert_eq!(
            validation.unknown,
            vec![UnknownOperator {
                field: "b".into(),
                operator: "Nope".into()
            }]
        );
        assert_eq!(introspector.used_operators(&rule), vec!["Equals", "Nope"]);
    }

    #[test]
    fn test_merge_values() {
        assert_eq!(merge_values(None, json!(1)), json!(1));
        assert_eq!(merge_values(Some(&json!(1)), json!(1)), json!(1));
        assert_eq!(merge_values(Some(&json!(1)), json!(2)), json!([1, 2]));
        assert_eq!(merge_values(Some(&json!([1, 2])), json!([2, 3])), json!([1, 2, 3]));
    }
}
