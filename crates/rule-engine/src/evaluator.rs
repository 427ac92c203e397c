//! 规则求值器
//!
//! 按声明顺序短路求值根条件：第一个通过的根条件决定结果。
//! 求值是 `(规则, 数据, 注册表)` 的纯函数，单条数据上的任何异常都以
//! 失败结果表达，批量求值不会因为某一条数据而中断。

use crate::discovery::{
    is_text_path, resolve_property, resolve_text_path, resolve_text_path_expressions,
};
use crate::models::{Condition, ConditionResult, Constraint, EvaluationResult, Node, Outcome, Rule};
use crate::operators::ConditionType;
use crate::predicates::UNDEFINED;
use crate::registry::OperatorRegistry;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, trace};

/// 规则求值器
#[derive(Debug, Clone)]
pub struct Evaluator {
    registry: Arc<OperatorRegistry>,
}

impl Evaluator {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// 对单条数据或数据数组求值
    ///
    /// 数组中的每一项独立求值，输出顺序与输入一致。
    pub fn evaluate(&self, rule: &Rule, criteria: &Value) -> Outcome<EvaluationResult> {
        let default = rule.default.as_ref();
        match criteria {
            Value::Array(items) => Outcome::Batch(
                items
                    .iter()
                    .map(|item| self.evaluate_rule(rule.conditions(), item, default))
                    .collect(),
            ),
            single => Outcome::Single(self.evaluate_rule(rule.conditions(), single, default)),
        }
    }

    /// 依次求值根条件
    ///
    /// 1. 第一个通过的根条件胜出，返回它的 `result`；
    /// 2. 未通过但带出约束级消息的根条件立即终止求值，返回该消息；
    /// 3. 都未通过时返回默认结果。
    pub fn evaluate_rule(
        &self,
        conditions: &[Condition],
        criteria: &Value,
        default: Option<&ConditionResult>,
    ) -> EvaluationResult {
        for (index, condition) in conditions.iter().enumerate() {
            let outcome = self.evaluate_condition(condition, criteria);

            if outcome.is_passed {
                debug!(condition = index, "根条件通过");
                let (value, message) =
                    mutate_result_message(condition.result.as_deref(), criteria, Value::Bool(true));
                return EvaluationResult::passed(value, message);
            }

            // 约束级消息优先于继续尝试后续根条件
            if let Some(message) = outcome.message.filter(|m| !m.is_empty()) {
                debug!(condition = index, %message, "根条件失败并带出消息，停止求值");
                let value = default
                    .map(|d| d.value.clone())
                    .filter(|v| !v.is_null())
                    .unwrap_or(Value::Bool(false));
                return EvaluationResult::failed(value, Some(message));
            }
        }

        debug!("没有根条件通过，返回默认结果");
        let (value, message) = mutate_result_message(default, criteria, Value::Bool(false));
        EvaluationResult::failed(value, message)
    }

    /// 递归求值条件节点
    ///
    /// 返回值中的 `value` 是中间量：最后访问的子条件的 `result.value`，
    /// 或（子节点为约束时）本条件自身的 `result.value`。
    pub fn evaluate_condition(&self, condition: &Condition, criteria: &Value) -> EvaluationResult {
        let Some(kind) = condition.condition_type() else {
            return EvaluationResult::failed(
                Value::Bool(false),
                Some("Invalid condition type: expected exactly one of 'and', 'or', 'none'".into()),
            );
        };

        // NONE 与 AND 的累积方式相同，只是叶子贡献取反
        let mut is_passed = kind != ConditionType::Or;
        let mut message: Option<String> = None;
        let mut value = Value::Null;

        for node in condition.nodes() {
            match node {
                Node::Condition(sub) => {
                    value = sub.result_value().cloned().unwrap_or(Value::Null);
                    match kind {
                        ConditionType::And => {
                            if is_passed {
                                let outcome = self.evaluate_condition(sub, criteria);
                                is_passed = outcome.is_passed;
                                if !outcome.is_passed {
                                    message = outcome.message.or(message);
                                }
                            }
                        }
                        ConditionType::Or => {
                            if !is_passed {
                                let outcome = self.evaluate_condition(sub, criteria);
                                is_passed = outcome.is_passed;
                                if !outcome.is_passed {
                                    message = outcome.message.or(message);
                                }
                            }
                        }
                        ConditionType::None => {
                            let outcome = self.evaluate_condition(sub, criteria);
                            is_passed = is_passed && !outcome.is_passed;
                            if outcome.is_passed {
                                message = outcome.message.or(message);
                            }
                        }
                    }
                }
                Node::Constraint(constraint) => {
                    value = condition.result_value().cloned().unwrap_or(Value::Null);
                    let outcome = self.evaluate_constraint(constraint, criteria);
                    match kind {
                        ConditionType::And => {
                            is_passed = is_passed && outcome.is_passed;
                            if !outcome.is_passed {
                                message = outcome.message.or(message);
                                break;
                            }
                        }
                        ConditionType::Or => {
                            is_passed = is_passed || outcome.is_passed;
                            if outcome.is_passed {
                                break;
                            }
                            message = outcome.message.or(message);
                        }
                        ConditionType::None => {
                            is_passed = is_passed && !outcome.is_passed;
                            if outcome.is_passed {
                                message = outcome.message.or(message);
                            }
                        }
                    }
                }
            }
        }

        EvaluationResult {
            is_passed,
            value,
            message,
        }
    }

    /// 求值单个约束
    ///
    /// 字段缺失时以字符串 `"undefined"` 参与比较；`$.` 开头的期望值
    /// （数组则逐项）先在数据上解析。约束消息中可用 `$.self.value`
    /// （配置的期望值）和 `$.self.input`（实际字段值）。
    pub fn evaluate_constraint(&self, constraint: &Constraint, criteria: &Value) -> EvaluationResult {
        let sentinel = Value::String(UNDEFINED.to_string());
        let criterion = resolve_property(&constraint.field, criteria).unwrap_or(&sentinel);

        let expected = match &constraint.value {
            Some(Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|item| resolve_text_path(item, criteria))
                    .collect(),
            ),
            Some(value) => resolve_text_path(value, criteria),
            None => Value::Null,
        };

        let Some(descriptor) = self.registry.get(&constraint.operator) else {
            debug!(operator = %constraint.operator, field = %constraint.field, "未知操作符");
            return EvaluationResult::failed(
                Value::Bool(false),
                Some(format!("Invalid operator: {}", constraint.operator)),
            );
        };

        let is_passed = descriptor.evaluate(criterion, &expected);
        trace!(
            field = %constraint.field,
            operator = %constraint.operator,
            %criterion,
            %expected,
            is_passed,
            "约束求值"
        );

        let message = constraint
            .message
            .as_deref()
            .map(|template| self.constraint_message(template, constraint, criterion, criteria));

        EvaluationResult {
            is_passed,
            value: Value::Bool(is_passed),
            message,
        }
    }

    /// 渲染约束消息，注入 `self.value` / `self.input`
    fn constraint_message(
        &self,
        template: &str,
        constraint: &Constraint,
        criterion: &Value,
        criteria: &Value,
    ) -> String {
        if !template.contains("$.") {
            return template.to_string();
        }

        let mut context = match criteria {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        context.insert(
            "self".to_string(),
            json!({
                "value": constraint.value.clone().unwrap_or(Value::Null),
                "input": criterion,
            }),
        );
        render_message(template, &Value::Object(context))
    }
}

/// 结果载荷的统一出口：消息模板替换 + 值缺省
///
/// `payload.value` 为空时取 `default_value`；消息含 `$.` 时在数据上解析。
pub fn mutate_result_message(
    payload: Option<&ConditionResult>,
    criteria: &Value,
    default_value: Value,
) -> (Value, Option<String>) {
    let Some(payload) = payload else {
        return (default_value, None);
    };

    let value = if payload.value.is_null() {
        default_value
    } else {
        payload.value.clone()
    };
    let message = payload
        .message
        .as_deref()
        .map(|message| render_message(message, criteria));

    (value, message)
}

fn render_message(message: &str, criteria: &Value) -> String {
    if message.contains("$.") {
        resolve_text_path_expressions(message, criteria)
    } else {
        message.to_string()
    }
}

/// 值是否为需要在数据上解析的文本路径
pub fn is_reference(value: &Value) -> bool {
    value.as_str().is_some_and(is_text_path)
}
