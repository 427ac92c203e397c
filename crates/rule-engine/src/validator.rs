//! 规则结构校验
//!
//! 在求值或内省之前检查规则的形状，定位到具体节点（如 `conditions[0].and[1]`）。
//! 未知操作符不算结构错误：它们在求值时以失败结果表达。

use crate::discovery::is_text_path;
use crate::error::{Result, RuleError};
use crate::models::{Condition, Constraint, Node, Rule};
use crate::operators::Operator;
use serde::Serialize;
use serde_json::Value;

/// 校验错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub message: String,
    /// 出错节点的路径
    pub element: String,
}

impl ValidationError {
    fn new(message: impl Into<String>, element: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            element: element.into(),
        }
    }
}

impl From<ValidationError> for RuleError {
    fn from(err: ValidationError) -> Self {
        RuleError::InvalidRule {
            message: err.message,
            element: err.element,
        }
    }
}

/// 校验结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ValidationError>,
}

impl ValidationResult {
    /// 转成 `Result`，无效时为 [`RuleError::InvalidRule`]
    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

/// 规则校验器
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleValidator;

impl RuleValidator {
    pub fn new() -> Self {
        Self
    }

    /// 校验规则，返回第一个发现的问题
    pub fn validate(&self, rule: &Rule) -> ValidationResult {
        match self.validate_rule(rule) {
            Ok(()) => ValidationResult {
                is_valid: true,
                error: None,
            },
            Err(err) => ValidationResult {
                is_valid: false,
                error: Some(err),
            },
        }
    }

    fn validate_rule(&self, rule: &Rule) -> std::result::Result<(), ValidationError> {
        if rule.conditions().is_empty() {
            return Err(ValidationError::new("规则至少需要一个条件", "conditions"));
        }

        for (i, condition) in rule.conditions().iter().enumerate() {
            self.validate_condition(condition, &format!("conditions[{}]", i))?;
        }

        Ok(())
    }

    fn validate_condition(
        &self,
        condition: &Condition,
        path: &str,
    ) -> std::result::Result<(), ValidationError> {
        let Some(kind) = condition.condition_type() else {
            return Err(ValidationError::new(
                "条件必须且只能包含 and、or、none 之一",
                path,
            ));
        };

        let path = format!("{}.{}", path, kind);
        let nodes = condition.nodes();
        if nodes.is_empty() {
            return Err(ValidationError::new("条件组不能为空", path));
        }

        for (i, node) in nodes.iter().enumerate() {
            let child_path = format!("{}[{}]", path, i);
            match node {
                Node::Condition(sub) => self.validate_condition(sub, &child_path)?,
                Node::Constraint(constraint) => self.validate_constraint(constraint, &child_path)?,
            }
        }

        Ok(())
    }

    fn validate_constraint(
        &self,
        constraint: &Constraint,
        path: &str,
    ) -> std::result::Result<(), ValidationError> {
        if constraint.field.trim().is_empty() {
            return Err(ValidationError::new("约束的字段不能为空", path));
        }
        if constraint.operator.trim().is_empty() {
            return Err(ValidationError::new("约束的操作符不能为空", path));
        }

        self.validate_operator_value(constraint, path)
    }

    /// 已知操作符的值形状
    fn validate_operator_value(
        &self,
        constraint: &Constraint,
        path: &str,
    ) -> std::result::Result<(), ValidationError> {
        let Ok(operator) = constraint.operator.parse::<Operator>() else {
            return Ok(());
        };
        let value = constraint.value.as_ref().unwrap_or(&Value::Null);

        // 引用其他字段的值要到求值时才知道
        if value.as_str().is_some_and(is_text_path) {
            return Ok(());
        }

        match operator {
            Operator::DateBetween
            | Operator::DateNotBetween
            | Operator::TimeBetween
            | Operator::TimeNotBetween
            | Operator::NumberBetween
            | Operator::NumberNotBetween
            | Operator::LengthBetween
            | Operator::LengthNotBetween => match value {
                Value::Array(arr) if arr.len() == 2 => {}
                Value::Array(arr) => {
                    return Err(ValidationError::new(
                        format!(
                            "{} 操作符需要 [min, max] 数组，当前有 {} 个元素",
                            operator,
                            arr.len()
                        ),
                        path,
                    ));
                }
                _ => {
                    return Err(ValidationError::new(
                        format!("{} 操作符需要 [min, max] 数组", operator),
                        path,
                    ));
                }
            },
            Operator::In
            | Operator::NotIn
            | Operator::ContainsAny
            | Operator::NotContainsAny
            | Operator::ContainsAll
            | Operator::NotContainsAll => {
                if !value.is_array() {
                    return Err(ValidationError::new(
                        format!("{} 操作符需要数组值", operator),
                        path,
                    ));
                }
            }
            Operator::Matches | Operator::NotMatches => {
                let Some(pattern) = value.as_str() else {
                    return Err(ValidationError::new(
                        format!("{} 操作符需要字符串值", operator),
                        path,
                    ));
                };
                regex::Regex::new(pattern).map_err(|e| {
                    ValidationError::new(format!("正则表达式无效: {}", e), path)
                })?;
            }
            _ => {}
        }

        Ok(())
    }
}

/// 便捷函数
pub fn validate(rule: &Rule) -> ValidationResult {
    RuleValidator::new().validate(rule)
}
