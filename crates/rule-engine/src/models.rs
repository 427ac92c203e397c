//! 规则引擎领域模型
//!
//! JSON 形态：
//!
//! ```json
//! {
//!   "conditions": [
//!     { "and": [ { "field": "age", "operator": "GreaterThan", "value": 18 } ],
//!       "result": { "value": "adult" } }
//!   ],
//!   "default": { "value": "minor" }
//! }
//! ```

use crate::error::{Result, RuleError};
use crate::operators::{ConditionType, Operator};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// 规则定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// 根条件列表；JSON 中既可以是单个条件，也可以是条件数组
    #[serde(deserialize_with = "one_or_many")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ConditionResult>,
}

impl Rule {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            default: None,
        }
    }

    pub fn with_default(mut self, default: ConditionResult) -> Self {
        self.default = Some(default);
        self
    }

    /// 从 JSON 字符串解析规则
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 从 JSON 值解析规则
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| RuleError::ParseError(e.to_string()))
    }

    /// 根条件列表
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<Condition>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<Condition>),
        One(Box<Condition>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(conditions) => conditions,
        OneOrMany::One(condition) => vec![*condition],
    })
}

/// 条件命中时返回的载荷
///
/// 在条件中以 `Arc` 持有：内省按引用身份（而非内容）对结果分组。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionResult {
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConditionResult {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// 包装成可在多个条件间共享身份的结果
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// 约束：单个字段与操作符/期望值的比较
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub field: String,
    /// 操作符名称；保留原始字符串，以便未知操作符也能表达
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Constraint {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::named(field, operator.as_str(), value)
    }

    /// 以任意操作符名称构造（用于自定义操作符）
    pub fn named(field: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: Some(value.into()),
            message: None,
        }
    }

    /// 不需要期望值的约束（如 `Exists`、`IsEmail`）
    pub fn unary(field: impl Into<String>, operator: Operator) -> Self {
        Self {
            field: field.into(),
            operator: operator.as_str().to_string(),
            value: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// 条件：`and` / `or` / `none` 三者恰有其一
///
/// 三个字段都保留为 `Option` 以忠实表达输入：一个都没有或同时出现多个时，
/// [`Condition::condition_type`] 返回 `None`，求值器据此给出失败结果。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub none: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<ConditionResult>>,
}

impl Condition {
    pub fn new(kind: ConditionType, nodes: Vec<Node>) -> Self {
        let mut condition = Self::default();
        match kind {
            ConditionType::And => condition.and = Some(nodes),
            ConditionType::Or => condition.or = Some(nodes),
            ConditionType::None => condition.none = Some(nodes),
        }
        condition
    }

    pub fn and(nodes: Vec<Node>) -> Self {
        Self::new(ConditionType::And, nodes)
    }

    pub fn or(nodes: Vec<Node>) -> Self {
        Self::new(ConditionType::Or, nodes)
    }

    pub fn none(nodes: Vec<Node>) -> Self {
        Self::new(ConditionType::None, nodes)
    }

    pub fn with_result(mut self, result: ConditionResult) -> Self {
        self.result = Some(Arc::new(result));
        self
    }

    /// 复用已有结果（保持引用身份）
    pub fn with_shared_result(mut self, result: Arc<ConditionResult>) -> Self {
        self.result = Some(result);
        self
    }

    /// 条件类型；缺失或出现多个类型键时为 `None`
    pub fn condition_type(&self) -> Option<ConditionType> {
        match (&self.and, &self.or, &self.none) {
            (Some(_), None, None) => Some(ConditionType::And),
            (None, Some(_), None) => Some(ConditionType::Or),
            (None, None, Some(_)) => Some(ConditionType::None),
            _ => None,
        }
    }

    /// 条件的子节点；类型非法时为空
    pub fn nodes(&self) -> &[Node] {
        match self.condition_type() {
            Some(ConditionType::And) => self.and.as_deref().unwrap_or_default(),
            Some(ConditionType::Or) => self.or.as_deref().unwrap_or_default(),
            Some(ConditionType::None) => self.none.as_deref().unwrap_or_default(),
            None => &[],
        }
    }

    pub fn result_value(&self) -> Option<&Value> {
        self.result.as_ref().map(|r| &r.value)
    }
}

/// 条件树节点
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Node {
    Condition(Condition),
    Constraint(Constraint),
}

impl Node {
    pub fn as_condition(&self) -> Option<&Condition> {
        match self {
            Self::Condition(condition) => Some(condition),
            Self::Constraint(_) => None,
        }
    }

    pub fn as_constraint(&self) -> Option<&Constraint> {
        match self {
            Self::Constraint(constraint) => Some(constraint),
            Self::Condition(_) => None,
        }
    }
}

impl From<Condition> for Node {
    fn from(condition: Condition) -> Self {
        Self::Condition(condition)
    }
}

impl From<Constraint> for Node {
    fn from(constraint: Constraint) -> Self {
        Self::Constraint(constraint)
    }
}

/// 节点判别：带 `field` 键的对象是约束，其余都按条件解析
impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let value = Value::deserialize(deserializer)?;
        if crate::discovery::is_constraint(&value) {
            serde_json::from_value(value)
                .map(Node::Constraint)
                .map_err(D::Error::custom)
        } else {
            serde_json::from_value(value)
                .map(Node::Condition)
                .map_err(D::Error::custom)
        }
    }
}

/// 单条数据的求值结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub is_passed: bool,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EvaluationResult {
    pub fn passed(value: Value, message: Option<String>) -> Self {
        Self {
            is_passed: true,
            value,
            message,
        }
    }

    pub fn failed(value: Value, message: Option<String>) -> Self {
        Self {
            is_passed: false,
            value,
            message,
        }
    }
}

/// 单条或批量求值的输出，批量时顺序与输入一致
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    Single(T),
    Batch(Vec<T>),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Outcome<U> {
        match self {
            Self::Single(item) => Outcome::Single(f(item)),
            Self::Batch(items) => Outcome::Batch(items.into_iter().map(f).collect()),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Single(item) => vec![item],
            Self::Batch(items) => items,
        }
    }

    pub fn single(self) -> Option<T> {
        match self {
            Self::Single(item) => Some(item),
            Self::Batch(_) => None,
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }
}
