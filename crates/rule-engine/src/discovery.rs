//! 对象发现
//!
//! 路径解析、文本路径模板替换，以及条件/约束的结构判别。
//! 这里的函数都不会因为数据形状不符而报错：找不到就返回 `None`。

use crate::models::{Condition, Node, Rule};
use crate::operators::ConditionType;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

/// 文本路径前缀
pub const TEXT_PATH_PREFIX: &str = "$.";

/// 匹配模板中的 `$.a.b[0].c`；结尾的句点不算路径的一部分
static TEXT_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\.(\w+(?:\[\d+\])*(?:\.\w+(?:\[\d+\])*)*)").expect("text path pattern")
});

/// 是否为 `$.` 开头的文本路径
pub fn is_text_path(value: &str) -> bool {
    value.starts_with(TEXT_PATH_PREFIX)
}

/// 路径中的一段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathSegment<'a> {
    /// 对象键；作用于数组时按下标解析
    Key(&'a str),
    /// 方括号下标
    Index(usize),
}

/// 把路径拆成段
///
/// 去掉 `$.` 前缀后按点号切分，每段再拆出 `[n]` 下标。
/// 空路径或 `$` 得到空列表；方括号不闭合、下标非数字等返回 `None`。
pub(crate) fn parse_path(path: &str) -> Option<Vec<PathSegment<'_>>> {
    let path = path.strip_prefix(TEXT_PATH_PREFIX).unwrap_or(path);
    if path.is_empty() || path == "$" {
        return Some(Vec::new());
    }

    let mut segments = Vec::new();
    for part in path.split('.') {
        let (name, indices) = match part.find('[') {
            Some(pos) => part.split_at(pos),
            None => (part, ""),
        };
        if !name.is_empty() {
            segments.push(PathSegment::Key(name));
        }

        let mut rest = indices;
        while let Some(stripped) = rest.strip_prefix('[') {
            let end = stripped.find(']')?;
            segments.push(PathSegment::Index(stripped[..end].trim().parse().ok()?));
            rest = &stripped[end + 1..];
        }
        if !rest.is_empty() {
            return None;
        }
    }

    Some(segments)
}

/// 按路径取值
///
/// 支持点号分隔（`user.profile.age`）、方括号下标（`items[0].name`）、
/// 数字段下标（`items.0.name`）以及 `$.` 前缀。任一段缺失都返回 `None`。
pub fn resolve_property<'a>(path: &str, root: &'a Value) -> Option<&'a Value> {
    parse_path(path)?
        .into_iter()
        .try_fold(root, |current, segment| match (segment, current) {
            (PathSegment::Key(name), Value::Object(map)) => map.get(name),
            (PathSegment::Key(name), Value::Array(arr)) => arr.get(name.parse::<usize>().ok()?),
            (PathSegment::Index(index), Value::Array(arr)) => arr.get(index),
            _ => None,
        })
}

/// `resolve_property` 的可变版本，路径语法相同
pub(crate) fn resolve_property_mut<'a>(path: &str, root: &'a mut Value) -> Option<&'a mut Value> {
    parse_path(path)?
        .into_iter()
        .try_fold(root, |current, segment| match (segment, current) {
            (PathSegment::Key(name), Value::Object(map)) => map.get_mut(name),
            (PathSegment::Key(name), Value::Array(arr)) => {
                arr.get_mut(name.parse::<usize>().ok()?)
            }
            (PathSegment::Index(index), Value::Array(arr)) => arr.get_mut(index),
            _ => None,
        })
}

/// 若值是文本路径则解析，否则原样返回
///
/// 解析不到时返回 `Null`。
pub fn resolve_text_path(value: &Value, criteria: &Value) -> Value {
    match value {
        Value::String(s) if is_text_path(s) => {
            resolve_property(s, criteria).cloned().unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}

/// 替换模板中的所有 `$.path` 表达式
///
/// 能解析的路径替换为其值（字符串原样，其余类型取 JSON 文本），
/// 解析不到的保留原文。
pub fn resolve_text_path_expressions(template: &str, criteria: &Value) -> String {
    TEXT_PATH_RE
        .replace_all(template, |caps: &Captures| {
            match resolve_property(&caps[1], criteria) {
                Some(value) => stringify(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// 值的展示文本
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 条件类型
pub fn condition_type(condition: &Condition) -> Option<ConditionType> {
    condition.condition_type()
}

/// 原始 JSON 节点是否为约束：有 `field` 键即是
pub fn is_constraint(node: &Value) -> bool {
    node.as_object().is_some_and(|obj| obj.contains_key("field"))
}

/// 原始 JSON 节点是否为条件：不是约束，且恰好有 `and` / `or` / `none` 之一
pub fn is_condition(node: &Value) -> bool {
    let Some(obj) = node.as_object() else {
        return false;
    };
    if obj.contains_key("field") {
        return false;
    }
    ["and", "or", "none"]
        .iter()
        .filter(|key| obj.contains_key(**key))
        .count()
        == 1
}

/// 规则是否细粒度：每个条件（递归）都带有 `result`
pub fn is_granular(rule: &Rule) -> bool {
    fn granular(condition: &Condition) -> bool {
        condition.result.is_some()
            && condition
                .nodes()
                .iter()
                .filter_map(Node::as_condition)
                .all(granular)
    }

    rule.conditions().iter().all(granular)
}

/// 根条件列表（单个条件在解析时已归一为数组）
pub fn get_conditions(rule: &Rule) -> &[Condition] {
    rule.conditions()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConditionResult, Constraint};
    use crate::operators::Operator;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "event": { "type": "PURCHASE" },
            "order": {
                "amount": 1000,
                "items": [
                    { "name": "ticket", "price": 500 },
                    { "name": "food", "price": 500 }
                ]
            },
            "matrix": [[1, 2], [3, 4]],
            "user": { "name": "Ada", "is_vip": true }
        })
    }

    #[test]
    fn test_resolve_dotted_path() {
        let data = sample();
        assert_eq!(resolve_property("event.type", &data), Some(&json!("PURCHASE")));
        assert_eq!(resolve_property("$.order.amount", &data), Some(&json!(1000)));
        assert_eq!(resolve_property("user.is_vip", &data), Some(&json!(true)));
    }

    #[test]
    fn test_resolve_array_indices() {
        let data = sample();
        assert_eq!(resolve_property("order.items[0].name", &data), Some(&json!("ticket")));
        assert_eq!(resolve_property("order.items.1.name", &data), Some(&json!("food")));
        assert_eq!(resolve_property("matrix[1][0]", &data), Some(&json!(3)));
    }

    #[test]
    fn test_resolve_missing_never_panics() {
        let data = sample();
        assert_eq!(resolve_property("nonexistent", &data), None);
        assert_eq!(resolve_property("order.items[9].name", &data), None);
        assert_eq!(resolve_property("order.amount.value", &data), None);
        assert_eq!(resolve_property("order.items[x]", &data), None);
        assert_eq!(resolve_property("order.items[0", &data), None);
        assert_eq!(resolve_property("a.b", &json!("scalar")), None);
    }

    #[test]
    fn test_parse_path_segments() {
        use PathSegment::{Index, Key};
        assert_eq!(parse_path("$"), Some(vec![]));
        assert_eq!(
            parse_path("$.order.items[0].name"),
            Some(vec![Key("order"), Key("items"), Index(0), Key("name")])
        );
        assert_eq!(parse_path("matrix[1][0]"), Some(vec![Key("matrix"), Index(1), Index(0)]));
        assert_eq!(parse_path("items[0]x"), None);
    }

    #[test]
    fn test_resolve_property_mut_shares_path_grammar() {
        let mut data = sample();
        for path in ["order.items[0].name", "order.items.1.name", "$.event.type"] {
            *resolve_property_mut(path, &mut data).unwrap() = json!("changed");
            assert_eq!(resolve_property(path, &data), Some(&json!("changed")));
        }
        *resolve_property_mut("matrix[1][0]", &mut data).unwrap() = json!(30);
        assert_eq!(data["matrix"][1][0], json!(30));

        assert!(resolve_property_mut("order.items[9].name", &mut data).is_none());
        assert!(resolve_property_mut("order.amount.value", &mut data).is_none());
    }

    #[test]
    fn test_resolve_text_path() {
        let data = sample();
        assert_eq!(resolve_text_path(&json!("$.user.name"), &data), json!("Ada"));
        assert_eq!(resolve_text_path(&json!("user.name"), &data), json!("user.name"));
        assert_eq!(resolve_text_path(&json!("$.missing"), &data), Value::Null);
        assert_eq!(resolve_text_path(&json!(5), &data), json!(5));
    }

    #[test]
    fn test_resolve_text_path_expressions() {
        let data = sample();
        assert_eq!(
            resolve_text_path_expressions("Hi $.user.name, you spent $.order.amount.", &data),
            "Hi Ada, you spent 1000."
        );
        assert_eq!(
            resolve_text_path_expressions("first item: $.order.items[0].name", &data),
            "first item: ticket"
        );
        assert_eq!(
            resolve_text_path_expressions("unknown $.nope stays", &data),
            "unknown $.nope stays"
        );
        assert_eq!(resolve_text_path_expressions("no paths", &data), "no paths");
    }

    #[test]
    fn test_node_discrimination() {
        assert!(is_constraint(&json!({ "field": "a", "operator": "Equals" })));
        assert!(!is_condition(&json!({ "field": "a", "and": [] })));
        assert!(is_condition(&json!({ "and": [] })));
        assert!(is_condition(&json!({ "none": [], "result": { "value": 1 } })));
        assert!(!is_condition(&json!({ "and": [], "or": [] })));
        assert!(!is_condition(&json!({ "result": { "value": 1 } })));
        assert!(!is_condition(&json!([])));
    }

    #[test]
    fn test_is_granular() {
        let leaf = Constraint::new("a", Operator::Equals, 1);
        let granular = Rule::new(vec![
            Condition::and(vec![
                leaf.clone().into(),
                Condition::or(vec![leaf.clone().into()])
                    .with_result(ConditionResult::new("inner"))
                    .into(),
            ])
            .with_result(ConditionResult::new("outer")),
        ]);
        assert!(is_granular(&granular));

        let coarse = Rule::new(vec![
            Condition::and(vec![Condition::or(vec![leaf.into()]).into()])
                .with_result(ConditionResult::new("outer")),
        ]);
        assert!(!is_granular(&coarse));
        assert_eq!(get_conditions(&coarse).len(), 1);
    }
}
