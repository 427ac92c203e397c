//! 内置操作符的判定函数
//!
//! 每个判定函数都是 `(字段值, 期望值) -> bool` 的全函数：
//! 类型不匹配时返回 false，绝不 panic。字段缺失时求值器传入的是字符串
//! 哨兵 `"undefined"`，只有存在性类操作符会把它当作"不存在"。

use crate::operators::Operator;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// 字段缺失时的哨兵值
pub const UNDEFINED: &str = "undefined";

pub type Predicate = fn(&Value, &Value) -> bool;

/// 编译后的正则缓存上限，超过后整体清空
const REGEX_CACHE_CAPACITY: usize = 1024;

/// `Like` / `Matches` 的模式缓存；非法模式缓存为 `None`
static REGEX_CACHE: LazyLock<DashMap<String, Option<Regex>>> = LazyLock::new(DashMap::new);

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
        .expect("email pattern")
});
static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(https?|ftp)://[^\s/$.?#][^\s]*$").expect("url pattern")
});
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("uuid pattern")
});

/// 取内置操作符的判定函数
pub fn builtin(operator: Operator) -> Predicate {
    use Operator::*;

    match operator {
        // 通用比较
        Equals => |f, e| loose_eq(f, e),
        NotEquals => |f, e| !loose_eq(f, e),
        GreaterThan => |f, e| compare(f, e).is_some_and(|o| o.is_gt()),
        LessThan => |f, e| compare(f, e).is_some_and(|o| o.is_lt()),
        GreaterThanOrEquals => |f, e| compare(f, e).is_some_and(|o| o.is_ge()),
        LessThanOrEquals => |f, e| compare(f, e).is_some_and(|o| o.is_le()),
        Like => like,
        NotLike => |f, e| !like(f, e),
        Matches => regex_match,
        NotMatches => |f, e| !regex_match(f, e),

        // 集合操作
        In => in_list,
        NotIn => |f, e| !in_list(f, e),
        Contains => contains,
        NotContains => |f, e| !contains(f, e),
        ContainsAny => contains_any,
        NotContainsAny => |f, e| !contains_any(f, e),
        ContainsAll => contains_all,
        NotContainsAll => |f, e| !contains_all(f, e),
        ArrayIsEmpty => |f, _| f.as_array().is_some_and(|a| a.is_empty()),
        ArrayIsNotEmpty => |f, _| f.as_array().is_some_and(|a| !a.is_empty()),

        // 存在性检查
        Exists => |f, _| !is_undefined(f),
        NotExists => |f, _| is_undefined(f),
        NullOrUndefined => |f, _| f.is_null() || is_undefined(f),
        NotNullOrUndefined => |f, _| !(f.is_null() || is_undefined(f)),
        Empty => |f, _| is_empty(f),
        NotEmpty => |f, _| !is_empty(f),

        // 日期
        DateAfter => |f, e| date_compare(f, e).is_some_and(|o| o.is_gt()),
        DateBefore => |f, e| date_compare(f, e).is_some_and(|o| o.is_lt()),
        DateAfterOrEquals => |f, e| date_compare(f, e).is_some_and(|o| o.is_ge()),
        DateBeforeOrEquals => |f, e| date_compare(f, e).is_some_and(|o| o.is_le()),
        DateEquals => date_equals,
        DateNotEquals => |f, e| !date_equals(f, e),
        DateBetween => date_between,
        DateNotBetween => |f, e| !date_between(f, e),
        DateIsWeekend => |f, _| parse_datetime(f).is_some_and(|d| is_weekend(d.weekday())),
        DateIsWeekday => |f, _| parse_datetime(f).is_some_and(|d| !is_weekend(d.weekday())),
        DateIsLeapYear => |f, _| parse_datetime(f).is_some_and(|d| d.date_naive().leap_year()),
        DateYearEquals => |f, e| date_part_equals(f, e, |d| d.year() as f64),
        DateMonthEquals => |f, e| date_part_equals(f, e, |d| d.month() as f64),
        DateDayOfWeekEquals => day_of_week_equals,

        // 时间（时:分[:秒]）
        TimeAfter => |f, e| time_compare(f, e).is_some_and(|o| o.is_gt()),
        TimeBefore => |f, e| time_compare(f, e).is_some_and(|o| o.is_lt()),
        TimeEquals => |f, e| time_compare(f, e).is_some_and(|o| o.is_eq()),
        TimeBetween => time_between,
        TimeNotBetween => |f, e| !time_between(f, e),

        // 类型检查
        IsString => |f, _| f.is_string(),
        IsNotString => |f, _| !f.is_string(),
        IsNumber => |f, _| f.is_number(),
        IsNotNumber => |f, _| !f.is_number(),
        IsBoolean => |f, _| f.is_boolean(),
        IsNotBoolean => |f, _| !f.is_boolean(),
        IsArray => |f, _| f.is_array(),
        IsNotArray => |f, _| !f.is_array(),
        IsObject => |f, _| f.is_object(),
        IsNotObject => |f, _| !f.is_object(),
        IsNull => |f, _| f.is_null(),
        IsNotNull => |f, _| !f.is_null(),
        IsDate => |f, _| parse_datetime(f).is_some(),
        IsNotDate => |f, _| parse_datetime(f).is_none(),

        // 字符串校验
        StartsWith => |f, e| str_pair(f, e).is_some_and(|(s, p)| s.starts_with(p)),
        NotStartsWith => |f, e| !str_pair(f, e).is_some_and(|(s, p)| s.starts_with(p)),
        EndsWith => |f, e| str_pair(f, e).is_some_and(|(s, p)| s.ends_with(p)),
        NotEndsWith => |f, e| !str_pair(f, e).is_some_and(|(s, p)| s.ends_with(p)),
        IsEmail => |f, _| f.as_str().is_some_and(|s| EMAIL_RE.is_match(s)),
        IsNotEmail => |f, _| !f.as_str().is_some_and(|s| EMAIL_RE.is_match(s)),
        IsUrl => |f, _| f.as_str().is_some_and(|s| URL_RE.is_match(s)),
        IsNotUrl => |f, _| !f.as_str().is_some_and(|s| URL_RE.is_match(s)),
        IsUuid => |f, _| f.as_str().is_some_and(|s| UUID_RE.is_match(s)),
        IsNotUuid => |f, _| !f.as_str().is_some_and(|s| UUID_RE.is_match(s)),
        IsAlpha => |f, _| non_empty_str(f).is_some_and(|s| s.chars().all(char::is_alphabetic)),
        IsNotAlpha => |f, _| !non_empty_str(f).is_some_and(|s| s.chars().all(char::is_alphabetic)),
        IsAlphanumeric => {
            |f, _| non_empty_str(f).is_some_and(|s| s.chars().all(char::is_alphanumeric))
        }
        IsNotAlphanumeric => {
            |f, _| !non_empty_str(f).is_some_and(|s| s.chars().all(char::is_alphanumeric))
        }
        IsNumericString => |f, _| f.as_str().is_some_and(is_numeric_str),
        IsNotNumericString => |f, _| !f.as_str().is_some_and(is_numeric_str),
        IsLowerCase => |f, _| f.as_str().is_some_and(is_lower_case),
        IsNotLowerCase => |f, _| !f.as_str().is_some_and(is_lower_case),
        IsUpperCase => |f, _| f.as_str().is_some_and(is_upper_case),
        IsNotUpperCase => |f, _| !f.as_str().is_some_and(is_upper_case),

        // 数值校验
        IsInteger => |f, _| as_f64(f).is_some_and(|n| n.fract() == 0.0),
        IsNotInteger => |f, _| !as_f64(f).is_some_and(|n| n.fract() == 0.0),
        IsFloat => |f, _| as_f64(f).is_some_and(|n| n.fract() != 0.0),
        IsNotFloat => |f, _| !as_f64(f).is_some_and(|n| n.fract() != 0.0),
        IsPositive => |f, _| as_f64(f).is_some_and(|n| n > 0.0),
        IsNotPositive => |f, _| !as_f64(f).is_some_and(|n| n > 0.0),
        IsNegative => |f, _| as_f64(f).is_some_and(|n| n < 0.0),
        IsNotNegative => |f, _| !as_f64(f).is_some_and(|n| n < 0.0),
        IsZero => |f, _| as_f64(f).is_some_and(|n| n == 0.0),
        IsNotZero => |f, _| !as_f64(f).is_some_and(|n| n == 0.0),
        IsEven => |f, _| as_integer(f).is_some_and(|n| n % 2 == 0),
        IsOdd => |f, _| as_integer(f).is_some_and(|n| n % 2 != 0),
        NumberBetween => number_between,
        NumberNotBetween => |f, e| !number_between(f, e),
        IsDivisibleBy => divisible_by,
        IsNotDivisibleBy => |f, e| !divisible_by(f, e),

        // 长度校验（字符串按字符计，数组按元素计）
        LengthEquals => |f, e| length_compare(f, e).is_some_and(|o| o.is_eq()),
        LengthNotEquals => |f, e| !length_compare(f, e).is_some_and(|o| o.is_eq()),
        LengthGreaterThan => |f, e| length_compare(f, e).is_some_and(|o| o.is_gt()),
        LengthLessThan => |f, e| length_compare(f, e).is_some_and(|o| o.is_lt()),
        LengthGreaterThanOrEquals => |f, e| length_compare(f, e).is_some_and(|o| o.is_ge()),
        LengthLessThanOrEquals => |f, e| length_compare(f, e).is_some_and(|o| o.is_le()),
        LengthBetween => length_between,
        LengthNotBetween => |f, e| !length_between(f, e),

        // 布尔
        IsTrue => |f, _| f.as_bool() == Some(true),
        IsFalse => |f, _| f.as_bool() == Some(false),
        IsTruthy => |f, _| is_truthy(f),
        IsFalsy => |f, _| !is_truthy(f),
    }
}

fn is_undefined(value: &Value) -> bool {
    value.as_str() == Some(UNDEFINED)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == UNDEFINED,
        Value::Array(arr) => arr.is_empty(),
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty() && s != UNDEFINED,
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// 相等比较
///
/// 数值统一转为浮点数比较，避免 100 与 100.0 不相等；其他类型直接比较。
fn loose_eq(field: &Value, expected: &Value) -> bool {
    if let (Value::Number(a), Value::Number(b)) = (field, expected)
        && let (Some(a), Some(b)) = (a.as_f64(), b.as_f64())
    {
        return a == b;
    }
    field == expected
}

/// 有序比较：数值（含数字字符串）按数值比较，两个普通字符串按字典序比较
fn compare(field: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (as_f64(field), as_f64(expected)) {
        return a.partial_cmp(&b);
    }
    match (field, expected) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// 尝试将 Value 转换为 f64
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    as_f64(value).filter(|n| n.fract() == 0.0).map(|n| n as i64)
}

fn str_pair<'a>(field: &'a Value, expected: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((field.as_str()?, expected.as_str()?))
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

fn is_numeric_str(s: &str) -> bool {
    !s.is_empty() && s.trim().parse::<f64>().is_ok_and(f64::is_finite)
}

fn is_lower_case(s: &str) -> bool {
    s.chars().any(char::is_alphabetic) && s.to_lowercase() == s
}

fn is_upper_case(s: &str) -> bool {
    s.chars().any(char::is_alphabetic) && s.to_uppercase() == s
}

/// SQL 风格模糊匹配：`%` 匹配任意串，`_` 匹配单个字符，忽略大小写
fn like(field: &Value, expected: &Value) -> bool {
    let Some((s, pattern)) = str_pair(field, expected) else {
        return false;
    };
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?is)^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    cached_regex(&re).is_some_and(|re| re.is_match(s))
}

/// 正则表达式匹配，非法的模式视为不匹配
fn regex_match(field: &Value, expected: &Value) -> bool {
    let Some((s, pattern)) = str_pair(field, expected) else {
        return false;
    };
    cached_regex(pattern).is_some_and(|re| re.is_match(s))
}

/// 取（或编译并缓存）正则
fn cached_regex(pattern: &str) -> Option<Regex> {
    if let Some(hit) = REGEX_CACHE.get(pattern) {
        return hit.value().clone();
    }

    let compiled = Regex::new(pattern).ok();
    if REGEX_CACHE.len() >= REGEX_CACHE_CAPACITY {
        REGEX_CACHE.clear();
    }
    REGEX_CACHE.insert(pattern.to_string(), compiled.clone());
    compiled
}

/// 列表包含检查 (in)：字段值等于列表中任一元素
fn in_list(field: &Value, expected: &Value) -> bool {
    expected
        .as_array()
        .is_some_and(|arr| arr.iter().any(|item| loose_eq(field, item)))
}

/// 字符串/数组包含检查
fn contains(field: &Value, expected: &Value) -> bool {
    match field {
        Value::String(s) => expected.as_str().is_some_and(|sub| s.contains(sub)),
        Value::Array(arr) => arr.iter().any(|item| loose_eq(item, expected)),
        _ => false,
    }
}

/// 数组包含任意一个
fn contains_any(field: &Value, expected: &Value) -> bool {
    let (Some(field_arr), Some(expected_arr)) = (field.as_array(), expected.as_array()) else {
        return false;
    };
    expected_arr
        .iter()
        .any(|e| field_arr.iter().any(|f| loose_eq(f, e)))
}

/// 数组包含全部
fn contains_all(field: &Value, expected: &Value) -> bool {
    let (Some(field_arr), Some(expected_arr)) = (field.as_array(), expected.as_array()) else {
        return false;
    };
    expected_arr
        .iter()
        .all(|e| field_arr.iter().any(|f| loose_eq(f, e)))
}

/// 解析 `[min, max]` 形式的区间
fn bounds(expected: &Value) -> Option<(&Value, &Value)> {
    match expected.as_array()?.as_slice() {
        [min, max] => Some((min, max)),
        _ => None,
    }
}

fn number_between(field: &Value, expected: &Value) -> bool {
    let Some((min, max)) = bounds(expected) else {
        return false;
    };
    match (as_f64(field), as_f64(min), as_f64(max)) {
        (Some(n), Some(min), Some(max)) => n >= min && n <= max,
        _ => false,
    }
}

fn divisible_by(field: &Value, expected: &Value) -> bool {
    match (as_f64(field), as_f64(expected)) {
        (Some(n), Some(d)) if d != 0.0 => (n % d).abs() < f64::EPSILON,
        _ => false,
    }
}

fn length_of(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(arr) => Some(arr.len() as f64),
        _ => None,
    }
}

fn length_compare(field: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    length_of(field)?.partial_cmp(&as_f64(expected)?)
}

fn length_between(field: &Value, expected: &Value) -> bool {
    let Some((min, max)) = bounds(expected) else {
        return false;
    };
    match (length_of(field), as_f64(min), as_f64(max)) {
        (Some(len), Some(min), Some(max)) => len >= min && len <= max,
        _ => false,
    }
}

/// 解析日期时间
///
/// 支持 RFC 3339、`YYYY-MM-DDTHH:MM:SS`、`YYYY-MM-DD` 以及毫秒时间戳。
pub(crate) fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?),
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return Some(dt.and_utc());
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        }
        _ => None,
    }
}

fn date_compare(field: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    Some(parse_datetime(field)?.cmp(&parse_datetime(expected)?))
}

/// 同一天（UTC）即视为相等
fn date_equals(field: &Value, expected: &Value) -> bool {
    match (parse_datetime(field), parse_datetime(expected)) {
        (Some(a), Some(b)) => a.date_naive() == b.date_naive(),
        _ => false,
    }
}

fn date_between(field: &Value, expected: &Value) -> bool {
    let Some((start, end)) = bounds(expected) else {
        return false;
    };
    match (parse_datetime(field), parse_datetime(start), parse_datetime(end)) {
        (Some(d), Some(start), Some(end)) => d >= start && d <= end,
        _ => false,
    }
}

fn date_part_equals(field: &Value, expected: &Value, part: fn(&DateTime<Utc>) -> f64) -> bool {
    match (parse_datetime(field), as_f64(expected)) {
        (Some(d), Some(n)) => part(&d) == n,
        _ => false,
    }
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

/// 星期比较：期望值可以是 ISO 序号（周一 = 1 ... 周日 = 7）或英文名称
fn day_of_week_equals(field: &Value, expected: &Value) -> bool {
    let Some(day) = parse_datetime(field).map(|d| d.weekday()) else {
        return false;
    };
    match expected {
        Value::String(name) => name.parse::<Weekday>().is_ok_and(|w| w == day),
        other => as_f64(other).is_some_and(|n| n == day.number_from_monday() as f64),
    }
}

/// 解析时刻：`HH:MM`、`HH:MM:SS`，或取完整日期时间中的时刻部分
fn parse_time(value: &Value) -> Option<NaiveTime> {
    if let Some(s) = value.as_str() {
        if let Ok(t) = NaiveTime::parse_from_str(s, "%H:%M:%S") {
            return Some(t);
        }
        if let Ok(t) = NaiveTime::parse_from_str(s, "%H:%M") {
            return Some(t);
        }
    }
    parse_datetime(value).map(|d| d.time())
}

fn time_compare(field: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    Some(parse_time(field)?.cmp(&parse_time(expected)?))
}

fn time_between(field: &Value, expected: &Value) -> bool {
    let Some((start, end)) = bounds(expected) else {
        return false;
    };
    match (parse_time(field), parse_time(start), parse_time(end)) {
        (Some(t), Some(start), Some(end)) => t >= start && t <= end,
        _ => false,
    }
}
