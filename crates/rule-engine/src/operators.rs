//! 规则操作符定义
//!
//! 操作符名称是对外的稳定契约：新增是向后兼容的，重命名不是。
//! 序列化形式就是变体名本身（如 `"Equals"`、`"DateAfterOrEquals"`）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 操作符分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorCategory {
    Comparison,
    Array,
    Existence,
    Date,
    Time,
    Type,
    String,
    Number,
    Length,
    Boolean,
}

impl OperatorCategory {
    pub const ALL: &'static [OperatorCategory] = &[
        Self::Comparison,
        Self::Array,
        Self::Existence,
        Self::Date,
        Self::Time,
        Self::Type,
        Self::String,
        Self::Number,
        Self::Length,
        Self::Boolean,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comparison => "comparison",
            Self::Array => "array",
            Self::Existence => "existence",
            Self::Date => "date",
            Self::Time => "time",
            Self::Type => "type",
            Self::String => "string",
            Self::Number => "number",
            Self::Length => "length",
            Self::Boolean => "boolean",
        }
    }
}

impl fmt::Display for OperatorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! operators {
    ($($category:ident => [$($variant:ident),* $(,)?]),* $(,)?) => {
        /// 条件操作符
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Operator {
            $($($variant,)*)*
        }

        impl Operator {
            /// 全部内置操作符（按分类排列）
            pub const ALL: &'static [Operator] = &[$($(Operator::$variant,)*)*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($(Self::$variant => stringify!($variant),)*)*
                }
            }

            pub fn category(&self) -> OperatorCategory {
                match self {
                    $($(Self::$variant => OperatorCategory::$category,)*)*
                }
            }
        }
    };
}

operators! {
    Comparison => [
        Equals, NotEquals,
        GreaterThan, LessThan, GreaterThanOrEquals, LessThanOrEquals,
        Like, NotLike,
        Matches, NotMatches,
    ],
    Array => [
        In, NotIn,
        Contains, NotContains,
        ContainsAny, NotContainsAny,
        ContainsAll, NotContainsAll,
        ArrayIsEmpty, ArrayIsNotEmpty,
    ],
    Existence => [
        Exists, NotExists,
        NullOrUndefined, NotNullOrUndefined,
        Empty, NotEmpty,
    ],
    Date => [
        DateAfter, DateBefore, DateAfterOrEquals, DateBeforeOrEquals,
        DateEquals, DateNotEquals,
        DateBetween, DateNotBetween,
        DateIsWeekend, DateIsWeekday, DateIsLeapYear,
        DateYearEquals, DateMonthEquals, DateDayOfWeekEquals,
    ],
    Time => [
        TimeAfter, TimeBefore, TimeEquals,
        TimeBetween, TimeNotBetween,
    ],
    Type => [
        IsString, IsNotString,
        IsNumber, IsNotNumber,
        IsBoolean, IsNotBoolean,
        IsArray, IsNotArray,
        IsObject, IsNotObject,
        IsNull, IsNotNull,
        IsDate, IsNotDate,
    ],
    String => [
        StartsWith, NotStartsWith,
        EndsWith, NotEndsWith,
        IsEmail, IsNotEmail,
        IsUrl, IsNotUrl,
        IsUuid, IsNotUuid,
        IsAlpha, IsNotAlpha,
        IsAlphanumeric, IsNotAlphanumeric,
        IsNumericString, IsNotNumericString,
        IsLowerCase, IsNotLowerCase,
        IsUpperCase, IsNotUpperCase,
    ],
    Number => [
        IsInteger, IsNotInteger,
        IsFloat, IsNotFloat,
        IsPositive, IsNotPositive,
        IsNegative, IsNotNegative,
        IsZero, IsNotZero,
        IsEven, IsOdd,
        NumberBetween, NumberNotBetween,
        IsDivisibleBy, IsNotDivisibleBy,
    ],
    Length => [
        LengthEquals, LengthNotEquals,
        LengthGreaterThan, LengthLessThan,
        LengthGreaterThanOrEquals, LengthLessThanOrEquals,
        LengthBetween, LengthNotBetween,
    ],
    Boolean => [
        IsTrue, IsFalse,
        IsTruthy, IsFalsy,
    ],
}

/// 互为逻辑取反的操作符对（双向可查）
///
/// 只登记真正的逻辑逆：`DateAfter` 的逆是 `DateBeforeOrEquals`，而不是 `DateBefore`。
pub const NEGATION_PAIRS: &[(Operator, Operator)] = &[
    (Operator::Equals, Operator::NotEquals),
    (Operator::GreaterThan, Operator::LessThanOrEquals),
    (Operator::LessThan, Operator::GreaterThanOrEquals),
    (Operator::Like, Operator::NotLike),
    (Operator::Matches, Operator::NotMatches),
    (Operator::In, Operator::NotIn),
    (Operator::Contains, Operator::NotContains),
    (Operator::ContainsAny, Operator::NotContainsAny),
    (Operator::ContainsAll, Operator::NotContainsAll),
    (Operator::Exists, Operator::NotExists),
    (Operator::NullOrUndefined, Operator::NotNullOrUndefined),
    (Operator::Empty, Operator::NotEmpty),
    (Operator::DateAfter, Operator::DateBeforeOrEquals),
    (Operator::DateBefore, Operator::DateAfterOrEquals),
    (Operator::DateEquals, Operator::DateNotEquals),
    (Operator::DateBetween, Operator::DateNotBetween),
    (Operator::DateIsWeekend, Operator::DateIsWeekday),
    (Operator::TimeBetween, Operator::TimeNotBetween),
    (Operator::IsString, Operator::IsNotString),
    (Operator::IsNumber, Operator::IsNotNumber),
    (Operator::IsBoolean, Operator::IsNotBoolean),
    (Operator::IsArray, Operator::IsNotArray),
    (Operator::IsObject, Operator::IsNotObject),
    (Operator::IsNull, Operator::IsNotNull),
    (Operator::IsDate, Operator::IsNotDate),
    (Operator::StartsWith, Operator::NotStartsWith),
    (Operator::EndsWith, Operator::NotEndsWith),
    (Operator::IsEmail, Operator::IsNotEmail),
    (Operator::IsUrl, Operator::IsNotUrl),
    (Operator::IsUuid, Operator::IsNotUuid),
    (Operator::IsAlpha, Operator::IsNotAlpha),
    (Operator::IsAlphanumeric, Operator::IsNotAlphanumeric),
    (Operator::IsNumericString, Operator::IsNotNumericString),
    (Operator::IsLowerCase, Operator::IsNotLowerCase),
    (Operator::IsUpperCase, Operator::IsNotUpperCase),
    (Operator::IsInteger, Operator::IsNotInteger),
    (Operator::IsFloat, Operator::IsNotFloat),
    (Operator::IsPositive, Operator::IsNotPositive),
    (Operator::IsNegative, Operator::IsNotNegative),
    (Operator::IsZero, Operator::IsNotZero),
    (Operator::NumberBetween, Operator::NumberNotBetween),
    (Operator::IsDivisibleBy, Operator::IsNotDivisibleBy),
    (Operator::LengthEquals, Operator::LengthNotEquals),
    (Operator::LengthGreaterThan, Operator::LengthLessThanOrEquals),
    (Operator::LengthLessThan, Operator::LengthGreaterThanOrEquals),
    (Operator::LengthBetween, Operator::LengthNotBetween),
    (Operator::IsTruthy, Operator::IsFalsy),
];

/// 值类型名称，供 `acceptedFieldTypes` 使用
const ANY_TYPE: &[&str] = &["array", "boolean", "null", "number", "object", "string"];

impl Operator {
    /// 取逻辑逆操作符
    pub fn negated(&self) -> Option<Operator> {
        NEGATION_PAIRS.iter().find_map(|(a, b)| {
            if a == self {
                Some(*b)
            } else if b == self {
                Some(*a)
            } else {
                None
            }
        })
    }

    /// 该操作符可接受的字段值类型
    pub fn accepted_field_types(&self) -> &'static [&'static str] {
        match self {
            Self::Equals | Self::NotEquals => ANY_TYPE,
            Self::GreaterThan
            | Self::LessThan
            | Self::GreaterThanOrEquals
            | Self::LessThanOrEquals => &["number", "string"],
            Self::Like | Self::NotLike | Self::Matches | Self::NotMatches => &["string"],
            Self::In | Self::NotIn => &["boolean", "number", "string"],
            Self::Contains | Self::NotContains => &["array", "string"],
            Self::ContainsAny
            | Self::NotContainsAny
            | Self::ContainsAll
            | Self::NotContainsAll
            | Self::ArrayIsEmpty
            | Self::ArrayIsNotEmpty => &["array"],
            Self::IsTruthy | Self::IsFalsy => ANY_TYPE,
            _ => match self.category() {
                OperatorCategory::Existence | OperatorCategory::Type => ANY_TYPE,
                OperatorCategory::Date | OperatorCategory::Time => &["date", "string"],
                OperatorCategory::String => &["string"],
                OperatorCategory::Number => &["number"],
                OperatorCategory::Length => &["array", "string"],
                OperatorCategory::Boolean => &["boolean"],
                OperatorCategory::Comparison | OperatorCategory::Array => ANY_TYPE,
            },
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|op| op.as_str() == s)
            .copied()
            .ok_or_else(|| format!("未知操作符: {}", s))
    }
}

/// 条件节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    And,
    Or,
    None,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
