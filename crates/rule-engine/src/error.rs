//! 规则引擎错误类型
//!
//! 只有规则结构层面的问题会以 `Err` 返回；单条数据求值过程中的异常
//! （未知操作符、字段缺失等）以失败的求值结果表达，不在这里出现。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则解析失败: {0}")]
    ParseError(String),

    #[error("规则校验失败: {message} (位置: {element})")]
    InvalidRule { message: String, element: String },

    #[error("内省要求规则是细粒度的：每个条件都必须声明 result")]
    NotGranular,

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;
