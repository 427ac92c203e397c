//! JSON 条件树规则引擎
//!
//! 提供可复用的规则求值与反向分析能力，支持：
//! - AND / OR / NONE 任意嵌套的 JSON 规则定义
//! - 按声明顺序短路求值，单条或批量数据
//! - `$.` 文本路径：字段间比较与消息模板
//! - 内省：推导每个结果对应的字段取值组合
//! - 可扩展的操作符注册表与求值前数据变换

pub mod cli;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod introspector;
pub mod models;
pub mod mutator;
pub mod operators;
pub mod predicates;
pub mod registry;
pub mod validator;

pub use config::EngineConfig;
pub use engine::RuleEngine;
pub use error::{Result, RuleError};
pub use evaluator::Evaluator;
pub use introspector::{
    ComplexityMetrics, CriteriaRange, IntrospectOptions, IntrospectionMetadata,
    IntrospectionResult, Introspector, OperatorValidation, UnknownOperator,
};
pub use models::{Condition, ConditionResult, Constraint, EvaluationResult, Node, Outcome, Rule};
pub use mutator::{MutationFn, Mutator};
pub use operators::{ConditionType, Operator, OperatorCategory};
pub use registry::{OperatorDescriptor, OperatorFn, OperatorMetadata, OperatorRegistry};
pub use validator::{RuleValidator, ValidationError, ValidationResult};
