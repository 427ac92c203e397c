//! 命令行接口
//!
//! 子命令：evaluate / introspect / validate / operators。
//! 结果以格式化 JSON 输出到 stdout，日志输出到 stderr。

use crate::engine::RuleEngine;
use crate::introspector::IntrospectOptions;
use crate::models::Rule;
use crate::operators::OperatorCategory;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

/// JSON 规则引擎命令行工具
#[derive(Parser, Debug)]
#[command(name = "rule-engine")]
#[command(version, about = "JSON 条件树规则引擎：求值与反向内省")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 配置文件路径（默认 config/rule-engine.toml，可不存在）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 日志级别，覆盖配置文件 (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 对数据求值（数据文件可以是对象或对象数组）
    Evaluate {
        /// 规则文件（JSON）
        #[arg(short, long)]
        rule: PathBuf,

        /// 数据文件（JSON）
        #[arg(short = 'd', long)]
        criteria: PathBuf,
    },

    /// 推导每个结果对应的字段取值范围（要求细粒度规则）
    Introspect {
        #[arg(short, long)]
        rule: PathBuf,

        /// 输出使用到的操作符与字段类型
        #[arg(long)]
        metadata: bool,

        /// 输出复杂度指标
        #[arg(long)]
        complexity: bool,
    },

    /// 校验规则结构与操作符
    Validate {
        #[arg(short, long)]
        rule: PathBuf,
    },

    /// 列出可用操作符
    Operators {
        /// 只列出某个分类（如 date、string）
        #[arg(long)]
        category: Option<String>,
    },
}

/// 命令执行器
pub struct CommandRunner {
    engine: RuleEngine,
}

impl CommandRunner {
    pub fn new(engine: RuleEngine) -> Self {
        Self { engine }
    }

    /// 执行子命令，返回要输出的 JSON
    pub async fn run(&self, command: Commands) -> Result<Value> {
        match command {
            Commands::Evaluate { rule, criteria } => self.run_evaluate(&rule, &criteria).await,
            Commands::Introspect {
                rule,
                metadata,
                complexity,
            } => {
                let options = IntrospectOptions {
                    include_metadata: metadata,
                    include_complexity: complexity,
                };
                self.run_introspect(&rule, options).await
            }
            Commands::Validate { rule } => self.run_validate(&rule).await,
            Commands::Operators { category } => self.run_operators(category.as_deref()),
        }
    }

    async fn run_evaluate(&self, rule_path: &Path, criteria_path: &Path) -> Result<Value> {
        let rule = load_rule(rule_path).await?;
        let criteria = load_json(criteria_path).await?;

        let outcome = self.engine.evaluate(&rule, &criteria).await?;
        info!(rule = %rule_path.display(), batch = outcome.is_batch(), "求值完成");
        Ok(serde_json::to_value(outcome)?)
    }

    async fn run_introspect(&self, rule_path: &Path, options: IntrospectOptions) -> Result<Value> {
        let rule = load_rule(rule_path).await?;
        let result = self.engine.introspect(&rule, options)?;
        Ok(serde_json::to_value(result)?)
    }

    async fn run_validate(&self, rule_path: &Path) -> Result<Value> {
        let rule = load_rule(rule_path).await?;
        let structure = self.engine.validate(&rule);
        let operators = self.engine.validate_operators(&rule);

        Ok(serde_json::json!({
            "isValid": structure.is_valid && operators.is_valid,
            "structure": structure,
            "operators": operators,
            "usedOperators": self.engine.used_operators(&rule),
        }))
    }

    fn run_operators(&self, category: Option<&str>) -> Result<Value> {
        let mut grouped = self.engine.operators_by_category();

        let Some(category) = category else {
            return Ok(serde_json::to_value(grouped)?);
        };
        if !OperatorCategory::ALL.iter().any(|c| c.as_str() == category) && !grouped.contains_key(category) {
            bail!("未知的操作符分类: {}", category);
        }

        let operators = grouped.remove(category).unwrap_or_default();
        Ok(serde_json::json!({ category: operators }))
    }
}

async fn load_json(path: &Path) -> Result<Value> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("读取文件失败: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("JSON 解析失败: {}", path.display()))
}

async fn load_rule(path: &Path) -> Result<Rule> {
    let value = load_json(path).await?;
    Rule::from_value(value).with_context(|| format!("规则解析失败: {}", path.display()))
}
