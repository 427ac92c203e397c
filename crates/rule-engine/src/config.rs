//! 引擎配置
//!
//! 加载顺序（后加载的覆盖先加载的同名配置项）：
//! 1. 内置默认值
//! 2. 配置文件：显式指定的路径，或 `config/rule-engine.toml`（可选）
//! 3. 环境变量（`RULE_ENGINE_` 前缀，如 `RULE_ENGINE_LOG_LEVEL` -> `log_level`）

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 默认配置文件位置
pub const DEFAULT_CONFIG_FILE: &str = "config/rule-engine.toml";

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 求值和内省前是否做结构校验
    pub validate_rules: bool,
    /// 是否缓存字段变换结果
    pub mutation_cache: bool,
    pub mutation_cache_capacity: usize,
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validate_rules: true,
            mutation_cache: true,
            mutation_cache_capacity: 10_000,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl EngineConfig {
    /// 从配置文件和环境变量加载
    ///
    /// 显式指定的文件必须存在；未指定时默认文件缺失也不报错。
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        Config::builder()
            .set_default("validate_rules", defaults.validate_rules)?
            .set_default("mutation_cache", defaults.mutation_cache)?
            .set_default("mutation_cache_capacity", defaults.mutation_cache_capacity as u64)?
            .set_default("log_level", defaults.log_level)?
            .set_default("log_format", defaults.log_format)?
            .add_source(file)
            .add_source(Environment::with_prefix("RULE_ENGINE").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// 是否输出 JSON 格式日志
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}
