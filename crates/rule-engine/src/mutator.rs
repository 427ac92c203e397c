//! 数据变换
//!
//! 求值前按字段路径对数据做预处理（例如把远程查询结果填进来、统一大小写）。
//! 使用 DashMap 保存变换函数和结果缓存，可在多个并发求值间共享。

use crate::discovery::{TEXT_PATH_PREFIX, resolve_property, resolve_property_mut};
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// 字段变换函数
pub type MutationFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// 数据变换器
#[derive(Clone)]
pub struct Mutator {
    mutations: Arc<DashMap<String, MutationFn>>,
    /// 键为 `字段 + 输入值的 JSON 文本`
    cache: Arc<DashMap<String, Value>>,
    cache_enabled: bool,
    cache_capacity: usize,
}

impl Mutator {
    pub fn new(cache_enabled: bool, cache_capacity: usize) -> Self {
        Self {
            mutations: Arc::new(DashMap::new()),
            cache: Arc::new(DashMap::new()),
            cache_enabled,
            cache_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// 注册（或替换）字段变换
    #[instrument(skip(self, mutation))]
    pub fn add(&self, field: &str, mutation: MutationFn) {
        let field = normalize(field);
        if self.mutations.insert(field.clone(), mutation).is_some() {
            debug!(%field, "替换已有的字段变换");
        }
        self.clear_cache();
    }

    /// 移除字段变换，返回是否存在
    #[instrument(skip(self))]
    pub fn remove(&self, field: &str) -> bool {
        let removed = self.mutations.remove(&normalize(field)).is_some();
        if removed {
            self.clear_cache();
        }
        removed
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// 对数据应用所有变换，数组逐项处理
    pub fn mutate(&self, criteria: &Value) -> Value {
        if self.mutations.is_empty() {
            return criteria.clone();
        }

        match criteria {
            Value::Array(items) => Value::Array(items.iter().map(|item| self.apply(item)).collect()),
            single => self.apply(single),
        }
    }

    /// 按路径字典序应用变换，外层路径先于内层路径写回
    ///
    /// 输入总是取自原始数据。
    fn apply(&self, criteria: &Value) -> Value {
        let mut mutated = criteria.clone();

        let mut mutations: Vec<(String, MutationFn)> = self
            .mutations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        mutations.sort_by(|a, b| a.0.cmp(&b.0));

        for (field, mutation) in &mutations {
            let Some(input) = resolve_property(field, criteria) else {
                debug!(%field, "字段不存在，跳过变换");
                continue;
            };

            let output = self.run(field, input, mutation);
            match resolve_property_mut(field, &mut mutated) {
                Some(slot) => *slot = output,
                None => warn!(%field, "写回变换结果失败"),
            }
        }

        mutated
    }

    fn run(&self, field: &str, input: &Value, mutation: &MutationFn) -> Value {
        if !self.cache_enabled {
            return mutation(input);
        }

        let key = format!("{}:{}", field, input);
        if let Some(hit) = self.cache.get(&key) {
            return hit.value().clone();
        }

        let output = mutation(input);
        if self.cache.len() >= self.cache_capacity {
            debug!(capacity = self.cache_capacity, "变换缓存已满，清空");
            self.cache.clear();
        }
        self.cache.insert(key, output.clone());
        output
    }
}

impl Default for Mutator {
    fn default() -> Self {
        Self::new(true, 10_000)
    }
}

impl fmt::Debug for Mutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutator")
            .field("mutations", &self.mutations.len())
            .field("cached", &self.cache.len())
            .field("cache_enabled", &self.cache_enabled)
            .finish()
    }
}

fn normalize(field: &str) -> String {
    field.strip_prefix(TEXT_PATH_PREFIX).unwrap_or(field).to_string()
}
