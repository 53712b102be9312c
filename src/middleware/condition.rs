//! 中间件执行条件
//!
//! 条件由多个可选部分组成，全部满足时中间件才会执行：
//! - 路径模式：以 `^` 开头按正则处理，否则按通配符处理
//!   （`*` 匹配单个路径段内的任意字符，`**` 匹配任意字符）
//! - 路由名称：目标位置的名称在列表中
//! - 元数据：目标位置的元数据包含指定键值
//! - 自定义谓词

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::router::Location;
use crate::utils::{NavError, Result};

type Predicate = Arc<dyn Fn(&Location, &Location) -> bool + Send + Sync>;

/// 编译后的路径模式
#[derive(Debug, Clone)]
struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    fn compile(pattern: &str) -> Result<Self> {
        let regex = if pattern.starts_with('^') {
            Regex::new(pattern)?
        } else {
            Regex::new(&glob_to_regex(pattern))?
        };
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }
}

/// 把通配符模式转换为锚定的正则表达式
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

/// 中间件执行条件
#[derive(Clone, Default)]
pub struct MiddlewareCondition {
    path: Option<PathPattern>,
    route_names: Vec<String>,
    meta: Vec<(String, Value)>,
    predicate: Option<Predicate>,
}

impl MiddlewareCondition {
    /// 创建空条件（总是满足）
    pub fn new() -> Self {
        Self::default()
    }

    /// 按路径模式过滤
    pub fn path(mut self, pattern: &str) -> Result<Self> {
        self.path = Some(PathPattern::compile(pattern)?);
        Ok(self)
    }

    /// 按路由名称过滤，可多次调用
    pub fn route_name(mut self, name: impl Into<String>) -> Self {
        self.route_names.push(name.into());
        self
    }

    /// 要求元数据包含指定键值，可多次调用
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.push((key.into(), value.into()));
        self
    }

    /// 自定义谓词，参数为 `(to, from)`
    pub fn predicate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Location, &Location) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(f));
        self
    }

    /// 判断本次导航是否满足条件
    pub fn matches(&self, to: &Location, from: &Location) -> bool {
        if let Some(ref pattern) = self.path {
            if !pattern.regex.is_match(&to.path) {
                return false;
            }
        }

        if !self.route_names.is_empty() {
            match to.name {
                Some(ref name) if self.route_names.contains(name) => {}
                _ => return false,
            }
        }

        for (key, expected) in &self.meta {
            if to.meta.get(key) != Some(expected) {
                return false;
            }
        }

        match self.predicate {
            Some(ref predicate) => predicate(to, from),
            None => true,
        }
    }

    /// 路径模式原文
    pub fn path_pattern(&self) -> Option<&str> {
        self.path.as_ref().map(|p| p.source.as_str())
    }
}

impl fmt::Debug for MiddlewareCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareCondition")
            .field("path", &self.path_pattern())
            .field("route_names", &self.route_names)
            .field("meta", &self.meta)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl TryFrom<&str> for MiddlewareCondition {
    type Error = NavError;

    fn try_from(pattern: &str) -> Result<Self> {
        MiddlewareCondition::new().path(pattern)
    }
}
