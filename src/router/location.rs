//! 导航位置
//!
//! 定义 `Location`（一次导航的起点或终点）、`NavigationTarget`（重定向目标），
//! 以及路径规范化和查询串规范化函数。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::record::RouteRecord;

/// 元数据容器
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// 规范化后的导航位置
///
/// 每次管线执行都有两个位置参与：`to` 与 `from`。
/// `matched` 是命中的路由记录链，祖先在前，叶子在后。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    /// 规范化后的路径
    pub path: String,

    /// 命中路由的名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// 路径参数
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// 查询参数（按键排序）
    #[serde(default)]
    pub query: BTreeMap<String, String>,

    /// 锚点（不含 `#`）
    #[serde(default)]
    pub hash: String,

    /// 合并后的路由元数据
    #[serde(default)]
    pub meta: Meta,

    /// 命中的路由记录链
    #[serde(skip)]
    pub matched: Vec<Arc<RouteRecord>>,
}

impl Location {
    /// 创建只有路径的位置
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// 解析原始地址（`/path?a=1&b=2#hash`）
    ///
    /// 路径部分不做规范化，规范化由匹配器按配置完成。
    pub fn parse(raw: &str) -> Self {
        let (rest, hash) = match raw.split_once('#') {
            Some((rest, hash)) => (rest, hash.to_string()),
            None => (raw, String::new()),
        };
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (rest, BTreeMap::new()),
        };

        Self {
            path: path.to_string(),
            query,
            hash,
            ..Default::default()
        }
    }

    /// 设置查询参数
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// 设置锚点
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = hash.into();
        self
    }

    /// 规范化查询串（键排序）
    pub fn canonical_query(&self) -> String {
        canonical_query(&self.query)
    }

    /// 完整地址：路径 + 查询串 + 锚点
    pub fn full_path(&self) -> String {
        let mut full = self.path.clone();
        if !self.query.is_empty() {
            full.push('?');
            full.push_str(&self.canonical_query());
        }
        if !self.hash.is_empty() {
            full.push('#');
            full.push_str(&self.hash);
        }
        full
    }

    /// 叶子路由记录
    pub fn leaf(&self) -> Option<&Arc<RouteRecord>> {
        self.matched.last()
    }

    /// 叶子路由的组件名称
    pub fn component_name(&self) -> Option<&str> {
        self.leaf()
            .and_then(|r| r.component.as_ref())
            .map(|c| c.name.as_str())
    }

    /// 是否包含给定路径的路由记录
    pub fn contains_record(&self, path: &str) -> bool {
        self.matched.iter().any(|r| r.path == path)
    }
}

/// 导航目标
///
/// 守卫重定向和 `Navigator::navigate` 都使用这个类型。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NavigationTarget {
    /// 原始地址
    Path(String),
    /// 命名路由
    Named {
        /// 路由名称
        name: String,
        /// 路径参数
        #[serde(default)]
        params: BTreeMap<String, String>,
        /// 查询参数
        #[serde(default)]
        query: BTreeMap<String, String>,
    },
}

impl NavigationTarget {
    /// 创建命名路由目标
    pub fn named(name: impl Into<String>) -> Self {
        NavigationTarget::Named {
            name: name.into(),
            params: BTreeMap::new(),
            query: BTreeMap::new(),
        }
    }

    /// 为命名路由目标添加参数，对路径目标无效
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let NavigationTarget::Named { ref mut params, .. } = self {
            params.insert(key.into(), value.into());
        }
        self
    }
}

impl From<&str> for NavigationTarget {
    fn from(path: &str) -> Self {
        NavigationTarget::Path(path.to_string())
    }
}

impl From<String> for NavigationTarget {
    fn from(path: String) -> Self {
        NavigationTarget::Path(path)
    }
}

impl fmt::Display for NavigationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavigationTarget::Path(path) => write!(f, "{}", path),
            NavigationTarget::Named { name, params, .. } if params.is_empty() => {
                write!(f, "@{}", name)
            }
            NavigationTarget::Named { name, params, .. } => {
                let params: Vec<String> =
                    params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "@{}({})", name, params.join(","))
            }
        }
    }
}

/// 解析查询串，空键被忽略，重复键以最后一个为准
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// 生成按键排序的查询串
pub fn canonical_query(query: &BTreeMap<String, String>) -> String {
    query
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k.clone()
            } else {
                format!("{}={}", k, v)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// 规范化路径
///
/// - 保证以 `/` 开头，合并连续的 `/`
/// - 非严格模式下去掉末尾的 `/`（根路径除外）
pub fn normalize_path(path: &str, strict_trailing_slash: bool) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    normalized.push('/');
    for ch in path.trim_start_matches('/').chars() {
        if ch == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(ch);
    }

    if !strict_trailing_slash && normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// 按 `/` 切分路径段
///
/// 根路径得到一个空段；严格模式下的末尾斜杠也保留为一个空段。
pub fn split_segments(path: &str) -> Vec<&str> {
    path.strip_prefix('/').unwrap_or(path).split('/').collect()
}

/// 拼接父路径与子路径
///
/// 以 `/` 开头的子路径视为绝对路径，直接返回。
pub fn join_paths(parent: &str, child: &str) -> String {
    if child.starts_with('/') {
        return child.to_string();
    }
    if child.is_empty() {
        return parent.to_string();
    }
    format!("{}/{}", parent.trim_end_matches('/'), child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw_location() {
        let loc = Location::parse("/users/42?tab=posts&sort=desc#top");
        assert_eq!(loc.path, "/users/42");
        assert_eq!(loc.query.get("tab").map(String::as_str), Some("posts"));
        assert_eq!(loc.query.get("sort").map(String::as_str), Some("desc"));
        assert_eq!(loc.hash, "top");
    }

    #[test]
    fn test_parse_without_query_or_hash() {
        let loc = Location::parse("/about");
        assert_eq!(loc.path, "/about");
        assert!(loc.query.is_empty());
        assert!(loc.hash.is_empty());
    }

    #[test]
    fn test_canonical_query_collapses_ordering() {
        let a = Location::parse("/search?b=2&a=1");
        let b = Location::parse("/search?a=1&b=2");
        assert_eq!(a.canonical_query(), "a=1&b=2");
        assert_eq!(a.canonical_query(), b.canonical_query());
    }

    #[test]
    fn test_parse_query_edge_cases() {
        let query = parse_query("flag&=ignored&x=1&x=2&&");
        assert_eq!(query.len(), 2);
        assert_eq!(query.get("flag").map(String::as_str), Some(""));
        assert_eq!(query.get("x").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_full_path() {
        let loc = Location::new("/a").with_query("z", "1").with_query("a", "2").with_hash("h");
        assert_eq!(loc.full_path(), "/a?a=2&z=1#h");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("users//42/", false), "/users/42");
        assert_eq!(normalize_path("/users/42/", true), "/users/42/");
        assert_eq!(normalize_path("/", false), "/");
        assert_eq!(normalize_path("", false), "/");
    }

    #[test]
    fn test_split_segments() {
        assert_eq!(split_segments("/"), vec![""]);
        assert_eq!(split_segments("/a/b"), vec!["a", "b"]);
        assert_eq!(split_segments("/a/"), vec!["a", ""]);
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("/users", ":id"), "/users/:id");
        assert_eq!(join_paths("/users/", "profile"), "/users/profile");
        assert_eq!(join_paths("/users", "/abs"), "/abs");
        assert_eq!(join_paths("/users", ""), "/users");
    }

    #[test]
    fn test_navigation_target_display() {
        assert_eq!(NavigationTarget::from("/login").to_string(), "/login");
        let named = NavigationTarget::named("user").with_param("id", "7");
        assert_eq!(named.to_string(), "@user(id=7)");
    }
}
