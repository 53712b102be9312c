//! 路由匹配器
//!
//! 持有已注册的路由记录，把路径解析为命中的记录链和路径参数。
//! 支持四种匹配模式：
//! - `exact`：段数相同，静态段逐一比较，`:name` 段提取参数
//! - `prefix`：按段比较的最长前缀匹配
//! - `regex`：记录上的正则覆盖，或由路径模式转换得到的正则，命名捕获组即参数
//! - `fuzzy`：字符子序列打分
//!
//! 默认模式下优先查询匹配缓存，只有干净命中（无校验错误）才会写入缓存。

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::cache::MatchCache;
use super::location::{join_paths, normalize_path, split_segments, Location, Meta};
use super::record::{RouteGroup, RouteRecord};
use super::validator::{validate_params, ValidationError};
use crate::core::config::MatcherConfig;
use crate::utils::{NavError, Result};

/// 参数名格式
static PARAM_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid param name regex"));

/// 模糊匹配的长度比例加分上限
const FUZZY_LENGTH_BONUS: f64 = 20.0;

/// 匹配模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// 精确匹配
    #[default]
    Exact,
    /// 前缀匹配
    Prefix,
    /// 正则匹配
    Regex,
    /// 模糊匹配
    Fuzzy,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Exact => write!(f, "exact"),
            MatchMode::Prefix => write!(f, "prefix"),
            MatchMode::Regex => write!(f, "regex"),
            MatchMode::Fuzzy => write!(f, "fuzzy"),
        }
    }
}

impl FromStr for MatchMode {
    type Err = NavError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(MatchMode::Exact),
            "prefix" => Ok(MatchMode::Prefix),
            "regex" => Ok(MatchMode::Regex),
            "fuzzy" => Ok(MatchMode::Fuzzy),
            other => Err(NavError::InvalidConfigValue {
                key: "mode".to_string(),
                reason: format!("未知的匹配模式 '{}'", other),
            }),
        }
    }
}

/// 匹配结果
///
/// 创建后不再修改；缓存条目被整体替换而不是原地更新。
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// 是否命中（存在校验错误时为 false）
    pub matched: bool,
    /// 规范化后的路径
    pub path: String,
    /// 命中的叶子记录
    pub record: Option<Arc<RouteRecord>>,
    /// 命中的记录链，祖先在前
    pub matched_records: Vec<Arc<RouteRecord>>,
    /// 路径参数
    pub params: BTreeMap<String, String>,
    /// 使用的匹配模式
    pub mode: MatchMode,
    /// 匹配得分
    pub score: f64,
    /// 参数校验错误
    pub validation_errors: Vec<ValidationError>,
    /// 是否来自缓存
    pub from_cache: bool,
}

impl MatchResult {
    fn miss(path: String, mode: MatchMode) -> Self {
        Self {
            matched: false,
            path,
            record: None,
            matched_records: Vec::new(),
            params: BTreeMap::new(),
            mode,
            score: 0.0,
            validation_errors: Vec::new(),
            from_cache: false,
        }
    }

    /// 是否存在校验错误
    pub fn has_validation_errors(&self) -> bool {
        !self.validation_errors.is_empty()
    }

    /// 用匹配结果补全位置信息
    ///
    /// 元数据按记录链依次合并，叶子的键优先。
    pub fn to_location(&self, raw: &Location) -> Location {
        let mut meta = Meta::new();
        for record in &self.matched_records {
            meta.extend(record.meta.clone());
        }
        Location {
            path: self.path.clone(),
            name: self.record.as_ref().and_then(|r| r.name.clone()),
            params: self.params.clone(),
            query: raw.query.clone(),
            hash: raw.hash.clone(),
            meta,
            matched: self.matched_records.clone(),
        }
    }
}

/// 路径段
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Param(String),
}

/// 编译后的路由
struct CompiledRoute {
    record: Arc<RouteRecord>,
    /// 祖先链（含自身）
    chain: Vec<Arc<RouteRecord>>,
    segments: Vec<Segment>,
    regex: Regex,
}

#[derive(Default)]
struct MatcherState {
    /// 按注册顺序排列
    routes: Vec<CompiledRoute>,
    /// 名称 -> 路径
    names: HashMap<String, String>,
    /// 每次变更递增，用于丢弃过时的缓存写入
    generation: u64,
}

/// 候选匹配
struct Candidate {
    chain: Vec<Arc<RouteRecord>>,
    params: BTreeMap<String, String>,
    score: f64,
}

/// 路由匹配器
pub struct RouteMatcher {
    state: RwLock<MatcherState>,
    cache: Option<Arc<MatchCache>>,
    config: MatcherConfig,
    include_query: bool,
}

impl RouteMatcher {
    /// 创建无缓存的匹配器
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            state: RwLock::new(MatcherState::default()),
            cache: None,
            config,
            include_query: false,
        }
    }

    /// 创建带缓存的匹配器
    pub fn with_cache(config: MatcherConfig, cache: Arc<MatchCache>, include_query: bool) -> Self {
        Self {
            state: RwLock::new(MatcherState::default()),
            cache: Some(cache),
            config,
            include_query,
        }
    }

    /// 匹配器配置
    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// 关联的缓存
    pub fn cache(&self) -> Option<&Arc<MatchCache>> {
        self.cache.as_ref()
    }

    /// 注册路由（子路由一并展开）
    pub async fn add_route(&self, record: RouteRecord) -> Result<()> {
        self.add_routes(vec![record]).await
    }

    /// 批量注册路由
    ///
    /// 全部校验通过后才写入，任一记录无效时不注册任何记录。
    pub async fn add_routes(&self, records: Vec<RouteRecord>) -> Result<()> {
        let mut flattened = Vec::new();
        for record in records {
            self.flatten(record, None, &mut flattened);
        }

        let mut compiled = Vec::with_capacity(flattened.len());
        for (record, chain) in flattened {
            compiled.push(self.compile(record, chain)?);
        }

        let mut state = self.state.write().await;
        let mut new_names: HashMap<String, String> = HashMap::new();
        for (index, route) in compiled.iter().enumerate() {
            let path = &route.record.path;
            let duplicate_path = state.routes.iter().any(|r| &r.record.path == path)
                || compiled[..index].iter().any(|r| &r.record.path == path);
            if duplicate_path {
                return Err(NavError::RouteAlreadyExists(path.clone()));
            }
            if let Some(name) = &route.record.name {
                if state.names.contains_key(name) || new_names.contains_key(name) {
                    return Err(NavError::RouteAlreadyExists(format!("@{}", name)));
                }
                new_names.insert(name.clone(), path.clone());
            }
        }

        let count = compiled.len();
        state.names.extend(new_names);
        state.routes.extend(compiled);
        state.generation += 1;
        drop(state);

        self.invalidate_cache();
        info!(count = count, "路由已注册");
        Ok(())
    }

    /// 注册路由组
    pub async fn add_group(&self, group: RouteGroup) -> Result<()> {
        self.add_routes(group.expand()).await
    }

    /// 移除路由及其全部子路由，返回移除数量
    pub async fn remove_route(&self, path: &str) -> Result<usize> {
        let path = normalize_path(path, self.config.strict_trailing_slash);
        let mut state = self.state.write().await;

        let target = state
            .routes
            .iter()
            .find(|r| r.record.path == path)
            .map(|r| Arc::clone(&r.record))
            .ok_or_else(|| NavError::RouteNotFound(path.clone()))?;

        let before = state.routes.len();
        state
            .routes
            .retain(|r| !r.chain.iter().any(|ancestor| Arc::ptr_eq(ancestor, &target)));
        let removed = before - state.routes.len();

        let remaining: Vec<String> = state.routes.iter().map(|r| r.record.path.clone()).collect();
        state.names.retain(|_, p| remaining.contains(p));
        state.generation += 1;
        drop(state);

        self.invalidate_cache();
        info!(path = %path, removed = removed, "路由已移除");
        Ok(removed)
    }

    /// 匹配路径
    ///
    /// `raw` 可以带查询串和锚点；`mode` 为 `None` 时使用默认模式。
    pub async fn match_path(&self, raw: &str, mode: Option<MatchMode>) -> MatchResult {
        let location = Location::parse(raw);
        self.match_location(&location, mode).await
    }

    /// 匹配已解析的位置
    pub async fn match_location(&self, location: &Location, mode: Option<MatchMode>) -> MatchResult {
        let mode = mode.unwrap_or(self.config.default_mode);
        let path = normalize_path(&location.path, self.config.strict_trailing_slash);

        let cache = self
            .cache
            .as_ref()
            .filter(|_| mode == self.config.default_mode);
        let key = MatchCache::cache_key(&path, self.include_query.then_some(&location.query));

        if let Some(cache) = cache {
            if let Some(entry) = cache.get(&key) {
                debug!(path = %path, mode = %mode, "匹配缓存命中");
                return MatchResult {
                    matched: true,
                    path,
                    record: entry.records.last().cloned(),
                    matched_records: entry.records,
                    params: entry.params,
                    mode,
                    score: entry.score,
                    validation_errors: Vec::new(),
                    from_cache: true,
                };
            }
        }

        let (candidate, generation) = {
            let state = self.state.read().await;
            let candidate = match mode {
                MatchMode::Exact => self.match_exact(&state, &path),
                MatchMode::Prefix => self.match_prefix(&state, &path),
                MatchMode::Regex => self.match_regex(&state, &path),
                MatchMode::Fuzzy => self.match_fuzzy(&state, &path),
            };
            (candidate, state.generation)
        };

        let Some(candidate) = candidate else {
            debug!(path = %path, mode = %mode, "没有匹配的路由");
            return MatchResult::miss(path, mode);
        };

        let validation_errors = if self.config.validation_enabled {
            let mut errors = Vec::new();
            for record in &candidate.chain {
                errors.extend(validate_params(&record.validators, &candidate.params).await);
            }
            errors
        } else {
            Vec::new()
        };
        let matched = validation_errors.is_empty();

        if matched {
            if let Some(cache) = cache {
                // 持有读锁写入，保证不会缓存已被移除的路由
                let state = self.state.read().await;
                if state.generation == generation {
                    cache.put(
                        key,
                        candidate.chain.clone(),
                        candidate.params.clone(),
                        candidate.score,
                        None,
                    );
                }
            }
        } else {
            debug!(path = %path, errors = validation_errors.len(), "参数校验失败");
        }

        MatchResult {
            matched,
            path,
            record: candidate.chain.last().cloned(),
            matched_records: candidate.chain,
            params: candidate.params,
            mode,
            score: candidate.score,
            validation_errors,
            from_cache: false,
        }
    }

    /// 根据名称和参数生成路径
    pub async fn resolve_named(
        &self,
        name: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<String> {
        let state = self.state.read().await;
        let pattern = state
            .names
            .get(name)
            .ok_or_else(|| NavError::RouteNotFound(format!("@{}", name)))?;

        let mut segments = Vec::new();
        for segment in split_segments(pattern) {
            match segment.strip_prefix(':') {
                Some(param) => {
                    let value = params.get(param).ok_or_else(|| NavError::MissingParam {
                        name: name.to_string(),
                        param: param.to_string(),
                    })?;
                    segments.push(value.as_str());
                }
                None => segments.push(segment),
            }
        }
        Ok(format!("/{}", segments.join("/")))
    }

    /// 按名称获取路由记录
    pub async fn get_by_name(&self, name: &str) -> Option<Arc<RouteRecord>> {
        let state = self.state.read().await;
        let path = state.names.get(name)?;
        state
            .routes
            .iter()
            .find(|r| &r.record.path == path)
            .map(|r| Arc::clone(&r.record))
    }

    /// 所有已注册的路由，按注册顺序
    pub async fn routes(&self) -> Vec<Arc<RouteRecord>> {
        let state = self.state.read().await;
        state.routes.iter().map(|r| Arc::clone(&r.record)).collect()
    }

    /// 已注册路由数量
    pub async fn len(&self) -> usize {
        self.state.read().await.routes.len()
    }

    /// 是否没有任何路由
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // ==================== 注册辅助 ====================

    fn flatten(
        &self,
        mut record: RouteRecord,
        parent: Option<&[Arc<RouteRecord>]>,
        out: &mut Vec<(Arc<RouteRecord>, Vec<Arc<RouteRecord>>)>,
    ) {
        let parent_path = parent.and_then(|chain| chain.last()).map(|r| r.path.clone());
        let full = match &parent_path {
            Some(parent_path) => join_paths(parent_path, &record.path),
            None => record.path.clone(),
        };
        record.path = normalize_path(&full, self.config.strict_trailing_slash);
        record.parent = parent_path;

        let children = std::mem::take(&mut record.children);
        let record = Arc::new(record);
        let mut chain = parent.map(<[_]>::to_vec).unwrap_or_default();
        chain.push(Arc::clone(&record));

        out.push((record, chain.clone()));
        for child in children {
            self.flatten(child, Some(&chain), out);
        }
    }

    fn compile(&self, record: Arc<RouteRecord>, chain: Vec<Arc<RouteRecord>>) -> Result<CompiledRoute> {
        let mut segments = Vec::new();
        let mut pattern = String::from("^");
        if !self.config.case_sensitive {
            pattern.insert_str(0, "(?i)");
        }

        for segment in split_segments(&record.path) {
            pattern.push('/');
            match segment.strip_prefix(':') {
                Some(name) => {
                    if !PARAM_NAME_REGEX.is_match(name) {
                        return Err(NavError::InvalidPattern(format!(
                            "路由 '{}' 的参数名 '{}' 无效",
                            record.path, name
                        )));
                    }
                    pattern.push_str(&format!("(?P<{}>[^/]+)", name));
                    segments.push(Segment::Param(name.to_string()));
                }
                None => {
                    pattern.push_str(&regex::escape(segment));
                    segments.push(Segment::Static(self.fold_case(segment)));
                }
            }
        }
        pattern.push('$');

        let regex = match &record.match_pattern {
            Some(custom) => Regex::new(custom)?,
            None => Regex::new(&pattern)?,
        };

        Ok(CompiledRoute {
            record,
            chain,
            segments,
            regex,
        })
    }

    fn fold_case(&self, s: &str) -> String {
        if self.config.case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    }

    fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            let removed = cache.clear_all();
            if removed > 0 {
                debug!(removed = removed, "路由变更，匹配缓存已清空");
            }
        }
    }

    // ==================== 匹配算法 ====================

    /// 逐段比较 `segments` 与 `path_segments` 的前 `segments.len()` 段
    fn match_segments(
        &self,
        segments: &[Segment],
        path_segments: &[&str],
    ) -> Option<(BTreeMap<String, String>, usize)> {
        let mut params = BTreeMap::new();
        let mut static_count = 0;
        for (segment, actual) in segments.iter().zip(path_segments) {
            match segment {
                Segment::Static(expected) => {
                    if *expected != self.fold_case(actual) {
                        return None;
                    }
                    static_count += 1;
                }
                Segment::Param(name) => {
                    if actual.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), actual.to_string());
                }
            }
        }
        Some((params, static_count))
    }

    fn match_exact(&self, state: &MatcherState, path: &str) -> Option<Candidate> {
        let path_segments = split_segments(path);
        let mut best: Option<Candidate> = None;

        for route in &state.routes {
            if route.segments.len() != path_segments.len() {
                continue;
            }
            let Some((params, static_count)) = self.match_segments(&route.segments, &path_segments)
            else {
                continue;
            };

            // 静态段权重更高，同分时保留先注册的
            let score = (static_count * 2 + params.len()) as f64;
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(Candidate {
                    chain: route.chain.clone(),
                    params,
                    score,
                });
            }
        }
        best
    }

    fn match_prefix(&self, state: &MatcherState, path: &str) -> Option<Candidate> {
        let path_segments = split_segments(path);
        let mut best: Option<(Candidate, usize)> = None;

        for route in &state.routes {
            // 根路由是任何路径的前缀，匹配长度为 0
            let segments: &[Segment] = if route.record.path == "/" {
                &[]
            } else {
                &route.segments
            };
            if segments.len() > path_segments.len() {
                continue;
            }
            let Some((params, _)) = self.match_segments(segments, &path_segments) else {
                continue;
            };

            let length: usize = path_segments[..segments.len()]
                .iter()
                .map(|s| s.len() + 1)
                .sum();
            let score = segments.len() as f64;
            let better = match &best {
                None => true,
                Some((b, best_length)) => {
                    score > b.score || (score == b.score && length > *best_length)
                }
            };
            if better {
                best = Some((
                    Candidate {
                        chain: route.chain.clone(),
                        params,
                        score,
                    },
                    length,
                ));
            }
        }
        best.map(|(candidate, _)| candidate)
    }

    fn match_regex(&self, state: &MatcherState, path: &str) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;

        for route in &state.routes {
            let Some(captures) = route.regex.captures(path) else {
                continue;
            };
            let params: BTreeMap<String, String> = route
                .regex
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|m| (name.to_string(), m.as_str().to_string()))
                })
                .collect();
            let score = captures.get(0).map_or(0, |m| m.as_str().len()) as f64;

            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(Candidate {
                    chain: route.chain.clone(),
                    params,
                    score,
                });
            }
        }
        best
    }

    fn match_fuzzy(&self, state: &MatcherState, path: &str) -> Option<Candidate> {
        // 分隔符不参与打分
        let query: String = self.fold_case(path).chars().filter(|c| *c != '/').collect();
        let min_score = self
            .config
            .fuzzy_min_score
            .unwrap_or(query.chars().count() as f64);
        let mut best: Option<Candidate> = None;

        for route in &state.routes {
            let target: String = self
                .fold_case(&route.record.path)
                .chars()
                .filter(|c| *c != '/')
                .collect();
            let score = fuzzy_score(&query, &target);
            if score < min_score {
                continue;
            }
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(Candidate {
                    chain: route.chain.clone(),
                    params: BTreeMap::new(),
                    score,
                });
            }
        }
        best
    }
}

/// 字符子序列打分
///
/// 每个按顺序出现的字符 +2，乱序但存在的字符 +1，
/// 再加上最多 20 分的长度比例加分。没有任何字符命中时得分为 0。
pub fn fuzzy_score(query: &str, target: &str) -> f64 {
    let target_chars: Vec<char> = target.chars().collect();
    let query_len = query.chars().count();
    if query_len == 0 || target_chars.is_empty() {
        return 0.0;
    }

    let mut score = 0.0;
    let mut cursor = 0;
    for ch in query.chars() {
        if let Some(offset) = target_chars[cursor..].iter().position(|&c| c == ch) {
            score += 2.0;
            cursor += offset + 1;
        } else if target_chars.contains(&ch) {
            score += 1.0;
        }
    }
    if score == 0.0 {
        return 0.0;
    }

    let (short, long) = if query_len < target_chars.len() {
        (query_len, target_chars.len())
    } else {
        (target_chars.len(), query_len)
    };
    score + FUZZY_LENGTH_BONUS * short as f64 / long as f64
}
