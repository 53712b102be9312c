//! 路由匹配缓存
//!
//! 以规范化路径（可选地附加按键排序的查询串）为键，缓存匹配器的输出。
//! 容量有界，溢出时淘汰最久未访问的键；TTL 非零的条目在 `now - created_at > ttl`
//! 时视为过期，访问时惰性检查，也可以由后台任务定期清扫。

use lru::LruCache;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::location::canonical_query;
use super::record::RouteRecord;
use crate::utils::{lock, Result};

/// 默认缓存容量
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// 缓存键
    pub key: String,
    /// 命中的路由记录链
    pub records: Vec<Arc<RouteRecord>>,
    /// 路径参数
    pub params: BTreeMap<String, String>,
    /// 匹配得分
    pub score: f64,
    /// 创建时间
    pub created_at: Instant,
    /// 存活时间，`None` 表示永不过期
    pub ttl: Option<Duration>,
    /// 命中次数
    pub hit_count: u64,
    /// 最近访问时间
    pub last_access: Instant,
}

impl CacheEntry {
    /// 在给定时刻是否已过期
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.created_at) > ttl,
            None => false,
        }
    }

    fn approximate_size(&self) -> usize {
        let params: usize = self.params.iter().map(|(k, v)| k.len() + v.len()).sum();
        std::mem::size_of::<Self>()
            + self.key.len()
            + params
            + self.records.len() * std::mem::size_of::<Arc<RouteRecord>>()
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// 当前条目数
    pub size: usize,
    /// 最大条目数
    pub max: usize,
    /// 命中次数
    pub hits: u64,
    /// 未命中次数
    pub misses: u64,
    /// 命中率（百分比）
    pub hit_rate: f64,
    /// 估算内存占用（字节）
    pub memory_usage: usize,
}

/// 路由匹配缓存
pub struct MatchCache {
    /// LRU 缓存（key -> CacheEntry）
    entries: Mutex<LruCache<String, CacheEntry>>,
    /// 命中次数
    hits: AtomicU64,
    /// 未命中次数
    misses: AtomicU64,
    /// 容量
    capacity: usize,
    /// 默认 TTL
    default_ttl: Option<Duration>,
}

impl MatchCache {
    /// 创建新的匹配缓存
    ///
    /// `default_ttl` 为零表示永不过期。
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        let size = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(size)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            capacity,
            default_ttl: non_zero(default_ttl),
        }
    }

    /// 使用默认容量、不过期的缓存
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, Duration::ZERO)
    }

    /// 生成缓存键
    ///
    /// 查询参数顺序不同的地址得到同一个键。
    pub fn cache_key(path: &str, query: Option<&BTreeMap<String, String>>) -> String {
        match query {
            Some(query) if !query.is_empty() => format!("{}?{}", path, canonical_query(query)),
            _ => path.to_string(),
        }
    }

    /// 获取缓存条目
    ///
    /// 过期条目会被移除并计为未命中。
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut entries = lock(&self.entries);

        let expired = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                entry.hit_count += 1;
                entry.last_access = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            debug!(key = %key, "缓存条目已过期");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// 写入缓存条目
    ///
    /// `ttl` 为 `None` 时使用默认 TTL；显式传入零表示永不过期。
    pub fn set(
        &self,
        key: impl Into<String>,
        records: Vec<Arc<RouteRecord>>,
        params: BTreeMap<String, String>,
        ttl: Option<Duration>,
    ) {
        self.put(key.into(), records, params, 0.0, ttl);
    }

    pub(crate) fn put(
        &self,
        key: String,
        records: Vec<Arc<RouteRecord>>,
        params: BTreeMap<String, String>,
        score: f64,
        ttl: Option<Duration>,
    ) {
        let now = Instant::now();
        let ttl = match ttl {
            Some(ttl) => non_zero(ttl),
            None => self.default_ttl,
        };
        let entry = CacheEntry {
            key: key.clone(),
            records,
            params,
            score,
            created_at: now,
            ttl,
            hit_count: 0,
            last_access: now,
        };

        let mut entries = lock(&self.entries);
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                debug!(key = %evicted, "缓存已满，淘汰最久未访问条目");
            }
        }
    }

    /// 删除指定条目
    pub fn delete(&self, key: &str) -> bool {
        lock(&self.entries).pop(key).is_some()
    }

    /// 清空缓存
    ///
    /// 传入正则时只删除键匹配的条目，返回删除数量。
    pub fn clear(&self, pattern: Option<&str>) -> Result<usize> {
        let Some(pattern) = pattern else {
            return Ok(self.clear_all());
        };

        let regex = Regex::new(pattern)?;
        let mut entries = lock(&self.entries);
        let keys_to_remove: Vec<String> = entries
            .iter()
            .filter(|(key, _)| regex.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys_to_remove {
            entries.pop(key);
        }
        Ok(keys_to_remove.len())
    }

    /// 清空全部条目，返回删除数量
    pub fn clear_all(&self) -> usize {
        let mut entries = lock(&self.entries);
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// 清扫所有过期条目，返回清扫数量
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "已清扫过期缓存条目");
        }
        expired.len()
    }

    /// 启动后台清扫任务
    ///
    /// 不在 tokio 运行时中调用时返回 `None`。任务只持有缓存的弱引用，
    /// 缓存被释放或句柄被丢弃时任务结束。
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> Option<SweeperHandle> {
        if interval.is_zero() {
            return None;
        }
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let cache: Weak<MatchCache> = Arc::downgrade(self);

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一次 tick 立即完成
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep_expired();
                    }
                    None => break,
                }
            }
        });
        Some(SweeperHandle { handle })
    }

    /// 获取统计信息
    pub fn stats(&self) -> CacheStats {
        let entries = lock(&self.entries);
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            size: entries.len(),
            max: self.capacity,
            hits,
            misses,
            hit_rate: if total > 0 {
                (hits as f64 / total as f64) * 100.0
            } else {
                0.0
            },
            memory_usage: entries.iter().map(|(_, e)| e.approximate_size()).sum(),
        }
    }

    /// 重置命中统计，不影响缓存内容
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// 当前条目数
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 所有键，最近访问的在前
    pub fn keys(&self) -> Vec<String> {
        lock(&self.entries).iter().map(|(k, _)| k.clone()).collect()
    }
}

impl Default for MatchCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn non_zero(ttl: Duration) -> Option<Duration> {
    (!ttl.is_zero()).then_some(ttl)
}

/// 后台清扫任务句柄，丢弃时停止任务
#[derive(Debug)]
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// 任务是否已结束
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str) -> Vec<Arc<RouteRecord>> {
        vec![Arc::new(RouteRecord::new(path))]
    }

    fn params(id: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("id".to_string(), id.to_string())])
    }

    #[tokio::test]
    async fn test_get_and_set() {
        let cache = MatchCache::new(4, Duration::ZERO);
        assert!(cache.get("/a/1").is_none());

        cache.set("/a/1", record("/a/:id"), params("1"), None);
        let entry = cache.get("/a/1").unwrap();
        assert_eq!(entry.records[0].path, "/a/:id");
        assert_eq!(entry.params["id"], "1");
        assert_eq!(entry.hit_count, 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 50.0);
        assert!(stats.memory_usage > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = MatchCache::new(4, Duration::ZERO);
        cache.set("/a", record("/a"), BTreeMap::new(), Some(Duration::from_millis(1000)));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(cache.get("/a").is_some());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(cache.get("/a").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_and_zero_override() {
        let cache = MatchCache::new(4, Duration::from_millis(100));
        cache.set("/default", record("/default"), BTreeMap::new(), None);
        cache.set("/forever", record("/forever"), BTreeMap::new(), Some(Duration::ZERO));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(cache.get("/default").is_none());
        assert!(cache.get("/forever").is_some());
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = MatchCache::new(3, Duration::ZERO);
        cache.set("/a", record("/a"), BTreeMap::new(), None);
        cache.set("/b", record("/b"), BTreeMap::new(), None);
        cache.set("/c", record("/c"), BTreeMap::new(), None);

        // 访问 /a，使 /b 成为最久未访问
        assert!(cache.get("/a").is_some());
        cache.set("/d", record("/d"), BTreeMap::new(), None);

        assert_eq!(cache.len(), 3);
        assert!(cache.get("/b").is_none());
        assert!(cache.get("/a").is_some());
        assert!(cache.get("/c").is_some());
        assert!(cache.get("/d").is_some());
    }

    #[tokio::test]
    async fn test_delete_and_clear_with_pattern() {
        let cache = MatchCache::new(8, Duration::ZERO);
        cache.set("/users/1", record("/users/:id"), params("1"), None);
        cache.set("/users/2", record("/users/:id"), params("2"), None);
        cache.set("/about", record("/about"), BTreeMap::new(), None);

        assert!(cache.delete("/users/1"));
        assert!(!cache.delete("/users/1"));

        assert_eq!(cache.clear(Some("^/users/")).unwrap(), 1);
        assert_eq!(cache.keys(), vec!["/about".to_string()]);

        assert!(cache.clear(Some("(")).is_err());
        assert_eq!(cache.clear(None).unwrap(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_reset_stats_keeps_entries() {
        let cache = MatchCache::new(2, Duration::ZERO);
        cache.set("/a", record("/a"), BTreeMap::new(), None);
        cache.get("/a");
        cache.get("/missing");

        cache.reset_stats();
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_cache_key_canonical_query() {
        let q1 = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(MatchCache::cache_key("/s", Some(&q1)), "/s?a=1&b=2");
        assert_eq!(MatchCache::cache_key("/s", Some(&BTreeMap::new())), "/s");
        assert_eq!(MatchCache::cache_key("/s", None), "/s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let cache = Arc::new(MatchCache::new(4, Duration::from_millis(50)));
        cache.set("/a", record("/a"), BTreeMap::new(), None);

        let handle = cache.start_sweeper(Duration::from_millis(100)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.len(), 0);
        drop(handle);
    }

    #[test]
    fn test_sweeper_requires_runtime() {
        let cache = Arc::new(MatchCache::with_default_capacity());
        assert!(cache.start_sweeper(Duration::from_millis(10)).is_none());
    }
}
