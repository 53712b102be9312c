//! 注册标识生成器
//!
//! 守卫、中间件注册以及执行记录都使用 10 位 62 进制 ID（0-9, a-z, A-Z），
//! 可选地附带类别前缀，例如 `guard-a1B2c3D4e5`。

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// ID 长度
const ID_LENGTH: usize = 10;

/// 生成 10 位 62 进制 ID
///
/// 使用时间戳与随机数异或组合。
///
/// # Example
///
/// ```
/// use chips_navigator::utils::id::generate_id;
///
/// let id = generate_id();
/// assert_eq!(id.len(), 10);
/// ```
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();

    let random: u64 = rng.gen();
    let mut value = timestamp ^ random;

    let mut result = Vec::with_capacity(ID_LENGTH);
    for _ in 0..ID_LENGTH {
        let index = (value % 62) as usize;
        result.push(BASE62_CHARS[index] as char);
        value /= 62;
    }

    result.into_iter().rev().collect()
}

/// 生成带类别前缀的 ID
///
/// ```
/// use chips_navigator::utils::id::prefixed_id;
///
/// let id = prefixed_id("guard");
/// assert!(id.starts_with("guard-"));
/// ```
pub fn prefixed_id(prefix: &str) -> String {
    format!("{}-{}", prefix, generate_id())
}

/// 验证 ID 格式是否有效（不含前缀）
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LENGTH && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// 生成 UUID v4 格式的 ID
///
/// 用于执行记录等需要全局唯一性的场景
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_id_length_and_charset() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LENGTH);
        assert!(is_valid_id(&id));
    }

    #[test]
    fn test_generate_id_uniqueness() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            assert!(ids.insert(generate_id()), "ID collision detected");
        }
    }

    #[test]
    fn test_prefixed_id() {
        let id = prefixed_id("mw");
        let (prefix, rest) = id.split_once('-').unwrap();
        assert_eq!(prefix, "mw");
        assert!(is_valid_id(rest));
    }

    #[test]
    fn test_is_valid_id() {
        assert!(is_valid_id("a1B2c3D4e5"));
        assert!(!is_valid_id("short"));
        assert!(!is_valid_id("a1B2c3-4e5"));
    }

    #[test]
    fn test_generate_uuid() {
        let uuid = generate_uuid();
        assert_eq!(uuid.len(), 36);
    }
}
