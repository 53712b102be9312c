//! 工具模块
//!
//! 包含错误类型、ID 生成、日志系统和取消令牌等通用工具。

pub mod cancel;
pub mod error;
pub mod id;
pub mod logger;

pub use cancel::CancellationToken;
pub use error::{error_code, NavError, Result};
pub use id::{generate_id, generate_uuid, prefixed_id};
pub use logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// 获取互斥锁，锁中毒时直接取回内部数据
///
/// 注册表中的数据在任何持锁区间内都保持一致，中毒不代表数据损坏。
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 获取读锁，语义同 [`lock`]
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// 获取写锁，语义同 [`lock`]
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
