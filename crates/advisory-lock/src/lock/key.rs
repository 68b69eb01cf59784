//! 锁键
//!
//! `(resource_id, lock_class)` 组成一把锁的身份：
//! - 注册表中以 `"{resource_id}-{lock_class}"` 作为键
//! - 数据库中以两个 32 位有符号整数作为 `pg_advisory_xact_lock` 参数

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LockError;

/// 锁类别
///
/// 对被锁资源进行分类，同名资源 ID 可以按类别区分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockClass {
    Migrations,
    Dinosaurs,
}

impl LockClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Migrations => "migrations",
            Self::Dinosaurs => "dinosaurs",
        }
    }
}

impl fmt::Display for LockClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockClass {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "migrations" => Ok(Self::Migrations),
            "dinosaurs" => Ok(Self::Dinosaurs),
            other => Err(LockError::UnknownLockClass(other.to_string())),
        }
    }
}

/// 锁键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub resource_id: String,
    pub lock_class: LockClass,
}

impl LockKey {
    pub fn new(resource_id: impl Into<String>, lock_class: LockClass) -> Self {
        Self {
            resource_id: resource_id.into(),
            lock_class,
        }
    }

    /// 注册表键
    pub fn encoded(&self) -> String {
        format!("{}-{}", self.resource_id, self.lock_class)
    }

    /// advisory lock 的两个整数参数
    ///
    /// 不同字符串可能碰撞到同一对整数，这是两个 int4 键空间的固有限制
    pub fn hashes(&self) -> (i32, i32) {
        (hash(&self.resource_id), hash(self.lock_class.as_str()))
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.resource_id, self.lock_class)
    }
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a 32 位哈希，按位重新解释为 PostgreSQL integer
pub fn hash(s: &str) -> i32 {
    let mut h = FNV_OFFSET_BASIS;
    for b in s.as_bytes() {
        h ^= u32::from(*b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h as i32
}
