//! 锁错误类型
//!
//! 区分会话、状态、加锁与释放四类失败

use thiserror::Error;

/// advisory lock 错误类型
#[derive(Debug, Error)]
pub enum LockError {
    /// 无法开启数据库会话或事务
    #[error("无法开启数据库会话: {0}")]
    Session(#[source] sqlx::Error),

    /// 调用方使用错误：键字段缺失、重复释放等
    #[error("锁状态无效: {0}")]
    InvalidState(String),

    /// 等待锁期间数据库调用失败（连接断开、会话被终止）
    #[error("获取锁失败: key={key}")]
    Acquire {
        key: String,
        #[source]
        source: sqlx::Error,
    },

    /// 提交事务失败，锁状态已被清理
    #[error("释放锁失败: {0}")]
    Release(#[source] sqlx::Error),

    #[error("未知的锁类别: {0}")]
    UnknownLockClass(String),
}

/// 锁 Result 类型别名
pub type Result<T> = std::result::Result<T, LockError>;

impl LockError {
    /// 缺失字段或状态错误的便捷构造
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// 是否为可重试错误
    ///
    /// 状态错误属于调用方编程错误，重试不会改变结果
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Session(_) | Self::Acquire { .. })
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Session(_) => "LOCK_SESSION_ERROR",
            Self::InvalidState(_) => "LOCK_INVALID_STATE",
            Self::Acquire { .. } => "LOCK_ACQUIRE_ERROR",
            Self::Release(_) => "LOCK_RELEASE_ERROR",
            Self::UnknownLockClass(_) => "UNKNOWN_LOCK_CLASS",
        }
    }
}
