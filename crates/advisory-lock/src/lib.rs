//! 命名、可重入安全的阻塞互斥锁
//!
//! 以 PostgreSQL 事务级 advisory lock 为仲裁者，让多个进程实例或同一进程内的
//! 多条调用路径对 `(resource_id, lock_class)` 标识的逻辑资源进行排他访问。
//!
//! ## 模块结构
//!
//! - `error`: 错误类型定义
//! - `lock`: 锁键、会话抽象、锁句柄与锁注册表

pub mod error;
pub mod lock;

pub use error::{LockError, Result};
pub use lock::{
    HeldLock, LockClass, LockHandle, LockKey, LockRegistry, LockSession, MemorySessionFactory,
    PgSessionFactory, SessionFactory,
};
