//! 基于 PostgreSQL advisory lock 的跨进程互斥锁
//!
//! ## 设计理念
//!
//! - **数据库仲裁**: 使用 `pg_advisory_xact_lock`，锁在进程和主机之间同样有效
//! - **事务即锁**: 每把锁独占一个事务，提交事务即释放锁
//! - **owner token**: 只有最初加锁的调用方持有正确的 token，内层调用方的释放被忽略
//!
//! ## 使用示例
//!
//! ```ignore
//! let registry = Arc::new(LockRegistry::postgres(pool));
//!
//! let owner = registry.acquire("dino-42", LockClass::Dinosaurs).await?;
//!
//! // 执行受保护的操作，内层函数可以用自己的 token 调用 unlock，不会提前释放
//! do_critical_work().await?;
//!
//! registry.unlock(&owner).await;
//! ```

mod handle;
mod key;
pub mod memory;
mod metrics;
mod registry;
mod session;

pub use handle::LockHandle;
pub use key::{LockClass, LockKey, hash};
pub use memory::MemorySessionFactory;
pub use metrics::LockOutcome;
pub use registry::{HeldLock, LockRegistry};
pub use session::{LockSession, PgLockSession, PgSessionFactory, SessionFactory};
