//! 进程内会话实现
//!
//! 在内存中模拟 PostgreSQL 事务级 advisory lock，用于测试和本地开发。
//!
//! ## 局限
//!
//! - **不能用于生产**: 锁只在当前进程内有效
//! - 每个整数键对应一个异步互斥量，等待者按到达顺序获得锁
//! - 同一会话重复锁定同一个键立即成功，与 PostgreSQL 一致
//! - 丢弃等待中的 future 会立即退出队列；PostgreSQL 后端则会继续排队直到拿到锁或断开连接

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::session::{LockSession, SessionFactory};
use crate::error::{LockError, Result};

type LockId = (i32, i32);

#[derive(Default)]
struct MemoryState {
    locks: Mutex<HashMap<LockId, Arc<AsyncMutex<()>>>>,
    next_txid: AtomicI64,
    begun: AtomicUsize,
    committed: AtomicUsize,
    fail_next_begin: AtomicBool,
    fail_locks: AtomicBool,
    fail_commits: AtomicBool,
}

impl MemoryState {
    fn slot(&self, id: LockId) -> Arc<AsyncMutex<()>> {
        self.locks.lock().entry(id).or_default().clone()
    }

    /// 没有持有者也没有等待者时回收键
    fn reclaim(&self, id: LockId) {
        let mut locks = self.locks.lock();
        if locks.get(&id).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            locks.remove(&id);
        }
    }
}

/// 内存会话工厂
#[derive(Clone, Default)]
pub struct MemorySessionFactory {
    state: Arc<MemoryState>,
}

impl MemorySessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一次 `begin` 失败
    pub fn fail_next_begin(&self) {
        self.state.fail_next_begin.store(true, Ordering::SeqCst);
    }

    /// 之后的加锁调用全部失败，模拟连接中断
    pub fn set_fail_locks(&self, fail: bool) {
        self.state.fail_locks.store(fail, Ordering::SeqCst);
    }

    /// 之后的提交全部失败（锁仍会被释放）
    pub fn set_fail_commits(&self, fail: bool) {
        self.state.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// 已开启的会话数
    pub fn sessions_begun(&self) -> usize {
        self.state.begun.load(Ordering::SeqCst)
    }

    /// 成功提交的会话数
    pub fn commits(&self) -> usize {
        self.state.committed.load(Ordering::SeqCst)
    }

    /// 整数键当前是否被某个会话持有
    pub fn is_held(&self, id: LockId) -> bool {
        self.state
            .locks
            .lock()
            .get(&id)
            .is_some_and(|slot| slot.try_lock().is_err())
    }
}

#[async_trait]
impl SessionFactory for MemorySessionFactory {
    async fn begin(&self) -> Result<Box<dyn LockSession>> {
        if self.state.fail_next_begin.swap(false, Ordering::SeqCst) {
            return Err(LockError::Session(connection_error("begin refused")));
        }

        self.state.begun.fetch_add(1, Ordering::SeqCst);
        let txid = self.state.next_txid.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(Box::new(MemoryLockSession {
            state: self.state.clone(),
            txid,
            held: HashMap::new(),
            finished: false,
        }))
    }
}

/// 内存事务会话
///
/// 提交或 drop 时释放全部持有的键
pub struct MemoryLockSession {
    state: Arc<MemoryState>,
    txid: i64,
    held: HashMap<LockId, OwnedMutexGuard<()>>,
    finished: bool,
}

impl MemoryLockSession {
    fn ensure_open(&self) -> std::result::Result<(), sqlx::Error> {
        if self.finished {
            return Err(sqlx::Error::Protocol(
                "transaction already finished".to_string(),
            ));
        }
        Ok(())
    }

    fn release_all(&mut self) {
        let ids: Vec<LockId> = self.held.keys().copied().collect();
        self.held.clear();
        for id in ids {
            self.state.reclaim(id);
        }
    }
}

#[async_trait]
impl LockSession for MemoryLockSession {
    async fn transaction_id(&mut self) -> std::result::Result<i64, sqlx::Error> {
        self.ensure_open()?;
        Ok(self.txid)
    }

    async fn advisory_xact_lock(
        &mut self,
        key1: i32,
        key2: i32,
    ) -> std::result::Result<(), sqlx::Error> {
        self.ensure_open()?;
        if self.state.fail_locks.load(Ordering::SeqCst) {
            return Err(connection_error("connection reset while waiting for lock"));
        }

        let id = (key1, key2);
        if self.held.contains_key(&id) {
            return Ok(());
        }

        let guard = self.state.slot(id).lock_owned().await;
        self.held.insert(id, guard);
        Ok(())
    }

    async fn commit(&mut self) -> std::result::Result<(), sqlx::Error> {
        self.ensure_open()?;
        self.finished = true;
        self.release_all();

        if self.state.fail_commits.load(Ordering::SeqCst) {
            return Err(connection_error("connection lost during commit"));
        }
        self.state.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MemoryLockSession {
    fn drop(&mut self) {
        // 等同于回滚
        self.release_all();
    }
}

fn connection_error(message: &str) -> sqlx::Error {
    sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionAborted, message))
}
