//! 锁注册表
//!
//! 记录当前进程持有的全部 advisory lock，并用 owner token 约束释放权。
//!
//! 一次业务操作往往会层层调用多个服务函数，每一层都可能对同一资源调用
//! `acquire`/`unlock`。只有最外层拿到的 token 能匹配注册表中的记录，
//! 内层调用方传入的 token 在 `unlock` 中被识别为非持有者并静默忽略。

use parking_lot::Mutex;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::handle::LockHandle;
use super::key::{LockClass, LockKey};
use super::metrics::{LockOutcome, record_lock_failure, record_release};
use super::session::{PgSessionFactory, SessionFactory};
use crate::error::Result;

/// 已持有锁的诊断快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeldLock {
    pub resource_id: String,
    pub lock_class: LockClass,
    pub owner_token: String,
    pub transaction_id: i64,
    pub acquired_at: chrono::DateTime<chrono::Utc>,
}

/// 锁注册表
///
/// 进程启动时创建一次，通过 `Arc` 在调用方之间共享。
pub struct LockRegistry {
    factory: Arc<dyn SessionFactory>,
    /// `"{resource_id}-{lock_class}"` -> 句柄
    locks: Mutex<HashMap<String, LockHandle>>,
}

impl LockRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 基于 PostgreSQL 连接池创建注册表
    pub fn postgres(pool: PgPool) -> Self {
        Self::new(Arc::new(PgSessionFactory::new(pool)))
    }

    /// 获取 `(resource_id, lock_class)` 上的阻塞锁，返回 owner token
    ///
    /// 其他持有者（包括其他进程）释放前会一直等待，没有超时。
    /// 丢弃返回的 future 只会放弃本地等待：PostgreSQL 后端仍在锁队列中，
    /// 直到拿到锁后随事务回滚释放，或连接被关闭。
    ///
    /// 对同一把锁的重复获取不会被短路：每次调用都开启新的事务，
    /// 若同一调用链的外层已经持有该锁，内层调用会一直阻塞到外层释放。
    /// 同一调用链中应只由最外层获取锁。
    #[instrument(skip(self))]
    pub async fn acquire(&self, resource_id: &str, lock_class: LockClass) -> Result<String> {
        // 每个调用方拿到的 token 都不同，只有最外层的 token 能释放锁
        let owner = Uuid::new_v4().to_string();
        let key = LockKey::new(resource_id, lock_class);

        let mut handle = match LockHandle::create(self.factory.as_ref(), key.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                record_lock_failure(lock_class);
                error!(key = %key, error = %e, "Error opening advisory lock session");
                return Err(e);
            }
        };

        if let Err(e) = handle.acquire().await {
            record_lock_failure(lock_class);
            error!(key = %key, error = %e, "Error obtaining the advisory lock");
            return Err(e);
        }

        handle.set_owner_token(owner.clone());
        let txid = handle.transaction_id();

        let stale = self.locks.lock().insert(key.encoded(), handle);
        if let Some(stale) = stale {
            error!(
                key = %key,
                stale_owner = ?stale.owner_token(),
                "Advisory lock granted while another handle was registered for the same key"
            );
        }

        info!(key = %key, owner = %owner, txid, "Advisory lock acquired");
        Ok(owner)
    }

    /// 按 owner token 释放锁
    ///
    /// token 不属于任何已持有的锁时什么也不做：它来自没有发起加锁的内层调用方。
    /// 释放失败只记录日志和指标，不返回给调用方。
    #[instrument(skip(self))]
    pub async fn unlock(&self, owner_token: &str) {
        let Some((lock_id, mut handle)) = self.take_owned(owner_token) else {
            // 调用栈最外层的函数会带着正确的 token 来释放
            info!(owner = %owner_token, "Caller not lock owner");
            return;
        };

        let Some(lock_class) = handle.key().map(|key| key.lock_class) else {
            error!(lock_id = %lock_id, owner = %owner_token, "Advisory lock has no key");
            return;
        };
        let acquired_at = handle.acquired_at();

        match handle.release().await {
            Ok(()) => {
                record_release(lock_class, LockOutcome::Ok, acquired_at);
                info!(lock_id = %lock_id, owner = %owner_token, "Unlocked lock");
            }
            Err(e) => {
                record_release(lock_class, LockOutcome::UnlockError, acquired_at);
                error!(
                    lock_id = %lock_id,
                    owner = %owner_token,
                    error = %e,
                    "Could not unlock"
                );
            }
        }
    }

    /// 从表中取出 token 匹配的句柄
    ///
    /// 先移出表再提交事务：提交后立刻拿到锁的等待者写入的新记录不会被误删。
    fn take_owned(&self, owner_token: &str) -> Option<(String, LockHandle)> {
        let mut locks = self.locks.lock();

        let mut matched = None;
        for (lock_id, handle) in locks.iter() {
            match handle.owner_token() {
                None => {
                    error!(lock_id = %lock_id, "Owner token could not be found in advisory lock");
                }
                Some(token) if token == owner_token => {
                    matched = Some(lock_id.clone());
                    break;
                }
                Some(_) => {}
            }
        }

        let lock_id = matched?;
        locks.remove(&lock_id).map(|handle| (lock_id, handle))
    }

    /// 当前持有的锁数量
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    /// 本进程是否持有该锁
    pub fn is_locked(&self, resource_id: &str, lock_class: LockClass) -> bool {
        let encoded = LockKey::new(resource_id, lock_class).encoded();
        self.locks.lock().contains_key(&encoded)
    }

    /// 当前持有锁的快照
    pub fn held_locks(&self) -> Vec<HeldLock> {
        self.locks
            .lock()
            .values()
            .filter_map(|handle| {
                let key = handle.key()?;
                Some(HeldLock {
                    resource_id: key.resource_id.clone(),
                    lock_class: key.lock_class,
                    owner_token: handle.owner_token()?.to_string(),
                    transaction_id: handle.transaction_id(),
                    acquired_at: handle.acquired_at_utc(),
                })
            })
            .collect()
    }
}
