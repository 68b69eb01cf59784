//! 锁句柄
//!
//! 一个句柄对应一次加锁，独占一个数据库事务直到释放：
//!
//! ```text
//! begin                                   -- create()
//! select pg_advisory_xact_lock(h1, h2)    -- acquire()，阻塞
//! commit                                  -- release()，锁随事务结束而释放
//! ```

use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{debug, warn};

use super::key::LockKey;
use super::session::{LockSession, SessionFactory};
use crate::error::{LockError, Result};

/// 锁句柄
pub struct LockHandle {
    session: Option<Box<dyn LockSession>>,
    transaction_id: i64,
    owner_token: Option<String>,
    key: Option<LockKey>,
    acquired_at: Instant,
    acquired_at_utc: DateTime<Utc>,
}

impl LockHandle {
    /// 开启新事务并创建句柄
    ///
    /// 事务 ID 只用于诊断，读取失败时记为 0。PostgreSQL 会话在保存点内读取，
    /// 失败不会让事务进入 aborted 状态，后续加锁照常进行。
    pub async fn create(factory: &dyn SessionFactory, key: LockKey) -> Result<Self> {
        let mut session = factory.begin().await?;

        let transaction_id = match session.transaction_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read transaction id");
                0
            }
        };

        Ok(Self {
            session: Some(session),
            transaction_id,
            owner_token: None,
            key: Some(key),
            acquired_at: Instant::now(),
            acquired_at_utc: Utc::now(),
        })
    }

    /// 阻塞获取 advisory lock
    ///
    /// 其他持有者（任意进程）释放前不会返回；会话被终止时返回 `Acquire` 错误。
    pub async fn acquire(&mut self) -> Result<()> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| LockError::invalid_state("lock key is missing"))?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| LockError::invalid_state("transaction is missing"))?;

        let (id_hash, class_hash) = key.hashes();
        debug!(
            key = %key,
            id_hash,
            class_hash,
            txid = self.transaction_id,
            "Waiting for advisory lock"
        );

        session
            .advisory_xact_lock(id_hash, class_hash)
            .await
            .map_err(|source| LockError::Acquire {
                key: key.encoded(),
                source,
            })?;

        self.acquired_at = Instant::now();
        self.acquired_at_utc = Utc::now();
        Ok(())
    }

    /// 提交事务释放锁
    ///
    /// 无论提交是否成功，会话、owner 和键都会被清空；提交错误仍返回给调用方用于上报。
    pub async fn release(&mut self) -> Result<()> {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| LockError::invalid_state("transaction is missing"))?;

        let result = session.commit().await;

        self.owner_token = None;
        self.key = None;

        result.map_err(LockError::Release)
    }

    pub(crate) fn set_owner_token(&mut self, token: String) {
        self.owner_token = Some(token);
    }

    pub fn owner_token(&self) -> Option<&str> {
        self.owner_token.as_deref()
    }

    pub fn key(&self) -> Option<&LockKey> {
        self.key.as_ref()
    }

    pub fn transaction_id(&self) -> i64 {
        self.transaction_id
    }

    /// 是否仍持有事务
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    pub fn acquired_at_utc(&self) -> DateTime<Utc> {
        self.acquired_at_utc
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("owner_token", &self.owner_token)
            .field("transaction_id", &self.transaction_id)
            .field("active", &self.session.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::key::{LockClass, LockKey, hash};
    use crate::lock::session::{MockLockSession, MockSessionFactory};

    fn factory_with(session: MockLockSession) -> MockSessionFactory {
        let mut factory = MockSessionFactory::new();
        let mut slot = Some(session);
        factory.expect_begin().times(1).returning(move || {
            let session = slot.take().expect("begin called twice");
            Ok(Box::new(session) as Box<dyn LockSession>)
        });
        factory
    }

    #[tokio::test]
    async fn test_create_fails_when_session_cannot_open() {
        let mut factory = MockSessionFactory::new();
        factory
            .expect_begin()
            .returning(|| Err(LockError::Session(sqlx::Error::PoolTimedOut)));

        let key = LockKey::new("migrations-1", LockClass::Migrations);
        let err = LockHandle::create(&factory, key).await.unwrap_err();
        assert!(matches!(err, LockError::Session(_)));
    }

    #[tokio::test]
    async fn test_create_tolerates_missing_transaction_id() {
        let mut session = MockLockSession::new();
        session
            .expect_transaction_id()
            .returning(|| Err(sqlx::Error::PoolClosed));
        let factory = factory_with(session);

        let key = LockKey::new("migrations-1", LockClass::Migrations);
        let handle = LockHandle::create(&factory, key).await.unwrap();
        assert_eq!(handle.transaction_id(), 0);
        assert!(handle.is_active());
    }

    #[tokio::test]
    async fn test_acquire_passes_hashes_to_session() {
        let key = LockKey::new("dino-42", LockClass::Dinosaurs);
        let (expected_id, expected_class) = key.hashes();

        let mut session = MockLockSession::new();
        session.expect_transaction_id().returning(|| Ok(771));
        session
            .expect_advisory_xact_lock()
            .withf(move |a, b| *a == expected_id && *b == expected_class)
            .times(1)
            .returning(|_, _| Ok(()));
        let factory = factory_with(session);

        let mut handle = LockHandle::create(&factory, key).await.unwrap();
        handle.acquire().await.unwrap();
        assert_eq!(handle.transaction_id(), 771);
    }

    #[tokio::test]
    async fn test_acquire_accepts_empty_resource_id() {
        // 空字符串也是合法的资源 ID，按 hash("") 加锁
        let expected_id = hash("");
        let expected_class = hash("migrations");

        let mut session = MockLockSession::new();
        session.expect_transaction_id().returning(|| Ok(1));
        session
            .expect_advisory_xact_lock()
            .withf(move |a, b| *a == expected_id && *b == expected_class)
            .times(1)
            .returning(|_, _| Ok(()));
        let factory = factory_with(session);

        let mut handle = LockHandle::create(&factory, LockKey::new("", LockClass::Migrations))
            .await
            .unwrap();
        handle.acquire().await.unwrap();
        assert_eq!(handle.key().unwrap().encoded(), "-migrations");
    }

    #[tokio::test]
    async fn test_acquire_after_failed_transaction_id_still_locks() {
        let mut session = MockLockSession::new();
        session
            .expect_transaction_id()
            .returning(|| Err(sqlx::Error::PoolClosed));
        session
            .expect_advisory_xact_lock()
            .times(1)
            .returning(|_, _| Ok(()));
        let factory = factory_with(session);

        let mut handle =
            LockHandle::create(&factory, LockKey::new("dino-42", LockClass::Dinosaurs))
                .await
                .unwrap();
        handle.acquire().await.unwrap();
        assert_eq!(handle.transaction_id(), 0);
    }

    #[tokio::test]
    async fn test_acquire_maps_database_error() {
        let mut session = MockLockSession::new();
        session.expect_transaction_id().returning(|| Ok(1));
        session
            .expect_advisory_xact_lock()
            .returning(|_, _| Err(sqlx::Error::PoolClosed));
        let factory = factory_with(session);

        let mut handle =
            LockHandle::create(&factory, LockKey::new("dino-42", LockClass::Dinosaurs))
                .await
                .unwrap();
        match handle.acquire().await.unwrap_err() {
            LockError::Acquire { key, .. } => assert_eq!(key, "dino-42-dinosaurs"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_release_clears_state_even_when_commit_fails() {
        let mut session = MockLockSession::new();
        session.expect_transaction_id().returning(|| Ok(1));
        session
            .expect_commit()
            .times(1)
            .returning(|| Err(sqlx::Error::PoolClosed));
        let factory = factory_with(session);

        let mut handle =
            LockHandle::create(&factory, LockKey::new("dino-42", LockClass::Dinosaurs))
                .await
                .unwrap();
        handle.set_owner_token("owner-1".to_string());

        let err = handle.release().await.unwrap_err();
        assert!(matches!(err, LockError::Release(_)));
        assert!(!handle.is_active());
        assert!(handle.owner_token().is_none());
        assert!(handle.key().is_none());
    }

    #[tokio::test]
    async fn test_double_release_is_invalid_state() {
        let mut session = MockLockSession::new();
        session.expect_transaction_id().returning(|| Ok(1));
        session.expect_commit().times(1).returning(|| Ok(()));
        let factory = factory_with(session);

        let mut handle =
            LockHandle::create(&factory, LockKey::new("migrations-1", LockClass::Migrations))
                .await
                .unwrap();
        handle.release().await.unwrap();

        let err = handle.release().await.unwrap_err();
        assert!(matches!(err, LockError::InvalidState(_)));

        // 释放后键已清空，再加锁同样是状态错误
        match handle.acquire().await.unwrap_err() {
            LockError::InvalidState(msg) => assert_eq!(msg, "lock key is missing"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
