//! 数据库会话抽象
//!
//! 锁句柄只依赖三个数据库操作：开启事务、在事务内阻塞获取
//! advisory lock、提交事务。通过 trait 抽象，便于替换为内存实现和 mock 测试。

use async_trait::async_trait;
use sqlx::{Connection, PgPool, Postgres, Transaction};

use crate::error::{LockError, Result};

/// 会话工厂
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// 开启一个新的事务会话
    async fn begin(&self) -> Result<Box<dyn LockSession>>;
}

/// 单个事务会话
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LockSession: Send {
    /// 数据库报告的当前事务 ID，仅用于诊断
    async fn transaction_id(&mut self) -> std::result::Result<i64, sqlx::Error>;

    /// 阻塞直到获得 `(key1, key2)` 上的事务级排他 advisory lock
    async fn advisory_xact_lock(
        &mut self,
        key1: i32,
        key2: i32,
    ) -> std::result::Result<(), sqlx::Error>;

    /// 提交事务，事务级 advisory lock 随之释放
    async fn commit(&mut self) -> std::result::Result<(), sqlx::Error>;
}

/// PostgreSQL 会话工厂
#[derive(Clone)]
pub struct PgSessionFactory {
    pool: PgPool,
}

impl PgSessionFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionFactory for PgSessionFactory {
    async fn begin(&self) -> Result<Box<dyn LockSession>> {
        // 事务保证加锁和释放使用同一个连接
        let tx = self.pool.begin().await.map_err(LockError::Session)?;
        Ok(Box::new(PgLockSession { tx: Some(tx) }))
    }
}

/// PostgreSQL 事务会话
///
/// 未提交即被 drop 时，sqlx 在连接下次使用前回滚事务，已持有的锁随之释放。
/// 仍在 `pg_advisory_xact_lock` 上排队的后端会继续等待，直到拿到锁后被回滚，
/// 或连接被关闭。
pub struct PgLockSession {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgLockSession {
    fn tx(&mut self) -> std::result::Result<&mut Transaction<'static, Postgres>, sqlx::Error> {
        self.tx.as_mut().ok_or_else(finished)
    }
}

#[async_trait]
impl LockSession for PgLockSession {
    async fn transaction_id(&mut self) -> std::result::Result<i64, sqlx::Error> {
        // 在保存点内读取：语句失败只回滚到保存点，外层事务仍可加锁
        let tx = self.tx()?;
        let mut savepoint = Connection::begin(&mut **tx).await?;

        // txid 会在 vacuum 后复用，不能作为唯一标识
        match sqlx::query_scalar::<_, i64>("SELECT txid_current()")
            .fetch_one(&mut *savepoint)
            .await
        {
            Ok(id) => {
                savepoint.commit().await?;
                Ok(id)
            }
            Err(e) => {
                let _ = savepoint.rollback().await;
                Err(e)
            }
        }
    }

    async fn advisory_xact_lock(
        &mut self,
        key1: i32,
        key2: i32,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(key1)
            .bind(key2)
            .execute(&mut **self.tx()?)
            .await
            .map(|_| ())
    }

    async fn commit(&mut self) -> std::result::Result<(), sqlx::Error> {
        let tx = self.tx.take().ok_or_else(finished)?;
        tx.commit().await
    }
}

fn finished() -> sqlx::Error {
    sqlx::Error::Protocol("transaction already finished".to_string())
}
