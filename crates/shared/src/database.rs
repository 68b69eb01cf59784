//! PostgreSQL 连接池
//!
//! 每把 advisory lock 在持有期间独占池中的一个连接，
//! `max_connections` 至少要覆盖并发持锁数。

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// 锁注册表与 `lock-probe` 共用的连接池
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 按配置建立连接池，`min_connections` 个连接会立即建立
    #[instrument(skip_all, fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(pool_size = pool.size(), "PostgreSQL pool ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 借出一个连接执行 `SELECT 1`
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// 等待借出的连接归还后关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_database_config;

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_connect_health_check_and_close() {
        let db = Database::connect(&test_database_config()).await.unwrap();
        db.health_check().await.unwrap();

        db.close().await;
        assert!(db.pool().is_closed());
        assert!(db.health_check().await.is_err());
    }
}
