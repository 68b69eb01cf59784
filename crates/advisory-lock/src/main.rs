//! 锁探针
//!
//! 获取配置中的 advisory lock，持有指定时长或直到收到退出信号后释放。
//! 用于验证数据库连通性以及观察多实例之间的锁竞争。

use advisory_lock::{LockClass, LockRegistry};
use advisory_lock_shared::{config::AppConfig, database::Database, observability};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load("lock-probe").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 初始化可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(environment = %config.environment, "Configuration loaded");

    let lock_class: LockClass = config
        .probe
        .lock_class
        .parse()
        .context("invalid probe.lock_class")?;

    // 3. 初始化数据库连接
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    info!("Database connection established");

    let registry = Arc::new(LockRegistry::postgres(db.pool().clone()));

    // 4. 获取锁（可能长时间阻塞）
    info!(
        resource_id = %config.probe.resource_id,
        lock_class = %lock_class,
        "Waiting for advisory lock..."
    );
    let owner = tokio::select! {
        owner = registry.acquire(&config.probe.resource_id, lock_class) => owner?,
        _ = shutdown_signal() => {
            info!("Shutdown requested before lock was acquired");
            db.close().await;
            return Ok(());
        }
    };

    // 5. 持有锁
    if config.probe.hold_seconds > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(config.probe.hold_seconds)) => {
                info!(hold_seconds = config.probe.hold_seconds, "Hold time elapsed");
            }
            _ = shutdown_signal() => {}
        }
    } else {
        shutdown_signal().await;
    }

    // 6. 释放锁
    registry.unlock(&owner).await;
    db.close().await;

    info!("Probe shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
