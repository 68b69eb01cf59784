//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// advisory lock 计数指标名
pub const ADVISORY_LOCK_COUNT: &str = "advisory_lock_count";
/// advisory lock 持有时长指标名（秒）
pub const ADVISORY_LOCK_DURATION: &str = "advisory_lock_duration";

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_lock_metrics();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 描述锁指标
fn describe_lock_metrics() {
    // 这些描述会出现在 /metrics 端点的 HELP 注释中
    metrics::describe_counter!(
        ADVISORY_LOCK_COUNT,
        "Number of advisory lock operations by lock type and outcome"
    );
    metrics::describe_histogram!(
        ADVISORY_LOCK_DURATION,
        metrics::Unit::Seconds,
        "Time advisory locks were held, by lock type and outcome"
    );
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 advisory lock 操作结果
#[inline]
pub fn record_advisory_lock_count(lock_type: &str, status: &str) {
    metrics::counter!(
        ADVISORY_LOCK_COUNT,
        "type" => lock_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录 advisory lock 持有时长
#[inline]
pub fn record_advisory_lock_duration(lock_type: &str, status: &str, held: Duration) {
    metrics::histogram!(
        ADVISORY_LOCK_DURATION,
        "type" => lock_type.to_string(),
        "status" => status.to_string()
    )
    .record(held.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_advisory_lock_count("migrations", "OK");
        record_advisory_lock_count("dinosaurs", "lock error");
        record_advisory_lock_duration("migrations", "OK", Duration::from_millis(250));
    }
}
