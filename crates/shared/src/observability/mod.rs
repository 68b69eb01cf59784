//! 日志、追踪与指标的初始化
//!
//! `lock-probe` 启动时调用一次 [`init`]，返回的守卫需要持有到进程退出。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

/// `[observability]` 配置段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 日志、span 与 OTLP resource 中的服务名
    pub service_name: String,
    /// 未设置时不导出 span
    pub otlp_endpoint: Option<String>,
    pub metrics_port: u16,
    pub metrics_enabled: bool,
    /// `RUST_LOG` 未设置时使用的过滤规则
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            otlp_endpoint: None,
            metrics_port: 9090,
            metrics_enabled: true,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// 使用应用级服务名覆盖本段的服务名
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}

/// 可观测性守卫
///
/// 字段按声明顺序析构：先停止指标服务，再关闭 tracer provider 刷新剩余 span。
pub struct ObservabilityGuard {
    _metrics: Option<metrics::MetricsHandle>,
    _tracing: tracing::TracingGuard,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 安装 tracing subscriber，并按配置启动 Prometheus 导出
///
/// ```ignore
/// let config = AppConfig::load("lock-probe")?;
/// let obs = config.observability.clone().with_service_name(&config.service_name);
/// let _guard = advisory_lock_shared::observability::init(&obs).await?;
/// ```
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let tracing_guard = tracing::init(config)?;

    let metrics_handle = if config.metrics_enabled {
        Some(metrics::init(config).await?)
    } else {
        None
    };

    info!(
        service = %config.service_name,
        metrics_port = ?config.metrics_enabled.then_some(config.metrics_port),
        otlp_endpoint = ?config.otlp_endpoint,
        "Observability initialized"
    );

    Ok(ObservabilityGuard {
        _metrics: metrics_handle,
        _tracing: tracing_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(config.metrics_enabled);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_with_service_name() {
        let config = ObservabilityConfig::default().with_service_name("lock-probe");
        assert_eq!(config.service_name, "lock-probe");
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: ObservabilityConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "json_logs = true\nmetrics_port = 9464",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(config.json_logs);
        assert_eq!(config.metrics_port, 9464);
        assert_eq!(config.log_level, "info");
        assert!(config.otlp_endpoint.is_none());
    }
}
