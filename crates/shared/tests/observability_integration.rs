//! 可观测性模块集成测试
//!
//! 测试 metrics 记录函数与配置的核心行为。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use advisory_lock_shared::observability::metrics::{
        ADVISORY_LOCK_COUNT, ADVISORY_LOCK_DURATION, record_advisory_lock_count,
        record_advisory_lock_duration,
    };
    use std::time::Duration;

    #[test]
    fn test_record_advisory_lock_count() {
        record_advisory_lock_count("migrations", "OK");
        record_advisory_lock_count("migrations", "lock error");
        record_advisory_lock_count("dinosaurs", "unlock error");
    }

    #[test]
    fn test_record_advisory_lock_duration() {
        record_advisory_lock_duration("migrations", "OK", Duration::ZERO);
        record_advisory_lock_duration("dinosaurs", "unlock error", Duration::from_secs(3600));
    }

    #[test]
    fn test_metric_names() {
        assert_eq!(ADVISORY_LOCK_COUNT, "advisory_lock_count");
        assert_eq!(ADVISORY_LOCK_DURATION, "advisory_lock_duration");
    }
}

// ============================================================================
// 配置测试
// ============================================================================

mod config_tests {
    use advisory_lock_shared::observability::ObservabilityConfig;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "unknown-service");
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn test_with_service_name_keeps_other_fields() {
        let config = ObservabilityConfig {
            json_logs: true,
            ..Default::default()
        }
        .with_service_name("lock-probe");
        assert_eq!(config.service_name, "lock-probe");
        assert!(config.json_logs);
    }

    #[test]
    fn test_custom_config() {
        let config = ObservabilityConfig {
            service_name: "my-service".to_string(),
            otlp_endpoint: Some("http://localhost:4317".to_string()),
            metrics_port: 9091,
            metrics_enabled: false,
            log_level: "debug".to_string(),
            json_logs: true,
        };

        assert_eq!(config.service_name, "my-service");
        assert_eq!(config.otlp_endpoint, Some("http://localhost:4317".to_string()));
        assert_eq!(config.metrics_port, 9091);
        assert!(!config.metrics_enabled);
        assert!(config.json_logs);
    }
}
