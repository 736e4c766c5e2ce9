//! 可观测性模块集成测试
//!
//! 覆盖通知链路指标、配置默认值与 Guard 生命周期。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use placement_shared::observability::metrics::{
        record_announcement_batch, record_announcement_run, record_channel_dispatch,
        record_email_worker_message, record_notify, record_push_tokens, record_queue_transition,
    };

    #[test]
    fn test_record_notify() {
        record_notify("APPLICATION_STATUS_CHANGED", "dispatched");
        record_notify("INTERVIEW_SCHEDULED", "noop");
        record_notify("NEW_JOB_POSTED", "resolution_failed");
    }

    #[test]
    fn test_record_channel_dispatch() {
        record_channel_dispatch("IN_APP", "SUCCESS", 3, 0, 0.004);
        record_channel_dispatch("EMAIL", "PARTIAL", 2, 1, 0.02);
        record_channel_dispatch("PUSH", "FAILED", 0, 4, 1.5);
        record_channel_dispatch("PUSH", "SKIPPED", 0, 0, 0.0);
    }

    #[test]
    fn test_record_queue_transitions() {
        for state in ["CONNECTING", "READY", "DEGRADED", "CLOSED"] {
            record_queue_transition(state);
        }
    }

    #[test]
    fn test_metrics_with_edge_cases() {
        // 零值与空标签
        record_push_tokens(0, 0);
        record_announcement_batch(0);
        record_announcement_run("");
        record_email_worker_message("");

        // 超大计数
        record_push_tokens(u64::MAX / 2, 1);
        record_announcement_batch(1_000_000);
    }
}

// ============================================================================
// 配置测试
// ============================================================================

mod config_tests {
    use placement_shared::config::{AppConfig, MailConfig};
    use placement_shared::observability::ObservabilityConfig;

    #[test]
    fn test_default_observability_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "unknown-service");
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(config.metrics_enabled);
        assert!(!config.json_logs);
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn test_default_app_config_degrades_optional_backends() {
        let config = AppConfig::default();
        assert!(!config.queue.is_configured());
        assert!(!config.push.is_configured());

        let mail = MailConfig::default();
        assert!(mail.endpoint.is_none());
        assert!(mail.api_key.is_none());
    }

    #[test]
    fn test_custom_observability_config() {
        let config = ObservabilityConfig {
            service_name: "email-worker".to_string(),
            otlp_endpoint: Some("http://localhost:4317".to_string()),
            metrics_enabled: false,
            metrics_port: 9091,
            log_level: "debug".to_string(),
            json_logs: true,
        };

        assert_eq!(config.service_name, "email-worker");
        assert_eq!(config.otlp_endpoint, Some("http://localhost:4317".to_string()));
        assert!(!config.metrics_enabled);
        assert_eq!(config.metrics_port, 9091);
        assert!(config.json_logs);
    }
}

// ============================================================================
// Guard 测试
// ============================================================================

mod guard_tests {
    use placement_shared::observability::ObservabilityGuard;

    #[test]
    fn test_empty_guard() {
        let guard = ObservabilityGuard::empty();
        drop(guard);
    }

    #[test]
    fn test_guard_drop() {
        for _ in 0..10 {
            let guard = ObservabilityGuard::empty();
            drop(guard);
        }
    }
}
