use omnia_domain::config::{Config, ConfigSeverity};

#[test]
fn defaults_match_documented_values() {
    let config = Config::default();
    assert_eq!(config.worker.namespace, "default");
    assert_eq!(config.sampling.default_rate, 100);
    assert_eq!(config.sampling.llm_judge_rate, 10);
    assert_eq!(config.rate_limit.max_evals_per_second, 50);
    assert_eq!(config.rate_limit.max_concurrent_judge_calls, 5);
    assert_eq!(config.session_completion.inactivity_timeout_secs, 300);
    assert_eq!(config.session_service.timeout_ms, 10_000);
    assert_eq!(config.broker.streams, vec!["omnia:session-events".to_string()]);
}

#[test]
fn sweep_interval_is_tenth_of_timeout() {
    let config = Config::default();
    assert_eq!(
        config.session_completion.sweep_interval(),
        std::time::Duration::from_secs(30)
    );
}

#[test]
fn partial_toml_fills_defaults() {
    let config: Config = toml::from_str(
        r#"
[worker]
namespace = "prod"

[sampling]
llm_judge_rate = 25
"#,
    )
    .unwrap();
    assert_eq!(config.worker.namespace, "prod");
    assert_eq!(config.sampling.llm_judge_rate, 25);
    assert_eq!(config.sampling.default_rate, 100);
    assert_eq!(config.rate_limit.max_evals_per_second, 50);
}

#[test]
fn default_config_validates_clean() {
    assert!(Config::default().validate().is_empty());
}

#[test]
fn empty_namespace_is_an_error() {
    let mut config = Config::default();
    config.worker.namespace.clear();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error && i.field == "worker.namespace"));
}

#[test]
fn oversized_sampling_rate_warns() {
    let mut config = Config::default();
    config.sampling.default_rate = 150;
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Warning && i.field == "sampling.default_rate"));
}

#[test]
fn webhook_config_parses_with_headers() {
    let config: Config = toml::from_str(
        r#"
[[webhooks]]
url = "https://alerts.example.com/hook"
threshold = 0.9
window_size = 10
consecutive_fails = 3

[webhooks.headers]
"X-Token" = "abc"
"#,
    )
    .unwrap();
    assert_eq!(config.webhooks.len(), 1);
    assert_eq!(config.webhooks[0].threshold, 0.9);
    assert_eq!(config.webhooks[0].headers.get("X-Token").unwrap(), "abc");
    assert!(config.validate().is_empty());
}

#[test]
fn bad_webhook_url_is_an_error() {
    let mut config = Config::default();
    config.webhooks.push(omnia_domain::config::WebhookConfig {
        url: "ftp://nope".into(),
        threshold: 0.8,
        window_size: 5,
        consecutive_fails: 0,
        headers: Default::default(),
    });
    let issues = config.validate();
    assert!(issues.iter().any(|i| i.field == "webhooks[0].url"));
}
