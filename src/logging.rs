//! Logging and tracing configuration
//!
//! Structured JSON logs in production, human-readable output in development.
//! Gateway credentials and correlation secrets never reach the log stream;
//! payloads that may carry them go through [`redact_sensitive_data`] first.

use crate::config::{Environment, LogFormat, LoggingConfig};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

fn default_log_level(environment: Environment) -> Level {
    match environment {
        Environment::Development => Level::DEBUG,
        Environment::Staging | Environment::Production => Level::INFO,
    }
}

/// Initialize the tracing subscriber
///
/// `RUST_LOG` wins over `LOG_LEVEL`. JSON output is used when `LOG_FORMAT=json`
/// or when running in production.
pub fn init_tracing(environment: Environment, config: &LoggingConfig) {
    let use_json = config.format == LogFormat::Json || environment.is_production();

    let level = config
        .level
        .parse::<Level>()
        .unwrap_or_else(|_| default_log_level(environment));

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},tower_http=debug,axum=info,sqlx=warn,hyper=warn,reqwest=warn",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            level
        ))
    });

    // A second init (e.g. from tests) is ignored
    let result = if use_json {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_level(true)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).try_init()
    } else {
        let pretty_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(pretty_layer).try_init()
    };

    if result.is_ok() {
        tracing::info!(
            environment = ?environment,
            format = if use_json { "json" } else { "pretty" },
            "Tracing initialized"
        );
    }
}

/// Redact sensitive fields from JSON-like text
pub fn redact_sensitive_data(text: &str) -> String {
    let sensitive_keys = [
        "Password",
        "password",
        "secret",
        "correlation_secret",
        "token",
        "api_key",
        "authorization",
        "card_number",
        "cardNumber",
        "Pan",
        "cvv",
        "Cvv2",
    ];

    let mut result = text.to_string();
    for key in &sensitive_keys {
        let pattern = format!(r#""{}"\s*:\s*"[^"]*""#, regex::escape(key));
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re
                .replace_all(&result, format!(r#""{}": "[REDACTED]""#, key))
                .to_string();
        }
    }
    result
}

/// Short, non-reversible rendering of a correlation token for log lines
pub fn mask_token(token: &str) -> String {
    if token.len() <= 12 {
        return "****".to_string();
    }
    format!("{}...{}", &token[..8], &token[token.len() - 4..])
}

/// Log a ledger or payment event with a consistent `event_type`
#[macro_export]
macro_rules! log_credit_event {
    ($($key:tt = $value:expr),* $(,)?) => {
        tracing::info!(
            event_type = "credit",
            $($key = tracing::field::display(&$value)),*
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_levels() {
        assert_eq!(default_log_level(Environment::Development), Level::DEBUG);
        assert_eq!(default_log_level(Environment::Production), Level::INFO);
        assert_eq!(default_log_level(Environment::Staging), Level::INFO);
    }

    #[test]
    fn test_redact_sensitive_data() {
        let data = r#"{"ClientID": "c-1", "Password": "hunter2", "Amount": 100}"#;
        let redacted = redact_sensitive_data(data);
        assert!(redacted.contains("[REDACTED]"));
        assert!(!redacted.contains("hunter2"));
        assert!(redacted.contains("c-1"));
        assert!(redacted.contains("100"));
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("42-1700000000000-17-v1abcdef012345"), "42-17000...2345");
        assert_eq!(mask_token("short"), "****");
    }
}
