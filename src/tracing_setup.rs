use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialize structured logging from the `logging` configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .wrap_err_with(|| format!("Invalid log level: {}", config.level))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if config.json {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(true).with_span_list(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    }

    tracing::info!(level = %config.level, json = config.json, "doco logging initialized");
    Ok(())
}

/// Span wrapping everything a long-running component does
pub fn component_span(component: &'static str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Span for one request forwarded to the gateway
pub fn upstream_span(method: &str, uri: &str) -> tracing::Span {
    tracing::info_span!(
        "upstream_request",
        http.method = method,
        http.uri = uri,
        http.status_code = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_component_span_fields_reach_json_output() {
        let captured = Captured::default();
        let subscriber = Registry::default().with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_list(true)
                .with_writer(captured.clone()),
        );

        tracing::subscriber::with_default(subscriber, || {
            let _component = component_span("proxy").entered();
            let _upstream = upstream_span("GET", "/api/check").entered();
            tracing::info!("forwarding");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("\"name\":\"proxy\""));
        assert!(output.contains("upstream_request"));
        assert!(output.contains("forwarding"));
    }
}
