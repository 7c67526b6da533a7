use tracing::Span;
use tracing_subscriber::EnvFilter;
use crate::config::LoggingConfig;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = config.level.clone();

        // tungstenite is noisy at debug
        if !filter.contains("tungstenite") {
            filter.push_str(",tungstenite=warn,tokio_tungstenite=warn");
        }

        EnvFilter::new(filter)
    });

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

    let result = if config.format == "json" {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}

pub fn trace_poll_cycle(cycle: u64) -> Span {
    tracing::info_span!(
        "poll_cycle",
        cycle = cycle,
    )
}

pub fn trace_connection_attempt(attempt: u64, item: &str) -> Span {
    tracing::info_span!(
        "feed_connect",
        attempt = attempt,
        item = %item,
    )
}
