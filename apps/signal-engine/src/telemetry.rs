//! Tracing initialization.

/// Initialize the tracing subscriber with environment filter.
///
/// Uses static directive strings that are compile-time constants guaranteed
/// to parse.
#[allow(clippy::expect_used)]
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "signal_engine=info"
                    .parse()
                    .expect("static directive 'signal_engine=info' is valid"),
            ),
        )
        .init();
}
