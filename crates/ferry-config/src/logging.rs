use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level for all Ferry crates.
    ///
    /// Either a simple level (`info`, `debug`, ...) or a full
    /// `tracing_subscriber::EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    /// Filter directives for the configured level. Blank means `info`;
    /// `warning` is accepted for `warn`.
    pub(crate) fn directives(&self) -> String {
        let level = self.level.trim();
        if level.is_empty() {
            Self::default_level()
        } else if level.eq_ignore_ascii_case("warning") {
            "warn".to_owned()
        } else {
            level.to_owned()
        }
    }

    /// The effective filter: the configured directives followed by `RUST_LOG`,
    /// so environment directives win for the targets they name.
    pub fn env_filter(&self) -> EnvFilter {
        let mut directives = self.directives();
        if let Ok(env) = std::env::var(EnvFilter::DEFAULT_ENV) {
            let env = env.trim();
            if !env.is_empty() {
                directives.push(',');
                directives.push_str(env);
            }
        }

        EnvFilter::try_new(&directives).unwrap_or_else(|err| {
            eprintln!("ferry: invalid log filter {directives:?} ({err}); using `info`");
            EnvFilter::new(Self::default_level())
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber.
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        // `cargo test` output capture only works for the stdlib's `eprint!` family,
        // so debug builds go through `TestWriter`.
        let writer = if cfg!(debug_assertions) {
            BoxMakeWriter::new(tracing_subscriber::fmt::writer::TestWriter::with_stderr)
        } else {
            BoxMakeWriter::new(std::io::stderr)
        };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer);
        let installed = if config.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };

        if let Err(err) = installed {
            // Another subscriber is already installed (e.g. by an embedding host).
            eprintln!("ferry: tracing subscriber not installed: {err}");
        }
    });
}
