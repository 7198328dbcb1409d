//! Process-wide logging setup.
//!
//! Library code logs through `log` (data access) and `tracing` (pipeline
//! spans). [`init_logging`] installs one `tracing` subscriber for both: the
//! `log` records are forwarded by the `tracing-log` bridge.

use once_cell::sync::OnceCell;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

static INITIALIZED: OnceCell<LogFormat> = OnceCell::new();

/// Log output format types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text with timestamp, level and target
    Text,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Parses a `LOG_FORMAT` value. Unknown values fall back to text.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }

    pub fn from_env_or_default() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }
}

/// Installs the global subscriber, honouring `RUST_LOG` (default `info`) and
/// `LOG_FORMAT`.
///
/// Safe to call more than once; only the first call has an effect and every
/// call returns the format that is actually in use. If another subscriber was
/// installed elsewhere it is left in place.
pub fn init_logging() -> LogFormat {
    *INITIALIZED.get_or_init(|| {
        let format = LogFormat::from_env_or_default();
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with((format == LogFormat::Json).then(|| fmt::layer().json().with_target(true)))
            .with((format == LogFormat::Text).then(|| fmt::layer().with_target(true)));

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Tracing subscriber already initialized: {}", e);
        }
        if let Err(e) = LogTracer::init() {
            eprintln!("log bridge already initialized: {}", e);
        }
        format
    })
}
