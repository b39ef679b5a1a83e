//! Tracing initialisation for the `remedy` binaries.
//!
//! Filter precedence: `REMEDY_LOG`, then `RUST_LOG`, then the `level` passed in.
//! Both formats write to stderr; stdout carries command output only.

use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "REMEDY_LOG";

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

fn subscriber<W>(json: bool, level: Level, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(env_filter(level));
    if json {
        Box::new(registry.with(fmt::layer().with_target(false).json().with_writer(writer)))
    } else {
        Box::new(registry.with(fmt::layer().with_target(false).with_writer(writer)))
    }
}

/// Install the global subscriber. `json` switches to newline-delimited JSON.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    subscriber(json, level, std::io::stderr).try_init().ok();
}
