//! Re-emitting events a worker forwarded to us.

use common::remote_tracing::TracingMessage;

fn level(message: &TracingMessage) -> tracing::Level {
    message
        .level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO)
}

fn timestamp(message: &TracingMessage) -> String {
    let datetime: chrono::DateTime<chrono::Utc> = message.timestamp.into();
    datetime.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string()
}

/// Log a forwarded event under target `remote`, tagged with the host it came from.
pub fn emit(host: &str, message: &TracingMessage) {
    let origin = format!("{}::{}", host, message.target);
    let stamp = timestamp(message);
    let text = &message.message;
    match level(message) {
        tracing::Level::ERROR => {
            tracing::error!(target: "remote", "[{}] {}: {}", stamp, origin, text)
        }
        tracing::Level::WARN => {
            tracing::warn!(target: "remote", "[{}] {}: {}", stamp, origin, text)
        }
        tracing::Level::INFO => {
            tracing::info!(target: "remote", "[{}] {}: {}", stamp, origin, text)
        }
        tracing::Level::DEBUG => {
            tracing::debug!(target: "remote", "[{}] {}: {}", stamp, origin, text)
        }
        tracing::Level::TRACE => {
            tracing::trace!(target: "remote", "[{}] {}: {}", stamp, origin, text)
        }
    }
}
