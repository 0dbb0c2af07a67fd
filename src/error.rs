use thiserror::Error;

/// Typed failure surface exposed at the edge of the public API.
///
/// Internal plumbing uses `anyhow::Result` with `.context(..)` the way the
/// rest of this crate does; call sites that cross into public API convert
/// into one of these variants so callers can match on failure class instead
/// of parsing strings.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    #[error("transport connect failed: {source}")]
    TransportConnect {
        #[source]
        source: std::io::Error,
    },

    #[error("transport handshake failed: {reason}")]
    TransportHandshake { reason: String },

    #[error("transport authentication failed ({code}): {message}")]
    TransportAuth { code: String, message: String },

    #[error("transport write failed: {source}")]
    TransportWrite {
        #[source]
        source: std::io::Error,
    },

    #[error("transport read failed: {source}")]
    TransportRead {
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },

    #[error("variable reflection failed: {reason}")]
    ReflectFailure { reason: String },

    #[error("breakpoint capture rate-limited")]
    RateLimited,
}
