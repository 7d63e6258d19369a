//! Error types for the Gen Alpha bot.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Slack Web API and Socket Mode errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("HTTP error calling {method}: {reason}")]
    Http { method: String, reason: String },

    #[error("Slack {method} failed: {error}")]
    Api { method: String, error: String },

    #[error("Failed to decode {method} response: {reason}")]
    Decode { method: String, reason: String },

    #[error("Socket Mode connection failed: {reason}")]
    SocketFailed { reason: String },

    #[error("Socket Mode reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Transformation provider errors. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Request to transformation provider failed: {0}")]
    Request(String),

    #[error("Transformation provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode transformation response: {0}")]
    Decode(String),

    #[error("Transformation provider returned no choices")]
    EmptyResponse,
}

/// Per-message pipeline failures. Contained to the message that caused them.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Author lookup failed: {0}")]
    AuthorLookup(#[source] ChannelError),

    #[error("Transformation failed: {0}")]
    Transform(#[from] TransformError),

    #[error("Publish failed: {0}")]
    Publish(#[source] ChannelError),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
