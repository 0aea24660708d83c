use thiserror::Error;

/// Errors raised while loading and validating an XML configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// The XML document could not be opened or parsed.
    #[error("failed to parse configuration: {0}")]
    ParseFailure(String),

    /// A required subsection of the schema was missing.
    #[error("required configuration section missing: {0}")]
    SectionMissing(String),

    /// An attribute was present but could not be interpreted.
    #[error("malformed attribute {attribute} on <{element}>: {reason}")]
    MalformedAttribute {
        /// Tag name the attribute was found on.
        element: String,
        /// Attribute name.
        attribute: String,
        /// Human-readable reason the value was rejected.
        reason: String,
    },
}

/// Errors raised by a [`crate::Transport`] implementation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// The transport stack failed to initialize.
    #[error("transport initialization failed: {0}")]
    InitFailure(String),

    /// Opening a session on an interface failed.
    #[error("failed to open session on {host_ip}: {reason}")]
    SessionOpenFailure {
        /// Host IP the session was opened against.
        host_ip: String,
        /// Underlying failure reason.
        reason: String,
    },

    /// Subscribing to a `com_id` on an open session failed.
    #[error("failed to subscribe to com_id {com_id} on interface {interface}: {reason}")]
    SubscribeFailure {
        /// The telegram identifier that could not be subscribed.
        com_id: u32,
        /// The interface the subscription was attempted on.
        interface: String,
        /// Underlying failure reason.
        reason: String,
    },
}

/// Top-level error type for the PD engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PdError {
    /// Configuration loading or validation failed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The transport layer failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An internal invariant was violated; indicates a logic bug.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Convenience alias for engine operations.
pub type PdResult<T> = Result<T, PdError>;
