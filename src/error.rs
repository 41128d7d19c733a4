//! Error types for mail-ingest.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid protocol specified: {0}")]
    UnknownProtocol(String),
}

/// Mailbox connection and protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Command {command} rejected: {response}")]
    Command { command: String, response: String },

    #[error("Unexpected server response: {0}")]
    Protocol(String),

    #[error("Connection closed by server")]
    ConnectionClosed,
}

/// Errors turning a raw blob into normalized messages.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message could not be parsed as MIME")]
    Unparseable,

    #[error("Missing {0} header")]
    MissingHeader(&'static str),

    #[error("Payload is not valid UTF-8: {0}")]
    Payload(String),
}

/// Field shape or length violations after sanitization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid subject: {0}")]
    Subject(String),

    #[error("Invalid sender: {0}")]
    Sender(String),

    #[error("Invalid content: {0}")]
    Body(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Error connecting to the database: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

