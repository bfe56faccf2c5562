//! Mailbox error types.

use thiserror::Error;

/// Errors raised by the mailbox collaborators.
#[derive(Error, Debug)]
pub enum EmailError {
    /// Failed to connect to the IMAP server.
    #[error("IMAP connection failed: {0}")]
    ConnectionFailed(String),

    /// TLS/SSL error during connection.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// No usable credential source was configured.
    #[error("Credentials not found: {0}")]
    CredentialsNotFound(String),

    /// IMAP protocol error.
    #[error("IMAP protocol error: {0}")]
    ProtocolError(String),

    /// Raw message bytes could not be parsed as MIME.
    #[error("Failed to parse email: {0}")]
    ParseError(String),

    /// OAuth2 token refresh failed.
    #[error("OAuth2 token refresh failed: {0}")]
    OAuth2Error(String),

    #[error("IMAP folder '{0}' not found")]
    FolderNotFound(String),

    #[error("Message with UID {0} not found")]
    MessageNotFound(u32),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl EmailError {
    /// Errors after which the IMAP session has to be re-established.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            EmailError::ConnectionFailed(_)
                | EmailError::TlsError(_)
                | EmailError::ProtocolError(_)
                | EmailError::Timeout(_)
        )
    }
}

impl From<async_native_tls::Error> for EmailError {
    fn from(err: async_native_tls::Error) -> Self {
        EmailError::TlsError(err.to_string())
    }
}

impl From<async_imap::error::Error> for EmailError {
    fn from(err: async_imap::error::Error) -> Self {
        EmailError::ProtocolError(err.to_string())
    }
}

/// Result type for mailbox operations.
pub type Result<T> = std::result::Result<T, EmailError>;
