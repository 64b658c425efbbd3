//! Error types for calmerge.

use thiserror::Error;

use crate::provider::Provider;

/// Why an authorization attempt (interactive or silent) did not produce a token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("no credential available")]
    NoCredential,

    #[error("authorization cancelled by the user")]
    Cancelled,

    #[error("could not parse authorization response: {0}")]
    Parsing(String),

    #[error("network error during authorization: {0}")]
    Network(String),

    #[error("authorization timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

/// Errors that can occur in calmerge operations.
#[derive(Error, Debug)]
pub enum CalmergeError {
    #[error("Authorization failed: {0}")]
    Auth(#[from] AuthFailure),

    /// The provider answered 401. Recovered by one refresh and retry.
    #[error("Access token rejected for {0}")]
    TokenExpired(String),

    #[error("Reauthorization required for {provider} account {email}")]
    ReauthorizationRequired { provider: Provider, email: String },

    #[error("Provider rejected request ({status}): {body}")]
    ProviderRejected { status: u16, body: String },

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No {provider} account for {email}")]
    AccountNotFound { provider: Provider, email: String },

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Provider '{0}' is not configured")]
    ProviderNotConfigured(Provider),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CalmergeError {
    /// Classify a non-2xx HTTP answer from a provider API.
    pub fn from_status(status: u16, body: String, email: &str) -> Self {
        if status == 401 {
            CalmergeError::TokenExpired(email.to_string())
        } else {
            CalmergeError::ProviderRejected { status, body }
        }
    }

    /// True when the host must run the interactive login again.
    pub fn needs_reauthorization(&self) -> bool {
        matches!(self, CalmergeError::ReauthorizationRequired { .. })
    }
}

/// Result type alias for calmerge operations.
pub type CalmergeResult<T> = Result<T, CalmergeError>;
