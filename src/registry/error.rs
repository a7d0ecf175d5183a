use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while talking to a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Registry returned {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("Service index at {url} has no {resource} resource")]
    ServiceIndex { url: String, resource: &'static str },

    #[error("Invalid registry response: {0}")]
    InvalidResponse(String),

    #[error("Package {package_id} {version} not found")]
    NotFound { package_id: String, version: String },

    #[error("API key rejected for {package_id}")]
    Unauthorized { package_id: String },

    #[error("Registry operation cancelled")]
    Cancelled,
}
