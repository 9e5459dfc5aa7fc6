use thiserror::Error;

#[derive(Error, Debug)]
pub enum RolodexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("No data directory configured")]
    NotConfigured,

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Invalid customer id: {0}")]
    InvalidCustomerId(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not authorized with Google Drive")]
    NotAuthorized,

    #[error("Drive API error: {0}")]
    Drive(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for RolodexError {
    fn from(err: anyhow::Error) -> Self {
        RolodexError::Unknown(err.to_string())
    }
}
