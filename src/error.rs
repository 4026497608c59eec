use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Client '{0}' is not allowed")]
    ClientNotAllowed(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Request timeout for {0}")]
    RequestTimeout(String),

    #[error("{0}")]
    RpcError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Token error: {0}")]
    TokenError(#[from] jsonwebtoken::errors::Error),
}

impl BridgeError {
    /// Stable machine-readable code for the REST error envelope
    pub fn to_error_code(&self) -> &'static str {
        match self {
            BridgeError::ClientNotAllowed(_) => "CLIENT_NOT_ALLOWED",
            BridgeError::AuthFailed(_) => "AUTH_FAILED",
            BridgeError::InvalidInput(_) => "INVALID_INPUT",
            BridgeError::TransportError(_) => "TRANSPORT_ERROR",
            BridgeError::RequestTimeout(_) => "REQUEST_TIMEOUT",
            BridgeError::RpcError(_) => "RPC_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::TransportError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
