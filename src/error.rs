use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Profile not found: {0}")]
    ConfigNotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Remote path not found: {0}")]
    RemoteNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transfer cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AppError {
    /// Stable machine-readable code, shared with the serialized form
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            AppError::Persistence(_) => "PERSISTENCE_ERROR",
            AppError::NotConnected(_) => "NOT_CONNECTED",
            AppError::Network(_) => "NETWORK_ERROR",
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::SourceNotFound(_) => "SOURCE_NOT_FOUND",
            AppError::RemoteNotFound(_) => "REMOTE_NOT_FOUND",
            AppError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AppError::Cancelled(_) => "CANCELLED",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }
}

/// Serializable error for UI callers
#[derive(Serialize)]
pub struct SerializableError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&AppError> for SerializableError {
    fn from(err: &AppError) -> Self {
        let (message, details) = match err {
            AppError::ConfigNotFound(id) => (format!("Profile {} not found", id), None),
            AppError::NotConnected(id) => (format!("Not connected to {}", id), None),
            AppError::Auth(msg) => ("Authentication failed".to_string(), Some(msg.clone())),
            AppError::Cancelled(id) => (format!("Transfer {} was cancelled", id), None),
            AppError::Io(e) => (e.to_string(), None),
            AppError::Persistence(msg)
            | AppError::Network(msg)
            | AppError::SourceNotFound(msg)
            | AppError::RemoteNotFound(msg)
            | AppError::InvalidArgument(msg)
            | AppError::Serialization(msg)
            | AppError::Unknown(msg) => (msg.clone(), None),
        };

        SerializableError {
            code: err.code().to_string(),
            message,
            details,
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        SerializableError::from(self).serialize(serializer)
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Persistence(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<ssh2::Error> for AppError {
    fn from(err: ssh2::Error) -> Self {
        // LIBSSH2_FX_NO_SUCH_FILE
        if matches!(err.code(), ssh2::ErrorCode::SFTP(2)) {
            AppError::RemoteNotFound(err.message().to_string())
        } else {
            AppError::Network(err.to_string())
        }
    }
}

impl From<ftp::FtpError> for AppError {
    fn from(err: ftp::FtpError) -> Self {
        match err {
            ftp::FtpError::ConnectionError(e) => AppError::Network(e.to_string()),
            ftp::FtpError::InvalidResponse(msg) => {
                let code = crate::transport::ftp::reply_code(&msg);
                match code {
                    Some(530) => AppError::Auth(msg),
                    Some(550) => AppError::RemoteNotFound(msg),
                    _ => AppError::Network(msg),
                }
            }
            other => AppError::Network(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Unknown(format!("Background task failed: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let err = AppError::NotConnected("p1".to_string());
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "NOT_CONNECTED");
        assert_eq!(value["message"], "Not connected to p1");
        assert!(value.get("details").is_none());
    }

    #[test]
    fn test_auth_details_kept_apart() {
        let err = AppError::Auth("530 Login incorrect".to_string());
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["message"], "Authentication failed");
        assert_eq!(value["details"], "530 Login incorrect");
    }

    #[test]
    fn test_ftp_reply_mapping() {
        let err: AppError = ftp::FtpError::InvalidResponse(
            "Expected code [226, 250], got response: 550 No such file".to_string(),
        )
        .into();
        assert!(matches!(err, AppError::RemoteNotFound(_)));

        let err: AppError = ftp::FtpError::InvalidResponse(
            "Expected code [230], got response: 530 Login incorrect.".to_string(),
        )
        .into();
        assert!(matches!(err, AppError::Auth(_)));
    }
}
