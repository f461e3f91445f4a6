use thiserror::Error;

/// Gateway failure taxonomy. Client errors (bad conversation id, touching
/// someone else's message, missing rows) are reported verbatim to the
/// originating connection only. Internal errors are logged server-side and
/// surfaced as a generic message — details never reach the client.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Client(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client(message.into())
    }

    /// The message delivered back over the `error` event.
    pub fn client_message(&self) -> String {
        match self {
            Self::Client(message) => message.clone(),
            Self::Internal(_) => "internal server error".to_string(),
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client(_))
    }
}
