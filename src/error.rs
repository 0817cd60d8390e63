use thiserror::Error;

/// Error kinds for the tunnel client.
///
/// `Connect` and `Protocol` are recovered by reconnecting; `Forwarding` is
/// recovered by answering the relay with a synthetic 502 response.
/// `ExhaustedRetries` is fatal.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("forwarding failed: {0}")]
    Forwarding(String),

    #[error("giving up after {0} reconnect attempts")]
    ExhaustedRetries(u32),
}

impl From<reqwest::Error> for TunnelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TunnelError::Forwarding("local service timed out".to_string())
        } else {
            TunnelError::Forwarding(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;
