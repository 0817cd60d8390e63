//! Relay connection lifecycle.
//!
//! [`TunnelClient`] owns the session state and drives the connection state
//! machine: connect, register, dispatch inbound messages, and reconnect with
//! exponential backoff until the retry budget is spent. Forwarded requests are
//! served strictly in receipt order; the response for one request is sent back
//! before the next inbound message is read.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Result, TunnelError};
use crate::protocol::{ClientMessage, ServerMessage};

use super::forwarder;

/// Reconnect budget; spending it is fatal.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// In-memory record of one client run.
#[derive(Debug)]
struct Session {
    local_port: u16,
    subdomain: Option<String>,
    relay_url: String,
    public_url: String,
    reconnect_attempts: u32,
}

impl Session {
    fn new(local_port: u16, subdomain: Option<String>, relay_url: String) -> Self {
        Self {
            local_port,
            subdomain,
            relay_url,
            public_url: String::new(),
            reconnect_attempts: 0,
        }
    }

    /// Delay before the next reconnect attempt: 1s doubling per failure,
    /// capped at 30s.
    fn backoff_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.reconnect_attempts);
        std::cmp::min(BACKOFF_BASE * factor, BACKOFF_CAP)
    }

    fn record_success(&mut self) {
        self.reconnect_attempts = 0;
    }

    /// Count one failed attempt. Returns `false` once the budget is spent.
    fn record_failure(&mut self) -> bool {
        self.reconnect_attempts += 1;
        self.reconnect_attempts <= MAX_RECONNECT_ATTEMPTS
    }
}

pub struct TunnelClient {
    session: Session,
}

impl TunnelClient {
    pub fn new(local_port: u16, subdomain: Option<String>, relay_url: String) -> Self {
        Self {
            session: Session::new(local_port, subdomain, relay_url),
        }
    }

    /// Drive the connection state machine until `shutdown` is cancelled or
    /// the reconnect budget is spent.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        loop {
            info!("Connecting to tunnel relay at {}...", self.session.relay_url);

            match self.connect_and_run(&shutdown).await {
                Ok(()) => {
                    info!("Shutting down");
                    return Ok(());
                }
                Err(e) => {
                    error!("Connection failed: {}", e);
                    if !self.session.record_failure() {
                        return Err(TunnelError::ExhaustedRetries(MAX_RECONNECT_ATTEMPTS));
                    }

                    let delay = self.session.backoff_delay();
                    info!(
                        "Attempting to reconnect in {:?} ({}/{})",
                        delay, self.session.reconnect_attempts, MAX_RECONNECT_ATTEMPTS
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.cancelled() => return Ok(()),
                    }
                }
            }
        }
    }

    /// One connected episode: open the channel, register, then dispatch
    /// inbound messages until the channel fails or shutdown is requested.
    async fn connect_and_run(&mut self, shutdown: &CancellationToken) -> Result<()> {
        let (ws_stream, _) = tokio::select! {
            result = connect_async(self.session.relay_url.as_str()) => result?,
            _ = shutdown.cancelled() => return Ok(()),
        };

        self.session.record_success();
        info!("Connected to tunnel relay");

        let (mut write, mut read) = ws_stream.split();

        let register =
            ClientMessage::register(self.session.local_port, self.session.subdomain.as_deref());
        write.send(Message::Text(register.to_json()?)).await?;
        debug!("Sent registration for port {}", self.session.local_port);

        loop {
            let inbound = tokio::select! {
                inbound = read.next() => inbound,
                _ = shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            };

            match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = self.handle_message(&text).await? {
                        write.send(Message::Text(reply.to_json()?)).await?;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    debug!("Received ping, sending pong");
                    write.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(
                        "Relay closed connection: {:?}",
                        frame.map(|f| f.reason.to_string())
                    );
                    return Err(tungstenite::Error::ConnectionClosed.into());
                }
                Some(Ok(other)) => {
                    debug!("Ignoring non-text message: {:?}", other);
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(tungstenite::Error::ConnectionClosed.into()),
            }
        }
    }

    /// Decode one inbound message and produce the reply to send, if any.
    async fn handle_message(&mut self, text: &str) -> Result<Option<ClientMessage>> {
        match ServerMessage::from_json(text)? {
            ServerMessage::Registered { url } => {
                // A later registered message simply replaces the URL.
                self.session.public_url = url;
                info!("Tunnel established at: {}", self.session.public_url);
                Ok(None)
            }
            ServerMessage::Tunnel { data } => {
                debug!(
                    "{} {} -> localhost:{}",
                    data.method, data.path, self.session.local_port
                );
                let response = forwarder::forward(data, self.session.local_port).await;
                Ok(Some(ClientMessage::tunnel_response(response)))
            }
            ServerMessage::Error { message } => {
                error!("Relay error: {}", message);
                Ok(None)
            }
        }
    }

    /// Public URL assigned by the relay, empty until registration completes.
    #[allow(dead_code)]
    pub fn public_url(&self) -> &str {
        &self.session.public_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn backoff_doubles_then_caps() {
        let mut session = Session::new(3000, None, "wss://griq.site/".to_string());
        let expected = [2, 4, 8, 16, 30];
        for secs in expected {
            assert!(session.record_failure());
            assert_eq!(session.backoff_delay(), Duration::from_secs(secs));
        }
    }

    #[test]
    fn attempts_reset_on_success() {
        let mut session = Session::new(3000, None, "wss://griq.site/".to_string());
        session.record_failure();
        session.record_failure();
        assert_eq!(session.reconnect_attempts, 2);

        session.record_success();
        assert_eq!(session.reconnect_attempts, 0);
        assert_eq!(session.backoff_delay(), Duration::from_secs(1));
    }

    #[test]
    fn budget_spent_after_max_failures() {
        let mut session = Session::new(3000, None, "wss://griq.site/".to_string());
        for _ in 0..MAX_RECONNECT_ATTEMPTS {
            assert!(session.record_failure());
        }
        // The sixth consecutive failure exhausts the budget.
        assert!(!session.record_failure());
    }

    #[tokio::test]
    async fn later_registered_message_overwrites_public_url() {
        let mut client = TunnelClient::new(3000, None, "wss://griq.site/".to_string());
        assert_eq!(client.public_url(), "");

        client
            .handle_message(r#"{"type":"registered","url":"https://old.griq.site"}"#)
            .await
            .unwrap();
        assert_eq!(client.public_url(), "https://old.griq.site");

        client
            .handle_message(r#"{"type":"registered","url":"https://new.griq.site"}"#)
            .await
            .unwrap();
        assert_eq!(client.public_url(), "https://new.griq.site");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_reported_as_fatal() {
        // Bind then drop so nothing is listening on the port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = TunnelClient::new(3000, None, format!("ws://127.0.0.1:{}/", port));
        let result = client.run(CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(TunnelError::ExhaustedRetries(MAX_RECONNECT_ATTEMPTS))
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_the_state_machine() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let mut client = TunnelClient::new(3000, None, "ws://127.0.0.1:1/".to_string());
        assert!(client.run(shutdown).await.is_ok());
    }
}
