//! Transport seam for the live channel.
//!
//! A [`Transport`] turns a connect request into a [`Link`]: two unbounded
//! channels carrying envelopes in each direction. The link closes when the
//! incoming half ends; dropping the outgoing half closes the socket.

use async_trait::async_trait;
use chatsync_shared::{ClientEvent, ServerEvent, WsEnvelope};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async;

use crate::auth_session::bearer;

/// What the connection manager asks a transport to open.
#[derive(Clone)]
pub struct ConnectRequest {
    pub url: String,
    pub token: String,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// An established session.
pub struct Link {
    pub outgoing: UnboundedSender<WsEnvelope<ClientEvent>>,
    pub incoming: UnboundedReceiver<WsEnvelope<ServerEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Network-level failure; worth retrying.
    #[error("{0}")]
    Transport(String),
    /// The server refused the credentials; retrying with the same token is pointless.
    #[error("{0}")]
    Auth(String),
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, target: &ConnectRequest) -> Result<Link, ConnectError>;
}

/// Live channel over a WebSocket (tokio-tungstenite).
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, target: &ConnectRequest) -> Result<Link, ConnectError> {
        let mut request = target
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::Transport(format!("invalid live channel URL: {e}")))?;
        let auth = HeaderValue::from_str(&bearer(&target.token))
            .map_err(|e| ConnectError::Auth(format!("token is not a valid header value: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (ws_stream, _response) = connect_async(request).await.map_err(classify)?;
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = unbounded::<WsEnvelope<ClientEvent>>();
        let (in_tx, in_rx) = unbounded::<WsEnvelope<ServerEvent>>();

        let url = target.url.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<WsEnvelope<ServerEvent>>(text.as_str()) {
                            Ok(envelope) => {
                                if in_tx.unbounded_send(envelope).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                crate::log_warn!(error = %e, "dropping unparsable frame");
                            }
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        crate::log_info!(%url, ?frame, "server closed live channel");
                        break;
                    }
                    Ok(Message::Ping(_)) => {
                        // tungstenite queues the pong
                    }
                    Ok(_) => {}
                    Err(e) => {
                        crate::log_error!(%url, error = %e, "live channel read error");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(envelope) = out_rx.next().await {
                let json = match serde_json::to_string(&envelope) {
                    Ok(json) => json,
                    Err(e) => {
                        crate::log_error!(error = %e, "failed to serialize outgoing event");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json.into())).await {
                    crate::log_error!(error = %e, "live channel write failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

fn classify(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(response) if is_auth_status(response.status().as_u16()) => {
            ConnectError::Auth(format!("handshake rejected with {}", response.status()))
        }
        other => ConnectError::Transport(other.to_string()),
    }
}

fn is_auth_status(status: u16) -> bool {
    matches!(status, 401 | 403)
}
