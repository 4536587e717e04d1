use crate::socket::{LinkEvent, LinkSink, LinkStream, SocketConnector};
use async_trait::async_trait;
use carelink_core::{ChannelError, ChatMessage, TokenProvider};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsTransport = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket connector for the portal's chat endpoint. The identity becomes
/// the final path segment and the bearer credential rides on the handshake.
pub struct WsConnector {
    endpoint: String,
    token: Arc<dyn TokenProvider>,
}

impl WsConnector {
    pub fn new(endpoint: impl Into<String>, token: Arc<dyn TokenProvider>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
        }
    }
}

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(
        &self,
        identity: &str,
    ) -> Result<(Box<dyn LinkSink>, Box<dyn LinkStream>), ChannelError> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), identity);
        let mut request = url
            .into_client_request()
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        if let Some(token) = self.token.bearer_token() {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|_| ChannelError::Connect("invalid bearer token".to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (transport, _response) = connect_async(request)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        let (sink, stream) = transport.split();
        Ok((Box::new(WsSink { inner: sink }), Box::new(WsStream { inner: stream })))
    }
}

struct WsSink {
    inner: SplitSink<WsTransport, Message>,
}

#[async_trait]
impl LinkSink for WsSink {
    async fn send(&mut self, message: &ChatMessage) -> Result<(), ChannelError> {
        let json =
            serde_json::to_string(message).map_err(|e| ChannelError::Send(e.to_string()))?;
        self.inner
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.inner.close().await;
    }
}

struct WsStream {
    inner: SplitStream<WsTransport>,
}

#[async_trait]
impl LinkStream for WsStream {
    async fn recv(&mut self) -> LinkEvent {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ChatMessage>(text.as_str()) {
                        Ok(message) => return LinkEvent::Message(message),
                        Err(e) => {
                            tracing::debug!("skipping malformed inbound message: {e}");
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "server closed the link");
                    return LinkEvent::Closed;
                }
                Some(Ok(_)) => {} // ping/pong/binary
                Some(Err(e)) => {
                    tracing::warn!("websocket error: {e}");
                    return LinkEvent::Closed;
                }
                None => return LinkEvent::Closed,
            }
        }
    }
}
