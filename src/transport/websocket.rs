//! WebSocket client transport.
//!
//! Connects to the controller endpoint and splits the socket into a
//! `MessageSink` (owned by the session) and an `Inbound` stream (drained by
//! the session's receive loop). Ping/pong is answered by tungstenite and
//! never surfaced.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{future, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use super::{Inbound, MessageSink, TransportError, WireMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of a WebSocket connection.
pub struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let frame = match message {
            WireMessage::Text(text) => Message::text(text),
            WireMessage::Binary(bytes) => Message::binary(bytes.to_vec()),
        };
        self.inner.send(frame).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Validate a controller endpoint: must parse and use `ws` or `wss`.
pub fn parse_endpoint(endpoint: &str) -> Result<Url, TransportError> {
    let url = Url::parse(endpoint).map_err(|e| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(TransportError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("unsupported scheme '{other}', expected ws or wss"),
        }),
    }
}

/// Connect to the controller and split the socket.
///
/// `connect_timeout` bounds TCP connect, TLS, and the WebSocket handshake.
pub async fn connect(
    endpoint: &str,
    connect_timeout: Duration,
) -> Result<(WsSink, Inbound), TransportError> {
    let url = parse_endpoint(endpoint)?;
    debug!(endpoint = %url, "Connecting to controller");

    let (socket, response) =
        tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                endpoint: url.to_string(),
                seconds: connect_timeout.as_secs(),
            })??;

    debug!(status = %response.status(), "WebSocket handshake complete");

    let (sink, stream) = socket.split();
    let inbound = stream
        .take_while(|item| future::ready(!matches!(item, Ok(Message::Close(_)))))
        .filter_map(|item| future::ready(map_inbound(item)));

    Ok((WsSink { inner: sink }, Box::pin(inbound)))
}

fn map_inbound(
    item: Result<Message, tungstenite::Error>,
) -> Option<Result<WireMessage, TransportError>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(WireMessage::Text(text))),
        Ok(Message::Binary(data)) => Some(Ok(WireMessage::Binary(Bytes::from(data)))),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Close(_))
        | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => None,
        Err(e) => Some(Err(e.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn endpoint_requires_ws_scheme() {
        assert!(parse_endpoint("ws://127.0.0.1:8080").is_ok());
        assert!(parse_endpoint("wss://desk.example:443/agent").is_ok());
        assert!(matches!(
            parse_endpoint("http://127.0.0.1:8080"),
            Err(TransportError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            parse_endpoint("not a url"),
            Err(TransportError::InvalidEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn exchanges_text_and_binary_with_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let hello = ws.next().await.unwrap().unwrap();
            ws.send(Message::text("scrape\0https://example.test/a"))
                .await
                .unwrap();
            ws.send(Message::binary(vec![0u8, 1, 2, 255])).await.unwrap();
            ws.close(None).await.unwrap();
            hello
        });

        let (mut sink, mut inbound) = connect(&format!("ws://{addr}"), Duration::from_secs(5))
            .await
            .unwrap();
        sink.send(WireMessage::Text("init\0test".into())).await.unwrap();

        assert_eq!(
            inbound.next().await.unwrap().unwrap(),
            WireMessage::Text("scrape\0https://example.test/a".into())
        );
        assert_eq!(
            inbound.next().await.unwrap().unwrap(),
            WireMessage::Binary(Bytes::from_static(&[0, 1, 2, 255]))
        );
        assert!(inbound.next().await.is_none());

        let hello = server.await.unwrap();
        assert_eq!(hello, Message::text("init\0test"));
    }

    #[tokio::test]
    async fn connect_refused_is_websocket_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(&format!("ws://{addr}"), Duration::from_secs(5)).await;
        assert!(matches!(result, Err(TransportError::WebSocket(_))));
    }
}
