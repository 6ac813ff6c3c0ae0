//! Agent entry point: connect, handshake, run the command loop.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::fetch::Fetcher;
use crate::session::{Session, SessionState};
use crate::transport::{websocket, Inbound, MessageSink};

/// Connect to the configured controller and serve commands until the
/// connection ends.
///
/// Connection failures put the session in `Errored` and are returned as the
/// terminal state, not as an error; only configuration problems are errors.
pub async fn serve<F: Fetcher + 'static>(config: &Config, fetcher: F) -> Result<SessionState> {
    let endpoint = config.require_endpoint()?;
    let session = Arc::new(Session::new(config.codec()?));

    info!(endpoint = %endpoint, "Connecting to controller");
    match websocket::connect(endpoint, config.connect_timeout()).await {
        Ok((sink, inbound)) => {
            Ok(serve_connection(session, Box::new(sink), inbound, &config.context, fetcher).await)
        }
        Err(e) => {
            error!(endpoint = %endpoint, error = %e, "Failed to connect to controller");
            session.fail(&e.to_string()).await;
            Ok(session.state())
        }
    }
}

/// Run an already-connected session over any transport.
pub async fn serve_connection<F: Fetcher + 'static>(
    session: Arc<Session>,
    sink: Box<dyn MessageSink>,
    inbound: Inbound,
    context: &str,
    fetcher: F,
) -> SessionState {
    if let Err(e) = session.open(sink, context).await {
        error!(error = %e, "Handshake failed");
        return session.state();
    }

    let dispatcher = Dispatcher::new(Arc::clone(&session), Arc::new(fetcher));
    let state = session.run(inbound, &dispatcher).await;
    info!(%state, pending = session.pending_fetches(), "Session ended");
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{octet_result, MockFetcher};
    use crate::transport::protocol::Codec;
    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn end_to_end_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let controller = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let init = ws.next().await.unwrap().unwrap();

            ws.send(Message::text("debug\0hello agent")).await.unwrap();
            ws.send(Message::text("bogus")).await.unwrap();
            ws.send(Message::text("scrape\0https://example.test/a.bin"))
                .await
                .unwrap();

            let meta = ws.next().await.unwrap().unwrap();
            let body = ws.next().await.unwrap().unwrap();
            ws.close(None).await.unwrap();
            (init, meta, body)
        });

        let config = Config {
            endpoint: Some(format!("ws://{addr}")),
            context: "https://xana.sh/".to_string(),
            ..Config::default()
        };
        let fetcher = MockFetcher::default()
            .respond("https://example.test/a.bin", octet_result("a", b"0123456789abcdefg"));

        let state = serve(&config, fetcher).await.unwrap();
        assert_eq!(state, SessionState::Closed);

        let (init, meta, body) = controller.await.unwrap();
        assert_eq!(init, Message::text("init\0https://xana.sh/"));
        assert_eq!(
            meta,
            Message::text("content\0200\0content-type: application/octet-stream\r\nx-id: a")
        );
        assert_eq!(body, Message::binary(b"0123456789abcdefg".to_vec()));
    }

    #[tokio::test]
    async fn unreachable_controller_ends_errored() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = Config {
            endpoint: Some(format!("ws://{addr}")),
            ..Config::default()
        };
        let state = serve(&config, MockFetcher::default()).await.unwrap();
        assert_eq!(state, SessionState::Errored);
    }

    #[tokio::test]
    async fn missing_endpoint_is_config_error() {
        assert!(serve(&Config::default(), MockFetcher::default()).await.is_err());
    }

    #[tokio::test]
    async fn serve_connection_over_channels() {
        use crate::transport::{channel_inbound, ChannelSink, WireMessage};
        use tokio::sync::mpsc;

        let session = Arc::new(Session::new(Codec::new(':').unwrap()));
        let (sink, mut outbound) = ChannelSink::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let fetcher = MockFetcher::default().respond("https://x/y", octet_result("y", b"yy"));

        let run = tokio::spawn(serve_connection(
            Arc::clone(&session),
            Box::new(sink),
            channel_inbound(inbound_rx),
            "desk",
            fetcher,
        ));

        assert_eq!(
            outbound.recv().await,
            Some(WireMessage::Text("init:desk".into()))
        );
        inbound_tx
            .send(Ok(WireMessage::Text("scrape:https://x/y".into())))
            .unwrap();
        assert!(matches!(
            outbound.recv().await,
            Some(WireMessage::Text(t)) if t.starts_with("content:200:")
        ));
        assert_eq!(
            outbound.recv().await,
            Some(WireMessage::Binary(Bytes::from_static(b"yy")))
        );

        drop(inbound_tx);
        assert_eq!(run.await.unwrap(), SessionState::Closed);
    }
}
