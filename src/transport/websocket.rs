use super::{ConnectionEpoch, Transport, TransportError, TransportEvent, TransportLink};
use crate::credentials::{BearerToken, Credential};
use crate::protocol::{Inbound, Outbound};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

/// Inbound messages larger than this fail the connection
const MAX_FRAME_BYTES: usize = 64 * 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport that reconnects on its own after a fixed delay
pub struct WsTransport {
    url: String,
    reconnect_delay: Duration,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.server_url.clone(), config.reconnect_delay)
    }
}

/// The bearer token travels in the upgrade request, never in a message body
fn build_request(url: &str, token: &BearerToken) -> Result<Request, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
    let header = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
        .map_err(|e| TransportError::InvalidCredential(e.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, header);
    Ok(request)
}

fn socket_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(MAX_FRAME_BYTES),
        max_frame_size: Some(MAX_FRAME_BYTES),
        ..Default::default()
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(&self, credential: &Credential) -> Result<TransportLink, TransportError> {
        // Validate up front so a bad endpoint or token fails once instead of looping
        build_request(&self.url, &credential.token)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_link(
            self.url.clone(),
            credential.token.clone(),
            self.reconnect_delay,
            events_tx,
            outbound_rx,
            shutdown_rx,
        ));

        Ok(TransportLink::new(
            events_rx,
            outbound_tx,
            shutdown_tx,
            Some(task),
        ))
    }
}

enum PumpExit {
    Shutdown,
    Lost(String),
}

async fn run_link(
    url: String,
    token: BearerToken,
    reconnect_delay: Duration,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<(ConnectionEpoch, Outbound)>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut epoch: Option<ConnectionEpoch> = None;

    loop {
        // Messages queued while no link was up belong to no epoch
        while outbound_rx.try_recv().is_ok() {}

        let attempt = match build_request(&url, &token) {
            Ok(request) => request,
            Err(e) => {
                let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                return;
            }
        };

        debug!("Connecting to {}", url);
        let connecting =
            tokio_tungstenite::connect_async_with_config(attempt, Some(socket_config()), false);
        let ws = tokio::select! {
            _ = &mut shutdown_rx => return,
            result = connecting => match result {
                Ok((ws, _response)) => ws,
                Err(e) => {
                    if events_tx.send(TransportEvent::Error(e.to_string())).is_err() {
                        return;
                    }
                    if wait_or_shutdown(reconnect_delay, &mut shutdown_rx).await {
                        return;
                    }
                    continue;
                }
            }
        };

        let current = epoch.map_or_else(ConnectionEpoch::first, ConnectionEpoch::next);
        epoch = Some(current);
        info!("Connected to {} (epoch {})", url, current);
        if events_tx
            .send(TransportEvent::Connected { epoch: current })
            .is_err()
        {
            return;
        }

        match pump(ws, current, &events_tx, &mut outbound_rx, &mut shutdown_rx).await {
            PumpExit::Shutdown => return,
            PumpExit::Lost(reason) => {
                if events_tx
                    .send(TransportEvent::Disconnected { reason })
                    .is_err()
                {
                    return;
                }
            }
        }

        if wait_or_shutdown(reconnect_delay, &mut shutdown_rx).await {
            return;
        }
    }
}

/// Returns true when shutdown was requested during the wait
async fn wait_or_shutdown(delay: Duration, shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = shutdown_rx => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

async fn pump(
    ws: WsStream,
    epoch: ConnectionEpoch,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
    outbound_rx: &mut mpsc::UnboundedReceiver<(ConnectionEpoch, Outbound)>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> PumpExit {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return PumpExit::Shutdown;
            }
            outbound = outbound_rx.recv() => {
                let Some((message_epoch, message)) = outbound else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return PumpExit::Shutdown;
                };
                if message_epoch != epoch {
                    trace!("Dropping message queued for epoch {}", message_epoch);
                    continue;
                }
                match message.to_json() {
                    Ok(text) => {
                        trace!("sending message: {}", text);
                        if let Err(e) = ws_tx.send(Message::Text(text)).await {
                            return PumpExit::Lost(e.to_string());
                        }
                    }
                    Err(e) => warn!("Dropping unserializable message: {}", e),
                }
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match Inbound::from_json(&text) {
                        Ok(message) => {
                            if events_tx.send(TransportEvent::Message(message)).is_err() {
                                return PumpExit::Shutdown;
                            }
                        }
                        Err(e) => debug!("Ignoring unrecognized message: {}", e),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return PumpExit::Lost(format!("connection closed by server: {:?}", frame));
                }
                // Pings are answered by tungstenite on the next write
                Some(Ok(_)) => {}
                Some(Err(e)) => return PumpExit::Lost(e.to_string()),
                None => return PumpExit::Lost("stream ended".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::AuthenticatedUser;
    use crate::protocol::SyncEvent;
    use tokio::net::TcpListener;

    fn credential(token: &str) -> Credential {
        Credential::new(
            BearerToken::new(token).unwrap(),
            AuthenticatedUser {
                user_id: "u-1".to_string(),
            },
        )
    }

    #[test]
    fn test_request_carries_bearer_header() {
        let request = build_request(
            "ws://127.0.0.1:9/playback",
            &BearerToken::new("abc123").unwrap(),
        )
        .unwrap();
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer abc123"
        );
        assert_eq!(request.uri().path(), "/playback");
    }

    #[tokio::test]
    async fn test_rejects_invalid_endpoint() {
        let transport = WsTransport::new("not a url", Duration::from_millis(10));
        let result = transport.connect(&credential("abc")).await;
        assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));
    }

    async fn next_event(link: &mut TransportLink) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), link.events.recv())
            .await
            .expect("no transport event")
            .expect("event stream ended")
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    async fn next_text(server: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), server.next())
                .await
                .expect("nothing received")
                .expect("client went away")
                .unwrap();
            if let Message::Text(text) = frame {
                return text;
            }
        }
    }

    async fn local_link(listener: &TcpListener) -> TransportLink {
        let url = format!("ws://{}/playback", listener.local_addr().unwrap());
        WsTransport::new(url, Duration::from_millis(10))
            .connect(&credential("abc"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reconnect_starts_new_epoch_and_drops_stale_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut link = local_link(&listener).await;
        let first = ConnectionEpoch::first();
        let request_state = Outbound::RequestState.to_json().unwrap();

        let mut server = accept(&listener).await;
        assert!(matches!(
            next_event(&mut link).await,
            TransportEvent::Connected { epoch } if epoch == first
        ));
        assert!(link.send(first, Outbound::RequestState));
        assert_eq!(next_text(&mut server).await, request_state);

        // Unparseable frames are skipped, then the server goes away
        server
            .send(Message::Text(
                r#"{"event":"state","data":{"trackId":"t1","positionSeconds":42}}"#.to_string(),
            ))
            .await
            .unwrap();
        server.send(Message::Text("garbage".to_string())).await.unwrap();
        server.close(None).await.unwrap();

        match next_event(&mut link).await {
            TransportEvent::Message(Inbound::State(snapshot)) => {
                assert_eq!(snapshot.track_id, "t1");
                assert_eq!(snapshot.position_seconds, Some(42.0));
            }
            other => panic!("expected a state message, got {:?}", other),
        }
        assert!(matches!(
            next_event(&mut link).await,
            TransportEvent::Disconnected { .. }
        ));

        // Queued for the lost connection
        link.send(first, Outbound::Sync(SyncEvent::new("t1", 43.0, false)));

        let mut server = accept(&listener).await;
        let second = first.next();
        assert!(matches!(
            next_event(&mut link).await,
            TransportEvent::Connected { epoch } if epoch == second
        ));
        link.send(first, Outbound::Sync(SyncEvent::new("t1", 44.0, false)));
        link.send(second, Outbound::RequestState);
        assert_eq!(next_text(&mut server).await, request_state);

        link.close().await;
    }

    #[tokio::test]
    async fn test_oversized_message_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut link = local_link(&listener).await;

        let mut server = accept(&listener).await;
        assert!(matches!(
            next_event(&mut link).await,
            TransportEvent::Connected { .. }
        ));

        let padding = "x".repeat(MAX_FRAME_BYTES + 1);
        let oversized = format!(
            r#"{{"event":"error","data":{{"message":"{}"}}}}"#,
            padding
        );
        // The client may already be gone by the time the write completes
        let _ = server.send(Message::Text(oversized)).await;

        assert!(matches!(
            next_event(&mut link).await,
            TransportEvent::Disconnected { .. }
        ));

        link.close().await;
    }

    #[tokio::test]
    async fn test_reports_connect_failures_and_closes_cleanly() {
        // Bind and drop a listener to get a port nobody is serving
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = WsTransport::new(
            format!("ws://127.0.0.1:{}/playback", port),
            Duration::from_millis(10),
        );
        let mut link = transport.connect(&credential("abc")).await.unwrap();

        match tokio::time::timeout(Duration::from_secs(5), link.events.recv()).await {
            Ok(Some(TransportEvent::Error(_))) => {}
            other => panic!("expected a connect error, got {:?}", other),
        }

        tokio::time::timeout(Duration::from_secs(5), link.close())
            .await
            .unwrap();
    }
}
