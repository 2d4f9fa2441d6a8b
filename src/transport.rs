//! WebSocket transport adapter.
//!
//! [`WsTransport`] wraps one accepted WebSocket and presents the three
//! primitives the protocol session needs — `start`, `send`, `close` — plus
//! inbound event delivery over an mpsc channel:
//!
//! | Event                       | Meaning                                   |
//! |-----------------------------|-------------------------------------------|
//! | `TransportEvent::Message`   | one successfully decoded inbound frame    |
//! | `TransportEvent::Error`     | transport-level fault (read side)         |
//! | `TransportEvent::Closed`    | connection ended; fires exactly once      |
//!
//! A text frame that fails to decode as JSON is logged and dropped — the
//! peer simply gets no response for it. `Closed` is always the final event:
//! the read task emits events sequentially and terminates after sending it,
//! so no `Message` can arrive after `Closed`.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// Inbound events delivered to the protocol session.
#[derive(Debug)]
pub enum TransportEvent {
    /// A decoded inbound JSON frame.
    Message(Value),
    /// A transport-level fault on the read side. Always followed by `Closed`.
    Error(String),
    /// The connection ended. Final event; fires exactly once.
    Closed,
}

/// Errors surfaced to callers of `start`/`send`/`close`.
#[derive(Debug)]
pub enum TransportError {
    /// The channel is not in the open state.
    NotOpen,
    /// The underlying WebSocket failed mid-write.
    Ws(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NotOpen => write!(f, "WebSocket is not open"),
            TransportError::Ws(e) => write!(f, "WebSocket send failed: {}", e),
        }
    }
}

/// Adapter over one accepted WebSocket connection.
///
/// The write half lives behind a `Mutex` so responses and close frames are
/// written one at a time; the read half is owned by a background task that
/// decodes frames into [`TransportEvent`]s.
pub struct WsTransport {
    sink: Mutex<SplitSink<WebSocketStream<TcpStream>, Message>>,
    closed: watch::Receiver<bool>,
}

impl WsTransport {
    /// Wrap an accepted WebSocket. Returns the adapter and the inbound
    /// event receiver. The read task runs until the connection ends or the
    /// receiver is dropped.
    pub fn new(socket: WebSocketStream<TcpStream>) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (sink, stream) = socket.split();
        let (event_tx, event_rx) = mpsc::channel(64);
        let (closed_tx, closed_rx) = watch::channel(false);

        tokio::spawn(read_loop(stream, event_tx, closed_tx));

        (
            Self {
                sink: Mutex::new(sink),
                closed: closed_rx,
            },
            event_rx,
        )
    }

    /// No-op while the connection is open (the handshake completed before
    /// this adapter was constructed). Fails if the connection already ended.
    pub fn start(&self) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::NotOpen);
        }
        Ok(())
    }

    /// Serialize `message` and write it as a text frame.
    ///
    /// Fails with [`TransportError::NotOpen`] when the connection is no
    /// longer open — the failure is reported to the caller, never dropped.
    pub async fn send(&self, message: &Value) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::NotOpen);
        }
        let text = message.to_string();
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Ws(e.to_string()))
    }

    /// Request connection close and wait until closure is confirmed.
    /// Idempotent — resolves immediately if the connection already ended.
    pub async fn close(&self) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Ok(());
        }
        {
            let mut sink = self.sink.lock().await;
            // The peer may already be gone; the read task observes the
            // closure either way.
            let _ = sink.send(Message::Close(None)).await;
        }
        let mut closed = self.closed.clone();
        while !*closed.borrow() {
            if closed.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Read task: decode inbound frames into events until the connection ends.
async fn read_loop(
    mut stream: SplitStream<WebSocketStream<TcpStream>>,
    events: mpsc::Sender<TransportEvent>,
    closed_tx: watch::Sender<bool>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                Ok(message) => {
                    if events.send(TransportEvent::Message(message)).await.is_err() {
                        // Session gone — stop reading.
                        break;
                    }
                }
                Err(e) => warn!("Dropping malformed inbound frame: {e}"),
            },
            Ok(Message::Close(_)) => {
                debug!("Peer sent close frame");
                break;
            }
            Ok(_) => {} // ping/pong/binary — nothing to deliver
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string())).await;
                break;
            }
        }
    }

    let _ = closed_tx.send(true);
    let _ = events.send(TransportEvent::Closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Accept one WebSocket connection and wrap it in a transport.
    async fn pair() -> (
        WsTransport,
        mpsc::Receiver<TransportEvent>,
        WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(stream).await.unwrap()
        });
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let socket = server.await.unwrap();
        let (transport, events) = WsTransport::new(socket);
        (transport, events, client)
    }

    async fn wait_for_closed(events: &mut mpsc::Receiver<TransportEvent>) {
        loop {
            match events.recv().await {
                Some(TransportEvent::Closed) | None => break,
                Some(_) => {}
            }
        }
    }

    #[tokio::test]
    async fn send_and_receive_round_trip() {
        let (transport, mut events, mut client) = pair().await;
        transport.start().unwrap();

        client
            .send(Message::Text(json!({"method": "ping"}).to_string()))
            .await
            .unwrap();

        match events.recv().await {
            Some(TransportEvent::Message(msg)) => assert_eq!(msg["method"], "ping"),
            other => panic!("expected Message event, got {other:?}"),
        }

        transport.send(&json!({"result": {}})).await.unwrap();
        match client.next().await {
            Some(Ok(Message::Text(text))) => {
                let parsed: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(parsed, json!({"result": {}}));
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped() {
        let (_transport, mut events, mut client) = pair().await;

        client
            .send(Message::Text("this is not json".into()))
            .await
            .unwrap();
        client
            .send(Message::Text(json!({"ok": true}).to_string()))
            .await
            .unwrap();

        // The malformed frame produces no event — the next event is the
        // valid message.
        match events.recv().await {
            Some(TransportEvent::Message(msg)) => assert_eq!(msg["ok"], true),
            other => panic!("expected Message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_after_close_rejects() {
        let (transport, mut events, mut client) = pair().await;

        client.close(None).await.unwrap();
        wait_for_closed(&mut events).await;

        let err = transport.send(&json!({"late": true})).await.unwrap_err();
        assert!(matches!(err, TransportError::NotOpen));
        assert!(matches!(transport.start(), Err(TransportError::NotOpen)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (transport, mut events, client) = pair().await;

        // Drop the client so the server side observes closure.
        drop(client);
        wait_for_closed(&mut events).await;

        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn closed_fires_once_with_no_messages_after() {
        let (_transport, mut events, mut client) = pair().await;

        client
            .send(Message::Text(json!({"n": 1}).to_string()))
            .await
            .unwrap();
        client.close(None).await.unwrap();

        let mut saw_closed = false;
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Closed => {
                    assert!(!saw_closed, "Closed fired twice");
                    saw_closed = true;
                }
                TransportEvent::Message(_) | TransportEvent::Error(_) => {
                    assert!(!saw_closed, "event delivered after Closed");
                }
            }
        }
        assert!(saw_closed);
    }
}
