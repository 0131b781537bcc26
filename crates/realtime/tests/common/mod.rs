#![allow(dead_code)]

use duplex_core::SessionEvent;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{
    WebSocketStream, accept_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

pub const WAIT: Duration = Duration::from_secs(5);

/// The vendor end of one accepted connection.
pub struct VendorSide {
    ws: WebSocketStream<TcpStream>,
}

/// Listens on an ephemeral port and accepts exactly one WebSocket client.
pub async fn fake_vendor() -> (String, oneshot::Receiver<VendorSide>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let _ = tx.send(VendorSide { ws });
    });
    (url, rx)
}

impl VendorSide {
    pub async fn send_json(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    pub async fn send_binary_json(&mut self, value: Value) {
        self.ws
            .send(Message::Binary(value.to_string().into_bytes().into()))
            .await
            .unwrap();
    }

    /// Next text frame as JSON; panics on close or timeout.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let message = timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a client frame")
                .expect("client went away")
                .unwrap();
            match message {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Close(frame) => panic!("client closed: {frame:?}"),
                _ => continue,
            }
        }
    }

    /// Waits for the client's close frame, skipping data frames.
    pub async fn recv_close(&mut self) -> Option<CloseFrame> {
        loop {
            match timeout(WAIT, self.ws.next()).await.expect("timed out") {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    }

    /// Returns the next data frame if one arrives within `window`.
    pub async fn recv_within(&mut self, window: Duration) -> Option<Message> {
        match timeout(window, self.ws.next()).await {
            Ok(Some(Ok(message))) => Some(message),
            _ => None,
        }
    }

    pub async fn close(&mut self, code: CloseCode, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        self.ws.close(Some(frame)).await.unwrap();
    }

    /// Runs the server-initiated `session.created` / `session.updated`
    /// exchange and returns the client's `session.update`.
    pub async fn accept_session(&mut self) -> Value {
        self.send_json(serde_json::json!({"type": "session.created", "session": {"id": "sess_1"}}))
            .await;
        let update = self.recv_json().await;
        assert_eq!(update["type"], "session.update");
        self.send_json(serde_json::json!({"type": "session.updated", "session": {"id": "sess_1"}}))
            .await;
        update
    }
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event stream ended")
}
