//! Per-connection relay between a browser socket and the vendor.

use crate::{config::Config, state::AppState};
use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message as UpstreamMessage,
        client::IntoClientRequest,
        handshake::client::Request,
        http::header::{AUTHORIZATION, HeaderName, HeaderValue, InvalidHeaderValue},
        protocol::{CloseFrame as UpstreamCloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{Span, debug, info, instrument, warn};
use url::Url;

type Upstream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close reasons are limited to 123 bytes on the wire.
const MAX_CLOSE_REASON: usize = 123;

const OPENAI_BETA: HeaderName = HeaderName::from_static("openai-beta");

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("API Key is required")]
    MissingKey,
    #[error("invalid authorization header: {0}")]
    Header(#[from] InvalidHeaderValue),
    #[error("upstream: {0}")]
    Upstream(#[from] tungstenite::Error),
    #[error("browser: {0}")]
    Browser(#[from] axum::Error),
}

impl RelayError {
    /// The close code sent to the browser when this error ends a connection.
    pub fn close_code(&self) -> u16 {
        match self {
            RelayError::MissingKey => close_code::POLICY,
            _ => close_code::ERROR,
        }
    }
}

/// Query string of an incoming connection: `?model=...&key=...`.
#[derive(Debug, Default, Deserialize)]
pub struct RelayQuery {
    pub model: Option<String>,
    pub key: Option<String>,
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<RelayQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query, state))
}

#[instrument(name = "relay_session", skip_all, fields(model))]
async fn handle_socket(mut socket: WebSocket, query: RelayQuery, state: AppState) {
    let model = query
        .model
        .as_deref()
        .filter(|m| !m.is_empty())
        .unwrap_or(&state.config.default_model);
    Span::current().record("model", model);

    let upstream = match open_upstream(query.key.as_deref(), model, &state.config).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(error = %e, "Refusing browser connection");
            let _ = socket.send(close_message(e.close_code(), &e.to_string())).await;
            return;
        }
    };
    info!("Upstream connected; relaying");

    match pump(socket, upstream).await {
        Ok(()) => info!("Relay closed"),
        Err(e) => warn!(error = %e, "Relay ended with an error"),
    }
}

async fn open_upstream(
    key: Option<&str>,
    model: &str,
    config: &Config,
) -> Result<Upstream, RelayError> {
    let key = match key.filter(|k| !k.is_empty()) {
        Some(key) => key,
        None => config
            .default_key
            .as_ref()
            .map(|k| k.expose_secret())
            .ok_or(RelayError::MissingKey)?,
    };
    let request = upstream_request(&config.upstream_url, model, key)?;
    let (upstream, _) = connect_async(request).await?;
    Ok(upstream)
}

/// `{upstream}?model={model}` with the bearer key and realtime beta headers.
pub fn upstream_request(upstream: &Url, model: &str, key: &str) -> Result<Request, RelayError> {
    let mut url = upstream.clone();
    url.query_pairs_mut().append_pair("model", model);

    let mut request = url.as_str().into_client_request()?;
    let mut authorization = HeaderValue::from_str(&format!("Bearer {key}"))?;
    authorization.set_sensitive(true);
    let headers = request.headers_mut();
    headers.insert(AUTHORIZATION, authorization);
    headers.insert(OPENAI_BETA, HeaderValue::from_static("realtime=v1"));
    Ok(request)
}

/// Forwards frames both ways until either side closes.
async fn pump(browser: WebSocket, upstream: Upstream) -> Result<(), RelayError> {
    let (mut browser_tx, mut browser_rx) = browser.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    loop {
        tokio::select! {
            message = browser_rx.next() => match message {
                Some(Ok(message)) => {
                    let closing = matches!(message, Message::Close(_));
                    upstream_tx.send(to_upstream(message)).await?;
                    if closing {
                        debug!("Browser closed");
                        break;
                    }
                }
                Some(Err(e)) => {
                    let _ = upstream_tx.send(UpstreamMessage::Close(None)).await;
                    return Err(e.into());
                }
                None => {
                    let _ = upstream_tx.send(UpstreamMessage::Close(None)).await;
                    break;
                }
            },
            message = upstream_rx.next() => match message {
                Some(Ok(message)) => {
                    let Some(message) = to_browser(message) else {
                        continue;
                    };
                    let closing = matches!(message, Message::Close(_));
                    browser_tx.send(message).await?;
                    if closing {
                        debug!("Upstream closed");
                        break;
                    }
                }
                Some(Err(e)) => {
                    let reason = format!("upstream error: {e}");
                    let _ = browser_tx.send(close_message(close_code::ERROR, &reason)).await;
                    return Err(e.into());
                }
                None => {
                    let _ = browser_tx.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    let _ = upstream_tx.close().await;
    let _ = browser_tx.close().await;
    Ok(())
}

fn to_upstream(message: Message) -> UpstreamMessage {
    match message {
        Message::Text(text) => UpstreamMessage::Text(text.as_str().into()),
        Message::Binary(data) => UpstreamMessage::Binary(data),
        Message::Ping(data) => UpstreamMessage::Ping(data),
        Message::Pong(data) => UpstreamMessage::Pong(data),
        Message::Close(frame) => UpstreamMessage::Close(frame.map(|frame| UpstreamCloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason.as_str().into(),
        })),
    }
}

fn to_browser(message: UpstreamMessage) -> Option<Message> {
    let message = match message {
        UpstreamMessage::Text(text) => Message::Text(text.as_str().into()),
        UpstreamMessage::Binary(data) => Message::Binary(data),
        UpstreamMessage::Ping(data) => Message::Ping(data),
        UpstreamMessage::Pong(data) => Message::Pong(data),
        UpstreamMessage::Close(frame) => Message::Close(frame.map(|frame| CloseFrame {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().into(),
        })),
        UpstreamMessage::Frame(_) => return None,
    };
    Some(message)
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: truncate_reason(reason).into(),
    }))
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
