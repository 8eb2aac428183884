//! WebSocket bridge transport
//!
//! Talks to a broker bridge that exposes pub/sub over a single WebSocket.
//! The access token goes in the `Authorization` header of the upgrade
//! request, the subject in `X-Username`. Every frame is a JSON text message:
//!
//! - client: `{"action":"subscribe"|"unsubscribe"|"publish"|"will", "topic", ...}`
//! - server: `{"topic","qos","retained","duplicate","message_id","payload"}`
//!
//! Close codes 1000, 1005 and 1006 are ordinary closures; any other close
//! code is reported as a rejection.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderName};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::{CloseKind, Result, TransportError};
use crate::{ConnectRequest, InboundMessage, Qos, Transport};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const USERNAME_HEADER: &str = "x-username";
const CLIENT_ID_HEADER: &str = "x-client-id";

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Subscribe {
        topic: &'a str,
        qos: Qos,
    },
    Unsubscribe {
        topic: &'a str,
    },
    Publish {
        topic: &'a str,
        qos: Qos,
        retained: bool,
        payload: &'a str,
    },
    Will {
        topic: &'a str,
        qos: Qos,
        retained: bool,
        payload: &'a str,
    },
}

#[derive(Debug, Deserialize)]
struct ServerFrame {
    topic: String,
    #[serde(default = "default_qos")]
    qos: Qos,
    #[serde(default)]
    retained: bool,
    #[serde(default)]
    duplicate: bool,
    #[serde(default)]
    message_id: u16,
    payload: String,
}

fn default_qos() -> Qos {
    Qos::AtMostOnce
}

impl From<ServerFrame> for InboundMessage {
    fn from(frame: ServerFrame) -> Self {
        InboundMessage {
            topic: frame.topic,
            payload: frame.payload.into_bytes(),
            qos: frame.qos,
            retained: frame.retained,
            duplicate: frame.duplicate,
            message_id: frame.message_id,
        }
    }
}

/// Transport backed by a WebSocket connection to a broker bridge.
pub struct WsTransport {
    url: String,
    connect_timeout: Duration,
    stream: Option<Stream>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn open(&mut self, request: ConnectRequest) -> Result<()> {
        // A previous session that died mid-read is simply dropped.
        self.stream = None;

        let mut upgrade = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid broker url: {e}")))?;

        let mut bearer = header_value(&format!("Bearer {}", request.password.expose()))?;
        bearer.set_sensitive(true);
        let headers = upgrade.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(
            HeaderName::from_static(USERNAME_HEADER),
            header_value(&request.username)?,
        );
        headers.insert(
            HeaderName::from_static(CLIENT_ID_HEADER),
            header_value(&request.client_id)?,
        );

        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(upgrade))
            .await
            .map_err(|_| {
                TransportError::Connect(format!(
                    "handshake timed out after {}s",
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(classify_handshake_error)?;
        self.stream = Some(stream);

        if let Some(will) = &request.will {
            let payload = String::from_utf8_lossy(&will.payload);
            self.send_frame(&ClientFrame::Will {
                topic: &will.topic,
                qos: will.qos,
                retained: will.retained,
                payload: &payload,
            })
            .await?;
        }

        info!(url = %self.url, username = %request.username, "websocket bridge connected");
        Ok(())
    }

    async fn send_frame(&mut self, frame: &ClientFrame<'_>) -> Result<()> {
        let text = serde_json::to_string(frame)
            .map_err(|e| TransportError::Protocol(format!("encoding frame: {e}")))?;
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let sent = stream.send(Message::Text(text)).await;
        if let Err(e) = sent {
            let err = classify_ws_error(e);
            if err.is_expected_closure() {
                self.stream = None;
            }
            return Err(err);
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(classify_ws_error(e));
                }
                None => {
                    self.stream = None;
                    return Err(TransportError::Closed(CloseKind::Abnormal));
                }
            };

            let raw = match message {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(bytes) => bytes,
                Message::Close(frame) => {
                    self.stream = None;
                    return close_outcome(frame);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };

            match serde_json::from_slice::<ServerFrame>(&raw) {
                Ok(frame) => return Ok(Some(frame.into())),
                Err(e) => warn!(error = %e, "skipping malformed bridge frame"),
            }
        }
    }

    async fn close(&mut self, grace: Duration) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };

        let handshake = async {
            stream
                .close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                }))
                .await?;
            while let Some(frame) = stream.next().await {
                frame?;
            }
            Ok::<(), WsError>(())
        };

        match tokio::time::timeout(grace, handshake).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let err = classify_ws_error(e);
                if err.is_expected_closure() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
            Err(_) => {
                debug!(grace_ms = grace.as_millis() as u64, "close handshake did not finish in time");
                Ok(())
            }
        }
    }
}

impl Transport for WsTransport {
    fn connect(
        &mut self,
        request: ConnectRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.open(request))
    }

    fn subscribe<'a>(
        &'a mut self,
        topic: &'a str,
        qos: Qos,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.send_frame(&ClientFrame::Subscribe { topic, qos }).await })
    }

    fn unsubscribe<'a>(
        &'a mut self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.send_frame(&ClientFrame::Unsubscribe { topic }).await })
    }

    fn publish<'a>(
        &'a mut self,
        topic: &'a str,
        payload: Vec<u8>,
        qos: Qos,
        retained: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let payload = String::from_utf8(payload)
                .map_err(|e| TransportError::Protocol(format!("payload is not UTF-8: {e}")))?;
            self.send_frame(&ClientFrame::Publish {
                topic,
                qos,
                retained,
                payload: &payload,
            })
            .await
        })
    }

    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<InboundMessage>>> + Send + '_>> {
        Box::pin(self.next_message())
    }

    fn disconnect(&mut self, grace: Duration) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.close(grace))
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::Connect(format!("invalid header value: {e}")))
}

/// Map a tungstenite error onto the transport taxonomy.
fn classify_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::ConnectionClosed => TransportError::Closed(CloseKind::CloseSent),
        WsError::AlreadyClosed => TransportError::Closed(CloseKind::LocalClosed),
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::Closed(CloseKind::Abnormal)
        }
        WsError::Io(e) => TransportError::Io(e.to_string()),
        WsError::Http(response) => {
            TransportError::Rejected(format!("handshake returned {}", response.status()))
        }
        other => TransportError::Protocol(other.to_string()),
    }
}

/// Errors during the opening handshake are connect failures unless the
/// bridge answered with an HTTP status.
fn classify_handshake_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => {
            TransportError::Rejected(format!("handshake returned {}", response.status()))
        }
        WsError::Io(e) => TransportError::Connect(e.to_string()),
        other => TransportError::Connect(other.to_string()),
    }
}

fn close_outcome(frame: Option<CloseFrame<'_>>) -> Result<Option<InboundMessage>> {
    let Some(frame) = frame else {
        return Err(TransportError::Closed(CloseKind::NoStatus));
    };
    match frame.code {
        CloseCode::Normal => Ok(None),
        CloseCode::Status => Err(TransportError::Closed(CloseKind::NoStatus)),
        CloseCode::Abnormal => Err(TransportError::Closed(CloseKind::Abnormal)),
        code => Err(TransportError::Rejected(format!(
            "close code {}: {}",
            u16::from(code),
            frame.reason
        ))),
    }
}
