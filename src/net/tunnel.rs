//! Tunnel listener: outbound WS connection from the device to a relay.
//!
//! When the device has no public-facing address, remote management traffic
//! arrives through a persistent WebSocket to a relay service. Requests are
//! multiplexed over the connection as JSON frames, dispatched into the same
//! router the local listener uses (so endpoint registration and
//! authentication apply identically), and answered with response frames.
//!
//! Redialing after a drop is governed by the reconnect gate: while the
//! device has no usable network path, the loop parks instead of burning
//! power on dials that cannot succeed.

use std::time::Duration;

use axum::body::Body;
use axum::http::{self, Request};
use axum::response::Response;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;
use url::Url;

use crate::config::schema::DeviceIdentity;
use crate::lifecycle::gate::ReconnectGate;
use crate::lifecycle::restart::RestartCoordinator;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};

/// Response bodies larger than this are not forwarded over the tunnel.
const MAX_FRAME_BODY: usize = 1024 * 1024;

/// Error type for tunnel setup.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("tunnel requires a non-empty device id and password")]
    MissingCredentials,

    #[error("invalid tunnel address: {0}")]
    Address(String),
}

/// Build the relay URI: `ws://<id>:<password>@<id>.<addr>`.
///
/// Constructed once at bootstrap and reused for every redial.
pub fn tunnel_address(device: &DeviceIdentity, tunnel_addr: &str) -> Result<Url, TunnelError> {
    if device.id.is_empty() || device.password.is_empty() {
        return Err(TunnelError::MissingCredentials);
    }
    if tunnel_addr.is_empty() {
        return Err(TunnelError::Address("relay address is empty".into()));
    }
    let raw = format!(
        "ws://{id}:{password}@{id}.{addr}",
        id = device.id,
        password = device.password,
        addr = tunnel_addr
    );
    Url::parse(&raw).map_err(|e| TunnelError::Address(format!("{raw:?}: {e}")))
}

/// One multiplexed management exchange on the tunnel.
///
/// Unknown frame types are ignored by both sides, so the protocol can grow
/// without breaking deployed devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TunnelFrame {
    Request {
        id: String,
        method: String,
        uri: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
        #[serde(default)]
        body: Vec<u8>,
    },
    Response {
        id: String,
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
}

/// Exponential backoff delay with jitter for redial attempts.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// The tunnel client: dial, serve frames, redial when permitted.
pub struct TunnelClient {
    url: Url,
    router: Router,
    gate: Arc<ReconnectGate>,
    restart: RestartCoordinator,
    tracker: ConnectionTracker,
    reconnect_base_ms: u64,
    reconnect_max_ms: u64,
}

impl TunnelClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: Url,
        router: Router,
        gate: Arc<ReconnectGate>,
        restart: RestartCoordinator,
        tracker: ConnectionTracker,
        reconnect_base_ms: u64,
        reconnect_max_ms: u64,
    ) -> Self {
        Self {
            url,
            router,
            gate,
            restart,
            tracker,
            reconnect_base_ms,
            reconnect_max_ms,
        }
    }

    /// Main loop: await permission, connect, serve frames, back off, repeat.
    pub async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            self.gate.permitted().await;

            match connect_async(self.url.as_str()).await {
                Ok((ws, _response)) => {
                    tracing::info!(
                        relay = self.url.host_str().unwrap_or("?"),
                        "Tunnel connected"
                    );
                    attempt = 0;
                    self.serve(ws).await;
                    tracing::info!("Tunnel connection lost");
                }
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(error = %err, attempt, "Tunnel connect failed");
                }
            }

            let delay = calculate_backoff(
                attempt.max(1),
                self.reconnect_base_ms,
                self.reconnect_max_ms,
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Serve one established connection until it drops.
    async fn serve(&self, ws: WebSocketStream<MaybeTlsStream<TcpStream>>) {
        let (mut sink, mut stream) = ws.split();

        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::warn!(error = %err, "Tunnel read error");
                    break;
                }
            };
            match msg {
                Message::Text(text) => {
                    let frame = match serde_json::from_str::<TunnelFrame>(text.as_str()) {
                        Ok(frame) => frame,
                        Err(err) => {
                            tracing::warn!(error = %err, "Unrecognized tunnel frame");
                            continue;
                        }
                    };
                    let TunnelFrame::Request {
                        id,
                        method,
                        uri,
                        headers,
                        body,
                    } = frame
                    else {
                        continue;
                    };

                    let (reply, conn) = self.dispatch(id, &method, &uri, &headers, body).await;
                    let Ok(text) = serde_json::to_string(&reply) else {
                        continue;
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                    if sink.flush().await.is_err() {
                        break;
                    }
                    // The response frame was handed to the transport; this
                    // exchange's virtual connection is now closed.
                    self.restart.on_connection_closed(conn.id());
                }
                Message::Ping(payload) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    }

    /// Run one framed request through the shared router.
    async fn dispatch(
        &self,
        id: String,
        method: &str,
        uri: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> (TunnelFrame, ConnectionGuard) {
        let conn = self.tracker.track();
        tracing::info!(conn = %conn.id(), method, uri, "Tunnel request");

        let response = match build_request(method, uri, headers, body, &conn) {
            Ok(request) => match self.router.clone().oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            },
            Err(err) => {
                tracing::warn!(conn = %conn.id(), error = %err, "Malformed tunnel request");
                Response::builder()
                    .status(http::StatusCode::BAD_REQUEST)
                    .body(Body::empty())
                    .unwrap_or_default()
            }
        };

        (to_frame(id, response).await, conn)
    }
}

fn build_request(
    method: &str,
    uri: &str,
    headers: &[(String, String)],
    body: Vec<u8>,
    conn: &ConnectionGuard,
) -> Result<Request<Body>, http::Error> {
    let mut builder = Request::builder()
        .method(http::Method::from_bytes(method.as_bytes()).map_err(http::Error::from)?)
        .uri(uri);
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let mut request = builder.body(Body::from(body))?;
    request.extensions_mut().insert(conn.id());
    Ok(request)
}

async fn to_frame(id: String, response: Response) -> TunnelFrame {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();
    let body = match axum::body::to_bytes(response.into_body(), MAX_FRAME_BODY).await {
        Ok(bytes) => bytes.to_vec(),
        Err(err) => {
            tracing::warn!(error = %err, "Tunnel response body dropped");
            return TunnelFrame::Response {
                id,
                status: 500,
                headers: Vec::new(),
                body: Vec::new(),
            };
        }
    };
    TunnelFrame::Response {
        id,
        status,
        headers,
        body,
    }
}
