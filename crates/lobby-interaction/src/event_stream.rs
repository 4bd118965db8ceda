//! Server-push visit event stream.
//!
//! Opens the backend's SSE endpoint keyed by visitor id, forwards each
//! `visit_update` message as a [`VisitPatch`] over a channel, and
//! reconnects after a fixed delay whenever the stream errors or ends.
//! Heartbeats and unknown message kinds are skipped. A missed update is
//! not a correctness problem: the next status fetch is the backstop, not
//! the stream.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lobby_core::visit::VisitPatch;
use lobby_core::{LobbyError, Result};

/// Fixed reconnect backoff. There is no retry cap; the stream keeps
/// trying for the widget's lifetime.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// One server-sent message, reduced to what the reconciler needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub event: String,
    pub data: String,
}

/// Opens one connected stream of server-sent messages.
///
/// The driver calls this again after every disconnect, so implementations
/// must be re-usable. Tests script this seam to drive the reconnect loop
/// without sockets.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self) -> Result<BoxStream<'static, Result<SseMessage>>>;
}

/// HTTP connector hitting `GET {base}/api/visitor/events?visitorId=…`.
pub struct HttpStreamConnector {
    client: Client,
    base_url: String,
    visitor_id: String,
}

impl HttpStreamConnector {
    pub fn new(base_url: impl Into<String>, visitor_id: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: Client::new(),
            base_url,
            visitor_id: visitor_id.into(),
        }
    }
}

#[async_trait]
impl StreamConnector for HttpStreamConnector {
    async fn connect(&self) -> Result<BoxStream<'static, Result<SseMessage>>> {
        // No request timeout: this stream is expected to stay open.
        let response = self
            .client
            .get(format!("{}/api/visitor/events", self.base_url))
            .query(&[("visitorId", self.visitor_id.as_str())])
            .send()
            .await
            .map_err(|e| LobbyError::network(format!("event stream connect failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LobbyError::api(status.as_u16(), "event stream rejected"));
        }

        let stream = response.bytes_stream().eventsource().map(|item| {
            item.map(|event| SseMessage {
                event: event.event,
                data: event.data,
            })
            .map_err(|e| LobbyError::network(format!("event stream read failed: {e}")))
        });
        Ok(stream.boxed())
    }
}

/// Handle to the background stream driver.
///
/// Receives parsed patches in arrival order. Dropping the handle does not
/// stop the driver; call [`VisitEventStream::shutdown`].
pub struct VisitEventStream {
    patches: mpsc::Receiver<VisitPatch>,
    cancel: CancellationToken,
}

impl VisitEventStream {
    /// Spawns the driver against the real backend endpoint.
    pub fn spawn(base_url: impl Into<String>, visitor_id: impl Into<String>) -> Self {
        Self::spawn_with_connector(Arc::new(HttpStreamConnector::new(base_url, visitor_id)))
    }

    /// Spawns the driver over an arbitrary connector.
    pub fn spawn_with_connector(connector: Arc<dyn StreamConnector>) -> Self {
        let (tx, rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        tokio::spawn(drive(connector, tx, cancel.clone()));
        Self {
            patches: rx,
            cancel,
        }
    }

    /// Next reconciled patch, `None` after shutdown.
    pub async fn recv(&mut self) -> Option<VisitPatch> {
        self.patches.recv().await
    }

    /// Stops the driver and closes the channel.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Connect, pump, back off, repeat.
async fn drive(
    connector: Arc<dyn StreamConnector>,
    tx: mpsc::Sender<VisitPatch>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        match connector.connect().await {
            Ok(mut stream) => {
                debug!("visit event stream connected");
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        item = stream.next() => match item {
                            Some(Ok(message)) => {
                                if !forward(&message, &tx).await {
                                    // Receiver gone, nothing left to do.
                                    return;
                                }
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "visit event stream error");
                                break;
                            }
                            None => {
                                debug!("visit event stream closed");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "visit event stream connect failed");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

/// Parses and forwards one message. Returns false when the receiver is
/// gone.
async fn forward(message: &SseMessage, tx: &mpsc::Sender<VisitPatch>) -> bool {
    match parse_visit_update(&message.data) {
        Ok(Some(patch)) => tx.send(patch).await.is_ok(),
        Ok(None) => true,
        Err(e) => {
            warn!(error = %e, "skipping unparseable stream message");
            true
        }
    }
}

/// Extracts the patch from a `visit_update` message; other kinds
/// (`connected`, `ping`) yield `None`.
fn parse_visit_update(data: &str) -> Result<Option<VisitPatch>> {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(rename = "type", default)]
        kind: Option<String>,
    }

    let envelope: Envelope = serde_json::from_str(data)?;
    if envelope.kind.as_deref() != Some("visit_update") {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(data)?))
}
