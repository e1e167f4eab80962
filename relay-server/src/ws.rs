//! WebSocket transport for the signaling channel
//!
//! One connection is one endpoint. Text frames carry the JSON protocol; the
//! identity assigned here is announced to the client in the `connected`
//! frame before anything else.
//!
//! Each connection runs three tasks: a reader that watches the socket and
//! the shutdown signal, a worker that handles frames in arrival order, and a
//! writer that drains the endpoint's outbox. The reader never waits on a
//! handler, so a close is seen even while a negotiation is suspended.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, Stream, StreamExt};
use relay_sfu::{EndpointId, SignalingGateway};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::server::AppState;

/// Frames read ahead of the handler before the connection is dropped
const FRAME_QUEUE_CAPACITY: usize = 64;

/// How long an in-flight handler may keep running after its endpoint left
const HANDLER_DRAIN_GRACE: Duration = Duration::from_secs(2);

pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let gateway = Arc::clone(&state.gateway);
    let shutdown = state.shutdown.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, gateway, shutdown))
}

async fn handle_socket(socket: WebSocket, gateway: Arc<SignalingGateway>, shutdown: watch::Receiver<bool>) {
    let (sink, stream) = socket.split();
    serve_connection(sink, stream, gateway, shutdown).await;
}

/// Run one signaling connection until the peer closes it or the relay shuts down
pub async fn serve_connection<Tx, Rx, E>(
    sink: Tx,
    mut stream: Rx,
    gateway: Arc<SignalingGateway>,
    mut shutdown: watch::Receiver<bool>,
) where
    Tx: Sink<Message> + Unpin + Send + 'static,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (endpoint_id, outbox) = gateway.connect();
    info!(endpoint_id = %endpoint_id, "WebSocket connection established");

    let writer = spawn_writer(endpoint_id.clone(), outbox, sink);
    let (frames, queue) = mpsc::channel(FRAME_QUEUE_CAPACITY);
    let mut worker = spawn_worker(endpoint_id.clone(), Arc::clone(&gateway), queue);

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = shutdown.changed() => {
                debug!(endpoint_id = %endpoint_id, "Closing connection for shutdown");
                break;
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => match frames.try_send(text.as_str().to_owned()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(endpoint_id = %endpoint_id, "Frame queue full, dropping connection");
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            },
            Some(Ok(Message::Binary(_))) => {
                debug!(endpoint_id = %endpoint_id, "Ignoring binary frame");
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {
                // Ping/pong are answered by axum
            }
            Some(Err(e)) => {
                debug!(endpoint_id = %endpoint_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }
    drop(frames);

    // Tear down while a handler may still be suspended; it finds its
    // records gone once it resumes.
    gateway.disconnect(&endpoint_id).await;

    if tokio::time::timeout(HANDLER_DRAIN_GRACE, &mut worker).await.is_err() {
        debug!(endpoint_id = %endpoint_id, "Abandoning stalled handler");
        worker.abort();
        if let Err(e) = worker.await {
            if e.is_panic() {
                error!(endpoint_id = %endpoint_id, error = %e, "Frame worker panicked");
            }
        }
        // The abandoned handler may have registered state after the first pass
        gateway.disconnect(&endpoint_id).await;
    }

    if let Err(e) = writer.await {
        error!(endpoint_id = %endpoint_id, error = %e, "WebSocket writer task failed");
    }

    info!(endpoint_id = %endpoint_id, "WebSocket connection closed");
}

/// Frames are handled in order; the next one starts after the previous
/// handler has finished.
fn spawn_worker(
    endpoint_id: EndpointId,
    gateway: Arc<SignalingGateway>,
    mut queue: mpsc::Receiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(text) = queue.recv().await {
            gateway.handle_frame(&endpoint_id, &text).await;
        }
    })
}

/// Outbox -> socket. Ends once the gateway drops the endpoint's outbox.
fn spawn_writer<Tx>(
    endpoint_id: EndpointId,
    mut outbox: mpsc::Receiver<relay_sfu::ServerMessage>,
    mut sink: Tx,
) -> JoinHandle<()>
where
    Tx: Sink<Message> + Unpin + Send + 'static,
    Tx::Error: Display,
{
    tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            let text = match message.encode() {
                Ok(text) => text,
                Err(e) => {
                    error!(endpoint_id = %endpoint_id, error = %e, "Failed to encode server message");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!(endpoint_id = %endpoint_id, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
        let _ = sink.close().await;
    })
}
