//! WebSocket transport.
//!
//! Each accepted socket becomes one server connection. The socket task only
//! shuttles frames: text in goes to the server as a message, and whatever
//! the server queues for the connection goes out. The server never sees the
//! socket itself.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::protocol::Outgoing;
use crate::server::ServerHandle;
use crate::tracing::prelude::*;

/// Router serving the protocol at `path`.
pub fn router(handle: ServerHandle, path: &str) -> Router {
    Router::new()
        .route(path, get(upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

/// Serve connections on `listener` until `running` is cancelled.
pub async fn serve(
    listener: TcpListener,
    handle: ServerHandle,
    path: &str,
    running: CancellationToken,
) -> Result<()> {
    let app = router(handle, path);
    info!(addr = ?listener.local_addr().ok(), path, "Listening for workers");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { running.cancelled().await })
        .await?;
    Ok(())
}

async fn upgrade(ws: WebSocketUpgrade, State(handle): State<ServerHandle>) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = connection_task(socket, handle).await {
            debug!(error = %e, "Connection ended with error");
        }
    })
}

async fn connection_task(mut socket: WebSocket, handle: ServerHandle) -> Result<()> {
    let (outbound, mut rx) = mpsc::unbounded_channel();
    let id = handle.connect(outbound).await?;

    loop {
        tokio::select! {
            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle.message(id, text).await?;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = socket.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(connection = ?id, error = %e, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
            outgoing = rx.recv() => match outgoing {
                Some(Outgoing::Send(message)) => {
                    if socket.send(Message::Text(message.to_text())).await.is_err() {
                        break;
                    }
                }
                Some(Outgoing::Close { reason }) => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
                // The server forgot this connection.
                None => break,
            },
        }
    }

    handle.disconnect(id).await
}
