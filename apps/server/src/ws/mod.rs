//! WebSocket surface: `/ws/telemetry/{sessionKey}`.
//!
//! Each accepted socket becomes one `ClientSession`. Outbound frames flow
//! through a bounded queue drained by a writer task, so a slow client can
//! never stall the engine's tick.

pub mod protocol;
pub mod session;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::AppState;
use protocol::{encode_event, ServerEvent, SHUTDOWN_MESSAGE};
use session::{ClientSession, OUTBOUND_QUEUE};

pub async fn telemetry_ws(
    ws: WebSocketUpgrade,
    Path(session_key): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, session_key, state))
}

async fn handle_socket(socket: WebSocket, session_key: String, state: AppState) {
    let connection_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE);

    // Writer task: drains the outbound queue onto the socket. A write
    // failure means the peer is gone; dropping the receiver ends the queue.
    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let frame = encode_event(&event);
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    state.engine.client_joined(&session_key);
    let mut client = ClientSession::new(
        connection_id,
        session_key.clone(),
        state.engine.clone(),
        out_tx.clone(),
    );
    info!(%connection_id, session_key = %session_key, "client connected");

    // Current replay state straight away, null when the session is idle.
    client.send_state(state.engine.state(&session_key).await).await;

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = out_tx
                    .send(ServerEvent::Error { message: SHUTDOWN_MESSAGE.to_string() })
                    .await;
                break;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => client.handle_text(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong/binary
                Some(Err(e)) => {
                    debug!(%connection_id, error = %e, "socket read failed");
                    break;
                }
            }
        }
    }

    drop(client);
    drop(out_tx);
    state.engine.on_client_left(&session_key).await;
    let _ = writer.await;
    info!(%connection_id, session_key = %session_key, "client disconnected");
}
