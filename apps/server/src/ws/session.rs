//! Per-connection client session: command dispatch and the streaming loop.

use std::sync::Arc;

use paddock::{EngineEvent, ReplayEngine, ReplayError, ReplayState};
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::{ClientCommand, ServerEvent};

/// Bound on queued outbound frames per connection. Batches are dropped,
/// never queued unbounded, when the client cannot keep up.
pub(crate) const OUTBOUND_QUEUE: usize = 64;

/// One logical subscriber of one session.
pub struct ClientSession {
    connection_id: Uuid,
    session_key: String,
    engine: Arc<ReplayEngine>,
    out_tx: mpsc::Sender<ServerEvent>,
    streaming: Option<CancellationToken>,
}

impl ClientSession {
    pub fn new(
        connection_id: Uuid,
        session_key: String,
        engine: Arc<ReplayEngine>,
        out_tx: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            connection_id,
            session_key,
            engine,
            out_tx,
            streaming: None,
        }
    }

    /// Decode and dispatch one inbound text frame. Errors become `ERROR`
    /// events; the connection stays open.
    pub async fn handle_text(&mut self, text: &str) {
        match super::protocol::decode_command(text) {
            Ok(command) => self.dispatch(command).await,
            Err(err) => self.send_error(&err).await,
        }
    }

    async fn dispatch(&mut self, command: ClientCommand) {
        debug!(
            connection_id = %self.connection_id,
            session_key = %self.session_key,
            ?command,
            "command received"
        );
        match command {
            ClientCommand::Subscribe => {
                self.start_streaming();
                self.send(ServerEvent::Subscribed {
                    session_key: self.session_key.clone(),
                })
                .await;
            }
            ClientCommand::Unsubscribe => {
                self.stop_streaming();
                self.send(ServerEvent::Unsubscribed).await;
            }
            ClientCommand::Play { start_time } => {
                match self.engine.play(&self.session_key, start_time).await {
                    Ok(state) => {
                        self.start_streaming();
                        self.send_state(Some(state)).await;
                    }
                    Err(err) => self.send_error(&err).await,
                }
            }
            ClientCommand::Pause => {
                self.stop_streaming();
                self.reply(self.engine.pause(&self.session_key).await).await;
            }
            ClientCommand::Stop => {
                self.stop_streaming();
                self.reply(self.engine.stop(&self.session_key).await).await;
            }
            ClientCommand::Seek { target_time } => {
                self.reply(self.engine.seek(&self.session_key, target_time).await)
                    .await;
            }
            ClientCommand::Speed { speed } => {
                self.reply(self.engine.set_speed(&self.session_key, speed).await)
                    .await;
            }
            ClientCommand::GetState => {
                let state = self.engine.state(&self.session_key).await;
                self.send_state(state).await;
            }
        }
    }

    /// Forward engine batches to this connection until completion or stop.
    ///
    /// Always starts a fresh loop: an earlier loop may have ended on
    /// `PLAYBACK_COMPLETE` while its token still looks live.
    fn start_streaming(&mut self) {
        self.stop_streaming();

        let mut rx = self.engine.subscribe(&self.session_key);
        let out = self.out_tx.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let connection_id = self.connection_id;
        let session_key = self.session_key.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // cancellation wins over a pending batch
                    biased;
                    _ = task_cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(EngineEvent::Batch(batch)) => {
                            match out.try_send(ServerEvent::TelemetryBatch(batch)) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    // never block the tick on a slow client
                                    warn!(
                                        %connection_id,
                                        session_key = %session_key,
                                        "outbound queue full, dropping batch"
                                    );
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => break,
                            }
                        }
                        Ok(EngineEvent::Completed) => {
                            let _ = out.send(ServerEvent::PlaybackComplete).await;
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(
                                %connection_id,
                                session_key = %session_key,
                                skipped = n,
                                "streaming loop lagged"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!(%connection_id, "streaming loop ended");
        });

        self.streaming = Some(cancel);
    }

    pub fn stop_streaming(&mut self) {
        if let Some(cancel) = self.streaming.take() {
            cancel.cancel();
        }
    }

    async fn reply(&mut self, result: Result<ReplayState, ReplayError>) {
        match result {
            Ok(state) => self.send_state(Some(state)).await,
            Err(err) => self.send_error(&err).await,
        }
    }

    pub async fn send_state(&mut self, state: Option<ReplayState>) {
        self.send(ServerEvent::ReplayState(state)).await;
    }

    async fn send_error(&mut self, err: &ReplayError) {
        if !err.is_client_error() {
            warn!(
                connection_id = %self.connection_id,
                session_key = %self.session_key,
                error = %err,
                "engine error"
            );
        }
        self.send(ServerEvent::Error {
            message: err.client_message(),
        })
        .await;
    }

    async fn send(&mut self, event: ServerEvent) {
        // A closed channel means the writer is gone; the read loop will
        // observe the disconnect and tear the session down.
        let _ = self.out_tx.send(event).await;
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        // Cancel the streaming loop on disconnect
        self.stop_streaming();
    }
}
