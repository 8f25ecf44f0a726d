//! Media Streams WebSocket: streamed call audio in, reply marks out.
//!
//! The stream is one utterance long. `start` binds the socket to a call
//! session, every `media` frame is appended to it, and `stop` ends the
//! utterance and then the call. A socket that closes without `stop` ends the
//! call and discards whatever was buffered.

use crate::api::{artifact_url, public_base_url};
use crate::media::{AudioFormat, OutgoingMark, StreamEvent};
use crate::session::{CallSession, SessionError, TurnOutcome};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound frames queued per connection.
const OUTBOUND_QUEUE: usize = 32;

/// The call a stream has been bound to by its `start` frame.
struct StreamCall {
    call_id: String,
    stream_sid: String,
    format: AudioFormat,
    session: Arc<CallSession>,
}

/// Handler for `GET /media-stream`.
pub async fn media_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let base = public_base_url(state.public_url.as_deref(), &headers);
    ws.on_upgrade(move |socket| handle_stream(socket, state, base))
}

async fn handle_stream(socket: WebSocket, state: Arc<AppState>, base: String) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let mut call: Option<StreamCall> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let event = match serde_json::from_str::<StreamEvent>(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed stream frame");
                continue;
            }
        };

        match event {
            StreamEvent::Connected | StreamEvent::Mark { .. } | StreamEvent::Unknown => {}
            StreamEvent::Start { start, stream_sid } => {
                let stream_sid = stream_sid
                    .or_else(|| start.stream_sid.clone())
                    .unwrap_or_default();
                let call_id = match start
                    .call_sid
                    .clone()
                    .filter(|sid| !sid.is_empty())
                    .or_else(|| Some(stream_sid.clone()).filter(|sid| !sid.is_empty()))
                {
                    Some(id) => id,
                    None => {
                        tracing::warn!("stream start without call or stream identifier");
                        continue;
                    }
                };

                let format = AudioFormat::from_media_format(start.media_format.as_ref());
                tracing::info!(call_id = %call_id, stream_sid = %stream_sid, ?format, "media stream started");

                let session = state.registry.get_or_create(&call_id);
                call = Some(StreamCall {
                    call_id,
                    stream_sid,
                    format,
                    session,
                });
            }
            StreamEvent::Media { media } => {
                let Some(call) = call.as_ref() else {
                    tracing::debug!("media before stream start ignored");
                    continue;
                };
                let chunk = match base64::engine::general_purpose::STANDARD.decode(&media.payload) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::warn!(call_id = %call.call_id, error = %e, "undecodable media payload");
                        continue;
                    }
                };
                if let Err(SessionError::SessionClosed(_)) = call.session.append(&chunk) {
                    tracing::debug!(call_id = %call.call_id, "media for closed session ignored");
                }
            }
            StreamEvent::Stop { .. } => {
                if let Some(call) = call.take() {
                    finish_utterance(&state, &call, &tx, &base).await;
                    end_call(&state, &call);
                }
                break;
            }
        }
    }

    if let Some(call) = call.take() {
        tracing::info!(call_id = %call.call_id, "media stream closed without stop");
        end_call(&state, &call);
    }

    // Let any queued mark reach the socket before it is dropped.
    drop(tx);
    if let Err(e) = send_task.await {
        tracing::warn!(error = %e, "stream sender task failed");
    }
}

/// Runs the streamed utterance and announces the reply on the socket.
async fn finish_utterance(
    state: &AppState,
    call: &StreamCall,
    tx: &mpsc::Sender<String>,
    base: &str,
) {
    match call
        .session
        .end_of_utterance(&state.pipeline, call.format)
        .await
    {
        Ok(TurnOutcome::Reply(artifact)) => {
            let mark = OutgoingMark::new(&call.stream_sid, artifact_url(base, &artifact.name));
            match serde_json::to_string(&mark) {
                Ok(json) => {
                    if tx.send(json).await.is_err() {
                        tracing::debug!(call_id = %call.call_id, "stream closed before reply mark");
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to encode reply mark"),
            }
        }
        Ok(TurnOutcome::Fallback) => {
            tracing::info!(call_id = %call.call_id, "streamed utterance failed");
        }
        Ok(TurnOutcome::NoUtterance) => {
            tracing::debug!(call_id = %call.call_id, "stream stopped with no audio");
        }
        Err(SessionError::SessionClosed(_)) => {
            tracing::info!(call_id = %call.call_id, "call ended before the reply was ready");
        }
    }
}

fn end_call(state: &AppState, call: &StreamCall) {
    // The call-status webhook may already have closed it, and a later call
    // may have reused the identifier.
    call.session.close();
    if state.registry.remove_if_same(&call.call_id, &call.session) {
        tracing::info!(call_id = %call.call_id, "session closed");
    } else {
        tracing::debug!(call_id = %call.call_id, "stream session already unmapped");
    }
}
